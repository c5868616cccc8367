use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::errors::{MediaError, ProviderResult};
use crate::models::chunk::UpstreamChunk;
use crate::models::message::Message;
use crate::models::tool::Tool;
use crate::session::ChunkSink;
use crate::vision::RequestShape;

/// Parsed chunks of one upstream completion, in arrival order
pub type ChunkStream = BoxStream<'static, ProviderResult<UpstreamChunk>>;

/// What the orchestrator asks the chat provider for. Sampling parameters and
/// the model live in the provider's own config.
#[derive(Debug, Clone)]
pub struct ChatCompletionRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<Tool>,
    pub shape: RequestShape,
}

impl ChatCompletionRequest {
    pub fn new(messages: Vec<Message>, tools: Vec<Tool>, shape: RequestShape) -> Self {
        Self {
            messages,
            tools,
            shape,
        }
    }
}

/// Base trait for streaming chat-completion upstreams
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Open a streaming completion. Errors returned here happened before the
    /// first chunk; errors inside the stream happened while reading it.
    async fn stream(&self, request: &ChatCompletionRequest) -> ProviderResult<ChunkStream>;
}

/// Image tools executed on behalf of the model.
///
/// Implementations write exactly one chunk to `sink` per call: the image on
/// success or an error on failure. The returned error only tells the caller
/// whether to retry.
#[async_trait]
pub trait MediaTools: Send + Sync {
    async fn generate_image(&self, prompt: &str, sink: &ChunkSink) -> Result<(), MediaError>;

    async fn edit_image(
        &self,
        prompt: &str,
        source_base64: &str,
        sink: &ChunkSink,
    ) -> Result<(), MediaError>;
}
