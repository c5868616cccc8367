use async_trait::async_trait;
use futures::{stream, StreamExt};
use reqwest::StatusCode;
use serde_json::json;
use std::sync::{Arc, Mutex};

use crate::errors::{MediaError, ProviderError, ProviderResult};
use crate::models::chunk::{markup, UpstreamChunk};
use crate::models::tool::ImageTool;
use crate::providers::base::{ChatCompletionRequest, ChatProvider, ChunkStream, MediaTools};
use crate::session::ChunkSink;

/// One scripted upstream completion
#[derive(Debug, Clone)]
pub enum MockCompletion {
    /// Raw chunk JSON, yielded in order; unparsable entries surface as
    /// malformed chunks
    Chunks(Vec<String>),
    /// Like `Chunks` but the stream never ends afterwards
    Stall(Vec<String>),
    /// Opening the stream fails with this status
    Status(StatusCode),
}

/// A mock provider that plays back pre-configured completions for testing
pub struct MockChatProvider {
    completions: Arc<Mutex<Vec<MockCompletion>>>,
    requests: Arc<Mutex<Vec<ChatCompletionRequest>>>,
}

impl MockChatProvider {
    pub fn new(completions: Vec<MockCompletion>) -> Self {
        Self {
            completions: Arc::new(Mutex::new(completions)),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn requests(&self) -> Vec<ChatCompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

fn parse_all(raw: Vec<String>) -> Vec<ProviderResult<UpstreamChunk>> {
    raw.into_iter()
        .map(|raw| UpstreamChunk::parse(raw).map_err(ProviderError::from))
        .collect()
}

#[async_trait]
impl ChatProvider for MockChatProvider {
    async fn stream(&self, request: &ChatCompletionRequest) -> ProviderResult<ChunkStream> {
        self.requests.lock().unwrap().push(request.clone());

        let next = {
            let mut completions = self.completions.lock().unwrap();
            if completions.is_empty() {
                // An exhausted script behaves like an empty completion
                MockCompletion::Chunks(Vec::new())
            } else {
                completions.remove(0)
            }
        };

        match next {
            MockCompletion::Chunks(raw) => Ok(stream::iter(parse_all(raw)).boxed()),
            MockCompletion::Stall(raw) => Ok(stream::iter(parse_all(raw))
                .chain(stream::pending())
                .boxed()),
            MockCompletion::Status(status) => Err(ProviderError::Status {
                status,
                body: String::new(),
            }),
        }
    }
}

/// A plain content delta
pub fn content_chunk(text: &str) -> String {
    json!({
        "id": "chatcmpl-mock",
        "object": "chat.completion.chunk",
        "choices": [{"index": 0, "delta": {"content": text}, "finish_reason": null}]
    })
    .to_string()
}

/// A tool call delta; `name` is only present on a call's first fragment
pub fn tool_chunk(index: u32, name: Option<&str>, arguments: &str) -> String {
    let mut function = json!({"arguments": arguments});
    if let Some(name) = name {
        function["name"] = json!(name);
    }
    json!({
        "id": "chatcmpl-mock",
        "object": "chat.completion.chunk",
        "choices": [{
            "index": 0,
            "delta": {"tool_calls": [{"index": index, "type": "function", "function": function}]},
            "finish_reason": null
        }]
    })
    .to_string()
}

#[derive(Debug, Clone, PartialEq)]
pub struct MediaCall {
    pub tool: ImageTool,
    pub prompt: String,
    pub source: Option<String>,
}

/// Scripted image tool results. Each call pops the next entry; `Some` is the
/// image payload, `None` a failure. An empty script fails every call.
pub struct MockMediaTools {
    results: Arc<Mutex<Vec<Option<String>>>>,
    calls: Arc<Mutex<Vec<MediaCall>>>,
}

impl MockMediaTools {
    pub fn new(results: Vec<Option<String>>) -> Self {
        Self {
            results: Arc::new(Mutex::new(results)),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn calls(&self) -> Vec<MediaCall> {
        self.calls.lock().unwrap().clone()
    }

    async fn respond(&self, call: MediaCall, sink: &ChunkSink) -> Result<(), MediaError> {
        self.calls.lock().unwrap().push(call);
        let next = {
            let mut results = self.results.lock().unwrap();
            if results.is_empty() {
                None
            } else {
                results.remove(0)
            }
        };

        match next {
            Some(base64) => {
                sink.content(markup::image(&base64), true).await?;
                Ok(())
            }
            None => {
                sink.content(markup::error("mock image failure"), true).await?;
                Err(MediaError::Upstream("mock image failure".to_string()))
            }
        }
    }
}

#[async_trait]
impl MediaTools for MockMediaTools {
    async fn generate_image(&self, prompt: &str, sink: &ChunkSink) -> Result<(), MediaError> {
        let call = MediaCall {
            tool: ImageTool::GenerateImage,
            prompt: prompt.to_string(),
            source: None,
        };
        self.respond(call, sink).await
    }

    async fn edit_image(
        &self,
        prompt: &str,
        source_base64: &str,
        sink: &ChunkSink,
    ) -> Result<(), MediaError> {
        let call = MediaCall {
            tool: ImageTool::EditImage,
            prompt: prompt.to_string(),
            source: Some(source_base64.to_string()),
        };
        self.respond(call, sink).await
    }
}
