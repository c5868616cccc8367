use async_trait::async_trait;
use futures::{future, StreamExt, TryStreamExt};
use reqwest::Client;
use serde_json::{json, Map, Value};

use super::base::{ChatCompletionRequest, ChatProvider, ChunkStream};
use super::configs::ChatProviderConfig;
use super::sse::{self, DONE};
use super::utils::tools_to_openai_spec;
use crate::errors::{ProviderError, ProviderResult};
use crate::models::chunk::UpstreamChunk;
use crate::vision::RequestShape;

/// Streaming client for an OpenAI-compatible `/v1/chat/completions` endpoint
pub struct OpenAiChatProvider {
    client: Client,
    config: ChatProviderConfig,
}

impl OpenAiChatProvider {
    pub fn new(config: ChatProviderConfig) -> ProviderResult<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;

        Ok(Self { client, config })
    }

    /// The vision model, when configured, serves requests whose current turn
    /// carries images
    pub fn model_for(&self, shape: RequestShape) -> &str {
        match (shape, &self.config.vision_model) {
            (RequestShape::Vision, Some(vision_model)) => vision_model,
            _ => &self.config.model,
        }
    }

    fn payload(&self, request: &ChatCompletionRequest) -> ProviderResult<Value> {
        let tools = tools_to_openai_spec(&request.tools)
            .map_err(|e| ProviderError::InvalidRequest(e.to_string()))?;

        let mut payload = Map::new();
        payload.insert("model".to_string(), json!(self.model_for(request.shape)));
        let messages = serde_json::to_value(&request.messages)
            .map_err(|e| ProviderError::InvalidRequest(e.to_string()))?;
        payload.insert("messages".to_string(), messages);
        payload.insert("temperature".to_string(), json!(self.config.temperature));
        payload.insert("top_p".to_string(), json!(self.config.top_p));
        payload.insert("stream".to_string(), json!(true));
        if let Some(seed) = self.config.seed {
            payload.insert("seed".to_string(), json!(seed));
        }
        if let Some(top_k) = self.config.top_k {
            payload.insert("top_k".to_string(), json!(top_k));
        }
        if !tools.is_empty() {
            payload.insert("tools".to_string(), json!(tools));
        }

        Ok(Value::Object(payload))
    }
}

#[async_trait]
impl ChatProvider for OpenAiChatProvider {
    async fn stream(&self, request: &ChatCompletionRequest) -> ProviderResult<ChunkStream> {
        let url = format!(
            "{}/v1/chat/completions",
            self.config.host.trim_end_matches('/')
        );
        let payload = self.payload(request)?;

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status { status, body });
        }

        let chunks = sse::data_lines(response.bytes_stream().map_err(ProviderError::from))
            .take_while(|line| future::ready(!matches!(line, Ok(data) if data.trim() == DONE)))
            .filter(|line| future::ready(!matches!(line, Ok(data) if data.trim().is_empty())))
            .map(|line| line.and_then(|data| UpstreamChunk::parse(data).map_err(ProviderError::from)));

        Ok(chunks.boxed())
    }
}
