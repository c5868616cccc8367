use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

use super::base::MediaTools;
use super::configs::ImageProviderConfig;
use super::sse::{self, DONE};
use super::utils::truncate_chars;
use crate::errors::MediaError;
use crate::models::chunk::markup;
use crate::session::ChunkSink;

const MAX_PROMPT_CHARS: usize = 1000;
const IMAGE_SIZE: &str = "1024x1024";

/// One event of the image stream
#[derive(Debug, Default, Deserialize)]
struct ImageEvent {
    #[serde(default)]
    image_base64: Option<String>,
    #[serde(default)]
    finish_reason: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Client for the streaming image generation and editing endpoints
pub struct ImageClient {
    client: Client,
    config: ImageProviderConfig,
}

impl ImageClient {
    pub fn new(config: ImageProviderConfig) -> Result<Self, MediaError> {
        let client = Client::builder().timeout(config.timeout).build()?;

        Ok(Self { client, config })
    }

    /// Run one call and report its result to the sink as a single chunk
    async fn run(&self, endpoint: &str, payload: Value, sink: &ChunkSink) -> Result<(), MediaError> {
        match self.read_image(endpoint, &payload).await {
            Ok(base64) => {
                tracing::info!(endpoint, len = base64.len(), "image received");
                sink.content(markup::image(&base64), true).await?;
                Ok(())
            }
            Err(e) => {
                tracing::warn!(endpoint, "image request failed: {}", e);
                sink.content(markup::error(&e.to_string()), true).await?;
                Err(e)
            }
        }
    }

    /// POST the payload and accumulate `image_base64` fragments until the
    /// stream reports `stop` or ends
    async fn read_image(&self, endpoint: &str, payload: &Value) -> Result<String, MediaError> {
        let url = format!("{}{}", self.config.host.trim_end_matches('/'), endpoint);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(MediaError::Status { status });
        }

        let mut lines = Box::pin(sse::data_lines(response.bytes_stream().map_err(MediaError::from)));
        let mut image = String::new();

        while let Some(line) = lines.next().await {
            let line = line?;
            let data = line.trim();
            if data.is_empty() {
                continue;
            }
            if data == DONE {
                break;
            }

            let event: ImageEvent = serde_json::from_str(data)?;
            if let Some(fragment) = event.image_base64 {
                image.push_str(&fragment);
            }

            match event.finish_reason.as_deref() {
                Some("stop") if image.is_empty() => return Err(MediaError::MissingImage),
                Some("stop") => return Ok(image),
                Some("error") => {
                    let message = event
                        .error
                        .unwrap_or_else(|| "image request was rejected".to_string());
                    return Err(MediaError::Upstream(message));
                }
                _ => {}
            }
        }

        if image.is_empty() {
            Err(MediaError::MissingImage)
        } else {
            Ok(image)
        }
    }
}

#[async_trait]
impl MediaTools for ImageClient {
    async fn generate_image(&self, prompt: &str, sink: &ChunkSink) -> Result<(), MediaError> {
        let prompt = truncate_chars(prompt, MAX_PROMPT_CHARS);
        tracing::info!(model = %self.config.generation_model, chars = prompt.chars().count(), "generating image");

        let payload = json!({
            "model": self.config.generation_model,
            "prompt": prompt,
            "size": IMAGE_SIZE,
            "stream": true,
        });
        self.run("/v1/images/generations", payload, sink).await
    }

    async fn edit_image(
        &self,
        prompt: &str,
        source_base64: &str,
        sink: &ChunkSink,
    ) -> Result<(), MediaError> {
        let prompt = truncate_chars(prompt, MAX_PROMPT_CHARS).trim();
        tracing::info!(
            model = %self.config.editing_model,
            chars = prompt.chars().count(),
            source_len = source_base64.len(),
            "editing image"
        );

        let payload = json!({
            "model": self.config.editing_model,
            "prompt": prompt,
            "image": source_base64,
            "stream": true,
        });
        self.run("/v1/images/edits", payload, sink).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::chunk::OutgoingChunk;
    use tokio::sync::mpsc;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn event_body(events: &[Value]) -> String {
        events
            .iter()
            .map(|event| format!("data: {}\n\n", event))
            .collect()
    }

    async fn _setup_mock_server(endpoint: &str, template: ResponseTemplate) -> (MockServer, ImageClient) {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(endpoint))
            .and(header("Authorization", "Bearer image_key"))
            .respond_with(template)
            .mount(&mock_server)
            .await;

        let client = ImageClient::new(ImageProviderConfig::new(mock_server.uri(), "image_key")).unwrap();
        (mock_server, client)
    }

    fn chunks(rx: &mut mpsc::Receiver<String>) -> Vec<OutgoingChunk> {
        let mut chunks = Vec::new();
        while let Ok(event) = rx.try_recv() {
            let json = event.strip_prefix("data: ").unwrap().trim_end();
            chunks.push(serde_json::from_str(json).unwrap());
        }
        chunks
    }

    #[tokio::test]
    async fn test_generate_concatenates_fragments() {
        let body = event_body(&[
            json!({"image_base64": "AAA"}),
            json!({"image_base64": "BBB"}),
            json!({"image_base64": "CCC", "finish_reason": "stop"}),
        ]);
        let (_server, client) = _setup_mock_server(
            "/v1/images/generations",
            ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"),
        )
        .await;
        let (sink, mut rx) = ChunkSink::channel("m", 8);

        client.generate_image("a red fox", &sink).await.unwrap();

        let chunks = chunks(&mut rx);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content(), markup::image("AAABBBCCC"));
        assert!(chunks[0].is_terminal());
    }

    #[tokio::test]
    async fn test_generate_request_body() {
        let long_prompt: String = "é".repeat(1200);
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/images/generations"))
            .and(body_json(json!({
                "model": "flux-dev",
                "prompt": "é".repeat(1000),
                "size": "1024x1024",
                "stream": true,
            })))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                event_body(&[json!({"image_base64": "QQ==", "finish_reason": "stop"})]),
                "text/event-stream",
            ))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = ImageClient::new(ImageProviderConfig::new(mock_server.uri(), "k")).unwrap();
        let (sink, _rx) = ChunkSink::channel("m", 8);
        client.generate_image(&long_prompt, &sink).await.unwrap();
    }

    #[tokio::test]
    async fn test_edit_request_body() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/images/edits"))
            .and(body_json(json!({
                "model": "flux-kontext-dev",
                "prompt": "make it blue",
                "image": "U09VUkNF",
                "stream": true,
            })))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                event_body(&[json!({"image_base64": "RURJVA==", "finish_reason": "stop"})]),
                "text/event-stream",
            ))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = ImageClient::new(ImageProviderConfig::new(mock_server.uri(), "k")).unwrap();
        let (sink, mut rx) = ChunkSink::channel("m", 8);
        client
            .edit_image("  make it blue \n", "U09VUkNF", &sink)
            .await
            .unwrap();

        assert_eq!(chunks(&mut rx)[0].content(), markup::image("RURJVA=="));
    }

    #[tokio::test]
    async fn test_upstream_error_event() {
        let body = event_body(&[
            json!({"image_base64": "AAA"}),
            json!({"finish_reason": "error", "error": "nsfw content"}),
        ]);
        let (_server, client) = _setup_mock_server(
            "/v1/images/edits",
            ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"),
        )
        .await;
        let (sink, mut rx) = ChunkSink::channel("m", 8);

        let err = client.edit_image("x", "AAAA", &sink).await.unwrap_err();
        assert!(matches!(err, MediaError::Upstream(ref msg) if msg == "nsfw content"));

        let chunks = chunks(&mut rx);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].content().starts_with("<error>"));
        assert!(chunks[0].content().contains("nsfw content"));
        assert!(chunks[0].is_terminal());
    }

    #[tokio::test]
    async fn test_error_status() {
        let (_server, client) =
            _setup_mock_server("/v1/images/generations", ResponseTemplate::new(500)).await;
        let (sink, mut rx) = ChunkSink::channel("m", 8);

        let err = client.generate_image("x", &sink).await.unwrap_err();
        assert!(matches!(err, MediaError::Status { .. }));
        assert!(chunks(&mut rx)[0].content().contains("500"));
    }

    #[tokio::test]
    async fn test_malformed_event() {
        let (_server, client) = _setup_mock_server(
            "/v1/images/generations",
            ResponseTemplate::new(200).set_body_raw("data: {oops\n\n", "text/event-stream"),
        )
        .await;
        let (sink, mut rx) = ChunkSink::channel("m", 8);

        let err = client.generate_image("x", &sink).await.unwrap_err();
        assert!(matches!(err, MediaError::MalformedEvent(_)));
        assert_eq!(chunks(&mut rx).len(), 1);
    }

    #[tokio::test]
    async fn test_stream_end_without_stop() {
        let with_data = event_body(&[json!({"image_base64": "AAA"}), json!({"image_base64": "BBB"})])
            + "data: [DONE]\n\n";
        let (_server, client) = _setup_mock_server(
            "/v1/images/generations",
            ResponseTemplate::new(200).set_body_raw(with_data, "text/event-stream"),
        )
        .await;
        let (sink, mut rx) = ChunkSink::channel("m", 8);
        client.generate_image("x", &sink).await.unwrap();
        assert_eq!(chunks(&mut rx)[0].content(), markup::image("AAABBB"));

        let (_server, client) = _setup_mock_server(
            "/v1/images/generations",
            ResponseTemplate::new(200).set_body_raw(event_body(&[json!({"progress": 0.5})]), "text/event-stream"),
        )
        .await;
        let err = client.generate_image("x", &sink).await.unwrap_err();
        assert!(matches!(err, MediaError::MissingImage));
    }

    #[tokio::test]
    async fn test_stop_without_data_fails() {
        let (_server, client) = _setup_mock_server(
            "/v1/images/generations",
            ResponseTemplate::new(200)
                .set_body_raw(event_body(&[json!({"finish_reason": "stop"})]), "text/event-stream"),
        )
        .await;
        let (sink, _rx) = ChunkSink::channel("m", 8);

        let err = client.generate_image("x", &sink).await.unwrap_err();
        assert!(matches!(err, MediaError::MissingImage));
    }

    #[tokio::test]
    async fn test_closed_sink_reports_disconnect() {
        let body = event_body(&[json!({"image_base64": "AAA", "finish_reason": "stop"})]);
        let (_server, client) = _setup_mock_server(
            "/v1/images/generations",
            ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"),
        )
        .await;
        let (sink, rx) = ChunkSink::channel("m", 8);
        drop(rx);

        let err = client.generate_image("x", &sink).await.unwrap_err();
        assert!(matches!(err, MediaError::Disconnected));
    }
}
