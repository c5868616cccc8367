use crate::state::AppState;
use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use easel::{
    models::message::Message,
    providers::base::ChatCompletionRequest,
    session::{ChunkSink, StreamSession},
};
use futures::Stream;
use serde::Deserialize;
use serde_json::{json, Value};
use std::{
    convert::Infallible,
    pin::Pin,
    task::{Context, Poll},
};
use tokio_stream::wrappers::ReceiverStream;

// Only `messages` is read; `model`, `stream` and the rest are ignored
#[derive(Debug, Deserialize)]
struct CompletionRequest {
    messages: Vec<Message>,
}

// Server-sent event body fed by the session's chunk sink
pub struct SseResponse {
    rx: ReceiverStream<String>,
}

impl SseResponse {
    fn new(rx: ReceiverStream<String>) -> Self {
        Self { rx }
    }
}

impl Stream for SseResponse {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.rx)
            .poll_next(cx)
            .map(|opt| opt.map(|s| Ok(Bytes::from(s))))
    }
}

impl IntoResponse for SseResponse {
    fn into_response(self) -> Response {
        let body = Body::from_stream(self);

        (
            [
                (header::CONTENT_TYPE, "text/event-stream"),
                (header::CACHE_CONTROL, "no-cache"),
                (header::CONNECTION, "keep-alive"),
            ],
            body,
        )
            .into_response()
    }
}

async fn handler(
    State(state): State<AppState>,
    Json(request): Json<CompletionRequest>,
) -> Result<SseResponse, StatusCode> {
    if request.messages.is_empty() {
        tracing::warn!("rejecting completion request without messages");
        return Err(StatusCode::BAD_REQUEST);
    }

    let shape = state.shape_for(&request.messages);
    let prepared = state.preprocessor.prepare(request.messages, shape);

    // Create channel for streaming
    let (sink, rx) = ChunkSink::channel(state.model_for(shape), 100);
    let session = StreamSession::new(sink, prepared.image);
    let completion = ChatCompletionRequest::new(
        prepared.messages,
        state.orchestrator.tools().to_vec(),
        shape,
    );

    // The spawned task owns the session and closes the stream when it ends
    let orchestrator = state.orchestrator.clone();
    tokio::spawn(async move {
        orchestrator.serve(completion, session).await;
    });

    Ok(SseResponse::new(ReceiverStream::new(rx)))
}

async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

// Configure routes for this module
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/chat/completions", post(handler))
        .route("/health", get(health))
        .with_state(state)
}
