use strum_macros::Display;
use tokio::sync::mpsc;

use crate::errors::SinkClosed;
use crate::models::chunk::{sse_event, OutgoingChunk};
use crate::preprocess::ExtractedImage;
use crate::providers::sse::DONE;

/// Write half of one response stream.
///
/// Every item sent is a complete server-sent event. The receiver is owned by
/// the HTTP response; when it is dropped every send fails with [`SinkClosed`].
#[derive(Debug, Clone)]
pub struct ChunkSink {
    tx: mpsc::Sender<String>,
    model: String,
}

impl ChunkSink {
    pub fn new<M: Into<String>>(tx: mpsc::Sender<String>, model: M) -> Self {
        Self {
            tx,
            model: model.into(),
        }
    }

    pub fn channel<M: Into<String>>(model: M, capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx, model), rx)
    }

    /// Forward an upstream chunk's JSON text unchanged
    pub async fn send_raw(&self, data: &str) -> Result<(), SinkClosed> {
        self.tx.send(sse_event(data)).await.map_err(|_| SinkClosed)
    }

    pub async fn send_chunk(&self, chunk: &OutgoingChunk) -> Result<(), SinkClosed> {
        self.tx.send(chunk.to_event()).await.map_err(|_| SinkClosed)
    }

    /// Synthesize a chunk carrying `content`
    pub async fn content<C: Into<String>>(&self, content: C, terminal: bool) -> Result<(), SinkClosed> {
        self.send_chunk(&OutgoingChunk::new(self.model.as_str(), content, terminal))
            .await
    }

    pub async fn done(&self) -> Result<(), SinkClosed> {
        self.send_raw(DONE).await
    }

    /// Resolves once the receiving side has gone away
    pub async fn closed(&self) {
        self.tx.closed().await
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum SessionState {
    Opening,
    Streaming,
    DispatchingTool,
    Passthrough,
    Retrying,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum SessionOutcome {
    /// The upstream completion ran to its end
    Completed,
    /// A retry budget ran out and the terminal error was sent
    Exhausted,
    /// The client went away mid-stream
    Disconnected,
}

/// Per-request state, owned by the task that serves the request
#[derive(Debug)]
pub struct StreamSession {
    sink: ChunkSink,
    image: Option<ExtractedImage>,
    retries: u32,
    state: SessionState,
}

impl StreamSession {
    pub fn new(sink: ChunkSink, image: Option<ExtractedImage>) -> Self {
        Self {
            sink,
            image,
            retries: 0,
            state: SessionState::Opening,
        }
    }

    pub fn sink(&self) -> &ChunkSink {
        &self.sink
    }

    pub fn image(&self) -> Option<&ExtractedImage> {
        self.image.as_ref()
    }

    /// Completion attempts that have failed so far
    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn transition(&mut self, next: SessionState) {
        if self.state != next {
            tracing::debug!(from = %self.state, to = %next, "session state");
            self.state = next;
        }
    }

    /// Count one failed completion attempt and return the new total
    pub fn record_retry(&mut self) -> u32 {
        self.retries += 1;
        self.retries
    }

    /// Close the session. `[DONE]` is written unless the client is already
    /// gone; dropping the sink afterwards ends the response body.
    pub async fn finish(mut self, outcome: SessionOutcome) -> SessionOutcome {
        self.transition(SessionState::Closed);
        if outcome != SessionOutcome::Disconnected && self.sink.done().await.is_err() {
            tracing::debug!("client left before [DONE]");
            return SessionOutcome::Disconnected;
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sink_frames_events() {
        let (sink, mut rx) = ChunkSink::channel("test-model", 8);

        sink.send_raw(r#"{"id":"x"}"#).await.unwrap();
        sink.content("<info>Retrying...</info>", false).await.unwrap();
        sink.done().await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), "data: {\"id\":\"x\"}\n\n");

        let event = rx.recv().await.unwrap();
        let json = event.strip_prefix("data: ").unwrap().trim_end();
        let chunk: OutgoingChunk = serde_json::from_str(json).unwrap();
        assert_eq!(chunk.model, "test-model");
        assert_eq!(chunk.content(), "<info>Retrying...</info>");
        assert!(!chunk.is_terminal());

        assert_eq!(rx.recv().await.unwrap(), "data: [DONE]\n\n");
    }

    #[test]
    fn test_sink_reports_closed_receiver() {
        let (sink, rx) = ChunkSink::channel("m", 1);
        assert!(!sink.is_closed());
        drop(rx);

        assert!(sink.is_closed());
        assert_eq!(tokio_test::block_on(sink.content("late", true)), Err(SinkClosed));
        // resolves immediately
        tokio_test::block_on(sink.closed());
    }

    #[tokio::test]
    async fn test_session_finish() {
        let (sink, mut rx) = ChunkSink::channel("m", 4);
        let mut session = StreamSession::new(sink, None);
        assert_eq!(session.state(), SessionState::Opening);
        assert_eq!(session.record_retry(), 1);
        assert_eq!(session.record_retry(), 2);
        assert_eq!(session.retries(), 2);

        session.transition(SessionState::Streaming);
        assert_eq!(session.state(), SessionState::Streaming);

        let outcome = session.finish(SessionOutcome::Completed).await;
        assert_eq!(outcome, SessionOutcome::Completed);
        assert_eq!(rx.recv().await.unwrap(), "data: [DONE]\n\n");
        // sink dropped with the session
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_disconnected_session_skips_done() {
        let (sink, mut rx) = ChunkSink::channel("m", 4);
        let session = StreamSession::new(sink, None);

        let outcome = session.finish(SessionOutcome::Disconnected).await;
        assert_eq!(outcome, SessionOutcome::Disconnected);
        assert!(rx.recv().await.is_none());
    }
}
