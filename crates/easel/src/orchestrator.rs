use futures::StreamExt;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use strum::IntoEnumIterator;

use crate::errors::{MediaError, SinkClosed};
use crate::models::chunk::{markup, ToolCallDelta};
use crate::models::tool::{ImageTool, Tool, ToolCall};
use crate::providers::base::{ChatCompletionRequest, ChatProvider, MediaTools};
use crate::session::{ChunkSink, SessionOutcome, SessionState, StreamSession};

const MAX_BACKOFF: Duration = Duration::from_secs(10);

/// Attempt limits shared by completions and image calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    /// Base delay between attempts, doubled each time. Zero disables it.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Duration::ZERO,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: Duration) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }

    /// Delay after the `attempt`-th failure (1-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        if self.backoff.is_zero() {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.backoff.saturating_mul(factor).min(MAX_BACKOFF)
    }
}

/// Why a whole completion has to be retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompletionFailure {
    Arguments,
    Upstream,
}

impl CompletionFailure {
    fn message(&self) -> &'static str {
        match self {
            CompletionFailure::Arguments => "Failed to parse tool arguments",
            CompletionFailure::Upstream => "Failed to complete the request",
        }
    }
}

/// Early exit from one completion attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stop {
    Disconnected,
    Failed(CompletionFailure),
}

impl From<SinkClosed> for Stop {
    fn from(_: SinkClosed) -> Self {
        Stop::Disconnected
    }
}

#[derive(Debug)]
struct PendingCall {
    index: u32,
    name: Option<String>,
    arguments: String,
}

impl PendingCall {
    fn is_ready(&self) -> bool {
        self.name.is_some() && serde_json::from_str::<serde_json::Value>(&self.arguments).is_ok()
    }

    fn into_call(self) -> Option<ToolCall> {
        let index = self.index;
        self.name
            .map(|name| ToolCall::new(index, name, self.arguments))
    }
}

/// Reassembles streamed tool-call fragments into whole calls.
///
/// Fragments accumulate per call index. A call is ready as soon as its
/// arguments parse as JSON, and is otherwise flushed when another call starts
/// or the caller asks. Argument fragments for an index that was already handed
/// out are dropped.
#[derive(Debug, Default)]
pub struct ToolCallAssembler {
    pending: Option<PendingCall>,
    dispatched: HashSet<u32>,
}

impl ToolCallAssembler {
    /// Feed one fragment and return the calls it completed, in order
    pub fn push(&mut self, delta: &ToolCallDelta) -> Vec<ToolCall> {
        let mut ready = Vec::new();
        let name = delta.name();

        if name.is_none() && self.dispatched.contains(&delta.index) {
            tracing::debug!(index = delta.index, "ignoring fragment of a dispatched tool call");
            return ready;
        }

        let starts_new = match &self.pending {
            Some(pending) => pending.index != delta.index || (name.is_some() && pending.name.is_some()),
            None => true,
        };
        if starts_new {
            ready.extend(self.flush());
            self.pending = Some(PendingCall {
                index: delta.index,
                name: None,
                arguments: String::new(),
            });
        }

        if let Some(pending) = self.pending.as_mut() {
            if let Some(name) = name {
                pending.name = Some(name.to_string());
            }
            pending.arguments.push_str(delta.arguments());
            if pending.is_ready() {
                ready.extend(self.flush());
            }
        }

        ready
    }

    /// Hand out whatever is pending, complete or not
    pub fn flush(&mut self) -> Option<ToolCall> {
        let pending = self.pending.take()?;
        self.dispatched.insert(pending.index);
        let index = pending.index;
        let call = pending.into_call();
        if call.is_none() {
            tracing::warn!(index, "dropping tool call fragments without a function name");
        }
        call
    }
}

#[derive(Clone, Copy)]
enum MediaRequest<'a> {
    Generate { prompt: &'a str },
    Edit { prompt: &'a str, source: &'a str },
}

/// Drives one streamed completion: passes content through, intercepts image
/// tool calls and retries failed completions.
pub struct Orchestrator {
    provider: Arc<dyn ChatProvider>,
    media: Arc<dyn MediaTools>,
    policy: RetryPolicy,
    tools: Vec<Tool>,
}

impl Orchestrator {
    pub fn new(provider: Arc<dyn ChatProvider>, media: Arc<dyn MediaTools>, policy: RetryPolicy) -> Self {
        Self {
            provider,
            media,
            policy,
            tools: ImageTool::iter().map(|tool| tool.tool()).collect(),
        }
    }

    /// Tool definitions advertised on every completion
    pub fn tools(&self) -> &[Tool] {
        &self.tools
    }

    /// Run the session to its end and close it
    pub async fn serve(&self, request: ChatCompletionRequest, mut session: StreamSession) -> SessionOutcome {
        tracing::info!(
            messages = request.messages.len(),
            shape = ?request.shape,
            has_image = session.image().is_some(),
            "serving completion"
        );
        let outcome = self.run(&request, &mut session).await;
        let outcome = session.finish(outcome).await;
        tracing::info!(%outcome, "completion finished");
        outcome
    }

    /// Stream completions until one runs to its end, the retry budget is
    /// spent, or the client leaves
    pub async fn run(&self, request: &ChatCompletionRequest, session: &mut StreamSession) -> SessionOutcome {
        loop {
            let failure = match self.attempt(request, session).await {
                Ok(()) => return SessionOutcome::Completed,
                Err(Stop::Disconnected) => return SessionOutcome::Disconnected,
                Err(Stop::Failed(failure)) => failure,
            };

            session.transition(SessionState::Retrying);
            let retries = session.record_retry();
            if retries >= self.policy.max_retries {
                tracing::error!(retries, "giving up on completion: {}", failure.message());
                return match session.sink().content(markup::error(failure.message()), true).await {
                    Ok(()) => SessionOutcome::Exhausted,
                    Err(SinkClosed) => SessionOutcome::Disconnected,
                };
            }

            tracing::warn!(retries, ?failure, "retrying completion");
            if session.sink().content(markup::info("Retrying..."), false).await.is_err()
                || self.pause(retries, session.sink()).await.is_err()
            {
                return SessionOutcome::Disconnected;
            }
        }
    }

    async fn attempt(&self, request: &ChatCompletionRequest, session: &mut StreamSession) -> Result<(), Stop> {
        session.transition(SessionState::Opening);
        let opened = tokio::select! {
            _ = session.sink().closed() => return Err(Stop::Disconnected),
            opened = self.provider.stream(request) => opened,
        };
        let mut chunks = opened.map_err(|e| {
            tracing::warn!("failed to open completion stream: {}", e);
            Stop::Failed(CompletionFailure::Upstream)
        })?;

        session.transition(SessionState::Streaming);
        let mut assembler = ToolCallAssembler::default();

        loop {
            let next = tokio::select! {
                _ = session.sink().closed() => return Err(Stop::Disconnected),
                next = chunks.next() => next,
            };
            let chunk = match next {
                None => break,
                Some(Ok(chunk)) => chunk,
                Some(Err(e)) => {
                    tracing::warn!("completion stream failed: {}", e);
                    return Err(Stop::Failed(CompletionFailure::Upstream));
                }
            };

            if let Some(delta) = chunk.first_tool_call() {
                session.transition(SessionState::DispatchingTool);
                for call in assembler.push(delta) {
                    self.dispatch(call, session).await?;
                }
            } else {
                if let Some(call) = assembler.flush() {
                    session.transition(SessionState::DispatchingTool);
                    self.dispatch(call, session).await?;
                }
                session.transition(SessionState::Passthrough);
                session.sink().send_raw(chunk.raw()).await?;
            }
        }

        if let Some(call) = assembler.flush() {
            session.transition(SessionState::DispatchingTool);
            self.dispatch(call, session).await?;
        }
        Ok(())
    }

    async fn dispatch(&self, call: ToolCall, session: &StreamSession) -> Result<(), Stop> {
        let Some(tool) = call.image_tool() else {
            tracing::warn!(name = %call.name, "skipping call to unknown tool");
            return Ok(());
        };
        let arguments = call.parse_arguments().map_err(|e| {
            tracing::warn!(%tool, "failed to parse tool arguments: {}", e);
            Stop::Failed(CompletionFailure::Arguments)
        })?;

        tracing::info!(%tool, index = call.index, "dispatching tool call");
        let sink = session.sink();
        sink.content(markup::action(tool, &call.arguments), false).await?;

        match tool {
            ImageTool::GenerateImage => {
                let request = MediaRequest::Generate {
                    prompt: &arguments.prompt,
                };
                self.call_media(tool, request, sink, "Failed to generate image").await
            }
            ImageTool::EditImage => {
                let Some(image) = session.image() else {
                    tracing::info!("edit requested without an image in the conversation");
                    sink.content(
                        markup::info("Please provide an image to edit. You can do this by uploading an image in the messages."),
                        true,
                    )
                    .await?;
                    return Ok(());
                };
                let request = MediaRequest::Edit {
                    prompt: &arguments.prompt,
                    source: &image.base64,
                };
                self.call_media(tool, request, sink, "Failed to edit image").await
            }
        }
    }

    async fn call_media(
        &self,
        tool: ImageTool,
        request: MediaRequest<'_>,
        sink: &ChunkSink,
        exhausted: &str,
    ) -> Result<(), Stop> {
        for attempt in 1..=self.policy.max_retries {
            let call = async {
                match request {
                    MediaRequest::Generate { prompt } => self.media.generate_image(prompt, sink).await,
                    MediaRequest::Edit { prompt, source } => self.media.edit_image(prompt, source, sink).await,
                }
            };
            let result = tokio::select! {
                _ = sink.closed() => return Err(Stop::Disconnected),
                result = call => result,
            };

            match result {
                Ok(()) => return Ok(()),
                Err(MediaError::Disconnected) => return Err(Stop::Disconnected),
                Err(e) => {
                    tracing::warn!(%tool, attempt, "image call failed: {}", e);
                    if attempt < self.policy.max_retries {
                        self.pause(attempt, sink).await?;
                    }
                }
            }
        }

        tracing::error!(%tool, attempts = self.policy.max_retries, "image call retries exhausted");
        sink.content(markup::error(exhausted), true).await?;
        Ok(())
    }

    async fn pause(&self, attempt: u32, sink: &ChunkSink) -> Result<(), Stop> {
        let delay = self.policy.delay(attempt);
        if delay.is_zero() {
            return Ok(());
        }
        tokio::select! {
            _ = sink.closed() => Err(Stop::Disconnected),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }
}
