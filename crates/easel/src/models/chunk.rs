use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::tool::ImageTool;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
}

impl FinishReason {
    pub fn as_str(self) -> &'static str {
        match self {
            FinishReason::Stop => "stop",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkDelta {
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkChoice {
    pub index: u32,
    pub delta: ChunkDelta,
    pub logprobs: Option<Value>,
    pub finish_reason: Option<FinishReason>,
}

/// A chat.completion.chunk synthesized by the proxy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutgoingChunk {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChunkChoice>,
}

impl OutgoingChunk {
    /// A single-choice chunk. `terminal` sets `finish_reason: "stop"`, which
    /// ends one logical sub-message, not the whole stream.
    pub fn new<M: Into<String>, C: Into<String>>(model: M, content: C, terminal: bool) -> Self {
        let now = Utc::now();
        Self {
            id: format!("chatcmpl-{}", now.timestamp_millis()),
            object: "chat.completion.chunk".to_string(),
            created: now.timestamp(),
            model: model.into(),
            choices: vec![ChunkChoice {
                index: 0,
                delta: ChunkDelta {
                    content: content.into(),
                },
                logprobs: None,
                finish_reason: terminal.then_some(FinishReason::Stop),
            }],
        }
    }

    pub fn content(&self) -> &str {
        self.choices
            .first()
            .map(|c| c.delta.content.as_str())
            .unwrap_or_default()
    }

    /// The chunk framed as one server-sent event
    pub fn to_event(&self) -> String {
        let choices: Vec<Value> = self
            .choices
            .iter()
            .map(|choice| {
                json!({
                    "index": choice.index,
                    "delta": {"content": choice.delta.content},
                    "logprobs": choice.logprobs,
                    "finish_reason": choice.finish_reason.map(FinishReason::as_str),
                })
            })
            .collect();

        let data = json!({
            "id": self.id,
            "object": self.object,
            "created": self.created,
            "model": self.model,
            "choices": choices,
        });
        sse_event(&data.to_string())
    }

    pub fn is_terminal(&self) -> bool {
        self.choices
            .first()
            .is_some_and(|c| c.finish_reason == Some(FinishReason::Stop))
    }
}

/// Frame a JSON payload as one server-sent event
pub fn sse_event(data: &str) -> String {
    format!("data: {}\n\n", data)
}

// Inline markup understood by the chat frontends
pub mod markup {
    use super::ImageTool;

    pub fn action(tool: ImageTool, raw_arguments: &str) -> String {
        format!(
            "<action>Executing <b>{}</b></action><details><summary>Arguments: {}</summary></details>",
            tool, raw_arguments
        )
    }

    pub fn image(base64: &str) -> String {
        format!("<img src=\"data:image/png;base64,{}\">", base64)
    }

    pub fn error(message: &str) -> String {
        format!("<error>{}</error>", message)
    }

    pub fn info(message: &str) -> String {
        format!("<info>{}</info>", message)
    }
}

/// Function fragment of a streamed tool call
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct FunctionDelta {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
}

/// One entry of `choices[0].delta.tool_calls`
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ToolCallDelta {
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub function: Option<FunctionDelta>,
}

impl ToolCallDelta {
    pub fn name(&self) -> Option<&str> {
        self.function
            .as_ref()
            .and_then(|f| f.name.as_deref())
            .filter(|name| !name.is_empty())
    }

    pub fn arguments(&self) -> &str {
        self.function
            .as_ref()
            .and_then(|f| f.arguments.as_deref())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct DeltaView {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ChoiceView {
    #[serde(default)]
    delta: DeltaView,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ChunkView {
    #[serde(default)]
    choices: Vec<ChoiceView>,
}

/// A chunk read from the upstream completion stream.
///
/// The raw JSON text is kept so passthrough chunks reach the client byte for
/// byte; the typed view only exposes what the orchestrator inspects.
#[derive(Debug, Clone)]
pub struct UpstreamChunk {
    raw: String,
    view: ChunkView,
}

impl UpstreamChunk {
    pub fn parse<S: Into<String>>(raw: S) -> Result<Self, serde_json::Error> {
        let raw = raw.into();
        let view = serde_json::from_str(&raw)?;
        Ok(Self { raw, view })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// The first tool call of the first choice, the only one acted on
    pub fn first_tool_call(&self) -> Option<&ToolCallDelta> {
        self.view
            .choices
            .first()?
            .delta
            .tool_calls
            .as_ref()?
            .first()
    }

    pub fn content(&self) -> Option<&str> {
        self.view.choices.first()?.delta.content.as_deref()
    }

    pub fn finish_reason(&self) -> Option<&str> {
        self.view.choices.first()?.finish_reason.as_deref()
    }
}
