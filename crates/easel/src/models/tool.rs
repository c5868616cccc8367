use indoc::indoc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};

/// A tool that can be used by a model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tool {
    /// The name of the tool
    pub name: String,
    /// A description of what the tool does
    pub description: String,
    /// JSON schema of the parameters the tool accepts
    pub parameters: Value,
}

impl Tool {
    /// Create a new tool with the given name and description
    pub fn new<N, D>(name: N, description: D, parameters: Value) -> Self
    where
        N: Into<String>,
        D: Into<String>,
    {
        Tool {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// The image tools the proxy advertises and executes itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum ImageTool {
    GenerateImage,
    EditImage,
}

impl ImageTool {
    pub fn description(&self) -> &'static str {
        match self {
            ImageTool::GenerateImage => indoc! {"
                Generate a brand-new image from scratch based on the user's description.
                Expand their idea into a vivid, cinematic and imaginative prompt.
                Blend subjects, objects, moods, textures, lighting, colors, perspective and artistic style.
                Encourage creativity, surreal twists or artistic interpretations while respecting intent."},
            ImageTool::EditImage => indoc! {"
                Edits an existing image strictly based on the user's instructions.
                Use this tool only when a source image is provided."},
        }
    }

    fn prompt_description(&self) -> &'static str {
        match self {
            ImageTool::GenerateImage => indoc! {"
                A scene description full of sensory and artistic detail.
                Examples: 'a neon-lit cyberpunk street shimmering after rainfall, holographic billboards glowing',
                'a whimsical watercolor fox curled beneath a cherry blossom tree at dusk'."},
            ImageTool::EditImage => indoc! {"
                A clear description of the requested modifications.
                Keep the user's original wording and do not add extra interpretations."},
        }
    }

    /// The function definition advertised to the chat model
    pub fn tool(&self) -> Tool {
        Tool::new(
            self.as_ref(),
            self.description(),
            json!({
                "type": "object",
                "properties": {
                    "prompt": {
                        "type": "string",
                        "description": self.prompt_description(),
                    }
                },
                "required": ["prompt"]
            }),
        )
    }
}

/// Arguments shared by both image tools
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ImageToolArguments {
    pub prompt: String,
}

/// A tool call as reassembled from streamed deltas
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub index: u32,
    pub name: String,
    /// Raw JSON text exactly as the model produced it
    pub arguments: String,
}

impl ToolCall {
    pub fn new<S: Into<String>, A: Into<String>>(index: u32, name: S, arguments: A) -> Self {
        Self {
            index,
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    pub fn image_tool(&self) -> Option<ImageTool> {
        self.name.parse().ok()
    }

    pub fn parse_arguments(&self) -> Result<ImageToolArguments, serde_json::Error> {
        serde_json::from_str(&self.arguments)
    }
}
