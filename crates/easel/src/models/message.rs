use super::content::{ContentPart, MessageContent};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// A message to or from an LLM
pub struct Message {
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<MessageContent>,
}

impl Message {
    /// Create a new system message
    pub fn system() -> Self {
        Message {
            role: Role::System,
            content: None,
        }
    }

    /// Create a new user message
    pub fn user() -> Self {
        Message {
            role: Role::User,
            content: None,
        }
    }

    /// Create a new assistant message
    pub fn assistant() -> Self {
        Message {
            role: Role::Assistant,
            content: None,
        }
    }

    /// Set plain text content, replacing whatever was there
    pub fn with_text<S: Into<String>>(mut self, text: S) -> Self {
        self.content = Some(MessageContent::text(text));
        self
    }

    /// Append a content part, converting text content into parts if needed
    pub fn with_part(mut self, part: ContentPart) -> Self {
        let mut parts = match self.content.take() {
            None => Vec::new(),
            Some(MessageContent::Text(text)) => vec![ContentPart::text(text)],
            Some(MessageContent::Parts(parts)) => parts,
        };
        parts.push(part);
        self.content = Some(MessageContent::Parts(parts));
        self
    }

    /// Add an image_url part to the message
    pub fn with_image_url<S: Into<String>>(self, url: S) -> Self {
        self.with_part(ContentPart::image_url(url))
    }

    pub fn is_user(&self) -> bool {
        self.role == Role::User
    }
}
