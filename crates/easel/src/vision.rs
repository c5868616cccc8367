use crate::models::content::{ContentPart, MessageContent};
use crate::models::message::Message;

/// How the outgoing completion request is shaped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestShape {
    /// The current turn carries structured image parts
    Vision,
    Text,
}

impl RequestShape {
    pub fn classify(messages: &[Message]) -> Self {
        if is_vision_request(messages) {
            RequestShape::Vision
        } else {
            RequestShape::Text
        }
    }
}

/// True iff the final message has an `image_url` part with a non-blank URL.
///
/// Only the last message counts, matching how OpenAI-compatible servers
/// decide a request is multimodal.
pub fn is_vision_request(messages: &[Message]) -> bool {
    let Some(MessageContent::Parts(parts)) = messages.last().and_then(|m| m.content.as_ref())
    else {
        return false;
    };

    parts.iter().any(|part| match part {
        ContentPart::ImageUrl { image_url } => !image_url.url().trim().is_empty(),
        _ => false,
    })
}
