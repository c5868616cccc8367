use crate::codec;
use crate::models::content::{ContentPart, MessageContent};
use crate::models::message::{Message, Role};
use crate::vision::RequestShape;

pub const EDIT_ANNOTATION: &str =
    "\n\nAn image is provided at `image.png` and available for editing";

/// The most recent image payload found in the conversation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedImage {
    pub base64: String,
}

/// Messages ready for the upstream call, plus the image available to `edit_image`
#[derive(Debug, Clone)]
pub struct PreparedConversation {
    pub messages: Vec<Message>,
    pub image: Option<ExtractedImage>,
}

/// Builds the outgoing message list for one request
#[derive(Debug, Clone)]
pub struct Preprocessor {
    system_prompt: String,
}

impl Preprocessor {
    pub fn new<S: Into<String>>(system_prompt: S) -> Self {
        Self {
            system_prompt: system_prompt.into(),
        }
    }

    pub fn prepare(&self, messages: Vec<Message>, shape: RequestShape) -> PreparedConversation {
        let mut messages: Vec<Message> = std::iter::once(Message::system().with_text(&self.system_prompt))
            .chain(messages)
            .collect();

        let image = find_latest_image(&messages);
        if let Some(image) = &image {
            tracing::debug!(len = image.base64.len(), "found image in conversation history");
        }

        let last = messages.len() - 1;
        for (index, message) in messages.iter_mut().enumerate() {
            if message.role == Role::System {
                continue;
            }
            let keep_parts = shape == RequestShape::Vision && index == last;
            message.content = message
                .content
                .take()
                .map(|content| strip_images(content, keep_parts));
        }

        if image.is_some() {
            annotate_last_user_message(&mut messages);
        }

        PreparedConversation { messages, image }
    }
}

/// Scan newest to oldest and stop at the first message holding an image
pub fn find_latest_image(messages: &[Message]) -> Option<ExtractedImage> {
    messages
        .iter()
        .rev()
        .filter_map(|message| message.content.as_ref())
        .find_map(|content| match content {
            MessageContent::Text(text) => codec::extract(text),
            MessageContent::Parts(parts) => codec::extract_from_parts(parts),
        })
        .map(|base64| ExtractedImage { base64 })
}

fn strip_images(content: MessageContent, keep_parts: bool) -> MessageContent {
    match content {
        MessageContent::Text(text) => MessageContent::Text(codec::redact(&text)),
        MessageContent::Parts(parts) if keep_parts => MessageContent::Parts(
            parts
                .into_iter()
                .filter_map(|part| match part {
                    ContentPart::Text { text } => Some(ContentPart::text(codec::redact(&text))),
                    ContentPart::ImageUrl { .. } => Some(part),
                    ContentPart::Unsupported => None,
                })
                .collect(),
        ),
        MessageContent::Parts(parts) => {
            let flattened = parts
                .iter()
                .filter_map(ContentPart::as_text)
                .filter(|text| !text.trim().is_empty())
                .collect::<Vec<_>>()
                .join(" ");
            MessageContent::Text(codec::redact(&flattened))
        }
    }
}

fn annotate_last_user_message(messages: &mut [Message]) {
    let Some(message) = messages.iter_mut().rev().find(|m| m.is_user()) else {
        return;
    };

    message.content = Some(match message.content.take() {
        None => MessageContent::text(EDIT_ANNOTATION),
        Some(MessageContent::Text(text)) => MessageContent::Text(text + EDIT_ANNOTATION),
        Some(MessageContent::Parts(mut parts)) => {
            parts.push(ContentPart::text(EDIT_ANNOTATION));
            MessageContent::Parts(parts)
        }
    });
}
