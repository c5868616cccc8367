use anyhow::Result;
use easel::orchestrator::{Orchestrator, RetryPolicy};
use easel::preprocess::Preprocessor;
use easel::models::message::Message;
use easel::prompt_template;
use easel::providers::configs::{ChatProviderConfig, ImageProviderConfig};
use easel::providers::images::ImageClient;
use easel::providers::openai::OpenAiChatProvider;
use easel::vision::RequestShape;
use std::sync::Arc;

use crate::configuration::Settings;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub preprocessor: Arc<Preprocessor>,
    model: String,
    vision_model: Option<String>,
}

impl AppState {
    pub fn new(
        chat: ChatProviderConfig,
        images: ImageProviderConfig,
        policy: RetryPolicy,
        system_prompt: Option<String>,
    ) -> Result<Self> {
        let model = chat.model.clone();
        let vision_model = chat.vision_model.clone();

        let provider = Arc::new(OpenAiChatProvider::new(chat)?);
        let media = Arc::new(ImageClient::new(images)?);
        let orchestrator = Orchestrator::new(provider, media, policy);

        let system_prompt = match system_prompt {
            Some(prompt) => prompt,
            None => prompt_template::system_prompt(orchestrator.tools())?,
        };

        Ok(Self {
            orchestrator: Arc::new(orchestrator),
            preprocessor: Arc::new(Preprocessor::new(system_prompt)),
            model,
            vision_model,
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Self::new(
            settings.chat_config(),
            settings.image_config(),
            settings.retry_policy(),
            settings.chat.system_prompt.clone(),
        )
    }

    /// Image parts are only forwarded when a vision model is configured to
    /// receive them; otherwise the request is served as plain text.
    pub fn shape_for(&self, messages: &[Message]) -> RequestShape {
        match RequestShape::classify(messages) {
            RequestShape::Vision if self.vision_model.is_some() => RequestShape::Vision,
            _ => RequestShape::Text,
        }
    }

    /// Model name reported on the chunks the proxy synthesizes
    pub fn model_for(&self, shape: RequestShape) -> &str {
        match (shape, &self.vision_model) {
            (RequestShape::Vision, Some(vision_model)) => vision_model,
            _ => &self.model,
        }
    }
}
