use std::time::Duration;

/// Upstream chat-completion endpoint and sampling parameters
#[derive(Debug, Clone)]
pub struct ChatProviderConfig {
    pub host: String,
    pub api_key: String,
    pub model: String,
    /// Used instead of `model` when the current turn carries image parts
    pub vision_model: Option<String>,
    pub temperature: f64,
    pub top_p: f64,
    pub seed: Option<i64>,
    pub top_k: Option<u32>,
    pub timeout: Duration,
}

impl ChatProviderConfig {
    pub fn new<H: Into<String>, K: Into<String>, M: Into<String>>(host: H, api_key: K, model: M) -> Self {
        Self {
            host: host.into(),
            api_key: api_key.into(),
            model: model.into(),
            vision_model: None,
            temperature: 0.6,
            top_p: 0.95,
            seed: Some(42),
            top_k: None,
            timeout: Duration::from_secs(600),
        }
    }
}

/// Upstream image generation/editing endpoint
#[derive(Debug, Clone)]
pub struct ImageProviderConfig {
    pub host: String,
    pub api_key: String,
    pub generation_model: String,
    pub editing_model: String,
    /// Edits in particular can take a long time to stream back
    pub timeout: Duration,
}

impl ImageProviderConfig {
    pub fn new<H: Into<String>, K: Into<String>>(host: H, api_key: K) -> Self {
        Self {
            host: host.into(),
            api_key: api_key.into(),
            generation_model: "flux-dev".to_string(),
            editing_model: "flux-kontext-dev".to_string(),
            timeout: Duration::from_secs(3600),
        }
    }
}
