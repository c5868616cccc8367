use crate::error::{to_env_var, ConfigError};
use config::{Config, Environment};
use easel::orchestrator::RetryPolicy;
use easel::providers::configs::{ChatProviderConfig, ImageProviderConfig};
use serde::Deserialize;
use std::net::{AddrParseError, SocketAddr};
use std::time::Duration;

#[derive(Debug, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl ServerSettings {
    pub fn socket_addr(&self) -> Result<SocketAddr, AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }
}

#[derive(Debug, Deserialize)]
pub struct ChatSettings {
    pub host: String,
    #[serde(default)]
    pub api_key: String,
    pub model: String,
    #[serde(default)]
    pub vision_model: Option<String>,
    pub temperature: f64,
    pub top_p: f64,
    #[serde(default)]
    pub seed: Option<i64>,
    #[serde(default)]
    pub top_k: Option<u32>,
    pub timeout_secs: u64,
    /// Replaces the rendered tool prompt entirely
    #[serde(default)]
    pub system_prompt: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ImageSettings {
    pub host: String,
    /// Falls back to the chat key
    #[serde(default)]
    pub api_key: Option<String>,
    pub generation_model: String,
    pub editing_model: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub backoff_ms: u64,
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub server: ServerSettings,
    pub chat: ChatSettings,
    pub images: ImageSettings,
    pub retries: RetrySettings,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        Self::load_and_validate()
    }

    fn load_and_validate() -> Result<Self, ConfigError> {
        let config = Config::builder()
            // Server defaults
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 3000)?
            // Chat upstream defaults
            .set_default("chat.host", "http://localhost:65534")?
            .set_default("chat.model", "dphn/Dolphin3.0-Llama3.1-8B")?
            .set_default("chat.temperature", 0.6)?
            .set_default("chat.top_p", 0.95)?
            .set_default("chat.seed", 42)?
            .set_default("chat.timeout_secs", 600)?
            // Image upstream defaults
            .set_default("images.host", "http://localhost:65534")?
            .set_default("images.generation_model", "flux-dev")?
            .set_default("images.editing_model", "flux-kontext-dev")?
            .set_default("images.timeout_secs", 3600)?
            .set_default("retries.max_retries", 3)?
            .set_default("retries.backoff_ms", 0)?
            // Layer on the environment variables
            .add_source(
                Environment::with_prefix("EASEL")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Self = match config.try_deserialize() {
            Ok(settings) => settings,
            Err(err) => {
                tracing::debug!("Configuration error: {:?}", &err);

                let error_str = err.to_string();
                return if error_str.starts_with("missing field") {
                    // "missing field `model`"
                    let field = error_str
                        .trim_start_matches("missing field `")
                        .split('`')
                        .next()
                        .unwrap_or_default();
                    Err(ConfigError::MissingEnvVar {
                        env_var: to_env_var(field),
                    })
                } else if let config::ConfigError::NotFound(field) = &err {
                    Err(ConfigError::MissingEnvVar {
                        env_var: to_env_var(field),
                    })
                } else {
                    Err(ConfigError::Other(err))
                };
            }
        };

        if settings.chat.api_key.trim().is_empty() {
            return Err(ConfigError::MissingEnvVar {
                env_var: to_env_var("chat.api_key"),
            });
        }

        Ok(settings)
    }

    pub fn chat_config(&self) -> ChatProviderConfig {
        let chat = &self.chat;
        ChatProviderConfig {
            host: chat.host.clone(),
            api_key: chat.api_key.clone(),
            model: chat.model.clone(),
            vision_model: chat.vision_model.clone().filter(|m| !m.trim().is_empty()),
            temperature: chat.temperature,
            top_p: chat.top_p,
            seed: chat.seed,
            top_k: chat.top_k,
            timeout: Duration::from_secs(chat.timeout_secs),
        }
    }

    pub fn image_config(&self) -> ImageProviderConfig {
        let images = &self.images;
        let api_key = images
            .api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .unwrap_or_else(|| self.chat.api_key.clone());

        ImageProviderConfig {
            host: images.host.clone(),
            api_key,
            generation_model: images.generation_model.clone(),
            editing_model: images.editing_model.clone(),
            timeout: Duration::from_secs(images.timeout_secs),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retries.max_retries,
            Duration::from_millis(self.retries.backoff_ms),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    fn clean_env() {
        for (key, _) in env::vars() {
            if key.starts_with("EASEL_") {
                env::remove_var(&key);
            }
        }
    }

    #[test]
    #[serial]
    fn test_default_settings() {
        clean_env();
        env::set_var("EASEL_CHAT__API_KEY", "test-key");

        let settings = Settings::new().unwrap();
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 3000);

        let chat = settings.chat_config();
        assert_eq!(chat.host, "http://localhost:65534");
        assert_eq!(chat.api_key, "test-key");
        assert_eq!(chat.model, "dphn/Dolphin3.0-Llama3.1-8B");
        assert_eq!(chat.vision_model, None);
        assert_eq!(chat.temperature, 0.6);
        assert_eq!(chat.top_p, 0.95);
        assert_eq!(chat.seed, Some(42));
        assert_eq!(chat.top_k, None);
        assert_eq!(chat.timeout, Duration::from_secs(600));
        assert!(settings.chat.system_prompt.is_none());

        let images = settings.image_config();
        assert_eq!(images.api_key, "test-key");
        assert_eq!(images.generation_model, "flux-dev");
        assert_eq!(images.editing_model, "flux-kontext-dev");
        assert_eq!(images.timeout, Duration::from_secs(3600));

        assert_eq!(settings.retry_policy(), RetryPolicy::default());

        env::remove_var("EASEL_CHAT__API_KEY");
    }

    #[test]
    #[serial]
    fn test_missing_api_key() {
        clean_env();

        match Settings::new() {
            Err(ConfigError::MissingEnvVar { env_var }) => {
                assert_eq!(env_var, "EASEL_CHAT__API_KEY")
            }
            other => panic!("expected a missing variable error, got {:?}", other),
        }
    }

    #[test]
    #[serial]
    fn test_environment_override() {
        clean_env();
        env::set_var("EASEL_SERVER__PORT", "8080");
        env::set_var("EASEL_CHAT__API_KEY", "chat-key");
        env::set_var("EASEL_CHAT__HOST", "http://llm.internal:8000");
        env::set_var("EASEL_CHAT__VISION_MODEL", "qwen-vl");
        env::set_var("EASEL_CHAT__TOP_K", "40");
        env::set_var("EASEL_CHAT__TEMPERATURE", "0.2");
        env::set_var("EASEL_IMAGES__API_KEY", "image-key");
        env::set_var("EASEL_IMAGES__HOST", "http://images.internal:9000");
        env::set_var("EASEL_RETRIES__MAX_RETRIES", "5");
        env::set_var("EASEL_RETRIES__BACKOFF_MS", "250");

        let settings = Settings::new().unwrap();
        assert_eq!(settings.server.port, 8080);

        let chat = settings.chat_config();
        assert_eq!(chat.host, "http://llm.internal:8000");
        assert_eq!(chat.vision_model.as_deref(), Some("qwen-vl"));
        assert_eq!(chat.top_k, Some(40));
        assert_eq!(chat.temperature, 0.2);

        let images = settings.image_config();
        assert_eq!(images.host, "http://images.internal:9000");
        assert_eq!(images.api_key, "image-key");

        assert_eq!(
            settings.retry_policy(),
            RetryPolicy::new(5, Duration::from_millis(250))
        );

        clean_env();
    }

    #[test]
    fn test_socket_addr_conversion() {
        let server_settings = ServerSettings {
            host: "127.0.0.1".to_string(),
            port: 3000,
        };
        let addr = server_settings.socket_addr().unwrap();
        assert_eq!(addr.to_string(), "127.0.0.1:3000");

        let bad = ServerSettings {
            host: "not a host".to_string(),
            port: 1,
        };
        assert!(bad.socket_addr().is_err());
    }
}
