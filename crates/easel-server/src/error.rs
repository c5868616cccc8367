use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {env_var}")]
    MissingEnvVar { env_var: String },

    #[error("Configuration error: {0}")]
    Other(#[from] config::ConfigError),
}

/// Map a dotted settings path to the environment variable that sets it,
/// e.g. `chat.api_key` -> `EASEL_CHAT__API_KEY`
pub fn to_env_var(field_path: &str) -> String {
    let path = field_path
        .split('.')
        .map(|part| part.to_uppercase())
        .collect::<Vec<_>>()
        .join("__");
    format!("EASEL_{}", path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_env_var() {
        assert_eq!(to_env_var("chat.api_key"), "EASEL_CHAT__API_KEY");
        assert_eq!(to_env_var("retries.max_retries"), "EASEL_RETRIES__MAX_RETRIES");
        assert_eq!(to_env_var("port"), "EASEL_PORT");
    }
}
