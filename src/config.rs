use serde::Deserialize;
use std::path::Path;

use crate::db::ConnectionParams;
use crate::error::{Error, Result};
use crate::llm::ModelConfig;

/// Top-level TOML configuration: one `[database]` section describing the
/// target backend and one `[ai_model]` section describing the completion
/// provider.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database: ConnectionParams,
    pub ai_model: ModelConfig,
}

impl Config {
    /// Load and validate a config file. Any I/O, syntax, or semantic problem
    /// is a `Configuration` error and aborts startup.
    pub fn load(path: &Path) -> Result<Config> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("failed to read {}: {e}", path.display()))
        })?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Configuration(format!("invalid config file: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.database.validate()?;
        self.ai_model.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Engine;
    use crate::llm::Provider;

    fn parse(content: &str) -> Result<Config> {
        let config: Config = toml::from_str(content)
            .map_err(|e| Error::Configuration(format!("invalid config file: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    const VALID: &str = r#"
        [database]
        engine = "mysql"
        host = "localhost"
        port = 3306
        database = "shop"
        username = "root"
        password = "secret"

        [ai_model]
        provider = "openai"
        model_name = "gpt-4"
        api_key = "sk-test"
    "#;

    #[test]
    fn test_valid_config() {
        let config = parse(VALID).unwrap();
        assert_eq!(config.database.engine, Engine::Mysql);
        assert_eq!(config.database.port, 3306);
        assert_eq!(config.ai_model.provider, Provider::OpenAi);
        assert_eq!(config.ai_model.model_name, "gpt-4");
    }

    #[test]
    fn test_unknown_engine_rejected() {
        let content = VALID.replace("\"mysql\"", "\"sqlite\"");
        assert!(parse(&content).is_err());
    }

    #[test]
    fn test_zero_port_rejected() {
        let content = VALID.replace("port = 3306", "port = 0");
        let err = parse(&content).unwrap_err();
        assert!(err.to_string().contains("port"));
    }

    #[test]
    fn test_empty_host_rejected() {
        let content = VALID.replace("\"localhost\"", "\"\"");
        let err = parse(&content).unwrap_err();
        assert!(err.to_string().contains("host"));
    }

    #[test]
    fn test_external_provider_requires_api_key() {
        let content = VALID.replace("api_key = \"sk-test\"", "");
        let err = parse(&content).unwrap_err();
        assert!(err.to_string().contains("api_key"));
    }

    #[test]
    fn test_local_provider_requires_api_base() {
        let content = VALID
            .replace("\"openai\"", "\"ollama\"")
            .replace("api_key = \"sk-test\"", "");
        let err = parse(&content).unwrap_err();
        assert!(err.to_string().contains("api_base"));
    }

    #[test]
    fn test_local_provider_with_api_base() {
        let content = VALID
            .replace("\"openai\"", "\"ollama\"")
            .replace("api_key = \"sk-test\"", "api_base = \"http://localhost:11434/v1\"");
        let config = parse(&content).unwrap();
        assert_eq!(config.ai_model.provider, Provider::Ollama);
        assert!(config.ai_model.api_key.is_none());
    }

    #[test]
    fn test_missing_database_section_rejected() {
        let content = r#"
            [ai_model]
            provider = "openai"
            model_name = "gpt-4"
            api_key = "sk-test"
        "#;
        assert!(parse(content).is_err());
    }
}
