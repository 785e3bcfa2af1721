use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Completion providers. External providers authenticate with an API key
/// against a hosted endpoint; local providers are addressed purely by a
/// configured base URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAi,
    Anthropic,
    Ollama,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Anthropic => "anthropic",
            Provider::Ollama => "ollama",
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Provider::Ollama)
    }

    /// Hosted endpoints assumed to speak the OpenAI chat-completions shape
    /// with Bearer auth. Anthropic serves that shape through its
    /// OpenAI-compatible surface at the same `/v1` base; deployments using
    /// its native messages API must route through a compatible gateway via
    /// `api_base`.
    fn default_api_base(&self) -> Option<&'static str> {
        match self {
            Provider::OpenAi => Some("https://api.openai.com/v1"),
            Provider::Anthropic => Some("https://api.anthropic.com/v1"),
            Provider::Ollama => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    pub provider: Provider,
    pub model_name: String,
    pub api_key: Option<String>,
    pub api_base: Option<String>,
    pub api_version: Option<String>,
}

impl ModelConfig {
    pub fn validate(&self) -> Result<()> {
        if self.model_name.is_empty() {
            return Err(Error::Configuration(
                "model_name must be a non-empty string".into(),
            ));
        }
        if !self.provider.is_local() && self.api_key.as_deref().unwrap_or("").is_empty() {
            return Err(Error::Configuration(format!(
                "api_key must be provided for the '{}' provider",
                self.provider.as_str()
            )));
        }
        if self.provider.is_local() && self.api_base.as_deref().unwrap_or("").is_empty() {
            return Err(Error::Configuration(format!(
                "api_base must be provided for the '{}' provider",
                self.provider.as_str()
            )));
        }
        if matches!(self.api_base.as_deref(), Some("")) {
            return Err(Error::Configuration(
                "api_base must be a non-empty string when provided".into(),
            ));
        }
        if matches!(self.api_version.as_deref(), Some("")) {
            return Err(Error::Configuration(
                "api_version must be a non-empty string when provided".into(),
            ));
        }
        Ok(())
    }
}

/// Inputs to one advisory exchange. Pure values; the client owns nothing
/// beyond its credentials.
#[derive(Debug, Clone)]
pub struct AdvisoryRequest {
    pub schema: String,
    pub query: String,
    pub explain: String,
}

/// Raw provider envelope, uninterpreted beyond locating the first message's
/// content (which is the parser's job, not the client's).
#[derive(Debug, Clone)]
pub struct AdvisoryResponse {
    pub envelope: serde_json::Value,
}

const SYSTEM_PROMPT: &str = "\
You are a database administrator. You are working with a new, junior
engineer who comes to you about a query on a database that is running
slowly. They ask you for advice on how to speed it up.

The schema of the database is:

```sql
{database_schema}
```

Present your advice to the junior in JSON format, with the following keys:

query_advice: Advice on how to optimize the query.
schema_advice: Advice on how to optimize the schema, if possible, to improve performance of this query.
query_optimized: The optimized query.
schema_optimized: A DDL statement that can be used to optimize the schema, if possible, to improve performance of this query.
explanation: An explanation of why the query or schema is slow, and why the advice you gave will help.

Your response MUST be exactly in the format specified above, with no additional
content.

If no further optimizations are possible, you MUST return `null` on the
relevant keys. Make sure you are confident about the advice you are
presenting, and deeply consider all relevant factors before making your
suggestion. If you are not confident about your advice, you can return
`null` on the relevant keys with an explanation of why you are not confident.

Remember, your focus is to teach the junior along with fixing the query.
Only give advice that is relevant to the query and the EXPLAIN output.";

const USER_PROMPT: &str = "\
The following query is running slowly:

```sql
{slow_query}
```

When you run an EXPLAIN on the query, you see the following:

```sql
{explain_output}
```";

fn system_prompt(database_schema: &str) -> String {
    SYSTEM_PROMPT.replace("{database_schema}", database_schema)
}

fn user_prompt(slow_query: &str, explain_output: &str) -> String {
    USER_PROMPT
        .replace("{slow_query}", slow_query)
        .replace("{explain_output}", explain_output)
}

/// Client for the external completion endpoint. Credentials are held here
/// explicitly, handed in at construction; nothing leaks into process-wide
/// environment state.
pub struct AdvisoryClient {
    http: reqwest::Client,
    provider: Provider,
    model_name: String,
    api_key: Option<String>,
    api_base: String,
    api_version: Option<String>,
}

impl AdvisoryClient {
    pub fn new(config: &ModelConfig) -> AdvisoryClient {
        let api_base = config
            .api_base
            .clone()
            .or_else(|| config.provider.default_api_base().map(str::to_string))
            .unwrap_or_else(|| "http://localhost:11434/v1".to_string());

        AdvisoryClient {
            http: reqwest::Client::new(),
            provider: config.provider,
            model_name: config.model_name.clone(),
            api_key: config.api_key.clone(),
            api_base,
            api_version: config.api_version.clone(),
        }
    }

    /// Providers that take a bare model name get it as-is; everything else
    /// gets a provider-qualified identifier for router-style endpoints.
    pub fn model_identifier(&self) -> String {
        match self.provider {
            Provider::OpenAi | Provider::Anthropic => self.model_name.clone(),
            _ => format!("{}/{}", self.provider.as_str(), self.model_name),
        }
    }

    /// Issue one chat-completion call: system message carrying the schema
    /// and the advice format contract, user message carrying the slow query
    /// and its plan. Transport and HTTP failures are `Error::Advisory`;
    /// there is no retry.
    pub async fn optimize(&self, request: &AdvisoryRequest) -> Result<AdvisoryResponse> {
        let body = serde_json::json!({
            "model": self.model_identifier(),
            "messages": [
                {"role": "system", "content": system_prompt(&request.schema)},
                {"role": "user", "content": user_prompt(&request.query, &request.explain)},
            ],
        });

        let url = format!("{}/chat/completions", self.api_base.trim_end_matches('/'));
        tracing::debug!(model = %self.model_identifier(), %url, "requesting optimization advice");

        let mut http_request = self.http.post(&url).json(&body);
        if let Some(api_key) = &self.api_key {
            http_request = http_request.header("Authorization", format!("Bearer {api_key}"));
        }
        if let Some(api_version) = &self.api_version {
            http_request = http_request.header("x-api-version", api_version);
        }

        let response = http_request
            .send()
            .await
            .map_err(|e| Error::Advisory(format!("completion call failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(Error::Advisory(format!(
                "completion endpoint returned {status}: {}",
                detail.trim()
            )));
        }

        let envelope: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::Advisory(format!("completion response was not JSON: {e}")))?;

        Ok(AdvisoryResponse { envelope })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(provider: Provider) -> ModelConfig {
        ModelConfig {
            provider,
            model_name: "gpt-4".into(),
            api_key: Some("sk-test".into()),
            api_base: None,
            api_version: None,
        }
    }

    #[test]
    fn test_system_prompt_names_every_advice_key() {
        let prompt = system_prompt("CREATE TABLE orders (id int);");
        for key in crate::llm::REQUIRED_ADVICE_KEYS {
            assert!(prompt.contains(key), "prompt is missing {key}");
        }
        assert!(prompt.contains("CREATE TABLE orders (id int);"));
    }

    #[test]
    fn test_user_prompt_carries_query_and_plan() {
        let prompt = user_prompt(
            "SELECT * FROM orders WHERE customer_id = 5",
            "Seq Scan on orders",
        );
        assert!(prompt.contains("SELECT * FROM orders WHERE customer_id = 5"));
        assert!(prompt.contains("Seq Scan on orders"));
    }

    #[test]
    fn test_model_identifier_plain_for_hosted_providers() {
        assert_eq!(AdvisoryClient::new(&config(Provider::OpenAi)).model_identifier(), "gpt-4");
        assert_eq!(
            AdvisoryClient::new(&config(Provider::Anthropic)).model_identifier(),
            "gpt-4"
        );
    }

    #[test]
    fn test_model_identifier_qualified_for_local_providers() {
        let mut cfg = config(Provider::Ollama);
        cfg.model_name = "llama3".into();
        cfg.api_base = Some("http://localhost:11434/v1".into());
        assert_eq!(AdvisoryClient::new(&cfg).model_identifier(), "ollama/llama3");
    }

    #[test]
    fn test_api_base_falls_back_to_provider_default() {
        let client = AdvisoryClient::new(&config(Provider::OpenAi));
        assert_eq!(client.api_base, "https://api.openai.com/v1");

        // Anthropic's OpenAI-compatible surface lives under the same base.
        let client = AdvisoryClient::new(&config(Provider::Anthropic));
        assert_eq!(client.api_base, "https://api.anthropic.com/v1");
    }

    #[test]
    fn test_configured_api_base_wins() {
        let mut cfg = config(Provider::OpenAi);
        cfg.api_base = Some("https://proxy.internal/v1".into());
        let client = AdvisoryClient::new(&cfg);
        assert_eq!(client.api_base, "https://proxy.internal/v1");
    }

    #[test]
    fn test_validate_blank_api_version_rejected() {
        let mut cfg = config(Provider::OpenAi);
        cfg.api_version = Some(String::new());
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validate_empty_model_name_rejected() {
        let mut cfg = config(Provider::OpenAi);
        cfg.model_name = String::new();
        assert!(cfg.validate().is_err());
    }
}
