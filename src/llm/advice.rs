use serde::Serialize;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::llm::client::AdvisoryResponse;

/// The keys an advice payload must carry, all of them. Anything less is a
/// parse failure, never a partially-populated object.
pub const REQUIRED_ADVICE_KEYS: [&str; 5] = [
    "query_advice",
    "schema_advice",
    "query_optimized",
    "schema_optimized",
    "explanation",
];

/// Parsed optimization advice. `None` in a field is the model's explicit
/// JSON null, meaning "no change recommended". It is never synthesized for
/// a missing key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StructuredAdvice {
    pub query_advice: Option<String>,
    pub schema_advice: Option<String>,
    pub query_optimized: Option<String>,
    pub schema_optimized: Option<String>,
    pub explanation: Option<String>,
}

/// Extract and validate the advice object from a raw completion envelope.
/// Fails closed: a missing content field, invalid JSON, a non-object
/// payload, a missing key, or a non-string non-null value all yield
/// `Error::AdviceParse`.
pub fn parse_advice(response: &AdvisoryResponse) -> Result<StructuredAdvice> {
    let content = response
        .envelope
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            Error::AdviceParse("completion response carries no message content".into())
        })?;

    let payload: Value = serde_json::from_str(content)
        .map_err(|e| Error::AdviceParse(format!("advice is not valid JSON: {e}")))?;
    let object = payload
        .as_object()
        .ok_or_else(|| Error::AdviceParse("advice payload is not a JSON object".into()))?;

    Ok(StructuredAdvice {
        query_advice: advice_field(object, "query_advice")?,
        schema_advice: advice_field(object, "schema_advice")?,
        query_optimized: advice_field(object, "query_optimized")?,
        schema_optimized: advice_field(object, "schema_optimized")?,
        explanation: advice_field(object, "explanation")?,
    })
}

fn advice_field(
    object: &serde_json::Map<String, Value>,
    key: &str,
) -> Result<Option<String>> {
    match object.get(key) {
        Some(Value::String(text)) => Ok(Some(text.clone())),
        Some(Value::Null) => Ok(None),
        Some(other) => Err(Error::AdviceParse(format!(
            "advice key '{key}' must be a string or null, got {other}"
        ))),
        None => Err(Error::AdviceParse(format!(
            "advice payload is missing the '{key}' key"
        ))),
    }
}
