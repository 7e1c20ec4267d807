use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;

use crate::error::LLMError;
use crate::http::api::retry_after_from_headers;

const PROVIDER: &str = "anthropic_messages";

#[derive(Deserialize)]
struct ErrorBody {
    error: Option<InnerError>,
}

/// `{"type": "overloaded_error", "message": "Overloaded"}`
#[derive(Deserialize)]
struct InnerError {
    #[serde(default)]
    r#type: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl InnerError {
    fn into_error(self, status: Option<u16>) -> LLMError {
        let message = self.message.unwrap_or_else(|| "unknown error".to_string());
        LLMError::api(PROVIDER, status, self.r#type.as_deref(), message)
    }
}

/// Parses error responses returned by the Anthropic Messages API.
pub(crate) fn parse_anthropic_error(
    status: u16,
    body: &str,
    headers: &HashMap<String, String>,
) -> LLMError {
    let err = match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody { error: Some(inner) }) => inner.into_error(Some(status)),
        // Fallback: if the payload cannot be parsed, surface the raw body.
        _ => LLMError::api(PROVIDER, Some(status), None, format!("status {status}: {}", body.trim())),
    };
    err.with_retry_after(retry_after_from_headers(headers))
}

/// Converts the payload of an `event: error` record.
pub(crate) fn stream_error(payload: &Value) -> LLMError {
    match payload
        .get("error")
        .cloned()
        .map(serde_json::from_value::<InnerError>)
    {
        Some(Ok(inner)) => inner.into_error(None),
        _ => LLMError::api(PROVIDER, None, None, payload.to_string()),
    }
}
