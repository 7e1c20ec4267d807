use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;

use crate::error::LLMError;
use crate::http::api::retry_after_from_headers;

const PROVIDER: &str = "google_gemini";

#[derive(Deserialize)]
struct ErrorBody {
    error: Option<InnerError>,
}

/// Google RPC status: `{"code": 429, "message": "...", "status": "RESOURCE_EXHAUSTED"}`.
#[derive(Deserialize)]
struct InnerError {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

impl InnerError {
    fn into_error(self, http_status: Option<u16>) -> LLMError {
        let mut message = self.message.unwrap_or_else(|| "unknown error".to_string());
        let status_hint = self.status.filter(|s| !s.is_empty());
        if let Some(status_text) = &status_hint {
            message = format!("{message} ({status_text})");
        }
        let status = http_status.or_else(|| self.code.and_then(|code| u16::try_from(code).ok()));
        LLMError::api(PROVIDER, status, status_hint.as_deref(), message)
    }
}

/// Parses error responses returned by Google Gemini.
pub(crate) fn parse_gemini_error(
    status: u16,
    body: &str,
    headers: &HashMap<String, String>,
) -> LLMError {
    // Some gateways wrap the error object in a single-element array.
    let parsed = serde_json::from_str::<ErrorBody>(body).ok().or_else(|| {
        serde_json::from_str::<Vec<ErrorBody>>(body)
            .ok()
            .and_then(|items| items.into_iter().next())
    });
    let err = match parsed {
        Some(ErrorBody { error: Some(inner) }) => inner.into_error(Some(status)),
        // Fallback: if the payload cannot be parsed, return the raw body.
        _ => LLMError::api(PROVIDER, Some(status), None, format!("status {status}: {}", body.trim())),
    };
    err.with_retry_after(retry_after_from_headers(headers))
}

/// Recognizes an `{"error": {...}}` payload sent inside the event stream; the numeric
/// `code` doubles as the status.
pub(crate) fn stream_error(payload: &Value) -> Option<LLMError> {
    let inner = payload.get("error").filter(|value| !value.is_null())?;
    match serde_json::from_value::<InnerError>(inner.clone()) {
        Ok(inner) => Some(inner.into_error(None)),
        Err(_) => Some(LLMError::api(PROVIDER, None, None, inner.to_string())),
    }
}
