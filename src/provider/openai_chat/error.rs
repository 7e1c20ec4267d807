use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;

use crate::error::LLMError;
use crate::http::api::retry_after_from_headers;

const PROVIDER: &str = "openai_chat";

#[derive(Deserialize)]
struct ErrorBody {
    error: Option<InnerError>,
}

#[derive(Deserialize)]
struct InnerError {
    message: Option<String>,
    r#type: Option<String>,
    code: Option<Value>,
}

impl InnerError {
    fn into_error(self, status: Option<u16>) -> LLMError {
        let code = match self.code {
            Some(Value::String(code)) => Some(code),
            Some(Value::Number(code)) => Some(code.to_string()),
            _ => None,
        };
        let mut message = self.message.unwrap_or_else(|| "unknown error".to_string());
        if let Some(code) = &code {
            message = format!("{message} ({code})");
        }
        LLMError::api(PROVIDER, status, code.or(self.r#type).as_deref(), message)
    }
}

/// Maps a non-2xx OpenAI response to [`LLMError::Api`].
pub(crate) fn parse_openai_error(
    status: u16,
    body: &str,
    headers: &HashMap<String, String>,
) -> LLMError {
    let err = match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody { error: Some(inner) }) => inner.into_error(Some(status)),
        _ if body.trim().is_empty() => LLMError::api(PROVIDER, Some(status), None, format!("status {status}")),
        _ => LLMError::api(PROVIDER, Some(status), None, body.trim()),
    };
    err.with_retry_after(retry_after_from_headers(headers))
}

/// Recognizes an `{"error": {...}}` payload sent inside the event stream.
pub(crate) fn stream_error(payload: &Value) -> Option<LLMError> {
    let inner = payload.get("error").filter(|value| !value.is_null())?;
    let status = inner
        .get("code")
        .and_then(Value::as_u64)
        .and_then(|code| u16::try_from(code).ok());
    match serde_json::from_value::<InnerError>(inner.clone()) {
        Ok(inner) => Some(inner.into_error(status)),
        Err(_) => Some(LLMError::api(PROVIDER, status, None, inner.to_string())),
    }
}
