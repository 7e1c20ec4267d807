use std::time::Duration;

use thiserror::Error;

/// Aggregates every failure mode exposed by the streaming pipeline.
///
/// The four runtime categories are kept apart so callers can branch on them:
/// [`LLMError::Transport`] (network, timeouts), [`LLMError::Api`] (the vendor answered
/// with an error), [`LLMError::Decode`] (the vendor answered with something unreadable)
/// and [`LLMError::Cancelled`] (the caller gave up). The remaining variants describe
/// problems detected before any request is issued.
#[derive(Debug, Error)]
pub enum LLMError {
    /// Network failure or per-attempt timeout. Retried by the transport before surfacing.
    #[error("transport error: {message}")]
    Transport { message: String },
    /// Error reported by the vendor, either as an HTTP status or embedded mid-stream.
    #[error("{provider} api error{}: {message}", format_status(.status))]
    Api {
        /// Name of the provider, such as `openai_chat`.
        provider: &'static str,
        /// HTTP status, or the numeric code found in a mid-stream error payload.
        status: Option<u16>,
        /// Coarse classification of the failure.
        kind: ApiErrorKind,
        /// Vendor message, or the raw body when it was not JSON.
        message: String,
    },
    /// A stream payload or response body could not be decoded.
    #[error("{provider} decode error: {message}")]
    Decode {
        provider: &'static str,
        message: String,
    },
    /// The caller's cancellation token fired.
    #[error("request cancelled: {message}")]
    Cancelled { message: String },
    /// Signals validation failures in the request payload.
    #[error("invalid request: {message}")]
    Validation { message: String },
    /// Declares that a capability is not supported by the selected provider.
    #[error("feature unsupported: {feature}")]
    UnsupportedFeature { feature: &'static str },
    /// Raised when building or validating configuration fails.
    #[error("invalid configuration for {field}: {reason}")]
    InvalidConfig {
        /// Name of the configuration field that failed validation.
        field: String,
        /// Additional context explaining why the field is invalid.
        reason: String,
    },
}

/// Classification attached to [`LLMError::Api`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiErrorKind {
    /// Invalid or missing credentials.
    Auth,
    /// The provider throttled the request.
    RateLimit {
        /// Wait duration suggested through `Retry-After`, if any.
        retry_after: Option<Duration>,
    },
    /// The request was rejected as malformed.
    InvalidRequest,
    /// The model or deployment could not be resolved.
    NotFound {
        /// Model identifier extracted from the message when available.
        model: Option<String>,
    },
    /// The prompt or completion exceeds the context window.
    TokenLimitExceeded,
    /// The provider reported temporary overload.
    Overloaded,
    /// Any other 5xx failure.
    Server,
    Other,
}

impl ApiErrorKind {
    /// Derives a classification from the status code and vendor hints.
    ///
    /// `code_hint` is the vendor's machine readable error code (`type` for Anthropic,
    /// `code` for OpenAI, `status` for Gemini).
    pub fn classify(status: Option<u16>, code_hint: Option<&str>, message: &str) -> Self {
        if looks_like_token_limit_error(code_hint, message) {
            return Self::TokenLimitExceeded;
        }
        let code = code_hint.map(str::to_ascii_lowercase);
        match (status, code.as_deref()) {
            (Some(401 | 403), _)
            | (_, Some("authentication_error" | "permission_error" | "unauthenticated"))
            | (_, Some("permission_denied" | "invalid_api_key")) => Self::Auth,
            (Some(429), _) | (_, Some("rate_limit_error" | "resource_exhausted")) => {
                Self::RateLimit { retry_after: None }
            }
            (Some(404), _) | (_, Some("not_found_error" | "not_found" | "model_not_found")) => {
                Self::NotFound {
                    model: extract_model_identifier(message),
                }
            }
            (Some(529), _) | (_, Some("overloaded_error" | "unavailable")) => Self::Overloaded,
            (Some(400 | 422), _) | (_, Some("invalid_request_error" | "invalid_argument")) => {
                Self::InvalidRequest
            }
            (Some(status), _) if status >= 500 => Self::Server,
            _ => Self::Other,
        }
    }
}

impl LLMError {
    /// Creates an [`LLMError::Transport`] from a textual description.
    ///
    /// The helper keeps call sites concise and guarantees consistent formatting of
    /// transport failures across the crate.
    ///
    /// # Examples
    ///
    /// ```
    /// use nagare_llm::error::LLMError;
    ///
    /// let err = LLMError::transport("dns lookup failed");
    /// assert!(matches!(err, LLMError::Transport { .. }));
    /// ```
    pub fn transport<T: Into<String>>(message: T) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Creates an [`LLMError::Decode`] for the given provider.
    ///
    /// # Examples
    ///
    /// ```
    /// use nagare_llm::error::LLMError;
    ///
    /// let err = LLMError::decode("openai_chat", "expected value at line 1 column 1");
    /// assert!(matches!(err, LLMError::Decode { provider: "openai_chat", .. }));
    /// ```
    pub fn decode<T: Into<String>>(provider: &'static str, message: T) -> Self {
        Self::Decode {
            provider,
            message: message.into(),
        }
    }

    pub fn cancelled<T: Into<String>>(message: T) -> Self {
        Self::Cancelled {
            message: message.into(),
        }
    }

    /// Builds an [`LLMError::Api`] and classifies it.
    pub fn api(
        provider: &'static str,
        status: Option<u16>,
        code_hint: Option<&str>,
        message: impl Into<String>,
    ) -> Self {
        let message = message.into();
        Self::Api {
            provider,
            status,
            kind: ApiErrorKind::classify(status, code_hint, &message),
            message,
        }
    }

    /// Attaches a `Retry-After` hint to rate-limit errors; other errors are unchanged.
    pub fn with_retry_after(mut self, hint: Option<Duration>) -> Self {
        if let Self::Api {
            kind: ApiErrorKind::RateLimit { retry_after },
            ..
        } = &mut self
        {
            *retry_after = hint;
        }
        self
    }

    /// Returns `true` when the caller's cancellation caused the failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// HTTP status carried by [`LLMError::Api`], if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => *status,
            _ => None,
        }
    }
}

fn format_status(status: &Option<u16>) -> String {
    status.map(|code| format!(" (status {code})")).unwrap_or_default()
}

/// Returns `true` when an error code or message suggests a context/window overflow.
pub(crate) fn looks_like_token_limit_error(code_hint: Option<&str>, message: &str) -> bool {
    if let Some(code) = code_hint {
        let lower = code.to_ascii_lowercase();
        if matches!(
            lower.as_str(),
            "context_length_exceeded"
                | "max_context_length_exceeded"
                | "prompt_tokens_exceeded"
                | "context_window_exceeded"
        ) {
            return true;
        }
    }

    let lower_message = message.to_ascii_lowercase();
    const HINTS: [&str; 6] = [
        "context length",
        "context window",
        "token limit",
        "maximum output tokens",
        "max output tokens",
        "prompt is too long",
    ];
    HINTS.iter().any(|needle| lower_message.contains(needle))
}

/// Attempts to extract a model identifier from an error payload.
pub(crate) fn extract_model_identifier(message: &str) -> Option<String> {
    ['`', '"', '\'']
        .into_iter()
        .filter_map(|delimiter| between_delimiters(message, delimiter))
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
}

fn between_delimiters(message: &str, delimiter: char) -> Option<&str> {
    let start = message.find(delimiter)? + delimiter.len_utf8();
    let rest = message.get(start..)?;
    let end = rest.find(delimiter)?;
    Some(&rest[..end])
}
