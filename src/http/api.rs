use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::LLMError;

use super::{
    DynHttpTransport, HttpMethod, HttpRequest, HttpResponse, HttpStreamResponse, collect_body,
    encode_json_body, header_value,
};

/// Turns a non-2xx status and body into the vendor's [`LLMError::Api`].
pub type ErrorParser = fn(status: u16, body: &str, headers: &HashMap<String, String>) -> LLMError;

/// Bounded retry with a fixed delay between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Attempts made after the first one.
    pub max_retries: u32,
    pub delay_ms: u64,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries,
            delay_ms: delay.as_millis() as u64,
        }
    }

    /// Single attempt.
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delay_ms: 1_000,
        }
    }
}

/// 鉴权方式 在构造时注入
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthScheme {
    /// `Authorization: Bearer <token>`
    Bearer(String),
    /// Custom API key header such as `x-api-key`.
    Header { name: String, value: String },
    None,
}

impl AuthScheme {
    fn apply(&self, headers: &mut HashMap<String, String>) {
        match self {
            AuthScheme::Bearer(token) => {
                headers.insert("Authorization".to_string(), format!("Bearer {token}"));
            }
            AuthScheme::Header { name, value } => {
                headers.insert(name.clone(), value.clone());
            }
            AuthScheme::None => {}
        }
    }
}

enum Attempt<T> {
    Done(T),
    Retry(LLMError),
    Fail(LLMError),
}

/// Vendor endpoint bound to a transport.
///
/// Joins `base_url`, the API version segment and a request path, stamps auth and static
/// headers, and runs every call through the retry loop: transport failures and statuses
/// `>= 500` are retried up to [`RetryPolicy::max_retries`] times with a fixed delay,
/// other statuses fail immediately. The caller's [`CancellationToken`] aborts both the
/// in-flight attempt and the delay between attempts.
#[derive(Clone)]
pub struct ApiClient {
    transport: DynHttpTransport,
    provider: &'static str,
    base_url: String,
    version: String,
    auth: AuthScheme,
    headers: HashMap<String, String>,
    retry: RetryPolicy,
    timeout: Option<Duration>,
    error_parser: ErrorParser,
}

impl ApiClient {
    pub fn new(
        transport: DynHttpTransport,
        provider: &'static str,
        base_url: impl Into<String>,
        version: impl Into<String>,
        error_parser: ErrorParser,
    ) -> Self {
        Self {
            transport,
            provider,
            base_url: base_url.into(),
            version: version.into(),
            auth: AuthScheme::None,
            headers: HashMap::new(),
            retry: RetryPolicy::default(),
            timeout: None,
            error_parser,
        }
    }

    pub fn with_auth(mut self, auth: AuthScheme) -> Self {
        self.auth = auth;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Static header sent with every request.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Per-attempt limit. For streaming calls it covers the wait for response headers.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Joins base url, version segment and `path`.
    ///
    /// A base url that already ends with the version segment is not extended twice.
    pub fn endpoint(&self, path: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        let version = self.version.trim_matches('/');
        let path = path.trim_start_matches('/');
        if version.is_empty() || base.ends_with(&format!("/{version}")) {
            format!("{base}/{path}")
        } else {
            format!("{base}/{version}/{path}")
        }
    }

    /// Issues a buffered request and returns the 2xx response.
    ///
    /// # Errors
    ///
    /// [`LLMError::Api`] for error statuses (after retries for 5xx),
    /// [`LLMError::Transport`] when every attempt failed on the network,
    /// [`LLMError::Cancelled`] when `cancel` fires first.
    pub async fn send(
        &self,
        cancel: &CancellationToken,
        method: HttpMethod,
        path: &str,
        body: Option<&Value>,
    ) -> Result<HttpResponse, LLMError> {
        let request = self.build_request(method, path, body, "application/json")?;
        self.run(cancel, &request.url, || {
            let request = request.clone();
            async move {
                match self.transport.send(request).await {
                    Ok(response) if response.is_success() => Attempt::Done(response),
                    Ok(response) => {
                        let text = String::from_utf8_lossy(&response.body).into_owned();
                        self.status_failure(response.status, &text, &response.headers)
                    }
                    Err(err) => Self::transport_failure(err),
                }
            }
        })
        .await
    }

    /// Issues a streaming request and returns once a 2xx response has started.
    ///
    /// The body is handed over untouched; bytes flow as the connection delivers them.
    pub async fn send_stream(
        &self,
        cancel: &CancellationToken,
        method: HttpMethod,
        path: &str,
        body: Option<&Value>,
    ) -> Result<HttpStreamResponse, LLMError> {
        let request = self.build_request(method, path, body, "text/event-stream")?;
        self.run(cancel, &request.url, || {
            let request = request.clone();
            async move {
                match self.transport.send_stream(request).await {
                    Ok(response) if (200..300).contains(&response.status) => {
                        Attempt::Done(response)
                    }
                    Ok(response) => {
                        let status = response.status;
                        let headers = response.headers;
                        let text = collect_body(response.body).await.unwrap_or_default();
                        self.status_failure(status, &text, &headers)
                    }
                    Err(err) => Self::transport_failure(err),
                }
            }
        })
        .await
    }

    fn build_request(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<&Value>,
        accept: &str,
    ) -> Result<HttpRequest, LLMError> {
        let mut request = HttpRequest::new(method, self.endpoint(path)).with_timeout(self.timeout);
        if let Some(body) = body {
            request = request.with_json_body(encode_json_body(body)?);
        }
        request
            .headers
            .insert("Accept".to_string(), accept.to_string());
        self.auth.apply(&mut request.headers);
        Ok(request.with_headers(self.headers.clone()))
    }

    fn status_failure<T>(
        &self,
        status: u16,
        body: &str,
        headers: &HashMap<String, String>,
    ) -> Attempt<T> {
        let err = (self.error_parser)(status, body, headers);
        if status >= 500 {
            Attempt::Retry(err)
        } else {
            Attempt::Fail(err)
        }
    }

    fn transport_failure<T>(err: LLMError) -> Attempt<T> {
        match err {
            LLMError::Transport { .. } => Attempt::Retry(err),
            other => Attempt::Fail(other),
        }
    }

    async fn run<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        url: &str,
        mut attempt: F,
    ) -> Result<T, LLMError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Attempt<T>>,
    {
        let max_attempts = self.retry.max_retries + 1;
        let mut number = 0;
        loop {
            number += 1;
            debug!(provider = self.provider, url, attempt = number, "sending request");

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(LLMError::cancelled("cancelled while waiting for response"));
                }
                outcome = self.limit(attempt()) => outcome,
            };
            let err = match outcome {
                Attempt::Done(value) => return Ok(value),
                Attempt::Fail(err) => return Err(err),
                Attempt::Retry(err) => err,
            };
            if number >= max_attempts {
                return Err(err);
            }

            warn!(
                provider = self.provider,
                attempt = number,
                max_attempts,
                error = %err,
                delay_ms = self.retry.delay_ms,
                "request failed, retrying"
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(LLMError::cancelled("cancelled during retry delay"));
                }
                _ = tokio::time::sleep(self.retry.delay()) => {}
            }
        }
    }

    async fn limit<T>(&self, attempt: impl Future<Output = Attempt<T>>) -> Attempt<T> {
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, attempt)
                .await
                .unwrap_or_else(|_| {
                    Attempt::Retry(LLMError::transport(format!(
                        "request timed out after {}ms",
                        limit.as_millis()
                    )))
                }),
            None => attempt.await,
        }
    }
}

/// Extracts the `Retry-After` header (in seconds) if present.
///
/// HTTP-date values are ignored because vendors primarily use the numeric form.
pub(crate) fn retry_after_from_headers(headers: &HashMap<String, String>) -> Option<Duration> {
    header_value(headers, "retry-after")
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}
