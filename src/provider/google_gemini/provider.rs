use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::LLMError;
use crate::http::{ApiClient, AuthScheme, DynHttpTransport, HttpMethod, RetryPolicy};
use crate::provider::LLMProvider;
use crate::stream::{ChatStream, Framing, SnapshotAccumulator};
use crate::types::{ChatRequest, ChatResponse, ProviderMetadata};

use super::error::parse_gemini_error;
use super::request::build_gemini_body;
use super::response::map_response;
use super::stream::GeminiStreamDecoder;

const PROVIDER: &str = "google_gemini";
const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const DEFAULT_VERSION: &str = "v1beta";

/// Google Gemini GenerateContent provider implementation.
pub struct GoogleGeminiProvider {
    pub(crate) api: ApiClient,
    pub(crate) default_model: Option<String>,
}

impl GoogleGeminiProvider {
    /// Creates a provider that targets the default Google Generative Language endpoint.
    pub fn new(transport: DynHttpTransport, api_key: impl Into<String>) -> Self {
        let api = ApiClient::new(
            transport,
            PROVIDER,
            DEFAULT_BASE_URL,
            DEFAULT_VERSION,
            parse_gemini_error,
        )
        .with_auth(AuthScheme::Header {
            name: "x-goog-api-key".to_string(),
            value: api_key.into(),
        });
        Self {
            api,
            default_model: None,
        }
    }

    /// Overrides the base URL, making it easier to point at proxies or compatibility layers.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.api = self.api.with_base_url(base_url);
        self
    }

    /// URL version segment, `v1beta` by default.
    pub fn with_api_version(mut self, version: impl Into<String>) -> Self {
        self.api = self.api.with_version(version);
        self
    }

    pub fn with_auth(mut self, auth: AuthScheme) -> Self {
        self.api = self.api.with_auth(auth);
        self
    }

    /// Sets a default model such as `gemini-2.0-flash` when the request omits one.
    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.api = self.api.with_retry_policy(retry);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.api = self.api.with_timeout(timeout);
        self
    }

    fn resolve_model(&self, request: &ChatRequest) -> Result<String, LLMError> {
        request
            .options
            .model
            .as_deref()
            .or(self.default_model.as_deref())
            .map(normalize_model)
            .ok_or_else(|| LLMError::Validation {
                message: "model is required for Google Gemini".to_string(),
            })
    }
}

/// Accepts both `gemini-2.0-flash` and `models/gemini-2.0-flash`.
fn normalize_model(model: &str) -> String {
    model.trim_start_matches("models/").to_string()
}

fn generate_path(model: &str) -> String {
    format!("models/{model}:generateContent")
}

fn stream_path(model: &str) -> String {
    format!("models/{model}:streamGenerateContent?alt=sse")
}

#[async_trait]
impl LLMProvider for GoogleGeminiProvider {
    async fn chat(
        &self,
        request: ChatRequest,
        cancel: CancellationToken,
    ) -> Result<ChatResponse, LLMError> {
        let model = self.resolve_model(&request)?;
        let body = build_gemini_body(&request)?;
        let path = generate_path(&model);
        let response = self
            .api
            .send(&cancel, HttpMethod::Post, &path, Some(&body))
            .await?;
        let raw: Value = serde_json::from_slice(&response.body).map_err(|err| {
            LLMError::decode(PROVIDER, format!("failed to parse Gemini response: {err}"))
        })?;
        let mut mapped = map_response(
            raw,
            PROVIDER,
            self.api.endpoint(&path),
            chrono::Utc::now().timestamp_millis(),
        )?;
        if mapped.model.is_none() {
            mapped.model = Some(model);
        }
        Ok(mapped)
    }

    async fn stream_chat(
        &self,
        request: ChatRequest,
        cancel: CancellationToken,
    ) -> Result<ChatStream, LLMError> {
        let model = self.resolve_model(&request)?;
        let body = build_gemini_body(&request)?;
        let path = stream_path(&model);
        let response = self
            .api
            .send_stream(&cancel, HttpMethod::Post, &path, Some(&body))
            .await?;

        // Decoder and accumulator share one timestamp so synthesized ids stay consistent.
        let started_at = chrono::Utc::now().timestamp_millis();
        let metadata = ProviderMetadata {
            provider: PROVIDER.to_string(),
            request_id: None,
            endpoint: Some(self.api.endpoint(&path)),
            raw: None,
        };
        Ok(ChatStream::with_accumulator(
            response.body,
            Framing::Close,
            Box::new(GeminiStreamDecoder::new(PROVIDER, started_at)),
            SnapshotAccumulator::with_timestamp(metadata, PROVIDER, started_at),
            PROVIDER,
            cancel,
        )
        .with_model(model))
    }

    fn name(&self) -> &'static str {
        PROVIDER
    }
}
