use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::LLMError;
use crate::http::{ApiClient, AuthScheme, DynHttpTransport, HttpMethod, RetryPolicy, header_value};
use crate::provider::LLMProvider;
use crate::stream::{ChatStream, Framing};
use crate::types::{ChatRequest, ChatResponse, ProviderMetadata};

use super::error::parse_openai_error;
use super::request::build_openai_body;
use super::response::map_response;
use super::stream::OpenAiStreamDecoder;

const PROVIDER: &str = "openai_chat";
const DEFAULT_BASE_URL: &str = "https://api.openai.com";
const DEFAULT_VERSION: &str = "v1";
const CHAT_PATH: &str = "chat/completions";

/// OpenAI Chat Completions Provider
pub struct OpenAiChatProvider {
    pub(crate) api: ApiClient,
    pub(crate) default_model: Option<String>,
}

impl OpenAiChatProvider {
    /// 创建带默认 base_url 的 Provider
    pub fn new(transport: DynHttpTransport, api_key: impl Into<String>) -> Self {
        let api = ApiClient::new(
            transport,
            PROVIDER,
            DEFAULT_BASE_URL,
            DEFAULT_VERSION,
            parse_openai_error,
        )
        .with_auth(AuthScheme::Bearer(api_key.into()));
        Self {
            api,
            default_model: None,
        }
    }

    /// 自定义 base_url
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.api = self.api.with_base_url(base_url);
        self
    }

    pub fn with_api_version(mut self, version: impl Into<String>) -> Self {
        self.api = self.api.with_version(version);
        self
    }

    /// Replaces the bearer token auth, e.g. with an `api-key` header for proxies.
    pub fn with_auth(mut self, auth: AuthScheme) -> Self {
        self.api = self.api.with_auth(auth);
        self
    }

    /// 配置组织 ID
    pub fn with_organization(mut self, organization: impl Into<String>) -> Self {
        self.api = self.api.with_header("OpenAI-Organization", organization);
        self
    }

    /// 配置项目 ID
    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.api = self.api.with_header("OpenAI-Project", project);
        self
    }

    /// 设置默认模型
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

    pub(crate) fn endpoint(&self) -> String {
        self.api.endpoint(CHAT_PATH)
    }

    fn resolve_model(&self, request: &ChatRequest) -> Result<String, LLMError> {
        request
            .options
            .model
            .clone()
            .or_else(|| self.default_model.clone())
            .ok_or_else(|| LLMError::Validation {
                message: "model is required for OpenAI Chat".to_string(),
            })
    }
}

#[async_trait]
impl LLMProvider for OpenAiChatProvider {
    async fn chat(
        &self,
        request: ChatRequest,
        cancel: CancellationToken,
    ) -> Result<ChatResponse, LLMError> {
        let model = self.resolve_model(&request)?;
        let body = build_openai_body(&request, &model, false)?;
        let response = self
            .api
            .send(&cancel, HttpMethod::Post, CHAT_PATH, Some(&body))
            .await?;
        let raw: Value = serde_json::from_slice(&response.body).map_err(|err| {
            LLMError::decode(PROVIDER, format!("failed to parse OpenAI response: {err}"))
        })?;
        let mut mapped = map_response(
            raw,
            PROVIDER,
            self.endpoint(),
            chrono::Utc::now().timestamp_millis(),
        )?;
        if mapped.provider.request_id.is_none() {
            mapped.provider.request_id = header_value(&response.headers, "x-request-id");
        }
        Ok(mapped)
    }

    async fn stream_chat(
        &self,
        request: ChatRequest,
        cancel: CancellationToken,
    ) -> Result<ChatStream, LLMError> {
        let model = self.resolve_model(&request)?;
        let body = build_openai_body(&request, &model, true)?;
        let response = self
            .api
            .send_stream(&cancel, HttpMethod::Post, CHAT_PATH, Some(&body))
            .await?;
        let metadata = ProviderMetadata {
            provider: PROVIDER.to_string(),
            request_id: header_value(&response.headers, "x-request-id"),
            endpoint: Some(self.endpoint()),
            raw: None,
        };
        Ok(ChatStream::new(
            response.body,
            Framing::DoneSentinel,
            Box::new(OpenAiStreamDecoder::new(PROVIDER)),
            metadata,
            PROVIDER,
            cancel,
        )
        .with_model(model))
    }

    fn name(&self) -> &'static str {
        PROVIDER
    }
}
