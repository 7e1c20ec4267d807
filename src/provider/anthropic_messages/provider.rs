use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::LLMError;
use crate::http::{ApiClient, AuthScheme, DynHttpTransport, HttpMethod, RetryPolicy, header_value};
use crate::provider::LLMProvider;
use crate::stream::{ChatStream, Framing};
use crate::types::{ChatRequest, ChatResponse, ProviderMetadata};

use super::error::parse_anthropic_error;
use super::request::build_anthropic_body;
use super::response::map_response;
use super::stream::AnthropicStreamDecoder;

const PROVIDER: &str = "anthropic_messages";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_API_VERSION: &str = "v1";
const DEFAULT_ANTHROPIC_VERSION: &str = "2023-06-01";
const MESSAGES_PATH: &str = "messages";

/// Anthropic Messages Provider（兼容 Claude 3.x Messages API）
pub struct AnthropicMessagesProvider {
    pub(crate) api: ApiClient,
    pub(crate) default_model: Option<String>,
}

impl AnthropicMessagesProvider {
    /// 使用默认 base_url 与 anthropic-version 创建 Provider
    pub fn new(transport: DynHttpTransport, api_key: impl Into<String>) -> Self {
        let api = ApiClient::new(
            transport,
            PROVIDER,
            DEFAULT_BASE_URL,
            DEFAULT_API_VERSION,
            parse_anthropic_error,
        )
        .with_auth(AuthScheme::Header {
            name: "x-api-key".to_string(),
            value: api_key.into(),
        })
        .with_header("anthropic-version", DEFAULT_ANTHROPIC_VERSION);
        Self {
            api,
            default_model: None,
        }
    }

    /// 自定义 base_url，便于接入代理或兼容层
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.api = self.api.with_base_url(base_url);
        self
    }

    /// URL version segment, `v1` by default.
    pub fn with_api_version(mut self, version: impl Into<String>) -> Self {
        self.api = self.api.with_version(version);
        self
    }

    pub fn with_auth(mut self, auth: AuthScheme) -> Self {
        self.api = self.api.with_auth(auth);
        self
    }

    /// 自定义 Anthropic API 版本（anthropic-version）
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.api = self.api.with_header("anthropic-version", version);
        self
    }

    /// 设置 anthropic-beta 头，支持逗号分隔的 beta 列表
    pub fn with_beta(mut self, beta: impl Into<String>) -> Self {
        self.api = self.api.with_header("anthropic-beta", beta);
        self
    }

    /// 设置默认模型名称
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
        self.api.endpoint(MESSAGES_PATH)
    }

    fn resolve_model(&self, request: &ChatRequest) -> Result<String, LLMError> {
        request
            .options
            .model
            .clone()
            .or_else(|| self.default_model.clone())
            .ok_or_else(|| LLMError::Validation {
                message: "model is required for Anthropic Messages".to_string(),
            })
    }
}

#[async_trait]
impl LLMProvider for AnthropicMessagesProvider {
    async fn chat(
        &self,
        request: ChatRequest,
        cancel: CancellationToken,
    ) -> Result<ChatResponse, LLMError> {
        let model = self.resolve_model(&request)?;
        let body = build_anthropic_body(&request, &model, false)?;
        let response = self
            .api
            .send(&cancel, HttpMethod::Post, MESSAGES_PATH, Some(&body))
            .await?;
        let raw: Value = serde_json::from_slice(&response.body).map_err(|err| {
            LLMError::decode(PROVIDER, format!("failed to parse Anthropic response: {err}"))
        })?;
        map_response(raw, PROVIDER, self.endpoint())
    }

    async fn stream_chat(
        &self,
        request: ChatRequest,
        cancel: CancellationToken,
    ) -> Result<ChatStream, LLMError> {
        let model = self.resolve_model(&request)?;
        let body = build_anthropic_body(&request, &model, true)?;
        let response = self
            .api
            .send_stream(&cancel, HttpMethod::Post, MESSAGES_PATH, Some(&body))
            .await?;
        let metadata = ProviderMetadata {
            provider: PROVIDER.to_string(),
            request_id: header_value(&response.headers, "request-id"),
            endpoint: Some(self.endpoint()),
            raw: None,
        };
        Ok(ChatStream::new(
            response.body,
            Framing::TerminalEvent("message_stop"),
            Box::new(AnthropicStreamDecoder::new(PROVIDER)),
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

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::http::mock::MockTransport;
    use crate::types::Message;

    const TEXT_STREAM: &str = concat!(
        "event: message_start\n",
        "data: {\"type\":\"message_start\",\"message\":{\"id\":\"msg_1\",\"model\":\"claude\",\"content\":[],\"usage\":{\"input_tokens\":3,\"output_tokens\":1}}}\n\n",
        "event: content_block_start\n",
        "data: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"text\",\"text\":\"\"}}\n\n",
        "event: content_block_delta\n",
        "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Bonjour\"}}\n\n",
        "event: content_block_stop\n",
        "data: {\"type\":\"content_block_stop\",\"index\":0}\n\n",
        "event: message_delta\n",
        "data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"},\"usage\":{\"output_tokens\":2}}\n\n",
        "event: message_stop\n",
        "data: {\"type\":\"message_stop\"}\n\n",
    );

    #[tokio::test]
    async fn stream_chat_uses_api_key_and_version_headers() {
        let transport = Arc::new(
            MockTransport::new(200, &[TEXT_STREAM]).with_header("request-id", "req_abc"),
        );
        let provider = AnthropicMessagesProvider::new(transport.clone(), "sk-ant")
            .with_beta("tools-2024-04-04")
            .with_default_model("claude-3-5-haiku-latest");

        let response = provider
            .stream_chat(ChatRequest::new(vec![Message::user("salut")]), CancellationToken::new())
            .await
            .expect("stream")
            .collect()
            .await
            .expect("response");

        assert_eq!(response.text, "Bonjour");
        assert_eq!(response.finish_reason.as_deref(), Some("end_turn"));
        assert_eq!(response.usage.and_then(|u| u.total_tokens), Some(5));
        assert_eq!(response.provider.request_id.as_deref(), Some("req_abc"));

        let request = &transport.requests()[0];
        assert_eq!(request.url, "https://api.anthropic.com/v1/messages");
        assert_eq!(request.headers.get("x-api-key").map(String::as_str), Some("sk-ant"));
        assert_eq!(
            request.headers.get("anthropic-version").map(String::as_str),
            Some("2023-06-01")
        );
        assert_eq!(
            request.headers.get("anthropic-beta").map(String::as_str),
            Some("tools-2024-04-04")
        );
        assert_eq!(transport.last_body()["max_tokens"], 4096);
    }

    #[tokio::test]
    async fn error_status_is_classified() {
        let transport = Arc::new(MockTransport::new(
            401,
            &[r#"{"type":"error","error":{"type":"authentication_error","message":"invalid x-api-key"}}"#],
        ));
        let provider = AnthropicMessagesProvider::new(transport.clone(), "bad")
            .with_default_model("claude");
        let err = provider
            .chat(ChatRequest::new(vec![Message::user("hi")]), CancellationToken::new())
            .await
            .expect_err("auth error");
        assert_eq!(err.status(), Some(401));
        assert_eq!(transport.requests().len(), 1);
    }
}
