use std::collections::HashMap;

use tokio_util::sync::CancellationToken;

use crate::error::LLMError;
use crate::provider::DynProvider;
use crate::stream::ChatStream;
use crate::types::{ChatRequest, ChatResponse};

/// LLM 调用入口 负责维护已注册的 Provider
///
/// Each handle is bound to one provider when the client is built; requests are routed
/// by handle and never re-dispatched per call.
pub struct LLMClient {
    providers: HashMap<String, DynProvider>,
}

impl LLMClient {
    /// 创建 Builder 便于后续注册 Provider
    pub fn builder() -> LLMClientBuilder {
        LLMClientBuilder {
            providers: HashMap::new(),
        }
    }

    /// 发送非流式聊天请求
    pub async fn chat(&self, handle: &str, request: ChatRequest) -> Result<ChatResponse, LLMError> {
        self.chat_with_cancel(handle, request, CancellationToken::new())
            .await
    }

    /// 发送非流式聊天请求，`cancel` 触发时中止重试与等待
    pub async fn chat_with_cancel(
        &self,
        handle: &str,
        request: ChatRequest,
        cancel: CancellationToken,
    ) -> Result<ChatResponse, LLMError> {
        let provider = self.get_provider(handle)?;
        provider.chat(request, cancel).await
    }

    /// 发起流式聊天请求
    pub async fn stream(&self, handle: &str, request: ChatRequest) -> Result<ChatStream, LLMError> {
        self.stream_with_cancel(handle, request, CancellationToken::new())
            .await
    }

    /// 发起流式聊天请求
    ///
    /// The token stays attached to the returned stream: cancelling it later stops
    /// reading and releases the connection.
    pub async fn stream_with_cancel(
        &self,
        handle: &str,
        request: ChatRequest,
        cancel: CancellationToken,
    ) -> Result<ChatStream, LLMError> {
        let provider = self.get_provider(handle)?;
        provider.stream_chat(request, cancel).await
    }

    /// 返回当前已注册的句柄
    pub fn handles(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }

    fn get_provider(&self, handle: &str) -> Result<DynProvider, LLMError> {
        self.providers
            .get(handle)
            .cloned()
            .ok_or_else(|| LLMError::Validation {
                message: format!("unknown model handle: {handle}"),
            })
    }
}

/// 负责注册 Provider 的 Builder
pub struct LLMClientBuilder {
    providers: HashMap<String, DynProvider>,
}

impl LLMClientBuilder {
    /// 注册一个句柄对应的 Provider
    pub fn register_handle<S: Into<String>>(mut self, handle: S, provider: DynProvider) -> Self {
        self.providers.insert(handle.into(), provider);
        self
    }

    /// 构建最终的 LLMClient
    pub fn build(self) -> LLMClient {
        LLMClient {
            providers: self.providers,
        }
    }
}
