use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::LLMError;
use crate::stream::{ChatStream, SseEvent};
use crate::types::{ChatRequest, ChatResponse, StreamDelta};

pub mod anthropic_messages;
pub mod google_gemini;
pub mod openai_chat;

/// 统一的 Provider Trait 所有供应商实现该接口即可接入
///
/// Each implementation owns its wire request builder, its non-streaming response
/// mapper and a [`StreamDecoder`] for its event stream. The provider is picked once,
/// when the [`crate::LLMClient`] is built.
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// 提交完整请求并等待完整响应
    async fn chat(
        &self,
        request: ChatRequest,
        cancel: CancellationToken,
    ) -> Result<ChatResponse, LLMError>;

    /// 以流式方式返回增量事件
    ///
    /// Resolves once the vendor accepted the request; errors before that point (4xx,
    /// exhausted retries, cancellation) are returned here instead of from the stream.
    async fn stream_chat(
        &self,
        request: ChatRequest,
        cancel: CancellationToken,
    ) -> Result<ChatStream, LLMError>;

    /// 供应商名称
    fn name(&self) -> &'static str;
}

/// 线程安全 Provider
pub type DynProvider = Arc<dyn LLMProvider>;

/// Turns one vendor SSE event into unified deltas.
///
/// Implementations keep whatever state the vendor's protocol needs between events
/// (open tool calls, synthesized id counters). A returned error ends the stream.
pub trait StreamDecoder: Send {
    fn decode(&mut self, event: &SseEvent) -> Result<Vec<StreamDelta>, LLMError>;
}
