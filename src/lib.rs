//! LLM 多后端统一流式调用库
//!
//! One request model and one streaming protocol over OpenAI Chat Completions, Anthropic
//! Messages and Google Gemini. A [`LLMClient`] routes by handle to an [`LLMProvider`];
//! streaming calls return a [`ChatStream`] whose chunks carry both the increment and an
//! immutable snapshot of the response so far.

pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod provider;
pub mod stream;
pub mod tool;
pub mod types;

pub use client::LLMClient;
pub use config::{Credential, ModelConfig, ProviderKind, build_client_from_configs};
pub use error::{ApiErrorKind, LLMError};
pub use provider::anthropic_messages::AnthropicMessagesProvider;
pub use provider::google_gemini::GoogleGeminiProvider;
pub use provider::openai_chat::OpenAiChatProvider;
pub use provider::{DynProvider, LLMProvider};
pub use stream::{ChatStream, StreamState};
pub use tool::{ToolExecutor, execute_tool_calls};
pub use types::*;
