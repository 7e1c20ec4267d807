//! 工具调用执行
//!
//! The pipeline never interprets tool calls. A [`ToolExecutor`] receives the function
//! name and the raw JSON argument string exactly as the model produced them, and its
//! string output is wrapped into a tool-role [`Message`] for the next turn.

use async_trait::async_trait;
use tracing::debug;

use crate::error::LLMError;
use crate::types::{ChatResponse, Message};

/// External tool runner.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Runs `name` with the unparsed `arguments` JSON string.
    async fn execute(&self, name: &str, arguments: &str) -> Result<String, LLMError>;
}

/// Executes every tool call of `response` in order and returns one tool-role message
/// per call, ready to be appended to the conversation.
///
/// Stops at the first executor error.
pub async fn execute_tool_calls<E>(
    executor: &E,
    response: &ChatResponse,
) -> Result<Vec<Message>, LLMError>
where
    E: ToolExecutor + ?Sized,
{
    let mut results = Vec::with_capacity(response.tool_calls.len());
    for call in &response.tool_calls {
        debug!(tool = %call.name, call_id = %call.id, "executing tool call");
        let output = executor.execute(&call.name, &call.arguments).await?;
        results.push(Message::tool_result(call.id.clone(), output));
    }
    Ok(results)
}
