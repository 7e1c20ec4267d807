use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Speaker of a [`Message`]. The system prompt lives on [`ChatRequest::system`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

/// Message body: plain text or an ordered list of multimodal parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// Concatenates the textual parts, ignoring images.
    pub fn text(&self) -> String {
        match self {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join(""),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            MessageContent::Text(text) => text.is_empty(),
            MessageContent::Parts(parts) => parts.is_empty(),
        }
    }

    /// Views the content as parts; plain text becomes a single text part.
    pub fn parts(&self) -> Vec<ContentPart> {
        match self {
            MessageContent::Text(text) if text.is_empty() => Vec::new(),
            MessageContent::Text(text) => vec![ContentPart::Text { text: text.clone() }],
            MessageContent::Parts(parts) => parts.clone(),
        }
    }
}

impl Default for MessageContent {
    fn default() -> Self {
        MessageContent::Text(String::new())
    }
}

impl From<&str> for MessageContent {
    fn from(value: &str) -> Self {
        MessageContent::Text(value.to_string())
    }
}

impl From<String> for MessageContent {
    fn from(value: String) -> Self {
        MessageContent::Text(value)
    }
}

/// Opaque multimodal unit forwarded to the vendor adapters untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text {
        text: String,
    },
    ImageUrl {
        url: String,
    },
    ImageBase64 {
        /// Base64 payload without the `data:` prefix.
        data: String,
        mime_type: String,
    },
}

/// 单条对话消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default)]
    pub content: MessageContent,
    /// Tool calls requested by an assistant turn.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// For tool messages, the [`ToolCall::id`] this result answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn user(content: impl Into<MessageContent>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn assistant(content: impl Into<MessageContent>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// Assistant turn that requested tool use, e.g. replayed from a previous response.
    pub fn assistant_with_tool_calls(
        content: impl Into<MessageContent>,
        tool_calls: Vec<ToolCall>,
    ) -> Self {
        Self {
            tool_calls,
            ..Self::assistant(content)
        }
    }

    /// Tool-role message carrying an executor's result for `call_id`.
    pub fn tool_result(call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: MessageContent::Text(output.into()),
            tool_calls: Vec::new(),
            tool_call_id: Some(call_id.into()),
        }
    }
}

/// Locates the call a tool message answers.
///
/// Walks back over the tool messages directly preceding `index` to the nearest
/// assistant turn and scans its tool calls linearly for a matching id. Returns `None`
/// when the message is not a tool result or nothing matches.
pub fn find_originating_call(messages: &[Message], index: usize) -> Option<&ToolCall> {
    let call_id = messages.get(index)?.tool_call_id.as_deref()?;
    let assistant = messages[..index]
        .iter()
        .rev()
        .find(|message| message.role != Role::Tool)?;
    if assistant.role != Role::Assistant {
        return None;
    }
    assistant.tool_calls.iter().find(|call| call.id == call_id)
}

/// 工具定义
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON schema of the arguments object.
    pub parameters: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolChoice {
    Auto,
    /// The model must call at least one tool.
    Any,
    None,
    Tool { name: String },
}

/// Tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Vendor id, or one synthesized with [`synthesize_tool_call_id`]. Unique within
    /// one response only.
    pub id: String,
    /// Function name.
    pub name: String,
    /// JSON encoded arguments object, kept as the raw string.
    pub arguments: String,
}

impl ToolCall {
    /// Parses [`ToolCall::arguments`].
    pub fn parsed_arguments(&self) -> Result<Value, serde_json::Error> {
        serde_json::from_str(&self.arguments)
    }
}

/// Builds an id for vendors that do not supply one.
///
/// Unique within the response identified by `timestamp_millis`; not stable across
/// responses.
pub fn synthesize_tool_call_id(timestamp_millis: i64, index: usize) -> String {
    format!("call_{timestamp_millis}_{index}")
}

/// 采样参数
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatOptions {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub max_output_tokens: Option<u32>,
    /// Extra top-level body fields forwarded verbatim.
    #[serde(default)]
    pub extra: HashMap<String, Value>,
}

/// Unified chat request, read-only to the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    #[serde(default)]
    pub system: Option<String>,
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
    #[serde(default)]
    pub tool_choice: Option<ToolChoice>,
    #[serde(default)]
    pub options: ChatOptions,
}

impl ChatRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.options.model = Some(model.into());
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }
}

/// Token 用量
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
}

impl TokenUsage {
    /// Overwrites the counters present in `other`.
    pub fn merge(&mut self, other: &TokenUsage) {
        if other.prompt_tokens.is_some() {
            self.prompt_tokens = other.prompt_tokens;
        }
        if other.completion_tokens.is_some() {
            self.completion_tokens = other.completion_tokens;
        }
        if other.total_tokens.is_some() {
            self.total_tokens = other.total_tokens;
        }
    }
}

/// Provider 元信息
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderMetadata {
    pub provider: String,
    pub request_id: Option<String>,
    pub endpoint: Option<String>,
    /// Raw vendor body, only populated for non-streaming responses.
    pub raw: Option<Value>,
}

/// Aggregated result of a turn. Doubles as the streaming snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    /// Concatenated text, append-only while streaming.
    pub text: String,
    /// Requested tool calls in arrival order.
    pub tool_calls: Vec<ToolCall>,
    /// Vendor terminal reason passed through verbatim (`stop`, `end_turn`, `STOP`, ...).
    pub finish_reason: Option<String>,
    pub usage: Option<TokenUsage>,
    pub model: Option<String>,
    pub provider: ProviderMetadata,
}

/// Vendor-neutral increment produced by a stream decoder.
///
/// Tool-call fragments are addressed by `key`, the vendor's own index for the call.
/// Keys only need to be stable within one response; the accumulator assigns positions
/// by arrival order of starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamDelta {
    Text(String),
    ToolCallStart {
        key: usize,
        id: Option<String>,
        name: String,
    },
    ToolCallArguments {
        key: usize,
        fragment: String,
    },
    /// The arguments of `key` are complete.
    ToolCallEnd { key: usize },
    /// Whole tool call delivered at once.
    ToolCall { id: String, name: String, arguments: String },
    Usage(TokenUsage),
    Finish { reason: String },
}

/// One item yielded by [`crate::stream::ChatStream`].
#[derive(Debug, Clone)]
pub struct StreamChunk {
    /// Text appended since the previous chunk, possibly empty.
    pub text_delta: String,
    /// The delta this chunk was produced from.
    pub delta: StreamDelta,
    /// Response as of this chunk. Never mutated after the chunk is handed out.
    pub snapshot: Arc<ChatResponse>,
    /// Set only on the terminal chunk.
    pub finish_reason: Option<String>,
}
