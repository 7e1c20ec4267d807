use serde_json::{Map, Value, json};

use crate::error::LLMError;
use crate::types::{
    ChatRequest, ContentPart, Message, MessageContent, Role, ToolChoice, ToolDefinition,
};

/// Used when the request leaves `max_output_tokens` unset; the API requires the field.
pub(crate) const DEFAULT_MAX_TOKENS: u32 = 4096;

/// 构建 Anthropic Messages 请求体
pub(crate) fn build_anthropic_body(
    request: &ChatRequest,
    model: &str,
    stream: bool,
) -> Result<Value, LLMError> {
    let mut body = Map::new();
    body.insert("model".to_string(), Value::String(model.to_string()));

    // 1. messages，连续的 tool 结果合并为一条 user 消息
    let messages = convert_messages(&request.messages)?;
    if messages.is_empty() {
        return Err(LLMError::Validation {
            message: "Anthropic Messages request requires at least one user/assistant message"
                .to_string(),
        });
    }
    body.insert("messages".to_string(), Value::Array(messages));
    if let Some(system) = &request.system {
        body.insert("system".to_string(), Value::String(system.clone()));
    }

    // 2. 采样与生成控制参数
    let max_tokens = request.options.max_output_tokens.unwrap_or(DEFAULT_MAX_TOKENS);
    body.insert("max_tokens".to_string(), Value::from(max_tokens));
    if let Some(temperature) = request.options.temperature {
        body.insert("temperature".to_string(), Value::from(temperature));
    }
    if let Some(top_p) = request.options.top_p {
        body.insert("top_p".to_string(), Value::from(top_p));
    }

    // 3. tools 与 tool_choice
    if !request.tools.is_empty() {
        body.insert("tools".to_string(), Value::Array(convert_tools(&request.tools)));
    }
    if let Some(choice) = &request.tool_choice {
        body.insert("tool_choice".to_string(), convert_tool_choice(choice));
    }

    // 4. 透传额外 provider 配置，例如 stop_sequences 等
    for (k, v) in &request.options.extra {
        body.insert(k.clone(), v.clone());
    }

    body.insert("stream".to_string(), Value::Bool(stream));
    Ok(Value::Object(body))
}

fn convert_messages(messages: &[Message]) -> Result<Vec<Value>, LLMError> {
    let mut converted = Vec::with_capacity(messages.len());
    let mut tool_results: Vec<Value> = Vec::new();

    for message in messages {
        if message.role == Role::Tool {
            tool_results.push(convert_tool_result(message)?);
            continue;
        }
        if !tool_results.is_empty() {
            converted.push(json!({"role": "user", "content": std::mem::take(&mut tool_results)}));
        }
        converted.push(convert_message(message)?);
    }
    if !tool_results.is_empty() {
        converted.push(json!({"role": "user", "content": tool_results}));
    }
    Ok(converted)
}

fn convert_message(message: &Message) -> Result<Value, LLMError> {
    let role = match message.role {
        Role::Assistant => "assistant",
        _ => "user",
    };

    let mut blocks = message
        .content
        .parts()
        .iter()
        .map(convert_content_part)
        .collect::<Vec<_>>();
    for call in &message.tool_calls {
        let input = if call.arguments.trim().is_empty() {
            json!({})
        } else {
            call.parsed_arguments().map_err(|err| LLMError::Validation {
                message: format!("arguments of tool call `{}` are not valid JSON: {err}", call.name),
            })?
        };
        blocks.push(json!({
            "type": "tool_use",
            "id": call.id,
            "name": call.name,
            "input": input,
        }));
    }

    if blocks.is_empty() {
        return Err(LLMError::Validation {
            message: "message must contain at least one content part".to_string(),
        });
    }
    Ok(json!({"role": role, "content": blocks}))
}

fn convert_tool_result(message: &Message) -> Result<Value, LLMError> {
    let call_id = message
        .tool_call_id
        .as_ref()
        .ok_or_else(|| LLMError::Validation {
            message: "tool message missing tool_call_id".to_string(),
        })?;
    let content = match &message.content {
        MessageContent::Text(text) => Value::String(text.clone()),
        MessageContent::Parts(parts) => parts.iter().map(convert_content_part).collect(),
    };
    Ok(json!({
        "type": "tool_result",
        "tool_use_id": call_id,
        "content": content,
    }))
}

fn convert_content_part(part: &ContentPart) -> Value {
    match part {
        ContentPart::Text { text } => json!({"type": "text", "text": text}),
        ContentPart::ImageUrl { url } => json!({
            "type": "image",
            "source": {"type": "url", "url": url}
        }),
        ContentPart::ImageBase64 { data, mime_type } => json!({
            "type": "image",
            "source": {"type": "base64", "media_type": mime_type, "data": data}
        }),
    }
}

fn convert_tools(tools: &[ToolDefinition]) -> Vec<Value> {
    tools
        .iter()
        .map(|tool| {
            let mut obj = Map::new();
            obj.insert("name".to_string(), Value::String(tool.name.clone()));
            if let Some(description) = &tool.description {
                obj.insert("description".to_string(), Value::String(description.clone()));
            }
            obj.insert("input_schema".to_string(), tool.parameters.clone());
            Value::Object(obj)
        })
        .collect()
}

fn convert_tool_choice(choice: &ToolChoice) -> Value {
    match choice {
        ToolChoice::Auto => json!({"type": "auto"}),
        ToolChoice::Any => json!({"type": "any"}),
        ToolChoice::None => json!({"type": "none"}),
        ToolChoice::Tool { name } => json!({"type": "tool", "name": name}),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ToolCall;

    fn call(id: &str, name: &str, arguments: &str) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            name: name.to_string(),
            arguments: arguments.to_string(),
        }
    }

    #[test]
    fn system_is_top_level_and_max_tokens_defaults() {
        let request = ChatRequest::new(vec![Message::user("hi")]).with_system("be brief");
        let body = build_anthropic_body(&request, "claude-3-5-haiku-latest", true).expect("body");

        assert_eq!(body["system"], "be brief");
        assert_eq!(body["max_tokens"], 4096);
        assert_eq!(body["stream"], true);
        assert_eq!(
            body["messages"],
            json!([{"role": "user", "content": [{"type": "text", "text": "hi"}]}])
        );
    }

    #[test]
    fn consecutive_tool_results_merge_into_one_user_turn() {
        let request = ChatRequest::new(vec![
            Message::user("weather and time?"),
            Message::assistant_with_tool_calls(
                "checking",
                vec![
                    call("toolu_1", "weather", "{\"city\":\"Paris\"}"),
                    call("toolu_2", "clock", ""),
                ],
            ),
            Message::tool_result("toolu_1", "sunny"),
            Message::tool_result("toolu_2", "noon"),
            Message::user("thanks"),
        ]);
        let body = build_anthropic_body(&request, "claude", false).expect("body");
        let messages = body["messages"].as_array().expect("messages");
        assert_eq!(messages.len(), 4);

        let assistant = &messages[1]["content"];
        assert_eq!(assistant[0], json!({"type": "text", "text": "checking"}));
        assert_eq!(assistant[1]["input"], json!({"city": "Paris"}));
        assert_eq!(assistant[2]["input"], json!({}));

        assert_eq!(messages[2]["role"], "user");
        assert_eq!(
            messages[2]["content"],
            json!([
                {"type": "tool_result", "tool_use_id": "toolu_1", "content": "sunny"},
                {"type": "tool_result", "tool_use_id": "toolu_2", "content": "noon"}
            ])
        );
        assert_eq!(messages[3]["content"][0]["text"], "thanks");
    }

    #[test]
    fn trailing_tool_results_are_flushed() {
        let request = ChatRequest::new(vec![
            Message::assistant_with_tool_calls("", vec![call("toolu_1", "weather", "{}")]),
            Message::tool_result("toolu_1", "sunny"),
        ]);
        let body = build_anthropic_body(&request, "claude", false).expect("body");
        assert_eq!(body["messages"][1]["content"][0]["type"], "tool_result");
    }

    #[test]
    fn tools_and_choice_use_anthropic_shape() {
        let mut request = ChatRequest::new(vec![Message::user("hi")]).with_tools(vec![ToolDefinition {
            name: "weather".to_string(),
            description: None,
            parameters: json!({"type": "object"}),
        }]);
        request.tool_choice = Some(ToolChoice::Any);
        request.options.max_output_tokens = Some(64);

        let body = build_anthropic_body(&request, "claude", false).expect("body");
        assert_eq!(body["tools"], json!([{"name": "weather", "input_schema": {"type": "object"}}]));
        assert_eq!(body["tool_choice"], json!({"type": "any"}));
        assert_eq!(body["max_tokens"], 64);
    }

    #[test]
    fn invalid_replayed_arguments_are_rejected() {
        let request = ChatRequest::new(vec![Message::assistant_with_tool_calls(
            "",
            vec![call("toolu_1", "weather", "{broken")],
        )]);
        let err = build_anthropic_body(&request, "claude", false).expect_err("invalid");
        assert!(matches!(err, LLMError::Validation { .. }));
    }

    #[test]
    fn empty_conversation_is_rejected() {
        let err = build_anthropic_body(&ChatRequest::default(), "claude", false).expect_err("empty");
        assert!(matches!(err, LLMError::Validation { .. }));
    }
}
