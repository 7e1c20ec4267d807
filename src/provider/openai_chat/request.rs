use serde_json::{Map, Value, json};

use crate::error::LLMError;
use crate::types::{
    ChatRequest, ContentPart, Message, MessageContent, Role, ToolCall, ToolChoice, ToolDefinition,
};

pub(crate) fn build_openai_body(
    request: &ChatRequest,
    model: &str,
    stream: bool,
) -> Result<Value, LLMError> {
    let mut messages = Vec::with_capacity(request.messages.len() + 1);
    if let Some(system) = &request.system {
        messages.push(json!({"role": "system", "content": system}));
    }
    for message in &request.messages {
        messages.push(convert_message(message)?);
    }

    let mut body = Map::new();
    body.insert("model".to_string(), Value::String(model.to_string()));
    body.insert("messages".to_string(), Value::Array(messages));
    if let Some(temperature) = request.options.temperature {
        body.insert("temperature".to_string(), Value::from(temperature));
    }
    if let Some(top_p) = request.options.top_p {
        body.insert("top_p".to_string(), Value::from(top_p));
    }
    if let Some(max_tokens) = request.options.max_output_tokens {
        body.insert("max_completion_tokens".to_string(), Value::from(max_tokens));
    }
    if !request.tools.is_empty() {
        body.insert("tools".to_string(), Value::Array(convert_tools(&request.tools)));
    }
    if let Some(choice) = &request.tool_choice {
        body.insert("tool_choice".to_string(), convert_tool_choice(choice));
    }
    for (k, v) in &request.options.extra {
        body.insert(k.clone(), v.clone());
    }
    body.insert("stream".to_string(), Value::Bool(stream));
    Ok(Value::Object(body))
}

fn convert_message(message: &Message) -> Result<Value, LLMError> {
    match message.role {
        Role::User => Ok(json!({
            "role": "user",
            "content": convert_content(&message.content),
        })),
        Role::Assistant => {
            ensure_text_only(&message.content, "image content in assistant messages")?;
            let mut obj = Map::new();
            obj.insert("role".to_string(), Value::String("assistant".to_string()));
            let content = if message.content.is_empty() {
                Value::Null
            } else {
                convert_content(&message.content)
            };
            obj.insert("content".to_string(), content);
            if !message.tool_calls.is_empty() {
                obj.insert(
                    "tool_calls".to_string(),
                    message.tool_calls.iter().map(convert_tool_call).collect(),
                );
            }
            Ok(Value::Object(obj))
        }
        Role::Tool => {
            let call_id = message
                .tool_call_id
                .as_ref()
                .ok_or_else(|| LLMError::Validation {
                    message: "tool message missing tool_call_id".to_string(),
                })?;
            ensure_text_only(&message.content, "image content in tool messages")?;
            Ok(json!({
                "role": "tool",
                "tool_call_id": call_id,
                "content": message.content.text(),
            }))
        }
    }
}

/// Chat Completions only accepts images in user turns.
fn ensure_text_only(content: &MessageContent, feature: &'static str) -> Result<(), LLMError> {
    let has_image = content
        .parts()
        .iter()
        .any(|part| !matches!(part, ContentPart::Text { .. }));
    if has_image {
        return Err(LLMError::UnsupportedFeature { feature });
    }
    Ok(())
}

fn convert_content(content: &MessageContent) -> Value {
    match content {
        MessageContent::Text(text) => Value::String(text.clone()),
        MessageContent::Parts(parts) => parts.iter().map(convert_content_part).collect(),
    }
}

fn convert_content_part(part: &ContentPart) -> Value {
    match part {
        ContentPart::Text { text } => json!({"type": "text", "text": text}),
        ContentPart::ImageUrl { url } => json!({
            "type": "image_url",
            "image_url": { "url": url }
        }),
        ContentPart::ImageBase64 { data, mime_type } => json!({
            "type": "image_url",
            "image_url": { "url": format!("data:{mime_type};base64,{data}") }
        }),
    }
}

fn convert_tool_call(call: &ToolCall) -> Value {
    json!({
        "id": call.id,
        "type": "function",
        "function": {
            "name": call.name,
            "arguments": call.arguments,
        }
    })
}

fn convert_tools(tools: &[ToolDefinition]) -> Vec<Value> {
    tools
        .iter()
        .map(|tool| {
            let mut function = Map::new();
            function.insert("name".to_string(), Value::String(tool.name.clone()));
            if let Some(description) = &tool.description {
                function.insert("description".to_string(), Value::String(description.clone()));
            }
            function.insert("parameters".to_string(), tool.parameters.clone());
            json!({"type": "function", "function": function})
        })
        .collect()
}

fn convert_tool_choice(choice: &ToolChoice) -> Value {
    match choice {
        ToolChoice::Auto => Value::String("auto".to_string()),
        ToolChoice::Any => Value::String("required".to_string()),
        ToolChoice::None => Value::String("none".to_string()),
        ToolChoice::Tool { name } => json!({
            "type": "function",
            "function": { "name": name }
        }),
    }
}
