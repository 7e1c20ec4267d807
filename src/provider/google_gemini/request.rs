use serde_json::{Map, Value, json};
use tracing::warn;

use crate::error::LLMError;
use crate::types::{
    ChatRequest, ContentPart, Message, Role, ToolChoice, ToolDefinition, find_originating_call,
};

/// 构建 Google Gemini GenerateContent 请求体
///
/// 与 OpenAI Chat 不同，Gemini 使用路径参数携带模型名称：
/// `POST /v1beta/models/{model}:generateContent`，因此 body 中不包含 model。
pub(crate) fn build_gemini_body(request: &ChatRequest) -> Result<Value, LLMError> {
    let mut body = Map::new();

    // 1. 消息转换为 contents，连续的 tool 结果合并为一条 user content
    let contents = convert_messages(&request.messages)?;
    if contents.is_empty() {
        return Err(LLMError::Validation {
            message: "Gemini GenerateContent request requires at least one content message"
                .to_string(),
        });
    }
    body.insert("contents".to_string(), Value::Array(contents));

    if let Some(system) = &request.system {
        body.insert(
            "system_instruction".to_string(),
            json!({ "parts": [ { "text": system } ] }),
        );
    }

    // 2. 采样与生成配置 -> generationConfig
    if let Some(gen_cfg) = build_generation_config(request) {
        body.insert("generationConfig".to_string(), gen_cfg);
    }

    // 3. 工具与 toolConfig
    if !request.tools.is_empty() {
        body.insert(
            "tools".to_string(),
            json!([{ "functionDeclarations": convert_tools(&request.tools) }]),
        );
    }
    if let Some(choice) = &request.tool_choice {
        body.insert("toolConfig".to_string(), convert_tool_choice(choice));
    }

    // 4. 额外 provider 配置（如 safetySettings、cachedContent 等），透传到顶层
    for (k, v) in &request.options.extra {
        body.insert(k.clone(), v.clone());
    }

    Ok(Value::Object(body))
}

fn convert_messages(messages: &[Message]) -> Result<Vec<Value>, LLMError> {
    let mut contents = Vec::with_capacity(messages.len());
    let mut responses: Vec<Value> = Vec::new();

    for (index, message) in messages.iter().enumerate() {
        if message.role == Role::Tool {
            responses.extend(convert_tool_result(messages, index));
            continue;
        }
        if !responses.is_empty() {
            contents.push(json!({"role": "user", "parts": std::mem::take(&mut responses)}));
        }
        contents.push(convert_message(message)?);
    }
    if !responses.is_empty() {
        contents.push(json!({"role": "user", "parts": responses}));
    }
    Ok(contents)
}

/// 将 Message 转换为 Gemini Content，assistant 映射为 model
fn convert_message(message: &Message) -> Result<Value, LLMError> {
    let role = match message.role {
        Role::Assistant => "model",
        _ => "user",
    };

    let mut parts: Vec<Value> = message.content.parts().iter().map(convert_content_part).collect();
    for call in &message.tool_calls {
        let args = if call.arguments.trim().is_empty() {
            json!({})
        } else {
            call.parsed_arguments().map_err(|err| LLMError::Validation {
                message: format!("arguments of tool call `{}` are not valid JSON: {err}", call.name),
            })?
        };
        parts.push(json!({"functionCall": {"name": call.name, "args": args}}));
    }
    if parts.is_empty() {
        return Err(LLMError::Validation {
            message: "message must contain at least one content part".to_string(),
        });
    }
    Ok(json!({"role": role, "parts": parts}))
}

/// Gemini 以函数名关联结果，这里回溯到发起调用的 assistant 消息取得名称
///
/// 找不到对应调用时不发送 functionResponse，仅保留文本内容。
fn convert_tool_result(messages: &[Message], index: usize) -> Vec<Value> {
    let message = &messages[index];
    let output = message.content.text();
    let Some(call) = find_originating_call(messages, index) else {
        warn!(
            tool_call_id = message.tool_call_id.as_deref().unwrap_or_default(),
            "tool result has no originating call, sending it as text"
        );
        if output.is_empty() {
            return Vec::new();
        }
        return vec![json!({"text": output})];
    };

    let response = match serde_json::from_str::<Value>(&output) {
        Ok(Value::Object(object)) => Value::Object(object),
        _ => json!({"content": output}),
    };
    vec![json!({"functionResponse": {"name": call.name, "response": response}})]
}

fn convert_content_part(part: &ContentPart) -> Value {
    match part {
        ContentPart::Text { text } => json!({"text": text}),
        ContentPart::ImageUrl { url } => json!({"fileData": {"fileUri": url}}),
        ContentPart::ImageBase64 { data, mime_type } => json!({
            "inline_data": {"mime_type": mime_type, "data": data}
        }),
    }
}

fn build_generation_config(request: &ChatRequest) -> Option<Value> {
    let mut config = Map::new();
    if let Some(temperature) = request.options.temperature {
        config.insert("temperature".to_string(), Value::from(temperature));
    }
    if let Some(top_p) = request.options.top_p {
        config.insert("topP".to_string(), Value::from(top_p));
    }
    if let Some(max_tokens) = request.options.max_output_tokens {
        config.insert("maxOutputTokens".to_string(), Value::from(max_tokens));
    }
    (!config.is_empty()).then_some(Value::Object(config))
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
            obj.insert("parameters".to_string(), tool.parameters.clone());
            Value::Object(obj)
        })
        .collect()
}

fn convert_tool_choice(choice: &ToolChoice) -> Value {
    let config = match choice {
        ToolChoice::Auto => json!({"mode": "AUTO"}),
        ToolChoice::Any => json!({"mode": "ANY"}),
        ToolChoice::None => json!({"mode": "NONE"}),
        ToolChoice::Tool { name } => json!({"mode": "ANY", "allowedFunctionNames": [name]}),
    };
    json!({ "functionCallingConfig": config })
}
