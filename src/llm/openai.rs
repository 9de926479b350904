//! OpenAI 兼容 API 客户端
//!
//! 直接用 reqwest 调用 `{base_url}/chat/completions`（可配置 base_url，支持 OpenAI、自建代理等）。
//! 用户消息附带图片时以 data URI 形式作为多模态内容发送。

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use super::traits::{AiSettings, Completion, CompletionRequest, CompletionService, LlmError, ToolChoice};
use crate::memory::{Message, Role, ToolInvocation};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// 进程内累计 token 用量，随每次补全写入日志
#[derive(Debug, Default)]
struct TokenUsage {
    prompt_tokens: AtomicU64,
    completion_tokens: AtomicU64,
}

impl TokenUsage {
    /// 累加并返回累计值 (prompt, completion)
    fn add(&self, prompt: u64, completion: u64) -> (u64, u64) {
        (
            self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed) + prompt,
            self.completion_tokens.fetch_add(completion, Ordering::Relaxed) + completion,
        )
    }
}

// --- 请求 / 响应线格式 ---

#[derive(Debug, Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<Value>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: Role,
    #[serde(default)]
    content: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    tool_type: &'static str,
    function: WireFunction,
}

#[derive(Debug, Serialize)]
struct WireFunction {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type", default = "function_type")]
    call_type: String,
    function: WireFunctionCall,
}

fn function_type() -> String {
    "function".to_string()
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireMessage,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

/// OpenAI 兼容补全服务
pub struct OpenAiCompletion {
    http: Client,
    base_url: String,
    usage: TokenUsage,
}

impl OpenAiCompletion {
    pub fn new(base_url: Option<&str>, timeout: Duration) -> Result<Self, LlmError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::Http(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.unwrap_or(DEFAULT_BASE_URL).trim_end_matches('/').to_string(),
            usage: TokenUsage::default(),
        })
    }
}

fn to_wire_message(message: &Message) -> WireMessage {
    let content = match (&message.image, message.role) {
        (Some(image), Role::User) => {
            let data_uri = format!("data:{};base64,{}", image.mime_type, STANDARD.encode(&image.data));
            json!([
                { "type": "text", "text": message.content },
                { "type": "image_url", "image_url": { "url": data_uri } },
            ])
        }
        _ if message.role == Role::Assistant && !message.tool_calls.is_empty() => Value::Null,
        _ => Value::String(message.content.clone()),
    };
    let tool_calls = (!message.tool_calls.is_empty()).then(|| {
        message
            .tool_calls
            .iter()
            .map(|call| WireToolCall {
                id: call.id.clone(),
                call_type: function_type(),
                function: WireFunctionCall {
                    name: call.name.clone(),
                    arguments: call.arguments.to_string(),
                },
            })
            .collect()
    });
    WireMessage {
        role: message.role,
        content: Some(content),
        tool_calls,
        tool_call_id: message.tool_call_id.clone(),
    }
}

fn wire_tool_choice(choice: &ToolChoice) -> Value {
    match choice {
        ToolChoice::Auto => json!("auto"),
        ToolChoice::None => json!("none"),
        ToolChoice::Required(name) => json!({ "type": "function", "function": { "name": name } }),
    }
}

fn parse_completion(response: WireResponse) -> Result<Completion, LlmError> {
    let message = response
        .choices
        .into_iter()
        .next()
        .map(|c| c.message)
        .ok_or(LlmError::EmptyResponse)?;

    if let Some(calls) = message.tool_calls.filter(|c| !c.is_empty()) {
        let invocations = calls
            .into_iter()
            .map(|call| -> Result<ToolInvocation, LlmError> {
                let raw = call.function.arguments.trim();
                let arguments = if raw.is_empty() {
                    Value::Object(Default::default())
                } else {
                    serde_json::from_str(raw).map_err(|e| LlmError::InvalidToolArguments {
                        tool: call.function.name.clone(),
                        reason: e.to_string(),
                    })?
                };
                Ok(ToolInvocation {
                    id: call.id,
                    name: call.function.name,
                    arguments,
                })
            })
            .collect::<Result<Vec<_>, LlmError>>()?;
        return Ok(Completion::ToolCalls(invocations));
    }

    match message.content {
        Some(Value::String(text)) if !text.trim().is_empty() => Ok(Completion::Text(text)),
        Some(Value::String(_)) | Some(Value::Null) | None => Err(LlmError::EmptyResponse),
        Some(other) => Err(LlmError::InvalidResponse(format!("unexpected content: {other}"))),
    }
}

#[async_trait]
impl CompletionService for OpenAiCompletion {
    async fn complete(
        &self,
        settings: &AiSettings,
        request: CompletionRequest,
    ) -> Result<Completion, LlmError> {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        messages.push(to_wire_message(&Message::system(request.system)));
        messages.extend(request.messages.iter().map(to_wire_message));

        let tools: Vec<WireTool> = request
            .tools
            .into_iter()
            .map(|spec| WireTool {
                tool_type: "function",
                function: WireFunction {
                    name: spec.name,
                    description: spec.description,
                    parameters: spec.parameters,
                },
            })
            .collect();
        let tool_choice = (!tools.is_empty()).then(|| wire_tool_choice(&request.tool_choice));

        let body = WireRequest {
            model: &settings.model,
            messages,
            tools,
            tool_choice,
            temperature: settings.temperature,
            max_tokens: request.max_tokens,
        };

        let url = format!("{}/chat/completions", self.base_url);
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&settings.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout
                } else {
                    LlmError::Http(e.to_string())
                }
            })?;

        let status = resp.status();
        let text = resp.text().await.map_err(|e| LlmError::Http(e.to_string()))?;
        if !status.is_success() {
            return Err(LlmError::Api {
                status: status.as_u16(),
                body: text,
            });
        }

        let parsed: WireResponse =
            serde_json::from_str(&text).map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
        if let Some(usage) = &parsed.usage {
            let (prompt_total, completion_total) = self.usage.add(usage.prompt_tokens, usage.completion_tokens);
            debug!(
                model = %settings.model,
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                prompt_total,
                completion_total,
                "completion usage"
            );
        }
        parse_completion(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::ImageAttachment;

    #[test]
    fn test_image_message_uses_data_uri() {
        let message = Message::user("olha essa foto").with_image(ImageAttachment {
            mime_type: "image/png".into(),
            data: vec![1, 2, 3],
        });
        let wire = serde_json::to_value(to_wire_message(&message)).unwrap();
        assert_eq!(wire["content"][0]["text"], "olha essa foto");
        assert_eq!(wire["content"][1]["image_url"]["url"], "data:image/png;base64,AQID");
    }

    #[test]
    fn test_required_tool_choice_names_function() {
        let choice = wire_tool_choice(&ToolChoice::Required("buscar_imoveis".into()));
        assert_eq!(choice["function"]["name"], "buscar_imoveis");
        assert_eq!(wire_tool_choice(&ToolChoice::None), json!("none"));
    }

    #[test]
    fn test_parse_tool_call_arguments() {
        let response: WireResponse = serde_json::from_value(json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": { "name": "buscar_imoveis", "arguments": "{\"cidade\":\"Curitiba\"}" }
                    }]
                }
            }]
        }))
        .unwrap();
        match parse_completion(response).unwrap() {
            Completion::ToolCalls(calls) => {
                assert_eq!(calls[0].name, "buscar_imoveis");
                assert_eq!(calls[0].arguments["cidade"], "Curitiba");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_parse_invalid_arguments_is_error() {
        let response: WireResponse = serde_json::from_value(json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "tool_calls": [{
                        "id": "call_1",
                        "function": { "name": "agendar_visita", "arguments": "{not json" }
                    }]
                }
            }]
        }))
        .unwrap();
        assert!(matches!(
            parse_completion(response),
            Err(LlmError::InvalidToolArguments { .. })
        ));
    }
}
