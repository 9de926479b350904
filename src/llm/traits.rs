//! 补全服务抽象
//!
//! 「给定消息 + 工具 schema + 工具选择策略，返回文本或工具调用」。
//! 所有后端（OpenAI 兼容 HTTP / 脚本化 Mock）实现 CompletionService。

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::memory::{Message, ToolInvocation};

/// 全局 AI 配置（缺失即视为「无法处理」）
#[derive(Clone, Serialize, Deserialize)]
pub struct AiSettings {
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
    /// 工具调用之后第二次补全的输出上限
    pub followup_max_tokens: u32,
    pub temperature: f32,
}

impl fmt::Debug for AiSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AiSettings")
            .field("api_key", &"***")
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("followup_max_tokens", &self.followup_max_tokens)
            .field("temperature", &self.temperature)
            .finish()
    }
}

/// 工具选择策略
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolChoice {
    /// 由模型决定
    Auto,
    /// 禁止调用工具
    None,
    /// 强制调用指定工具
    Required(String),
}

/// 暴露给模型的工具描述
#[derive(Debug, Clone, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// 一次补全请求
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSpec>,
    pub tool_choice: ToolChoice,
    pub max_tokens: u32,
}

/// 补全结果：文本或工具调用（可能多个，由调用方决定如何处理）
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    Text(String),
    ToolCalls(Vec<ToolInvocation>),
}

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid arguments for tool {tool}: {reason}")]
    InvalidToolArguments { tool: String, reason: String },

    #[error("Empty response")]
    EmptyResponse,

    #[error("Request timed out")]
    Timeout,
}

/// 补全服务
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(
        &self,
        settings: &AiSettings,
        request: CompletionRequest,
    ) -> Result<Completion, LlmError>;
}
