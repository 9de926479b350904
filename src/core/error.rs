//! 回合级错误类型
//!
//! 与 TurnOrchestrator 配合：ConfigMissing 表示「无法处理、调用方不应发送任何消息」，
//! 其余错误在回合边界统一转为固定的致歉文案，绝不把内部细节泄露给客户。

use thiserror::Error;

use crate::llm::LlmError;
use crate::store::StoreError;

/// 单个对话回合中可能出现的错误（配置缺失、LLM、工具、存储等）
#[derive(Error, Debug)]
pub enum AgentError {
    /// 实例未关联公司、未配置智能体或缺少全局 AI 配置；不可重试
    #[error("Configuration missing: {0}")]
    ConfigMissing(String),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    #[error("Tool timeout: {0}")]
    ToolTimeout(String),

    #[error("Hallucinated tool: {0}")]
    HallucinatedTool(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
}

impl AgentError {
    /// 配置缺失类错误：回合返回 None 而不是致歉文案
    pub fn is_config_absence(&self) -> bool {
        matches!(self, AgentError::ConfigMissing(_))
    }
}
