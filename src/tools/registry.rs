//! 工具注册表
//!
//! 所有工具实现 Tool trait（name / description / parameters_schema / execute），由 ToolRegistry 按名注册与查找，
//! ToolExecutor 在调用时加超时并统一转 AgentError。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;

use super::search::PropertyCard;
use crate::llm::ToolSpec;
use crate::memory::Message;
use crate::store::CompanyId;

/// 工具执行时可见的回合上下文
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub company_id: CompanyId,
    pub instance_id: String,
    pub phone: String,
    pub sender_name: Option<String>,
    /// 当前（聚合后的）客户消息
    pub message: String,
    pub history: Vec<Message>,
    pub is_show_more: bool,
    /// 配置时区下的当前时间
    pub now: NaiveDateTime,
}

impl ToolContext {
    pub fn new(company_id: impl Into<String>, instance_id: impl Into<String>, phone: impl Into<String>) -> Self {
        Self {
            company_id: company_id.into(),
            instance_id: instance_id.into(),
            phone: phone.into(),
            sender_name: None,
            message: String::new(),
            history: Vec::new(),
            is_show_more: false,
            now: Utc::now().naive_utc(),
        }
    }

    pub fn today(&self) -> NaiveDate {
        self.now.date()
    }
}

/// 工具执行结果
#[derive(Debug, Clone, Default)]
pub struct ToolOutcome {
    /// 回填给模型的 JSON 内容
    pub content: Value,
    /// 已确定的最终回复；存在时跳过第二次补全
    pub terminal_reply: Option<String>,
    pub properties: Vec<PropertyCard>,
    pub has_more: Option<bool>,
    /// 约束第二次补全的系统指令
    pub followup_instruction: Option<String>,
}

impl ToolOutcome {
    pub fn new(content: Value) -> Self {
        Self {
            content,
            ..Default::default()
        }
    }

    pub fn terminal(mut self, reply: impl Into<String>) -> Self {
        self.terminal_reply = Some(reply.into());
        self
    }

    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.followup_instruction = Some(instruction.into());
        self
    }
}

/// 工具 trait：名称、描述（供 LLM 理解）、参数 schema、异步执行（args 为 JSON）
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// 参数 JSON Schema（默认无参数）
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutcome, String>;
}

/// 工具注册表：按名称存储 Arc<dyn Tool>
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        let name = tool.name().to_string();
        self.tools.insert(name, Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// 发给补全服务的工具描述（按名称排序，保证请求稳定）
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tool_names()
            .into_iter()
            .filter_map(|name| self.tools.get(&name).map(|tool| (name, tool)))
            .map(|(name, tool)| ToolSpec {
                name,
                description: tool.description().to_string(),
                parameters: tool.parameters_schema(),
            })
            .collect()
    }
}
