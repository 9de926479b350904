//! 脚本化补全服务（用于测试，无需 API）
//!
//! 按顺序弹出预置的结果，并记录收到的每个请求，便于断言工具选择策略与提示词内容。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use super::traits::{AiSettings, Completion, CompletionRequest, CompletionService, LlmError};
use crate::memory::ToolInvocation;

/// 预置结果队列；队列耗尽时返回 EmptyResponse
#[derive(Default)]
pub struct ScriptedCompletion {
    responses: Mutex<VecDeque<Result<Completion, LlmError>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedCompletion {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, response: Result<Completion, LlmError>) -> &Self {
        if let Ok(mut queue) = self.responses.lock() {
            queue.push_back(response);
        }
        self
    }

    pub fn push_text(&self, text: impl Into<String>) -> &Self {
        self.push(Ok(Completion::Text(text.into())))
    }

    pub fn push_tool_call(&self, name: &str, arguments: Value) -> &Self {
        let id = format!("call_{}", uuid::Uuid::new_v4().simple());
        self.push(Ok(Completion::ToolCalls(vec![ToolInvocation {
            id,
            name: name.to_string(),
            arguments,
        }])))
    }

    /// 已收到的请求（按调用顺序）
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or_default()
    }
}

#[async_trait]
impl CompletionService for ScriptedCompletion {
    async fn complete(
        &self,
        _settings: &AiSettings,
        request: CompletionRequest,
    ) -> Result<Completion, LlmError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }
        self.responses
            .lock()
            .ok()
            .and_then(|mut queue| queue.pop_front())
            .unwrap_or(Err(LlmError::EmptyResponse))
    }
}
