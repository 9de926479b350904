//! 工具执行器
//!
//! 持有 ToolRegistry 与全局超时，execute 在超时内调用工具，
//! 未注册的工具名转为 HallucinatedTool，超时或失败转为 ToolTimeout / ToolExecutionFailed；
//! 每次调用输出结构化审计日志（JSON）。

use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::time::timeout;

use super::registry::{ToolContext, ToolOutcome, ToolRegistry};
use crate::core::AgentError;
use crate::llm::ToolSpec;

pub const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 30;

pub struct ToolExecutor {
    registry: ToolRegistry,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, timeout_secs: u64) -> Self {
        Self {
            registry,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    pub async fn execute(
        &self,
        tool_name: &str,
        args: Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutcome, AgentError> {
        let tool = self
            .registry
            .get(tool_name)
            .ok_or_else(|| AgentError::HallucinatedTool(tool_name.to_string()))?;

        let start = Instant::now();
        let args_preview = args_preview(&args);
        let result = timeout(self.timeout, tool.execute(args, ctx)).await;

        let (ok, outcome): (bool, &str) = match &result {
            Ok(Ok(o)) if o.terminal_reply.is_some() => (true, "terminal"),
            Ok(Ok(_)) => (true, "ok"),
            Ok(Err(_)) => (false, "error"),
            Err(_) => (false, "timeout"),
        };
        let duration_ms = start.elapsed().as_millis() as u64;
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool_name,
            "ok": ok,
            "outcome": outcome,
            "duration_ms": duration_ms,
            "args_preview": args_preview,
            "instance": ctx.instance_id,
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        match result {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(e)) => Err(AgentError::ToolExecutionFailed(e)),
            Err(_) => Err(AgentError::ToolTimeout(tool_name.to_string())),
        }
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.registry.specs()
    }
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::Tool;
    use async_trait::async_trait;

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "lento"
        }

        fn description(&self) -> &str {
            "never finishes in time"
        }

        async fn execute(&self, _args: Value, _ctx: &ToolContext) -> Result<ToolOutcome, String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(ToolOutcome::default())
        }
    }

    struct FailingTool;

    #[async_trait]
    impl Tool for FailingTool {
        fn name(&self) -> &str {
            "falha"
        }

        fn description(&self) -> &str {
            "always fails"
        }

        async fn execute(&self, _args: Value, _ctx: &ToolContext) -> Result<ToolOutcome, String> {
            Err("boom".into())
        }
    }

    fn executor() -> ToolExecutor {
        let mut registry = ToolRegistry::new();
        registry.register(SlowTool);
        registry.register(FailingTool);
        ToolExecutor::new(registry, 1)
    }

    #[tokio::test]
    async fn test_unknown_tool_is_hallucinated() {
        let ctx = ToolContext::new("c1", "i1", "5541");
        let err = executor()
            .execute("enviar_email", Value::Null, &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::HallucinatedTool(name) if name == "enviar_email"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_maps_to_tool_timeout() {
        let ctx = ToolContext::new("c1", "i1", "5541");
        let err = executor().execute("lento", Value::Null, &ctx).await.unwrap_err();
        assert!(matches!(err, AgentError::ToolTimeout(_)));
    }

    #[tokio::test]
    async fn test_failure_maps_to_execution_failed() {
        let ctx = ToolContext::new("c1", "i1", "5541");
        let err = executor().execute("falha", Value::Null, &ctx).await.unwrap_err();
        assert!(matches!(err, AgentError::ToolExecutionFailed(msg) if msg == "boom"));
    }

    #[test]
    fn test_specs_sorted_by_name() {
        let names: Vec<String> = executor().specs().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["falha", "lento"]);
    }
}
