//! 工具执行器
//!
//! 持有 ToolRegistry 与全局超时。execute 在超时内调用工具，失败 / 超时 / 未知工具统一转为 AgentError；
//! run_traced 是编排循环使用的入口：任何失败都被转为 `"tool failed: <message>"` 字符串输出，绝不向上传播。
//! 每次调用输出结构化审计日志（JSON）。

use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tokio::time::timeout;

use crate::core::AgentError;
use crate::tools::{Tool, ToolRegistry};
use crate::trace::Tracer;

/// 工具执行器：对每次调用施加超时，并将结果映射为 AgentError
#[derive(Clone)]
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

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// 执行指定工具；超时返回 ToolTimeout，工具返回 Err 则转为 ToolFailed；输出 JSON 审计日志
    pub async fn execute(&self, tool_name: &str, args: Value) -> Result<Value, AgentError> {
        let tool = self
            .registry
            .get(tool_name)
            .ok_or_else(|| AgentError::UnknownTool(tool_name.to_string()))?;
        self.execute_tool(tool.as_ref(), args).await
    }

    async fn execute_tool(&self, tool: &dyn Tool, args: Value) -> Result<Value, AgentError> {
        let start = Instant::now();
        let args_preview = args_preview(&args);
        let result = timeout(self.timeout, tool.execute(args)).await;

        let (ok, outcome) = match &result {
            Ok(Ok(_)) => (true, "ok"),
            Ok(Err(_)) => (false, "error"),
            Err(_) => (false, "timeout"),
        };
        let audit = json!({
            "event": "tool_audit",
            "tool": tool.name(),
            "ok": ok,
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit, "tool");

        match result {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(AgentError::ToolFailed(e)),
            Err(_) => Err(AgentError::ToolTimeout(format!(
                "{} timed out after {}s",
                tool.name(),
                self.timeout.as_secs()
            ))),
        }
    }

    /// 带追踪的工具调用：成功返回工具原始值；失败返回 `"tool failed: <message>"`
    pub async fn run_traced(&self, tool: &dyn Tool, input: Value, tracer: &Tracer) -> Value {
        let run = tracer.on("toolrun", json!({"tool": tool.name(), "input": input}));
        match self.execute_tool(tool, input).await {
            Ok(output) => {
                run.on("result", json!({ "result": output }));
                output
            }
            Err(e) => {
                let message = failure_output(&e);
                tracing::warn!("Tool '{}' failed: {}", tool.name(), e);
                run.on(
                    "failed",
                    json!({
                        "result": message,
                        "reason_code": "tool_error",
                        "exception": failure_detail(&e),
                        "errtype": e.kind(),
                    }),
                );
                Value::String(message)
            }
        }
    }
}

fn failure_detail(err: &AgentError) -> String {
    match err {
        AgentError::ToolFailed(msg) | AgentError::ToolTimeout(msg) => msg.clone(),
        other => other.to_string(),
    }
}

/// 工具失败时写入 ToolRunRecord.output 的文本
pub fn failure_output(err: &AgentError) -> String {
    format!("tool failed: {}", failure_detail(err))
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
    use crate::tools::FnTool;
    use async_trait::async_trait;

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }

        fn description(&self) -> &str {
            "never finishes in time"
        }

        async fn execute(&self, _args: Value) -> Result<Value, String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Value::Null)
        }
    }

    fn executor() -> ToolExecutor {
        let registry = ToolRegistry::new()
            .with(FnTool::new("ok", "returns 42", |_| Ok(json!(42))))
            .with(FnTool::new("boom", "always fails", |_| Err("division by zero".to_string())))
            .with(SlowTool);
        ToolExecutor::new(registry, 1)
    }

    #[tokio::test]
    async fn test_execute_success_and_unknown() {
        let exec = executor();
        assert_eq!(exec.execute("ok", json!({})).await.unwrap(), json!(42));
        assert!(matches!(
            exec.execute("nope", json!({})).await,
            Err(AgentError::UnknownTool(_))
        ));
    }

    #[tokio::test]
    async fn test_run_traced_converts_failure() {
        let exec = executor();
        let tracer = Tracer::default();
        let tool = exec.registry().get("boom").unwrap();
        let out = exec.run_traced(tool.as_ref(), json!({}), &tracer).await;
        assert_eq!(out, json!("tool failed: division by zero"));
        let run = &tracer.export().children[0];
        assert_eq!(run.key, "toolrun");
        assert_eq!(run.args["result"], json!("tool failed: division by zero"));
        assert!(tracer.has_failed());
    }

    #[tokio::test]
    async fn test_timeout_is_tool_failure() {
        let exec = executor();
        let tool = exec.registry().get("slow").unwrap();
        let out = exec.run_traced(tool.as_ref(), json!({}), &Tracer::default()).await;
        assert_eq!(out, json!("tool failed: slow timed out after 1s"));
    }
}
