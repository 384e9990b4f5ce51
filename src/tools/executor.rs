//! 工具执行器（工具调用客户端）
//!
//! 持有 ToolRegistry 与全局超时，invoke(tool_name, args) 在超时内调用
//! registry.execute，超时或失败时转为 ChatError（ToolTimeout / ToolFailed）；
//! 每次调用输出结构化审计日志（JSON）。

use std::time::{Duration, Instant};

use tokio::time::timeout;

use crate::core::ChatError;
use crate::tools::ToolRegistry;

/// 工具执行器：对每次调用施加超时，并将结果映射为 ChatError
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

    /// 调用指定工具；超时返回 ToolTimeout，工具返回 Err 则转为 ToolFailed；输出 JSON 审计日志
    pub async fn invoke(
        &self,
        tool_name: &str,
        args: serde_json::Value,
    ) -> Result<String, ChatError> {
        let start = Instant::now();
        let args_preview = args_preview(&args);
        let result = timeout(self.timeout, self.registry.execute(tool_name, args)).await;

        let (ok, outcome): (bool, &str) = match &result {
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
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        match result {
            Ok(Ok(content)) => Ok(content),
            Ok(Err(e)) => Err(ChatError::ToolFailed {
                tool: tool_name.to_string(),
                reason: e,
            }),
            Err(_) => Err(ChatError::ToolTimeout(tool_name.to_string())),
        }
    }

    /// 注册表导出的工具 schema
    pub fn specs(&self) -> Vec<crate::llm::ToolSpec> {
        self.registry.to_specs()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.tool_names()
    }
}

fn args_preview(args: &serde_json::Value) -> String {
    let s = args.to_string();
    if s.len() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{EchoTool, Tool};
    use async_trait::async_trait;

    struct Stuck;

    #[async_trait]
    impl Tool for Stuck {
        fn name(&self) -> &str {
            "stuck"
        }
        fn description(&self) -> &str {
            "Never returns"
        }
        async fn execute(&self, _args: serde_json::Value) -> Result<String, String> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(String::new())
        }
    }

    #[tokio::test]
    async fn invoke_maps_results_and_timeouts() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);
        registry.register(Stuck);
        let executor = ToolExecutor::new(registry, 1);

        let out = executor
            .invoke("echo", serde_json::json!({"text": "hi"}))
            .await
            .unwrap();
        assert_eq!(out, "hi");

        let missing = executor.invoke("nope", serde_json::Value::Null).await;
        assert!(matches!(missing, Err(ChatError::ToolFailed { .. })));

        let timed_out = executor.invoke("stuck", serde_json::Value::Null).await;
        assert!(matches!(timed_out, Err(ChatError::ToolTimeout(_))));
    }
}
