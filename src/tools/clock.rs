//! Clock 工具：当前时间（本地运行与 proactive 触发时常用）

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

use crate::tools::Tool;

/// 返回当前 UTC 时间，可选 format 参数（chrono 格式串）
pub struct ClockTool;

#[async_trait]
impl Tool for ClockTool {
    fn name(&self) -> &str {
        "clock"
    }

    fn description(&self) -> &str {
        "Current UTC time. Args: {\"format\": \"%Y-%m-%d %H:%M:%S\"} (optional)"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "format": { "type": "string", "description": "chrono format string" }
            },
            "required": []
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let now = Utc::now();
        match args.get("format").and_then(|v| v.as_str()) {
            Some(fmt) => Ok(now.format(fmt).to_string()),
            None => Ok(now.to_rfc3339()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn formats_time() {
        let out = ClockTool
            .execute(serde_json::json!({"format": "%Y"}))
            .await
            .unwrap();
        assert_eq!(out.len(), 4);
        assert!(out.chars().all(|c| c.is_ascii_digit()));
    }
}
