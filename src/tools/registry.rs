//! 工具注册表
//!
//! 所有工具实现 Tool trait（name / description / parameters_schema / execute），
//! 由 ToolRegistry 按名注册与查找；to_specs 导出传给补全服务的工具 schema。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::llm::ToolSpec;

/// 工具 trait：名称、描述（供 LLM 理解）、参数 schema、异步执行（args 为 JSON）
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（用于调用请求中的 "tool" 字段）
    fn name(&self) -> &str;

    /// 工具描述（供 LLM 理解功能）
    fn description(&self) -> &str;

    /// 参数 JSON Schema（供 LLM 生成正确的参数格式）
    /// 默认返回空对象，表示无参数或参数格式不限
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    /// 执行工具
    async fn execute(&self, args: Value) -> Result<String, String>;
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

    pub async fn execute(&self, name: &str, args: Value) -> Result<String, String> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| format!("Unknown tool: {name}"))?;
        tool.execute(args).await
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    /// 导出传给补全服务的工具 schema（名称排序保证稳定）
    pub fn to_specs(&self) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = self
            .tools
            .values()
            .map(|tool| ToolSpec {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters_schema(),
            })
            .collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Upper;

    #[async_trait]
    impl Tool for Upper {
        fn name(&self) -> &str {
            "upper"
        }
        fn description(&self) -> &str {
            "Uppercase text"
        }
        async fn execute(&self, args: Value) -> Result<String, String> {
            Ok(args["text"].as_str().unwrap_or("").to_uppercase())
        }
    }

    #[tokio::test]
    async fn register_and_execute() {
        let mut registry = ToolRegistry::new();
        registry.register(Upper);
        let out = registry
            .execute("upper", serde_json::json!({"text": "hi"}))
            .await
            .unwrap();
        assert_eq!(out, "HI");
        assert!(registry.execute("nope", Value::Null).await.is_err());
    }

    #[tokio::test]
    async fn specs_are_sorted_and_complete() {
        let mut registry = ToolRegistry::new();
        registry.register(crate::tools::EchoTool);
        registry.register(Upper);
        let specs = registry.to_specs();
        let names: Vec<&str> = specs.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["echo", "upper"]);
    }
}
