//! 工具调用文本协议
//!
//! 把注册表导出的工具 schema 拼成 system prompt 尾部的说明块（schemars 生成
//! 调用格式的 JSON Schema），并从模型输出中解析 JSON 工具调用。模型可以返回
//! 单个对象或数组；不含合法调用 JSON 的输出按最终文本处理。

use schemars::{schema_for, JsonSchema};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

use crate::llm::{ToolCallRequest, ToolSpec};

/// 工具调用请求格式：`{"tool": "...", "args": {...}}`（仅用于 Schema 生成）
#[allow(dead_code)]
#[derive(JsonSchema)]
struct ToolCallFormat {
    /// 工具名
    pub tool: String,
    /// 工具参数，依工具不同而不同
    pub args: HashMap<String, Value>,
}

#[derive(Debug, Deserialize)]
struct RawToolCall {
    tool: String,
    #[serde(default)]
    args: Value,
}

/// 拼出注入 system prompt 的工具说明块
pub fn render_tool_schema_block(tools: &[ToolSpec]) -> String {
    if tools.is_empty() {
        return String::new();
    }
    let format_schema = serde_json::to_string_pretty(&schema_for!(ToolCallFormat))
        .unwrap_or_else(|_| String::new());
    let mut block = String::from("\n\n# Available tools\n");
    for tool in tools {
        block.push_str(&format!(
            "- {}: {} Parameters: {}\n",
            tool.name, tool.description, tool.parameters
        ));
    }
    block.push_str(
        "\nTo invoke tools, reply with ONLY a JSON object {\"tool\": \"name\", \"args\": {...}} \
         or a JSON array of such objects. To answer the user directly, reply with plain text.\n",
    );
    block.push_str(&format!("Tool call JSON Schema:\n{}\n", format_schema));
    block
}

/// 从模型输出中提取工具调用；无合法调用时返回空列表（输出按文本处理）
///
/// 提取顺序：```json 代码块优先，其次整段首尾的 {...} / [...]。
pub fn parse_tool_calls(output: &str) -> Vec<ToolCallRequest> {
    let trimmed = output.trim();

    let json_str = if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        rest.find("```")
            .map(|end| rest[..end].trim())
            .unwrap_or_else(|| rest.trim())
    } else if trimmed.starts_with('[') {
        trimmed
    } else if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        &trimmed[start..=end]
    } else {
        return Vec::new();
    };

    let raws: Vec<RawToolCall> = match serde_json::from_str::<Value>(json_str) {
        Ok(Value::Array(items)) => items
            .into_iter()
            .filter_map(|v| serde_json::from_value(v).ok())
            .collect(),
        Ok(obj @ Value::Object(_)) => serde_json::from_value(obj).map(|c| vec![c]).unwrap_or_default(),
        _ => Vec::new(),
    };

    raws.into_iter()
        .filter(|r| !r.tool.is_empty())
        .map(|r| ToolCallRequest {
            id: format!("call_{}", &uuid::Uuid::new_v4().simple().to_string()[..8]),
            name: r.tool,
            args: r.args,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_call() {
        let calls = parse_tool_calls(r#"{"tool": "echo", "args": {"text": "hi"}}"#);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "echo");
        assert_eq!(calls[0].args["text"], "hi");
    }

    #[test]
    fn parses_fenced_block_and_array() {
        let output = "Let me check.\n```json\n[{\"tool\": \"clock\", \"args\": {}}, {\"tool\": \"echo\", \"args\": {\"text\": \"x\"}}]\n```";
        let calls = parse_tool_calls(output);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].name, "clock");
        assert_eq!(calls[1].name, "echo");
    }

    #[test]
    fn plain_text_yields_no_calls() {
        assert!(parse_tool_calls("The answer is 42.").is_empty());
        assert!(parse_tool_calls("").is_empty());
        // 非调用形状的 JSON 也按文本处理
        assert!(parse_tool_calls(r#"{"answer": 42}"#).is_empty());
    }

    #[test]
    fn schema_block_lists_every_tool() {
        let tools = vec![
            ToolSpec {
                name: "echo".into(),
                description: "Echo text".into(),
                parameters: serde_json::json!({"type": "object"}),
            },
            ToolSpec {
                name: "clock".into(),
                description: "Current time".into(),
                parameters: serde_json::json!({"type": "object"}),
            },
        ];
        let block = render_tool_schema_block(&tools);
        assert!(block.contains("- echo:"));
        assert!(block.contains("- clock:"));
        assert!(block.contains("Tool call JSON Schema"));
        assert!(render_tool_schema_block(&[]).is_empty());
    }

    #[test]
    fn minted_ids_are_unique() {
        let calls = parse_tool_calls(
            r#"[{"tool": "echo", "args": {}}, {"tool": "echo", "args": {}}]"#,
        );
        assert_ne!(calls[0].id, calls[1].id);
    }
}
