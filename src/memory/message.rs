//! 消息数据模型
//!
//! 一条消息 = 角色 + 可空文本 + 工具调用记录 + 渲染段（流式轮次折叠而来）+
//! compressed 标记。消息顺序即对话时间顺序，永不重排；只有连续前缀会被标记
//! 为 compressed（由压缩引擎统一改写）。

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 消息角色（与补全服务 API 一致）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// 一次工具调用的完整记录：请求与结果通过 id 关联
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolRecord {
    /// 关联请求/响应的标识
    pub id: String,
    pub name: String,
    pub args: Value,
    /// 成功结果文本
    #[serde(default)]
    pub result: Option<String>,
    /// 失败原因；result 与 error 至多一个非空
    #[serde(default)]
    pub error: Option<String>,
}

impl ToolRecord {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// 供上下文拼装的结果文本（失败时为 Error: 前缀）
    pub fn output_text(&self) -> String {
        match (&self.result, &self.error) {
            (_, Some(e)) => format!("Error: {}", e),
            (Some(r), None) => r.clone(),
            (None, None) => String::new(),
        }
    }
}

/// 工具段的生命周期状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentStatus {
    Starting,
    Executing,
    Completed,
    Failed,
}

impl SegmentStatus {
    /// completed / failed 为终态；终态段不再被同名新调用复用
    pub fn is_terminal(&self) -> bool {
        matches!(self, SegmentStatus::Completed | SegmentStatus::Failed)
    }
}

/// 流式重建的输出单元：一段连续文本，或一次工具调用的生命周期
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Segment {
    Text {
        text: String,
    },
    ToolCall {
        name: String,
        args: Value,
        status: SegmentStatus,
        #[serde(default)]
        result: Option<String>,
        #[serde(default)]
        error: Option<String>,
    },
}

/// 单条消息
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    /// 纯工具调用的 assistant 消息可以没有文本
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub segments: Vec<Segment>,
    /// 落入已摘要前缀后置位，之后不再发给补全服务
    #[serde(default)]
    pub compressed: bool,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self::text(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::text(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::text(Role::Assistant, content)
    }

    /// 折叠一个流式轮次：最终文本 + 本轮全部工具记录与渲染段
    pub fn assistant_turn(
        content: Option<String>,
        tool_calls: Vec<ToolRecord>,
        segments: Vec<Segment>,
    ) -> Self {
        Self {
            role: Role::Assistant,
            content,
            tool_calls,
            segments,
            compressed: false,
        }
    }

    /// 工具结果消息：content 为结果文本，记录随消息携带以保留关联 id
    pub fn tool(record: ToolRecord) -> Self {
        Self {
            role: Role::Tool,
            content: Some(record.output_text()),
            tool_calls: vec![record],
            segments: Vec::new(),
            compressed: false,
        }
    }

    fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            segments: Vec::new(),
            compressed: false,
        }
    }

    /// 角色标签（渲染摘要输入、历史查询时使用）
    pub fn role_label(&self) -> &'static str {
        match self.role {
            Role::System => "System",
            Role::User => "User",
            Role::Assistant => "Assistant",
            Role::Tool => "Tool",
        }
    }

    pub fn content_text(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_message_carries_record_and_text() {
        let record = ToolRecord {
            id: "call_1".into(),
            name: "echo".into(),
            args: serde_json::json!({"text": "hi"}),
            result: Some("hi".into()),
            error: None,
        };
        let msg = Message::tool(record);
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.content.as_deref(), Some("hi"));
        assert_eq!(msg.tool_calls.len(), 1);
    }

    #[test]
    fn failed_record_renders_error_text() {
        let record = ToolRecord {
            id: "call_2".into(),
            name: "clock".into(),
            args: Value::Null,
            result: None,
            error: Some("timeout".into()),
        };
        assert!(record.is_error());
        assert_eq!(record.output_text(), "Error: timeout");
    }

    #[test]
    fn message_roundtrips_through_json() {
        let msg = Message::assistant_turn(
            Some("done".into()),
            vec![],
            vec![Segment::Text { text: "done".into() }],
        );
        let json = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back.role, Role::Assistant);
        assert_eq!(back.content.as_deref(), Some("done"));
        assert_eq!(back.segments.len(), 1);
    }
}
