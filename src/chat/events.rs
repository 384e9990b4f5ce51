//! 轮次过程事件：流式变体向调用方推送的增量（文本片段、工具生命周期、
//! 压缩起止与轮次完成）

use serde::Serialize;

/// 单轮过程事件（可序列化为 JSON 供前端展示）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    /// 一小段增量文本
    TextDelta { text: String },
    /// 工具调用已请求
    ToolStarting {
        id: String,
        tool: String,
        args: serde_json::Value,
    },
    /// 工具正在执行
    ToolExecuting { id: String, tool: String },
    /// 工具执行完成（预览，避免过长）
    ToolCompleted {
        id: String,
        tool: String,
        preview: String,
    },
    /// 工具执行失败
    ToolFailed {
        id: String,
        tool: String,
        reason: String,
    },
    /// 压缩开始（合成事件）
    CompactionStarted { session_id: String },
    /// 压缩结束；失败时 ok = false，计数保持原值
    CompactionFinished {
        session_id: String,
        ok: bool,
        compressed_message_count: usize,
    },
    /// 轮次完成：最终回复与本轮 token 用量
    TurnDone {
        response: String,
        prompt_tokens: u64,
        completion_tokens: u64,
        total_tokens: u64,
    },
    /// 错误
    Error { text: String },
}
