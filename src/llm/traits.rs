//! 补全服务客户端抽象
//!
//! 所有后端（OpenAI 兼容 / Mock）实现 CompletionClient：complete 返回最终文本
//! 或一组工具调用请求（附 usage 统计）；complete_stream 在最终结果前先吐出
//! 增量文本片段。

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::memory::Message;

/// 单轮补全的 token 用量
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl Usage {
    pub fn add(&mut self, other: Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// 传给补全服务的工具描述（注册表导出）
#[derive(Clone, Debug, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// 补全服务请求的一次工具调用
#[derive(Clone, Debug)]
pub struct ToolCallRequest {
    /// 关联请求与结果的标识
    pub id: String,
    pub name: String,
    pub args: Value,
}

/// 补全结果：最终文本或工具调用请求列表，二者至少其一
#[derive(Clone, Debug, Default)]
pub struct CompletionResponse {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCallRequest>,
    pub usage: Usage,
}

/// 流式增量：文本片段若干，最后一条为完整结果（含工具请求与 usage）
#[derive(Clone, Debug)]
pub enum CompletionDelta {
    Text(String),
    Done(CompletionResponse),
}

pub type CompletionStream = Pin<Box<dyn Stream<Item = Result<CompletionDelta, String>> + Send>>;

/// 补全服务客户端 trait
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// 非流式补全
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolSpec],
    ) -> Result<CompletionResponse, String>;

    /// 流式补全：增量文本在前，Done 收尾
    async fn complete_stream(
        &self,
        messages: &[Message],
        tools: &[ToolSpec],
    ) -> Result<CompletionStream, String>;

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
