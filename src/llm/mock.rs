//! Mock 补全客户端（用于测试，无需 API）
//!
//! 按脚本顺序弹出预置响应；脚本耗尽时回显最后一条 User 消息。记录每次调用
//! 收到的消息列表，供测试断言有效上下文的形状。

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream;

use crate::llm::{
    CompletionClient, CompletionDelta, CompletionResponse, CompletionStream, ToolCallRequest,
    ToolSpec, Usage,
};
use crate::memory::{Message, Role};

/// 模拟流式输出时每段字符数
const CHUNK_CHARS: usize = 6;

/// Mock 客户端：脚本化响应 + 调用记录
#[derive(Default)]
pub struct MockCompletionClient {
    script: Mutex<VecDeque<Result<CompletionResponse, String>>>,
    /// 每次 complete 收到的消息列表（测试断言用）
    seen: Mutex<Vec<Vec<Message>>>,
    /// 每次响应前的人工延迟，用于构造并发交织
    delay: Option<Duration>,
}

impl MockCompletionClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 预置一段脚本
    pub fn scripted(responses: Vec<CompletionResponse>) -> Self {
        let client = Self::new();
        for r in responses {
            client.push(r);
        }
        client
    }

    pub fn push(&self, response: CompletionResponse) {
        self.script
            .lock()
            .unwrap()
            .push_back(Ok(response));
    }

    pub fn push_error(&self, error: impl Into<String>) {
        self.script.lock().unwrap().push_back(Err(error.into()));
    }

    /// 每次响应前 sleep 指定时长
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// 便捷构造：纯文本响应
    pub fn text_response(content: impl Into<String>, total_tokens: u64) -> CompletionResponse {
        CompletionResponse {
            content: Some(content.into()),
            tool_calls: Vec::new(),
            usage: Usage {
                prompt_tokens: total_tokens / 2,
                completion_tokens: total_tokens - total_tokens / 2,
                total_tokens,
            },
        }
    }

    /// 便捷构造：工具调用响应
    pub fn tool_response(calls: Vec<(&str, serde_json::Value)>, total_tokens: u64) -> CompletionResponse {
        CompletionResponse {
            content: None,
            tool_calls: calls
                .into_iter()
                .enumerate()
                .map(|(i, (name, args))| ToolCallRequest {
                    id: format!("call_{}", i),
                    name: name.to_string(),
                    args,
                })
                .collect(),
            usage: Usage {
                prompt_tokens: total_tokens,
                completion_tokens: 0,
                total_tokens,
            },
        }
    }

    /// 历次调用收到的消息列表
    pub fn seen_contexts(&self) -> Vec<Vec<Message>> {
        self.seen.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

#[async_trait]
impl CompletionClient for MockCompletionClient {
    async fn complete(
        &self,
        messages: &[Message],
        _tools: &[ToolSpec],
    ) -> Result<CompletionResponse, String> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.seen.lock().unwrap().push(messages.to_vec());

        if let Some(scripted) = self.script.lock().unwrap().pop_front() {
            return scripted;
        }

        // 脚本耗尽：回显最后一条 User 消息
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content_text())
            .unwrap_or("(no input)");
        Ok(CompletionResponse {
            content: Some(format!("Echo from Mock: {}", last_user)),
            tool_calls: Vec::new(),
            usage: Usage::default(),
        })
    }

    async fn complete_stream(
        &self,
        messages: &[Message],
        tools: &[ToolSpec],
    ) -> Result<CompletionStream, String> {
        let response = self.complete(messages, tools).await?;
        let mut items: Vec<Result<CompletionDelta, String>> = Vec::new();
        if let Some(content) = &response.content {
            let chars: Vec<char> = content.chars().collect();
            for chunk in chars.chunks(CHUNK_CHARS) {
                items.push(Ok(CompletionDelta::Text(chunk.iter().collect())));
            }
        }
        items.push(Ok(CompletionDelta::Done(response)));
        Ok(Box::pin(stream::iter(items)))
    }
}
