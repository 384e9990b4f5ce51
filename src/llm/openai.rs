//! OpenAI 兼容 API 客户端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）。工具 schema
//! 以文本协议注入 system 消息，模型输出中的 JSON 调用由 protocol 模块解析。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;
use futures_util::stream;

use crate::llm::protocol::{parse_tool_calls, render_tool_schema_block};
use crate::llm::{
    CompletionClient, CompletionDelta, CompletionResponse, CompletionStream, ToolSpec, Usage,
};
use crate::memory::{Message, Role};

/// 模拟流式输出时每段字符数
const CHUNK_CHARS: usize = 6;

/// Token 使用统计（累计值）
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
    pub total_tokens: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
        self.total_tokens.fetch_add(prompt + completion, Ordering::Relaxed);
    }

    pub fn get(&self) -> (u64, u64, u64) {
        (
            self.prompt_tokens.load(Ordering::Relaxed),
            self.completion_tokens.load(Ordering::Relaxed),
            self.total_tokens.load(Ordering::Relaxed),
        )
    }
}

/// OpenAI 兼容客户端：持有 Client 与 model 名
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    model: String,
    /// 累计 token 使用统计
    pub usage: TokenUsage,
}

impl OpenAiClient {
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_else(|| "sk-placeholder".to_string());

        let config = if let Some(url) = base_url {
            OpenAIConfig::new().with_api_base(url).with_api_key(api_key)
        } else {
            OpenAIConfig::new().with_api_key(api_key)
        };

        Self {
            client: Client::with_config(config),
            model: model.to_string(),
            usage: TokenUsage::new(),
        }
    }

    /// 转为 API 消息格式；Tool 结果以 Observation 文本回灌，工具 schema
    /// 追加到首条 system 消息
    fn to_openai_messages(
        &self,
        messages: &[Message],
        tools: &[ToolSpec],
    ) -> Vec<ChatCompletionRequestMessage> {
        let schema_block = render_tool_schema_block(tools);
        let mut schema_pending = !schema_block.is_empty();

        let mut out = Vec::with_capacity(messages.len());
        for m in messages {
            let msg = match m.role {
                Role::System => {
                    let mut content = m.content_text().to_string();
                    if schema_pending {
                        content.push_str(&schema_block);
                        schema_pending = false;
                    }
                    ChatCompletionRequestMessage::System(
                        ChatCompletionRequestSystemMessageArgs::default()
                            .content(content)
                            .build()
                            .unwrap(),
                    )
                }
                Role::User => ChatCompletionRequestMessage::User(
                    ChatCompletionRequestUserMessageArgs::default()
                        .content(m.content_text().to_string())
                        .build()
                        .unwrap(),
                ),
                Role::Assistant => {
                    let content = if m.content.is_none() && !m.tool_calls.is_empty() {
                        m.tool_calls
                            .iter()
                            .map(|r| format!("Tool call: {} | Result: {}", r.name, r.output_text()))
                            .collect::<Vec<_>>()
                            .join("\n")
                    } else {
                        m.content_text().to_string()
                    };
                    ChatCompletionRequestMessage::Assistant(
                        ChatCompletionRequestAssistantMessageArgs::default()
                            .content(content)
                            .build()
                            .unwrap(),
                    )
                }
                Role::Tool => {
                    let name = m
                        .tool_calls
                        .first()
                        .map(|r| r.name.as_str())
                        .unwrap_or("tool");
                    ChatCompletionRequestMessage::User(
                        ChatCompletionRequestUserMessageArgs::default()
                            .content(format!("Observation from {}: {}", name, m.content_text()))
                            .build()
                            .unwrap(),
                    )
                }
            };
            out.push(msg);
        }

        // 上下文中没有 system 消息时，工具说明单独成块放在最前
        if schema_pending {
            out.insert(
                0,
                ChatCompletionRequestMessage::System(
                    ChatCompletionRequestSystemMessageArgs::default()
                        .content(schema_block)
                        .build()
                        .unwrap(),
                ),
            );
        }
        out
    }
}

#[async_trait]
impl CompletionClient for OpenAiClient {
    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }

    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolSpec],
    ) -> Result<CompletionResponse, String> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(self.to_openai_messages(messages, tools))
            .build()
            .map_err(|e| e.to_string())?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| e.to_string())?;

        let mut usage = Usage::default();
        if let Some(u) = &response.usage {
            self.usage.add(u.prompt_tokens as u64, u.completion_tokens as u64);
            usage = Usage {
                prompt_tokens: u.prompt_tokens as u64,
                completion_tokens: u.completion_tokens as u64,
                total_tokens: u.total_tokens as u64,
            };
        }

        let content = response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();

        let tool_calls = parse_tool_calls(&content);
        if tool_calls.is_empty() {
            Ok(CompletionResponse {
                content: Some(content),
                tool_calls: Vec::new(),
                usage,
            })
        } else {
            Ok(CompletionResponse {
                content: None,
                tool_calls,
                usage,
            })
        }
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
