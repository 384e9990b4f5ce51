//! 轮次编排器
//!
//! 一次完整轮次：解析会话 -> 追加来话 -> 构建有效上下文 -> 调补全服务
//! （工具请求循环，带轮数上限）-> 追加最终 assistant 消息 -> 评估压缩 ->
//! 持久化 -> 返回。流式变体把每个文本片段与工具生命周期事件经段装配器
//! 推给调用方，并补发压缩起止与轮次完成的合成事件。
//!
//! 所有共享表（会话、锁、driver 槽位）都是本服务对象的字段，进程生命周期内
//! 构造一次后传引用，不存在隐藏单例。

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::chat::compaction::CompactionEngine;
use crate::chat::events::TurnEvent;
use crate::chat::stream::SegmentAssembler;
use crate::core::{ChatError, CompactionLocks, DriverSlot, DriverSource};
use crate::llm::{CompletionClient, CompletionDelta, CompletionResponse, ToolCallRequest, Usage};
use crate::memory::{Message, SegmentStatus, ToolRecord, TranscriptStore};
use crate::session::SessionManager;
use crate::tools::ToolExecutor;

/// Observation 预览最大字符数
const OBSERVATION_PREVIEW_CHARS: usize = 200;

/// 服务级配置
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// proactive 对话流的会话 ID；驱动它的轮次必须持有全局 driver 令牌
    pub proactive_session_id: String,
    /// 默认 system prompt（proactive 轮次使用）
    pub system_prompt: String,
    /// 单轮工具请求循环的上限
    pub max_tool_rounds: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            proactive_session_id: "proactive".to_string(),
            system_prompt: "You are a helpful assistant.".to_string(),
            max_tool_rounds: 8,
        }
    }
}

/// 一轮的返回值：最终文本、工具调用记录、token 用量
#[derive(Debug)]
pub struct TurnOutcome {
    pub response: String,
    pub tool_records: Vec<ToolRecord>,
    pub usage: Usage,
}

fn emit(tx: Option<&UnboundedSender<TurnEvent>>, ev: TurnEvent) {
    if let Some(t) = tx {
        let _ = t.send(ev);
    }
}

fn preview(text: &str) -> String {
    if text.chars().count() > OBSERVATION_PREVIEW_CHARS {
        let cut: String = text.chars().take(OBSERVATION_PREVIEW_CHARS).collect();
        format!("{}...", cut)
    } else {
        text.to_string()
    }
}

/// 会话后端服务对象：持有全部共享状态，编排单轮流水线
pub struct ChatService {
    sessions: Arc<SessionManager>,
    llm: Arc<dyn CompletionClient>,
    tools: Arc<ToolExecutor>,
    store: Arc<dyn TranscriptStore>,
    compaction: CompactionEngine,
    locks: Arc<CompactionLocks>,
    driver: Arc<DriverSlot>,
    config: ServiceConfig,
}

impl ChatService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sessions: Arc<SessionManager>,
        llm: Arc<dyn CompletionClient>,
        tools: Arc<ToolExecutor>,
        store: Arc<dyn TranscriptStore>,
        compaction: CompactionEngine,
        locks: Arc<CompactionLocks>,
        driver: Arc<DriverSlot>,
        config: ServiceConfig,
    ) -> Self {
        Self {
            sessions,
            llm,
            tools,
            store,
            compaction,
            locks,
            driver,
            config,
        }
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn driver(&self) -> &Arc<DriverSlot> {
        &self.driver
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn completion_usage(&self) -> (u64, u64, u64) {
        self.llm.token_usage()
    }

    /// 运行时调整压缩阈值与保留窗口（路由层的配置 setter）
    pub fn set_compaction_config(
        &self,
        config: crate::chat::CompactionConfig,
    ) -> Result<(), ChatError> {
        self.compaction.set_config(config)
    }

    pub fn compaction_config(&self) -> crate::chat::CompactionConfig {
        self.compaction.config()
    }

    /// 阻塞变体：一次完整轮次
    pub async fn run_turn(
        &self,
        session_id: &str,
        text: &str,
        system_message: &str,
    ) -> Result<TurnOutcome, ChatError> {
        self.guarded_turn(session_id, text, system_message, None, &CancellationToken::new())
            .await
    }

    /// 流式变体：事件经 event_tx 实时推送；cancel 触发后丢弃本轮段状态
    pub async fn run_turn_streaming(
        &self,
        session_id: &str,
        text: &str,
        system_message: &str,
        event_tx: &UnboundedSender<TurnEvent>,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, ChatError> {
        self.guarded_turn(session_id, text, system_message, Some(event_tx), cancel)
            .await
    }

    /// 校验 + driver 令牌护栏；proactive 对话流同一时刻只允许一个驱动者
    async fn guarded_turn(
        &self,
        session_id: &str,
        text: &str,
        system_message: &str,
        event_tx: Option<&UnboundedSender<TurnEvent>>,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, ChatError> {
        if text.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }

        let permit = if session_id == self.config.proactive_session_id {
            match self.driver.try_acquire(DriverSource::User, session_id) {
                Ok(token) => Some(token),
                Err(holder) => {
                    return Err(ChatError::DriverBusy {
                        holder: holder.to_string(),
                    })
                }
            }
        } else {
            None
        };

        let result = self
            .turn_inner(session_id, text, system_message, event_tx, cancel)
            .await;
        if let Some(token) = permit {
            self.driver.release(token);
        }
        result
    }

    /// 流水线本体；调度器在已持有 driver 令牌时直接调用
    pub(crate) async fn turn_inner(
        &self,
        session_id: &str,
        text: &str,
        system_message: &str,
        event_tx: Option<&UnboundedSender<TurnEvent>>,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, ChatError> {
        // 1. 解析/创建会话并记录活跃
        let transcript = self.sessions.get_or_create(session_id).await;

        // 2. 追加来话（用户消息或 proactive 合成触发）
        transcript.lock().await.push(Message::user(text));

        let specs = self.tools.specs();
        let mut assembler = SegmentAssembler::new();
        let mut records: Vec<ToolRecord> = Vec::new();
        let mut usage = Usage::default();
        let mut last_round_usage = Usage::default();
        let mut rounds = 0usize;

        let loop_result: Result<CompletionResponse, ChatError> = 'turn: loop {
            if cancel.is_cancelled() {
                break 'turn Err(ChatError::Cancelled);
            }
            if rounds >= self.config.max_tool_rounds {
                break 'turn Err(ChatError::TooManyToolRounds(self.config.max_tool_rounds));
            }

            // 3. 构建有效上下文（摘要替代已压缩前缀）
            let context = {
                let t = transcript.lock().await;
                self.compaction.build_effective_context(&t, system_message)
            };

            // 4. 调补全服务；流式路径边收边推
            let response = match self
                .invoke_completion(&context, &specs, event_tx, &mut assembler, cancel)
                .await
            {
                Ok(r) => r,
                Err(e) => break 'turn Err(e),
            };
            usage.add(response.usage);
            last_round_usage = response.usage;

            if response.tool_calls.is_empty() {
                break 'turn Ok(response);
            }

            // 工具请求：逐个调用，结果作为 tool 消息回写转录
            for call in &response.tool_calls {
                if cancel.is_cancelled() {
                    break 'turn Err(ChatError::Cancelled);
                }
                let record = self.invoke_tool(call, event_tx, &mut assembler).await;
                transcript.lock().await.push(Message::tool(record.clone()));
                records.push(record);
            }
            rounds += 1;
        };

        match loop_result {
            Ok(response) => {
                // 5. 折叠最终 assistant 消息（文本 + 段 + 本轮工具记录）
                let assembled = assembler.text();
                let content = if assembled.is_empty() {
                    response.content
                } else {
                    Some(assembled)
                };
                transcript.lock().await.push(Message::assistant_turn(
                    content.clone(),
                    records.clone(),
                    assembler.into_segments(),
                ));

                // 6. 压缩评估（锁内执行，失败只记日志）
                self.maybe_compact(session_id, &transcript, last_round_usage.total_tokens, event_tx)
                    .await;

                // 7. 持久化（失败不让本轮失败）
                self.persist(session_id, &transcript).await;

                let outcome = TurnOutcome {
                    response: content.unwrap_or_default(),
                    tool_records: records,
                    usage,
                };
                emit(
                    event_tx,
                    TurnEvent::TurnDone {
                        response: outcome.response.clone(),
                        prompt_tokens: outcome.usage.prompt_tokens,
                        completion_tokens: outcome.usage.completion_tokens,
                        total_tokens: outcome.usage.total_tokens,
                    },
                );
                Ok(outcome)
            }
            Err(ChatError::Cancelled) => {
                // 取消：丢弃本轮段状态；已派发的远端工具调用不保证撤销
                emit(
                    event_tx,
                    TurnEvent::Error {
                        text: "Cancelled by caller".to_string(),
                    },
                );
                Err(ChatError::Cancelled)
            }
            Err(e) => {
                // 中途失败：已产出的文本仍落入转录
                let partial = assembler.text();
                if !partial.is_empty() {
                    transcript.lock().await.push(Message::assistant_turn(
                        Some(partial),
                        records.clone(),
                        assembler.into_segments(),
                    ));
                    self.persist(session_id, &transcript).await;
                }
                emit(event_tx, TurnEvent::Error { text: e.to_string() });
                Err(e)
            }
        }
    }

    /// 调一次补全服务；流式时文本片段进装配器并即时外发
    async fn invoke_completion(
        &self,
        context: &[Message],
        specs: &[crate::llm::ToolSpec],
        event_tx: Option<&UnboundedSender<TurnEvent>>,
        assembler: &mut SegmentAssembler,
        cancel: &CancellationToken,
    ) -> Result<CompletionResponse, ChatError> {
        match event_tx {
            Some(tx) => {
                let mut stream = self
                    .llm
                    .complete_stream(context, specs)
                    .await
                    .map_err(ChatError::CompletionFailed)?;
                let mut done: Option<CompletionResponse> = None;
                while let Some(item) = stream.next().await {
                    if cancel.is_cancelled() {
                        return Err(ChatError::Cancelled);
                    }
                    match item.map_err(ChatError::CompletionFailed)? {
                        CompletionDelta::Text(fragment) => {
                            assembler.on_text(&fragment);
                            emit(Some(tx), TurnEvent::TextDelta { text: fragment });
                        }
                        // Done 携带的正文已经以增量形式流过，这里只取结构化部分
                        CompletionDelta::Done(response) => done = Some(response),
                    }
                }
                done.ok_or_else(|| {
                    ChatError::CompletionFailed("stream ended without final response".to_string())
                })
            }
            None => {
                let response = self
                    .llm
                    .complete(context, specs)
                    .await
                    .map_err(ChatError::CompletionFailed)?;
                if let Some(content) = &response.content {
                    assembler.on_text(content);
                }
                Ok(response)
            }
        }
    }

    /// 调一次工具：生命周期事件贯穿装配器与外发通道，失败转为错误记录
    /// （结果回灌补全服务，由其决定如何继续）
    async fn invoke_tool(
        &self,
        call: &ToolCallRequest,
        event_tx: Option<&UnboundedSender<TurnEvent>>,
        assembler: &mut SegmentAssembler,
    ) -> ToolRecord {
        assembler.on_tool_event(&call.name, &call.args, SegmentStatus::Starting, None, None);
        emit(
            event_tx,
            TurnEvent::ToolStarting {
                id: call.id.clone(),
                tool: call.name.clone(),
                args: call.args.clone(),
            },
        );

        assembler.on_tool_event(&call.name, &call.args, SegmentStatus::Executing, None, None);
        emit(
            event_tx,
            TurnEvent::ToolExecuting {
                id: call.id.clone(),
                tool: call.name.clone(),
            },
        );

        match self.tools.invoke(&call.name, call.args.clone()).await {
            Ok(result) => {
                assembler.on_tool_event(
                    &call.name,
                    &call.args,
                    SegmentStatus::Completed,
                    Some(result.clone()),
                    None,
                );
                emit(
                    event_tx,
                    TurnEvent::ToolCompleted {
                        id: call.id.clone(),
                        tool: call.name.clone(),
                        preview: preview(&result),
                    },
                );
                ToolRecord {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    args: call.args.clone(),
                    result: Some(result),
                    error: None,
                }
            }
            Err(e) => {
                let reason = e.to_string();
                assembler.on_tool_event(
                    &call.name,
                    &call.args,
                    SegmentStatus::Failed,
                    None,
                    Some(reason.clone()),
                );
                emit(
                    event_tx,
                    TurnEvent::ToolFailed {
                        id: call.id.clone(),
                        tool: call.name.clone(),
                        reason: reason.clone(),
                    },
                );
                ToolRecord {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    args: call.args.clone(),
                    result: None,
                    error: Some(reason),
                }
            }
        }
    }

    /// 第 6 步：阈值满足且锁空闲且有新内容时，在锁内压缩；失败只记日志
    async fn maybe_compact(
        &self,
        session_id: &str,
        transcript: &Arc<tokio::sync::Mutex<crate::memory::Transcript>>,
        observed_tokens: u64,
        event_tx: Option<&UnboundedSender<TurnEvent>>,
    ) {
        // 服务端未报告用量时退回转录规模估算
        let observed = if observed_tokens > 0 {
            observed_tokens
        } else {
            let t = transcript.lock().await;
            CompactionEngine::estimate_cost(t.messages()) as u64
        };
        if !self.compaction.should_compact(observed) {
            return;
        }
        let Some(_guard) = self.locks.try_acquire(session_id) else {
            tracing::debug!(session_id, "compaction already in progress, skipping");
            return;
        };
        if !self.compaction.can_recompact(&*transcript.lock().await) {
            return;
        }

        emit(
            event_tx,
            TurnEvent::CompactionStarted {
                session_id: session_id.to_string(),
            },
        );
        match self.compaction.compact(transcript).await {
            Ok(count) => {
                emit(
                    event_tx,
                    TurnEvent::CompactionFinished {
                        session_id: session_id.to_string(),
                        ok: true,
                        compressed_message_count: count,
                    },
                );
            }
            Err(e) => {
                // 会话保留原有（或没有的）摘要，本轮照常成功
                tracing::warn!(session_id, error = %e, "compaction failed");
                let count = transcript.lock().await.compaction.compressed_message_count;
                emit(
                    event_tx,
                    TurnEvent::CompactionFinished {
                        session_id: session_id.to_string(),
                        ok: false,
                        compressed_message_count: count,
                    },
                );
            }
        }
    }

    /// 第 7 步：持久化；失败告警后吸收，内存态保持正确
    async fn persist(
        &self,
        session_id: &str,
        transcript: &Arc<tokio::sync::Mutex<crate::memory::Transcript>>,
    ) {
        let (messages, meta) = {
            let t = transcript.lock().await;
            (t.messages().to_vec(), t.compaction.clone())
        };
        if let Err(e) = self.store.save(session_id, &messages, &meta).await {
            tracing::warn!(session_id, error = %e, "persistence failed, session remains in memory");
        }
    }

    /// 手动压缩入口：锁冲突报告「进行中」，不排队不重试
    pub async fn compact_now(&self, session_id: &str) -> Result<usize, ChatError> {
        let Some(_guard) = self.locks.try_acquire(session_id) else {
            return Err(ChatError::CompactionInProgress(session_id.to_string()));
        };
        let transcript = self.sessions.get_or_create(session_id).await;
        let count = self.compaction.compact(&transcript).await?;
        self.persist(session_id, &transcript).await;
        Ok(count)
    }

    /// 删除会话：内存、锁状态与持久化一并移除
    pub async fn delete_session(&self, session_id: &str) {
        self.sessions.delete(session_id).await;
        if let Err(e) = self.store.delete(session_id).await {
            tracing::warn!(session_id, error = %e, "failed to delete persisted session");
        }
    }

    /// 会话历史（供前端展示）
    pub async fn history(&self, session_id: &str, limit: Option<usize>) -> Vec<(String, String)> {
        self.sessions.history(session_id, limit).await
    }
}
