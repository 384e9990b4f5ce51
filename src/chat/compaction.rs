//! 上下文压缩引擎
//!
//! 由上一轮补全服务报告的 token 用量触发：把除最近 K 条之外的前缀发给补全
//! 服务做摘要，成功后整体替换压缩元数据并标记前缀。发给补全服务的有效上下文
//! = system 消息 + （如有摘要）一条说明摘要替代了更早消息的合成 system 块 +
//! 压缩边界之后的全部消息。

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::core::ChatError;
use crate::llm::CompletionClient;
use crate::memory::{Message, Role, TokenEstimator, Transcript};

/// 摘要指令（独立于会话自身的 system prompt）
const SUMMARIZE_SYSTEM: &str = "You summarize conversations. Write a concise summary of the \
conversation below that preserves facts, decisions, user preferences, tool results that still \
matter, and any unresolved tasks. Reply with the summary text only.";

/// 压缩配置
#[derive(Debug, Clone)]
pub struct CompactionConfig {
    /// 上一轮报告的 total_tokens 达到该值即触发压缩
    pub token_threshold: u64,
    /// 压缩时保留的最近消息条数（可为 0）
    pub keep_recent: usize,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            token_threshold: 6000,
            keep_recent: 4,
        }
    }
}

/// 压缩引擎：触发判断、摘要生成、前缀改写、有效上下文构建
pub struct CompactionEngine {
    llm: Arc<dyn CompletionClient>,
    /// 运行时可调（阈值 / 保留窗口 setter 暴露给路由层）
    config: std::sync::RwLock<CompactionConfig>,
}

impl CompactionEngine {
    pub fn new(llm: Arc<dyn CompletionClient>, config: CompactionConfig) -> Self {
        Self {
            llm,
            config: std::sync::RwLock::new(config),
        }
    }

    pub fn config(&self) -> CompactionConfig {
        self.config.read().expect("compaction config poisoned").clone()
    }

    /// 运行时更新阈值与保留窗口；越界值立刻拒绝，无副作用
    pub fn set_config(&self, config: CompactionConfig) -> Result<(), ChatError> {
        if config.token_threshold == 0 {
            return Err(ChatError::InvalidSetting(
                "compaction token_threshold must be at least 1".into(),
            ));
        }
        *self.config.write().expect("compaction config poisoned") = config;
        Ok(())
    }

    /// 转录规模的廉价 token 估算（触发启发式，非计费口径）
    pub fn estimate_cost(messages: &[Message]) -> usize {
        TokenEstimator::estimate_messages(messages)
    }

    /// 纯谓词：上一轮用量是否达到阈值
    pub fn should_compact(&self, observed_tokens: u64) -> bool {
        observed_tokens >= self.config().token_threshold
    }

    /// 是否允许（再次）压缩：尚无摘要，或自上次压缩以来保留窗口之外
    /// 又积累了新消息
    pub fn can_recompact(&self, transcript: &Transcript) -> bool {
        transcript.compaction.summary.is_none()
            || transcript.uncompressed_count() > self.config().keep_recent + 1
    }

    /// 把前缀渲染为带角色标签的纯文本，附工具使用说明
    fn render_prefix(prefix: &[Message]) -> String {
        let mut lines = Vec::with_capacity(prefix.len());
        for m in prefix {
            let mut line = format!("{}: {}", m.role_label(), m.content_text());
            if m.role == Role::Assistant && !m.tool_calls.is_empty() {
                let tools: Vec<&str> = m.tool_calls.iter().map(|r| r.name.as_str()).collect();
                line.push_str(&format!(" [tools used: {}]", tools.join(", ")));
            }
            lines.push(line);
        }
        lines.join("\n")
    }

    /// 生成前缀摘要；任何失败都作为「压缩失败」上抛，绝不当成空摘要成功
    pub async fn summarize(&self, prefix: &[Message]) -> Result<String, ChatError> {
        let rendered = Self::render_prefix(prefix);
        let request = vec![Message::system(SUMMARIZE_SYSTEM), Message::user(rendered)];
        let response = self
            .llm
            .complete(&request, &[])
            .await
            .map_err(ChatError::CompactionFailed)?;

        match response.content {
            Some(text) if !text.trim().is_empty() => Ok(text),
            _ => Err(ChatError::CompactionFailed(
                "summarizer returned no text".to_string(),
            )),
        }
    }

    /// 压缩一个会话：选前缀、摘要、替换元数据并标记
    ///
    /// 摘要调用期间不持转录锁（挂起点不持锁）；此间追加的新消息位于前缀
    /// 边界之后，不受改写影响。返回新的 compressed_message_count。
    pub async fn compact(&self, transcript: &Arc<Mutex<Transcript>>) -> Result<usize, ChatError> {
        let keep_recent = self.config().keep_recent;
        let (prefix, prefix_len) = {
            let t = transcript.lock().await;
            let total = t.len();
            if total < keep_recent + 1 {
                return Err(ChatError::NothingToCompact);
            }
            if !self.can_recompact(&t) {
                return Err(ChatError::NoNewMessagesToCompact);
            }
            let prefix_len = total - keep_recent;
            (t.messages()[..prefix_len].to_vec(), prefix_len)
        };

        let summary = self.summarize(&prefix).await?;

        let mut t = transcript.lock().await;
        t.apply_compaction(summary, prefix_len);
        tracing::info!(
            compressed_message_count = t.compaction.compressed_message_count,
            "transcript compacted"
        );
        Ok(t.compaction.compressed_message_count)
    }

    /// 构建实际发给补全服务的消息列表
    pub fn build_effective_context(&self, transcript: &Transcript, system_message: &str) -> Vec<Message> {
        let mut out = Vec::with_capacity(2 + transcript.uncompressed_count());
        out.push(Message::system(system_message));
        if let Some(summary) = &transcript.compaction.summary {
            out.push(Message::system(format!(
                "The {} earliest messages of this conversation were replaced by this summary:\n\n{}",
                transcript.compaction.compressed_message_count, summary
            )));
        }
        out.extend(transcript.tail().iter().cloned());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockCompletionClient;

    fn engine_with(
        client: MockCompletionClient,
        keep_recent: usize,
    ) -> CompactionEngine {
        CompactionEngine::new(
            Arc::new(client),
            CompactionConfig {
                token_threshold: 100,
                keep_recent,
            },
        )
    }

    fn transcript_with(n: usize) -> Arc<Mutex<Transcript>> {
        let mut t = Transcript::new();
        for i in 0..n {
            if i % 2 == 0 {
                t.push(Message::user(format!("question {}", i)));
            } else {
                t.push(Message::assistant(format!("answer {}", i)));
            }
        }
        Arc::new(Mutex::new(t))
    }

    #[test]
    fn should_compact_is_a_threshold_predicate() {
        let engine = engine_with(MockCompletionClient::new(), 2);
        assert!(!engine.should_compact(99));
        assert!(engine.should_compact(100));
        assert!(engine.should_compact(101));
    }

    #[tokio::test]
    async fn effective_context_without_summary_is_system_plus_all() {
        let engine = engine_with(MockCompletionClient::new(), 2);
        let transcript = transcript_with(5);
        let t = transcript.lock().await;
        let ctx = engine.build_effective_context(&t, "You are helpful.");
        assert_eq!(ctx.len(), 1 + 5);
        assert_eq!(ctx[0].role, Role::System);
    }

    #[tokio::test]
    async fn effective_context_with_summary_is_two_plus_tail() {
        let client = MockCompletionClient::scripted(vec![MockCompletionClient::text_response(
            "they talked",
            10,
        )]);
        let engine = engine_with(client, 2);
        let transcript = transcript_with(7);
        engine.compact(&transcript).await.unwrap();

        let t = transcript.lock().await;
        assert_eq!(t.compaction.compressed_message_count, 5);
        let ctx = engine.build_effective_context(&t, "sys");
        // 2 + (转录长度 - compressed_message_count)
        assert_eq!(ctx.len(), 2 + (7 - 5));
        assert!(ctx[1].content_text().contains("they talked"));
    }

    #[tokio::test]
    async fn compact_requires_enough_messages() {
        let engine = engine_with(MockCompletionClient::new(), 2);
        let transcript = transcript_with(2);
        let err = engine.compact(&transcript).await.unwrap_err();
        assert!(matches!(err, ChatError::NothingToCompact));
    }

    #[tokio::test]
    async fn recompaction_needs_new_messages_past_keep_window() {
        let client = MockCompletionClient::new();
        client.push(MockCompletionClient::text_response("first summary", 10));
        client.push(MockCompletionClient::text_response("second summary", 10));
        let engine = engine_with(client, 2);

        // 7 条消息，keep_recent = 2：压缩前 5 条
        let transcript = transcript_with(7);
        assert_eq!(engine.compact(&transcript).await.unwrap(), 5);

        // 只追加 1 条（共 8）：保留窗口之外没有新内容，拒绝
        transcript.lock().await.push(Message::user("one more"));
        let err = engine.compact(&transcript).await.unwrap_err();
        assert!(matches!(err, ChatError::NoNewMessagesToCompact));

        // 再追加 1 条（共 9）：允许重新压缩，摘要整体替换
        transcript.lock().await.push(Message::assistant("reply"));
        assert_eq!(engine.compact(&transcript).await.unwrap(), 7);
        let t = transcript.lock().await;
        assert_eq!(t.compaction.summary.as_deref(), Some("second summary"));
    }

    #[tokio::test]
    async fn summarize_failure_leaves_transcript_untouched() {
        let client = MockCompletionClient::new();
        client.push_error("upstream 500");
        let engine = engine_with(client, 2);
        let transcript = transcript_with(7);

        let err = engine.compact(&transcript).await.unwrap_err();
        assert!(matches!(err, ChatError::CompactionFailed(_)));
        let t = transcript.lock().await;
        assert!(t.compaction.summary.is_none());
        assert_eq!(t.compaction.compressed_message_count, 0);
        assert!(t.messages().iter().all(|m| !m.compressed));
    }

    #[tokio::test]
    async fn empty_summary_is_a_failure_not_a_success() {
        let client = MockCompletionClient::new();
        client.push(MockCompletionClient::text_response("   ", 1));
        let engine = engine_with(client, 2);
        let transcript = transcript_with(7);
        let err = engine.compact(&transcript).await.unwrap_err();
        assert!(matches!(err, ChatError::CompactionFailed(_)));
    }

    #[tokio::test]
    async fn keep_recent_zero_compacts_everything() {
        let client = MockCompletionClient::scripted(vec![MockCompletionClient::text_response(
            "all of it",
            10,
        )]);
        let engine = engine_with(client, 0);
        let transcript = transcript_with(3);
        assert_eq!(engine.compact(&transcript).await.unwrap(), 3);
        let t = transcript.lock().await;
        assert_eq!(t.uncompressed_count(), 0);
    }

    #[test]
    fn set_config_rejects_zero_threshold() {
        let engine = engine_with(MockCompletionClient::new(), 2);
        let err = engine
            .set_config(CompactionConfig {
                token_threshold: 0,
                keep_recent: 2,
            })
            .unwrap_err();
        assert!(matches!(err, ChatError::InvalidSetting(_)));
        // 原配置不受影响
        assert_eq!(engine.config().token_threshold, 100);

        engine
            .set_config(CompactionConfig {
                token_threshold: 64,
                keep_recent: 0,
            })
            .unwrap();
        assert!(engine.should_compact(64));
    }

    #[test]
    fn estimate_cost_grows_with_transcript() {
        let short = vec![Message::user("hi")];
        let long = vec![
            Message::user("a much longer message with plenty of words in it"),
            Message::assistant("and an equally verbose reply that goes on and on"),
        ];
        assert!(CompactionEngine::estimate_cost(&long) > CompactionEngine::estimate_cost(&short));
    }
}
