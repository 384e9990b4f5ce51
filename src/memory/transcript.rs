//! 会话转录：有序消息列表 + 压缩元数据
//!
//! 消息只会追加；压缩改写只发生在 apply_compaction 中，保证
//! compressed_message_count 单调不减且只标记连续前缀。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::memory::Message;

/// 每个会话一份的压缩元数据
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CompactionMeta {
    /// 最近一次成功压缩生成的摘要
    pub summary: Option<String>,
    pub compressed_at: Option<DateTime<Utc>>,
    /// 已摘要前缀的长度；只增不减，重新压缩时整体替换
    pub compressed_message_count: usize,
}

/// 一个会话的完整转录
#[derive(Clone, Debug, Default)]
pub struct Transcript {
    messages: Vec<Message>,
    pub compaction: CompactionMeta,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从持久化数据恢复
    pub fn from_parts(messages: Vec<Message>, compaction: CompactionMeta) -> Self {
        Self {
            messages,
            compaction,
        }
    }

    pub fn push(&mut self, msg: Message) {
        self.messages.push(msg);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// 未被摘要覆盖的消息数
    pub fn uncompressed_count(&self) -> usize {
        self.messages
            .len()
            .saturating_sub(self.compaction.compressed_message_count)
    }

    /// 摘要边界之后的消息（发给补全服务的尾部）
    pub fn tail(&self) -> &[Message] {
        &self.messages[self.compaction.compressed_message_count.min(self.messages.len())..]
    }

    /// 应用一次成功的压缩：替换元数据并标记前缀
    ///
    /// prefix_len 不回退（单调性）也不越过当前长度；压缩期间追加的新消息
    /// 位于边界之后，不受影响。
    pub fn apply_compaction(&mut self, summary: String, prefix_len: usize) {
        let prefix_len = prefix_len
            .min(self.messages.len())
            .max(self.compaction.compressed_message_count);
        for msg in &mut self.messages[..prefix_len] {
            msg.compressed = true;
        }
        self.compaction = CompactionMeta {
            summary: Some(summary),
            compressed_at: Some(Utc::now()),
            compressed_message_count: prefix_len,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transcript_with(n: usize) -> Transcript {
        let mut t = Transcript::new();
        for i in 0..n {
            t.push(Message::user(format!("msg {}", i)));
        }
        t
    }

    #[test]
    fn compressed_count_is_monotone_and_bounded() {
        let mut t = transcript_with(7);
        t.apply_compaction("first".into(), 5);
        assert_eq!(t.compaction.compressed_message_count, 5);

        // 更短的前缀不会让计数回退
        t.apply_compaction("stale".into(), 3);
        assert_eq!(t.compaction.compressed_message_count, 5);

        // 永不超过转录长度
        t.apply_compaction("huge".into(), 100);
        assert_eq!(t.compaction.compressed_message_count, 7);
        assert!(t.compaction.compressed_message_count <= t.len());
    }

    #[test]
    fn only_contiguous_prefix_is_marked() {
        let mut t = transcript_with(6);
        t.apply_compaction("sum".into(), 4);
        let flags: Vec<bool> = t.messages().iter().map(|m| m.compressed).collect();
        assert_eq!(flags, vec![true, true, true, true, false, false]);
    }

    #[test]
    fn recompaction_replaces_summary() {
        let mut t = transcript_with(9);
        t.apply_compaction("first".into(), 5);
        t.apply_compaction("second".into(), 7);
        assert_eq!(t.compaction.summary.as_deref(), Some("second"));
        assert_eq!(t.compaction.compressed_message_count, 7);
    }

    #[test]
    fn appends_during_compaction_stay_past_boundary() {
        let mut t = transcript_with(5);
        // 压缩决定覆盖前 3 条后又有新消息追加
        t.push(Message::user("late"));
        t.apply_compaction("sum".into(), 3);
        assert!(!t.messages()[5].compressed);
        assert_eq!(t.uncompressed_count(), 3);
    }
}
