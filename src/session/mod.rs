//! 会话存储
//!
//! session_id -> 转录 + 活跃时间的内存表。首次引用时创建（新会话或从持久化
//! 懒加载）；后台定时清理超过 TTL 未活跃的会话。会话不存在是合法状态而非错误。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::core::CompactionLocks;
use crate::memory::{Transcript, TranscriptStore};

/// 会话 ID
pub type SessionId = String;

/// 表项：转录本体 + 活跃元数据
struct SessionEntry {
    transcript: Arc<Mutex<Transcript>>,
    last_active: Instant,
    created_at: DateTime<Utc>,
}

/// 会话管理器
pub struct SessionManager {
    sessions: RwLock<HashMap<SessionId, SessionEntry>>,
    /// 超过该时长未活跃的会话会被 sweep 移除
    ttl: Duration,
    store: Arc<dyn TranscriptStore>,
    /// 删除会话时需要一并清除其压缩锁状态
    locks: Arc<CompactionLocks>,
}

impl SessionManager {
    pub fn new(
        ttl_secs: u64,
        store: Arc<dyn TranscriptStore>,
        locks: Arc<CompactionLocks>,
    ) -> Self {
        Self::with_ttl(Duration::from_secs(ttl_secs), store, locks)
    }

    pub fn with_ttl(
        ttl: Duration,
        store: Arc<dyn TranscriptStore>,
        locks: Arc<CompactionLocks>,
    ) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl,
            store,
            locks,
        }
    }

    /// 获取或创建会话，并记录活跃时间
    ///
    /// 内存中不存在时先尝试从持久化加载；加载失败只告警并退回空转录，
    /// 不让一次读盘问题挡住当前轮。
    pub async fn get_or_create(&self, session_id: &str) -> Arc<Mutex<Transcript>> {
        {
            let mut sessions = self.sessions.write().await;
            if let Some(entry) = sessions.get_mut(session_id) {
                entry.last_active = Instant::now();
                return Arc::clone(&entry.transcript);
            }
        }

        // 写锁之外做 IO，避免挂起点持锁
        let loaded = match self.store.load(session_id).await {
            Ok(Some((messages, meta))) => {
                tracing::info!(session_id, messages = messages.len(), "session loaded from store");
                Transcript::from_parts(messages, meta)
            }
            Ok(None) => Transcript::new(),
            Err(e) => {
                tracing::warn!(session_id, error = %e, "session load failed, starting empty");
                Transcript::new()
            }
        };

        let mut sessions = self.sessions.write().await;
        // IO 期间可能有并发调用已经插入，保留先到者
        let entry = sessions.entry(session_id.to_string()).or_insert_with(|| SessionEntry {
            transcript: Arc::new(Mutex::new(loaded)),
            last_active: Instant::now(),
            created_at: Utc::now(),
        });
        entry.last_active = Instant::now();
        Arc::clone(&entry.transcript)
    }

    /// 仅记录活跃时间，不动转录
    pub async fn touch(&self, session_id: &str) {
        let mut sessions = self.sessions.write().await;
        if let Some(entry) = sessions.get_mut(session_id) {
            entry.last_active = Instant::now();
        }
    }

    /// 删除会话：转录、压缩元数据与锁状态一并移除；返回是否存在
    pub async fn delete(&self, session_id: &str) -> bool {
        let removed = self.sessions.write().await.remove(session_id).is_some();
        self.locks.clear(session_id);
        removed
    }

    /// 移除所有超过 TTL 未活跃的会话；幂等，可与正常流量并发
    ///
    /// 年龄检查与删除在同一把写锁内完成，删除按 id 整体移除，不存在部分删除。
    pub async fn sweep(&self) -> usize {
        let mut sessions = self.sessions.write().await;
        let expired: Vec<SessionId> = sessions
            .iter()
            .filter(|(_, entry)| entry.last_active.elapsed() > self.ttl)
            .map(|(id, _)| id.clone())
            .collect();

        for id in &expired {
            sessions.remove(id);
            self.locks.clear(id);
        }
        if !expired.is_empty() {
            tracing::info!(evicted = expired.len(), "session sweep");
        }
        expired.len()
    }

    /// 启动后台清理任务（默认每小时一次）
    pub fn spawn_sweeper(self: &Arc<Self>, interval_secs: u64) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let period = Duration::from_secs(interval_secs.max(1));
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                ticker.tick().await;
                manager.sweep().await;
            }
        })
    }

    pub async fn active_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn contains(&self, session_id: &str) -> bool {
        self.sessions.read().await.contains_key(session_id)
    }

    pub async fn created_at(&self, session_id: &str) -> Option<DateTime<Utc>> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .map(|e| e.created_at)
    }

    /// 会话历史（供前端展示）：(角色, 文本) 的最近 limit 条
    pub async fn history(&self, session_id: &str, limit: Option<usize>) -> Vec<(String, String)> {
        let transcript = {
            let sessions = self.sessions.read().await;
            match sessions.get(session_id) {
                Some(entry) => Arc::clone(&entry.transcript),
                None => return Vec::new(),
            }
        };
        let transcript = transcript.lock().await;
        let messages = transcript.messages();
        let skip = match limit {
            Some(l) => messages.len().saturating_sub(l),
            None => 0,
        };
        messages[skip..]
            .iter()
            .map(|m| (m.role_label().to_string(), m.content_text().to_string()))
            .collect()
    }
}
