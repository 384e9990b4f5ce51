//! 互斥层：会话级压缩锁 + 全局 driver 令牌
//!
//! 压缩锁是按会话 ID 的 held/free 标志（粗粒度 Mutex 保护的集合），
//! try_acquire 已持有时直接跳过，RAII guard 保证任何退出路径都会释放。
//! driver 令牌是进程内唯一的「当前驱动者」记录：同一时刻至多一个逻辑轮
//! （用户请求或调度器）驱动对外可见的 proactive 对话流，释放时校验令牌身份，
//! 防止过期调用方误释放他人的持有。

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// 会话级压缩锁表
#[derive(Default)]
pub struct CompactionLocks {
    held: Mutex<HashSet<String>>,
}

impl CompactionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// 尝试获取某会话的压缩锁；已持有时返回 None（调用方应报告「进行中」而非等待）
    pub fn try_acquire(self: &Arc<Self>, session_id: &str) -> Option<CompactionGuard> {
        let mut held = self.held.lock().expect("compaction lock table poisoned");
        if held.contains(session_id) {
            return None;
        }
        held.insert(session_id.to_string());
        Some(CompactionGuard {
            locks: Arc::clone(self),
            session_id: session_id.to_string(),
        })
    }

    /// 是否持有
    pub fn is_held(&self, session_id: &str) -> bool {
        self.held
            .lock()
            .expect("compaction lock table poisoned")
            .contains(session_id)
    }

    /// 清除某会话的锁状态（会话删除/过期清理时调用）
    pub fn clear(&self, session_id: &str) {
        self.held
            .lock()
            .expect("compaction lock table poisoned")
            .remove(session_id);
    }
}

/// 压缩锁 guard：Drop 时释放，保证异常路径也能解锁
pub struct CompactionGuard {
    locks: Arc<CompactionLocks>,
    session_id: String,
}

impl Drop for CompactionGuard {
    fn drop(&mut self) {
        self.locks.clear(&self.session_id);
    }
}

/// driver 令牌的来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverSource {
    /// 用户请求驱动
    User,
    /// 调度器定时触发
    Scheduler,
    /// 手动触发（绕过定时器）
    Manual,
}

impl std::fmt::Display for DriverSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DriverSource::User => write!(f, "user"),
            DriverSource::Scheduler => write!(f, "scheduler"),
            DriverSource::Manual => write!(f, "manual"),
        }
    }
}

/// 当前持有者信息（status() 与冲突报告中返回）
#[derive(Debug, Clone)]
pub struct DriverHolder {
    pub token: Uuid,
    pub source: DriverSource,
    pub session_id: String,
    pub acquired_at: DateTime<Utc>,
}

impl std::fmt::Display for DriverHolder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} (session {}, since {})",
            self.source, self.session_id, self.acquired_at
        )
    }
}

/// 全局 driver 槽位：原子交换的可选持有者记录
#[derive(Default)]
pub struct DriverSlot {
    holder: Mutex<Option<DriverHolder>>,
}

impl DriverSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// 无人持有时记录持有者并返回唯一令牌；否则返回当前持有者信息
    pub fn try_acquire(
        &self,
        source: DriverSource,
        session_id: &str,
    ) -> Result<Uuid, DriverHolder> {
        let mut holder = self.holder.lock().expect("driver slot poisoned");
        if let Some(current) = holder.as_ref() {
            return Err(current.clone());
        }
        let token = Uuid::new_v4();
        *holder = Some(DriverHolder {
            token,
            source,
            session_id: session_id.to_string(),
            acquired_at: Utc::now(),
        });
        Ok(token)
    }

    /// 仅当令牌与当前持有者匹配时清除持有；返回是否实际释放
    pub fn release(&self, token: Uuid) -> bool {
        let mut holder = self.holder.lock().expect("driver slot poisoned");
        match holder.as_ref() {
            Some(current) if current.token == token => {
                *holder = None;
                true
            }
            _ => false,
        }
    }

    /// 当前持有状态
    pub fn status(&self) -> Option<DriverHolder> {
        self.holder.lock().expect("driver slot poisoned").clone()
    }
}
