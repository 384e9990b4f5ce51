//! Proactive 调度器
//!
//! 定时尝试获取全局 driver 令牌并以合成触发消息跑一轮编排器。tick 时若已有
//! 运行在进行中或令牌被占用则跳过并等下一个周期；手动触发走同一条
//! acquire/run/release 路径，冲突时报告「进行中」。无论成功失败，完成的运行
//! 都记录 last_triggered；被跳过的 tick 不记录。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;

use crate::chat::{ChatService, TurnOutcome};
use crate::core::{ChatError, DriverSource};

/// 合成触发消息（代替用户来话进入同一条流水线）
const PROACTIVE_TRIGGER: &str =
    "(proactive check-in) Review the conversation so far and decide whether there is anything \
     worth following up on. If nothing needs attention, reply briefly.";

/// 调度配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProactiveSettings {
    pub enabled: bool,
    pub interval_secs: u64,
}

impl Default for ProactiveSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: 900,
        }
    }
}

/// status() 返回的快照
#[derive(Debug, Clone)]
pub struct SchedulerStatus {
    pub enabled: bool,
    pub running: bool,
    pub interval_secs: u64,
    pub in_progress: bool,
    pub last_triggered: Option<DateTime<Utc>>,
}

struct SchedulerState {
    settings: Mutex<ProactiveSettings>,
    in_progress: AtomicBool,
    last_triggered: Mutex<Option<DateTime<Utc>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

/// Proactive 调度器
pub struct ProactiveScheduler {
    service: Arc<ChatService>,
    state: Arc<SchedulerState>,
}

impl ProactiveScheduler {
    pub fn new(service: Arc<ChatService>, settings: ProactiveSettings) -> Self {
        Self {
            service,
            state: Arc::new(SchedulerState {
                settings: Mutex::new(settings),
                in_progress: AtomicBool::new(false),
                last_triggered: Mutex::new(None),
                handle: Mutex::new(None),
            }),
        }
    }

    /// 按当前配置启动定时器（enabled = false 时不启动）
    pub fn start(&self) {
        let settings = self.state.settings.lock().unwrap().clone();
        if !settings.enabled {
            return;
        }
        let mut handle = self.state.handle.lock().unwrap();
        if handle.is_some() {
            return;
        }

        let service = Arc::clone(&self.service);
        let state = Arc::clone(&self.state);
        let period = Duration::from_secs(settings.interval_secs.max(1));
        *handle = Some(tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                ticker.tick().await;
                match Self::run_once(&service, &state, DriverSource::Scheduler).await {
                    Ok(_) => tracing::info!("proactive tick completed"),
                    Err(ChatError::AlreadyInProgress) | Err(ChatError::DriverBusy { .. }) => {
                        // 跳过本周期，等下一个 tick
                        tracing::debug!("proactive tick skipped");
                    }
                    Err(e) => tracing::warn!(error = %e, "proactive tick failed"),
                }
            }
        }));
    }

    /// 停止定时器（进行中的运行不被打断）
    pub fn stop(&self) {
        if let Some(handle) = self.state.handle.lock().unwrap().take() {
            handle.abort();
        }
    }

    /// 更新配置；仅当 enabled 或 interval 实际变化时重启定时器
    pub fn configure(&self, settings: ProactiveSettings) -> Result<(), ChatError> {
        if settings.interval_secs == 0 {
            return Err(ChatError::InvalidSetting(
                "proactive interval must be at least 1 second".to_string(),
            ));
        }
        {
            let current = self.state.settings.lock().unwrap();
            if *current == settings {
                return Ok(());
            }
        }
        self.stop();
        *self.state.settings.lock().unwrap() = settings.clone();
        if settings.enabled {
            self.start();
        }
        Ok(())
    }

    /// 定时器之外手动触发一次；运行中或令牌被占用时报告冲突
    pub async fn trigger_manual(&self) -> Result<TurnOutcome, ChatError> {
        Self::run_once(&self.service, &self.state, DriverSource::Manual).await
    }

    pub fn status(&self) -> SchedulerStatus {
        let settings = self.state.settings.lock().unwrap().clone();
        SchedulerStatus {
            enabled: settings.enabled,
            running: self.state.handle.lock().unwrap().is_some(),
            interval_secs: settings.interval_secs,
            in_progress: self.state.in_progress.load(Ordering::SeqCst),
            last_triggered: *self.state.last_triggered.lock().unwrap(),
        }
    }

    /// acquire -> run -> release；完成的运行（无论成败）记录 last_triggered
    async fn run_once(
        service: &Arc<ChatService>,
        state: &Arc<SchedulerState>,
        source: DriverSource,
    ) -> Result<TurnOutcome, ChatError> {
        if state
            .in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ChatError::AlreadyInProgress);
        }

        let session_id = service.config().proactive_session_id.clone();
        let token = match service.driver().try_acquire(source, &session_id) {
            Ok(token) => token,
            Err(holder) => {
                state.in_progress.store(false, Ordering::SeqCst);
                return Err(ChatError::DriverBusy {
                    holder: holder.to_string(),
                });
            }
        };

        let system_prompt = service.config().system_prompt.clone();
        let result = service
            .turn_inner(
                &session_id,
                PROACTIVE_TRIGGER,
                &system_prompt,
                None,
                &tokio_util::sync::CancellationToken::new(),
            )
            .await;

        service.driver().release(token);
        *state.last_triggered.lock().unwrap() = Some(Utc::now());
        state.in_progress.store(false, Ordering::SeqCst);
        result
    }
}

impl Drop for ProactiveScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::{ChatService, CompactionConfig, CompactionEngine, ServiceConfig};
    use crate::core::CompactionLocks;
    use crate::llm::{CompletionClient, MockCompletionClient};
    use crate::memory::NullStore;
    use crate::session::SessionManager;
    use crate::tools::{EchoTool, ToolExecutor, ToolRegistry};

    fn test_service() -> Arc<ChatService> {
        let llm: Arc<dyn CompletionClient> = Arc::new(MockCompletionClient::new());
        let store = Arc::new(NullStore);
        let locks = Arc::new(CompactionLocks::new());
        let sessions = Arc::new(SessionManager::new(3600, store.clone(), Arc::clone(&locks)));
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);
        Arc::new(ChatService::new(
            sessions,
            Arc::clone(&llm),
            Arc::new(ToolExecutor::new(registry, 5)),
            store,
            CompactionEngine::new(llm, CompactionConfig::default()),
            locks,
            Arc::new(crate::core::DriverSlot::new()),
            ServiceConfig::default(),
        ))
    }

    #[tokio::test]
    async fn manual_trigger_runs_and_releases_driver() {
        let service = test_service();
        let scheduler = ProactiveScheduler::new(Arc::clone(&service), ProactiveSettings::default());

        let outcome = scheduler.trigger_manual().await.unwrap();
        assert!(outcome.response.contains("Echo from Mock"));
        assert!(scheduler.status().last_triggered.is_some());
        // 成功失败都释放 driver 令牌
        assert!(service.driver().status().is_none());
    }

    #[tokio::test]
    async fn skipped_run_does_not_alter_last_triggered() {
        let service = test_service();
        let scheduler = ProactiveScheduler::new(Arc::clone(&service), ProactiveSettings::default());

        // 另一个驱动者持有令牌期间的触发被跳过
        let token = service
            .driver()
            .try_acquire(DriverSource::Manual, "proactive")
            .unwrap();
        let err = scheduler.trigger_manual().await.unwrap_err();
        assert!(matches!(err, ChatError::DriverBusy { .. }));
        assert!(scheduler.status().last_triggered.is_none());

        service.driver().release(token);
        scheduler.trigger_manual().await.unwrap();
        assert!(scheduler.status().last_triggered.is_some());
    }

    #[tokio::test]
    async fn configure_validates_and_restarts_only_on_change() {
        let service = test_service();
        let scheduler = ProactiveScheduler::new(Arc::clone(&service), ProactiveSettings::default());

        let err = scheduler
            .configure(ProactiveSettings {
                enabled: true,
                interval_secs: 0,
            })
            .unwrap_err();
        assert!(matches!(err, ChatError::InvalidSetting(_)));
        assert!(!scheduler.status().running);

        // 未变化的配置不重启定时器
        scheduler.configure(ProactiveSettings::default()).unwrap();
        assert!(!scheduler.status().running);

        scheduler
            .configure(ProactiveSettings {
                enabled: true,
                interval_secs: 900,
            })
            .unwrap();
        assert!(scheduler.status().running);

        scheduler
            .configure(ProactiveSettings {
                enabled: false,
                interval_secs: 900,
            })
            .unwrap();
        assert!(!scheduler.status().running);
    }
}
