//! 组件装配
//!
//! 从配置构建补全客户端、工具执行器与 ChatService / ProactiveScheduler。
//! 共享表（会话、压缩锁、driver 槽位）在这里构造一次，作为服务对象的字段
//! 传下去，进程生命周期内不再新建。

use std::sync::Arc;

use crate::chat::{ChatService, CompactionConfig, CompactionEngine, ServiceConfig};
use crate::config::AppConfig;
use crate::core::{ChatError, CompactionLocks, DriverSlot, ProactiveScheduler, ProactiveSettings};
use crate::llm::{CompletionClient, MockCompletionClient, OpenAiClient};
use crate::memory::{JsonFileStore, TranscriptStore};
use crate::session::SessionManager;
use crate::tools::{ClockTool, EchoTool, ToolExecutor, ToolRegistry};

/// 装配完成的后端：服务对象 + 会话管理器 + 调度器
pub struct Backend {
    pub service: Arc<ChatService>,
    pub sessions: Arc<SessionManager>,
    pub scheduler: ProactiveScheduler,
}

/// 根据配置与环境变量选择补全后端（OpenAI 兼容 / Mock）
pub fn create_completion_client(cfg: &AppConfig) -> Arc<dyn CompletionClient> {
    let provider = cfg.llm.provider.to_lowercase();
    if provider == "mock" {
        tracing::info!("Using Mock completion client");
        return Arc::new(MockCompletionClient::new());
    }
    if std::env::var("OPENAI_API_KEY").is_ok() {
        tracing::info!("Using OpenAI-compatible completion client ({})", cfg.llm.model);
        Arc::new(OpenAiClient::new(
            cfg.llm.base_url.as_deref(),
            &cfg.llm.model,
            std::env::var("OPENAI_API_KEY").ok().as_deref(),
        ))
    } else {
        tracing::warn!("No API key set, using Mock completion client");
        Arc::new(MockCompletionClient::new())
    }
}

/// 内置工具（echo / clock）+ 超时执行器
pub fn create_tool_executor(cfg: &AppConfig) -> ToolExecutor {
    let mut tools = ToolRegistry::new();
    tools.register(EchoTool);
    tools.register(ClockTool);
    ToolExecutor::new(tools, cfg.tools.tool_timeout_secs)
}

/// 校验配置并装配整个后端
pub fn create_backend(cfg: &AppConfig) -> Result<Backend, ChatError> {
    cfg.validate()?;

    let llm = create_completion_client(cfg);
    let store: Arc<dyn TranscriptStore> = Arc::new(JsonFileStore::new(&cfg.persistence.dir));
    let locks = Arc::new(CompactionLocks::new());
    let driver = Arc::new(DriverSlot::new());
    let sessions = Arc::new(SessionManager::new(
        cfg.app.session_ttl_secs,
        Arc::clone(&store),
        Arc::clone(&locks),
    ));

    let compaction = CompactionEngine::new(
        Arc::clone(&llm),
        CompactionConfig {
            token_threshold: cfg.compaction.token_threshold,
            keep_recent: cfg.compaction.keep_recent,
        },
    );

    let service = Arc::new(ChatService::new(
        Arc::clone(&sessions),
        llm,
        Arc::new(create_tool_executor(cfg)),
        store,
        compaction,
        locks,
        driver,
        ServiceConfig {
            proactive_session_id: cfg.app.proactive_session_id.clone(),
            system_prompt: cfg.app.system_prompt.clone(),
            max_tool_rounds: cfg.app.max_tool_rounds,
        },
    ));

    let scheduler = ProactiveScheduler::new(
        Arc::clone(&service),
        ProactiveSettings {
            enabled: cfg.proactive.enabled,
            interval_secs: cfg.proactive.interval_secs,
        },
    );

    Ok(Backend {
        service,
        sessions,
        scheduler,
    })
}
