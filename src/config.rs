//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `HIVE__*` 覆盖（双下划线表示嵌套，
//! 如 `HIVE__COMPACTION__TOKEN_THRESHOLD=8000`）。

use std::path::PathBuf;

use serde::Deserialize;

use crate::core::ChatError;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub compaction: CompactionSection,
    #[serde(default)]
    pub proactive: ProactiveSection,
    #[serde(default)]
    pub tools: ToolsSection,
    #[serde(default)]
    pub persistence: PersistenceSection,
}

/// [app] 段：应用名、system prompt、会话生命周期、工具轮数上限
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    pub name: Option<String>,
    /// 默认 system prompt（proactive 轮次与 CLI 使用）
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    /// proactive 对话流的会话 ID
    #[serde(default = "default_proactive_session_id")]
    pub proactive_session_id: String,
    /// 单轮工具请求循环上限
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: usize,
    /// 会话 TTL（秒），超时未活跃被清理
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
    /// 后台清理间隔（秒）
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            system_prompt: default_system_prompt(),
            proactive_session_id: default_proactive_session_id(),
            max_tool_rounds: default_max_tool_rounds(),
            session_ttl_secs: default_session_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

fn default_system_prompt() -> String {
    "You are Hive, a helpful conversational assistant. Use the available tools when they help."
        .to_string()
}

fn default_proactive_session_id() -> String {
    "proactive".to_string()
}

fn default_max_tool_rounds() -> usize {
    8
}

fn default_session_ttl_secs() -> u64 {
    24 * 3600
}

fn default_sweep_interval_secs() -> u64 {
    3600
}

/// [llm] 段：后端选择
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 后端：openai 兼容端点 / mock
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
        }
    }
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

/// [compaction] 段：触发阈值与保留窗口
#[derive(Debug, Clone, Deserialize)]
pub struct CompactionSection {
    /// 上一轮 total_tokens 达到该值即触发压缩
    #[serde(default = "default_token_threshold")]
    pub token_threshold: u64,
    /// 压缩时保留的最近消息条数（可为 0）
    #[serde(default = "default_keep_recent")]
    pub keep_recent: usize,
}

impl Default for CompactionSection {
    fn default() -> Self {
        Self {
            token_threshold: default_token_threshold(),
            keep_recent: default_keep_recent(),
        }
    }
}

fn default_token_threshold() -> u64 {
    6000
}

fn default_keep_recent() -> usize {
    4
}

/// [proactive] 段：定时触发
#[derive(Debug, Clone, Deserialize)]
pub struct ProactiveSection {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_proactive_interval_secs")]
    pub interval_secs: u64,
}

impl Default for ProactiveSection {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: default_proactive_interval_secs(),
        }
    }
}

fn default_proactive_interval_secs() -> u64 {
    900
}

/// [tools] 段：单次工具调用超时
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsSection {
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: default_tool_timeout_secs(),
        }
    }
}

fn default_tool_timeout_secs() -> u64 {
    30
}

/// [persistence] 段：会话 JSON 文件目录
#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceSection {
    #[serde(default = "default_sessions_dir")]
    pub dir: PathBuf,
}

impl Default for PersistenceSection {
    fn default() -> Self {
        Self {
            dir: default_sessions_dir(),
        }
    }
}

fn default_sessions_dir() -> PathBuf {
    PathBuf::from("sessions")
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app: AppSection::default(),
            llm: LlmSection::default(),
            compaction: CompactionSection::default(),
            proactive: ProactiveSection::default(),
            tools: ToolsSection::default(),
            persistence: PersistenceSection::default(),
        }
    }
}

impl AppConfig {
    /// 越界值在服务构建前立刻报告，不产生任何副作用
    pub fn validate(&self) -> Result<(), ChatError> {
        if self.app.max_tool_rounds == 0 {
            return Err(ChatError::InvalidSetting(
                "app.max_tool_rounds must be at least 1".into(),
            ));
        }
        if self.app.session_ttl_secs == 0 {
            return Err(ChatError::InvalidSetting(
                "app.session_ttl_secs must be at least 1".into(),
            ));
        }
        if self.app.sweep_interval_secs == 0 {
            return Err(ChatError::InvalidSetting(
                "app.sweep_interval_secs must be at least 1".into(),
            ));
        }
        if self.compaction.token_threshold == 0 {
            return Err(ChatError::InvalidSetting(
                "compaction.token_threshold must be at least 1".into(),
            ));
        }
        if self.proactive.interval_secs == 0 {
            return Err(ChatError::InvalidSetting(
                "proactive.interval_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// 从 config 目录加载配置，环境变量 HIVE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 HIVE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("HIVE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
