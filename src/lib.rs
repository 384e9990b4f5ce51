//! Hive - Rust 会话后端
//!
//! 把用户消息代理给远程补全服务与工具服务，在内存中维护每个会话的转录，
//! 按 token 预算定期压缩，并支持复用同一条流水线的 proactive 自主触发。
//!
//! 模块划分：
//! - **bootstrap**: 组件装配（补全客户端 / 工具执行器 / 服务对象）
//! - **chat**: 轮次编排、流式重建、上下文压缩、过程事件
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、互斥层（压缩锁 + driver 令牌）、proactive 调度器
//! - **llm**: 补全服务客户端抽象与实现（OpenAI 兼容 / Mock）
//! - **memory**: 消息模型、会话转录、token 估算、持久化契约
//! - **observability**: tracing 初始化
//! - **session**: 会话存储与 TTL 清理
//! - **tools**: 工具箱（echo / clock）与执行器

pub mod bootstrap;
pub mod chat;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod session;
pub mod tools;

pub use bootstrap::{create_backend, Backend};
pub use chat::{ChatService, TurnEvent, TurnOutcome};
pub use crate::core::ChatError;
