//! 后端错误类型
//!
//! 按传播策略分类：远程失败与校验错误直接上抛给当前轮的调用方；
//! 压缩失败、持久化失败、调度 tick 失败由后台路径记录日志后吸收。

use thiserror::Error;

/// 一轮对话处理中可能出现的错误（远程调用、锁冲突、校验、压缩等）
#[derive(Error, Debug)]
pub enum ChatError {
    /// 补全服务调用失败（瞬时远程错误，上抛给调用方）
    #[error("Completion service failed: {0}")]
    CompletionFailed(String),

    /// 工具调用失败（含远程工具服务错误）
    #[error("Tool {tool} failed: {reason}")]
    ToolFailed { tool: String, reason: String },

    /// 单次工具调用超时
    #[error("Tool timeout: {0}")]
    ToolTimeout(String),

    /// 摘要生成失败；绝不退化为「空摘要成功」
    #[error("Compaction failed: {0}")]
    CompactionFailed(String),

    /// 消息不足，无可压缩内容
    #[error("Nothing to compact")]
    NothingToCompact,

    /// 自上次压缩以来累计的新消息不足，拒绝重复压缩
    #[error("No new messages to compact")]
    NoNewMessagesToCompact,

    /// 该会话已有压缩在进行中（锁冲突，不自动重试）
    #[error("Compaction already in progress for session {0}")]
    CompactionInProgress(String),

    /// 全局 driver 令牌被占用（另一逻辑轮正在驱动该对话流）
    #[error("Driver slot busy: held by {holder}")]
    DriverBusy { holder: String },

    /// 手动触发时已有 proactive 运行在进行中
    #[error("Proactive run already in progress")]
    AlreadyInProgress,

    /// 空消息（校验错误，无副作用）
    #[error("Empty message")]
    EmptyMessage,

    /// 配置值越界（校验错误，无副作用）
    #[error("Invalid setting: {0}")]
    InvalidSetting(String),

    /// 工具轮数超过上限（防止补全服务异常时的无界循环）
    #[error("Too many tool rounds: exceeded {0}")]
    TooManyToolRounds(usize),

    /// 调用方中止了流式轮次
    #[error("Cancelled")]
    Cancelled,

    /// 持久化失败（仅记录，不使当前轮失败）
    #[error("Persistence failed: {0}")]
    PersistenceFailed(String),
}
