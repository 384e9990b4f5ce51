//! 核心层：错误类型、互斥层（压缩锁 + driver 令牌）、proactive 调度器

pub mod error;
pub mod locks;
pub mod proactive;

pub use error::ChatError;
pub use locks::{CompactionGuard, CompactionLocks, DriverHolder, DriverSlot, DriverSource};
pub use proactive::{ProactiveScheduler, ProactiveSettings, SchedulerStatus};
