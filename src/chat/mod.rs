//! 对话层：轮次编排、流式重建、上下文压缩、过程事件

pub mod compaction;
pub mod events;
pub mod stream;
pub mod turn;

pub use compaction::{CompactionConfig, CompactionEngine};
pub use events::TurnEvent;
pub use stream::SegmentAssembler;
pub use turn::{ChatService, ServiceConfig, TurnOutcome};
