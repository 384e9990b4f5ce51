//! 记忆层：消息模型、会话转录、token 估算、持久化契约

pub mod estimator;
pub mod message;
pub mod persistence;
pub mod transcript;

pub use estimator::TokenEstimator;
pub use message::{Message, Role, Segment, SegmentStatus, ToolRecord};
pub use persistence::{JsonFileStore, NullStore, StoredSessionInfo, TranscriptStore};
pub use transcript::{CompactionMeta, Transcript};
