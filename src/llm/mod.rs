//! 补全服务客户端抽象与实现（OpenAI 兼容 / Mock）

pub mod mock;
pub mod openai;
pub mod protocol;
pub mod traits;

pub use mock::MockCompletionClient;
pub use openai::OpenAiClient;
pub use traits::{
    CompletionClient, CompletionDelta, CompletionResponse, CompletionStream, ToolCallRequest,
    ToolSpec, Usage,
};
