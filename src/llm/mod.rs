//! LLM 层：客户端抽象与实现（本地 OpenAI 兼容端点 / Mock）

pub mod local;
pub mod mock;
pub mod traits;

pub use local::{LocalClient, TokenUsage};
pub use mock::MockLlmClient;
pub use traits::{LlmClient, LlmError, Message, Role};
