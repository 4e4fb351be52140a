//! 核心编排层：错误分级、会话监管、主控循环

pub mod error;
pub mod orchestrator;
pub mod supervisor;

pub use error::AgentError;
pub use orchestrator::{create_agent, Command};
pub use supervisor::SessionSupervisor;
