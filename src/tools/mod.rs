pub mod echo;
pub mod executor;
pub mod filesystem;
pub mod registry;
pub mod schema;
pub mod shell;

pub use echo::EchoTool;
pub use executor::{ToolCall, ToolExecutor, ToolOutcome};
pub use filesystem::{CatTool, LsTool, SafeFs};
pub use registry::{Tool, ToolRegistry};
pub use schema::tool_call_schema_json;
pub use shell::ShellTool;
