//! 工具调用 JSON Schema 生成
//!
//! 用于将「合法 tool call」的 JSON 结构注入 system prompt，减少 LLM 输出格式错误。

use schemars::{schema_for, JsonSchema};
use std::collections::HashMap;

/// 单次工具调用格式：与执行阶段解析的 `{"tool": "...", "args": {...}}` 一致（仅用于 Schema 生成）
#[allow(dead_code)]
#[derive(JsonSchema)]
struct ToolCallFormat {
    /// 工具名，如 cat、ls、echo、shell
    pub tool: String,
    /// 工具参数，依工具不同而不同（path、command、text 等）
    pub args: HashMap<String, String>,
}

/// 批量调用格式：一条回复里请求多个相互独立的工具调用
#[allow(dead_code)]
#[derive(JsonSchema)]
struct ToolBatchFormat {
    /// 相互独立的调用列表，结果按原顺序返回
    pub tool_calls: Vec<ToolCallFormat>,
}

/// 返回工具调用的 JSON Schema 字符串，可拼入 system prompt
pub fn tool_call_schema_json() -> String {
    let schema = schema_for!(ToolBatchFormat);
    serde_json::to_string_pretty(&schema).unwrap_or_else(|_| String::new())
}
