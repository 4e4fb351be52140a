//! Planner：任务规划与模型输出解析
//!
//! 规划阶段请模型产出有序任务清单（不带工具调用）；执行阶段把每条回复解析为
//! 「一批工具调用」或「最终回答」二者之一，两者皆非即畸形，交由循环按失败
//! 尝试重试。解析沿用从文本中提取 JSON 块的方式（```json 围栏或首尾大括号）。

use std::sync::Arc;

use serde_json::Value;

use crate::core::AgentError;
use crate::llm::{LlmClient, LlmError, Message};
use crate::tools::ToolCall;

/// 规划阶段附加指令；要求纯 JSON 任务清单
pub const PLANNING_PROMPT: &str = "You are in the planning phase. Given the current plan \
document and the user's request, reply with an ordered task list as pure JSON: \
{\"tasks\": [\"first task\", \"second task\"]}. Keep tasks few and concrete. \
Do not call tools and do not add any text outside the JSON.";

/// 执行阶段附加指令模板；带工具清单与调用格式
pub fn execution_prompt(tool_schema: &str, original_request: &str) -> String {
    format!(
        "You are in the execution phase, working on one task of the user's request: \
         {original_request}\n\
         To call tools, reply with pure JSON only: \
         {{\"tool_calls\": [{{\"tool\": \"name\", \"args\": {{...}}}}]}}. The calls in one \
         batch must be independent of each other. When the task is done, reply with the \
         final answer as plain text without JSON.\n\nAvailable tools:\n{tool_schema}"
    )
}

/// 模型对单个任务的回复，二选一
#[derive(Debug, Clone)]
pub enum ModelStep {
    /// 需要执行一批相互独立的工具调用
    ToolBatch(Vec<ToolCall>),
    /// 本任务的最终回答
    FinalAnswer(String),
}

/// Planner：持有 LLM 与基础 system prompt
pub struct Planner {
    llm: Arc<dyn LlmClient>,
    system_prompt: String,
}

impl Planner {
    pub fn new(llm: Arc<dyn LlmClient>, system_prompt: impl Into<String>) -> Self {
        Self {
            llm,
            system_prompt: system_prompt.into(),
        }
    }

    pub fn base_system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// 获取 LLM 累计 token 使用统计
    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.llm.token_usage()
    }

    pub async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        self.llm.complete(messages).await
    }

    /// 规划：调用模型并解析任务清单；清单解析本身宽容，绝不因格式失败
    pub async fn plan_tasks(&self, messages: &[Message]) -> Result<Vec<String>, LlmError> {
        let output = self.llm.complete(messages).await?;
        Ok(parse_task_list(&output))
    }
}

/// 提取 JSON 块：```json 围栏优先，其次首个 { 到末个 }，再次首个 [ 到末个 ]
fn extract_json_block(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        let inner = match rest.find("```") {
            Some(end) => &rest[..end],
            None => rest,
        };
        return Some(inner.trim());
    }
    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            return Some(&trimmed[start..=end]);
        }
    }
    if let (Some(start), Some(end)) = (trimmed.find('['), trimmed.rfind(']')) {
        if start < end {
            return Some(&trimmed[start..=end]);
        }
    }
    None
}

/// 解析任务清单：JSON {"tasks": [...]} / 裸数组 / 列表行，最后退化为单任务
pub fn parse_task_list(output: &str) -> Vec<String> {
    if let Some(block) = extract_json_block(output) {
        if let Ok(value) = serde_json::from_str::<Value>(block) {
            let arr = match &value {
                Value::Object(map) => map.get("tasks").and_then(Value::as_array).cloned(),
                Value::Array(items) => Some(items.clone()),
                _ => None,
            };
            if let Some(items) = arr {
                let tasks: Vec<String> = items
                    .iter()
                    .filter_map(|v| v.as_str())
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
                if !tasks.is_empty() {
                    return tasks;
                }
            }
        }
    }

    // 列表行退化：- / * / 1. 开头的行
    let bullets: Vec<String> = output
        .lines()
        .filter_map(|line| {
            let t = line.trim();
            let rest = t
                .strip_prefix("- ")
                .or_else(|| t.strip_prefix("* "))
                .or_else(|| {
                    t.split_once(". ").and_then(|(n, rest)| {
                        n.chars().all(|c| c.is_ascii_digit()).then_some(rest)
                    })
                })?;
            let rest = rest.trim();
            (!rest.is_empty()).then(|| rest.to_string())
        })
        .collect();
    if !bullets.is_empty() {
        return bullets;
    }

    let fallback = output.trim();
    if fallback.is_empty() {
        Vec::new()
    } else {
        vec![fallback.to_string()]
    }
}

/// 解析执行阶段输出；含 JSON 而解析不出合法结构时返回 MalformedResponse
pub fn parse_model_step(output: &str) -> Result<ModelStep, AgentError> {
    let trimmed = output.trim();
    if trimmed.is_empty() {
        return Err(AgentError::MalformedResponse("empty reply".to_string()));
    }

    // 完全没有 JSON 痕迹：按最终回答处理
    if !trimmed.contains('{') && !trimmed.contains("```json") {
        return Ok(ModelStep::FinalAnswer(trimmed.to_string()));
    }

    let block = extract_json_block(trimmed)
        .ok_or_else(|| AgentError::MalformedResponse("unterminated JSON block".to_string()))?;
    let value: Value = serde_json::from_str(block)
        .map_err(|e| AgentError::MalformedResponse(format!("{}: {}", e, block)))?;

    match &value {
        Value::Object(map) => {
            if let Some(calls) = map.get("tool_calls").and_then(Value::as_array) {
                return tool_batch(calls);
            }
            if let Some(tool) = map.get("tool").and_then(Value::as_str) {
                if tool.is_empty() {
                    // 与空工具名同义：当作纯文本回答
                    return Ok(ModelStep::FinalAnswer(trimmed.to_string()));
                }
                return Ok(ModelStep::ToolBatch(vec![ToolCall {
                    tool: tool.to_string(),
                    args: map.get("args").cloned().unwrap_or(Value::Object(Default::default())),
                }]));
            }
            if let Some(answer) = map
                .get("answer")
                .or_else(|| map.get("final"))
                .and_then(Value::as_str)
            {
                return Ok(ModelStep::FinalAnswer(answer.to_string()));
            }
            Err(AgentError::MalformedResponse(format!(
                "JSON object without tool_calls/tool/answer: {}",
                block
            )))
        }
        Value::Array(items) => tool_batch(items),
        _ => Err(AgentError::MalformedResponse(format!(
            "unexpected JSON shape: {}",
            block
        ))),
    }
}

fn tool_batch(items: &[Value]) -> Result<ModelStep, AgentError> {
    let mut calls = Vec::new();
    for item in items {
        let Some(tool) = item.get("tool").and_then(Value::as_str) else {
            return Err(AgentError::MalformedResponse(format!(
                "tool call without tool name: {}",
                item
            )));
        };
        if tool.is_empty() {
            return Err(AgentError::MalformedResponse("empty tool name".to_string()));
        }
        calls.push(ToolCall {
            tool: tool.to_string(),
            args: item.get("args").cloned().unwrap_or(Value::Object(Default::default())),
        });
    }
    if calls.is_empty() {
        return Err(AgentError::MalformedResponse(
            "empty tool_calls batch".to_string(),
        ));
    }
    Ok(ModelStep::ToolBatch(calls))
}
