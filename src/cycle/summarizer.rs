//! 总结阶段：把执行过程折叠回计划文档
//!
//! 每个周期主动产出一条执行日志与验收标准/决策更新，而不是等上下文快溢出
//! 再被动截断；这正是计划能保持精简的原因。模型辅助生成更新 JSON，任何
//! 失败（后端错误、JSON 垃圾）都退化为确定性摘要，总结阶段绝不中止会话。

use std::sync::Arc;

use serde_json::Value;

use crate::llm::{LlmClient, Message, Role};
use crate::plan::{now_second, AcceptanceCriterion, Decision, ExecutionEntry, Plan, PlanStatus};

/// 总结阶段附加指令；要求纯 JSON 更新
pub const SUMMARY_PROMPT: &str = "You are in the summarization phase. Given the plan document \
and the turns of the execution you just finished, reply with one JSON object describing the \
log entry and plan updates: {\"action\": \"what was done\", \"result\": \"what happened\", \
\"status\": \"planning|in_progress|blocked|completed|failed\", \"goal\": \"goal if it was \
missing\", \"completed_criteria\": [\"criterion text\"], \"new_criteria\": [\"...\"], \
\"decisions\": [{\"title\": \"...\", \"rationale\": \"...\", \"alternatives\": [\"...\"], \
\"rejected\": false}]}. Keep action and result to one line each. \
Do not add any text outside the JSON.";

/// 一次总结产出的计划更新；所有字段缺省可解析
#[derive(Debug, Clone, Default)]
pub struct SummaryUpdate {
    pub action: String,
    pub result: String,
    pub status: Option<String>,
    pub goal: Option<String>,
    pub completed_criteria: Vec<String>,
    pub new_criteria: Vec<String>,
    pub decisions: Vec<DecisionUpdate>,
}

#[derive(Debug, Clone, Default)]
pub struct DecisionUpdate {
    pub title: String,
    pub rationale: String,
    pub alternatives: Vec<String>,
    pub rejected: bool,
}

/// 总结器：模型辅助 + 确定性退化
pub struct Summarizer {
    llm: Arc<dyn LlmClient>,
}

impl Summarizer {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    /// 产出本周期的更新；任何失败都落到 fallback，从不返回错误
    pub async fn summarize(
        &self,
        request: &str,
        plan_text: &str,
        transcript: &[Message],
    ) -> SummaryUpdate {
        let mut messages = vec![Message::system(format!(
            "{}\n\n## Current Plan\n\n{}",
            SUMMARY_PROMPT, plan_text
        ))];
        messages.extend(transcript.iter().cloned());
        messages.push(Message::user(
            "Summarize the execution above into the JSON update now.",
        ));

        match self.llm.complete(&messages).await {
            Ok(reply) => parse_summary(&reply)
                .unwrap_or_else(|| fallback_update(request, transcript)),
            Err(e) => {
                tracing::warn!(error = %e, "summary request failed, using deterministic fallback");
                fallback_update(request, transcript)
            }
        }
    }
}

/// 宽容解析总结 JSON；不成形时返回 None 交给 fallback
fn parse_summary(reply: &str) -> Option<SummaryUpdate> {
    let value: Value = serde_json::from_str(extract_json(reply)?).ok()?;
    let map = value.as_object()?;

    let string_of = |key: &str| -> Option<String> {
        map.get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
    };
    // 字符串或数字都接受（模型偶尔用索引指代标准）
    let list_of = |key: &str| -> Vec<String> {
        map.get(key)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| match v {
                        Value::String(s) => Some(s.trim().to_string()),
                        Value::Number(n) => Some(n.to_string()),
                        _ => None,
                    })
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    };

    let decisions = map
        .get("decisions")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let title = item.get("title")?.as_str()?.trim().to_string();
                    if title.is_empty() {
                        return None;
                    }
                    Some(DecisionUpdate {
                        title,
                        rationale: item
                            .get("rationale")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                        alternatives: item
                            .get("alternatives")
                            .and_then(Value::as_array)
                            .map(|a| {
                                a.iter()
                                    .filter_map(Value::as_str)
                                    .map(String::from)
                                    .collect()
                            })
                            .unwrap_or_default(),
                        rejected: item
                            .get("rejected")
                            .and_then(Value::as_bool)
                            .unwrap_or(false),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    Some(SummaryUpdate {
        action: string_of("action").unwrap_or_default(),
        result: string_of("result").unwrap_or_default(),
        status: string_of("status"),
        goal: string_of("goal"),
        completed_criteria: list_of("completed_criteria"),
        new_criteria: list_of("new_criteria"),
        decisions,
    })
}

fn extract_json(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        return Some(match rest.find("```") {
            Some(end) => rest[..end].trim(),
            None => rest.trim(),
        });
    }
    let (start, end) = (trimmed.find('{')?, trimmed.rfind('}')?);
    (start < end).then(|| &trimmed[start..=end])
}

/// 确定性退化：从请求与转写拼一条最小但真实的日志
fn fallback_update(request: &str, transcript: &[Message]) -> SummaryUpdate {
    let last_assistant = transcript
        .iter()
        .rev()
        .find(|m| matches!(m.role, Role::Assistant))
        .map(|m| truncate(&m.content, 200))
        .unwrap_or_else(|| "(no output)".to_string());
    SummaryUpdate {
        action: truncate(request, 120),
        result: last_assistant,
        ..SummaryUpdate::default()
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    let s = s.trim();
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_chars).collect();
        format!("{}...", cut)
    }
}

/// 日志字段必须单行，换行会破坏文档的逐行解析
fn single_line(s: &str) -> String {
    s.replace(['\n', '\r'], "; ").trim().to_string()
}

/// 把更新写入计划：追加日志、更新标准/决策/状态，最后 touch 递增版本
pub fn apply_update(update: SummaryUpdate, plan: &mut Plan, tools_used: Vec<String>) {
    if let Some(goal) = &update.goal {
        if plan.goal.trim().is_empty() {
            plan.goal = single_line(goal);
        }
    }

    for wanted in &update.completed_criteria {
        let wanted_lower = wanted.to_lowercase();
        for criterion in plan.acceptance_criteria.iter_mut() {
            if criterion.description.to_lowercase() == wanted_lower {
                criterion.completed = true;
            }
        }
    }

    for description in &update.new_criteria {
        let description = single_line(description);
        if !description.is_empty() {
            plan.acceptance_criteria
                .push(AcceptanceCriterion::new(description));
        }
    }

    let now = now_second();
    for d in update.decisions {
        let decision = Decision {
            title: single_line(&d.title),
            rationale: single_line(&d.rationale),
            alternatives: d.alternatives.iter().map(|a| single_line(a)).collect(),
            timestamp: now,
        };
        if d.rejected {
            plan.decisions_rejected.push(decision);
        } else {
            plan.decisions_made.push(decision);
        }
    }

    let action = if update.action.trim().is_empty() {
        "Handled the request".to_string()
    } else {
        single_line(&update.action)
    };
    let result = if update.result.trim().is_empty() {
        "(no result recorded)".to_string()
    } else {
        single_line(&update.result)
    };
    plan.append_log(ExecutionEntry {
        timestamp: now,
        action,
        result,
        tools_used,
    });

    if let Some(status) = update.status.as_deref().and_then(PlanStatus::parse) {
        plan.status = status;
    } else if plan.status == PlanStatus::Planning && !plan.goal.trim().is_empty() {
        plan.status = PlanStatus::InProgress;
    }
    plan.enforce_status_invariant();
    plan.touch();
}
