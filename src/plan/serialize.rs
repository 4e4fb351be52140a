//! 计划文档序列化：Plan -> 文本
//!
//! 纯函数、无失败分支。输出固定布局：`# Plan` 标题 + 机器可读头部行，
//! 随后五个小节按固定顺序排列。空集合渲染为占位句而非省略小节，
//! 解析端将占位句与缺失小节同等对待。

use crate::plan::model::{Decision, ExecutionEntry, Plan};

/// 头部与正文的时间戳写法（秒级精度，与 now_second 对应）
pub(crate) const TS_FMT: &str = "%Y-%m-%dT%H:%M:%SZ";

pub(crate) const SECTION_GOAL: &str = "Goal";
pub(crate) const SECTION_CRITERIA: &str = "Acceptance Criteria";
pub(crate) const SECTION_DECISIONS_MADE: &str = "Decisions Made";
pub(crate) const SECTION_DECISIONS_REJECTED: &str = "Decisions Rejected";
pub(crate) const SECTION_LOG: &str = "Execution Log";

pub(crate) const PLACEHOLDER_GOAL: &str = "No goal defined yet.";
pub(crate) const PLACEHOLDER_CRITERIA: &str = "No acceptance criteria yet.";
pub(crate) const PLACEHOLDER_DECISIONS_MADE: &str = "No decisions yet.";
pub(crate) const PLACEHOLDER_DECISIONS_REJECTED: &str = "No rejected decisions yet.";
pub(crate) const PLACEHOLDER_LOG: &str = "No execution log entries yet.";

/// 将计划渲染为文本文档；持久化与模型上下文都使用这一份输出
pub fn serialize(plan: &Plan) -> String {
    let mut out = String::new();

    out.push_str("# Plan\n\n");
    out.push_str(&format!("Status: {}\n", plan.status.as_str()));
    out.push_str(&format!(
        "Created: {}\n",
        plan.metadata.created_at.format(TS_FMT)
    ));
    out.push_str(&format!(
        "Updated: {}\n",
        plan.metadata.updated_at.format(TS_FMT)
    ));
    out.push_str(&format!("Version: {}\n", plan.metadata.version));

    out.push_str(&format!("\n## {}\n\n", SECTION_GOAL));
    if plan.goal.trim().is_empty() {
        out.push_str(PLACEHOLDER_GOAL);
        out.push('\n');
    } else {
        out.push_str(plan.goal.trim());
        out.push('\n');
    }

    out.push_str(&format!("\n## {}\n\n", SECTION_CRITERIA));
    if plan.acceptance_criteria.is_empty() {
        out.push_str(PLACEHOLDER_CRITERIA);
        out.push('\n');
    } else {
        for c in &plan.acceptance_criteria {
            let mark = if c.completed { 'x' } else { ' ' };
            out.push_str(&format!("- [{}] {}\n", mark, c.description));
            if let Some(notes) = &c.notes {
                if !notes.trim().is_empty() {
                    out.push_str(&format!("  - Note: {}\n", notes.trim()));
                }
            }
        }
    }

    out.push_str(&format!("\n## {}\n\n", SECTION_DECISIONS_MADE));
    write_decisions(&mut out, &plan.decisions_made, PLACEHOLDER_DECISIONS_MADE);

    out.push_str(&format!("\n## {}\n\n", SECTION_DECISIONS_REJECTED));
    write_decisions(
        &mut out,
        &plan.decisions_rejected,
        PLACEHOLDER_DECISIONS_REJECTED,
    );

    out.push_str(&format!("\n## {}\n\n", SECTION_LOG));
    if plan.execution_log.is_empty() {
        out.push_str(PLACEHOLDER_LOG);
        out.push('\n');
    } else {
        for (i, e) in plan.execution_log.iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            write_log_entry(&mut out, e);
        }
    }

    out
}

fn write_decisions(out: &mut String, decisions: &[Decision], placeholder: &str) {
    if decisions.is_empty() {
        out.push_str(placeholder);
        out.push('\n');
        return;
    }
    for (i, d) in decisions.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        out.push_str(&format!("### {}\n", d.title));
        out.push_str(&format!("- Rationale: {}\n", d.rationale));
        if d.alternatives.is_empty() {
            out.push_str("- Alternatives: (none)\n");
        } else {
            out.push_str(&format!("- Alternatives: {}\n", d.alternatives.join(", ")));
        }
        out.push_str(&format!("- Date: {}\n", d.timestamp.format(TS_FMT)));
    }
}

fn write_log_entry(out: &mut String, e: &ExecutionEntry) {
    out.push_str(&format!("### {}\n", e.action));
    out.push_str(&format!("- Result: {}\n", e.result));
    if e.tools_used.is_empty() {
        out.push_str("- Tools: (none)\n");
    } else {
        out.push_str(&format!("- Tools: {}\n", e.tools_used.join(", ")));
    }
    out.push_str(&format!("- Date: {}\n", e.timestamp.format(TS_FMT)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::model::{AcceptanceCriterion, Plan, PlanStatus};

    #[test]
    fn test_empty_plan_renders_placeholders() {
        let text = serialize(&Plan::new());
        assert!(text.starts_with("# Plan\n"));
        assert!(text.contains("Status: planning"));
        assert!(text.contains("Version: 1"));
        assert!(text.contains(PLACEHOLDER_GOAL));
        assert!(text.contains(PLACEHOLDER_CRITERIA));
        assert!(text.contains(PLACEHOLDER_DECISIONS_MADE));
        assert!(text.contains(PLACEHOLDER_DECISIONS_REJECTED));
        assert!(text.contains(PLACEHOLDER_LOG));
    }

    #[test]
    fn test_sections_appear_in_fixed_order() {
        let text = serialize(&Plan::new());
        let positions: Vec<usize> = [
            SECTION_GOAL,
            SECTION_CRITERIA,
            SECTION_DECISIONS_MADE,
            SECTION_DECISIONS_REJECTED,
            SECTION_LOG,
        ]
        .iter()
        .map(|s| text.find(&format!("## {}", s)).unwrap())
        .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_criteria_render_checkbox_and_note() {
        let mut p = Plan::new();
        p.goal = "ship the release".to_string();
        p.status = PlanStatus::InProgress;
        p.acceptance_criteria.push(AcceptanceCriterion {
            description: "draft written".to_string(),
            completed: true,
            notes: Some("reviewed".to_string()),
        });
        p.acceptance_criteria
            .push(AcceptanceCriterion::new("published"));
        let text = serialize(&p);
        assert!(text.contains("- [x] draft written"));
        assert!(text.contains("  - Note: reviewed"));
        assert!(text.contains("- [ ] published"));
    }

    #[test]
    fn test_serialize_is_deterministic() {
        let p = Plan::new();
        assert_eq!(serialize(&p), serialize(&p));
    }
}
