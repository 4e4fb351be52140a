//! 计划文档解析：文本 -> Plan，宽容且永不 panic
//!
//! 生产者是语言模型，格式漂移是常态而非异常：缺头部 -> 合成默认值；缺小节 ->
//! 空集合；勾选符号混用 -> 按固定字符集识别；条目字段缺失 -> 逐字段用默认值。
//! 只有在输入完全不像计划文档（空白、无任何标题与头部字段）时才返回
//! ParseFailure，其中带有可直接发给模型的纠正提示。

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use crate::plan::model::{
    now_second, AcceptanceCriterion, Decision, ExecutionEntry, Plan, PlanMetadata, PlanStatus,
};
use crate::plan::serialize::{
    PLACEHOLDER_CRITERIA, PLACEHOLDER_DECISIONS_MADE, PLACEHOLDER_DECISIONS_REJECTED,
    PLACEHOLDER_GOAL, PLACEHOLDER_LOG,
};

/// 被识别为「已完成」的勾选字符；中文环境模型常输出 √
const CHECKED_GLYPHS: &[char] = &['x', 'X', '✓', '✔', '√'];

/// 纠正提示中给模型看的期望布局
pub const EXPECTED_LAYOUT: &str = r#"# Plan

Status: planning | in_progress | blocked | completed | failed
Created: 2024-01-01T00:00:00Z
Updated: 2024-01-01T00:00:00Z
Version: 1

## Goal

One short paragraph, or "No goal defined yet."

## Acceptance Criteria

- [ ] an unchecked criterion
- [x] a completed criterion
  - Note: optional note

## Decisions Made

### Decision title
- Rationale: why it was chosen
- Alternatives: other, options
- Date: 2024-01-01T00:00:00Z

## Decisions Rejected

### Rejected decision title
- Rationale: why it was rejected
- Alternatives: (none)
- Date: 2024-01-01T00:00:00Z

## Execution Log

### What was done
- Result: what happened
- Tools: tool names, or (none)
- Date: 2024-01-01T00:00:00Z"#;

/// 文档不像计划时的类型化失败：诊断 + 可直接发送的纠正提示
#[derive(Clone, Debug)]
pub struct ParseFailure {
    pub diagnosis: String,
    pub corrective_prompt: String,
}

impl ParseFailure {
    fn new(diagnosis: impl Into<String>) -> Self {
        let diagnosis = diagnosis.into();
        let corrective_prompt = format!(
            "The plan document could not be parsed: {}.\n\
             Re-emit the complete plan document, preserving all content you were given, \
             in exactly this layout:\n\n{}",
            diagnosis, EXPECTED_LAYOUT
        );
        Self {
            diagnosis,
            corrective_prompt,
        }
    }
}

/// 解析计划文档；宽容为先，只有完全不像计划的输入才失败
pub fn deserialize(text: &str) -> Result<Plan, ParseFailure> {
    if text.trim().is_empty() {
        return Err(ParseFailure::new("the document is empty"));
    }
    if !looks_plan_shaped(text) {
        return Err(ParseFailure::new(
            "no markdown heading or header field was found",
        ));
    }

    let (header_lines, sections) = split_document(text);
    let metadata_status = parse_header(&header_lines);

    let goal = sections
        .get(&Section::Goal)
        .map(|body| parse_goal(body))
        .unwrap_or_default();
    let acceptance_criteria = sections
        .get(&Section::Criteria)
        .map(|body| parse_criteria(body))
        .unwrap_or_default();
    let decisions_made = sections
        .get(&Section::DecisionsMade)
        .map(|body| parse_decisions(body, PLACEHOLDER_DECISIONS_MADE))
        .unwrap_or_default();
    let decisions_rejected = sections
        .get(&Section::DecisionsRejected)
        .map(|body| parse_decisions(body, PLACEHOLDER_DECISIONS_REJECTED))
        .unwrap_or_default();
    let execution_log = sections
        .get(&Section::Log)
        .map(|body| parse_log(body))
        .unwrap_or_default();

    let (metadata, status) = metadata_status;
    let mut plan = Plan {
        status,
        goal,
        acceptance_criteria,
        decisions_made,
        decisions_rejected,
        execution_log,
        metadata,
    };
    plan.enforce_status_invariant();
    Ok(plan)
}

/// 轻量读取头部 Version（存储层做乐观并发比对时用，避免整篇解析）
pub fn header_version(text: &str) -> Option<u64> {
    for line in text.lines().take(16) {
        if let Some((key, value)) = split_key_value(line) {
            if key == "version" {
                return parse_u64(&value);
            }
        }
    }
    None
}

/// 是否「像」计划文档：存在任一 markdown 标题行，或任一已知头部字段
fn looks_plan_shaped(text: &str) -> bool {
    text.lines().any(|line| {
        let t = line.trim_start();
        if t.starts_with('#') {
            return true;
        }
        matches!(
            split_key_value(line).as_ref().map(|(k, _)| k.as_str()),
            Some("status" | "version" | "created" | "updated")
        )
    })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum Section {
    Goal,
    Criteria,
    DecisionsMade,
    DecisionsRejected,
    Log,
}

/// 识别 `## ` 小节标题；名称按关键词匹配，rejected 先于 decision 检查
fn section_kind(heading: &str) -> Option<Section> {
    let h = heading.to_lowercase();
    if h.contains("goal") {
        Some(Section::Goal)
    } else if h.contains("acceptance") || h.contains("criteria") {
        Some(Section::Criteria)
    } else if h.contains("rejected") {
        Some(Section::DecisionsRejected)
    } else if h.contains("decision") {
        Some(Section::DecisionsMade)
    } else if h.contains("execution") || h.contains("log") {
        Some(Section::Log)
    } else {
        None
    }
}

/// `## X` 是小节标题；`### X` 是条目标题，这里须排除
fn section_heading(line: &str) -> Option<&str> {
    let rest = line.trim_start().strip_prefix("##")?;
    if rest.starts_with('#') {
        return None;
    }
    Some(rest.trim())
}

fn entry_heading(line: &str) -> Option<&str> {
    let rest = line.trim_start().strip_prefix("###")?;
    if rest.starts_with('#') {
        return None;
    }
    Some(rest.trim())
}

/// 切分文档：第一个小节标题之前的行作为头部候选，之后按小节归集
fn split_document(text: &str) -> (Vec<String>, std::collections::HashMap<Section, Vec<String>>) {
    let mut header_lines = Vec::new();
    let mut sections: std::collections::HashMap<Section, Vec<String>> =
        std::collections::HashMap::new();
    let mut current: Option<Section> = None;

    for line in text.lines() {
        if let Some(heading) = section_heading(line) {
            // 未识别的小节标题也会终结当前小节，内容被忽略
            current = section_kind(heading);
            continue;
        }
        match current {
            Some(section) => sections.entry(section).or_default().push(line.to_string()),
            None => header_lines.push(line.to_string()),
        }
    }
    (header_lines, sections)
}

/// 头部行形如 `Status: x`；允许 `- **Status:** x` 等变体
fn split_key_value(line: &str) -> Option<(String, String)> {
    let t = line
        .trim()
        .trim_start_matches(['-', '*', '+'])
        .trim()
        .trim_start_matches("**");
    let (key, value) = t.split_once(':')?;
    let key = key.trim().trim_end_matches("**").trim().to_lowercase();
    // 统一 created_at / created at 等写法
    let key = key.replace([' ', '-'], "_");
    let key = key.strip_suffix("_at").unwrap_or(&key).to_string();
    let value = value.trim().trim_start_matches("**").trim().to_string();
    Some((key, value))
}

/// 解析头部；缺失或损坏一律合成默认值（planning / version 1 / 当前时间）
fn parse_header(lines: &[String]) -> (PlanMetadata, PlanStatus) {
    let mut status = PlanStatus::Planning;
    let mut created: Option<DateTime<Utc>> = None;
    let mut updated: Option<DateTime<Utc>> = None;
    let mut version: Option<u64> = None;

    for line in lines {
        let Some((key, value)) = split_key_value(line) else {
            continue;
        };
        match key.as_str() {
            "status" => {
                if let Some(s) = PlanStatus::parse(&value) {
                    status = s;
                }
            }
            "created" => created = parse_ts(&value),
            "updated" => updated = parse_ts(&value),
            "version" => version = parse_u64(&value),
            _ => {}
        }
    }

    let now = now_second();
    let created_at = created.unwrap_or(now);
    // 保持 updated_at >= created_at 不变式，文档里写反了也纠正
    let updated_at = updated.unwrap_or(created_at).max(created_at);
    (
        PlanMetadata {
            created_at,
            updated_at,
            version: version.unwrap_or(1),
        },
        status,
    )
}

fn parse_goal(body: &[String]) -> String {
    let text = body.join("\n").trim().to_string();
    if text.eq_ignore_ascii_case(PLACEHOLDER_GOAL) {
        String::new()
    } else {
        text
    }
}

/// 勾选行：`- [x] 描述`；返回 (是否完成, 描述)
fn parse_checkbox(line: &str) -> Option<(bool, String)> {
    let t = line.trim().trim_start_matches(['-', '*', '+']).trim_start();
    let rest = t.strip_prefix('[')?;
    let close = rest.find(']')?;
    let glyph = rest[..close].trim();
    let completed = glyph
        .chars()
        .next()
        .map(|c| CHECKED_GLYPHS.contains(&c))
        .unwrap_or(false);
    let description = rest[close + 1..].trim().to_string();
    if description.is_empty() {
        return None;
    }
    Some((completed, description))
}

/// Note 附属行：`- Note: xxx` 归到上一条标准
fn parse_note(line: &str) -> Option<String> {
    let (key, value) = split_key_value(line)?;
    if key == "note" || key == "notes" {
        Some(value)
    } else {
        None
    }
}

fn parse_criteria(body: &[String]) -> Vec<AcceptanceCriterion> {
    let mut criteria: Vec<AcceptanceCriterion> = Vec::new();
    for line in body {
        if is_placeholder(line, PLACEHOLDER_CRITERIA) {
            continue;
        }
        if let Some((completed, description)) = parse_checkbox(line) {
            criteria.push(AcceptanceCriterion {
                description,
                completed,
                notes: None,
            });
        } else if let Some(note) = parse_note(line) {
            if let Some(last) = criteria.last_mut() {
                last.notes = Some(note);
            }
        }
        // 其余行（空行、自由文本）直接忽略
    }
    criteria
}

fn is_placeholder(line: &str, placeholder: &str) -> bool {
    line.trim().eq_ignore_ascii_case(placeholder)
}

/// 以 `###` 为界切出条目；返回 (标题, 字段行)
fn split_entries(body: &[String]) -> Vec<(String, Vec<String>)> {
    let mut entries: Vec<(String, Vec<String>)> = Vec::new();
    for line in body {
        if let Some(title) = entry_heading(line) {
            entries.push((title.to_string(), Vec::new()));
        } else if let Some((_, fields)) = entries.last_mut() {
            fields.push(line.clone());
        }
    }
    entries
}

fn labeled_field(fields: &[String], label: &str) -> Option<String> {
    fields.iter().find_map(|line| {
        let (key, value) = split_key_value(line)?;
        if key == label {
            Some(value)
        } else {
            None
        }
    })
}

/// 逗号/顿号分隔的名单；`(none)` 与空串表示空列表
fn parse_name_list(raw: &str) -> Vec<String> {
    let raw = raw.trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case("(none)") || raw.eq_ignore_ascii_case("none") {
        return Vec::new();
    }
    raw.split([',', '、'])
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_decisions(body: &[String], placeholder: &str) -> Vec<Decision> {
    if body.iter().all(|l| {
        l.trim().is_empty() || is_placeholder(l, placeholder)
    }) {
        return Vec::new();
    }
    split_entries(body)
        .into_iter()
        .map(|(title, fields)| Decision {
            title,
            rationale: labeled_field(&fields, "rationale").unwrap_or_default(),
            alternatives: labeled_field(&fields, "alternatives")
                .map(|v| parse_name_list(&v))
                .unwrap_or_default(),
            timestamp: labeled_field(&fields, "date")
                .and_then(|v| parse_ts(&v))
                .unwrap_or_else(now_second),
        })
        .collect()
}

fn parse_log(body: &[String]) -> Vec<ExecutionEntry> {
    if body.iter().all(|l| {
        l.trim().is_empty() || is_placeholder(l, PLACEHOLDER_LOG)
    }) {
        return Vec::new();
    }
    split_entries(body)
        .into_iter()
        .map(|(action, fields)| ExecutionEntry {
            action,
            result: labeled_field(&fields, "result").unwrap_or_default(),
            tools_used: labeled_field(&fields, "tools")
                .map(|v| parse_name_list(&v))
                .unwrap_or_default(),
            timestamp: labeled_field(&fields, "date")
                .and_then(|v| parse_ts(&v))
                .unwrap_or_else(now_second),
        })
        .collect()
}

/// 时间戳宽容解析：RFC3339 优先，退回无时区与纯日期写法
fn parse_ts(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Some(t.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%SZ", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(t) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(t.and_utc());
        }
    }
    if let Ok(d) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return d.and_hms_opt(0, 0, 0).map(|t| t.and_utc());
    }
    None
}

fn parse_u64(raw: &str) -> Option<u64> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}
