//! 计划文档的类型化表示
//!
//! Plan 是一个会话的持久记忆单元：状态、目标、验收标准、已做/已否决的决策、
//! 追加式执行日志与元数据（时间戳、版本号）。版本号在每次成功变更时递增，
//! 作为乐观并发写入的令牌。

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// 计划状态；planning 之外的状态要求非空 goal
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Planning,
    InProgress,
    Blocked,
    Completed,
    Failed,
}

impl PlanStatus {
    /// 序列化到文档头部的固定写法
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanStatus::Planning => "planning",
            PlanStatus::InProgress => "in_progress",
            PlanStatus::Blocked => "blocked",
            PlanStatus::Completed => "completed",
            PlanStatus::Failed => "failed",
        }
    }

    /// 宽容解析：大小写不敏感，允许连字符/空格写法（LLM 常混用 in-progress / In Progress）
    pub fn parse(raw: &str) -> Option<Self> {
        let norm = raw.trim().to_lowercase().replace(['-', ' '], "_");
        match norm.as_str() {
            "planning" => Some(PlanStatus::Planning),
            "in_progress" => Some(PlanStatus::InProgress),
            "blocked" => Some(PlanStatus::Blocked),
            "completed" | "done" => Some(PlanStatus::Completed),
            "failed" => Some(PlanStatus::Failed),
            _ => None,
        }
    }
}

/// 验收标准：可勾选的完成条件；顺序有意义，描述不要求唯一
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AcceptanceCriterion {
    pub description: String,
    pub completed: bool,
    pub notes: Option<String>,
}

impl AcceptanceCriterion {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            completed: false,
            notes: None,
        }
    }
}

/// 决策记录；made 与 rejected 两个列表永不合并，移动只通过显式删除+插入
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub title: String,
    pub rationale: String,
    pub alternatives: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

/// 执行日志条目；写入后不再编辑，修正以新条目表达
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecutionEntry {
    pub timestamp: DateTime<Utc>,
    pub action: String,
    pub result: String,
    pub tools_used: Vec<String>,
}

/// 元数据：创建/更新时间与版本号（乐观并发令牌）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlanMetadata {
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

/// 一个会话的计划文档
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub status: PlanStatus,
    pub goal: String,
    pub acceptance_criteria: Vec<AcceptanceCriterion>,
    pub decisions_made: Vec<Decision>,
    pub decisions_rejected: Vec<Decision>,
    pub execution_log: Vec<ExecutionEntry>,
    pub metadata: PlanMetadata,
}

/// 当前时间截断到整秒；文本序列化只保留秒级精度，截断后往返无损
pub fn now_second() -> DateTime<Utc> {
    let t = Utc::now();
    t.with_nanosecond(0).unwrap_or(t)
}

impl Plan {
    /// 空计划：planning 状态、空目标、版本 1；也是解析恢复耗尽后的安全回退值
    pub fn new() -> Self {
        let now = now_second();
        Self {
            status: PlanStatus::Planning,
            goal: String::new(),
            acceptance_criteria: Vec::new(),
            decisions_made: Vec::new(),
            decisions_rejected: Vec::new(),
            execution_log: Vec::new(),
            metadata: PlanMetadata {
                created_at: now,
                updated_at: now,
                version: 1,
            },
        }
    }

    /// 一次成功变更后调用：版本 +1，刷新 updated_at（保证不早于 created_at）
    pub fn touch(&mut self) {
        self.metadata.version += 1;
        let now = now_second();
        self.metadata.updated_at = now.max(self.metadata.created_at);
    }

    /// 不变式检查：planning 之外的状态要求非空 goal；违反时降级回 planning 而非报错
    pub fn enforce_status_invariant(&mut self) {
        if self.status != PlanStatus::Planning && self.goal.trim().is_empty() {
            self.status = PlanStatus::Planning;
        }
    }

    pub fn append_log(&mut self, entry: ExecutionEntry) {
        self.execution_log.push(entry);
    }
}

impl Default for Plan {
    fn default() -> Self {
        Self::new()
    }
}
