//! 循环过程事件：向控制台/前端推送阶段转移、工具调用、观察与计划更新

use serde::Serialize;

/// 对外可见的阶段（状态机内部细节不外泄）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Planning,
    Executing,
    Summarizing,
}

/// 过程事件（可序列化为 JSON 供前端展示）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LoopEvent {
    /// 阶段转移
    PhaseChanged { phase: Phase },
    /// 规划产出的任务清单
    TasksPlanned { tasks: Vec<String> },
    /// 开始执行某个任务
    TaskStarted {
        index: usize,
        total: usize,
        description: String,
    },
    /// 正在调用 LLM 思考
    Thinking,
    /// 调用工具
    ToolCall {
        tool: String,
        args: serde_json::Value,
    },
    /// 工具返回（预览，避免过长）
    Observation { tool: String, preview: String },
    /// 某个任务得到最终回答
    TaskAnswer { text: String },
    /// 任务到达迭代上限被放弃
    TaskFailed { description: String, attempts: u32 },
    /// 恢复动作（重试提示 / 回退等）
    Recovery { action: String, detail: String },
    /// 总结落盘后的最新计划文档
    PlanUpdated { text: String },
    /// 错误
    Error { text: String },
}
