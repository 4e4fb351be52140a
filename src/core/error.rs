//! Agent 错误类型
//!
//! 分级处理：BackendUnavailable 中止当前请求；VersionConflict 上浮给用户；
//! 任务级失败（畸形响应、迭代耗尽、工具失败）记入执行日志后循环继续；
//! 计划解析失败不在此列：它由 PlanLoader 内部消化，永远不会上浮。

use thiserror::Error;

use crate::plan::StoreError;

/// Agent 运行过程中可能出现的错误
#[derive(Error, Debug)]
pub enum AgentError {
    /// 模型或工具后端不可达；当前请求立即中止，计划未发生部分变更
    #[error("model backend unavailable: {0}")]
    BackendUnavailable(String),

    /// 总结写入时检测到并发修改；提示用户重试，不做自动合并
    #[error("plan changed externally, please retry (expected version {expected}, found {actual})")]
    VersionConflict { expected: u64, actual: u64 },

    /// 单个任务重试到迭代上限；记为失败任务后循环继续
    #[error("task failed after {attempts} attempts: {task}")]
    TaskIterationExhausted { task: String, attempts: u32 },

    /// 模型输出既不是工具调用也不是最终回答
    #[error("malformed model response: {0}")]
    MalformedResponse(String),

    #[error("tool execution failed: {0}")]
    ToolExecutionFailed(String),

    #[error("tool timeout: {0}")]
    ToolTimeout(String),

    #[error("cancelled by user")]
    Cancelled,

    #[error("config error: {0}")]
    ConfigError(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl AgentError {
    /// 从存储错误转换时保留版本冲突的语义
    pub fn from_store(e: StoreError) -> Self {
        match e {
            StoreError::VersionConflict { expected, actual } => {
                AgentError::VersionConflict { expected, actual }
            }
            other => AgentError::Store(other),
        }
    }
}
