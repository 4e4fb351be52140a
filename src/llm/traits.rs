//! LLM 客户端抽象
//!
//! 所有后端（本地 OpenAI 兼容端点 / Mock）实现 LlmClient::complete；
//! 错误按传输层分类（超时 / 不可达 / HTTP 状态 / 响应畸形），
//! 重试与退避是外部协作者的事，循环本身不做。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 消息角色（与 OpenAI 风格 API 一致）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    User,
    Assistant,
    System,
}

/// 单条消息
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// 后端调用错误；Timeout 在循环里按畸形响应处理，Unreachable/Http 立即上浮
#[derive(Error, Debug, Clone)]
pub enum LlmError {
    #[error("request timed out after {0}s")]
    Timeout(u64),

    #[error("backend unreachable: {0}")]
    Unreachable(String),

    #[error("http status {0}")]
    Http(u16),

    #[error("malformed backend reply: {0}")]
    Malformed(String),
}

/// LLM 客户端 trait：单一操作 complete
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成；输入即 Context Assembler 的输出
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError>;

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
