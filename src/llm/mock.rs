//! Mock LLM 客户端（测试与离线运行，无需模型服务）
//!
//! scripted 模式按队列逐条吐出预设回复；队列耗尽或未预设时按提示内容
//! 猜测阶段：规划提示 -> 单任务列表，总结提示 -> 总结 JSON，其余回显
//! 最后一条 User 消息，便于不起后端也能跑通整个三阶段循环。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{LlmClient, LlmError, Message, Role};

/// Mock 客户端
#[derive(Debug, Default)]
pub struct MockLlmClient {
    replies: Mutex<VecDeque<String>>,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 预设回复队列；每次 complete 取出一条，耗尽后回到默认行为
    pub fn scripted(replies: Vec<String>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
        }
    }

    fn default_reply(messages: &[Message]) -> String {
        let system = messages
            .iter()
            .find(|m| matches!(m.role, Role::System))
            .map(|m| m.content.as_str())
            .unwrap_or("");
        let last_user = messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, Role::User))
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");

        if system.contains("ordered task list") {
            format!(r#"{{"tasks": ["{}"]}}"#, last_user.replace('"', "'"))
        } else if system.contains("log entry") {
            r#"{"action": "Handled the request", "result": "done"}"#.to_string()
        } else {
            format!("Echo from Mock: {}", last_user)
        }
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        if let Ok(mut q) = self.replies.lock() {
            if let Some(reply) = q.pop_front() {
                return Ok(reply);
            }
        }
        Ok(Self::default_reply(messages))
    }
}
