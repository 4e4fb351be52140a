//! 工具执行器
//!
//! 持有 ToolRegistry 与全局超时，execute(tool_name, args) 在超时内调用
//! registry.execute，超时或失败时转为 AgentError；execute_batch 并发执行一批
//! 相互独立的调用（fan-out/fan-in），结果保持调用顺序，各元素互不影响；
//! 每次调用输出结构化审计日志（JSON）。

use std::time::{Duration, Instant};

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::time::timeout;

use crate::core::AgentError;
use crate::tools::ToolRegistry;

/// 一次工具调用请求（模型输出解析的产物）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool: String,
    pub args: serde_json::Value,
}

/// 批量执行中单个调用的结果；失败不短路其余调用
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub tool: String,
    pub success: bool,
    pub output: String,
}

/// 工具执行器：对每次调用施加超时，并将结果映射为 AgentError
pub struct ToolExecutor {
    registry: ToolRegistry,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, timeout_secs: u64) -> Self {
        Self {
            registry,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    /// 执行指定工具；超时返回 ToolTimeout，工具返回 Err 则转为 ToolExecutionFailed
    pub async fn execute(
        &self,
        tool_name: &str,
        args: serde_json::Value,
    ) -> Result<String, AgentError> {
        let start = Instant::now();
        let args_preview = args_preview(&args);
        let result = timeout(self.timeout, self.registry.execute(tool_name, args)).await;

        let (ok, outcome): (bool, &str) = match &result {
            Ok(Ok(_)) => (true, "ok"),
            Ok(Err(_)) => (false, "error"),
            Err(_) => (false, "timeout"),
        };
        let duration_ms = start.elapsed().as_millis() as u64;
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool_name,
            "ok": ok,
            "outcome": outcome,
            "duration_ms": duration_ms,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        match result {
            Ok(Ok(content)) => Ok(content),
            Ok(Err(e)) => Err(AgentError::ToolExecutionFailed(e)),
            Err(_) => Err(AgentError::ToolTimeout(tool_name.to_string())),
        }
    }

    /// 并发执行一批独立调用并聚合结果；保持输入顺序，聚合只在全部完成后发生
    pub async fn execute_batch(&self, calls: &[ToolCall]) -> Vec<ToolOutcome> {
        let futures = calls.iter().map(|call| {
            let tool = call.tool.clone();
            let args = call.args.clone();
            async move {
                match self.execute(&tool, args).await {
                    Ok(output) => ToolOutcome {
                        tool,
                        success: true,
                        output,
                    },
                    Err(e) => ToolOutcome {
                        tool,
                        success: false,
                        output: e.to_string(),
                    },
                }
            }
        });
        join_all(futures).await
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.tool_names()
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }
}

fn args_preview(args: &serde_json::Value) -> String {
    let s = args.to_string();
    if s.len() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::EchoTool;

    fn executor() -> ToolExecutor {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);
        ToolExecutor::new(registry, 5)
    }

    #[tokio::test]
    async fn test_batch_preserves_call_order() {
        let ex = executor();
        let calls: Vec<ToolCall> = (0..8)
            .map(|i| ToolCall {
                tool: "echo".to_string(),
                args: serde_json::json!({"text": format!("msg-{}", i)}),
            })
            .collect();
        let outcomes = ex.execute_batch(&calls).await;
        assert_eq!(outcomes.len(), 8);
        for (i, o) in outcomes.iter().enumerate() {
            assert!(o.success);
            assert_eq!(o.output, format!("msg-{}", i));
        }
    }

    #[tokio::test]
    async fn test_unknown_tool_fails_only_its_element() {
        let ex = executor();
        let calls = vec![
            ToolCall {
                tool: "echo".to_string(),
                args: serde_json::json!({"text": "ok"}),
            },
            ToolCall {
                tool: "no_such_tool".to_string(),
                args: serde_json::json!({}),
            },
        ];
        let outcomes = ex.execute_batch(&calls).await;
        assert!(outcomes[0].success);
        assert!(!outcomes[1].success);
        assert!(outcomes[1].output.contains("Unknown tool"));
    }
}
