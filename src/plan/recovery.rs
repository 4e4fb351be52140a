//! 解析失败恢复
//!
//! 计划文档解析失败时，把诊断与期望布局发回模型请它重新产出，重试预算小且
//! 固定（默认 1 次）；预算耗尽则回退到全新空计划而不是中止会话：计划丢了
//! 还能靠后续总结阶段重建，会话断了就什么都没有了。每次回退都打日志。

use std::sync::Arc;

use crate::llm::{LlmClient, Message};
use crate::plan::model::Plan;
use crate::plan::parse::deserialize;

/// 计划装载器：持有 LLM 与纠正重试预算
pub struct PlanLoader {
    llm: Arc<dyn LlmClient>,
    correct_attempts: u32,
}

impl PlanLoader {
    pub fn new(llm: Arc<dyn LlmClient>, correct_attempts: u32) -> Self {
        Self {
            llm,
            correct_attempts,
        }
    }

    /// 解析原始文本；失败时走纠正往返，最终保证返回一个合法 Plan
    pub async fn load(&self, raw: &str) -> Plan {
        let mut failure = match deserialize(raw) {
            Ok(plan) => return plan,
            Err(f) => f,
        };

        for attempt in 1..=self.correct_attempts {
            tracing::warn!(
                attempt,
                diagnosis = %failure.diagnosis,
                "plan parse failed, requesting corrected document"
            );
            let messages = [
                Message::system(failure.corrective_prompt.clone()),
                Message::user(raw.to_string()),
            ];
            match self.llm.complete(&messages).await {
                Ok(reply) => match deserialize(&reply) {
                    Ok(plan) => {
                        tracing::info!(attempt, "corrected plan document accepted");
                        return plan;
                    }
                    Err(f) => failure = f,
                },
                Err(e) => {
                    tracing::warn!(error = %e, "corrective request failed");
                    break;
                }
            }
        }

        tracing::warn!(
            diagnosis = %failure.diagnosis,
            "plan recovery exhausted, falling back to an empty plan"
        );
        Plan::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;
    use crate::plan::model::PlanStatus;

    const VALID_DOC: &str = "# Plan\n\nStatus: in_progress\nVersion: 5\n\n## Goal\n\nShip it\n";

    #[tokio::test]
    async fn test_well_formed_document_needs_no_correction() {
        // scripted 为空：若走了纠正往返会落到默认回复并解析失败
        let loader = PlanLoader::new(Arc::new(MockLlmClient::scripted(vec![])), 1);
        let plan = loader.load(VALID_DOC).await;
        assert_eq!(plan.status, PlanStatus::InProgress);
        assert_eq!(plan.metadata.version, 5);
    }

    #[tokio::test]
    async fn test_corrective_round_trip_recovers() {
        let llm = Arc::new(MockLlmClient::scripted(vec![VALID_DOC.to_string()]));
        let loader = PlanLoader::new(llm, 1);
        let plan = loader.load("complete garbage without structure").await;
        assert_eq!(plan.goal, "Ship it");
        assert_eq!(plan.metadata.version, 5);
    }

    #[tokio::test]
    async fn test_exhausted_retries_fall_back_to_empty_plan() {
        let llm = Arc::new(MockLlmClient::scripted(vec![
            "still garbage".to_string(),
            "more garbage".to_string(),
        ]));
        let loader = PlanLoader::new(llm, 2);
        let plan = loader.load("not a plan at all").await;
        assert_eq!(plan.status, PlanStatus::Planning);
        assert!(plan.goal.is_empty());
        assert_eq!(plan.metadata.version, 1);
    }

    #[tokio::test]
    async fn test_zero_budget_falls_back_immediately() {
        let loader = PlanLoader::new(Arc::new(MockLlmClient::new()), 0);
        let plan = loader.load("").await;
        assert_eq!(plan.status, PlanStatus::Planning);
        assert!(plan.execution_log.is_empty());
    }
}
