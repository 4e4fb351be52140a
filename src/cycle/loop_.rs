//! 三阶段驱动循环
//!
//! 一次用户请求走完 Planning -> Executing -> Summarizing -> Idle：规划产出任务
//! 清单；执行阶段逐任务调用模型，工具批量并发执行、结果写回窗口；总结阶段把
//! 本周期折叠为一条执行日志并用版本标签落盘。计划只在总结阶段变更，执行中途
//! 从不动它。取消在工具调用边界被观察到，直接跳到总结以保留部分进展。

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::AgentError;
use crate::cycle::context::{ContextAssembler, HistoryWindow};
use crate::cycle::events::{LoopEvent, Phase};
use crate::cycle::planner::{
    execution_prompt, parse_model_step, ModelStep, Planner, PLANNING_PROMPT,
};
use crate::cycle::state::{advance, LoopSignal, LoopState};
use crate::cycle::summarizer::{apply_update, Summarizer};
use crate::llm::{LlmError, Message};
use crate::plan::{serialize, Plan, PlanLoader, PlanStore};
use crate::tools::ToolExecutor;

/// Observation 预览最大字符数
const OBSERVATION_PREVIEW_CHARS: usize = 200;

/// 畸形输出后的重试提示
const RETRY_PROMPT: &str = "Your previous reply was neither a valid tool-call JSON nor a \
plain-text final answer. Reply with pure JSON \
{\"tool_calls\": [{\"tool\": \"name\", \"args\": {...}}]} to call tools, or with plain text \
to finish the task.";

/// 一个会话的循环装置：组件按值持有，计划按值装载、按值落盘；
/// 取消令牌每次请求传入（令牌一次性，由 SessionSupervisor 轮换）
pub struct SessionCycle {
    pub planner: Planner,
    pub summarizer: Summarizer,
    pub executor: ToolExecutor,
    pub loader: PlanLoader,
    pub store: Arc<dyn PlanStore>,
    pub assembler: ContextAssembler,
    pub max_task_iterations: u32,
    pub event_tx: Option<mpsc::UnboundedSender<LoopEvent>>,
}

fn phase_of(state: &LoopState) -> Phase {
    match state {
        LoopState::Idle => Phase::Idle,
        LoopState::Planning => Phase::Planning,
        LoopState::Executing { .. } => Phase::Executing,
        LoopState::Summarizing => Phase::Summarizing,
    }
}

impl SessionCycle {
    fn emit(&self, event: LoopEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event);
        }
    }

    /// advance 后若阶段变化则通知前端
    fn step(&self, state: LoopState, signal: LoopSignal) -> LoopState {
        let before = phase_of(&state);
        let next = advance(state, signal, self.max_task_iterations);
        let after = phase_of(&next);
        if before != after {
            self.emit(LoopEvent::PhaseChanged { phase: after });
        }
        next
    }

    /// 跑完一次用户请求；返回给用户的回答文本
    pub async fn run_request(
        &self,
        window: &mut HistoryWindow,
        session_id: &str,
        user_input: &str,
        cancel_token: CancellationToken,
    ) -> Result<String, AgentError> {
        let mut state = self.step(LoopState::Idle, LoopSignal::UserRequest);

        // 计划从外部存储新鲜装载；记下版本号作为总结落盘时的并发护栏
        let raw = self.store.load(session_id).map_err(AgentError::from_store)?;
        let mut plan = match raw {
            Some(text) => self.loader.load(&text).await,
            None => Plan::new(),
        };
        let loaded_version = plan.metadata.version;
        let plan_text = serialize(&plan);

        if cancel_token.is_cancelled() {
            self.step(state, LoopSignal::Cancelled);
            return Err(AgentError::Cancelled);
        }

        // Planning：产出有序任务清单，无条件转入 Executing
        self.emit(LoopEvent::Thinking);
        let planning_system = format!(
            "{}\n\n{}",
            self.planner.base_system_prompt(),
            PLANNING_PROMPT
        );
        let input = self
            .assembler
            .build(&planning_system, &plan_text, window, user_input);
        let tasks = match self.planner.plan_tasks(&input).await {
            Ok(tasks) => tasks,
            // 超时与畸形回复按「退化为单任务」处理；不可达才中止请求
            Err(LlmError::Timeout(_)) | Err(LlmError::Malformed(_)) => {
                vec![user_input.to_string()]
            }
            Err(e) => return Err(AgentError::BackendUnavailable(e.to_string())),
        };
        self.emit(LoopEvent::TasksPlanned {
            tasks: tasks.clone(),
        });
        state = self.step(state, LoopSignal::TasksPlanned(tasks));

        // 本请求作为新一轮进入窗口；执行期间的回复配对挂在这一轮上
        window.begin_turn(user_input);

        let exec_system = format!(
            "{}\n\n{}",
            self.planner.base_system_prompt(),
            execution_prompt(&self.executor.registry().to_schema_json(), user_input)
        );

        let mut answers: Vec<String> = Vec::new();
        let mut failed_tasks: Vec<String> = Vec::new();
        let mut tools_used: Vec<String> = Vec::new();
        let mut cancelled = false;
        let mut task_started_at: Option<usize> = None;

        while let LoopState::Executing {
            tasks,
            cursor,
            attempts,
        } = state.clone()
        {
            // 取消只在工具调用边界观察，不打断执行中的工具
            if cancel_token.is_cancelled() {
                cancelled = true;
                self.emit(LoopEvent::Recovery {
                    action: "Cancel".to_string(),
                    detail: "recording partial progress".to_string(),
                });
                state = self.step(state, LoopSignal::Cancelled);
                break;
            }

            let task = tasks[cursor].clone();
            if task_started_at != Some(cursor) {
                task_started_at = Some(cursor);
                self.emit(LoopEvent::TaskStarted {
                    index: cursor,
                    total: tasks.len(),
                    description: task.clone(),
                });
            }

            self.emit(LoopEvent::Thinking);
            let input = self.assembler.build(&exec_system, &plan_text, window, &task);
            let output = match self.planner.complete(&input).await {
                Ok(output) => output,
                Err(LlmError::Timeout(_)) | Err(LlmError::Malformed(_)) => {
                    // 超时等同一次畸形响应：记一次失败尝试后重试同一任务
                    self.emit(LoopEvent::Recovery {
                        action: "RetryTask".to_string(),
                        detail: "model call timed out or returned nothing".to_string(),
                    });
                    state = self.fail_attempt(state, &task, attempts, &mut failed_tasks);
                    continue;
                }
                Err(e) => return Err(AgentError::BackendUnavailable(e.to_string())),
            };

            match parse_model_step(&output) {
                Ok(ModelStep::FinalAnswer(text)) => {
                    window.push_reply(Message::assistant(text.clone()));
                    self.emit(LoopEvent::TaskAnswer { text: text.clone() });
                    answers.push(text);
                    state = self.step(state, LoopSignal::TaskAnswered);
                }
                Ok(ModelStep::ToolBatch(calls)) => {
                    for call in &calls {
                        self.emit(LoopEvent::ToolCall {
                            tool: call.tool.clone(),
                            args: call.args.clone(),
                        });
                        if !tools_used.contains(&call.tool) {
                            tools_used.push(call.tool.clone());
                        }
                    }
                    // 并发 fan-out/fan-in；聚合只在全部完成后发生，结果保持调用顺序
                    let outcomes = self.executor.execute_batch(&calls).await;
                    for outcome in &outcomes {
                        let preview: String = outcome
                            .output
                            .chars()
                            .take(OBSERVATION_PREVIEW_CHARS)
                            .collect();
                        self.emit(LoopEvent::Observation {
                            tool: outcome.tool.clone(),
                            preview,
                        });
                        let body = if outcome.success {
                            outcome.output.clone()
                        } else {
                            format!("Error: {}", outcome.output)
                        };
                        window.push_reply(Message::assistant(format!(
                            "Tool call: {}",
                            outcome.tool
                        )));
                        window.push_reply(Message::user(format!(
                            "Observation from {}: {}",
                            outcome.tool, body
                        )));
                    }
                    state = self.fail_or_stay(state, &task, attempts, &mut failed_tasks);
                }
                Err(e) => {
                    self.emit(LoopEvent::Recovery {
                        action: "RetryWithPrompt".to_string(),
                        detail: e.to_string(),
                    });
                    window.push_reply(Message::user(RETRY_PROMPT.to_string()));
                    state = self.fail_attempt(state, &task, attempts, &mut failed_tasks);
                }
            }
        }

        // Summarizing：本周期折叠为一条日志并带版本落盘；计划只在这里变更
        if state == LoopState::Summarizing {
            let transcript = window.last_turn_messages();
            let mut update = self
                .summarizer
                .summarize(user_input, &plan_text, &transcript)
                .await;
            if !failed_tasks.is_empty() {
                let failures = format!("failed tasks: {}", failed_tasks.join("; "));
                update.result = if update.result.trim().is_empty() {
                    failures
                } else {
                    format!("{} ({})", update.result, failures)
                };
            }
            apply_update(update, &mut plan, tools_used);

            let text = serialize(&plan);
            if let Err(e) = self.store.save(session_id, &text, loaded_version) {
                let err = AgentError::from_store(e);
                self.emit(LoopEvent::Error {
                    text: err.to_string(),
                });
                return Err(err);
            }
            self.emit(LoopEvent::PlanUpdated { text });
            state = self.step(state, LoopSignal::SummaryPersisted);
        }

        debug_assert_eq!(state, LoopState::Idle);

        if answers.is_empty() {
            if cancelled {
                Ok("(cancelled)".to_string())
            } else {
                Ok("(no answer produced)".to_string())
            }
        } else {
            Ok(answers.join("\n\n"))
        }
    }

    /// 畸形响应：记一次失败尝试；到上限则记失败任务并前移
    fn fail_attempt(
        &self,
        state: LoopState,
        task: &str,
        attempts: u32,
        failed_tasks: &mut Vec<String>,
    ) -> LoopState {
        if attempts + 1 >= self.max_task_iterations {
            failed_tasks.push(task.to_string());
            self.emit(LoopEvent::TaskFailed {
                description: task.to_string(),
                attempts: attempts + 1,
            });
            let err = AgentError::TaskIterationExhausted {
                task: task.to_string(),
                attempts: attempts + 1,
            };
            tracing::warn!(error = %err, "giving up on task");
        }
        self.step(state, LoopSignal::Malformed)
    }

    /// 工具往返同样计入迭代；任务迟迟不收敛也会被放弃
    fn fail_or_stay(
        &self,
        state: LoopState,
        task: &str,
        attempts: u32,
        failed_tasks: &mut Vec<String>,
    ) -> LoopState {
        if attempts + 1 >= self.max_task_iterations {
            failed_tasks.push(task.to_string());
            self.emit(LoopEvent::TaskFailed {
                description: task.to_string(),
                attempts: attempts + 1,
            });
        }
        self.step(state, LoopSignal::ToolsDispatched)
    }
}
