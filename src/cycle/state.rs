//! 三阶段状态机：Planning -> Executing -> Summarizing -> Idle
//!
//! advance 是纯函数，每个转移都可脱离 I/O 单测；驱动循环（loop_）负责产生
//! 信号并执行副作用。Executing 内每次未完成当前任务的模型往返都计入
//! attempts，到上限即标记任务失败并前移游标，保证循环永不卡死。

/// 单个任务允许的最大模型往返次数（可由配置覆盖；经验值，非承载性常量）
pub const DEFAULT_MAX_TASK_ITERATIONS: u32 = 10;

/// 循环状态；Executing 携带任务清单、游标与当前任务的尝试计数
#[derive(Clone, Debug, PartialEq)]
pub enum LoopState {
    Idle,
    Planning,
    Executing {
        tasks: Vec<String>,
        cursor: usize,
        attempts: u32,
    },
    Summarizing,
}

/// 驱动循环产生的信号
#[derive(Clone, Debug)]
pub enum LoopSignal {
    /// 收到用户请求
    UserRequest,
    /// 规划阶段产出任务清单（可为空）
    TasksPlanned(Vec<String>),
    /// 当前任务得到最终回答，前移游标
    TaskAnswered,
    /// 本轮派发了工具调用，任务未完成，留在原地
    ToolsDispatched,
    /// 模型输出既非工具调用也非回答（或超时），算一次失败尝试
    Malformed,
    /// 用户取消；从 Executing 跳到 Summarizing 以记录部分进展
    Cancelled,
    /// 总结已持久化
    SummaryPersisted,
}

/// 状态转移；未定义的 (状态, 信号) 组合保持原状态（全函数）
pub fn advance(state: LoopState, signal: LoopSignal, max_attempts: u32) -> LoopState {
    match (state, signal) {
        (LoopState::Idle, LoopSignal::UserRequest) => LoopState::Planning,

        (LoopState::Planning, LoopSignal::TasksPlanned(tasks)) => {
            if tasks.is_empty() {
                // 没有可执行任务也要走总结，保证每个周期都落盘一条记录
                LoopState::Summarizing
            } else {
                LoopState::Executing {
                    tasks,
                    cursor: 0,
                    attempts: 0,
                }
            }
        }
        (LoopState::Planning, LoopSignal::Cancelled) => LoopState::Idle,

        (
            LoopState::Executing {
                tasks,
                cursor,
                attempts,
            },
            signal,
        ) => match signal {
            LoopSignal::TaskAnswered => next_task(tasks, cursor),
            LoopSignal::ToolsDispatched | LoopSignal::Malformed => {
                let attempts = attempts + 1;
                if attempts >= max_attempts {
                    next_task(tasks, cursor)
                } else {
                    LoopState::Executing {
                        tasks,
                        cursor,
                        attempts,
                    }
                }
            }
            LoopSignal::Cancelled => LoopState::Summarizing,
            _ => LoopState::Executing {
                tasks,
                cursor,
                attempts,
            },
        },

        (LoopState::Summarizing, LoopSignal::SummaryPersisted) => LoopState::Idle,

        (state, _) => state,
    }
}

fn next_task(tasks: Vec<String>, cursor: usize) -> LoopState {
    let cursor = cursor + 1;
    if cursor >= tasks.len() {
        LoopState::Summarizing
    } else {
        LoopState::Executing {
            tasks,
            cursor,
            attempts: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn executing(tasks: &[&str], cursor: usize, attempts: u32) -> LoopState {
        LoopState::Executing {
            tasks: tasks.iter().map(|s| s.to_string()).collect(),
            cursor,
            attempts,
        }
    }

    #[test]
    fn test_happy_path_walk() {
        let cap = DEFAULT_MAX_TASK_ITERATIONS;
        let s = advance(LoopState::Idle, LoopSignal::UserRequest, cap);
        assert_eq!(s, LoopState::Planning);

        let s = advance(
            s,
            LoopSignal::TasksPlanned(vec!["a".to_string(), "b".to_string()]),
            cap,
        );
        assert_eq!(s, executing(&["a", "b"], 0, 0));

        let s = advance(s, LoopSignal::TaskAnswered, cap);
        assert_eq!(s, executing(&["a", "b"], 1, 0));

        let s = advance(s, LoopSignal::TaskAnswered, cap);
        assert_eq!(s, LoopState::Summarizing);

        let s = advance(s, LoopSignal::SummaryPersisted, cap);
        assert_eq!(s, LoopState::Idle);
    }

    #[test]
    fn test_empty_task_list_skips_to_summarizing() {
        let s = advance(LoopState::Planning, LoopSignal::TasksPlanned(vec![]), 10);
        assert_eq!(s, LoopState::Summarizing);
    }

    #[test]
    fn test_malformed_advances_after_exactly_the_cap() {
        let cap = 10;
        let mut s = executing(&["stubborn"], 0, 0);
        for i in 1..cap {
            s = advance(s, LoopSignal::Malformed, cap);
            assert_eq!(s, executing(&["stubborn"], 0, i), "at attempt {}", i);
        }
        // 第 cap 次失败：任务被放弃，清单走完，进入总结
        s = advance(s, LoopSignal::Malformed, cap);
        assert_eq!(s, LoopState::Summarizing);
    }

    #[test]
    fn test_cap_on_middle_task_moves_to_next() {
        let s = executing(&["a", "b"], 0, 2);
        let s = advance(s, LoopSignal::Malformed, 3);
        assert_eq!(s, executing(&["a", "b"], 1, 0));
    }

    #[test]
    fn test_tool_dispatch_stays_on_task_and_counts() {
        let s = executing(&["a"], 0, 0);
        let s = advance(s, LoopSignal::ToolsDispatched, 10);
        assert_eq!(s, executing(&["a"], 0, 1));
    }

    #[test]
    fn test_answer_resets_attempts_for_next_task() {
        let s = executing(&["a", "b"], 0, 7);
        let s = advance(s, LoopSignal::TaskAnswered, 10);
        assert_eq!(s, executing(&["a", "b"], 1, 0));
    }

    #[test]
    fn test_cancel_from_executing_goes_to_summarizing() {
        let s = executing(&["a", "b"], 0, 3);
        assert_eq!(
            advance(s, LoopSignal::Cancelled, 10),
            LoopState::Summarizing
        );
    }

    #[test]
    fn test_cancel_from_planning_goes_idle() {
        assert_eq!(
            advance(LoopState::Planning, LoopSignal::Cancelled, 10),
            LoopState::Idle
        );
    }

    #[test]
    fn test_undefined_combination_is_identity() {
        assert_eq!(
            advance(LoopState::Idle, LoopSignal::TaskAnswered, 10),
            LoopState::Idle
        );
        assert_eq!(
            advance(LoopState::Summarizing, LoopSignal::Malformed, 10),
            LoopState::Summarizing
        );
    }
}
