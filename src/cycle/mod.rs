//! 编排循环层：状态机、驱动循环、任务规划、总结折叠、有界上下文装配

pub mod context;
pub mod events;
pub mod loop_;
pub mod planner;
pub mod state;
pub mod summarizer;

pub use context::{ContextAssembler, HistoryWindow, Turn};
pub use events::{LoopEvent, Phase};
pub use loop_::SessionCycle;
pub use planner::{parse_model_step, parse_task_list, ModelStep, Planner};
pub use state::{advance, LoopSignal, LoopState, DEFAULT_MAX_TASK_ITERATIONS};
pub use summarizer::{apply_update, DecisionUpdate, Summarizer, SummaryUpdate};
