//! 计划文档引擎：类型模型、文本序列化/宽容解析、失败恢复、版本化存储

pub mod model;
pub mod parse;
pub mod recovery;
pub mod serialize;
pub mod store;

pub use model::{
    now_second, AcceptanceCriterion, Decision, ExecutionEntry, Plan, PlanMetadata, PlanStatus,
};
pub use parse::{deserialize, header_version, ParseFailure, EXPECTED_LAYOUT};
pub use recovery::PlanLoader;
pub use serialize::serialize;
pub use store::{FilePlanStore, MemoryPlanStore, PlanStore, StoreError};
