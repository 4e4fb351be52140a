//! Wasp - Rust 计划驱动智能体
//!
//! 以单份结构化计划文档为会话持久记忆，三阶段循环（规划 -> 执行 -> 总结）
//! 驱动模型分步完成任务，喂给模型的上下文与会话长度无关、始终有界。
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误分级、会话监管、编排主控循环
//! - **cycle**: 三阶段状态机、驱动循环、任务规划、总结折叠、上下文装配
//! - **llm**: LLM 客户端抽象与实现（本地 OpenAI 兼容端点 / Mock）
//! - **observability**: tracing 初始化
//! - **plan**: 计划文档引擎（模型、序列化/宽容解析、恢复、版本化存储）
//! - **tools**: 工具箱（cat、ls、echo、shell）与批量执行器

pub mod config;
pub mod core;
pub mod cycle;
pub mod llm;
pub mod observability;
pub mod plan;
pub mod tools;
