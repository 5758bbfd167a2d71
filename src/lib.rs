//! Delve - Rust 对话式研究智能体
//!
//! 模块划分：
//! - **agent**: 运行时装配（配置 → LLM / 搜索 / 存储 → GraphRunner）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型
//! - **graph**: 对话编排图（状态、路由、节点、invoke / resume 驱动循环、事件流）
//! - **hitl**: 人机协同中断载荷与 resume 值解析
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Mock）与模型表
//! - **memory**: 消息模型、检查点存储、线程持久化
//! - **observability**: 日志初始化
//! - **research**: 深度研究子流程（clarify → orchestrate → 并行 explore → synthesize → review）
//! - **retrieval**: 文档上下文检索接缝
//! - **schemas**: 结构化输出 Schema
//! - **tools**: 工具箱、路由哨兵、注册表与执行器

pub mod agent;
pub mod config;
pub mod core;
pub mod graph;
pub mod hitl;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod research;
pub mod retrieval;
pub mod schemas;
pub mod tools;

pub use core::AgentError;
pub use graph::{GraphRunner, RunEvent, RunHooks, RunOutcome};
