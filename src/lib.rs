//! Reactly - 分阶段提示编排引擎
//!
//! 模块划分：
//! - **agent**: 面向 CLI / 评测的 Agent 外观（query(text) -> text，对话历史）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误分类
//! - **eval**: 带标注样例的评测（EM / F1 / 耗时）
//! - **llm**: Oracle 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Scripted Mock）
//! - **memory**: 对话历史
//! - **react**: 编排 Stage 与任务 / 工具主循环
//! - **stage**: 声明式 Stage 的编译与调用
//! - **tools**: Tool 契约、注册表、执行器与内置工具
//! - **trace**: 层级事件树、渲染与查询记录持久化

pub mod agent;
pub mod config;
pub mod core;
pub mod eval;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod react;
pub mod stage;
pub mod tools;
pub mod trace;

pub use agent::ReactlyAgent;
pub use crate::core::AgentError;
