//! 编排层：数据类型、七个编排 Stage、任务 / 工具主循环

pub mod loop_;
pub mod stages;
pub mod types;

pub use loop_::Orchestrator;
pub use stages::OrchestratorStages;
pub use types::{select_tools, QueryOutcome, RatedTool, TaskResult, ToolRunRecord};
