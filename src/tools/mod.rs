//! 工具箱：Tool 契约、注册表、执行器与内置示例工具（calculator、text_count）

pub mod calculator;
pub mod executor;
pub mod registry;
pub mod text_count;

use crate::core::AgentError;

pub use calculator::CalculatorTool;
pub use executor::{failure_output, ToolExecutor};
pub use registry::{parameters_from_schema, tool_descriptor, FnTool, Tool, ToolParameter, ToolRegistry};
pub use text_count::TextCountTool;

/// 内置工具名
pub const BUILTIN_TOOLS: &[&str] = &["calculator", "text_count"];

/// 按名称组装内置工具注册表（保持给定顺序）；未知名称返回 UnknownTool
pub fn builtin_registry<S: AsRef<str>>(names: &[S]) -> Result<ToolRegistry, AgentError> {
    let mut registry = ToolRegistry::new();
    for name in names {
        match name.as_ref() {
            "calculator" => registry.register(CalculatorTool),
            "text_count" => registry.register(TextCountTool),
            other => return Err(AgentError::UnknownTool(other.to_string())),
        }
    }
    Ok(registry)
}
