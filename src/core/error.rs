//! Agent 错误类型
//!
//! 对应编排引擎的错误分类：定义期错误（IllegalDefinition）致命；解码 / 工具错误在产生处被吸收并降级；
//! 只有 Transport（Oracle 不可达）会中止整个查询。

use thiserror::Error;

/// 引擎运行过程中可能出现的错误
#[derive(Error, Debug)]
pub enum AgentError {
    /// Stage 声明与示例标签不一致等，定义期即失败
    #[error("Illegal stage definition '{stage}': {reason}")]
    IllegalDefinition { stage: String, reason: String },

    /// Oracle 回复不符合声明的编码；Stage 内部重试，耗尽后降级为哨兵值
    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Tool execution failed: {0}")]
    ToolFailed(String),

    #[error("Tool timeout: {0}")]
    ToolTimeout(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// Oracle 不可达或返回错误，作为查询级失败向上传播
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AgentError {
    /// 错误类别名（写入 trace 的 errtype 字段）
    pub fn kind(&self) -> &'static str {
        match self {
            AgentError::IllegalDefinition { .. } => "IllegalDefinition",
            AgentError::Decode(_) => "DecodeError",
            AgentError::ToolFailed(_) | AgentError::ToolTimeout(_) | AgentError::UnknownTool(_) => {
                "ToolError"
            }
            AgentError::Transport(_) => "TransportError",
            AgentError::Config(_) => "ConfigError",
            AgentError::Io(_) => "IoError",
        }
    }

    /// 是否会中止整个查询（其余错误都在本地被吸收）
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AgentError::Transport(_) | AgentError::IllegalDefinition { .. } | AgentError::Config(_)
        )
    }
}
