//! Agent 外观
//!
//! 供 CLI 与评测调用：持有编排器、对话历史与 Tracer 根句柄。
//! 每次 query 在根下新建一个 query 事件，最近一次的句柄保留下来用于故障转储（/trace）。

use std::sync::Arc;

use crossterm::style::Color;

use crate::config::{load_config, AppConfig};
use crate::core::AgentError;
use crate::llm::{create_llm_from_config, LlmClient};
use crate::memory::{ChatExchange, ConversationMemory};
use crate::react::{Orchestrator, QueryOutcome};
use crate::tools::{ToolExecutor, ToolRegistry};
use crate::trace::{format_failed_message, EventKind, FormatConfig, Tracer};

pub struct ReactlyAgent {
    orchestrator: Orchestrator,
    memory: ConversationMemory,
    tracer: Tracer,
    last_query: Option<Tracer>,
}

impl ReactlyAgent {
    /// 组装 Agent；Stage 声明非法时返回 IllegalDefinition
    pub fn new(
        llm: Arc<dyn LlmClient>,
        registry: ToolRegistry,
        cfg: &AppConfig,
        tracer: Tracer,
    ) -> Result<Self, AgentError> {
        let executor = ToolExecutor::new(registry, cfg.tools.tool_timeout_secs);
        let orchestrator = Orchestrator::new(llm, executor, &cfg.orchestrator, cfg.stage.tries)?;
        Ok(Self {
            orchestrator,
            memory: ConversationMemory::new(cfg.orchestrator.max_history_turns),
            tracer,
            last_query: None,
        })
    }

    /// 从配置文件与环境变量组装：Oracle 后端按配置选择，Tracer 按 [trace] 段创建
    pub fn from_config(registry: ToolRegistry) -> Result<Self, AgentError> {
        let cfg = load_config(None).map_err(|e| AgentError::Config(e.to_string()))?;
        let llm = create_llm_from_config(&cfg);
        let tracer = Tracer::new(cfg.trace.to_trace_config());
        Self::new(llm, registry, &cfg, tracer)
    }

    /// 回答一个问题，只返回最终回答
    pub async fn query(&mut self, text: &str) -> Result<String, AgentError> {
        Ok(self.query_detailed(text).await?.answer)
    }

    /// 回答一个问题，返回任务结果与工具运行记录；成功的问答写入对话历史
    pub async fn query_detailed(&mut self, text: &str) -> Result<QueryOutcome, AgentError> {
        let query = self
            .tracer
            .on("query", serde_json::json!({ "user_question": text }));
        self.last_query = Some(query.clone());
        let outcome = self
            .orchestrator
            .answer_query(text, self.memory.exchanges(), &query)
            .await?;
        self.memory.push(text, outcome.answer.clone());
        Ok(outcome)
    }

    pub fn history(&self) -> &[ChatExchange] {
        self.memory.exchanges()
    }

    pub fn clear_history(&mut self) {
        self.memory.clear();
    }

    /// Tracer 根句柄（整个会话）
    pub fn tracer(&self) -> &Tracer {
        &self.tracer
    }

    /// 最近一次 query 事件的句柄
    pub fn last_query(&self) -> Option<&Tracer> {
        self.last_query.as_ref()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.orchestrator.executor().registry().tool_names()
    }

    /// 最近一次 query 的故障报告：每个 failed 事件一行，再附完整事件树；无失败时返回 None
    pub fn failure_report(&self, cfg: &FormatConfig) -> Option<String> {
        let query = self.last_query.as_ref()?;
        let tree = query.export();
        if tree.count_kind(EventKind::Failed) == 0 {
            return None;
        }
        let mut report = String::new();
        for event in tree.walk() {
            if event.kind() == EventKind::Failed {
                let line = format!("{}: {}", event.seq, format_failed_message(event));
                report.push_str(&cfg.paint(line, Color::Red));
                report.push('\n');
            }
        }
        report.push_str(&query.format(cfg));
        Some(report)
    }
}
