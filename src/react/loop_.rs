//! 编排主循环
//!
//! split -> 每个任务：enhance -> 对全部工具 rate -> 排序选择 -> 逐个 generate_input + 调用工具
//! -> answer_task；全部任务完成后 answer_question。
//! Stage 的哨兵值在调用处降级为中性值；只有 Oracle 传输失败会中止查询。

use std::sync::Arc;

use serde_json::{json, Value};

use crate::config::{OrchestratorSection, StopPolicy};
use crate::core::AgentError;
use crate::llm::LlmClient;
use crate::memory::ChatExchange;
use crate::react::stages::OrchestratorStages;
use crate::react::types::{select_tools, QueryOutcome, RatedTool, TaskResult, ToolRunRecord};
use crate::tools::{tool_descriptor, ToolExecutor};
use crate::trace::Tracer;

/// 任务 / 工具编排器：Stage 在创建时编译一次，之后只读
pub struct Orchestrator {
    llm: Arc<dyn LlmClient>,
    stages: OrchestratorStages,
    executor: ToolExecutor,
    score_threshold: f64,
    max_tool_runs: usize,
    stop_policy: StopPolicy,
}

impl Orchestrator {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        executor: ToolExecutor,
        cfg: &OrchestratorSection,
        tries: usize,
    ) -> Result<Self, AgentError> {
        Ok(Self {
            stages: OrchestratorStages::compile(Arc::clone(&llm), tries)?,
            llm,
            executor,
            score_threshold: cfg.score_threshold,
            max_tool_runs: cfg.max_tool_runs_per_task.max(1),
            stop_policy: cfg.stop_policy,
        })
    }

    pub fn executor(&self) -> &ToolExecutor {
        &self.executor
    }

    /// 在 tracer 下创建 query 事件并回答问题；失败时 query 事件下追加 failed
    pub async fn run_query(
        &self,
        question: &str,
        history: &[ChatExchange],
        tracer: &Tracer,
    ) -> Result<QueryOutcome, AgentError> {
        let query = tracer.on("query", json!({ "user_question": question }));
        self.answer_query(question, history, &query).await
    }

    /// 在已存在的 query 事件下回答问题
    pub async fn answer_query(
        &self,
        question: &str,
        history: &[ChatExchange],
        query: &Tracer,
    ) -> Result<QueryOutcome, AgentError> {
        tracing::info!(question = %question, "Query started");
        let before = self.llm.token_usage();
        let solved = self.solve(question, history, query).await;
        let (prompt, completion, total) = token_delta(before, self.llm.token_usage());
        query.add_arg(
            "tokens",
            json!({"prompt": prompt, "completion": completion, "total": total}),
        );
        match solved {
            Ok(outcome) => {
                query.on("result", json!({ "result": outcome.answer }));
                tracing::info!(
                    tasks = outcome.task_results.len(),
                    tool_runs = outcome.tool_runs.len(),
                    tokens = total,
                    "Query finished"
                );
                Ok(outcome)
            }
            Err(e) => {
                query.on(
                    "failed",
                    json!({
                        "reason_code": "query_aborted",
                        "exception": e.to_string(),
                        "errtype": e.kind(),
                    }),
                );
                tracing::error!("Query aborted: {}", e);
                Err(e)
            }
        }
    }

    async fn solve(
        &self,
        question: &str,
        history: &[ChatExchange],
        query: &Tracer,
    ) -> Result<QueryOutcome, AgentError> {
        let tools = self.executor.registry().descriptors();

        let tasks: Vec<String> = self
            .stages
            .split
            .invoke_or_default(json!({"Tools": tools, "Question": question}), query)
            .await?;
        let tasks: Vec<String> = tasks
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        tracing::info!(count = tasks.len(), "Question split into tasks");

        let mut outcome = QueryOutcome::default();
        for task in &tasks {
            let task_tracer = query.on("task", json!({ "task": task }));
            let (result, runs) = self
                .solve_task(task, &tools, &outcome.task_results, &task_tracer)
                .await?;
            task_tracer.on("result", json!({ "result": result.result }));
            outcome.task_results.push(result);
            outcome.tool_runs.extend(runs);
        }

        outcome.answer = self
            .stages
            .answer_question
            .invoke_or_default(
                json!({
                    "Question": question,
                    "Conversation": history,
                    "Task Results": outcome.task_results,
                }),
                query,
            )
            .await?;
        Ok(outcome)
    }

    async fn solve_task(
        &self,
        task: &str,
        tools: &Value,
        previous: &[TaskResult],
        tracer: &Tracer,
    ) -> Result<(TaskResult, Vec<ToolRunRecord>), AgentError> {
        let enhanced = self
            .stages
            .enhance
            .invoke(
                json!({"Task": task, "Tools": tools, "Previous Results": previous}),
                tracer,
            )
            .await?
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| task.to_string());
        tracer.add_arg("enhanced", Value::String(enhanced.clone()));

        let mut rated = Vec::with_capacity(self.executor.registry().len());
        for tool in self.executor.registry().tools() {
            let score = self
                .stages
                .rate
                .invoke_or_default(
                    json!({"Task": enhanced, "Tool": tool_descriptor(tool.as_ref())}),
                    tracer,
                )
                .await?;
            rated.push(RatedTool::new(Arc::clone(tool), score));
        }
        tracer.add_arg(
            "ratings",
            Value::Array(
                rated
                    .iter()
                    .map(|r| json!({"tool": r.tool.name(), "score": r.score}))
                    .collect(),
            ),
        );

        let selected = select_tools(rated, self.score_threshold);
        if selected.len() > self.max_tool_runs {
            tracing::warn!(
                selected = selected.len(),
                cap = self.max_tool_runs,
                "Tool runs capped for task"
            );
        }

        let mut runs: Vec<ToolRunRecord> = Vec::new();
        for rated in selected.into_iter().take(self.max_tool_runs) {
            let tool = rated.tool;
            let input = self
                .stages
                .generate_input
                .invoke_or_default(
                    json!({"Task": enhanced, "Tool": tool_descriptor(tool.as_ref())}),
                    tracer,
                )
                .await?;
            let input = Value::Object(input);
            let output = self
                .executor
                .run_traced(tool.as_ref(), input.clone(), tracer)
                .await;
            runs.push(ToolRunRecord {
                tool: tool.name().to_string(),
                input,
                output,
            });

            if self.stop_policy == StopPolicy::CanAnswer {
                let done = self
                    .stages
                    .can_answer
                    .invoke_or_default(json!({"Task": enhanced, "Tool Runs": runs}), tracer)
                    .await?;
                if done {
                    tracing::debug!(task = %enhanced, "Enough tool results, stopping early");
                    break;
                }
            }
        }

        let answer = self
            .stages
            .answer_task
            .invoke_or_default(json!({"Task": enhanced, "Tool Runs": runs}), tracer)
            .await?;
        Ok((
            TaskResult {
                task: enhanced,
                result: answer,
            },
            runs,
        ))
    }
}

/// 本次查询消耗的 token：(prompt, completion, total)
fn token_delta(before: (u64, u64, u64), after: (u64, u64, u64)) -> (u64, u64, u64) {
    let prompt = after.0.saturating_sub(before.0);
    let completion = after.1.saturating_sub(before.1);
    (prompt, completion, prompt + completion)
}
