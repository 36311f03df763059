//! 评测：对带标注的问答样例逐个运行 Agent，汇总完成率、耗时与 EM / F1
//!
//! 每个样例使用独立的 ReactlyAgent（各自的工具注册表与空对话历史），共享同一个 Tracer。
//! 超过墙钟超时的样例记为失败，不需要编排器配合取消。

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::agent::ReactlyAgent;
use crate::config::AppConfig;
use crate::core::AgentError;
use crate::llm::LlmClient;
use crate::tools::{builtin_registry, BUILTIN_TOOLS};
use crate::trace::Tracer;

/// 一条标注样例；未给出 tools 时使用全部内置工具，给出空列表则不挂任何工具
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalExample {
    #[serde(default)]
    pub id: Option<String>,
    pub question: String,
    pub expected: String,
    #[serde(default)]
    pub tools: Option<Vec<String>>,
}

/// 读取 JSONL 样例文件，空行跳过
pub fn load_examples(path: impl AsRef<Path>) -> Result<Vec<EvalExample>, AgentError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)?;
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str(line).map_err(|e| {
                AgentError::Config(format!("{}:{}: {}", path.display(), i + 1, e))
            })
        })
        .collect()
}

/// 小写、去标点、去冠词（a / an / the）、合并空白
pub fn normalize_answer(text: &str) -> String {
    let lowered: String = text
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || c.is_whitespace() { c } else { ' ' })
        .collect();
    lowered
        .split_whitespace()
        .filter(|w| !matches!(*w, "a" | "an" | "the"))
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn exact_match(prediction: &str, truth: &str) -> bool {
    normalize_answer(prediction) == normalize_answer(truth)
}

/// 归一化后按词计算的 F1（词按多重集合计数）
pub fn f1_score(prediction: &str, truth: &str) -> f64 {
    let pred = normalize_answer(prediction);
    let gold = normalize_answer(truth);
    let pred_tokens: Vec<&str> = pred.split_whitespace().collect();
    let gold_tokens: Vec<&str> = gold.split_whitespace().collect();
    if pred_tokens.is_empty() || gold_tokens.is_empty() {
        return if pred_tokens == gold_tokens { 1.0 } else { 0.0 };
    }

    let mut counts: HashMap<&str, usize> = HashMap::new();
    for t in &gold_tokens {
        *counts.entry(t).or_default() += 1;
    }
    let mut common = 0usize;
    for t in &pred_tokens {
        if let Some(c) = counts.get_mut(t) {
            if *c > 0 {
                *c -= 1;
                common += 1;
            }
        }
    }
    if common == 0 {
        return 0.0;
    }
    let precision = common as f64 / pred_tokens.len() as f64;
    let recall = common as f64 / gold_tokens.len() as f64;
    2.0 * precision * recall / (precision + recall)
}

/// 单个样例的结果；answer 为 None 表示失败或超时
#[derive(Debug, Clone, Serialize)]
pub struct EvalOutcome {
    pub id: Option<String>,
    pub question: String,
    pub expected: String,
    pub answer: Option<String>,
    pub error: Option<String>,
    pub duration_secs: f64,
    pub em: f64,
    pub f1: f64,
}

/// 汇总：em / f1 为全部样例的平均值（失败计 0），耗时只统计完成的样例
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EvalSummary {
    pub nr_total: usize,
    pub nr_finished: usize,
    pub nr_failed: usize,
    pub duration_total: f64,
    pub duration_avg: f64,
    pub duration_min: f64,
    pub duration_max: f64,
    pub em: f64,
    pub f1: f64,
}

impl EvalSummary {
    pub fn from_outcomes(outcomes: &[EvalOutcome]) -> Self {
        let nr_total = outcomes.len();
        let durations: Vec<f64> = outcomes
            .iter()
            .filter(|o| o.answer.is_some())
            .map(|o| o.duration_secs)
            .collect();
        let nr_finished = durations.len();
        let duration_total: f64 = durations.iter().sum();
        let mean = |sum: f64, n: usize| if n == 0 { 0.0 } else { sum / n as f64 };

        Self {
            nr_total,
            nr_finished,
            nr_failed: nr_total - nr_finished,
            duration_total,
            duration_avg: mean(duration_total, nr_finished),
            duration_min: durations.iter().copied().reduce(f64::min).unwrap_or(0.0),
            duration_max: durations.iter().copied().reduce(f64::max).unwrap_or(0.0),
            em: mean(outcomes.iter().map(|o| o.em).sum(), nr_total),
            f1: mean(outcomes.iter().map(|o| o.f1).sum(), nr_total),
        }
    }
}

/// 逐个运行样例；只有工具名未知或 Stage 声明非法会中止评测
pub async fn run_evaluation(
    examples: &[EvalExample],
    llm: Arc<dyn LlmClient>,
    cfg: &AppConfig,
    tracer: &Tracer,
    timeout: Duration,
) -> Result<(Vec<EvalOutcome>, EvalSummary), AgentError> {
    let mut outcomes = Vec::with_capacity(examples.len());
    for (i, example) in examples.iter().enumerate() {
        let registry = match &example.tools {
            None => builtin_registry(BUILTIN_TOOLS)?,
            Some(names) => builtin_registry(names.as_slice())?,
        };
        let mut agent = ReactlyAgent::new(Arc::clone(&llm), registry, cfg, tracer.clone())?;

        let started = Instant::now();
        let result = tokio::time::timeout(timeout, agent.query(&example.question)).await;
        let duration_secs = started.elapsed().as_secs_f64();

        let (answer, error) = match result {
            Ok(Ok(answer)) => (Some(answer), None),
            Ok(Err(e)) => (None, Some(e.to_string())),
            Err(_) => (None, Some(format!("timed out after {}s", timeout.as_secs()))),
        };
        let (em, f1) = answer.as_deref().map_or((0.0, 0.0), |a| {
            (
                if exact_match(a, &example.expected) { 1.0 } else { 0.0 },
                f1_score(a, &example.expected),
            )
        });
        tracing::info!(index = i, em, f1, duration_secs, "Example evaluated");

        outcomes.push(EvalOutcome {
            id: example.id.clone(),
            question: example.question.clone(),
            expected: example.expected.clone(),
            answer,
            error,
            duration_secs,
            em,
            f1,
        });
    }
    let summary = EvalSummary::from_outcomes(&outcomes);
    Ok((outcomes, summary))
}
