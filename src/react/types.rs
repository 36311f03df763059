//! 编排循环的数据类型：任务结果、工具运行记录、工具评分与选择

use std::cmp::Ordering;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tools::Tool;

/// 一个任务的结果（按任务拆分顺序追加）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task: String,
    pub result: String,
}

/// 一次工具调用的记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRunRecord {
    pub tool: String,
    pub input: Value,
    pub output: Value,
}

/// 工具评分：score 限定在 [0, 1]，NaN 视为 0
#[derive(Clone)]
pub struct RatedTool {
    pub tool: Arc<dyn Tool>,
    pub score: f64,
}

impl RatedTool {
    pub fn new(tool: Arc<dyn Tool>, score: f64) -> Self {
        let score = if score.is_nan() { 0.0 } else { score.clamp(0.0, 1.0) };
        Self { tool, score }
    }
}

impl std::fmt::Debug for RatedTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RatedTool")
            .field("tool", &self.tool.name())
            .field("score", &self.score)
            .finish()
    }
}

/// 按评分降序稳定排序（并列保持注册顺序），取 score >= threshold 的前缀
pub fn select_tools(mut rated: Vec<RatedTool>, threshold: f64) -> Vec<RatedTool> {
    rated.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    rated
        .into_iter()
        .take_while(|r| r.score >= threshold)
        .collect()
}

/// 一次查询的完整产出
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueryOutcome {
    pub answer: String,
    pub task_results: Vec<TaskResult>,
    pub tool_runs: Vec<ToolRunRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::FnTool;

    fn tool(name: &str) -> Arc<dyn Tool> {
        Arc::new(FnTool::new(name, name, |_| Ok(Value::Null)))
    }

    fn names(rated: &[RatedTool]) -> Vec<&str> {
        rated.iter().map(|r| r.tool.name()).collect()
    }

    #[test]
    fn test_selection_cuts_below_threshold() {
        let rated = vec![
            RatedTool::new(tool("C"), 0.4),
            RatedTool::new(tool("A"), 0.9),
            RatedTool::new(tool("B"), 0.7),
        ];
        assert_eq!(names(&select_tools(rated, 0.5)), vec!["A", "B"]);
    }

    #[test]
    fn test_ties_keep_registry_order() {
        let rated = vec![
            RatedTool::new(tool("first"), 0.8),
            RatedTool::new(tool("second"), 0.8),
            RatedTool::new(tool("top"), 0.95),
            RatedTool::new(tool("third"), 0.8),
        ];
        assert_eq!(
            names(&select_tools(rated, 0.5)),
            vec!["top", "first", "second", "third"]
        );
    }

    #[test]
    fn test_score_is_clamped() {
        assert_eq!(RatedTool::new(tool("x"), 7.0).score, 1.0);
        assert_eq!(RatedTool::new(tool("x"), -1.0).score, 0.0);
        assert_eq!(RatedTool::new(tool("x"), f64::NAN).score, 0.0);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let rated = vec![RatedTool::new(tool("edge"), 0.5)];
        assert_eq!(select_tools(rated, 0.5).len(), 1);
    }
}
