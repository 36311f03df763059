//! 编排循环使用的七个 Stage：split / enhance / rate / generate_input / can_answer / answer_task / answer_question
//!
//! 所有 Stage 在 Orchestrator 创建时编译一次；示例与声明不一致会在此处以 IllegalDefinition 失败。

use std::sync::Arc;

use serde_json::{json, Map, Value};

use crate::core::AgentError;
use crate::llm::LlmClient;
use crate::stage::{FormatSpec, Stage, StageDef};

pub const SPLIT_DESCRIPTION: &str =
    "You split a user question into the ordered list of sub-tasks that must be solved to answer it.";
pub const ENHANCE_DESCRIPTION: &str =
    "You rewrite a task so that it is self-contained, filling in facts from the results of previous tasks.";
pub const RATE_DESCRIPTION: &str =
    "You rate how useful a single tool is for solving a task.";
pub const GENERATE_INPUT_DESCRIPTION: &str =
    "You write the input arguments for calling a tool so that it helps solve a task.";
pub const CAN_ANSWER_DESCRIPTION: &str =
    "You decide whether the tool results collected so far are enough to solve a task.";
pub const ANSWER_TASK_DESCRIPTION: &str =
    "You solve a task using the results of the tools that were run for it.";
pub const ANSWER_QUESTION_DESCRIPTION: &str =
    "You answer the user question using the results of its sub-tasks and the earlier conversation.";

/// 工具描述符只保留 name + description
fn tool_summary(tool: &Value) -> Value {
    json!({
        "name": tool.get("name").cloned().unwrap_or(Value::Null),
        "description": tool.get("description").cloned().unwrap_or(Value::Null),
    })
}

fn tool_summaries(tools: &Value) -> Value {
    Value::Array(
        tools
            .as_array()
            .map(|list| list.iter().map(tool_summary).collect())
            .unwrap_or_default(),
    )
}

fn calculator_descriptor() -> Value {
    json!({
        "name": "calculator",
        "description": "Evaluates an arithmetic expression and returns the numeric result.",
        "parameters": {"expression": "The arithmetic expression to evaluate"}
    })
}

fn search_descriptor() -> Value {
    json!({
        "name": "wiki_search",
        "description": "Searches an encyclopedia and returns the most relevant passage.",
        "parameters": {"query": "What to search for"}
    })
}

fn tools_format() -> FormatSpec {
    FormatSpec::list_of(FormatSpec::json(json!({"name": "tool name", "description": "what the tool does"})))
        .with_preshape(tool_summaries)
}

fn tool_runs_format() -> FormatSpec {
    FormatSpec::list_of(FormatSpec::json(
        json!({"tool": "tool name", "input": {"parameter": "value"}, "output": "tool output"}),
    ))
}

/// 编译后的全部编排 Stage
pub struct OrchestratorStages {
    pub split: Stage<Vec<String>>,
    pub enhance: Stage<String>,
    pub rate: Stage<f64>,
    pub generate_input: Stage<Map<String, Value>>,
    pub can_answer: Stage<bool>,
    pub answer_task: Stage<String>,
    pub answer_question: Stage<String>,
}

impl OrchestratorStages {
    pub fn compile(llm: Arc<dyn LlmClient>, tries: usize) -> Result<Self, AgentError> {
        Ok(Self {
            split: split_def().tries(tries).compile(llm.clone())?,
            enhance: enhance_def().tries(tries).compile(llm.clone())?,
            rate: rate_def().tries(tries).compile(llm.clone())?,
            generate_input: generate_input_def().tries(tries).compile(llm.clone())?,
            can_answer: can_answer_def().tries(tries).compile(llm.clone())?,
            answer_task: answer_task_def().tries(tries).compile(llm.clone())?,
            answer_question: answer_question_def().tries(tries).compile(llm)?,
        })
    }
}

pub fn split_def() -> StageDef {
    StageDef::new("split", SPLIT_DESCRIPTION)
        .rule("Only create a task when it needs information or computation that is not already in the question.")
        .rule("Each task must be solvable on its own, possibly with one of the tools.")
        .rule("If the question can be answered directly, output an empty list [].")
        .input("Tools", tools_format())
        .input("Question", FormatSpec::raw_line("the user question"))
        .output(
            "Tasks",
            FormatSpec::list_of(FormatSpec::json(json!("task description"))),
        )
        .example(json!({
            "Tools": [calculator_descriptor()],
            "Question": "Is 20 larger than 3?",
            "Tasks": []
        }))
        .example(json!({
            "Tools": [search_descriptor(), calculator_descriptor()],
            "Question": "How many years passed between when Napoleon became King of Italy and when the first world war ended?",
            "Tasks": [
                "Find the year Napoleon became King of Italy",
                "Find the year the first world war ended",
                "Compute the number of years between the two years"
            ]
        }))
}

pub fn enhance_def() -> StageDef {
    StageDef::new("enhance", ENHANCE_DESCRIPTION)
        .rule("Replace references to earlier tasks with the concrete values from their results.")
        .rule("If nothing needs to be filled in, repeat the task unchanged.")
        .input("Task", FormatSpec::raw_line("the task"))
        .input("Tools", tools_format())
        .input(
            "Previous Results",
            FormatSpec::list_of(FormatSpec::json(json!({"task": "earlier task", "result": "its result"}))),
        )
        .output("Enhanced Task", FormatSpec::raw_line("the self-contained task"))
        .example(json!({
            "Task": "Compute the number of years between the two years",
            "Tools": [search_descriptor(), calculator_descriptor()],
            "Previous Results": [
                {"task": "Find the year Napoleon became King of Italy", "result": "1805"},
                {"task": "Find the year the first world war ended", "result": "1918"}
            ],
            "Enhanced Task": "Compute the number of years between 1805 and 1918"
        }))
}

pub fn rate_def() -> StageDef {
    StageDef::new("rate", RATE_DESCRIPTION)
        .rule("Output a single number between 0 and 1.")
        .rule("1 means the tool is exactly what the task needs, 0 means it does not help at all.")
        .input("Task", FormatSpec::raw_line("the task"))
        .input(
            "Tool",
            FormatSpec::json(json!({"name": "tool name", "description": "what the tool does"}))
                .with_preshape(tool_summary),
        )
        .output("Score", FormatSpec::json(json!(0.5)).with_default(json!(0.0)))
        .example(json!({
            "Task": "Compute the number of years between 1805 and 1918",
            "Tool": calculator_descriptor(),
            "Score": 0.95
        }))
        .example(json!({
            "Task": "Find the year the first world war ended",
            "Tool": calculator_descriptor(),
            "Score": 0.05
        }))
}

pub fn generate_input_def() -> StageDef {
    StageDef::new("generate_input", GENERATE_INPUT_DESCRIPTION)
        .rule("Use exactly the parameter names listed for the tool.")
        .rule("Fill in concrete values taken from the task.")
        .input(
            "Task",
            FormatSpec::raw_line("the task"),
        )
        .input(
            "Tool",
            FormatSpec::json(json!({"name": "tool name", "description": "what the tool does", "parameters": {"parameter": "description"}})),
        )
        .output(
            "Tool Input",
            FormatSpec::json(json!({"parameter": "value"})).with_default(json!({})),
        )
        .example(json!({
            "Task": "Compute the number of years between 1805 and 1918",
            "Tool": calculator_descriptor(),
            "Tool Input": {"expression": "1918 - 1805"}
        }))
}

pub fn can_answer_def() -> StageDef {
    StageDef::new("can_answer", CAN_ANSWER_DESCRIPTION)
        .rule("Output true or false.")
        .input("Task", FormatSpec::raw_line("the task"))
        .input("Tool Runs", tool_runs_format())
        .output("Can Answer", FormatSpec::json(json!(true)).with_default(json!(false)))
        .example(json!({
            "Task": "Compute the number of years between 1805 and 1918",
            "Tool Runs": [{"tool": "calculator", "input": {"expression": "1918 - 1805"}, "output": 113}],
            "Can Answer": true
        }))
        .example(json!({
            "Task": "Find the year the first world war ended",
            "Tool Runs": [],
            "Can Answer": false
        }))
}

pub fn answer_task_def() -> StageDef {
    StageDef::new("answer_task", ANSWER_TASK_DESCRIPTION)
        .rule("Answer in one short line.")
        .rule("If a tool failed or gave no useful result, answer from your own knowledge.")
        .input("Task", FormatSpec::raw_line("the task"))
        .input("Tool Runs", tool_runs_format())
        .output("Answer", FormatSpec::raw_line("the answer to the task"))
        .example(json!({
            "Task": "Compute the number of years between 1805 and 1918",
            "Tool Runs": [{"tool": "calculator", "input": {"expression": "1918 - 1805"}, "output": 113}],
            "Answer": "113 years"
        }))
}

pub fn answer_question_def() -> StageDef {
    StageDef::new("answer_question", ANSWER_QUESTION_DESCRIPTION)
        .rule("Answer in the same language as the question.")
        .rule("Answer in one line.")
        .input("Question", FormatSpec::raw_line("the user question"))
        .input(
            "Conversation",
            FormatSpec::list_of(FormatSpec::json(json!({"question": "earlier question", "answer": "earlier answer"}))),
        )
        .input(
            "Task Results",
            FormatSpec::list_of(FormatSpec::json(json!({"task": "sub-task", "result": "its result"}))),
        )
        .output("Answer", FormatSpec::raw_line("the final answer"))
        .example(json!({
            "Question": "Is 20 larger than 3?",
            "Conversation": [],
            "Task Results": [],
            "Answer": "Yes, 20 is larger than 3."
        }))
        .example(json!({
            "Question": "How many years passed between when Napoleon became King of Italy and when the first world war ended?",
            "Conversation": [],
            "Task Results": [
                {"task": "Find the year Napoleon became King of Italy", "result": "1805"},
                {"task": "Find the year the first world war ended", "result": "1918"},
                {"task": "Compute the number of years between 1805 and 1918", "result": "113 years"}
            ],
            "Answer": "113 years passed."
        }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlmClient;

    #[test]
    fn test_all_stages_compile() {
        let llm: Arc<dyn LlmClient> = Arc::new(ScriptedLlmClient::new());
        let stages = OrchestratorStages::compile(llm, 2).unwrap();
        assert_eq!(stages.rate.tries(), 2);
        assert!(stages.split.system_prompt().starts_with(SPLIT_DESCRIPTION));
    }

    #[test]
    fn test_descriptions_do_not_leak_between_prompts() {
        let llm: Arc<dyn LlmClient> = Arc::new(ScriptedLlmClient::new());
        let stages = OrchestratorStages::compile(llm, 1).unwrap();
        let prompts = [
            (SPLIT_DESCRIPTION, stages.split.system_prompt()),
            (ENHANCE_DESCRIPTION, stages.enhance.system_prompt()),
            (RATE_DESCRIPTION, stages.rate.system_prompt()),
            (GENERATE_INPUT_DESCRIPTION, stages.generate_input.system_prompt()),
            (CAN_ANSWER_DESCRIPTION, stages.can_answer.system_prompt()),
            (ANSWER_TASK_DESCRIPTION, stages.answer_task.system_prompt()),
            (ANSWER_QUESTION_DESCRIPTION, stages.answer_question.system_prompt()),
        ];
        for (desc, _) in &prompts {
            let hits = prompts.iter().filter(|(_, p)| p.contains(desc)).count();
            assert_eq!(hits, 1, "description shared by several prompts: {desc}");
        }
    }

    #[test]
    fn test_rate_prompt_shows_tool_summary_only() {
        let llm: Arc<dyn LlmClient> = Arc::new(ScriptedLlmClient::new());
        let stage = rate_def().compile::<f64>(llm).unwrap();
        assert!(!stage.system_prompt().contains("\"parameters\""));
        let body = stage
            .render_body(&json!({"Task": "t", "Tool": calculator_descriptor()}))
            .unwrap();
        assert!(body.contains("\"name\":\"calculator\""));
        assert!(!body.contains("parameters"));
    }
}
