//! Stage 引擎：把声明式的 {描述, 规则, 输入/输出格式, 示例} 编译为可调用的提示阶段
//!
//! - 编译期：校验示例的 label 与声明完全一致（否则 IllegalDefinition），组装确定性的 system prompt
//! - 调用期：按声明顺序渲染输入，调用 Oracle，按输出格式解码；解码失败在尝试预算内重试，
//!   耗尽后返回哨兵值 None（从不向外抛解码错误）；Oracle 传输失败则作为 Transport 错误返回
//! - 每次调用在 Tracer 下记录 `stage_run_<name>`、每次尝试的 `try` / `llmcall`，以及 `stage_result`

pub mod format;
pub mod prompt;

use std::collections::BTreeSet;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::core::AgentError;
use crate::llm::{complete_with_system, LlmClient};
use crate::trace::{Tracer, STAGE_RUN_PREFIX};

pub use format::{serialize_value, Encoding, FormatSpec, Preshape};
pub use prompt::{build_system_prompt, render_conversation, GLOBAL_RULES, STRUCTURED_OUTPUT_RULE};

/// Stage 声明（builder）
#[derive(Debug, Clone)]
pub struct StageDef {
    name: String,
    description: String,
    rules: Vec<String>,
    inputs: Vec<(String, FormatSpec)>,
    output: Option<(String, FormatSpec)>,
    examples: Vec<Value>,
    tries: usize,
}

impl StageDef {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            rules: Vec::new(),
            inputs: Vec::new(),
            output: None,
            examples: Vec::new(),
            tries: 1,
        }
    }

    pub fn rule(mut self, rule: impl Into<String>) -> Self {
        self.rules.push(rule.into());
        self
    }

    pub fn input(mut self, label: impl Into<String>, spec: FormatSpec) -> Self {
        self.inputs.push((label.into(), spec));
        self
    }

    pub fn output(mut self, label: impl Into<String>, spec: FormatSpec) -> Self {
        self.output = Some((label.into(), spec));
        self
    }

    /// 示例：以 label 为键的对象，必须恰好包含全部输入与输出 label
    pub fn example(mut self, example: Value) -> Self {
        self.examples.push(example);
        self
    }

    /// 尝试次数（解码失败时的总调用预算，最少 1 次）
    pub fn tries(mut self, tries: usize) -> Self {
        self.tries = tries;
        self
    }

    fn illegal(&self, reason: impl Into<String>) -> AgentError {
        AgentError::IllegalDefinition {
            stage: self.name.clone(),
            reason: reason.into(),
        }
    }

    /// 编译为绑定到 Oracle 的 Stage；O 为输出解码后的类型
    pub fn compile<O: DeserializeOwned>(
        self,
        llm: Arc<dyn LlmClient>,
    ) -> Result<Stage<O>, AgentError> {
        let output = self
            .output
            .clone()
            .ok_or_else(|| self.illegal("no output declared"))?;

        let mut declared = BTreeSet::new();
        for label in self.inputs.iter().map(|(l, _)| l).chain(std::iter::once(&output.0)) {
            if !declared.insert(label.as_str()) {
                return Err(self.illegal(format!("duplicate label '{label}'")));
            }
        }

        for (i, example) in self.examples.iter().enumerate() {
            let obj = example
                .as_object()
                .ok_or_else(|| self.illegal(format!("example {i} is not a label map")))?;
            let keys: BTreeSet<&str> = obj.keys().map(String::as_str).collect();
            if keys != declared {
                let missing: Vec<_> = declared.difference(&keys).collect();
                let extra: Vec<_> = keys.difference(&declared).collect();
                return Err(self.illegal(format!(
                    "example {i} labels do not match declaration (missing {missing:?}, extra {extra:?})"
                )));
            }
            serde_json::from_value::<O>(obj[&output.0].clone()).map_err(|e| {
                self.illegal(format!("example {i} output does not decode: {e}"))
            })?;
        }

        let system_prompt = build_system_prompt(
            &self.description,
            &self.rules,
            &self.inputs,
            &output,
            &self.examples,
        );

        Ok(Stage {
            name: self.name,
            system_prompt,
            inputs: self.inputs,
            output,
            tries: self.tries.max(1),
            llm,
            _out: PhantomData,
        })
    }
}

/// 编译后的 Stage：不可变，可重复调用
pub struct Stage<O> {
    name: String,
    system_prompt: String,
    inputs: Vec<(String, FormatSpec)>,
    output: (String, FormatSpec),
    tries: usize,
    llm: Arc<dyn LlmClient>,
    _out: PhantomData<fn() -> O>,
}

impl<O: DeserializeOwned> Stage<O> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn tries(&self) -> usize {
        self.tries
    }

    /// 渲染对话正文；values 必须恰好包含全部输入 label
    pub fn render_body(&self, values: &Value) -> Result<String, AgentError> {
        let obj = values.as_object();
        let mut ordered = Vec::with_capacity(self.inputs.len());
        for (label, _) in &self.inputs {
            let v = obj.and_then(|o| o.get(label)).ok_or_else(|| {
                AgentError::IllegalDefinition {
                    stage: self.name.clone(),
                    reason: format!("missing input '{label}'"),
                }
            })?;
            ordered.push(v);
        }
        let given = obj.map_or(0, |o| o.len());
        if given != self.inputs.len() {
            return Err(AgentError::IllegalDefinition {
                stage: self.name.clone(),
                reason: format!("expected {} inputs, got {}", self.inputs.len(), given),
            });
        }
        Ok(render_conversation(&self.inputs, &self.output, &ordered, None))
    }

    fn decode(&self, reply: &str) -> Result<(Value, O), AgentError> {
        let value = self.output.1.decode(reply)?;
        let typed = serde_json::from_value::<O>(value.clone())
            .map_err(|e| AgentError::Decode(format!("{}: {}", e, value)))?;
        Ok((value, typed))
    }

    /// 调用 Stage：Ok(Some) 为解码成功，Ok(None) 为重试耗尽的哨兵值，Err 仅来自 Oracle 传输失败或调用方输入不符
    pub async fn invoke(&self, values: Value, tracer: &Tracer) -> Result<Option<O>, AgentError> {
        let body = self.render_body(&values)?;
        let stage_tracer = tracer.on(
            &format!("{STAGE_RUN_PREFIX}{}", self.name),
            json!({"name": self.name, "body": body}),
        );

        let mut last_error = String::new();
        for nr in 0..self.tries {
            let try_tracer = stage_tracer.on("try", json!({ "nr": nr }));
            let call = try_tracer.on(
                "llmcall",
                json!({"sys_prompt": self.system_prompt, "prompt": body}),
            );
            let reply =
                match complete_with_system(self.llm.as_ref(), &self.system_prompt, &body).await {
                    Ok(r) => r,
                    Err(e) => {
                        stage_tracer.on(
                            "failed",
                            json!({
                                "reason_code": "transport",
                                "exception": e,
                                "tries": nr + 1,
                                "errtype": "TransportError",
                            }),
                        );
                        return Err(AgentError::Transport(e));
                    }
                };
            call.add_arg("response", Value::String(reply.clone()));

            match self.decode(&reply) {
                Ok((value, typed)) => {
                    stage_tracer.add_arg("result", value.clone());
                    stage_tracer.on("stage_result", json!({ "result": value }));
                    return Ok(Some(typed));
                }
                Err(e) => {
                    tracing::warn!(stage = %self.name, attempt = nr + 1, "Stage output rejected: {}", e);
                    try_tracer.add_arg("error", Value::String(e.to_string()));
                    last_error = e.to_string();
                }
            }
        }

        stage_tracer.on(
            "failed",
            json!({
                "reason_code": "decode_exhausted",
                "exception": last_error,
                "tries": self.tries,
                "errtype": "DecodeError",
            }),
        );
        stage_tracer.on("stage_result", json!({"result": null, "sentinel": true}));
        Ok(None)
    }
}

impl<O: DeserializeOwned + Default> Stage<O> {
    /// 调用 Stage，哨兵值降级为输出格式声明的默认值（无法解码时用 O::default()）
    pub async fn invoke_or_default(&self, values: Value, tracer: &Tracer) -> Result<O, AgentError> {
        match self.invoke(values, tracer).await? {
            Some(o) => Ok(o),
            None => Ok(serde_json::from_value(self.output.1.default.clone()).unwrap_or_default()),
        }
    }
}
