//! 工具注册表
//!
//! 所有工具实现 Tool trait（name / description / parameters / execute），ToolRegistry 按声明顺序保存，
//! 顺序即评分并列时的先后；ToolExecutor 在调用时加超时并统一转 AgentError。

use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// 工具参数：名称 + 描述（驱动输入生成阶段）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolParameter {
    pub name: String,
    pub description: String,
}

impl ToolParameter {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

/// 工具 trait：名称、描述（原样放入 prompt）、有序参数表、异步执行（args 为 JSON 关键字参数）
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（注册表内唯一）
    fn name(&self) -> &str;

    /// 工具描述（供 LLM 理解功能）
    fn description(&self) -> &str;

    /// 参数表（有序）；默认无参数
    fn parameters(&self) -> Vec<ToolParameter> {
        Vec::new()
    }

    /// 执行工具，成功返回任意可序列化数据
    async fn execute(&self, args: Value) -> Result<Value, String>;
}

/// 从参数结构体的 JSON Schema 提取参数表（字段文档注释即描述，保持字段声明顺序）
pub fn parameters_from_schema<T: JsonSchema>() -> Vec<ToolParameter> {
    let schema = serde_json::to_value(schemars::schema_for!(T)).unwrap_or(Value::Null);
    schema
        .get("properties")
        .and_then(Value::as_object)
        .map(|props| {
            props
                .iter()
                .map(|(name, prop)| {
                    let description = prop
                        .get("description")
                        .and_then(Value::as_str)
                        .map(String::from)
                        .or_else(|| prop.get("type").map(|t| t.to_string().replace('"', "")))
                        .unwrap_or_default();
                    ToolParameter::new(name.clone(), description)
                })
                .collect()
        })
        .unwrap_or_default()
}

/// 工具描述符：{name, description, parameters: {参数名: 描述}}，作为 Stage 输入
pub fn tool_descriptor(tool: &dyn Tool) -> Value {
    let params: Map<String, Value> = tool
        .parameters()
        .into_iter()
        .map(|p| (p.name, Value::String(p.description)))
        .collect();
    json!({
        "name": tool.name(),
        "description": tool.description(),
        "parameters": params,
    })
}

type Handler = dyn Fn(Value) -> Result<Value, String> + Send + Sync;

/// 由闭包构造的工具
pub struct FnTool {
    name: String,
    description: String,
    parameters: Vec<ToolParameter>,
    handler: Arc<Handler>,
}

impl FnTool {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        handler: impl Fn(Value) -> Result<Value, String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
            handler: Arc::new(handler),
        }
    }

    pub fn param(mut self, name: impl Into<String>, description: impl Into<String>) -> Self {
        self.parameters.push(ToolParameter::new(name, description));
        self
    }
}

#[async_trait]
impl Tool for FnTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        self.parameters.clone()
    }

    async fn execute(&self, args: Value) -> Result<Value, String> {
        (self.handler)(args)
    }
}

/// 工具注册表：按声明顺序存储 Arc<dyn Tool>
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.register_arc(Arc::new(tool));
    }

    /// 同名工具原位替换，保持声明顺序
    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        match self.tools.iter().position(|t| t.name() == tool.name()) {
            Some(idx) => {
                tracing::warn!("Tool '{}' registered twice, replacing", tool.name());
                self.tools[idx] = tool;
            }
            None => self.tools.push(tool),
        }
    }

    pub fn with(mut self, tool: impl Tool + 'static) -> Self {
        self.register(tool);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name).cloned()
    }

    pub fn tools(&self) -> &[Arc<dyn Tool>] {
        &self.tools
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name().to_string()).collect()
    }

    /// 全部工具描述符（声明顺序）
    pub fn descriptors(&self) -> Value {
        Value::Array(self.tools.iter().map(|t| tool_descriptor(t.as_ref())).collect())
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
