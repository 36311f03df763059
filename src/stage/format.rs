//! FormatSpec：单个 Stage 输入 / 输出的序列化约定
//!
//! 编码只有两种：Json（结构化）与 RawLine（单行原文）。pre-shape 是显式的函数指针，
//! 在序列化前把值整理成 prompt 需要的形状（如只保留工具名与描述）。

use serde::Serialize;
use serde_json::Value;

use crate::core::AgentError;

/// 编码方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Encoding {
    Json,
    RawLine,
}

/// 序列化前的整形函数
pub type Preshape = fn(&Value) -> Value;

/// 单个输入 / 输出的格式声明
#[derive(Debug, Clone)]
pub struct FormatSpec {
    pub encoding: Encoding,
    /// prompt 的 Format 段中展示的模板
    pub template: String,
    pub preshape: Option<Preshape>,
    /// 该格式专属的规则，拼入 system prompt 的 Rules 段
    pub rules: Vec<String>,
    /// Stage 返回哨兵值时，调用方使用的中性值
    pub default: Value,
}

impl FormatSpec {
    /// 结构化编码，模板为示例值的 JSON 文本
    pub fn json(template: Value) -> Self {
        Self {
            encoding: Encoding::Json,
            template: serialize_value(&template, Encoding::Json),
            preshape: None,
            rules: Vec::new(),
            default: Value::Null,
        }
    }

    /// 单行原文编码
    pub fn raw_line(template: impl Into<String>) -> Self {
        Self {
            encoding: Encoding::RawLine,
            template: template.into(),
            preshape: None,
            rules: Vec::new(),
            default: Value::String(String::new()),
        }
    }

    /// 由单项格式得到列表格式：模板为 `[<item>, ...]`
    pub fn list_of(item: FormatSpec) -> Self {
        Self {
            encoding: Encoding::Json,
            template: format!("[{}, ...]", item.template),
            preshape: None,
            rules: item.rules,
            default: Value::Array(Vec::new()),
        }
    }

    pub fn with_preshape(mut self, preshape: Preshape) -> Self {
        self.preshape = Some(preshape);
        self
    }

    pub fn with_rule(mut self, rule: impl Into<String>) -> Self {
        self.rules.push(rule.into());
        self
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = default;
        self
    }

    /// pre-shape 后按编码序列化
    pub fn serialize(&self, value: &Value) -> String {
        match self.preshape {
            Some(f) => serialize_value(&f(value), self.encoding),
            None => serialize_value(value, self.encoding),
        }
    }

    /// 按编码解码 Oracle 回复
    pub fn decode(&self, reply: &str) -> Result<Value, AgentError> {
        match self.encoding {
            Encoding::RawLine => Ok(Value::String(single_line(reply))),
            Encoding::Json => {
                let candidate = strip_code_fence(reply);
                serde_json::from_str(candidate)
                    .map_err(|e| AgentError::Decode(format!("{}: {}", e, candidate)))
            }
        }
    }
}

/// Json：紧凑 JSON；RawLine：字符串去掉内嵌换行后输出，其它值用其 JSON 文本
pub fn serialize_value(value: &Value, encoding: Encoding) -> String {
    match (encoding, value) {
        (Encoding::RawLine, Value::String(s)) => single_line(s),
        _ => value.to_string(),
    }
}

/// 去掉内嵌换行，保留原文
fn single_line(text: &str) -> String {
    text.replace("\r\n", " ")
        .replace(['\n', '\r'], " ")
        .trim()
        .to_string()
}

/// 提取 ```json ... ``` 或 ``` ... ``` 代码块中的内容；没有代码块时返回去空白的原文
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(start) = trimmed.find("```") else {
        return trimmed;
    };
    let rest = &trimmed[start + 3..];
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.find("```").map(|end| &rest[..end]).unwrap_or(rest).trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn names_only(v: &Value) -> Value {
        Value::Array(
            v.as_array()
                .map(|tools| tools.iter().map(|t| t["name"].clone()).collect())
                .unwrap_or_default(),
        )
    }

    #[test]
    fn test_raw_line_strips_newlines() {
        let spec = FormatSpec::raw_line("the answer");
        assert_eq!(
            spec.decode("first line\nsecond line\n").unwrap(),
            json!("first line second line")
        );
    }

    #[test]
    fn test_json_decode_and_error() {
        let spec = FormatSpec::json(json!(["task"]));
        assert_eq!(spec.decode(" [\"a\", \"b\"] ").unwrap(), json!(["a", "b"]));
        assert_eq!(spec.decode("```json\n[1]\n```").unwrap(), json!([1]));
        assert!(matches!(spec.decode("not json"), Err(AgentError::Decode(_))));
    }

    #[test]
    fn test_preshape_applied_before_serialize() {
        let spec = FormatSpec::json(json!(["tool name"])).with_preshape(names_only);
        let tools = json!([{"name": "calculator", "description": "math"}]);
        assert_eq!(spec.serialize(&tools), "[\"calculator\"]");
    }

    #[test]
    fn test_list_of_template() {
        let spec = FormatSpec::list_of(FormatSpec::json(json!({"task": "..."})));
        assert_eq!(spec.template, "[{\"task\":\"...\"}, ...]");
        assert_eq!(spec.default, json!([]));
    }

    #[test]
    fn test_raw_line_serializes_strings_on_one_line() {
        assert_eq!(serialize_value(&json!("hi \"x\""), Encoding::RawLine), "hi \"x\"");
        assert_eq!(serialize_value(&json!(" a\nb \n"), Encoding::RawLine), "a b");
        assert_eq!(serialize_value(&json!("hi"), Encoding::Json), "\"hi\"");
    }
}
