//! text_count 工具：统计字符、单词与行数

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::tools::{parameters_from_schema, Tool, ToolParameter};

/// text_count 参数
#[derive(Debug, Deserialize, JsonSchema)]
pub struct TextCountArgs {
    /// The text string to be counted
    pub text: String,
}

pub struct TextCountTool;

#[async_trait]
impl Tool for TextCountTool {
    fn name(&self) -> &str {
        "text_count"
    }

    fn description(&self) -> &str {
        "The text_count tool counts numbers of characters, words and lines in a string."
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        parameters_from_schema::<TextCountArgs>()
    }

    async fn execute(&self, args: Value) -> Result<Value, String> {
        let args: TextCountArgs =
            serde_json::from_value(args).map_err(|e| format!("invalid arguments: {e}"))?;
        Ok(json!({
            "characters": args.text.chars().count(),
            "words": args.text.split_whitespace().count(),
            "lines": args.text.lines().count(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_counts() {
        let out = TextCountTool
            .execute(json!({"text": "raspberry pie\nis nice"}))
            .await
            .unwrap();
        assert_eq!(out, json!({"characters": 21, "words": 4, "lines": 2}));
    }
}
