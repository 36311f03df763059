//! Scripted Mock Oracle（用于测试与无 API Key 时的本地运行）
//!
//! 按规则匹配 system prompt / 对话正文中的子串，依次返回预设回复（用尽后重复最后一条）；
//! 未命中任何规则时返回 fallback，未设置 fallback 则模拟传输失败。
//! token 用量按空白分词近似计数。

use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{LlmClient, TokenUsage};
use crate::memory::{Message, Role};

/// 单条预设回复：正常文本或传输失败
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Text(String),
    TransportError(String),
}

/// 匹配规则：system 子串 + 若干 body 子串（全部命中才算匹配）
#[derive(Debug, Clone, Default)]
pub struct ScriptRule {
    system: Option<String>,
    body: Vec<String>,
    replies: Vec<ScriptedReply>,
    served: usize,
}

impl ScriptRule {
    /// system prompt 中包含 needle 时匹配
    pub fn system(needle: impl Into<String>) -> Self {
        Self {
            system: Some(needle.into()),
            ..Default::default()
        }
    }

    /// 对话正文中包含 needle 时匹配
    pub fn body(needle: impl Into<String>) -> Self {
        Self::default().and_body(needle)
    }

    pub fn and_body(mut self, needle: impl Into<String>) -> Self {
        self.body.push(needle.into());
        self
    }

    pub fn reply(mut self, text: impl Into<String>) -> Self {
        self.replies.push(ScriptedReply::Text(text.into()));
        self
    }

    pub fn fail(mut self, message: impl Into<String>) -> Self {
        self.replies
            .push(ScriptedReply::TransportError(message.into()));
        self
    }

    fn matches(&self, system: &str, body: &str) -> bool {
        self.system.as_deref().map_or(true, |s| system.contains(s))
            && self.body.iter().all(|b| body.contains(b.as_str()))
    }

    fn next_reply(&mut self) -> Option<ScriptedReply> {
        let idx = self.served.min(self.replies.len().checked_sub(1)?);
        self.served += 1;
        self.replies.get(idx).cloned()
    }
}

/// 已发生的一次调用（供测试断言）
#[derive(Debug, Clone)]
pub struct ScriptedCall {
    pub system: String,
    pub body: String,
}

/// Scripted Oracle：规则按添加顺序匹配，第一条命中的规则给出回复
#[derive(Debug, Default)]
pub struct ScriptedLlmClient {
    rules: Mutex<Vec<ScriptRule>>,
    fallback: Option<String>,
    calls: Mutex<Vec<ScriptedCall>>,
    usage: TokenUsage,
}

impl ScriptedLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(self, rule: ScriptRule) -> Self {
        self.rules
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(rule);
        self
    }

    pub fn with_fallback(mut self, text: impl Into<String>) -> Self {
        self.fallback = Some(text.into());
        self
    }

    /// 总调用次数
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// system prompt 包含 needle 的调用次数
    pub fn calls_with_system(&self, needle: &str) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|c| c.system.contains(needle))
            .count()
    }

    pub fn calls(&self) -> Vec<ScriptedCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

fn word_count(text: &str) -> u64 {
    text.split_whitespace().count() as u64
}

fn content_of(messages: &[Message], role: Role) -> String {
    messages
        .iter()
        .filter(|m| m.role == role)
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }

    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        let system = content_of(messages, Role::System);
        let body = content_of(messages, Role::User);
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(ScriptedCall {
                system: system.clone(),
                body: body.clone(),
            });

        let reply = {
            let mut rules = self.rules.lock().unwrap_or_else(|e| e.into_inner());
            rules
                .iter_mut()
                .find(|r| r.matches(&system, &body))
                .and_then(|r| r.next_reply())
        };

        let text = match reply {
            Some(ScriptedReply::Text(text)) => text,
            Some(ScriptedReply::TransportError(msg)) => return Err(msg),
            None => self
                .fallback
                .clone()
                .ok_or_else(|| "scripted oracle has no reply for this call".to_string())?,
        };
        self.usage
            .add(word_count(&system) + word_count(&body), word_count(&text));
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rule_replies_in_order_then_repeat_last() {
        let llm = ScriptedLlmClient::new().on(ScriptRule::body("x").reply("a").reply("b"));
        let msgs = [Message::system("sys"), Message::user("x")];
        assert_eq!(llm.complete(&msgs).await.unwrap(), "a");
        assert_eq!(llm.complete(&msgs).await.unwrap(), "b");
        assert_eq!(llm.complete(&msgs).await.unwrap(), "b");
        assert_eq!(llm.call_count(), 3);
    }

    #[tokio::test]
    async fn test_system_and_body_must_both_match() {
        let llm = ScriptedLlmClient::new()
            .on(ScriptRule::system("rate").and_body("calc").reply("0.9"))
            .with_fallback("none");
        let hit = [Message::system("rate tools"), Message::user("Tool: calc")];
        let miss = [Message::system("rate tools"), Message::user("Tool: other")];
        assert_eq!(llm.complete(&hit).await.unwrap(), "0.9");
        assert_eq!(llm.complete(&miss).await.unwrap(), "none");
        assert_eq!(llm.calls_with_system("rate"), 2);
    }

    #[tokio::test]
    async fn test_no_fallback_is_transport_failure() {
        let llm = ScriptedLlmClient::new();
        let msgs = [Message::user("hello")];
        assert!(llm.complete(&msgs).await.is_err());
        assert_eq!(llm.token_usage(), (0, 0, 0));
    }

    #[tokio::test]
    async fn test_token_usage_counts_words() {
        let llm = ScriptedLlmClient::new().with_fallback("four score and seven");
        let msgs = [Message::system("be brief"), Message::user("one two three")];
        llm.complete(&msgs).await.unwrap();
        assert_eq!(llm.token_usage(), (5, 4, 9));
        llm.complete(&msgs).await.unwrap();
        assert_eq!(llm.token_usage(), (10, 8, 18));
    }
}
