//! 短期记忆：Oracle 消息与历史问答
//!
//! Message / Role 是调用 Oracle 时的消息格式；ConversationMemory 保留最近 N 轮问答（question + answer），
//! 超出时自动剪枝，作为 AnswerQuestion 阶段的 prior conversation 输入。

use serde::{Deserialize, Serialize};

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    User,
    Assistant,
    System,
}

/// 单条消息
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// 一轮已完成的问答
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatExchange {
    pub question: String,
    pub answer: String,
}

/// 短期记忆：最近 max_turns 轮问答
#[derive(Clone, Debug)]
pub struct ConversationMemory {
    exchanges: Vec<ChatExchange>,
    max_turns: usize,
}

impl ConversationMemory {
    pub fn new(max_turns: usize) -> Self {
        Self {
            exchanges: Vec::new(),
            max_turns,
        }
    }

    pub fn push(&mut self, question: impl Into<String>, answer: impl Into<String>) {
        self.exchanges.push(ChatExchange {
            question: question.into(),
            answer: answer.into(),
        });
        self.prune();
    }

    pub fn exchanges(&self) -> &[ChatExchange] {
        &self.exchanges
    }

    pub fn clear(&mut self) {
        self.exchanges.clear();
    }

    /// 超出 max_turns 时丢弃最旧的问答
    fn prune(&mut self) {
        if self.exchanges.len() > self.max_turns {
            let excess = self.exchanges.len() - self.max_turns;
            self.exchanges.drain(..excess);
        }
    }

    pub fn len(&self) -> usize {
        self.exchanges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exchanges.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prune_keeps_latest_turns() {
        let mut mem = ConversationMemory::new(2);
        mem.push("q1", "a1");
        mem.push("q2", "a2");
        mem.push("q3", "a3");
        assert_eq!(mem.len(), 2);
        assert_eq!(mem.exchanges()[0].question, "q2");
        assert_eq!(mem.exchanges()[1].answer, "a3");
    }

    #[test]
    fn test_zero_turns_keeps_nothing() {
        let mut mem = ConversationMemory::new(0);
        mem.push("q", "a");
        assert!(mem.is_empty());
    }
}
