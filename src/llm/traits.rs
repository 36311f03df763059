//! Oracle 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / DeepSeek / Scripted Mock）实现 LlmClient：complete 为一次阻塞式往返，
//! 输入为 system prompt + 对话正文组成的消息列表，返回纯文本；无流式需求。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::memory::Message;

/// Token 使用统计（累计值），clone 共享同一组计数器
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
    }

    pub fn get(&self) -> (u64, u64, u64) {
        let prompt = self.prompt_tokens.load(Ordering::Relaxed);
        let completion = self.completion_tokens.load(Ordering::Relaxed);
        (prompt, completion, prompt + completion)
    }
}

/// Oracle trait：一次完成调用；Err 表示传输层失败（不可达 / 服务端错误）
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成
    async fn complete(&self, messages: &[Message]) -> Result<String, String>;

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}

/// 便捷调用：`complete(systemPrompt, conversationBody) -> text`
pub async fn complete_with_system(
    llm: &dyn LlmClient,
    system_prompt: &str,
    body: &str,
) -> Result<String, String> {
    let messages = [Message::system(system_prompt), Message::user(body)];
    llm.complete(&messages).await
}
