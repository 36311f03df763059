//! LLM 层：Oracle 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Scripted Mock）

pub mod mock;
pub mod openai;
pub mod traits;

use std::sync::Arc;

pub use mock::{ScriptRule, ScriptedCall, ScriptedLlmClient, ScriptedReply};
pub use openai::{OpenAiClient, DEEPSEEK_BASE_URL, DEEPSEEK_CHAT};
pub use traits::{complete_with_system, LlmClient, TokenUsage};

use crate::config::AppConfig;
use crate::react::stages::SPLIT_DESCRIPTION;

/// Oracle 后端
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    DeepSeek,
    OpenAi,
    Offline,
}

/// 由 provider 决定后端，API Key 只决定能否连上：缺少凭据时退回离线 Oracle
///
/// - deepseek：DEEPSEEK_API_KEY，或 OPENAI_API_KEY 作为 DeepSeek 的凭据
/// - openai：OPENAI_API_KEY
/// - mock 与未知 provider：离线
pub fn select_backend(provider: &str, has_deepseek_key: bool, has_openai_key: bool) -> Backend {
    match provider.to_lowercase().as_str() {
        "deepseek" if has_deepseek_key || has_openai_key => Backend::DeepSeek,
        "openai" if has_openai_key => Backend::OpenAi,
        "deepseek" | "openai" => {
            tracing::warn!("Provider '{}' has no API key set", provider);
            Backend::Offline
        }
        "mock" => Backend::Offline,
        other => {
            tracing::warn!("Unknown LLM provider '{}'", other);
            Backend::Offline
        }
    }
}

/// 根据配置与环境变量创建 Oracle 客户端
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let backend = select_backend(
        &cfg.llm.provider,
        std::env::var("DEEPSEEK_API_KEY").is_ok(),
        std::env::var("OPENAI_API_KEY").is_ok(),
    );
    let timeout = cfg.llm.request_timeout_secs;
    match backend {
        Backend::DeepSeek => {
            tracing::info!("Using DeepSeek LLM ({})", cfg.llm.model);
            Arc::new(OpenAiClient::deepseek(Some(&cfg.llm.model)).with_timeout(timeout))
        }
        Backend::OpenAi => {
            tracing::info!("Using OpenAI LLM ({})", cfg.llm.model);
            Arc::new(
                OpenAiClient::new(cfg.llm.base_url.as_deref(), &cfg.llm.model, None)
                    .with_timeout(timeout),
            )
        }
        Backend::Offline => {
            tracing::warn!("Using scripted offline LLM");
            Arc::new(offline_llm())
        }
    }
}

/// 无 API Key 时的离线 Oracle：不拆分任务，直接给出提示性回答
fn offline_llm() -> ScriptedLlmClient {
    ScriptedLlmClient::new()
        .on(ScriptRule::system(SPLIT_DESCRIPTION).reply("[]"))
        .with_fallback(
            "No language model configured. Set DEEPSEEK_API_KEY or OPENAI_API_KEY to get real answers.",
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_provider_wins_over_available_keys() {
        assert_eq!(select_backend("openai", true, true), Backend::OpenAi);
        assert_eq!(select_backend("OpenAI", true, true), Backend::OpenAi);
        assert_eq!(select_backend("deepseek", true, true), Backend::DeepSeek);
        assert_eq!(select_backend("mock", true, true), Backend::Offline);
    }

    #[test]
    fn test_missing_credentials_fall_back_offline() {
        assert_eq!(select_backend("openai", true, false), Backend::Offline);
        assert_eq!(select_backend("deepseek", false, false), Backend::Offline);
        assert_eq!(select_backend("deepseek", false, true), Backend::DeepSeek);
        assert_eq!(select_backend("something-else", true, true), Backend::Offline);
    }
}
