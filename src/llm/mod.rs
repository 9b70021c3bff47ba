//! LLM 层：客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）

pub mod mock;
pub mod openai;
pub mod traits;

use std::sync::Arc;

pub use mock::MockLlmClient;
pub use openai::{OpenAiClient, DEEPSEEK_BASE_URL};
pub use traits::{ChatMessage, ChatRole, LlmClient};

use crate::config::LlmSection;

/// 实际选用的后端
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provider {
    DeepSeek { api_key: String },
    OpenAi { api_key: String },
    Mock,
}

/// 按配置与可用的 API Key 决定后端
///
/// - provider = "mock"：Mock
/// - provider = "deepseek"：取 DEEPSEEK_API_KEY，其次 OPENAI_API_KEY
/// - provider = "openai"：取 OPENAI_API_KEY
/// - 没有可用 Key 或 provider 未知：回退 Mock
pub fn resolve_provider(provider: &str, key: impl Fn(&str) -> Option<String>) -> Provider {
    match provider.to_lowercase().as_str() {
        "deepseek" => key("DEEPSEEK_API_KEY")
            .or_else(|| key("OPENAI_API_KEY"))
            .map(|api_key| Provider::DeepSeek { api_key })
            .unwrap_or(Provider::Mock),
        "openai" => key("OPENAI_API_KEY")
            .map(|api_key| Provider::OpenAi { api_key })
            .unwrap_or(Provider::Mock),
        _ => Provider::Mock,
    }
}

pub fn create_llm_from_config(cfg: &LlmSection) -> Arc<dyn LlmClient> {
    let provider = resolve_provider(&cfg.provider, |name| {
        std::env::var(name).ok().filter(|v| !v.is_empty())
    });
    match provider {
        Provider::DeepSeek { api_key } => {
            tracing::info!(model = %cfg.model, "Using DeepSeek LLM");
            Arc::new(OpenAiClient::deepseek(&cfg.model, &api_key))
        }
        Provider::OpenAi { api_key } => {
            tracing::info!(model = %cfg.model, "Using OpenAI-compatible LLM");
            Arc::new(OpenAiClient::new(cfg.base_url.as_deref(), &cfg.model, &api_key))
        }
        Provider::Mock => {
            if cfg.provider.to_lowercase() != "mock" {
                tracing::warn!(provider = %cfg.provider, "No API key set or provider unknown, using Mock LLM");
            }
            Arc::new(MockLlmClient::new())
        }
    }
}
