//! OpenAI 兼容 API 客户端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点；DeepSeek 只是固定 base_url 的一种端点。
//! 推理调用不设超时、不重试，失败直接交给上层作为传输错误。

use std::sync::atomic::{AtomicU64, Ordering};

use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;

use crate::llm::{ChatMessage, ChatRole, LlmClient};

pub const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";

/// 累计 token 用量
#[derive(Debug, Default)]
struct Usage {
    prompt: AtomicU64,
    completion: AtomicU64,
}

pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    model: String,
    usage: Usage,
}

impl OpenAiClient {
    /// base_url 为空时使用 OpenAI 官方端点
    pub fn new(base_url: Option<&str>, model: &str, api_key: &str) -> Self {
        let mut config = OpenAIConfig::new().with_api_key(api_key);
        if let Some(url) = base_url.filter(|u| !u.is_empty()) {
            config = config.with_api_base(url);
        }
        Self {
            client: Client::with_config(config),
            model: model.to_string(),
            usage: Usage::default(),
        }
    }

    pub fn deepseek(model: &str, api_key: &str) -> Self {
        Self::new(Some(DEEPSEEK_BASE_URL), model, api_key)
    }

    fn request_messages(
        messages: &[ChatMessage],
    ) -> Result<Vec<ChatCompletionRequestMessage>, String> {
        messages
            .iter()
            .map(|m| {
                let built = match m.role {
                    ChatRole::System => ChatCompletionRequestSystemMessageArgs::default()
                        .content(m.content.clone())
                        .build()
                        .map(ChatCompletionRequestMessage::System),
                    ChatRole::User => ChatCompletionRequestUserMessageArgs::default()
                        .content(m.content.clone())
                        .build()
                        .map(ChatCompletionRequestMessage::User),
                };
                built.map_err(|e| e.to_string())
            })
            .collect()
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, String> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(Self::request_messages(messages)?)
            .build()
            .map_err(|e| e.to_string())?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| e.to_string())?;

        if let Some(usage) = &response.usage {
            let prompt_total = self
                .usage
                .prompt
                .fetch_add(usage.prompt_tokens as u64, Ordering::Relaxed)
                + usage.prompt_tokens as u64;
            let completion_total = self
                .usage
                .completion
                .fetch_add(usage.completion_tokens as u64, Ordering::Relaxed)
                + usage.completion_tokens as u64;
            tracing::debug!(
                model = %self.model,
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                prompt_total,
                completion_total,
                "completion finished"
            );
        }

        response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .ok_or_else(|| "empty completion".to_string())
    }

    fn model(&self) -> &str {
        &self.model
    }
}
