//! LLM 客户端抽象
//!
//! 推理层只发两条消息：system（上下文 + 输出 schema）与 user（本阶段 prompt），回复是一段文本。

use async_trait::async_trait;
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 单次完成；错误为可读的传输层描述
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, String>;

    /// 后端模型名（日志用）
    fn model(&self) -> &str;
}
