//! Mock LLM 客户端（离线运行与测试用）
//!
//! 先按顺序返回预置回复；预置用完后回显最后一条 User 消息，包装成一个结束本轮的 BASE 输出。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{ChatMessage, ChatRole, LlmClient};

#[derive(Debug, Default)]
pub struct MockLlmClient {
    replies: Mutex<VecDeque<String>>,
    calls: Mutex<Vec<Vec<ChatMessage>>>,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 预置回复，依次返回
    pub fn with_replies<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(Into::into).collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// 已收到的请求（每次调用的完整消息列表）
    pub fn calls(&self) -> Vec<Vec<ChatMessage>> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn echo(messages: &[ChatMessage]) -> String {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, ChatRole::User))
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");
        serde_json::json!({
            "choice": "response",
            "response": format!("Echo from Mock: {}", last_user),
            "tool": false,
            "continue": false,
        })
        .to_string()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, String> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(messages.to_vec());
        }
        let scripted = self
            .replies
            .lock()
            .map_err(|e| e.to_string())?
            .pop_front();
        Ok(scripted.unwrap_or_else(|| Self::echo(messages)))
    }

    fn model(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_replies_then_echo() {
        let mock = MockLlmClient::with_replies(["first"]);
        let msgs = vec![ChatMessage::user("hello")];
        assert_eq!(mock.complete(&msgs).await.unwrap(), "first");

        let echoed: serde_json::Value =
            serde_json::from_str(&mock.complete(&msgs).await.unwrap()).unwrap();
        assert_eq!(echoed["choice"], "response");
        assert_eq!(echoed["continue"], false);
        assert!(echoed["response"].as_str().unwrap().contains("hello"));
        assert_eq!(mock.calls().len(), 2);
    }
}
