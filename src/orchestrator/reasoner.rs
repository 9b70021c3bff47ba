//! 推理调用抽象
//!
//! Reasoner 是一次不透明的结构化推理：输入 prompt、阶段 schema 与上下文，输出 JSON 对象。
//! 失败只有两类：输出不符合 schema（SchemaViolation），或调用本身失败（Transport）。这一层不重试。

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::core::ReasoningError;
use crate::llm::{ChatMessage, LlmClient};
use crate::tools::schema_value;

#[async_trait]
pub trait Reasoner: Send + Sync {
    async fn query(&self, prompt: &str, schema: &Value, context: &str)
        -> Result<Value, ReasoningError>;
}

/// 以 T 的 schema 发起推理并解码为 T；解码失败即 SchemaViolation
pub async fn query_typed<T>(
    reasoner: &dyn Reasoner,
    prompt: &str,
    context: &str,
) -> Result<T, ReasoningError>
where
    T: DeserializeOwned + JsonSchema,
{
    let schema = schema_value::<T>();
    let value = reasoner.query(prompt, &schema, context).await?;
    serde_json::from_value(value).map_err(|e| ReasoningError::SchemaViolation(e.to_string()))
}

/// 从模型输出中提取 JSON：优先 ```json 代码块，其次第一个 `{` 到最后一个 `}`
pub fn extract_json(output: &str) -> Option<&str> {
    let trimmed = output.trim();
    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        return Some(rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim()));
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (end > start).then(|| &trimmed[start..=end])
}

/// 基于 LlmClient 的推理：system 消息 = 上下文 + 阶段 schema，user 消息 = prompt
pub struct LlmReasoner {
    llm: Arc<dyn LlmClient>,
}

impl LlmReasoner {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    fn system_prompt(schema: &Value, context: &str) -> String {
        let schema_text = serde_json::to_string_pretty(schema).unwrap_or_default();
        let instruction = format!(
            "Respond with a single JSON object that conforms to this JSON Schema. Output only the JSON.\n{}",
            schema_text
        );
        if context.trim().is_empty() {
            instruction
        } else {
            format!("{}\n\n{}", context, instruction)
        }
    }
}

#[async_trait]
impl Reasoner for LlmReasoner {
    async fn query(
        &self,
        prompt: &str,
        schema: &Value,
        context: &str,
    ) -> Result<Value, ReasoningError> {
        let messages = vec![
            ChatMessage::system(Self::system_prompt(schema, context)),
            ChatMessage::user(prompt),
        ];
        let raw = self
            .llm
            .complete(&messages)
            .await
            .map_err(ReasoningError::Transport)?;
        tracing::debug!(model = %self.llm.model(), chars = raw.len(), "reasoning output received");

        let json = extract_json(&raw).ok_or_else(|| {
            ReasoningError::SchemaViolation(format!("no JSON object in output: {}", preview(&raw)))
        })?;
        let value: Value = serde_json::from_str(json)
            .map_err(|e| ReasoningError::SchemaViolation(format!("{}: {}", e, preview(json))))?;
        if !value.is_object() {
            return Err(ReasoningError::SchemaViolation(
                "output is not a JSON object".to_string(),
            ));
        }
        Ok(value)
    }
}

fn preview(s: &str) -> String {
    s.chars().take(200).collect()
}

/// 按顺序返回预置结果的 Reasoner（测试与离线演示用）；预置耗尽后重复 fallback，若无则返回 Transport 错误
#[derive(Default)]
pub struct ScriptedReasoner {
    script: Mutex<VecDeque<Result<Value, ReasoningError>>>,
    fallback: Option<Value>,
    prompts: Mutex<Vec<(String, Value, String)>>,
}

impl ScriptedReasoner {
    pub fn new(outputs: impl IntoIterator<Item = Value>) -> Self {
        Self::with_results(outputs.into_iter().map(Ok))
    }

    pub fn with_results(results: impl IntoIterator<Item = Result<Value, ReasoningError>>) -> Self {
        Self {
            script: Mutex::new(results.into_iter().collect()),
            ..Default::default()
        }
    }

    /// 每次调用都返回同一个输出
    pub fn repeating(output: Value) -> Self {
        Self {
            fallback: Some(output),
            ..Default::default()
        }
    }

    /// 收到的调用：(prompt, schema, context)
    pub fn prompts(&self) -> Vec<(String, Value, String)> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().map(|p| p.len()).unwrap_or(0)
    }
}

#[async_trait]
impl Reasoner for ScriptedReasoner {
    async fn query(
        &self,
        prompt: &str,
        schema: &Value,
        context: &str,
    ) -> Result<Value, ReasoningError> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push((prompt.to_string(), schema.clone(), context.to_string()));
        }
        let next = self
            .script
            .lock()
            .map_err(|e| ReasoningError::Transport(e.to_string()))?
            .pop_front();
        match next {
            Some(result) => result,
            None => self
                .fallback
                .clone()
                .ok_or_else(|| ReasoningError::Transport("script exhausted".to_string())),
        }
    }
}
