//! 内置能力：filetree、summarize
//!
//! 两者都是一次结构化推理调用，区别只在输出 schema 与描述。

use std::marker::PhantomData;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::schema::{schema_value, FileTreeOutput, SummaryOutput};
use super::{Capability, CapabilityRegistry};
use crate::core::ReasoningError;
use crate::orchestrator::{query_typed, Reasoner};

/// 输出为 T 的单次推理能力
pub struct SchemaCapability<T> {
    id: &'static str,
    description: &'static str,
    _output: PhantomData<fn() -> T>,
}

impl<T> SchemaCapability<T> {
    pub const fn new(id: &'static str, description: &'static str) -> Self {
        Self {
            id,
            description,
            _output: PhantomData,
        }
    }
}

#[async_trait]
impl<T> Capability for SchemaCapability<T>
where
    T: JsonSchema + DeserializeOwned + Serialize + Send + 'static,
{
    fn id(&self) -> &str {
        self.id
    }

    fn description(&self) -> &str {
        self.description
    }

    fn output_schema(&self) -> Value {
        schema_value::<T>()
    }

    async fn invoke(
        &self,
        reasoner: &dyn Reasoner,
        query: &str,
        context: &str,
    ) -> Result<Value, ReasoningError> {
        let output: T = query_typed(reasoner, query, context).await?;
        serde_json::to_value(output).map_err(|e| ReasoningError::SchemaViolation(e.to_string()))
    }
}

pub fn filetree() -> SchemaCapability<FileTreeOutput> {
    SchemaCapability::new("filetree", "Generate file tree structures with reasoning")
}

pub fn summarize() -> SchemaCapability<SummaryOutput> {
    SchemaCapability::new("summarize", "Create detailed summaries of content")
}

/// 含全部内置能力的注册表
pub fn builtin_registry() -> CapabilityRegistry {
    let mut registry = CapabilityRegistry::new();
    registry.register(filetree());
    registry.register(summarize());
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::ScriptedReasoner;
    use serde_json::json;

    #[test]
    fn test_builtin_catalog_sorted() {
        let registry = builtin_registry();
        assert_eq!(registry.ids(), vec!["filetree", "summarize"]);
        assert!(registry.contains("filetree"));
        assert!(registry.get("shell").is_none());

        let catalog = registry.catalog();
        assert_eq!(catalog[1].id, "summarize");
        assert_eq!(catalog[1].description, "Create detailed summaries of content");
        assert!(catalog[0].output_schema["properties"].get("fileTree").is_some());
        assert!(catalog[1].output_schema["properties"].get("summary").is_some());
    }

    #[tokio::test]
    async fn test_filetree_invoke_returns_structured_output() {
        let reasoner = ScriptedReasoner::new([json!({
            "fileTree": "src/\n  main.rs",
            "reasoning": "minimal binary",
            "missingContext": []
        })]);
        let out = filetree()
            .invoke(&reasoner, "layout for a rust cli", "")
            .await
            .unwrap();
        assert_eq!(out["fileTree"], "src/\n  main.rs");

        let prompts = reasoner.prompts();
        assert_eq!(prompts[0].0, "layout for a rust cli");
        assert!(prompts[0].1["properties"].get("fileTree").is_some());
    }

    #[tokio::test]
    async fn test_invoke_rejects_nonconforming_output() {
        let reasoner = ScriptedReasoner::new([json!({ "summary": 3 })]);
        let err = summarize().invoke(&reasoner, "q", "").await.unwrap_err();
        assert!(matches!(err, ReasoningError::SchemaViolation(_)));
    }
}
