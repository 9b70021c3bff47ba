//! 能力注册表
//!
//! 每个能力实现 Capability（id / description / 输出 schema / invoke），由 CapabilityRegistry 按 id 注册与查找。
//! 注册表在启动时构建，之后只读，TOOL_CHOICE 阶段据此生成目录，TOOL_EXEC 阶段按 id 调用。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::core::ReasoningError;
use crate::orchestrator::Reasoner;

/// 可被编排循环委托的专用能力
#[async_trait]
pub trait Capability: Send + Sync {
    /// 能力 id（TOOL_CHOICE 输出的 choice 字段）
    fn id(&self) -> &str;

    /// 能力描述（出现在目录中，供模型选择）
    fn description(&self) -> &str;

    /// 输出 JSON Schema
    fn output_schema(&self) -> Value;

    /// 以当前查询与上下文调用能力，返回符合 output_schema 的结构化结果
    async fn invoke(
        &self,
        reasoner: &dyn Reasoner,
        query: &str,
        context: &str,
    ) -> Result<Value, ReasoningError>;
}

/// 目录条目：id -> {description, output_schema}
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    pub id: String,
    pub description: String,
    pub output_schema: Value,
}

/// 能力注册表：按 id 存储 Arc<dyn Capability>
#[derive(Default, Clone)]
pub struct CapabilityRegistry {
    capabilities: HashMap<String, Arc<dyn Capability>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, capability: impl Capability + 'static) {
        let id = capability.id().to_string();
        self.capabilities.insert(id, Arc::new(capability));
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Capability>> {
        self.capabilities.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.capabilities.contains_key(id)
    }

    /// 按 id 排序，保证目录文本稳定
    pub fn catalog(&self) -> Vec<CatalogEntry> {
        let mut entries: Vec<CatalogEntry> = self
            .capabilities
            .iter()
            .map(|(id, c)| CatalogEntry {
                id: id.clone(),
                description: c.description().to_string(),
                output_schema: c.output_schema(),
            })
            .collect();
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        entries
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.capabilities.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }
}
