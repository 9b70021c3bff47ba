//! 交互记录：每个 identity 一份的上下文来源
//!
//! 编排每完成一个阶段就 record(request, response)；下一次推理调用前 snapshot() 渲染为上下文字符串。
//! 只保留最近 N 条（默认 21），更早的直接丢弃。

use std::collections::VecDeque;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;

/// 上下文来源：持久化每轮交互，并提供累积的上下文字符串
#[async_trait]
pub trait ContextProvider: Send + Sync {
    /// 记录一轮请求/响应；返回即视为已落地
    async fn record(&self, request: &Value, response: &Value);

    /// 当前累积上下文（作为每次推理调用的 context）
    async fn snapshot(&self) -> String;
}

/// 单条交互
#[derive(Debug, Clone)]
pub struct InteractionRecord {
    pub recorded_at: DateTime<Utc>,
    pub request: Value,
    pub response: Value,
}

impl InteractionRecord {
    pub fn new(request: Value, response: Value) -> Self {
        Self::at(Utc::now(), request, response)
    }

    pub fn at(recorded_at: DateTime<Utc>, request: Value, response: Value) -> Self {
        Self {
            recorded_at,
            request,
            response,
        }
    }

    /// 请求中的用户原话：字符串本身，或对象的 query 字段
    pub fn request_text(&self) -> &str {
        match &self.request {
            Value::String(s) => s,
            other => other.get("query").and_then(Value::as_str).unwrap_or(""),
        }
    }

    /// 响应中的回复文本（response 字段）
    pub fn response_text(&self) -> Option<&str> {
        self.response.get("response").and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionStats {
    pub total_recorded: usize,
    pub current_stored: usize,
    pub oldest: Option<String>,
    pub newest: Option<String>,
}

#[derive(Default)]
struct LogState {
    records: VecDeque<InteractionRecord>,
    total: usize,
}

/// 内存中的有界交互日志
pub struct InteractionLog {
    state: RwLock<LogState>,
    capacity: usize,
}

impl InteractionLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: RwLock::new(LogState::default()),
            capacity: capacity.max(1),
        }
    }

    pub async fn push(&self, record: InteractionRecord) {
        let mut state = self.state.write().await;
        state.records.push_back(record);
        state.total += 1;
        while state.records.len() > self.capacity {
            state.records.pop_front();
        }
    }

    pub async fn records(&self) -> Vec<InteractionRecord> {
        self.state.read().await.records.iter().cloned().collect()
    }

    pub async fn stats(&self) -> InteractionStats {
        let state = self.state.read().await;
        InteractionStats {
            total_recorded: state.total,
            current_stored: state.records.len(),
            oldest: state.records.front().map(|r| r.recorded_at.to_rfc3339()),
            newest: state.records.back().map(|r| r.recorded_at.to_rfc3339()),
        }
    }
}

#[async_trait]
impl ContextProvider for InteractionLog {
    async fn record(&self, request: &Value, response: &Value) {
        self.push(InteractionRecord::new(request.clone(), response.clone()))
            .await;
    }

    async fn snapshot(&self) -> String {
        let state = self.state.read().await;
        if state.records.is_empty() {
            return String::new();
        }
        let mut out = String::from("Previous interactions (oldest first):\n");
        for r in &state.records {
            out.push_str(&format!(
                "[{}]\nRequest: {}\nResponse: {}\n\n",
                r.recorded_at.to_rfc3339(),
                r.request,
                r.response
            ));
        }
        out.truncate(out.trim_end().len());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_bounded_and_counts_total() {
        let log = InteractionLog::new(2);
        for i in 0..3 {
            log.record(&json!({ "query": format!("q{}", i) }), &json!({ "response": "ok" }))
                .await;
        }
        let records = log.records().await;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].request_text(), "q1");

        let stats = log.stats().await;
        assert_eq!(stats.total_recorded, 3);
        assert_eq!(stats.current_stored, 2);
        assert!(stats.oldest.is_some());
    }

    #[tokio::test]
    async fn test_snapshot_contains_records_in_order() {
        let log = InteractionLog::new(21);
        assert!(log.snapshot().await.is_empty());

        log.record(&json!("first"), &json!({ "response": "one" })).await;
        log.record(&json!("second"), &json!({ "response": "two" })).await;
        let snapshot = log.snapshot().await;
        let first = snapshot.find("first").unwrap();
        let second = snapshot.find("second").unwrap();
        assert!(first < second);
        assert!(snapshot.contains("\"one\""));
    }
}
