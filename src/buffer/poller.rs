//! 固定周期批处理轮询（至少一次投递的渠道用）
//!
//! 入站消息按 id 去重后进入托盘；每个周期若未在处理且托盘非空，整体取走托盘并分两阶段处理：
//! 先按 identity 脱敏（研判也是一次推理调用，只能看到占位符），再对整批做一次轻量研判（BatchTriage），
//! 最后交给详细处理（PollBatchHandler）。任一阶段失败都只记录，批次丢弃，不重新入队。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::dedup::RecentIds;
use crate::orchestrator::{query_typed, Reasoner};
use crate::redaction::{SecretRedactor, UnmatchedPolicy};

/// 入站消息
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// 渠道侧消息 id，用于去重
    pub id: String,
    /// 会话 / 聊天 id
    pub identity: String,
    pub text: String,
    pub received_at: DateTime<Utc>,
}

impl InboundMessage {
    pub fn new(id: impl Into<String>, identity: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            identity: identity.into(),
            text: text.into(),
            received_at: Utc::now(),
        }
    }
}

/// 未通过脱敏策略检查而被丢弃的消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedMessage {
    pub id: String,
    pub identity: String,
    pub reason: String,
}

/// 已脱敏的批次：messages 的文本只含占位符，每个 identity 一个脱敏器，占位符在该 identity 的 run 中还原
#[derive(Default)]
pub struct RedactedBatch {
    pub messages: Vec<InboundMessage>,
    pub rejected: Vec<RejectedMessage>,
    redactors: HashMap<String, SecretRedactor>,
}

impl RedactedBatch {
    /// 逐条脱敏；同一 identity 的消息共用一个脱敏器，保证占位符不冲突
    pub fn redact(batch: Vec<InboundMessage>, policy: UnmatchedPolicy) -> Self {
        let mut out = Self::default();
        for mut message in batch {
            let redactor = out.redactors.entry(message.identity.clone()).or_default();
            let redacted = redactor.redact(&message.text);
            if let Err(e) = redactor.enforce(policy, &redacted) {
                tracing::error!(
                    identity = %message.identity,
                    id = %message.id,
                    error = %e,
                    "message rejected before triage"
                );
                out.rejected.push(RejectedMessage {
                    id: message.id,
                    identity: message.identity,
                    reason: e.to_string(),
                });
                continue;
            }
            message.text = redacted;
            out.messages.push(message);
        }
        out
    }

    /// 取出某个 identity 的脱敏器；没有则返回空脱敏器
    pub fn take_redactor(&mut self, identity: &str) -> SecretRedactor {
        self.redactors.remove(identity).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Urgent,
}

/// 批次研判结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LandscapeAnalysis {
    /// 这批消息整体在说什么
    pub situation_summary: String,
    /// 用户的总体意图
    pub overall_intent: String,
    /// 建议的处理方式
    pub suggested_approach: String,
    pub priority: Priority,
}

impl LandscapeAnalysis {
    /// 整批都未通过脱敏策略时不做研判，处理方只需上报拒绝
    fn rejected_only(count: usize) -> Self {
        Self {
            situation_summary: format!("{} message(s) rejected before analysis", count),
            overall_intent: String::new(),
            suggested_approach: String::new(),
            priority: Priority::Low,
        }
    }
}

/// 第一阶段：整批研判（输入已脱敏）
#[async_trait]
pub trait BatchTriage: Send + Sync {
    async fn triage(&self, batch: &[InboundMessage]) -> anyhow::Result<LandscapeAnalysis>;
}

/// 第二阶段：带研判结果的详细处理
#[async_trait]
pub trait PollBatchHandler: Send + Sync {
    async fn handle(
        &self,
        batch: RedactedBatch,
        landscape: LandscapeAnalysis,
    ) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollerStats {
    pub queued_messages: usize,
    pub processed_total: usize,
    pub is_processing: bool,
    pub polling_interval: u64,
}

struct PollerState {
    tray: Vec<InboundMessage>,
    seen: RecentIds,
    /// 累计处理的消息数；seen 有容量上限，不能用来计数
    processed: usize,
    processing: bool,
}

struct PollerInner {
    state: Mutex<PollerState>,
    triage: Arc<dyn BatchTriage>,
    handler: Arc<dyn PollBatchHandler>,
    policy: UnmatchedPolicy,
    interval: Duration,
    cancel: Mutex<Option<CancellationToken>>,
}

#[derive(Clone)]
pub struct BatchPoller {
    inner: Arc<PollerInner>,
}

impl BatchPoller {
    pub fn new(
        triage: Arc<dyn BatchTriage>,
        handler: Arc<dyn PollBatchHandler>,
        policy: UnmatchedPolicy,
        interval: Duration,
        dedup_capacity: usize,
    ) -> Self {
        Self {
            inner: Arc::new(PollerInner {
                state: Mutex::new(PollerState {
                    tray: Vec::new(),
                    seen: RecentIds::new(dedup_capacity),
                    processed: 0,
                    processing: false,
                }),
                triage,
                handler,
                policy,
                interval,
                cancel: Mutex::new(None),
            }),
        }
    }

    /// 入队；id 已见过返回 false
    pub async fn enqueue(&self, message: InboundMessage) -> bool {
        let mut state = self.inner.state.lock().await;
        if !state.seen.insert(&message.id) {
            tracing::debug!(id = %message.id, "duplicate message skipped");
            return false;
        }
        tracing::debug!(identity = %message.identity, id = %message.id, "message enqueued");
        state.tray.push(message);
        true
    }

    /// 启动周期轮询；已在运行时为 no-op
    pub async fn start(&self) {
        let mut cancel = self.inner.cancel.lock().await;
        if cancel.is_some() {
            return;
        }
        let token = CancellationToken::new();
        *cancel = Some(token.clone());

        let poller = self.clone();
        let period = self.inner.interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let poller = poller.clone();
                        tokio::spawn(async move {
                            poller.poll().await;
                        });
                    }
                }
            }
        });
        tracing::info!(interval_ms = period.as_millis() as u64, "batch poller started");
    }

    /// 停止轮询；正在处理的批次会继续完成
    pub async fn stop(&self) {
        if let Some(token) = self.inner.cancel.lock().await.take() {
            token.cancel();
            tracing::info!("batch poller stopped");
        }
    }

    /// 执行一次轮询周期，返回本次处理的消息数（跳过时为 0）
    pub async fn poll(&self) -> usize {
        let batch = {
            let mut state = self.inner.state.lock().await;
            if state.processing || state.tray.is_empty() {
                return 0;
            }
            state.processing = true;
            std::mem::take(&mut state.tray)
        };
        let count = batch.len();
        tracing::info!(count, "processing batch");

        let triage = Arc::clone(&self.inner.triage);
        let handler = Arc::clone(&self.inner.handler);
        let policy = self.inner.policy;
        let result = tokio::spawn(async move {
            let batch = RedactedBatch::redact(batch, policy);
            let landscape = if batch.is_empty() {
                LandscapeAnalysis::rejected_only(batch.rejected.len())
            } else {
                triage.triage(&batch.messages).await?
            };
            tracing::info!(
                summary = %landscape.situation_summary,
                intent = %landscape.overall_intent,
                priority = ?landscape.priority,
                "batch triaged"
            );
            handler.handle(batch, landscape).await
        })
        .await;

        match result {
            Ok(Ok(())) => tracing::info!(count, "batch completed"),
            Ok(Err(e)) => tracing::error!(count, error = %e, "batch processing failed, batch dropped"),
            Err(e) => tracing::error!(count, error = %e, "batch processing panicked, batch dropped"),
        }

        let mut state = self.inner.state.lock().await;
        state.processing = false;
        state.processed += count;
        count
    }

    pub async fn stats(&self) -> PollerStats {
        let state = self.inner.state.lock().await;
        PollerStats {
            queued_messages: state.tray.len(),
            processed_total: state.processed,
            is_processing: state.processing,
            polling_interval: self.inner.interval.as_millis() as u64,
        }
    }
}

/// 以一次推理调用完成研判
pub struct ReasonerTriage {
    reasoner: Arc<dyn Reasoner>,
}

impl ReasonerTriage {
    pub fn new(reasoner: Arc<dyn Reasoner>) -> Self {
        Self { reasoner }
    }

    fn prompt(batch: &[InboundMessage]) -> String {
        let combined = batch
            .iter()
            .map(|m| format!("[ID:{}, Time:{}]: {}", m.id, m.received_at.to_rfc3339(), m.text))
            .collect::<Vec<_>>()
            .join("\n");
        format!(
            "You are analyzing a batch of incoming messages to form a strategic response plan.\n\n\
             Messages in this batch:\n{}\n\n\
             Analyze the overall situation, intent, and recommended approach for handling these messages as a cohesive unit.",
            combined
        )
    }
}

#[async_trait]
impl BatchTriage for ReasonerTriage {
    async fn triage(&self, batch: &[InboundMessage]) -> anyhow::Result<LandscapeAnalysis> {
        let analysis = query_typed(
            self.reasoner.as_ref(),
            &Self::prompt(batch),
            "You are a strategic message analyzer for an infrastructure operations agent.",
        )
        .await?;
        Ok(analysis)
    }
}
