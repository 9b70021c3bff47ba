//! Headless Agent 运行时
//!
//! 把三部分接起来：适配层提交 (identity, text) → CoalescingBuffer 合并 → 每批新建 SecretRedactor 脱敏 →
//! Orchestrator 跑状态机 → RunEvent 带上 identity 发回适配层。
//! 每个 identity 的交互记录与自动批准开关保存在有容量与空闲过期的 KeyedStore 中。
//! 防抖缓冲与轮询两条入口共用同一个 identity 级 run 锁，同一 identity 的 run 不会交叠。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{mpsc, Mutex};

use crate::buffer::{
    BatchHandler, BatchPoller, BufferOptions, BufferStats, BufferedMessage, CoalescingBuffer,
    LandscapeAnalysis, PollBatchHandler, ReasonerTriage, RedactedBatch,
};
use crate::config::AppConfig;
use crate::core::KeyedStore;
use crate::llm::create_llm_from_config;
use crate::memory::{analyze_health, reflection_message, InteractionLog, InteractionStats};
use crate::orchestrator::{
    opens_run, LlmReasoner, Orchestrator, OrchestratorConfig, Reasoner, RunEvent, RunScope,
};
use crate::redaction::{SecretRedactor, UnmatchedPolicy};
use crate::sandbox::{
    ApprovalGate, ChannelApprovalGate, ExecutionSandbox, PendingApproval, ShellSandbox,
};
use crate::tools::builtin_registry;

/// 发给适配层的事件
#[derive(Debug, Clone, Serialize)]
pub struct AgentEvent {
    pub identity: String,
    #[serde(flatten)]
    pub event: RunEvent,
}

/// 每个 identity 的会话状态
struct Session {
    log: Arc<InteractionLog>,
    auto_approve: bool,
    run_lock: Arc<Mutex<()>>,
}

impl Session {
    fn new(capacity: usize, auto_approve: bool) -> Self {
        Self {
            log: Arc::new(InteractionLog::new(capacity)),
            auto_approve,
            run_lock: Arc::new(Mutex::new(())),
        }
    }
}

type Sessions = Arc<Mutex<KeyedStore<String, Session>>>;

/// 批次处理：脱敏 → 策略检查 → 编排 → 健康检查
struct RunHandler {
    orchestrator: Arc<Orchestrator>,
    sessions: Sessions,
    events_tx: mpsc::UnboundedSender<AgentEvent>,
    policy: UnmatchedPolicy,
    context_capacity: usize,
    default_auto_approve: bool,
}

impl RunHandler {
    fn emit(&self, identity: &str, event: RunEvent) {
        let _ = self.events_tx.send(AgentEvent {
            identity: identity.to_string(),
            event,
        });
    }

    async fn session(&self, identity: &str) -> (Arc<InteractionLog>, bool, Arc<Mutex<()>>) {
        let mut sessions = self.sessions.lock().await;
        let capacity = self.context_capacity;
        let auto_approve = self.default_auto_approve;
        let session = sessions
            .get_or_insert_with(&identity.to_string(), || Session::new(capacity, auto_approve));
        (
            session.log.clone(),
            session.auto_approve,
            session.run_lock.clone(),
        )
    }

    /// 原文入口：脱敏、策略检查，再进入 run
    async fn process(&self, identity: &str, text: &str) -> anyhow::Result<()> {
        // 密钥作用域 = 本次 run
        let mut redactor = SecretRedactor::new();
        let redacted = redactor.redact(text);
        if let Err(e) = redactor.enforce(self.policy, &redacted) {
            self.emit(identity, RunEvent::Error { message: e.to_string() });
            return Err(e.into());
        }
        self.run_redacted(identity, &redactor, &redacted).await
    }

    /// 对已脱敏的请求跑一次编排；持有 identity 的 run 锁直到健康检查结束
    async fn run_redacted(
        &self,
        identity: &str,
        redactor: &SecretRedactor,
        redacted: &str,
    ) -> anyhow::Result<()> {
        let (_, _, run_lock) = self.session(identity).await;
        let _running = run_lock.lock_owned().await;
        // 排队期间开关可能被修改，以拿到锁时为准
        let (log, auto_approve, _) = self.session(identity).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let forward = {
            let events_tx = self.events_tx.clone();
            let identity = identity.to_string();
            tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    let _ = events_tx.send(AgentEvent {
                        identity: identity.clone(),
                        event,
                    });
                }
            })
        };

        let result = {
            let scope = RunScope::new(identity, redactor, log.as_ref())
                .with_auto_approve(auto_approve)
                .with_events(&tx);
            self.orchestrator.run(redacted, &scope).await
        };
        drop(tx);
        let _ = forward.await;

        // 只看用户发起的请求；同一 run 内各阶段的记录间隔是推理耗时，不代表对话节奏
        let requests: Vec<_> = log
            .records()
            .await
            .into_iter()
            .filter(|r| opens_run(&r.request))
            .collect();
        let issues = analyze_health(&requests);
        if let Some(message) = reflection_message(&issues) {
            tracing::info!(identity = %identity, issues = issues.len(), "conversation health issues detected");
            self.emit(identity, RunEvent::Warning { message });
        }

        result.map(|_| ()).map_err(Into::into)
    }
}

#[async_trait]
impl BatchHandler for RunHandler {
    async fn handle(&self, identity: &str, batch: Vec<BufferedMessage>) -> anyhow::Result<()> {
        let text = batch
            .iter()
            .map(|m| m.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        self.process(identity, &text).await
    }
}

#[async_trait]
impl PollBatchHandler for RunHandler {
    async fn handle(
        &self,
        mut batch: RedactedBatch,
        landscape: LandscapeAnalysis,
    ) -> anyhow::Result<()> {
        for rejected in std::mem::take(&mut batch.rejected) {
            self.emit(
                &rejected.identity,
                RunEvent::Error {
                    message: rejected.reason,
                },
            );
        }

        // 按 identity 分组，组内保持到达顺序
        let mut groups: Vec<(String, Vec<String>)> = Vec::new();
        for message in std::mem::take(&mut batch.messages) {
            match groups.iter_mut().find(|(id, _)| *id == message.identity) {
                Some((_, texts)) => texts.push(message.text),
                None => groups.push((message.identity, vec![message.text])),
            }
        }
        let mut first_error = None;
        for (identity, texts) in groups {
            self.emit(
                &identity,
                RunEvent::Status {
                    message: landscape.situation_summary.clone(),
                },
            );
            let redactor = batch.take_redactor(&identity);
            if let Err(e) = self.run_redacted(&identity, &redactor, &texts.join("\n")).await {
                tracing::error!(identity = %identity, error = %e, "batch run failed");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// 无界面 Agent：供控制台、WebSocket、机器人等适配层调用
pub struct Agent {
    config: AppConfig,
    handler: Arc<RunHandler>,
    buffer: CoalescingBuffer,
    reasoner: Arc<dyn Reasoner>,
}

impl Agent {
    /// 用给定的推理、沙箱与审批门组装；返回 Agent 与事件接收端
    pub fn new(
        config: AppConfig,
        reasoner: Arc<dyn Reasoner>,
        sandbox: Arc<dyn ExecutionSandbox>,
        approvals: Arc<dyn ApprovalGate>,
    ) -> (Self, mpsc::UnboundedReceiver<AgentEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let orchestrator = Arc::new(Orchestrator::new(
            reasoner.clone(),
            Arc::new(builtin_registry()),
            sandbox,
            approvals,
            OrchestratorConfig::from(&config.orchestration),
        ));
        let sessions = Arc::new(Mutex::new(KeyedStore::new(
            config.buffer.max_identities,
            Duration::from_secs(config.buffer.idle_expiry_secs),
        )));
        let handler = Arc::new(RunHandler {
            orchestrator,
            sessions,
            events_tx,
            policy: config.redaction.unmatched_policy,
            context_capacity: config.app.max_context_interactions,
            default_auto_approve: config.orchestration.auto_approve,
        });
        let buffer = CoalescingBuffer::new(handler.clone(), BufferOptions::from(&config.buffer));

        tracing::info!(
            debounce_ms = config.buffer.debounce_ms,
            max_iterations = config.orchestration.max_iterations,
            "agent initialized"
        );
        (
            Self {
                config,
                handler,
                buffer,
                reasoner,
            },
            events_rx,
        )
    }

    /// 按配置组装：LLM 推理、Shell 沙箱、通道审批；额外返回待审批请求的接收端
    pub fn from_config(
        config: AppConfig,
    ) -> (
        Self,
        mpsc::UnboundedReceiver<AgentEvent>,
        mpsc::Receiver<PendingApproval>,
    ) {
        let reasoner: Arc<dyn Reasoner> =
            Arc::new(LlmReasoner::new(create_llm_from_config(&config.llm)));
        let sandbox = Arc::new(ShellSandbox::from_config(&config.sandbox));
        let (gate, pending_rx) = ChannelApprovalGate::new(16);
        let (agent, events_rx) = Self::new(config, reasoner, sandbox, Arc::new(gate));
        (agent, events_rx, pending_rx)
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// 提交一条消息；identity 正在处理时排入下一批并返回 false
    pub async fn submit(&self, identity: &str, text: &str) -> bool {
        self.buffer.submit(identity, text).await
    }

    pub async fn is_processing(&self, identity: &str) -> bool {
        self.buffer.is_processing(identity).await
    }

    pub async fn buffer_stats(&self, identity: &str) -> BufferStats {
        self.buffer.stats(identity).await
    }

    pub async fn set_auto_approve(&self, identity: &str, enabled: bool) {
        let mut sessions = self.handler.sessions.lock().await;
        let capacity = self.handler.context_capacity;
        let session =
            sessions.get_or_insert_with(&identity.to_string(), || Session::new(capacity, enabled));
        session.auto_approve = enabled;
        tracing::info!(identity = %identity, enabled, "auto-approve updated");
    }

    pub async fn auto_approve(&self, identity: &str) -> bool {
        let mut sessions = self.handler.sessions.lock().await;
        sessions
            .get(&identity.to_string())
            .map(|s| s.auto_approve)
            .unwrap_or(self.handler.default_auto_approve)
    }

    pub async fn context_stats(&self, identity: &str) -> InteractionStats {
        let log = {
            let mut sessions = self.handler.sessions.lock().await;
            sessions.get(&identity.to_string()).map(|s| s.log.clone())
        };
        match log {
            Some(log) => log.stats().await,
            None => InteractionStats::default(),
        }
    }

    /// 断开时清理：取消定时器并丢弃该 identity 的缓冲与会话
    pub async fn clear(&self, identity: &str) {
        self.buffer.clear(identity).await;
        self.handler.sessions.lock().await.remove(&identity.to_string());
    }

    /// 固定周期轮询入口（至少一次投递的渠道用），批次进入与 submit 相同的处理链
    pub fn poller(&self) -> BatchPoller {
        BatchPoller::new(
            Arc::new(ReasonerTriage::new(self.reasoner.clone())),
            self.handler.clone(),
            self.config.redaction.unmatched_policy,
            Duration::from_millis(self.config.buffer.poll_interval_ms),
            self.config.buffer.dedup_capacity,
        )
    }
}
