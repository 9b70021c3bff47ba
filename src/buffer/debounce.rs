//! 按 identity 合并突发输入的防抖缓冲
//!
//! 每个 identity 一份状态：pending / overflow / 定时器 / in_flight。
//! - 非 in_flight 时新消息进入 pending 并重置定时器（纯防抖：任何新消息都会重新开始计时）
//! - 定时器到期后把 pending 整体交给 handler，处理期间新消息只进 overflow
//! - handler 结束后 overflow 移回 pending 并重新计时，处理中到达的一串消息同样会被合并
//!
//! 同一 identity 任何时刻至多一个 flush；不同 identity 完全并发。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// 缓冲中的一条消息
#[derive(Debug, Clone)]
pub struct BufferedMessage {
    pub text: String,
    pub received_at: DateTime<Utc>,
}

impl BufferedMessage {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            received_at: Utc::now(),
        }
    }
}

/// 批处理回调：收到按到达顺序排列的一批消息
///
/// 返回的错误只会被记录，批次不会重新入队。
#[async_trait]
pub trait BatchHandler: Send + Sync {
    async fn handle(&self, identity: &str, batch: Vec<BufferedMessage>) -> anyhow::Result<()>;
}

/// 单个 identity 的缓冲快照
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BufferStats {
    pub current_messages: usize,
    pub queued_messages: usize,
    pub processing: bool,
    pub has_timer: bool,
}

/// 缓冲参数
#[derive(Debug, Clone)]
pub struct BufferOptions {
    pub debounce: Duration,
    /// identity 表容量；满时只淘汰空闲 identity
    pub max_identities: usize,
    pub idle_expiry: Duration,
}

impl Default for BufferOptions {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(3000),
            max_identities: 10_000,
            idle_expiry: Duration::from_secs(3600),
        }
    }
}

impl From<&crate::config::BufferSection> for BufferOptions {
    fn from(cfg: &crate::config::BufferSection) -> Self {
        Self {
            debounce: Duration::from_millis(cfg.debounce_ms),
            max_identities: cfg.max_identities,
            idle_expiry: Duration::from_secs(cfg.idle_expiry_secs),
        }
    }
}

struct IdentityState {
    pending: Vec<BufferedMessage>,
    overflow: Vec<BufferedMessage>,
    timer: Option<JoinHandle<()>>,
    /// 每次重新计时递增，过期的定时器据此放弃 flush
    generation: u64,
    in_flight: bool,
    last_activity: Instant,
}

impl IdentityState {
    fn new() -> Self {
        Self {
            pending: Vec::new(),
            overflow: Vec::new(),
            timer: None,
            generation: 0,
            in_flight: false,
            last_activity: Instant::now(),
        }
    }

    fn is_idle(&self) -> bool {
        !self.in_flight && self.timer.is_none() && self.pending.is_empty() && self.overflow.is_empty()
    }
}

struct Inner {
    states: Mutex<HashMap<String, IdentityState>>,
    handler: Arc<dyn BatchHandler>,
    options: BufferOptions,
}

/// 防抖合并缓冲（可 Clone，内部共享状态）
#[derive(Clone)]
pub struct CoalescingBuffer {
    inner: Arc<Inner>,
}

impl CoalescingBuffer {
    pub fn new(handler: Arc<dyn BatchHandler>, options: BufferOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                states: Mutex::new(HashMap::new()),
                handler,
                options,
            }),
        }
    }

    /// 提交一条消息；identity 正在处理时进入 overflow 并返回 false
    pub async fn submit(&self, identity: &str, text: impl Into<String>) -> bool {
        self.inner.submit(identity, BufferedMessage::new(text)).await
    }

    /// 立即处理 pending（pending 为空或正在处理时为 no-op）
    pub async fn flush(&self, identity: &str) {
        self.inner.flush(identity).await
    }

    pub async fn is_processing(&self, identity: &str) -> bool {
        let states = self.inner.states.lock().await;
        states.get(identity).map(|s| s.in_flight).unwrap_or(false)
    }

    /// 取消定时器并丢弃该 identity 的全部状态
    pub async fn clear(&self, identity: &str) {
        let mut states = self.inner.states.lock().await;
        if let Some(mut state) = states.remove(identity) {
            if let Some(timer) = state.timer.take() {
                timer.abort();
            }
            tracing::debug!(identity = %identity, "buffer cleared");
        }
    }

    pub async fn stats(&self, identity: &str) -> BufferStats {
        let states = self.inner.states.lock().await;
        states
            .get(identity)
            .map(|s| BufferStats {
                current_messages: s.pending.len(),
                queued_messages: s.overflow.len(),
                processing: s.in_flight,
                has_timer: s.timer.is_some(),
            })
            .unwrap_or_default()
    }

    /// 当前跟踪的 identity 数
    pub async fn identities(&self) -> usize {
        self.inner.states.lock().await.len()
    }
}

impl Inner {
    async fn submit(self: &Arc<Self>, identity: &str, message: BufferedMessage) -> bool {
        let mut states = self.states.lock().await;
        if !states.contains_key(identity) {
            self.make_room(&mut states);
        }
        let state = states
            .entry(identity.to_string())
            .or_insert_with(IdentityState::new);
        state.last_activity = Instant::now();

        if state.in_flight {
            state.overflow.push(message);
            tracing::debug!(
                identity = %identity,
                queued = state.overflow.len(),
                "identity busy, message queued for next batch"
            );
            return false;
        }

        state.pending.push(message);
        self.arm_timer(identity, state);
        true
    }

    /// 取消旧定时器并启动新的单次延时
    fn arm_timer(self: &Arc<Self>, identity: &str, state: &mut IdentityState) {
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        state.generation += 1;
        let generation = state.generation;
        let inner = Arc::clone(self);
        let id = identity.to_string();
        let delay = self.options.debounce;
        state.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            inner.on_timer(&id, generation).await;
        }));
    }

    async fn on_timer(self: &Arc<Self>, identity: &str, generation: u64) {
        {
            let mut states = self.states.lock().await;
            let Some(state) = states.get_mut(identity) else {
                return;
            };
            if state.generation != generation {
                return;
            }
            // 与当前任务分离，之后的 abort 不会打断正在进行的 flush
            state.timer = None;
        }
        self.flush(identity).await;
    }

    async fn flush(self: &Arc<Self>, identity: &str) {
        let batch = {
            let mut states = self.states.lock().await;
            let Some(state) = states.get_mut(identity) else {
                return;
            };
            if state.pending.is_empty() || state.in_flight {
                return;
            }
            if let Some(timer) = state.timer.take() {
                timer.abort();
            }
            state.in_flight = true;
            std::mem::take(&mut state.pending)
        };

        let count = batch.len();
        tracing::info!(identity = %identity, count, "flushing batch");

        // handler 在独立任务中运行，错误与 panic 都只记录
        let handler = Arc::clone(&self.handler);
        let id = identity.to_string();
        match tokio::spawn(async move { handler.handle(&id, batch).await }).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::error!(identity = %identity, count, error = %e, "batch handler failed, batch dropped");
            }
            Err(e) => {
                tracing::error!(identity = %identity, count, error = %e, "batch handler panicked, batch dropped");
            }
        }

        let mut states = self.states.lock().await;
        if let Some(state) = states.get_mut(identity) {
            state.in_flight = false;
            state.last_activity = Instant::now();
            if !state.overflow.is_empty() {
                state.pending = std::mem::take(&mut state.overflow);
                tracing::debug!(
                    identity = %identity,
                    count = state.pending.len(),
                    "overflow moved to pending"
                );
                self.arm_timer(identity, state);
            }
        }
    }

    /// 表满时先清理空闲过期的 identity，仍满则淘汰最久未活动的空闲 identity
    fn make_room(&self, states: &mut HashMap<String, IdentityState>) {
        if states.len() < self.options.max_identities {
            return;
        }
        let expiry = self.options.idle_expiry;
        states.retain(|_, s| !(s.is_idle() && s.last_activity.elapsed() > expiry));
        if states.len() < self.options.max_identities {
            return;
        }
        let oldest_idle = states
            .iter()
            .filter(|(_, s)| s.is_idle())
            .min_by_key(|(_, s)| s.last_activity)
            .map(|(k, _)| k.clone());
        match oldest_idle {
            Some(k) => {
                states.remove(&k);
            }
            None => {
                tracing::warn!(
                    tracked = states.len(),
                    "identity table full and no idle identity to evict"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct Recorder {
        batches: StdMutex<Vec<(String, Vec<String>, Instant)>>,
        delay: Duration,
        fail: bool,
    }

    impl Recorder {
        fn batches(&self) -> Vec<(String, Vec<String>)> {
            self.batches
                .lock()
                .unwrap()
                .iter()
                .map(|(id, texts, _)| (id.clone(), texts.clone()))
                .collect()
        }
    }

    #[async_trait]
    impl BatchHandler for Recorder {
        async fn handle(&self, identity: &str, batch: Vec<BufferedMessage>) -> anyhow::Result<()> {
            let texts = batch.into_iter().map(|m| m.text).collect();
            self.batches
                .lock()
                .unwrap()
                .push((identity.to_string(), texts, Instant::now()));
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail {
                anyhow::bail!("handler failure");
            }
            Ok(())
        }
    }

    fn buffer_with(recorder: Arc<Recorder>) -> CoalescingBuffer {
        CoalescingBuffer::new(recorder, BufferOptions::default())
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_resets_window() {
        let recorder = Arc::new(Recorder::default());
        let buffer = buffer_with(recorder.clone());
        let start = Instant::now();

        assert!(buffer.submit("chat", "a").await);
        tokio::time::sleep(ms(1000)).await;
        assert!(buffer.submit("chat", "b").await);

        tokio::time::sleep(ms(2900)).await;
        assert!(recorder.batches().is_empty());

        tokio::time::sleep(ms(200)).await;
        let batches = recorder.batches.lock().unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].1, vec!["a".to_string(), "b".to_string()]);
        let fired = batches[0].2.duration_since(start);
        assert!(fired >= ms(4000) && fired < ms(4100), "fired at {:?}", fired);
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_flushes_once_in_order() {
        let recorder = Arc::new(Recorder::default());
        let buffer = buffer_with(recorder.clone());

        for text in ["1", "2", "3", "4", "5"] {
            buffer.submit("chat", text).await;
            tokio::time::sleep(ms(500)).await;
        }
        tokio::time::sleep(ms(5000)).await;

        let batches = recorder.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].1, vec!["1", "2", "3", "4", "5"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_arrival_during_flush_goes_to_next_batch() {
        let recorder = Arc::new(Recorder {
            delay: ms(5000),
            ..Default::default()
        });
        let buffer = buffer_with(recorder.clone());

        assert!(buffer.submit("chat", "a").await);
        tokio::time::sleep(ms(3100)).await;
        assert!(buffer.is_processing("chat").await);

        assert!(!buffer.submit("chat", "b").await);
        assert!(!buffer.submit("chat", "c").await);
        let stats = buffer.stats("chat").await;
        assert_eq!(stats.queued_messages, 2);
        assert_eq!(stats.current_messages, 0);
        assert!(stats.processing);

        // 第一批处理结束于约 8000ms，overflow 重新计时，约 11000ms 第二次 flush
        tokio::time::sleep(ms(5000)).await;
        assert!(!buffer.is_processing("chat").await);
        let stats = buffer.stats("chat").await;
        assert_eq!(stats.current_messages, 2);
        assert!(stats.has_timer);
        assert_eq!(recorder.batches().len(), 1);

        tokio::time::sleep(ms(3100)).await;
        let batches = recorder.batches();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].1, vec!["a"]);
        assert_eq!(batches[1].1, vec!["b", "c"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handler_error_is_contained() {
        let recorder = Arc::new(Recorder {
            fail: true,
            ..Default::default()
        });
        let buffer = buffer_with(recorder.clone());

        buffer.submit("chat", "a").await;
        tokio::time::sleep(ms(3500)).await;
        assert!(!buffer.is_processing("chat").await);
        assert_eq!(buffer.stats("chat").await, BufferStats::default());

        assert!(buffer.submit("chat", "b").await);
        tokio::time::sleep(ms(3500)).await;
        assert_eq!(recorder.batches().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_cancels_timer() {
        let recorder = Arc::new(Recorder::default());
        let buffer = buffer_with(recorder.clone());

        buffer.submit("chat", "a").await;
        assert!(buffer.stats("chat").await.has_timer);
        buffer.clear("chat").await;
        tokio::time::sleep(ms(5000)).await;

        assert!(recorder.batches().is_empty());
        assert_eq!(buffer.identities().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_identities_are_independent() {
        let recorder = Arc::new(Recorder::default());
        let buffer = buffer_with(recorder.clone());

        buffer.submit("a", "a1").await;
        tokio::time::sleep(ms(2000)).await;
        buffer.submit("b", "b1").await;
        tokio::time::sleep(ms(1500)).await;

        let batches = recorder.batches();
        assert_eq!(batches, vec![("a".to_string(), vec!["a1".to_string()])]);

        tokio::time::sleep(ms(2000)).await;
        assert_eq!(recorder.batches().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_table_evicts_only_idle_identities() {
        let recorder = Arc::new(Recorder::default());
        let buffer = CoalescingBuffer::new(
            recorder.clone(),
            BufferOptions {
                max_identities: 2,
                ..Default::default()
            },
        );

        buffer.submit("a", "x").await;
        tokio::time::sleep(ms(3500)).await; // a 已 flush，变为空闲
        buffer.submit("b", "y").await; // b 有定时器，不可淘汰
        buffer.submit("c", "z").await;

        assert_eq!(buffer.identities().await, 2);
        assert!(buffer.stats("b").await.has_timer);
        assert!(buffer.stats("c").await.has_timer);
    }
}
