//! 入站缓冲：按 identity 的防抖合并，以及固定周期的批处理轮询

pub mod debounce;
pub mod dedup;
pub mod poller;

pub use debounce::{BatchHandler, BufferOptions, BufferStats, BufferedMessage, CoalescingBuffer};
pub use dedup::RecentIds;
pub use poller::{
    BatchPoller, BatchTriage, InboundMessage, LandscapeAnalysis, PollBatchHandler, PollerStats,
    Priority, ReasonerTriage, RedactedBatch, RejectedMessage,
};
