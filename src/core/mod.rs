//! 核心公共层：错误类型与带容量/过期策略的 keyed store

pub mod error;
pub mod store;

pub use error::{AgentError, ReasoningError};
pub use store::KeyedStore;
