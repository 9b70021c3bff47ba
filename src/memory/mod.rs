//! 记忆层：每个 identity 的交互记录（上下文来源）与对话健康检查

pub mod health;
pub mod interactions;

pub use health::{analyze_health, reflection_message, HealthIssue, HealthIssueKind, Severity};
pub use interactions::{ContextProvider, InteractionLog, InteractionRecord, InteractionStats};
