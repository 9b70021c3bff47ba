//! 编排层：推理抽象、阶段 schema、事件与状态机

pub mod events;
pub mod reasoner;
pub mod run;
pub mod schema;

pub use events::{RunEvent, Stage, TerminalReason};
pub use reasoner::{extract_json, query_typed, LlmReasoner, Reasoner, ScriptedReasoner};
pub use run::{opens_run, AgentTurn, OrchestrationRun, Orchestrator, OrchestratorConfig, RunScope};
pub use schema::{BaseChoice, BaseOutput, ToolChoiceOutput};
