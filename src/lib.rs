//! Lumen - 基础设施运维对话 Agent
//!
//! 模块划分：
//! - **agent**: 无头 Agent 运行时，把缓冲、脱敏与编排接起来（供控制台 / 机器人等适配层调用）
//! - **buffer**: 按 identity 的防抖合并缓冲，以及固定周期的批量轮询器
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型与有界 keyed store
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）
//! - **memory**: 对话消息、每个 identity 的交互记录与健康检查
//! - **observability**: tracing 初始化
//! - **orchestrator**: BASE → TOOL_CHOICE → TOOL_EXEC → POST_BASE 状态机
//! - **redaction**: 密钥脱敏与占位符往返
//! - **sandbox**: 命令执行沙箱与审批
//! - **tools**: 能力注册表与内置能力

pub mod agent;
pub mod buffer;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod orchestrator;
pub mod redaction;
pub mod sandbox;
pub mod tools;

pub use agent::{Agent, AgentEvent};
