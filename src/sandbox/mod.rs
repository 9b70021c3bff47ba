//! 命令执行沙箱与审批
//!
//! ExecutionSandbox 在超时内运行一条已还原的命令并返回结构化结果；执行失败（非零退出、超时）
//! 不是错误，而是 status = error 的结果，交给下一轮推理解读。

pub mod approval;
pub mod shell;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use approval::{ApprovalGate, ApprovalVerdict, ChannelApprovalGate, PendingApproval};
pub use shell::ShellSandbox;

/// 禁止的子串（即使首词在白名单中也不允许）
pub const DEFAULT_FORBIDDEN: &[&str] = &[
    "rm -rf /",
    "rm -fr /",
    "mkfs",
    "dd if=",
    "> /dev/sd",
    "chmod 777 /",
    "chmod +s",
    "curl | sh",
    "wget -O- | sh",
    ":(){ :|:& };:",
    "shutdown",
    "reboot",
];

/// 待执行的命令
#[derive(Debug, Clone)]
pub struct CommandRequest {
    /// 已还原占位符的真实命令
    pub command: String,
    /// 仍含占位符的命令，只用于日志与审计
    pub display_command: String,
    pub reasoning: Option<String>,
    pub requires_approval: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct ExecOptions {
    pub auto_approve: bool,
    pub timeout: Duration,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            auto_approve: false,
            timeout: Duration::from_millis(30_000),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    Denied,
    Blocked,
    Error,
}

impl ExecutionStatus {
    /// success / error 需要下一轮推理解读结果；denied / blocked 不强制继续
    pub fn forces_continuation(&self) -> bool {
        matches!(self, ExecutionStatus::Success | ExecutionStatus::Error)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Success => "success",
            ExecutionStatus::Denied => "denied",
            ExecutionStatus::Blocked => "blocked",
            ExecutionStatus::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionOutcome {
    pub status: ExecutionStatus,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub message: String,
    pub execution_time_ms: u64,
}

impl ExecutionOutcome {
    pub fn new(status: ExecutionStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            stdout: String::new(),
            stderr: String::new(),
            exit_code: None,
            message: message.into(),
            execution_time_ms: 0,
        }
    }

    pub fn denied(message: impl Into<String>) -> Self {
        Self::new(ExecutionStatus::Denied, message)
    }

    pub fn blocked(message: impl Into<String>) -> Self {
        Self::new(ExecutionStatus::Blocked, message)
    }
}

#[async_trait]
pub trait ExecutionSandbox: Send + Sync {
    async fn run(&self, request: &CommandRequest, options: ExecOptions) -> ExecutionOutcome;
}
