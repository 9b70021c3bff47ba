//! Shell 沙箱：禁止子串 + 可选首词白名单，sh -c 执行，带超时与审计日志

use std::collections::HashSet;
use std::time::Instant;

use async_trait::async_trait;
use tokio::process::Command;

use super::{CommandRequest, ExecOptions, ExecutionOutcome, ExecutionSandbox, ExecutionStatus};
use crate::config::SandboxSection;

pub struct ShellSandbox {
    /// 为空表示不限制首词
    allowed_commands: HashSet<String>,
    forbidden: Vec<String>,
}

impl ShellSandbox {
    pub fn new(allowed_commands: Vec<String>, forbidden: Vec<String>) -> Self {
        Self {
            allowed_commands: allowed_commands
                .into_iter()
                .map(|s| s.to_lowercase())
                .collect(),
            forbidden: forbidden.into_iter().map(|s| s.to_lowercase()).collect(),
        }
    }

    pub fn from_config(cfg: &SandboxSection) -> Self {
        Self::new(cfg.allowed_commands.clone(), cfg.forbidden_patterns.clone())
    }

    fn check(&self, raw: &str) -> Result<(), String> {
        let lower = raw.to_lowercase();
        if let Some(pattern) = self.forbidden.iter().find(|p| lower.contains(p.as_str())) {
            return Err(format!("Forbidden pattern: {}", pattern));
        }
        let name = lower.split_whitespace().next().unwrap_or("");
        if name.is_empty() {
            return Err("Empty command".to_string());
        }
        if self.allowed_commands.is_empty() || self.allowed_commands.contains(name) {
            Ok(())
        } else {
            Err(format!("Command '{}' not in allowlist", name))
        }
    }

    async fn execute(&self, command: &str, options: ExecOptions) -> ExecutionOutcome {
        let mut cmd = if cfg!(target_os = "windows") {
            let mut c = Command::new("cmd");
            c.args(["/C", command]);
            c
        } else {
            let mut c = Command::new("sh");
            c.args(["-c", command]);
            c
        };
        cmd.kill_on_drop(true);

        let output = match tokio::time::timeout(options.timeout, cmd.output()).await {
            Err(_) => {
                return ExecutionOutcome::new(
                    ExecutionStatus::Error,
                    format!("Command timed out after {}ms", options.timeout.as_millis()),
                )
            }
            Ok(Err(e)) => {
                return ExecutionOutcome::new(
                    ExecutionStatus::Error,
                    format!("Execution failed: {}", e),
                )
            }
            Ok(Ok(output)) => output,
        };

        let success = output.status.success();
        ExecutionOutcome {
            status: if success {
                ExecutionStatus::Success
            } else {
                ExecutionStatus::Error
            },
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code(),
            message: if success {
                "Command executed successfully".to_string()
            } else {
                format!("Command exited with {}", output.status)
            },
            execution_time_ms: 0,
        }
    }
}

#[async_trait]
impl ExecutionSandbox for ShellSandbox {
    async fn run(&self, request: &CommandRequest, options: ExecOptions) -> ExecutionOutcome {
        let start = Instant::now();
        let command = request.command.trim();

        let mut outcome = match self.check(command) {
            Err(reason) => ExecutionOutcome::blocked(reason),
            Ok(()) if request.requires_approval && !options.auto_approve => {
                ExecutionOutcome::denied("Command requires approval")
            }
            Ok(()) => self.execute(command, options).await,
        };
        outcome.execution_time_ms = start.elapsed().as_millis() as u64;

        let audit = serde_json::json!({
            "event": "command_audit",
            "status": outcome.status.as_str(),
            "exit_code": outcome.exit_code,
            "duration_ms": outcome.execution_time_ms,
            "command_preview": preview(&request.display_command),
        });
        tracing::info!(audit = %audit.to_string(), "command");

        outcome
    }
}

fn preview(s: &str) -> String {
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn request(command: &str, requires_approval: bool) -> CommandRequest {
        CommandRequest {
            command: command.to_string(),
            display_command: command.to_string(),
            reasoning: None,
            requires_approval,
        }
    }

    fn auto() -> ExecOptions {
        ExecOptions {
            auto_approve: true,
            timeout: Duration::from_secs(5),
        }
    }

    fn sandbox() -> ShellSandbox {
        ShellSandbox::from_config(&SandboxSection::default())
    }

    #[tokio::test]
    async fn test_forbidden_pattern_is_blocked() {
        let out = sandbox().run(&request("rm -rf / --no-preserve-root", false), auto()).await;
        assert_eq!(out.status, ExecutionStatus::Blocked);
        assert!(out.message.contains("Forbidden"));
    }

    #[tokio::test]
    async fn test_allowlist_miss_is_blocked() {
        let sb = ShellSandbox::new(vec!["ls".into()], vec![]);
        let out = sb.run(&request("cat /etc/hostname", false), auto()).await;
        assert_eq!(out.status, ExecutionStatus::Blocked);
    }

    #[tokio::test]
    async fn test_requires_approval_without_auto_approve_is_denied() {
        let opts = ExecOptions {
            auto_approve: false,
            ..auto()
        };
        let out = sandbox().run(&request("echo hi", true), opts).await;
        assert_eq!(out.status, ExecutionStatus::Denied);
        assert!(!out.status.forces_continuation());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_success_and_failure_outcomes() {
        let out = sandbox().run(&request("echo hello", false), auto()).await;
        assert_eq!(out.status, ExecutionStatus::Success);
        assert_eq!(out.stdout.trim(), "hello");
        assert_eq!(out.exit_code, Some(0));

        let out = sandbox().run(&request("exit 3", false), auto()).await;
        assert_eq!(out.status, ExecutionStatus::Error);
        assert_eq!(out.exit_code, Some(3));
        assert!(out.status.forces_continuation());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_is_error_outcome() {
        let opts = ExecOptions {
            auto_approve: true,
            timeout: Duration::from_millis(100),
        };
        let out = sandbox().run(&request("sleep 5", false), opts).await;
        assert_eq!(out.status, ExecutionStatus::Error);
        assert!(out.message.contains("timed out"));
    }
}
