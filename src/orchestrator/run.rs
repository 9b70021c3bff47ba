//! 编排状态机
//!
//! BASE →（terminalCommand 时执行命令）→（tool = true 时 TOOL_CHOICE → TOOL_EXEC → POST_BASE）→ 继续或 DONE。
//!
//! - 每个阶段的请求/响应都先写入 ContextProvider，下一阶段再读取 snapshot；状态机本身不保存跨轮状态
//! - 命令执行结果 success / error 强制继续一轮，让模型解读结果；denied / blocked 不强制
//! - 推理输出不符合 schema 即中止 run，不重试
//! - 达到 max_iterations 时强制结束，以 IterationCap 区别于正常完成

use std::sync::Arc;
use std::time::Duration;

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use super::events::{RunEvent, Stage, TerminalReason};
use super::reasoner::{query_typed, Reasoner};
use super::schema::{BaseChoice, BaseOutput, ToolChoiceOutput};
use crate::config::OrchestrationSection;
use crate::core::AgentError;
use crate::memory::ContextProvider;
use crate::redaction::SecretRedactor;
use crate::sandbox::{
    ApprovalGate, ApprovalVerdict, CommandRequest, ExecOptions, ExecutionOutcome, ExecutionSandbox,
};
use crate::tools::CapabilityRegistry;

const CONTINUE_PROMPT: &str =
    "Continue processing. Review the context from previous interactions and respond accordingly.";
const POST_TOOL_PROMPT: &str = "Process and respond based on the tool execution results";

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub max_iterations: usize,
    pub command_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            command_timeout: Duration::from_millis(30_000),
        }
    }
}

impl From<&OrchestrationSection> for OrchestratorConfig {
    fn from(cfg: &OrchestrationSection) -> Self {
        Self {
            max_iterations: cfg.max_iterations.max(1),
            command_timeout: Duration::from_millis(cfg.command_timeout_ms),
        }
    }
}

/// 一次 run 的状态；run 结束后返回给调用方
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestrationRun {
    /// 日志关联用
    pub run_id: String,
    pub identity: String,
    pub max_iterations: usize,
    pub current_iteration: usize,
    pub continuation: bool,
    pub terminal_reason: Option<TerminalReason>,
}

impl OrchestrationRun {
    fn new(identity: &str, max_iterations: usize) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            identity: identity.to_string(),
            max_iterations,
            current_iteration: 0,
            continuation: true,
            terminal_reason: None,
        }
    }
}

/// 单个阶段的记录
#[derive(Debug, Clone)]
pub struct AgentTurn {
    pub stage: Stage,
    pub query: String,
    pub context_snapshot: String,
    pub output: Value,
    pub success: bool,
}

impl AgentTurn {
    fn request(&self, extra: &Value) -> Value {
        let mut request = json!({ "stage": self.stage, "query": self.query });
        if let (Some(obj), Some(extra)) = (request.as_object_mut(), extra.as_object()) {
            for (k, v) in extra {
                obj.insert(k.clone(), v.clone());
            }
        }
        request
    }
}

/// 该记录是否为某个 run 的首个 BASE 阶段（即一次用户请求）
pub fn opens_run(request: &Value) -> bool {
    request["stage"] == json!(Stage::Base) && request["iteration"] == json!(1)
}

/// 一次 run 借用的外部状态：该 run 的密钥作用域、上下文来源、审批设置、事件通道
pub struct RunScope<'a> {
    pub identity: &'a str,
    pub redactor: &'a SecretRedactor,
    pub context: &'a dyn ContextProvider,
    pub auto_approve: bool,
    pub events: Option<&'a mpsc::UnboundedSender<RunEvent>>,
}

impl<'a> RunScope<'a> {
    pub fn new(
        identity: &'a str,
        redactor: &'a SecretRedactor,
        context: &'a dyn ContextProvider,
    ) -> Self {
        Self {
            identity,
            redactor,
            context,
            auto_approve: false,
            events: None,
        }
    }

    pub fn with_auto_approve(mut self, auto_approve: bool) -> Self {
        self.auto_approve = auto_approve;
        self
    }

    pub fn with_events(mut self, tx: &'a mpsc::UnboundedSender<RunEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    fn emit(&self, event: RunEvent) {
        if let Some(tx) = self.events {
            let _ = tx.send(event);
        }
    }
}

/// 编排器：持有推理、能力注册表、沙箱与审批门，可被多个 identity 共享
pub struct Orchestrator {
    reasoner: Arc<dyn Reasoner>,
    capabilities: Arc<CapabilityRegistry>,
    sandbox: Arc<dyn ExecutionSandbox>,
    approvals: Arc<dyn ApprovalGate>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        reasoner: Arc<dyn Reasoner>,
        capabilities: Arc<CapabilityRegistry>,
        sandbox: Arc<dyn ExecutionSandbox>,
        approvals: Arc<dyn ApprovalGate>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            reasoner,
            capabilities,
            sandbox,
            approvals,
            config,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// 对一条已脱敏的请求跑完整个状态机
    pub async fn run(
        &self,
        redacted_query: &str,
        scope: &RunScope<'_>,
    ) -> Result<OrchestrationRun, AgentError> {
        let mut run = OrchestrationRun::new(scope.identity, self.config.max_iterations);

        if scope.redactor.has_secrets() {
            let count = scope.redactor.cumulative_report().secrets_protected;
            tracing::info!(run_id = %run.run_id, identity = %scope.identity, count, "secrets protected for run");
            scope.emit(RunEvent::Status {
                message: format!("{} secret(s) protected", count),
            });
        }

        match self.drive(&mut run, redacted_query, scope).await {
            Ok(()) => {
                let reason = run.terminal_reason.unwrap_or(TerminalReason::Completed);
                tracing::info!(
                    run_id = %run.run_id,
                    identity = %scope.identity,
                    iterations = run.current_iteration,
                    reason = ?reason,
                    "run finished"
                );
                scope.emit(RunEvent::Complete {
                    reason,
                    iterations: run.current_iteration,
                });
                Ok(run)
            }
            Err(e) => {
                tracing::error!(run_id = %run.run_id, identity = %scope.identity, error = %e, "run aborted");
                scope.emit(RunEvent::Error {
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn drive(
        &self,
        run: &mut OrchestrationRun,
        query: &str,
        scope: &RunScope<'_>,
    ) -> Result<(), AgentError> {
        while run.continuation && run.current_iteration < run.max_iterations {
            run.current_iteration += 1;
            let iteration = run.current_iteration;
            let prompt = if iteration == 1 {
                query.to_string()
            } else {
                format!("{}\n\nOriginal request: {}", CONTINUE_PROMPT, query)
            };

            scope.emit(RunEvent::Status {
                message: "Processing...".to_string(),
            });
            let base: BaseOutput = self
                .reason(Stage::Base, &prompt, scope, json!({ "iteration": iteration }))
                .await?;
            scope.emit(RunEvent::Response {
                stage: Stage::Base,
                iteration,
                output: base.clone(),
            });

            let mut forced = false;
            if base.choice == BaseChoice::TerminalCommand {
                match base.terminal_command.as_deref().map(str::trim) {
                    Some(command) if !command.is_empty() => {
                        let outcome = self.execute_command(&base, command, scope).await;
                        forced = outcome.status.forces_continuation();
                    }
                    _ => {
                        tracing::warn!(identity = %scope.identity, "terminalCommand chosen without a command");
                        scope.emit(RunEvent::Warning {
                            message: "terminalCommand chosen without a command".to_string(),
                        });
                    }
                }
            }

            let continuation = if base.tool {
                self.tool_phase(query, iteration, scope).await?.should_continue
            } else {
                base.should_continue
            };
            run.continuation = continuation || forced;
        }

        if run.continuation {
            tracing::warn!(
                run_id = %run.run_id,
                identity = %scope.identity,
                max = run.max_iterations,
                "max iterations reached"
            );
            scope.emit(RunEvent::Warning {
                message: "Max iterations reached".to_string(),
            });
            run.terminal_reason = Some(TerminalReason::IterationCap);
        } else {
            run.terminal_reason = Some(TerminalReason::Completed);
        }
        Ok(())
    }

    /// TOOL_CHOICE →（已注册的 id）TOOL_EXEC → POST_BASE；返回 POST_BASE 输出
    async fn tool_phase(
        &self,
        query: &str,
        iteration: usize,
        scope: &RunScope<'_>,
    ) -> Result<BaseOutput, AgentError> {
        scope.emit(RunEvent::Status {
            message: "Selecting tool...".to_string(),
        });
        let list = self
            .capabilities
            .catalog()
            .iter()
            .map(|entry| {
                format!(
                    "- {}: {}\n  output schema: {}",
                    entry.id, entry.description, entry.output_schema
                )
            })
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "Based on the user's need, which specialized tool should be used?\n\nAvailable tools:\n{}\n\nUser query: {}",
            list, query
        );
        let choice: ToolChoiceOutput = self
            .reason(
                Stage::ToolChoice,
                &prompt,
                scope,
                json!({ "availableTools": self.capabilities.ids() }),
            )
            .await?;

        let chosen = choice
            .choice
            .as_deref()
            .and_then(|id| self.capabilities.get(id).map(|c| (id, c)));
        match chosen {
            Some((id, capability)) => {
                scope.emit(RunEvent::Status {
                    message: format!("Using {} tool...", id),
                });
                let context = self.context_for(scope).await;
                let result = capability
                    .invoke(self.reasoner.as_ref(), query, &context)
                    .await;
                let turn = AgentTurn {
                    stage: Stage::ToolExec,
                    query: query.to_string(),
                    context_snapshot: context,
                    output: match &result {
                        Ok(v) => v.clone(),
                        Err(e) => json!({ "error": e.to_string() }),
                    },
                    success: result.is_ok(),
                };
                scope
                    .context
                    .record(&turn.request(&json!({ "tool": id })), &turn.output)
                    .await;
                let output = result.map_err(|e| AgentError::Capability(format!("{}: {}", id, e)))?;
                scope.emit(RunEvent::ToolResponse {
                    capability: id.to_string(),
                    output,
                });
            }
            None => {
                if let Some(id) = choice.choice.as_deref() {
                    tracing::warn!(identity = %scope.identity, capability = %id, "unknown capability chosen, skipping");
                }
            }
        }

        let post: BaseOutput = self
            .reason(Stage::PostBase, POST_TOOL_PROMPT, scope, Value::Null)
            .await?;
        scope.emit(RunEvent::Response {
            stage: Stage::PostBase,
            iteration,
            output: post.clone(),
        });
        Ok(post)
    }

    /// 还原占位符、按需审批、交给沙箱执行；结果在写入上下文前重新遮蔽密钥
    async fn execute_command(
        &self,
        base: &BaseOutput,
        command: &str,
        scope: &RunScope<'_>,
    ) -> ExecutionOutcome {
        let needs_approval = base.needs_approval();
        let reasoning = base.command_reasoning.as_deref();

        let mut outcome = if needs_approval && !scope.auto_approve {
            scope.emit(RunEvent::ApprovalRequest {
                command: command.to_string(),
                reasoning: reasoning.map(String::from),
            });
            match self
                .approvals
                .request_approval(scope.identity, command, reasoning)
                .await
            {
                ApprovalVerdict::Approved => None,
                ApprovalVerdict::Denied => {
                    tracing::info!(identity = %scope.identity, "command denied by operator");
                    Some(ExecutionOutcome::denied("Command denied by operator"))
                }
            }
        } else {
            None
        };

        if outcome.is_none() {
            scope.emit(RunEvent::Status {
                message: "Executing command...".to_string(),
            });
            let request = CommandRequest {
                command: scope.redactor.substitute(command),
                display_command: command.to_string(),
                reasoning: reasoning.map(String::from),
                requires_approval: needs_approval,
            };
            let options = ExecOptions {
                auto_approve: true,
                timeout: self.config.command_timeout,
            };
            outcome = Some(self.sandbox.run(&request, options).await);
        }
        let mut outcome = outcome.unwrap_or_else(|| ExecutionOutcome::denied("Command not executed"));

        outcome.stdout = scope.redactor.mask(&outcome.stdout);
        outcome.stderr = scope.redactor.mask(&outcome.stderr);
        outcome.message = scope.redactor.mask(&outcome.message);

        let response = serde_json::to_value(&outcome).unwrap_or(Value::Null);
        scope
            .context
            .record(
                &json!({ "query": "Terminal execution", "command": command }),
                &response,
            )
            .await;
        scope.emit(RunEvent::Execution {
            command: command.to_string(),
            outcome: outcome.clone(),
        });
        outcome
    }

    /// 一次阶段推理：读取上下文、调用、记录（失败也记录），返回解码后的输出
    async fn reason<T>(
        &self,
        stage: Stage,
        prompt: &str,
        scope: &RunScope<'_>,
        extra: Value,
    ) -> Result<T, AgentError>
    where
        T: DeserializeOwned + JsonSchema + Serialize + Send,
    {
        let context = self.context_for(scope).await;
        let result: Result<T, _> = query_typed(self.reasoner.as_ref(), prompt, &context).await;

        let turn = AgentTurn {
            stage,
            query: prompt.to_string(),
            context_snapshot: context,
            output: match &result {
                Ok(out) => serde_json::to_value(out).unwrap_or(Value::Null),
                Err(e) => json!({ "error": e.to_string() }),
            },
            success: result.is_ok(),
        };
        tracing::debug!(
            identity = %scope.identity,
            stage = ?turn.stage,
            success = turn.success,
            context_len = turn.context_snapshot.len(),
            "stage completed"
        );
        scope
            .context
            .record(&turn.request(&extra), &turn.output)
            .await;

        Ok(result?)
    }

    /// 上下文 snapshot，有密钥时附加安全说明
    async fn context_for(&self, scope: &RunScope<'_>) -> String {
        let snapshot = scope.context.snapshot().await;
        let security = scope.redactor.security_context();
        match (snapshot.is_empty(), security.is_empty()) {
            (_, true) => snapshot,
            (true, false) => security,
            (false, false) => format!("{}\n\n{}", snapshot, security),
        }
    }
}
