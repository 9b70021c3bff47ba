//! Lumen - 基础设施运维对话 Agent
//!
//! 入口：控制台适配层。从标准输入读消息（identity 固定为 console），事件打印到标准输出。
//! 待审批命令用 `yes` / `no` 回复，`autoapprove on|off` 切换自动批准，`quit` 退出。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use lumen::config::load_config;
use lumen::orchestrator::RunEvent;
use lumen::sandbox::{ApprovalVerdict, PendingApproval};
use lumen::{observability, Agent, AgentEvent};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Mutex;

const CONSOLE_IDENTITY: &str = "console";

fn render(event: &AgentEvent) -> String {
    match &event.event {
        RunEvent::Status { message } => format!("[status] {}", message),
        RunEvent::Response { stage, output, .. } => {
            let body = output
                .response
                .as_deref()
                .or(output.code.as_deref())
                .or(output.terminal_command.as_deref())
                .unwrap_or("");
            format!("[{:?}] {}", stage, body)
        }
        RunEvent::ToolResponse { capability, output } => {
            format!("[tool:{}] {}", capability, output)
        }
        RunEvent::Execution { command, outcome } => format!(
            "[exec] {} -> {} ({})\n{}{}",
            command,
            outcome.status.as_str(),
            outcome.message,
            outcome.stdout,
            outcome.stderr
        ),
        RunEvent::ApprovalRequest { command, reasoning } => format!(
            "[approval] {}\n  reason: {}\n  reply yes / no",
            command,
            reasoning.as_deref().unwrap_or("-")
        ),
        RunEvent::Warning { message } => format!("[warning] {}", message),
        RunEvent::Error { message } => format!("[error] {}", message),
        RunEvent::Complete { reason, iterations } => {
            format!("[done] {:?} after {} iteration(s)", reason, iterations)
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = load_config(config_path).context("Failed to load config")?;
    let json_output = std::env::var("LUMEN_JSON_EVENTS").is_ok();

    let (agent, mut events_rx, mut pending_rx) = Agent::from_config(config);

    tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            if json_output {
                match serde_json::to_string(&event) {
                    Ok(line) => println!("{}", line),
                    Err(e) => tracing::warn!(error = %e, "failed to serialize event"),
                }
            } else {
                println!("{}", render(&event));
            }
        }
    });

    // 只保留最新的待审批请求；被替换的旧请求随 drop 视为拒绝
    let pending: Arc<Mutex<Option<PendingApproval>>> = Arc::new(Mutex::new(None));
    {
        let pending = pending.clone();
        tokio::spawn(async move {
            while let Some(request) = pending_rx.recv().await {
                *pending.lock().await = Some(request);
            }
        });
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match line {
            "quit" | "exit" => break,
            "yes" | "no" => {
                let verdict = if line == "yes" {
                    ApprovalVerdict::Approved
                } else {
                    ApprovalVerdict::Denied
                };
                match pending.lock().await.take() {
                    Some(request) => request.respond(verdict),
                    None => println!("[status] no command awaiting approval"),
                }
            }
            "autoapprove on" | "autoapprove off" => {
                let enabled = line.ends_with("on");
                agent.set_auto_approve(CONSOLE_IDENTITY, enabled).await;
                println!("[status] auto-approve {}", if enabled { "on" } else { "off" });
            }
            text => {
                if !agent.submit(CONSOLE_IDENTITY, text).await {
                    println!("[status] queued for the next batch");
                }
            }
        }
    }

    agent.clear(CONSOLE_IDENTITY).await;
    Ok(())
}
