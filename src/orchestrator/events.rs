//! 编排过程事件：交给适配层渲染（终端、WebSocket、机器人等）

use serde::Serialize;
use serde_json::Value;

use super::schema::BaseOutput;
use crate::sandbox::ExecutionOutcome;

/// 状态机阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Base,
    ToolChoice,
    ToolExec,
    PostBase,
}

/// run 结束原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalReason {
    /// 推理给出 continue = false
    Completed,
    /// 达到最大迭代数被强制结束
    IterationCap,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    Status { message: String },
    /// BASE / POST_BASE 输出
    Response {
        stage: Stage,
        iteration: usize,
        output: BaseOutput,
    },
    /// 能力输出
    ToolResponse { capability: String, output: Value },
    /// 命令执行结果；command 为占位符形式
    Execution {
        command: String,
        outcome: ExecutionOutcome,
    },
    /// 等待外部批准；command 为占位符形式
    ApprovalRequest {
        command: String,
        reasoning: Option<String>,
    },
    Warning { message: String },
    Error { message: String },
    Complete {
        reason: TerminalReason,
        iterations: usize,
    },
}
