//! 各阶段的结构化输出
//!
//! BASE / POST_BASE 共用 BaseOutput；TOOL_CHOICE 输出 ToolChoiceOutput。字段名为 camelCase，与推理 schema 一致。

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// BASE 阶段的三选一
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum BaseChoice {
    /// 直接回复
    Response,
    /// 给出代码
    Code,
    /// 执行一条终端命令
    TerminalCommand,
}

/// BASE / POST_BASE 输出
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BaseOutput {
    pub choice: BaseChoice,
    /// 是否需要专用能力
    #[serde(default)]
    pub tool: bool,
    /// 是否需要再跑一轮
    #[serde(rename = "continue", default)]
    pub should_continue: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// 需要引用密钥时使用占位符原文
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminal_command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_reasoning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires_approval: Option<bool>,
}

impl BaseOutput {
    /// 未给出 requiresApproval 时按需要批准处理
    pub fn needs_approval(&self) -> bool {
        self.requires_approval.unwrap_or(true)
    }
}

/// TOOL_CHOICE 输出：至多选一个能力 id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ToolChoiceOutput {
    /// 能力 id；不需要能力时为 null
    #[serde(default)]
    pub choice: Option<String>,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub missing_context: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_base_output_wire_format() {
        let out: BaseOutput = serde_json::from_value(json!({
            "choice": "terminalCommand",
            "terminalCommand": "ls {{P1}}",
            "requiresApproval": true
        }))
        .unwrap();
        assert_eq!(out.choice, BaseChoice::TerminalCommand);
        assert!(!out.tool);
        assert!(!out.should_continue);

        let back = serde_json::to_value(&out).unwrap();
        assert_eq!(back["continue"], false);
        assert_eq!(back["terminalCommand"], "ls {{P1}}");
        assert!(back.get("code").is_none());
    }

    #[test]
    fn test_unknown_choice_rejected() {
        let res: Result<BaseOutput, _> = serde_json::from_value(json!({ "choice": "dance" }));
        assert!(res.is_err());
    }
}
