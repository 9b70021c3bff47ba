//! 对话健康检查
//!
//! 在最近的交互中寻找几类问题：用户明确表达不满、交互过于密集、重复的 thinking step 请求、连续相同的回复。
//! 至少 3 条交互才检查。

use serde::Serialize;

use super::interactions::InteractionRecord;

const WINDOW: usize = 5;
const MIN_INTERACTIONS: usize = 3;
const RAPID_GAP_MS: i64 = 15_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthIssueKind {
    UserFrustration,
    MessageVolume,
    ThinkingStepLoop,
    ResponseLoop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthIssue {
    #[serde(rename = "type")]
    pub kind: HealthIssueKind,
    pub severity: Severity,
    pub message: String,
    pub detail: String,
    /// 仅 MESSAGE_VOLUME：平均间隔（秒）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_gap_secs: Option<i64>,
}

const FRUSTRATION_WORDS: &[&str] = &[
    "stop", "too many", "excessive", "spam", "enough", "reduce", "fewer", "less",
];

fn is_frustrated(text: &str) -> bool {
    let lower = text.to_lowercase();
    FRUSTRATION_WORDS.iter().any(|w| lower.contains(w))
}

/// 分析交互记录（按时间顺序），没有问题时返回空
pub fn analyze_health(interactions: &[InteractionRecord]) -> Vec<HealthIssue> {
    if interactions.len() < MIN_INTERACTIONS {
        return Vec::new();
    }
    let mut issues = Vec::new();
    let recent = &interactions[interactions.len().saturating_sub(WINDOW)..];

    let frustrated: Vec<&str> = recent
        .iter()
        .map(|r| r.request_text())
        .filter(|q| is_frustrated(q))
        .collect();
    if frustrated.len() >= 2 {
        issues.push(HealthIssue {
            kind: HealthIssueKind::UserFrustration,
            severity: Severity::High,
            message: format!(
                "User has expressed frustration about message volume or bot behavior {} times in last {} interactions",
                frustrated.len(),
                WINDOW
            ),
            detail: frustrated.join(" | "),
            average_gap_secs: None,
        });
    }

    if recent.len() > 2 {
        let gaps: Vec<i64> = recent
            .windows(2)
            .map(|w| (w[1].recorded_at - w[0].recorded_at).num_milliseconds())
            .collect();
        let avg = gaps.iter().sum::<i64>() / gaps.len() as i64;
        if avg < RAPID_GAP_MS {
            let avg_secs = (avg as f64 / 1000.0).round() as i64;
            issues.push(HealthIssue {
                kind: HealthIssueKind::MessageVolume,
                severity: Severity::High,
                message: format!(
                    "Detected rapid message generation ({}s average between interactions)",
                    avg_secs
                ),
                detail: "This may be from thinking step or continuous loops".to_string(),
                average_gap_secs: Some(avg_secs),
            });
        }
    }

    let thinking = recent
        .iter()
        .filter(|r| r.request_text().to_lowercase().contains("thinking step"))
        .count();
    if thinking >= 3 {
        issues.push(HealthIssue {
            kind: HealthIssueKind::ThinkingStepLoop,
            severity: Severity::Medium,
            message: "Thinking step is generating repetitive messages".to_string(),
            detail: format!(
                "{} thinking steps in last {} interactions - may be creating noise instead of clarity",
                thinking, WINDOW
            ),
            average_gap_secs: None,
        });
    }

    if interactions.len() >= 4 {
        let last = &interactions[interactions.len() - 2..];
        if last[0].response_text() == last[1].response_text() {
            issues.push(HealthIssue {
                kind: HealthIssueKind::ResponseLoop,
                severity: Severity::High,
                message: "Detected identical responses being generated repeatedly".to_string(),
                detail: "This suggests the agent is stuck in a loop".to_string(),
                average_gap_secs: None,
            });
        }
    }

    issues
}

/// 按优先级挑选给操作者的提示：不满 > 密集 > thinking step > 回复循环
pub fn reflection_message(issues: &[HealthIssue]) -> Option<String> {
    if issues.is_empty() {
        return None;
    }
    if !issues.iter().any(|i| i.severity == Severity::High) {
        return Some(
            "I've noticed some patterns in our conversation that might be worth addressing. Would you like me to adjust anything?"
                .to_string(),
        );
    }
    let find = |kind: HealthIssueKind| issues.iter().find(|i| i.kind == kind);

    if find(HealthIssueKind::UserFrustration).is_some() {
        return Some(
            "I recognize you've expressed frustration about message volume. Should I cut back and respond once per message?"
                .to_string(),
        );
    }
    if let Some(volume) = find(HealthIssueKind::MessageVolume) {
        return Some(format!(
            "I notice I'm generating responses very rapidly ({}s average between interactions). Would you prefer fewer follow-ups?",
            volume.average_gap_secs.unwrap_or_default()
        ));
    }
    if find(HealthIssueKind::ThinkingStepLoop).is_some() {
        return Some(
            "I see the thinking step is creating repetitive messages. It's not adding clarity, just volume. Should I turn it off?"
                .to_string(),
        );
    }
    if find(HealthIssueKind::ResponseLoop).is_some() {
        return Some(
            "I notice I'm stuck in a loop, repeating the same response. Let me break this pattern and try a different approach."
                .to_string(),
        );
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use serde_json::json;

    fn records(spec: &[(&str, &str, i64)]) -> Vec<InteractionRecord> {
        let base = Utc::now();
        spec.iter()
            .map(|(q, r, offset_secs)| {
                InteractionRecord::at(
                    base + Duration::seconds(*offset_secs),
                    json!({ "query": q }),
                    json!({ "response": r }),
                )
            })
            .collect()
    }

    #[test]
    fn test_too_few_interactions() {
        let recs = records(&[("stop", "a", 0), ("stop", "b", 1)]);
        assert!(analyze_health(&recs).is_empty());
    }

    #[test]
    fn test_frustration_takes_priority() {
        let recs = records(&[
            ("list files", "a", 0),
            ("please stop", "b", 2),
            ("too many messages", "c", 4),
        ]);
        let issues = analyze_health(&recs);
        assert!(issues.iter().any(|i| i.kind == HealthIssueKind::UserFrustration));
        assert!(issues.iter().any(|i| i.kind == HealthIssueKind::MessageVolume));
        let msg = reflection_message(&issues).unwrap();
        assert!(msg.contains("frustration"));
    }

    #[test]
    fn test_response_loop_detected() {
        let recs = records(&[
            ("a", "x", 0),
            ("b", "y", 60),
            ("c", "same", 120),
            ("d", "same", 180),
        ]);
        let issues = analyze_health(&recs);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].kind, HealthIssueKind::ResponseLoop);
        assert!(reflection_message(&issues).unwrap().contains("loop"));
    }

    #[test]
    fn test_thinking_steps_medium_only() {
        let recs = records(&[
            ("thinking step 1", "x", 0),
            ("thinking step 2", "y", 60),
            ("thinking step 3", "z", 120),
        ]);
        let issues = analyze_health(&recs);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, Severity::Medium);
        assert!(reflection_message(&issues)
            .unwrap()
            .starts_with("I've noticed some patterns"));
    }

    #[test]
    fn test_volume_reflection_reports_average_gap() {
        let recs = records(&[("a", "x", 0), ("b", "y", 4), ("c", "z", 8)]);
        let issues = analyze_health(&recs);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].average_gap_secs, Some(4));

        let msg = reflection_message(&issues).unwrap();
        assert_eq!(
            msg,
            "I notice I'm generating responses very rapidly (4s average between interactions). Would you prefer fewer follow-ups?"
        );
        assert!(!msg.contains(&issues[0].detail));

        let json = serde_json::to_value(&issues[0]).unwrap();
        assert_eq!(json["type"], "MESSAGE_VOLUME");
        assert_eq!(json["average_gap_secs"], 4);
    }

    #[test]
    fn test_healthy_conversation() {
        let recs = records(&[("a", "x", 0), ("b", "y", 60), ("c", "z", 120)]);
        assert!(analyze_health(&recs).is_empty());
        assert_eq!(reflection_message(&[]), None);
    }
}
