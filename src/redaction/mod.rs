//! 密钥脱敏：推理前把密钥替换为占位符，执行前再还原

pub mod redactor;
pub mod rules;

pub use redactor::{PlaceholderInfo, RedactionReport, SecretRedactor, UnmatchedPolicy};
pub use rules::{default_rules, placeholder_token, MatchRule, SecretCategory, TokenGenerator};
