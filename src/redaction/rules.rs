//! 密钥匹配规则表
//!
//! 每条规则 = (正则, 类别, 捕获组, 占位符生成器)。规则按顺序应用：先匹配结构明确的（私钥块、连接串、sk-/ghp_/AKIA 前缀），
//! 再匹配 `password: xxx` 这类关键字形式。前面规则生成的占位符不会被后面的规则再次编码。

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

/// 密钥类别（决定占位符前缀，并出现在 report 的 type 字段中）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretCategory {
    Password,
    ApiKey,
    Token,
    PrivateKey,
    AwsKey,
}

impl SecretCategory {
    /// 占位符前缀，如 `{{PASSWORD_1}}` 中的 PASSWORD
    pub fn prefix(&self) -> &'static str {
        match self {
            SecretCategory::Password => "PASSWORD",
            SecretCategory::ApiKey => "APIKEY",
            SecretCategory::Token => "TOKEN",
            SecretCategory::PrivateKey => "PRIVATEKEY",
            SecretCategory::AwsKey => "AWSKEY",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            SecretCategory::Password => "password",
            SecretCategory::ApiKey => "API key",
            SecretCategory::Token => "access token",
            SecretCategory::PrivateKey => "private key",
            SecretCategory::AwsKey => "AWS access key",
        }
    }
}

/// 占位符生成器：(类别, 该类别内序号) -> 占位符
pub type TokenGenerator = fn(SecretCategory, usize) -> String;

/// 默认占位符格式：`{{PASSWORD_1}}`
pub fn placeholder_token(category: SecretCategory, seq: usize) -> String {
    format!("{{{{{}_{}}}}}", category.prefix(), seq)
}

/// 单条匹配规则
#[derive(Debug, Clone)]
pub struct MatchRule {
    pub name: &'static str,
    pub pattern: Regex,
    pub category: SecretCategory,
    /// 密钥所在捕获组；0 表示整个匹配
    pub secret_group: usize,
    pub generator: TokenGenerator,
}

impl MatchRule {
    pub fn new(
        name: &'static str,
        pattern: Regex,
        category: SecretCategory,
        secret_group: usize,
    ) -> Self {
        Self {
            name,
            pattern,
            category,
            secret_group,
            generator: placeholder_token,
        }
    }

    pub fn with_generator(mut self, generator: TokenGenerator) -> Self {
        self.generator = generator;
        self
    }
}

/// 任何形如 `{{XXX_1}}` / `{{P1}}` 的占位符样式 token
pub(crate) fn placeholder_like() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{[A-Z0-9_]+\}\}").expect("placeholder pattern"))
}

/// (name, pattern, category, group)
const BUILTIN: &[(&str, &str, SecretCategory, usize)] = &[
    (
        "private_key_block",
        r"(?s)-----BEGIN [A-Z ]*PRIVATE KEY-----.*?-----END [A-Z ]*PRIVATE KEY-----",
        SecretCategory::PrivateKey,
        0,
    ),
    (
        "url_credentials",
        r"\b[a-zA-Z][a-zA-Z0-9+.-]*://[^\s:/@]+:([^\s@/]+)@",
        SecretCategory::Password,
        1,
    ),
    ("openai_style_key", r"\bsk-[A-Za-z0-9_-]{16,}", SecretCategory::ApiKey, 0),
    ("github_token", r"\bgh[pousr]_[A-Za-z0-9]{30,}", SecretCategory::Token, 0),
    ("aws_access_key", r"\bAKIA[0-9A-Z]{16}\b", SecretCategory::AwsKey, 0),
    (
        "bearer_token",
        r"(?i)\bbearer\s+([A-Za-z0-9\-._~+/]+=*)",
        SecretCategory::Token,
        1,
    ),
    (
        "password_assignment",
        r"(?i)\b(?:password|passwd|pwd|pass)\b\s*[:=]\s*(\S+)",
        SecretCategory::Password,
        1,
    ),
    (
        "api_key_assignment",
        r"(?i)\b(?:api[_-]?key|access[_-]?key)\b\s*[:=]\s*(\S+)",
        SecretCategory::ApiKey,
        1,
    ),
    (
        "token_assignment",
        r"(?i)\b(?:token|secret|client[_-]?secret)\b\s*[:=]\s*(\S+)",
        SecretCategory::Token,
        1,
    ),
];

/// 内置规则表（正则只编译一次）
pub fn default_rules() -> Vec<MatchRule> {
    static RULES: OnceLock<Vec<MatchRule>> = OnceLock::new();
    RULES
        .get_or_init(|| {
            BUILTIN
                .iter()
                .map(|(name, pattern, category, group)| {
                    let re = Regex::new(pattern).expect("built-in secret pattern");
                    MatchRule::new(name, re, *category, *group)
                })
                .collect()
        })
        .clone()
}
