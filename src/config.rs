//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `LUMEN__*` 覆盖（双下划线表示嵌套，如 `LUMEN__BUFFER__DEBOUNCE_MS=1500`）。

use std::path::PathBuf;

use serde::Deserialize;

use crate::redaction::UnmatchedPolicy;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub buffer: BufferSection,
    pub redaction: RedactionSection,
    pub orchestration: OrchestrationSection,
    pub sandbox: SandboxSection,
}

/// [app] 段：应用名、上下文保留条数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 每个 identity 的交互记录保留条数（超出后丢弃最旧的）
    pub max_context_interactions: usize,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            max_context_interactions: 21,
        }
    }
}

/// [llm] 段：后端选择
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 后端：deepseek / openai / mock；实际选择还取决于环境中的 API Key
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "deepseek".to_string(),
            model: "deepseek-chat".to_string(),
            base_url: None,
        }
    }
}

/// [buffer] 段：防抖窗口、轮询周期、去重容量、identity 表容量与空闲过期
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BufferSection {
    pub debounce_ms: u64,
    pub poll_interval_ms: u64,
    pub dedup_capacity: usize,
    pub max_identities: usize,
    pub idle_expiry_secs: u64,
}

impl Default for BufferSection {
    fn default() -> Self {
        Self {
            debounce_ms: 3000,
            poll_interval_ms: 3000,
            dedup_capacity: 1000,
            max_identities: 10_000,
            idle_expiry_secs: 3600,
        }
    }
}

/// [redaction] 段：疑似敏感但未命中规则的文本如何处理
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RedactionSection {
    pub unmatched_policy: UnmatchedPolicy,
}

/// [orchestration] 段：最大迭代轮数、是否自动批准命令、命令超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrchestrationSection {
    pub max_iterations: usize,
    pub auto_approve: bool,
    pub command_timeout_ms: u64,
}

impl Default for OrchestrationSection {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            auto_approve: false,
            command_timeout_ms: 30_000,
        }
    }
}

/// [sandbox] 段：命令白名单（仅首词，空表示不限制）与禁止子串
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SandboxSection {
    pub allowed_commands: Vec<String>,
    pub forbidden_patterns: Vec<String>,
}

impl Default for SandboxSection {
    fn default() -> Self {
        Self {
            allowed_commands: Vec::new(),
            forbidden_patterns: crate::sandbox::DEFAULT_FORBIDDEN
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 LUMEN__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 LUMEN__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("LUMEN")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
