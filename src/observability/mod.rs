//! 可观测性：tracing 订阅器初始化
//!
//! 日志级别由 `RUST_LOG` 控制，未设置时为 info。命令审计以 JSON 行写在 `command_audit` 字段中。

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();
}
