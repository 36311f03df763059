//! 可观测性：tracing 订阅者初始化
//!
//! 日志写到 stderr，stdout 留给回答与实时追踪输出。默认级别 warn，可用 RUST_LOG 覆盖。

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub fn init() {
    init_with_default("warn");
}

/// 以给定默认过滤规则初始化；重复初始化时静默忽略
pub fn init_with_default(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init();
}
