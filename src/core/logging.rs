//! 日志系统初始化
//!
//! 基于 tracing 框架。`RUST_LOG` 环境变量优先于配置中的日志级别。

use std::fs::OpenOptions;
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// 初始化日志系统
///
/// 重复调用是安全的：已有全局 subscriber 时直接返回 `false`。
pub fn init_logging(config: &LoggingConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_directive()));

    let installed = if config.log_to_file {
        match OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.log_file_path)
        {
            Ok(file) => tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
                .is_ok(),
            Err(err) => {
                eprintln!(
                    "Failed to open log file {}: {}, falling back to stderr",
                    config.log_file_path, err
                );
                tracing_subscriber::fmt()
                    .with_env_filter(filter)
                    .try_init()
                    .is_ok()
            }
        }
    } else if config.log_to_console {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init()
            .is_ok()
    } else {
        false
    };

    if installed {
        tracing::info!(target: "binder", "Logging initialized at level {:?}", config.level);
    }
    installed
}
