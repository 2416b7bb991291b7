/// 统一配置系统
///
/// 提供TOML/JSON配置文件、环境变量覆盖和配置验证
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::impl_default;

/// 绑定层配置错误
#[derive(Error, Debug)]
pub enum ConfigError {
    /// 文件读取错误
    #[error("Config file error: {0}")]
    FileError(#[from] std::io::Error),
    /// 解析错误
    #[error("Config parse error: {0}")]
    ParseError(String),
    /// 验证错误
    #[error("Config validation error: {0}")]
    ValidationError(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// 绑定层主配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinderConfig {
    /// 脚本侧存放宿主基类的全局对象名，脚本写作 `class X extends host.Node`
    #[serde(default = "default_namespace")]
    pub script_namespace: String,

    /// 是否允许在当前环境执行脚本。关闭时只编译元数据，实例退化为占位实例
    #[serde(default = "default_true")]
    pub script_execution_enabled: bool,

    /// 无法创建真实实例时是否退化为占位实例
    #[serde(default = "default_true")]
    pub placeholder_fallback: bool,

    /// `thread_enter` 时是否立即为该线程创建 Binder
    #[serde(default)]
    pub eager_thread_binders: bool,

    /// 引擎运行时限制（每个 Binder 独立应用）
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// 日志配置
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_namespace() -> String {
    "host".to_string()
}

fn default_true() -> bool {
    true
}

impl_default!(BinderConfig {
    script_namespace: default_namespace(),
    script_execution_enabled: true,
    placeholder_fallback: true,
    eager_thread_binders: false,
    runtime: RuntimeConfig::default(),
    logging: LoggingConfig::default(),
});

impl BinderConfig {
    /// 创建默认配置
    pub fn new() -> Self {
        Self::default()
    }

    /// 工具/编辑器环境：只解析元数据，不执行脚本
    pub fn tooling() -> Self {
        Self {
            script_execution_enabled: false,
            ..Self::default()
        }
    }

    /// 从TOML文件加载配置
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = fs::read_to_string(path).map_err(ConfigError::FileError)?;
        Self::from_toml_str(&content)
    }

    /// 从TOML字符串解析配置
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// 从JSON文件加载配置
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = fs::read_to_string(path).map_err(ConfigError::FileError)?;
        Self::from_json_str(&content)
    }

    /// 从JSON字符串解析配置
    pub fn from_json_str(content: &str) -> ConfigResult<Self> {
        serde_json::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// 保存为TOML文件
    pub fn save_toml<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        fs::write(path, content).map_err(ConfigError::FileError)
    }

    /// 从环境变量覆盖配置
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("SCRIPT_BINDER_MEMORY_LIMIT") {
            if let Ok(limit) = val.parse() {
                self.runtime.memory_limit = Some(limit);
            }
        }
        if let Ok(val) = env::var("SCRIPT_BINDER_MAX_STACK_SIZE") {
            if let Ok(size) = val.parse() {
                self.runtime.max_stack_size = Some(size);
            }
        }
        if let Ok(val) = env::var("SCRIPT_BINDER_NAMESPACE") {
            if !val.is_empty() {
                self.script_namespace = val;
            }
        }
        if let Ok(val) = env::var("SCRIPT_BINDER_EXECUTION") {
            self.script_execution_enabled = val.parse().unwrap_or(self.script_execution_enabled);
        }
        if let Ok(val) = env::var("SCRIPT_BINDER_LOG_LEVEL") {
            if let Some(level) = LogLevel::parse(&val) {
                self.logging.level = level;
            }
        }
    }

    /// 验证配置
    pub fn validate(&self) -> ConfigResult<()> {
        self.runtime.validate()?;

        let mut chars = self.script_namespace.chars();
        let valid_start = chars
            .next()
            .map(|c| c.is_ascii_alphabetic() || c == '_' || c == '$')
            .unwrap_or(false);
        if !valid_start || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$') {
            return Err(ConfigError::ValidationError(format!(
                "script_namespace '{}' is not a valid identifier",
                self.script_namespace
            )));
        }
        Ok(())
    }

    /// 自动查找并加载配置文件
    ///
    /// 按以下顺序查找：
    /// 1. ./script_binder.toml
    /// 2. ./script_binder.json
    /// 3. 使用默认配置
    pub fn load_or_default() -> Self {
        if let Ok(config) = Self::from_toml_file("script_binder.toml") {
            tracing::info!(target: "binder", "Loaded config from script_binder.toml");
            return config;
        }

        if let Ok(config) = Self::from_json_file("script_binder.json") {
            tracing::info!(target: "binder", "Loaded config from script_binder.json");
            return config;
        }

        tracing::info!(target: "binder", "Using default configuration");
        Self::default()
    }
}

/// 引擎运行时限制
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// 内存上限（字节），None 表示不限制
    #[serde(default)]
    pub memory_limit: Option<usize>,

    /// 最大栈大小（字节）
    #[serde(default)]
    pub max_stack_size: Option<usize>,

    /// GC 触发阈值（字节）
    #[serde(default)]
    pub gc_threshold: Option<usize>,
}

impl_default!(RuntimeConfig {
    memory_limit: None,
    max_stack_size: Some(1024 * 1024),
    gc_threshold: None,
});

impl RuntimeConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.memory_limit == Some(0) {
            return Err(ConfigError::ValidationError(
                "runtime.memory_limit must be greater than zero".to_string(),
            ));
        }
        if self.max_stack_size == Some(0) {
            return Err(ConfigError::ValidationError(
                "runtime.max_stack_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// 日志配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别
    pub level: LogLevel,

    /// 是否输出到文件
    pub log_to_file: bool,

    /// 日志文件路径
    pub log_file_path: String,

    /// 是否输出到控制台
    pub log_to_console: bool,
}

impl_default!(LoggingConfig {
    level: LogLevel::Info,
    log_to_file: false,
    log_file_path: "script_binder.log".to_string(),
    log_to_console: true,
});

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    /// 跟踪
    Trace,
    /// 调试
    Debug,
    /// 信息
    Info,
    /// 警告
    Warn,
    /// 错误
    Error,
}

impl LogLevel {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "trace" => Some(LogLevel::Trace),
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" | "warning" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }

    /// `EnvFilter` 可识别的指令
    pub fn as_directive(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}
