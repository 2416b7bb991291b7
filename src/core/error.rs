//! 统一错误处理模块
//!
//! 绑定层范围内的统一错误类型定义。
//!
//! ## 错误传播策略
//!
//! - **编译错误** (`CompileError`): 总是在本地恢复，以结构化结果返回，不修改已有状态
//! - **运行时错误** (线程亲和性、绑定类型不匹配): 返回给直接调用者，不吞掉，也不终止进程
//! - **上下文不可用** (`ContextUnavailable`): 由调用方退化为占位实例处理

use std::fmt;
use std::thread::ThreadId;

use thiserror::Error;

use crate::config::ConfigError;
use crate::host::ObjectId;

/// 脚本编译错误
///
/// 行号和列号从 1 开始，相对于脚本源码本身。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub struct CompileError {
    /// 脚本路径（可能为空）
    pub path: String,
    /// 出错行
    pub line: u32,
    /// 出错列
    pub column: u32,
    /// 引擎给出的错误信息
    pub message: String,
}

impl CompileError {
    pub fn new(path: impl Into<String>, line: u32, column: u32, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            line,
            column,
            message: message.into(),
        }
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}:{}: {}", self.line, self.column, self.message)
        } else {
            write!(f, "{}:{}:{}: {}", self.path, self.line, self.column, self.message)
        }
    }
}

/// 绑定层核心错误类型
#[derive(Error, Debug)]
pub enum BinderError {
    #[error("Script compilation error: {0}")]
    Compile(#[from] CompileError),

    #[error("Reload failed, previous class kept: {0}")]
    ReloadFailure(CompileError),

    #[error("Thread affinity violation: instance belongs to thread {owner:?}, called from {caller:?}")]
    ThreadAffinityViolation { owner: ThreadId, caller: ThreadId },

    #[error("Binding mismatch: script extends '{expected}' but host object is a '{actual}'")]
    BindingMismatch { expected: String, actual: String },

    #[error("Script engine context unavailable: {0}")]
    ContextUnavailable(String),

    #[error("Script language context is gone")]
    ContextGone,

    #[error("Script cannot be instantiated: {0}")]
    InvalidScript(String),

    #[error("Host object {0} already has an instance of this script")]
    AlreadyBound(ObjectId),

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Script runtime error: {0}")]
    Runtime(String),

    #[error("Host object has been freed")]
    HostGone,

    #[error("Invalid class registration: {0}")]
    ClassRegistration(String),

    #[error("Invalid bytecode blob: {0}")]
    InvalidBytecode(String),

    #[error("Engine error: {0}")]
    Engine(String),

    #[error("Value conversion error: {0}")]
    Conversion(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Watcher error: {0}")]
    Watcher(#[from] notify::Error),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl From<rquickjs::Error> for BinderError {
    fn from(err: rquickjs::Error) -> Self {
        BinderError::Engine(err.to_string())
    }
}

impl BinderError {
    /// 是否应当退化为占位实例
    pub fn is_context_unavailable(&self) -> bool {
        matches!(self, BinderError::ContextUnavailable(_))
    }

    /// 取出编译错误（编译失败或重载失败）
    pub fn compile_error(&self) -> Option<&CompileError> {
        match self {
            BinderError::Compile(err) | BinderError::ReloadFailure(err) => Some(err),
            _ => None,
        }
    }
}

/// 绑定层结果类型别名
pub type BinderResult<T> = Result<T, BinderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion() {
        let compile_err = CompileError::new("res://player.jsx", 3, 7, "unexpected token");
        let binder_err: BinderError = compile_err.clone().into();
        assert!(matches!(binder_err, BinderError::Compile(_)));
        assert_eq!(binder_err.compile_error(), Some(&compile_err));
    }

    #[test]
    fn test_error_display() {
        let err = CompileError::new("res://player.jsx", 3, 7, "unexpected token");
        assert_eq!(err.to_string(), "res://player.jsx:3:7: unexpected token");

        let err = CompileError::new("", 1, 1, "expecting '}'");
        assert_eq!(err.to_string(), "1:1: expecting '}'");

        assert_eq!(
            BinderError::ContextGone.to_string(),
            "Script language context is gone"
        );
    }

    #[test]
    fn test_context_unavailable_detection() {
        assert!(BinderError::ContextUnavailable("tooling".into()).is_context_unavailable());
        assert!(!BinderError::ContextGone.is_context_unavailable());
    }
}
