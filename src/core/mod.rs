//! 核心模块
//!
//! 包含绑定层的基础设施：
//! - `error` - 错误类型定义
//! - `logging` - 日志系统初始化
//! - `macros` - 辅助宏

pub mod error;
pub mod logging;
#[macro_use]
pub mod macros;

// 重新导出错误类型
pub use error::{BinderError, BinderResult, CompileError};
pub use logging::init_logging;
