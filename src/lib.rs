//! # Script Binder
//!
//! 以 QuickJS 为后端的脚本绑定层：宿主对象模型由 JavaScript 类驱动。
//!
//! ## Features
//!
//! - **Per-thread Binder**: 每个线程一个独立的 JS 上下文，实例只能在所属线程上访问
//! - **Class Descriptor Table**: 宿主类层次的只读描述，脚本类以它为基类
//! - **Placeholder Instance**: 不能执行脚本时（编辑器/工具环境）保留属性值
//! - **Hot Reload**: 失败安全的重载，可在迁移时保留实例状态
//!
//! ### Example
//!
//! ```ignore
//! use script_binder::{BinderConfig, HostObject, JavaScriptLanguage, ScriptLanguage};
//!
//! let language = JavaScriptLanguage::new(BinderConfig::default());
//! language.init()?;
//! let script = language.load_script("player.jsx", source)?;
//! let player = HostObject::new("Node2D");
//! player.set_script(Some(script))?;
//! player.call("ready", &[])?;
//! ```
//!
//! ## Modules
//!
//! - [`core`]: 错误类型与日志
//! - [`config`]: 配置
//! - [`classdb`]: 宿主类描述表
//! - [`binder`]: 线程 Binder 与注册表、绑定数据
//! - [`script`]: 脚本、实例、占位实例与重载
//! - [`host`]: 宿主对象
//! - [`language`]: 语言接口与 JavaScript 实现

/// 错误类型、日志初始化与辅助宏
pub mod core;
/// 配置加载
pub mod config;
/// 宿主类描述表
pub mod classdb;
/// 线程 Binder 与注册表
pub mod binder;
/// 脚本对象、实例与重载
pub mod script;
/// 宿主对象
pub mod host;
/// 语言接口
pub mod language;
/// 脚本文件监视
pub mod hot_reload;

pub use binder::{Binder, BinderHandle, BinderRegistry, BindingData, BindingToken, ClassHandle};
pub use classdb::{ClassDescriptor, ClassDescriptorTable, MethodInfo, PropertyInfo, SignalInfo, VariantType};
pub use config::BinderConfig;
pub use core::{BinderError, BinderResult, CompileError};
pub use host::{HostObject, InstanceSlot, ObjectId};
pub use hot_reload::ScriptWatcher;
pub use language::{
    JavaScriptLanguage, ScriptLanguage, SyntaxInfo, TemplateProvider, ValidationResult,
};
pub use script::{
    PlaceholderInstance, ReloadCoordinator, ReloadReport, Script, ScriptId, ScriptInstance,
    ScriptValue,
};
