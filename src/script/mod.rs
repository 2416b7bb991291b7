//! 脚本对象与实例
//!
//! - [`Script`]：一份脚本资源及其编译状态
//! - [`ScriptInstance`]：宿主对象在某个 Binder 中的真实实例
//! - [`PlaceholderInstance`]：不能执行脚本时的占位实例
//! - [`ReloadCoordinator`]：失败安全的热重载
//! - [`ScriptValue`]：跨引擎边界的值

pub mod bytecode;
pub mod instance;
pub mod object;
pub mod placeholder;
pub mod reload;
pub mod value;

pub use instance::ScriptInstance;
pub use object::{Script, ScriptId};
pub use placeholder::PlaceholderInstance;
pub use reload::{ReloadCoordinator, ReloadReport};
pub use value::ScriptValue;
