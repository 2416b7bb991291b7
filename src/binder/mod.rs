//! 每线程脚本上下文
//!
//! - [`Binder`]：线程本地，独占一个 QuickJS 上下文
//! - [`BinderHandle`]：Binder 的线程安全句柄，用于亲和性检查和跨线程回收
//! - [`BinderRegistry`]：线程 -> Binder 映射，另含主 Binder
//! - [`BindingTable`]：宿主对象与脚本侧值之间的引用计数表

pub mod binding;
pub mod context;
pub mod handle;
mod prelude;
pub mod registry;

pub use binding::{BindingData, BindingTable, BindingToken, Release};
pub use context::{Binder, ClassHandle};
pub use handle::BinderHandle;
pub use registry::BinderRegistry;
