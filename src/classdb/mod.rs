//! 类描述符表
//!
//! 宿主基类与脚本类的只读元数据。

pub mod descriptor;
pub mod table;

pub use descriptor::{ClassDescriptor, MethodInfo, PropertyInfo, SignalInfo, VariantType};
pub use table::{ClassDescriptorTable, ClassTableBuilder};
