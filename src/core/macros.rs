//! 核心宏定义
//!
//! 提供统一的宏来减少代码重复

/// 为结构体实现Default trait的宏
///
/// 使用示例:
/// ```rust
/// use script_binder::impl_default;
///
/// struct MyStruct {
///     field1: u32,
///     field2: String,
/// }
///
/// impl_default!(MyStruct {
///     field1: 0,
///     field2: String::new(),
/// });
/// ```
#[macro_export]
macro_rules! impl_default {
    ($struct_name:ident {
        $($field:ident: $value:expr),* $(,)?
    }) => {
        impl Default for $struct_name {
            fn default() -> Self {
                Self {
                    $($field: $value),*
                }
            }
        }
    };
}
