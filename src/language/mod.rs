//! 脚本语言接口
//!
//! 宿主框架消费的语言抽象。必需部分只有 [`ScriptLanguage`]；
//! 语法信息、模板等可选能力拆成独立的 trait，实现方按需提供。

pub mod javascript;
pub mod syntax;
pub mod template;

use std::sync::Arc;

use crate::binder::BindingToken;
use crate::core::{BinderResult, CompileError};
use crate::host::HostObject;
use crate::script::{ReloadReport, Script};

pub use javascript::JavaScriptLanguage;

/// 校验结果
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ValidationResult {
    pub ok: bool,
    pub line: u32,
    pub column: u32,
    pub message: String,
    /// 校验通过时脚本类的方法名
    pub functions: Vec<String>,
}

impl ValidationResult {
    pub fn success(functions: Vec<String>) -> Self {
        Self {
            ok: true,
            functions,
            ..Default::default()
        }
    }

    pub fn failure(line: u32, column: u32, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            line,
            column,
            message: message.into(),
            functions: Vec::new(),
        }
    }
}

impl From<CompileError> for ValidationResult {
    fn from(err: CompileError) -> Self {
        Self::failure(err.line, err.column, err.message)
    }
}

/// 宿主框架要求的脚本语言接口
pub trait ScriptLanguage: Send + Sync {
    fn name(&self) -> &str;
    fn script_type(&self) -> &str;
    fn extension(&self) -> &str;
    fn recognized_extensions(&self) -> &[&'static str];

    /// 进程级初始化：在调用线程上创建主 Binder
    fn init(&self) -> BinderResult<()>;
    /// 进程级清理
    fn finish(&self);

    /// 新建一个空的、未编译的脚本
    fn create_script(&self) -> Arc<Script>;
    /// 交给重载协调器；`soft_reload` 表示保留实例状态
    fn reload_script(&self, script: &Arc<Script>, soft_reload: bool) -> BinderResult<ReloadReport>;
    fn validate(&self, source: &str, path: &str) -> ValidationResult;

    fn alloc_instance_binding_data(&self, host: &Arc<HostObject>) -> BinderResult<BindingToken>;
    fn free_instance_binding_data(&self, token: BindingToken);
    fn refcount_incremented_instance_binding(&self, host: &HostObject);
    /// 返回 true 表示宿主对象可以销毁
    fn refcount_decremented_instance_binding(&self, host: &HostObject) -> bool;

    fn thread_enter(&self) {}
    fn thread_exit(&self) {}
    fn frame(&self) {}
}

/// 可选能力：语法信息（编辑器高亮等）
pub trait SyntaxInfo {
    fn reserved_words(&self) -> &[&'static str];
    fn comment_delimiters(&self) -> &[&'static str];
    fn string_delimiters(&self) -> &[&'static str];

    fn is_control_flow_keyword(&self, keyword: &str) -> bool;

    fn is_reserved_word(&self, word: &str) -> bool {
        self.reserved_words().contains(&word)
    }
}

/// 可选能力：新脚本模板
pub trait TemplateProvider {
    fn get_template(&self, class_name: &str, base_class: &str) -> String;

    /// 生成一个带模板源码的脚本（未编译）
    fn make_template(&self, class_name: &str, base_class: &str) -> Arc<Script>;
}
