//! JavaScript 语言实现
//!
//! 持有 Binder 注册表和由本语言创建的脚本列表，实现宿主框架要求的
//! [`ScriptLanguage`] 接口。没有全局单例：宿主显式构造并持有它。

use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::{ScriptLanguage, ValidationResult};
use crate::binder::{BinderRegistry, BindingToken};
use crate::classdb::ClassDescriptorTable;
use crate::config::BinderConfig;
use crate::core::{BinderError, BinderResult};
use crate::host::HostObject;
use crate::script::{ReloadCoordinator, ReloadReport, Script, ScriptId, ScriptValue};

pub const LANGUAGE_NAME: &str = "JavaScript";
pub const EXTENSION: &str = "jsx";
pub const RECOGNIZED_EXTENSIONS: &[&str] = &["jsx", "jsxb", "jsxe", "js", "jsb", "jse", "json"];

struct LanguageInner {
    registry: BinderRegistry,
    scripts: Mutex<Vec<Weak<Script>>>,
    initialized: AtomicBool,
}

/// JavaScript 语言
///
/// 克隆得到的是同一个语言实例。
#[derive(Clone)]
pub struct JavaScriptLanguage {
    inner: Arc<LanguageInner>,
}

impl JavaScriptLanguage {
    pub fn new(config: BinderConfig) -> Self {
        Self::with_class_table(config, ClassDescriptorTable::with_builtin_classes())
    }

    pub fn with_class_table(config: BinderConfig, classes: ClassDescriptorTable) -> Self {
        Self {
            inner: Arc::new(LanguageInner {
                registry: BinderRegistry::new(config, Arc::new(classes)),
                scripts: Mutex::new(Vec::new()),
                initialized: AtomicBool::new(false),
            }),
        }
    }

    pub fn registry(&self) -> &BinderRegistry {
        &self.inner.registry
    }

    pub fn config(&self) -> &BinderConfig {
        self.inner.registry.config()
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.load(Ordering::Acquire)
    }

    /// 工具模式开关：关闭后新实例都退化为占位实例
    pub fn set_script_execution_enabled(&self, enabled: bool) {
        self.inner.registry.set_execution_enabled(enabled);
    }

    /// 由本语言创建且仍存活的脚本
    pub fn scripts(&self) -> Vec<Arc<Script>> {
        let mut scripts = self.inner.scripts.lock();
        scripts.retain(|weak| weak.strong_count() > 0);
        scripts.iter().filter_map(Weak::upgrade).collect()
    }

    pub fn find_script(&self, id: ScriptId) -> Option<Arc<Script>> {
        self.scripts().into_iter().find(|script| script.id() == id)
    }

    pub fn find_script_by_path(&self, path: &str) -> Option<Arc<Script>> {
        self.scripts()
            .into_iter()
            .find(|script| script.script_path() == path)
    }

    /// 新建脚本并编译给定源码
    pub fn load_script(&self, path: &str, source: &str) -> BinderResult<Arc<Script>> {
        let script = self.create_script();
        script.set_script_path(path);
        script.set_source_code(source);
        script.reload(false)?;
        Ok(script)
    }

    /// 在当前线程的 Binder 中执行一段普通脚本
    pub fn execute(&self, source: &str) -> BinderResult<ScriptValue> {
        self.execute_source(source, "")
    }

    pub fn execute_file(&self, path: impl AsRef<Path>) -> BinderResult<ScriptValue> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)?;
        self.execute_source(&source, &path.to_string_lossy())
    }

    fn execute_source(&self, source: &str, path: &str) -> BinderResult<ScriptValue> {
        if !self.inner.registry.execution_enabled() {
            return Err(BinderError::ContextUnavailable(
                "script execution is disabled".into(),
            ));
        }
        let binder = self.inner.registry.get_or_create_binder_for_current_thread()?;
        binder.execute(source, path)
    }

    /// 重载全部脚本（保留状态），返回失败的脚本
    pub fn reload_all_scripts(&self) -> Vec<(ScriptId, BinderError)> {
        let mut failures = Vec::new();
        for script in self.scripts() {
            if !script.has_source_code() && script.bytecode().is_empty() {
                continue;
            }
            if let Err(err) = script.reload(true) {
                failures.push((script.id(), err));
            }
        }
        if !failures.is_empty() {
            tracing::warn!(
                target: "binder.reload",
                "{} scripts failed to reload",
                failures.len()
            );
        }
        failures
    }

    /// 相对路径转为以 `base_dir` 为根的规范路径
    pub fn globalize_relative_path(relative: &str, base_dir: &str) -> String {
        let joined = if Path::new(relative).is_absolute() {
            PathBuf::from(relative)
        } else {
            Path::new(base_dir).join(relative)
        };
        let mut normalized = PathBuf::new();
        for component in joined.components() {
            match component {
                Component::CurDir => {}
                Component::ParentDir => {
                    normalized.pop();
                }
                other => normalized.push(other.as_os_str()),
            }
        }
        normalized.to_string_lossy().replace('\\', "/")
    }
}

impl ScriptLanguage for JavaScriptLanguage {
    fn name(&self) -> &str {
        LANGUAGE_NAME
    }

    fn script_type(&self) -> &str {
        LANGUAGE_NAME
    }

    fn extension(&self) -> &str {
        EXTENSION
    }

    fn recognized_extensions(&self) -> &[&'static str] {
        RECOGNIZED_EXTENSIONS
    }

    fn init(&self) -> BinderResult<()> {
        self.inner.registry.init_main()?;
        self.inner.initialized.store(true, Ordering::Release);
        tracing::info!(target: "binder", "{} language initialized", LANGUAGE_NAME);
        Ok(())
    }

    fn finish(&self) {
        if !self.inner.initialized.swap(false, Ordering::AcqRel) {
            return;
        }
        self.inner.registry.shutdown();
        self.inner.scripts.lock().clear();
        tracing::info!(target: "binder", "{} language finished", LANGUAGE_NAME);
    }

    fn create_script(&self) -> Arc<Script> {
        let script = Script::new(self.inner.registry.clone());
        let mut scripts = self.inner.scripts.lock();
        scripts.retain(|weak| weak.strong_count() > 0);
        scripts.push(Arc::downgrade(&script));
        script
    }

    fn reload_script(&self, script: &Arc<Script>, soft_reload: bool) -> BinderResult<ReloadReport> {
        ReloadCoordinator::new(&self.inner.registry).reload(script, soft_reload)
    }

    fn validate(&self, source: &str, path: &str) -> ValidationResult {
        let binder = match self.inner.registry.get_or_create_binder_for_current_thread() {
            Ok(binder) => binder,
            Err(err) => return ValidationResult::failure(0, 0, err.to_string()),
        };
        match binder.validate(source, path) {
            Ok(descriptor) => ValidationResult::success(
                descriptor.methods.iter().map(|m| m.name.clone()).collect(),
            ),
            Err(BinderError::Compile(err)) => err.into(),
            Err(other) => ValidationResult::failure(0, 0, other.to_string()),
        }
    }

    fn alloc_instance_binding_data(&self, host: &Arc<HostObject>) -> BinderResult<BindingToken> {
        let binder = self.inner.registry.get_or_create_binder_for_current_thread()?;
        binder.bind_host(host)
    }

    fn free_instance_binding_data(&self, token: BindingToken) {
        token.binder().free_binding(token.data());
    }

    fn refcount_incremented_instance_binding(&self, host: &HostObject) {
        if let Some(token) = host.instance_binding() {
            token.data().acquire();
        }
    }

    fn refcount_decremented_instance_binding(&self, host: &HostObject) -> bool {
        let Some(token) = host.instance_binding() else {
            return true;
        };
        if token.binder().release_binding(token.data()) {
            host.clear_instance_binding(&token);
            return true;
        }
        token.data().is_reclaimed()
    }

    fn thread_enter(&self) {
        if !self.config().eager_thread_binders {
            return;
        }
        if let Err(err) = self.inner.registry.get_or_create_binder_for_current_thread() {
            tracing::warn!(target: "binder", "Eager binder creation failed: {}", err);
        }
    }

    fn thread_exit(&self) {
        self.inner.registry.teardown_current_thread();
    }

    /// 当前线程的每帧维护，并把本线程上的实例对齐到最新版本
    fn frame(&self) {
        let Some(binder) = self.inner.registry.current_binder() else {
            return;
        };
        binder.frame();
        for script in self.scripts() {
            for instance in script.live_instances() {
                if instance.binder() != binder.handle() {
                    continue;
                }
                if let Err(err) = ReloadCoordinator::sync_instance(&binder, &instance) {
                    tracing::warn!(
                        target: "binder.reload",
                        "Deferred reload of {} failed: {}",
                        instance.object_id(),
                        err
                    );
                }
            }
        }
    }
}

impl std::fmt::Debug for JavaScriptLanguage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JavaScriptLanguage")
            .field("registry", &self.inner.registry)
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identification() {
        let language = JavaScriptLanguage::new(BinderConfig::default());
        assert_eq!(language.name(), "JavaScript");
        assert_eq!(language.extension(), "jsx");
        assert!(language.recognized_extensions().contains(&"jsxb"));
    }

    #[test]
    fn test_globalize_relative_path() {
        assert_eq!(
            JavaScriptLanguage::globalize_relative_path("../lib/util.jsx", "/game/scripts"),
            "/game/lib/util.jsx"
        );
        assert_eq!(
            JavaScriptLanguage::globalize_relative_path("./a.jsx", "/game"),
            "/game/a.jsx"
        );
        assert_eq!(
            JavaScriptLanguage::globalize_relative_path("/abs/b.jsx", "/game"),
            "/abs/b.jsx"
        );
    }

    #[test]
    fn test_validate_reports_location() {
        let language = JavaScriptLanguage::new(BinderConfig::default());
        let source = "class A extends host.Node {\n    foo(n) {\n        return n +* 2;\n    }\n}\nexports.default = A;";
        let result = language.validate(source, "a.jsx");
        assert!(!result.ok);
        assert_eq!(result.line, 3);
        assert!(result.message.contains("SyntaxError"));
    }

    #[test]
    fn test_validate_leaves_no_globals_behind() {
        let language = JavaScriptLanguage::new(BinderConfig::default());
        let source = "globalThis.leak = 7;\nexports.default = class Leaky extends host.Node {};";
        let result = language.validate(source, "leaky.jsx");
        assert!(result.ok);
        assert_eq!(
            language.execute("typeof leak").unwrap(),
            ScriptValue::String("undefined".into())
        );
        assert_eq!(
            language.execute("typeof __script_binder").unwrap(),
            ScriptValue::String("object".into())
        );
    }

    #[test]
    fn test_execute_plain_script() {
        let language = JavaScriptLanguage::new(BinderConfig::default());
        assert_eq!(language.execute("1 + 2").unwrap(), ScriptValue::Int(3));
        assert_eq!(
            language.execute("({ a: [1, 'x'] })").unwrap(),
            ScriptValue::from_json(r#"{"a":[1,"x"]}"#).unwrap()
        );
    }

    #[test]
    fn test_execute_separates_syntax_and_runtime_errors() {
        let language = JavaScriptLanguage::new(BinderConfig::default());
        match language.execute("throw new Error('boom')") {
            Err(BinderError::Runtime(message)) => assert!(message.contains("boom")),
            other => panic!("unexpected result: {other:?}"),
        }
        match language.execute("null.x") {
            Err(BinderError::Runtime(message)) => assert!(message.contains("TypeError")),
            other => panic!("unexpected result: {other:?}"),
        }
        match language.execute("let a = 1;\nlet b = ;") {
            Err(BinderError::Compile(err)) => {
                assert_eq!(err.line, 2);
                assert!(err.message.contains("SyntaxError"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_execution_disabled() {
        let language = JavaScriptLanguage::new(BinderConfig::tooling());
        assert!(matches!(
            language.execute("1"),
            Err(BinderError::ContextUnavailable(_))
        ));
    }

    #[test]
    fn test_scripts_are_tracked_weakly() {
        let language = JavaScriptLanguage::new(BinderConfig::default());
        let kept = language.create_script();
        drop(language.create_script());
        let scripts = language.scripts();
        assert_eq!(scripts.len(), 1);
        assert_eq!(scripts[0].id(), kept.id());
    }
}
