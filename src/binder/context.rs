//! 线程本地 Binder
//!
//! 每个 Binder 独占一个 QuickJS 运行时和上下文，只在创建它的线程上使用。
//! 脚本侧对象保存在引擎内部的槽位表里，宿主经由辅助脚本按槽位读写。

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Weak};

use rquickjs::{Context, Ctx, Function, Object, Runtime};
use serde::Deserialize;

use super::binding::BindingToken;
use super::handle::BinderHandle;
use super::prelude::{self, BINDER_GLOBAL, HOST_LOG_GLOBAL, PRELUDE};
use super::registry::RegistryInner;
use crate::classdb::{ClassDescriptor, ClassDescriptorTable, MethodInfo, PropertyInfo, SignalInfo, VariantType};
use crate::config::BinderConfig;
use crate::core::{BinderError, BinderResult, CompileError};
use crate::host::HostObject;
use crate::script::{Script, ScriptId, ScriptInstance, ScriptValue};

/// 已编译到某个上下文中的脚本类
#[derive(Debug, Clone)]
pub struct ClassHandle {
    id: u64,
    pub(crate) version: u64,
    pub(crate) descriptor: Arc<ClassDescriptor>,
}

impl ClassHandle {
    /// 上下文内的类编号
    pub fn id(&self) -> u64 {
        self.id
    }

    /// 对应的脚本版本，未登记时为 0
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn descriptor(&self) -> &Arc<ClassDescriptor> {
        &self.descriptor
    }

    pub fn class_name(&self) -> &str {
        &self.descriptor.class_name
    }
}

#[derive(Deserialize)]
struct CompileReport {
    ok: bool,
    #[serde(default)]
    line: i64,
    #[serde(default)]
    column: i64,
    #[serde(default)]
    message: String,
    descriptor: Option<RawDescriptor>,
}

/// 引擎侧报告的描述符，类型名是任意字符串
#[derive(Deserialize)]
struct RawDescriptor {
    #[serde(default)]
    class_name: String,
    #[serde(default)]
    base_type: String,
    #[serde(default)]
    properties: Vec<RawProperty>,
    #[serde(default)]
    methods: Vec<MethodInfo>,
    #[serde(default)]
    signals: Vec<SignalInfo>,
    #[serde(default)]
    tool: bool,
}

#[derive(Deserialize)]
struct RawProperty {
    name: String,
    #[serde(rename = "type", default)]
    ty: String,
    #[serde(default)]
    default: serde_json::Value,
}

impl RawDescriptor {
    fn into_descriptor(self) -> ClassDescriptor {
        ClassDescriptor {
            class_name: self.class_name,
            base_type: self.base_type,
            properties: self
                .properties
                .into_iter()
                .map(|p| PropertyInfo::new(p.name, VariantType::parse(&p.ty), p.default.into()))
                .collect(),
            methods: self.methods,
            signals: self.signals,
            tool: self.tool,
        }
    }
}

#[derive(Deserialize)]
struct StatusReport {
    ok: bool,
    #[serde(default)]
    missing: bool,
    #[serde(default)]
    message: String,
    #[serde(default)]
    line: i64,
    #[serde(default)]
    column: i64,
    #[serde(default)]
    value: serde_json::Value,
    #[serde(default)]
    syntax: bool,
}

#[derive(Deserialize)]
struct GetReport {
    found: bool,
    #[serde(default)]
    value: serde_json::Value,
    error: Option<String>,
}

fn helper<'js>(ctx: &Ctx<'js>, name: &str) -> rquickjs::Result<Function<'js>> {
    let binder: Object<'js> = ctx.globals().get(BINDER_GLOBAL)?;
    binder.get(name)
}

/// 把引擎报告的位置收敛到源码范围内（1 起始）
fn clamp_location(source: &str, line: i64, column: i64) -> (u32, u32) {
    let lines = source.lines().count().max(1) as i64;
    (line.clamp(1, lines) as u32, column.max(1) as u32)
}

/// 在上下文中安装辅助脚本、控制台和宿主类命名空间
fn prepare_context(context: &Context, namespace: &str, manifest: &str) -> BinderResult<()> {
    context
        .with(|ctx| -> rquickjs::Result<()> {
            let log = Function::new(ctx.clone(), |level: String, message: String| {
                match level.as_str() {
                    "error" => tracing::error!(target: "script.console", "{}", message),
                    "warn" => tracing::warn!(target: "script.console", "{}", message),
                    "debug" => tracing::debug!(target: "script.console", "{}", message),
                    _ => tracing::info!(target: "script.console", "{}", message),
                }
            })?;
            ctx.globals().set(HOST_LOG_GLOBAL, log)?;
            ctx.eval::<(), _>(PRELUDE)?;
            let install = helper(&ctx, "install")?;
            install.call::<_, ()>((namespace, manifest))
        })
        .map_err(|e| BinderError::ContextUnavailable(format!("prelude failed: {}", e)))
}

/// 线程本地的引擎上下文
pub struct Binder {
    handle: BinderHandle,
    registry: Weak<RegistryInner>,
    class_table: Arc<ClassDescriptorTable>,
    classes: RefCell<HashMap<ScriptId, ClassHandle>>,
    next_class_id: Cell<u64>,
    namespace: String,
    manifest: String,
    // 上下文必须先于运行时释放
    context: Context,
    runtime: Runtime,
}

impl Binder {
    pub(crate) fn new(
        handle: BinderHandle,
        registry: Weak<RegistryInner>,
        config: &BinderConfig,
        class_table: Arc<ClassDescriptorTable>,
    ) -> BinderResult<Self> {
        let runtime =
            Runtime::new().map_err(|e| BinderError::ContextUnavailable(e.to_string()))?;
        if let Some(limit) = config.runtime.memory_limit {
            runtime.set_memory_limit(limit);
        }
        if let Some(size) = config.runtime.max_stack_size {
            runtime.set_max_stack_size(size);
        }
        if let Some(threshold) = config.runtime.gc_threshold {
            runtime.set_gc_threshold(threshold);
        }
        let context =
            Context::full(&runtime).map_err(|e| BinderError::ContextUnavailable(e.to_string()))?;

        let manifest = prelude::host_class_manifest(&class_table)?;
        let namespace = config.script_namespace.clone();
        prepare_context(&context, &namespace, &manifest)?;

        tracing::info!(
            target: "binder",
            "Binder {} created on {:?}{}",
            handle.id(),
            handle.thread_id(),
            if handle.is_main() { " (main)" } else { "" }
        );

        Ok(Self {
            handle,
            registry,
            class_table,
            classes: RefCell::new(HashMap::new()),
            next_class_id: Cell::new(1),
            namespace,
            manifest,
            context,
            runtime,
        })
    }

    pub fn handle(&self) -> &BinderHandle {
        &self.handle
    }

    pub fn id(&self) -> u64 {
        self.handle.id()
    }

    pub fn is_main(&self) -> bool {
        self.handle.is_main()
    }

    pub fn class_table(&self) -> &Arc<ClassDescriptorTable> {
        &self.class_table
    }

    fn next_class_id(&self) -> u64 {
        let id = self.next_class_id.get();
        self.next_class_id.set(id + 1);
        id
    }

    /// 编译源码得到类句柄
    ///
    /// `class_name` 为空时使用脚本中类的名字。编译失败返回带行列号的
    /// `CompileError`，上下文中已有的类不受影响。
    pub fn compile(&self, class_name: &str, source: &str) -> BinderResult<ClassHandle> {
        self.compile_source(class_name, source, "")
    }

    pub(crate) fn compile_source(
        &self,
        class_name: &str,
        source: &str,
        path: &str,
    ) -> BinderResult<ClassHandle> {
        let id = self.next_class_id();
        let descriptor = self.evaluate_class(id, class_name, source, path)?;
        tracing::debug!(
            target: "binder",
            "Compiled class '{}' (id {}) in binder {}",
            descriptor.class_name,
            id,
            self.id()
        );
        Ok(ClassHandle {
            id,
            version: 0,
            descriptor: Arc::new(descriptor),
        })
    }

    /// 只检查语法与导出，不登记类
    ///
    /// 脚本在同一运行时的临时上下文中求值，顶层副作用随上下文一起丢弃。
    pub fn validate(&self, source: &str, path: &str) -> BinderResult<ClassDescriptor> {
        let scratch = Context::full(&self.runtime)
            .map_err(|e| BinderError::ContextUnavailable(e.to_string()))?;
        prepare_context(&scratch, &self.namespace, &self.manifest)?;
        self.evaluate_class_in(&scratch, 0, "", source, path)
    }

    fn evaluate_class(
        &self,
        id: u64,
        class_name: &str,
        source: &str,
        path: &str,
    ) -> BinderResult<ClassDescriptor> {
        self.evaluate_class_in(&self.context, id, class_name, source, path)
    }

    fn evaluate_class_in(
        &self,
        context: &Context,
        id: u64,
        class_name: &str,
        source: &str,
        path: &str,
    ) -> BinderResult<ClassDescriptor> {
        let raw = context.with(|ctx| -> rquickjs::Result<String> {
            let compile = helper(&ctx, "compile")?;
            compile.call((id as f64, source, path))
        })?;
        let report: CompileReport = serde_json::from_str(&raw)?;
        if !report.ok {
            let (line, column) = clamp_location(source, report.line, report.column);
            return Err(CompileError::new(path, line, column, report.message).into());
        }
        let mut descriptor = report
            .descriptor
            .ok_or_else(|| BinderError::Engine("compile report without descriptor".into()))?
            .into_descriptor();

        if !class_name.is_empty() {
            descriptor.class_name = class_name.to_string();
        } else if descriptor.class_name.is_empty() {
            descriptor.class_name = Path::new(path)
                .file_stem()
                .and_then(|stem| stem.to_str())
                .filter(|stem| !stem.is_empty())
                .unwrap_or("Script")
                .to_string();
        }
        if descriptor.base_type.is_empty() {
            descriptor.base_type = self
                .class_table
                .iter()
                .next()
                .map(|root| root.class_name.clone())
                .unwrap_or_else(|| "Object".to_string());
        }
        if !self.class_table.contains(&descriptor.base_type) {
            if id > 0 {
                self.discard_class(id);
            }
            return Err(CompileError::new(
                path,
                1,
                1,
                format!("unknown base class '{}'", descriptor.base_type),
            )
            .into());
        }
        Ok(descriptor)
    }

    /// 登记脚本的类，替换旧版本
    pub(crate) fn register_class(&self, script: ScriptId, class: ClassHandle) {
        let version = class.version;
        let previous = self.classes.borrow_mut().insert(script, class);
        if let Some(previous) = previous {
            self.discard_class(previous.id);
        }
        self.handle.record_class(script, version);
    }

    pub(crate) fn unregister_class(&self, script: ScriptId) {
        let previous = self.classes.borrow_mut().remove(&script);
        if let Some(previous) = previous {
            self.discard_class(previous.id);
            tracing::debug!(
                target: "binder",
                "Unregistered class '{}' of {} from binder {}",
                previous.class_name(),
                script,
                self.id()
            );
        }
        self.handle.forget_class(script);
    }

    /// 丢弃 [`compile`](Self::compile) 得到的类
    ///
    /// 已登记给脚本的类由脚本自身管理，这里不会丢弃，返回 false。
    pub fn discard(&self, class: &ClassHandle) -> bool {
        let registered = self.classes.borrow().values().any(|c| c.id == class.id);
        if registered {
            return false;
        }
        self.discard_class(class.id)
    }

    pub fn class_for(&self, script: ScriptId) -> Option<ClassHandle> {
        self.classes.borrow().get(&script).cloned()
    }

    /// 确保脚本的当前版本已编译到本上下文
    ///
    /// 其他线程上的重载只更新脚本对象，本上下文在首次使用时按最新的
    /// 已编译源码重新编译。
    pub(crate) fn ensure_class(&self, script: &Script) -> BinderResult<ClassHandle> {
        let compiled = script.compiled().ok_or_else(|| {
            BinderError::InvalidScript(format!("script {} has not been compiled", script.id()))
        })?;
        if let Some(existing) = self.class_for(script.id()) {
            if existing.version == compiled.version {
                return Ok(existing);
            }
        }
        let mut class = self.compile_source(&compiled.class_name, &compiled.source, &compiled.path)?;
        class.version = compiled.version;
        class.descriptor = compiled.descriptor.clone();
        self.register_class(script.id(), class.clone());
        Ok(class)
    }

    /// 为宿主对象创建脚本实例
    pub fn instantiate(
        &self,
        script: &Arc<Script>,
        class: &ClassHandle,
        host: &Arc<HostObject>,
    ) -> BinderResult<ScriptInstance> {
        self.handle.check_affinity()?;
        let base = &class.descriptor.base_type;
        if !self.class_table.is_parent_class(host.class_name(), base) {
            return Err(BinderError::BindingMismatch {
                expected: base.clone(),
                actual: host.class_name().to_string(),
            });
        }
        if script.instance_has(host) {
            return Err(BinderError::AlreadyBound(host.id()));
        }
        // 绑定已被其他脚本的实例占用时不能替换或释放
        let existing = host.instance_binding().filter(|t| t.is_live());
        if let Some(token) = &existing {
            if !token.data().claim() {
                return Err(BinderError::AlreadyBound(host.id()));
            }
        }

        let slot = self.handle.alloc_slot();
        if let Err(err) = self.construct(class, slot) {
            if let Some(token) = &existing {
                token.data().unclaim();
            }
            return Err(err);
        }

        let token = match existing {
            Some(token) if token.binder() == &self.handle => {
                let previous = token.data().swap_slot(slot);
                self.release_slot(previous);
                token
            }
            other => {
                if let Some(foreign) = other {
                    foreign.data().unclaim();
                    foreign.binder().free_binding(foreign.data());
                }
                let (data, created) = self.handle.bindings().bind(host.id(), slot);
                if !data.claim() {
                    self.release_slot(slot);
                    return Err(BinderError::AlreadyBound(host.id()));
                }
                if !created {
                    let previous = data.swap_slot(slot);
                    self.release_slot(previous);
                }
                let token = BindingToken::new(self.handle.clone(), data);
                host.set_instance_binding(Some(token.clone()));
                token
            }
        };
        token.data().acquire();

        let instance = ScriptInstance::new(
            script.clone(),
            host,
            self.handle.clone(),
            class,
            token.data().clone(),
        );
        script.track_instance(&instance);
        tracing::debug!(
            target: "binder",
            "Instantiated '{}' for {} in binder {}",
            class.class_name(),
            host.id(),
            self.id()
        );
        Ok(instance)
    }

    /// 为宿主对象分配绑定数据；已有有效绑定时直接复用
    pub(crate) fn bind_host(&self, host: &Arc<HostObject>) -> BinderResult<BindingToken> {
        self.handle.check_affinity()?;
        if let Some(token) = host.instance_binding() {
            if token.is_live() && token.binder() == &self.handle {
                return Ok(token);
            }
            if token.is_live() && token.data().is_claimed() {
                return Err(BinderError::AlreadyBound(host.id()));
            }
            token.binder().free_binding(token.data());
        }
        let class_name = if self.class_table.contains(host.class_name()) {
            host.class_name()
        } else {
            "Object"
        };
        let slot = self.handle.alloc_slot();
        let wrapped = self.context.with(|ctx| -> rquickjs::Result<bool> {
            let wrap = helper(&ctx, "wrap")?;
            wrap.call((slot as f64, class_name))
        })?;
        if !wrapped {
            return Err(BinderError::Engine(format!(
                "failed to wrap {} as '{}'",
                host.id(),
                class_name
            )));
        }
        let (data, created) = self.handle.bindings().bind(host.id(), slot);
        if !created {
            self.release_slot(slot);
        }
        let token = BindingToken::new(self.handle.clone(), data);
        host.set_instance_binding(Some(token.clone()));
        Ok(token)
    }

    pub(crate) fn construct(&self, class: &ClassHandle, slot: u64) -> BinderResult<()> {
        let raw = self.context.with(|ctx| -> rquickjs::Result<String> {
            let construct = helper(&ctx, "construct")?;
            construct.call((class.id as f64, slot as f64))
        })?;
        let report: StatusReport = serde_json::from_str(&raw)?;
        if report.ok {
            Ok(())
        } else {
            Err(BinderError::Runtime(format!(
                "constructing '{}' failed: {}",
                class.class_name(),
                report.message
            )))
        }
    }

    /// 释放槽位上的脚本侧值
    pub(crate) fn release_slot(&self, slot: u64) -> bool {
        let released = self.context.with(|ctx| -> rquickjs::Result<bool> {
            let release = helper(&ctx, "release")?;
            release.call((slot as f64,))
        });
        match released {
            Ok(released) => released,
            Err(err) => {
                tracing::warn!(target: "binder", "Failed to release slot {}: {}", slot, err);
                false
            }
        }
    }

    fn discard_class(&self, id: u64) -> bool {
        let result = self.context.with(|ctx| -> rquickjs::Result<bool> {
            let discard = helper(&ctx, "discard")?;
            discard.call((id as f64,))
        });
        match result {
            Ok(discarded) => discarded,
            Err(err) => {
                tracing::warn!(target: "binder", "Failed to discard class {}: {}", id, err);
                false
            }
        }
    }

    /// 读取脚本侧的值；不存在或是函数时返回 `None`
    pub(crate) fn get_value(&self, slot: u64, name: &str) -> BinderResult<Option<ScriptValue>> {
        let raw = self.context.with(|ctx| -> rquickjs::Result<String> {
            let get = helper(&ctx, "get")?;
            get.call((slot as f64, name))
        })?;
        let report: GetReport = serde_json::from_str(&raw)?;
        if let Some(error) = report.error {
            return Err(BinderError::Runtime(format!("reading '{}' failed: {}", name, error)));
        }
        Ok(report.found.then(|| ScriptValue::from(report.value)))
    }

    /// 写入脚本侧的值；脚本拒绝（只读、setter 抛错）时返回 false
    pub(crate) fn set_value(&self, slot: u64, name: &str, value: &ScriptValue) -> BinderResult<bool> {
        let json = value.to_json();
        let raw = self.context.with(|ctx| -> rquickjs::Result<String> {
            let set = helper(&ctx, "set")?;
            set.call((slot as f64, name, json.as_str()))
        })?;
        let report: StatusReport = serde_json::from_str(&raw)?;
        if !report.ok {
            tracing::debug!(
                target: "binder",
                "Setting '{}' rejected by script: {}",
                name,
                report.message
            );
        }
        Ok(report.ok)
    }

    pub(crate) fn call_method(
        &self,
        slot: u64,
        name: &str,
        args: &[ScriptValue],
    ) -> BinderResult<ScriptValue> {
        let args_json =
            serde_json::Value::Array(args.iter().map(serde_json::Value::from).collect()).to_string();
        let raw = self.context.with(|ctx| -> rquickjs::Result<String> {
            let call = helper(&ctx, "call")?;
            call.call((slot as f64, name, args_json.as_str()))
        })?;
        let report: StatusReport = serde_json::from_str(&raw)?;
        if report.ok {
            Ok(ScriptValue::from(report.value))
        } else if report.missing {
            Err(BinderError::MethodNotFound(name.to_string()))
        } else {
            Err(BinderError::Runtime(format!("{}: {}", name, report.message)))
        }
    }

    /// 方法是否由脚本自身定义（不含宿主基类）
    pub(crate) fn has_own_method(&self, slot: u64, name: &str) -> BinderResult<bool> {
        Ok(self.context.with(|ctx| -> rquickjs::Result<bool> {
            let has_method = helper(&ctx, "hasMethod")?;
            has_method.call((slot as f64, name))
        })?)
    }

    /// 在全局作用域执行一段代码，返回可序列化的结果
    pub fn execute(&self, source: &str, path: &str) -> BinderResult<ScriptValue> {
        self.handle.check_affinity()?;
        self.drain_reclaimed();
        let raw = self.context.with(|ctx| -> rquickjs::Result<String> {
            let execute = helper(&ctx, "execute")?;
            execute.call((source,))
        })?;
        let report: StatusReport = serde_json::from_str(&raw)?;
        if report.ok {
            Ok(ScriptValue::from(report.value))
        } else if report.syntax {
            let (line, column) = clamp_location(source, report.line, report.column);
            Err(CompileError::new(path, line, column, report.message).into())
        } else {
            Err(BinderError::Runtime(report.message))
        }
    }

    /// 引擎中仍存活的脚本侧值数量
    pub fn live_values(&self) -> usize {
        let count = self.context.with(|ctx| -> rquickjs::Result<f64> {
            let live = helper(&ctx, "liveValues")?;
            live.call(())
        });
        count.map(|n| n as usize).unwrap_or(0)
    }

    /// 引擎中仍保留的脚本类数量
    pub fn live_classes(&self) -> usize {
        let count = self.context.with(|ctx| -> rquickjs::Result<f64> {
            let live = helper(&ctx, "liveClasses")?;
            live.call(())
        });
        count.map(|n| n as usize).unwrap_or(0)
    }

    /// 释放其他线程排队的槽位和已释放脚本的类
    pub fn drain_reclaimed(&self) -> usize {
        for script in self.handle.take_pending_unregisters() {
            self.unregister_class(script);
        }
        let pending = self.handle.take_pending_reclaims();
        let count = pending.len();
        for slot in pending {
            self.release_slot(slot);
        }
        count
    }

    /// 每帧维护：释放排队槽位，执行挂起的 Promise 任务
    pub fn frame(&self) -> usize {
        let reclaimed = self.drain_reclaimed();
        let mut jobs = 0;
        while self.runtime.is_job_pending() {
            match self.runtime.execute_pending_job() {
                Ok(true) => jobs += 1,
                Ok(false) => break,
                Err(_) => {
                    tracing::warn!(target: "binder", "Pending job in binder {} threw", self.id());
                }
            }
        }
        if reclaimed > 0 || jobs > 0 {
            tracing::trace!(
                target: "binder",
                "Binder {} frame: {} reclaimed, {} jobs",
                self.id(),
                reclaimed,
                jobs
            );
        }
        jobs
    }
}

impl Drop for Binder {
    fn drop(&mut self) {
        self.handle.invalidate();
        if let Some(registry) = self.registry.upgrade() {
            registry.deregister(&self.handle);
        }
        tracing::info!(target: "binder", "Binder {} torn down", self.handle.id());
    }
}
