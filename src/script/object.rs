//! 脚本对象
//!
//! 一份脚本资源：源码（或打包的压缩源码）、最近一次成功编译的类描述、
//! 以及由它创建的实例和占位实例。编译产物按上下文各自持有，
//! 脚本对象只记录版本号，各上下文在使用时对齐。

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use super::bytecode;
use super::instance::{InstanceInner, ScriptInstance};
use super::placeholder::{PlaceholderInner, PlaceholderInstance};
use super::reload::{ReloadCoordinator, ReloadReport};
use super::value::ScriptValue;
use crate::binder::BinderRegistry;
use crate::classdb::{ClassDescriptor, MethodInfo, PropertyInfo, SignalInfo};
use crate::core::{BinderError, BinderResult, CompileError};
use crate::host::{HostObject, ObjectId};

static NEXT_SCRIPT_ID: AtomicU64 = AtomicU64::new(1);

/// 脚本标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScriptId(u64);

impl ScriptId {
    fn next() -> Self {
        ScriptId(NEXT_SCRIPT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn from_raw(raw: u64) -> Self {
        ScriptId(raw)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ScriptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Script#{}", self.0)
    }
}

/// 最近一次成功编译的结果
#[derive(Debug, Clone)]
pub(crate) struct CompiledClass {
    pub version: u64,
    pub source: String,
    pub class_name: String,
    pub path: String,
    pub descriptor: Arc<ClassDescriptor>,
}

#[derive(Default)]
struct ScriptState {
    class_name: String,
    source: String,
    bytecode: Vec<u8>,
    path: String,
    compiled: Option<CompiledClass>,
    last_error: Option<CompileError>,
    /// 最近一次不保留状态的重载产生的版本
    reset_version: u64,
}

/// 脚本对象
pub struct Script {
    id: ScriptId,
    registry: BinderRegistry,
    state: RwLock<ScriptState>,
    instances: Mutex<HashMap<ObjectId, Weak<InstanceInner>>>,
    placeholders: Mutex<HashMap<ObjectId, Weak<PlaceholderInner>>>,
    /// 重载与实例创建互斥
    pub(super) reload_lock: Mutex<()>,
}

impl Drop for Script {
    fn drop(&mut self) {
        // 各上下文中的类随脚本一起注销，其他线程的排队处理
        for binder in self.registry.binders_with_class(self.id) {
            binder.release_class(self.id);
        }
    }
}

impl Script {
    pub fn new(registry: BinderRegistry) -> Arc<Self> {
        Arc::new(Self {
            id: ScriptId::next(),
            registry,
            state: RwLock::new(ScriptState::default()),
            instances: Mutex::new(HashMap::new()),
            placeholders: Mutex::new(HashMap::new()),
            reload_lock: Mutex::new(()),
        })
    }

    pub fn id(&self) -> ScriptId {
        self.id
    }

    pub fn registry(&self) -> &BinderRegistry {
        &self.registry
    }

    // ---- 源码与持久化形式 ----

    pub fn has_source_code(&self) -> bool {
        !self.state.read().source.is_empty()
    }

    pub fn source_code(&self) -> String {
        self.state.read().source.clone()
    }

    /// 设置源码；在下一次重载前不影响已编译的类
    pub fn set_source_code(&self, source: impl Into<String>) {
        self.state.write().source = source.into();
    }

    pub fn bytecode(&self) -> Vec<u8> {
        self.state.read().bytecode.clone()
    }

    /// 设置打包数据；没有源码时从它加载
    pub fn set_bytecode(&self, blob: Vec<u8>) {
        self.state.write().bytecode = blob;
    }

    /// 把当前生效的源码编码为打包格式
    pub fn export_bytecode(&self) -> BinderResult<Vec<u8>> {
        let source = self.effective_source()?;
        bytecode::encode(&source)
    }

    pub fn script_path(&self) -> String {
        self.state.read().path.clone()
    }

    pub fn set_script_path(&self, path: impl Into<String>) {
        self.state.write().path = path.into();
    }

    /// 声明的类名，未声明时取编译出的类名
    pub fn class_name(&self) -> String {
        let state = self.state.read();
        if !state.class_name.is_empty() {
            return state.class_name.clone();
        }
        state
            .compiled
            .as_ref()
            .map(|compiled| compiled.class_name.clone())
            .unwrap_or_default()
    }

    pub fn set_class_name(&self, class_name: impl Into<String>) {
        self.state.write().class_name = class_name.into();
    }

    pub(super) fn declared_class_name(&self) -> String {
        self.state.read().class_name.clone()
    }

    /// 源码优先，其次是打包数据
    pub(crate) fn effective_source(&self) -> BinderResult<String> {
        let state = self.state.read();
        if !state.source.is_empty() {
            return Ok(state.source.clone());
        }
        if !state.bytecode.is_empty() {
            return bytecode::decode(&state.bytecode);
        }
        Err(BinderError::InvalidScript(format!(
            "{} has neither source code nor bytecode",
            self.id
        )))
    }

    // ---- 编译状态 ----

    /// 是否有可用的已编译类
    pub fn is_valid(&self) -> bool {
        self.state.read().compiled.is_some()
    }

    pub fn can_instantiate(&self) -> bool {
        self.is_valid() && self.registry.execution_enabled()
    }

    /// 已编译的版本号，从未编译成功时为 0
    pub fn version(&self) -> u64 {
        self.state
            .read()
            .compiled
            .as_ref()
            .map(|compiled| compiled.version)
            .unwrap_or(0)
    }

    pub fn descriptor(&self) -> Option<Arc<ClassDescriptor>> {
        self.state
            .read()
            .compiled
            .as_ref()
            .map(|compiled| compiled.descriptor.clone())
    }

    /// 最近一次编译失败的信息；成功编译后清空
    pub fn last_error(&self) -> Option<CompileError> {
        self.state.read().last_error.clone()
    }

    pub(crate) fn compiled(&self) -> Option<CompiledClass> {
        self.state.read().compiled.clone()
    }

    /// 从 `from_version` 跨越到最新版本时是否保留属性值
    ///
    /// 跨越的任一次重载不保留状态，则整体不保留。
    pub(crate) fn keep_state_on_migrate(&self, from_version: u64) -> bool {
        from_version >= self.state.read().reset_version
    }

    pub(super) fn install_compiled(&self, compiled: CompiledClass, keep_state: bool) {
        let mut state = self.state.write();
        if !keep_state {
            state.reset_version = compiled.version;
        }
        state.compiled = Some(compiled);
        state.last_error = None;
    }

    pub(super) fn record_error(&self, error: CompileError) {
        self.state.write().last_error = Some(error);
    }

    /// 重新编译并迁移实例
    pub fn reload(self: &Arc<Self>, keep_state: bool) -> BinderResult<ReloadReport> {
        ReloadCoordinator::new(&self.registry).reload(self, keep_state)
    }

    // ---- 实例 ----

    /// 为宿主对象创建实例
    ///
    /// 脚本执行被禁用或上下文无法创建时返回 `ContextUnavailable`。
    pub fn instance_create(self: &Arc<Self>, host: &Arc<HostObject>) -> BinderResult<ScriptInstance> {
        if !self.registry.execution_enabled() {
            return Err(BinderError::ContextUnavailable(
                "script execution is disabled".into(),
            ));
        }
        let binder = self.registry.get_or_create_binder_for_current_thread()?;
        binder.drain_reclaimed();

        let _guard = self.reload_lock.lock();
        if !self.is_valid() {
            return Err(BinderError::InvalidScript(match self.last_error() {
                Some(err) => format!("{} failed to compile: {}", self.id, err),
                None => format!("{} has not been compiled", self.id),
            }));
        }
        let class = binder.ensure_class(self)?;
        binder.instantiate(self, &class, host)
    }

    /// 宿主对象是否已有本脚本的有效实例
    pub fn instance_has(&self, host: &HostObject) -> bool {
        // 升级出的强引用在锁外释放
        let inner = self.instances.lock().get(&host.id()).and_then(Weak::upgrade);
        inner
            .map(|inner| ScriptInstance::from_inner(inner).is_valid())
            .unwrap_or(false)
    }

    pub fn instance_count(&self) -> usize {
        self.live_instances().len()
    }

    /// 仍有效的实例
    pub fn live_instances(&self) -> Vec<ScriptInstance> {
        let upgraded: Vec<Arc<InstanceInner>> = {
            let mut instances = self.instances.lock();
            instances.retain(|_, weak| weak.strong_count() > 0);
            instances.values().filter_map(Weak::upgrade).collect()
        };
        upgraded
            .into_iter()
            .map(ScriptInstance::from_inner)
            .filter(ScriptInstance::is_valid)
            .collect()
    }

    pub(crate) fn track_instance(&self, instance: &ScriptInstance) {
        self.instances
            .lock()
            .insert(instance.object_id(), instance.downgrade());
    }

    pub(crate) fn forget_instance(&self, id: ObjectId) {
        let mut instances = self.instances.lock();
        if instances
            .get(&id)
            .map(|weak| weak.strong_count() == 0)
            .unwrap_or(false)
        {
            instances.remove(&id);
        }
    }

    // ---- 占位实例 ----

    /// 创建占位实例：只缓存属性值，不执行脚本
    pub fn placeholder_instance_create(self: &Arc<Self>, host: &Arc<HostObject>) -> PlaceholderInstance {
        let properties = self
            .descriptor()
            .map(|descriptor| descriptor.properties.clone())
            .unwrap_or_default();
        let placeholder = PlaceholderInstance::new(self, host, properties);
        self.placeholders
            .lock()
            .insert(host.id(), placeholder.downgrade());
        placeholder
    }

    pub fn is_placeholder_fallback_enabled(&self) -> bool {
        self.registry.config().placeholder_fallback
    }

    pub fn placeholders(&self) -> Vec<PlaceholderInstance> {
        let upgraded: Vec<Arc<PlaceholderInner>> = {
            let mut placeholders = self.placeholders.lock();
            placeholders.retain(|_, weak| weak.strong_count() > 0);
            placeholders.values().filter_map(Weak::upgrade).collect()
        };
        upgraded
            .into_iter()
            .map(PlaceholderInstance::from_inner)
            .collect()
    }

    pub(crate) fn placeholder_erased(&self, id: ObjectId) {
        self.placeholders.lock().remove(&id);
    }

    /// 用当前属性列表刷新所有占位实例，返回刷新的数量
    pub fn update_exports(&self) -> usize {
        let properties = self
            .descriptor()
            .map(|descriptor| descriptor.properties.clone())
            .unwrap_or_default();
        let placeholders = self.placeholders();
        for placeholder in &placeholders {
            placeholder.update(properties.clone());
        }
        placeholders.len()
    }

    // ---- 内省 ----

    /// 实例要求的宿主基类
    pub fn get_instance_base_type(&self) -> Option<String> {
        self.descriptor()
            .map(|descriptor| descriptor.base_type.clone())
    }

    /// 同一脚本对象即视为继承关系成立（不支持脚本间继承）
    pub fn inherits_script(&self, other: &Script) -> bool {
        self.id == other.id
    }

    pub fn is_tool(&self) -> bool {
        self.descriptor()
            .map(|descriptor| descriptor.tool)
            .unwrap_or(false)
    }

    pub fn has_method(&self, name: &str) -> bool {
        self.descriptor()
            .map(|descriptor| descriptor.has_method(name))
            .unwrap_or(false)
    }

    pub fn get_method_info(&self, name: &str) -> Option<MethodInfo> {
        self.descriptor()
            .and_then(|descriptor| descriptor.method(name).cloned())
    }

    pub fn get_script_method_list(&self) -> Vec<MethodInfo> {
        self.descriptor()
            .map(|descriptor| descriptor.methods.clone())
            .unwrap_or_default()
    }

    pub fn get_script_property_list(&self) -> Vec<PropertyInfo> {
        self.descriptor()
            .map(|descriptor| descriptor.properties.clone())
            .unwrap_or_default()
    }

    pub fn get_property_default_value(&self, name: &str) -> Option<ScriptValue> {
        self.descriptor()
            .and_then(|descriptor| descriptor.property_default(name))
    }

    pub fn has_script_signal(&self, name: &str) -> bool {
        self.descriptor()
            .map(|descriptor| descriptor.has_signal(name))
            .unwrap_or(false)
    }

    pub fn get_script_signal_list(&self) -> Vec<SignalInfo> {
        self.descriptor()
            .map(|descriptor| descriptor.signals.clone())
            .unwrap_or_default()
    }
}

impl fmt::Debug for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        f.debug_struct("Script")
            .field("id", &self.id)
            .field("path", &state.path)
            .field("class_name", &state.class_name)
            .field("version", &state.compiled.as_ref().map(|c| c.version))
            .finish()
    }
}
