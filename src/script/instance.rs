//! 脚本实例
//!
//! 宿主对象与某个 Binder 中脚本侧值的结合。实例只能在所属 Binder 的线程上
//! 使用；每次访问先做亲和性检查，再按需把实例对齐到脚本的最新版本。

use std::fmt;
use std::rc::Rc;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::object::Script;
use super::reload::ReloadCoordinator;
use super::value::ScriptValue;
use crate::binder::{Binder, BinderHandle, BindingData, ClassHandle};
use crate::classdb::{ClassDescriptor, MethodInfo, PropertyInfo};
use crate::core::{BinderError, BinderResult};
use crate::host::{HostObject, ObjectId};

pub(super) struct InstanceState {
    pub(super) version: u64,
    pub(super) descriptor: Arc<ClassDescriptor>,
}

pub(crate) struct InstanceInner {
    script: Arc<Script>,
    host: Weak<HostObject>,
    object_id: ObjectId,
    binder: BinderHandle,
    pub(super) binding: Arc<BindingData>,
    pub(super) state: Mutex<InstanceState>,
}

impl Drop for InstanceInner {
    fn drop(&mut self) {
        self.script.forget_instance(self.object_id);
        self.binding.unclaim();
        if self.binder.release_binding(&self.binding) {
            if let Some(host) = self.host.upgrade() {
                if let Some(token) = host.instance_binding() {
                    if Arc::ptr_eq(token.data(), &self.binding) {
                        host.clear_instance_binding(&token);
                    }
                }
            }
        }
    }
}

/// 脚本实例
#[derive(Clone)]
pub struct ScriptInstance {
    inner: Arc<InstanceInner>,
}

impl ScriptInstance {
    pub(crate) fn new(
        script: Arc<Script>,
        host: &Arc<HostObject>,
        binder: BinderHandle,
        class: &ClassHandle,
        binding: Arc<BindingData>,
    ) -> Self {
        Self {
            inner: Arc::new(InstanceInner {
                script,
                host: Arc::downgrade(host),
                object_id: host.id(),
                binder,
                binding,
                state: Mutex::new(InstanceState {
                    version: class.version(),
                    descriptor: class.descriptor().clone(),
                }),
            }),
        }
    }

    pub(super) fn from_inner(inner: Arc<InstanceInner>) -> Self {
        Self { inner }
    }

    pub(super) fn downgrade(&self) -> Weak<InstanceInner> {
        Arc::downgrade(&self.inner)
    }

    pub(super) fn inner(&self) -> &InstanceInner {
        &self.inner
    }

    pub fn script(&self) -> &Arc<Script> {
        &self.inner.script
    }

    pub fn host(&self) -> Option<Arc<HostObject>> {
        self.inner.host.upgrade()
    }

    pub fn object_id(&self) -> ObjectId {
        self.inner.object_id
    }

    pub fn binder(&self) -> &BinderHandle {
        &self.inner.binder
    }

    pub fn binding(&self) -> &Arc<BindingData> {
        &self.inner.binding
    }

    /// 所属上下文仍存在
    pub fn is_valid(&self) -> bool {
        self.inner.binder.is_alive()
    }

    /// 实例当前对应的类版本
    pub fn class_version(&self) -> u64 {
        self.inner.state.lock().version
    }

    pub fn descriptor(&self) -> Arc<ClassDescriptor> {
        self.inner.state.lock().descriptor.clone()
    }

    pub fn get_property_list(&self) -> Vec<PropertyInfo> {
        self.descriptor().properties.clone()
    }

    pub fn get_method_list(&self) -> Vec<MethodInfo> {
        self.descriptor().methods.clone()
    }

    /// 进入所属上下文
    fn enter(&self) -> BinderResult<Rc<Binder>> {
        let inner = &self.inner;
        inner.binder.check_affinity()?;
        if inner.host.strong_count() == 0 {
            return Err(BinderError::HostGone);
        }
        let binder = inner
            .script
            .registry()
            .current_binder()
            .filter(|binder| binder.handle() == &inner.binder)
            .ok_or(BinderError::ContextGone)?;
        binder.drain_reclaimed();
        ReloadCoordinator::sync_instance(&binder, self)?;
        Ok(binder)
    }

    /// 读取属性
    ///
    /// 脚本侧没有值时回退到声明的默认值；都没有时返回 `None`。
    pub fn get_property(&self, name: &str) -> BinderResult<Option<ScriptValue>> {
        let binder = self.enter()?;
        let descriptor = self.descriptor();
        let declared = descriptor.property(name);
        match binder.get_value(self.inner.binding.slot(), name)? {
            Some(value) => Ok(Some(match declared {
                Some(property) => property.ty.coerce(value),
                None => value,
            })),
            None => Ok(declared.map(|property| property.default.clone())),
        }
    }

    /// 写入属性；脚本拒绝时返回 false
    pub fn set_property(&self, name: &str, value: impl Into<ScriptValue>) -> BinderResult<bool> {
        let binder = self.enter()?;
        let mut value = value.into();
        if let Some(property) = self.descriptor().property(name) {
            value = property.ty.coerce(value);
        }
        binder.set_value(self.inner.binding.slot(), name, &value)
    }

    /// 调用脚本方法
    pub fn call_method(&self, name: &str, args: &[ScriptValue]) -> BinderResult<ScriptValue> {
        let binder = self.enter()?;
        binder.call_method(self.inner.binding.slot(), name, args)
    }

    /// 方法是否由脚本定义（实例自身或脚本类）
    pub fn has_method(&self, name: &str) -> BinderResult<bool> {
        let binder = self.enter()?;
        binder.has_own_method(self.inner.binding.slot(), name)
    }

    /// 所有声明属性的当前值
    pub fn get_property_state(&self) -> BinderResult<Vec<(String, ScriptValue)>> {
        let descriptor = self.descriptor();
        let mut state = Vec::with_capacity(descriptor.properties.len());
        for property in &descriptor.properties {
            if let Some(value) = self.get_property(&property.name)? {
                state.push((property.name.clone(), value));
            }
        }
        Ok(state)
    }
}

impl PartialEq for ScriptInstance {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for ScriptInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptInstance")
            .field("object_id", &self.inner.object_id)
            .field("script", &self.inner.script.id())
            .field("binder", &self.inner.binder.id())
            .field("version", &self.class_version())
            .finish()
    }
}
