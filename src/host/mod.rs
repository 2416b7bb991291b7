//! 宿主对象
//!
//! 宿主侧的对象模型：每个对象有稳定的 [`ObjectId`]、宿主类名，最多挂一个
//! 脚本和一个实例槽位。实例槽位是封闭的三态 [`InstanceSlot`]，读写都先把
//! 槽位克隆出锁，再在锁外分派，脚本调用期间不持有宿主锁。

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::binder::BindingToken;
use crate::classdb::PropertyInfo;
use crate::core::{BinderError, BinderResult};
use crate::script::{PlaceholderInstance, Script, ScriptInstance, ScriptValue};

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

/// 宿主对象标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(pub u64);

impl ObjectId {
    /// 分配一个进程内唯一的标识
    pub fn next() -> Self {
        ObjectId(NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Object#{}", self.0)
    }
}

/// 宿主对象上的脚本实例槽位
#[derive(Debug, Clone, Default)]
pub enum InstanceSlot {
    #[default]
    None,
    Real(ScriptInstance),
    Placeholder(PlaceholderInstance),
}

impl InstanceSlot {
    pub fn is_none(&self) -> bool {
        matches!(self, InstanceSlot::None)
    }

    pub fn is_real(&self) -> bool {
        matches!(self, InstanceSlot::Real(_))
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self, InstanceSlot::Placeholder(_))
    }
}

/// 宿主对象
pub struct HostObject {
    id: ObjectId,
    class_name: String,
    script: Mutex<Option<Arc<Script>>>,
    instance: Mutex<InstanceSlot>,
    binding: Mutex<Option<BindingToken>>,
}

impl HostObject {
    pub fn new(class_name: impl Into<String>) -> Arc<Self> {
        Self::with_id(ObjectId::next(), class_name)
    }

    /// 使用宿主自己管理的标识创建
    pub fn with_id(id: ObjectId, class_name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            id,
            class_name: class_name.into(),
            script: Mutex::new(None),
            instance: Mutex::new(InstanceSlot::None),
            binding: Mutex::new(None),
        })
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn script(&self) -> Option<Arc<Script>> {
        self.script.lock().clone()
    }

    /// 挂载脚本（`None` 表示卸载）
    ///
    /// 旧实例先拆除再创建新实例。上下文不可用且脚本允许占位回退时，
    /// 挂一个占位实例。
    pub fn set_script(self: &Arc<Self>, script: Option<Arc<Script>>) -> BinderResult<()> {
        self.clear_instance();
        *self.script.lock() = script.clone();
        let Some(script) = script else {
            return Ok(());
        };

        let slot = match script.instance_create(self) {
            Ok(instance) => InstanceSlot::Real(instance),
            Err(err) if err.is_context_unavailable() && script.is_placeholder_fallback_enabled() => {
                tracing::debug!(
                    target: "binder",
                    "{}: {}; using placeholder instance",
                    self.id,
                    err
                );
                InstanceSlot::Placeholder(script.placeholder_instance_create(self))
            }
            Err(err) => {
                *self.script.lock() = None;
                return Err(err);
            }
        };
        *self.instance.lock() = slot;
        Ok(())
    }

    fn clear_instance(&self) {
        let previous = std::mem::take(&mut *self.instance.lock());
        if let InstanceSlot::Placeholder(placeholder) = &previous {
            if let Some(script) = placeholder.script() {
                script.placeholder_erased(self.id);
            }
        }
        // 实例在锁外释放
        drop(previous);
    }

    /// 占位实例换成真实实例，已覆盖的属性值写入新实例
    ///
    /// 槽位不是占位实例时返回 false。
    pub fn upgrade_placeholder(self: &Arc<Self>) -> BinderResult<bool> {
        let Some(placeholder) = self.placeholder() else {
            return Ok(false);
        };
        let Some(script) = self.script() else {
            return Ok(false);
        };
        let instance = script.instance_create(self)?;
        for (name, value) in placeholder.overridden_values() {
            if !instance.set_property(&name, value)? {
                tracing::debug!(
                    target: "binder",
                    "{}: placeholder value for '{}' not accepted",
                    self.id,
                    name
                );
            }
        }
        script.placeholder_erased(self.id);
        *self.instance.lock() = InstanceSlot::Real(instance);
        Ok(true)
    }

    /// 当前槽位的快照
    pub fn instance_slot(&self) -> InstanceSlot {
        self.instance.lock().clone()
    }

    pub fn script_instance(&self) -> Option<ScriptInstance> {
        match self.instance_slot() {
            InstanceSlot::Real(instance) => Some(instance),
            _ => None,
        }
    }

    pub fn placeholder(&self) -> Option<PlaceholderInstance> {
        match self.instance_slot() {
            InstanceSlot::Placeholder(placeholder) => Some(placeholder),
            _ => None,
        }
    }

    pub fn has_script_instance(&self) -> bool {
        !self.instance.lock().is_none()
    }

    /// 读取脚本属性；没有脚本或属性不存在时返回 `None`
    pub fn get(&self, name: &str) -> BinderResult<Option<ScriptValue>> {
        match self.instance_slot() {
            InstanceSlot::Real(instance) => instance.get_property(name),
            InstanceSlot::Placeholder(placeholder) => Ok(placeholder.get_property(name)),
            InstanceSlot::None => Ok(None),
        }
    }

    pub fn set(&self, name: &str, value: impl Into<ScriptValue>) -> BinderResult<bool> {
        let value = value.into();
        match self.instance_slot() {
            InstanceSlot::Real(instance) => instance.set_property(name, value),
            InstanceSlot::Placeholder(placeholder) => Ok(placeholder.set_property(name, value)),
            InstanceSlot::None => Ok(false),
        }
    }

    pub fn call(&self, method: &str, args: &[ScriptValue]) -> BinderResult<ScriptValue> {
        match self.instance_slot() {
            InstanceSlot::Real(instance) => instance.call_method(method, args),
            InstanceSlot::Placeholder(_) | InstanceSlot::None => {
                Err(BinderError::MethodNotFound(method.to_string()))
            }
        }
    }

    pub fn has_method(&self, method: &str) -> BinderResult<bool> {
        match self.instance_slot() {
            InstanceSlot::Real(instance) => instance.has_method(method),
            InstanceSlot::Placeholder(placeholder) => Ok(placeholder.has_method(method)),
            InstanceSlot::None => Ok(false),
        }
    }

    pub fn get_property_list(&self) -> Vec<PropertyInfo> {
        match self.instance_slot() {
            InstanceSlot::Real(instance) => instance.get_property_list(),
            InstanceSlot::Placeholder(placeholder) => placeholder.get_property_list(),
            InstanceSlot::None => Vec::new(),
        }
    }

    /// 当前的绑定数据（`get_existing_instance_binding`）
    pub fn instance_binding(&self) -> Option<BindingToken> {
        self.binding.lock().clone()
    }

    pub fn has_instance_binding(&self) -> bool {
        self.binding
            .lock()
            .as_ref()
            .map(BindingToken::is_live)
            .unwrap_or(false)
    }

    pub(crate) fn set_instance_binding(&self, token: Option<BindingToken>) {
        *self.binding.lock() = token;
    }

    /// 仅当仍是同一份绑定时清除
    pub(crate) fn clear_instance_binding(&self, token: &BindingToken) {
        let mut binding = self.binding.lock();
        if binding
            .as_ref()
            .map(|current| current.same_binding(token))
            .unwrap_or(false)
        {
            *binding = None;
        }
    }
}

impl Drop for HostObject {
    fn drop(&mut self) {
        self.clear_instance();
    }
}

impl fmt::Debug for HostObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostObject")
            .field("id", &self.id)
            .field("class_name", &self.class_name)
            .field("has_script", &self.script.lock().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_ids_are_unique() {
        let a = ObjectId::next();
        let b = ObjectId::next();
        assert_ne!(a, b);
        assert_eq!(ObjectId(7).to_string(), "Object#7");
    }

    #[test]
    fn test_unscripted_object_dispatch() {
        let host = HostObject::new("Node");
        assert!(!host.has_script_instance());
        assert_eq!(host.get("speed").unwrap(), None);
        assert!(!host.set("speed", 1.0).unwrap());
        assert!(!host.has_method("ready").unwrap());
        assert!(matches!(
            host.call("ready", &[]),
            Err(BinderError::MethodNotFound(_))
        ));
        assert!(host.get_property_list().is_empty());
    }
}
