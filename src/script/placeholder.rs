//! 占位实例
//!
//! 脚本不能执行时（工具模式、上下文不可用）代替真实实例挂在宿主对象上，
//! 只缓存声明属性的值，从不执行脚本代码。

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::object::Script;
use super::value::ScriptValue;
use crate::classdb::PropertyInfo;
use crate::host::{HostObject, ObjectId};

struct PlaceholderState {
    properties: Vec<PropertyInfo>,
    values: HashMap<String, ScriptValue>,
}

pub(crate) struct PlaceholderInner {
    script: Weak<Script>,
    host: Weak<HostObject>,
    object_id: ObjectId,
    state: Mutex<PlaceholderState>,
}

/// 占位实例
#[derive(Clone)]
pub struct PlaceholderInstance {
    inner: Arc<PlaceholderInner>,
}

impl PlaceholderInstance {
    pub(crate) fn new(
        script: &Arc<Script>,
        host: &Arc<HostObject>,
        properties: Vec<PropertyInfo>,
    ) -> Self {
        Self {
            inner: Arc::new(PlaceholderInner {
                script: Arc::downgrade(script),
                host: Arc::downgrade(host),
                object_id: host.id(),
                state: Mutex::new(PlaceholderState {
                    properties,
                    values: HashMap::new(),
                }),
            }),
        }
    }

    pub(super) fn from_inner(inner: Arc<PlaceholderInner>) -> Self {
        Self { inner }
    }

    pub(super) fn downgrade(&self) -> Weak<PlaceholderInner> {
        Arc::downgrade(&self.inner)
    }

    pub fn script(&self) -> Option<Arc<Script>> {
        self.inner.script.upgrade()
    }

    pub fn host(&self) -> Option<Arc<HostObject>> {
        self.inner.host.upgrade()
    }

    pub fn object_id(&self) -> ObjectId {
        self.inner.object_id
    }

    pub fn get_property_list(&self) -> Vec<PropertyInfo> {
        self.inner.state.lock().properties.clone()
    }

    /// 缓存值优先，其次是声明的默认值
    pub fn get_property(&self, name: &str) -> Option<ScriptValue> {
        let state = self.inner.state.lock();
        if let Some(value) = state.values.get(name) {
            return Some(value.clone());
        }
        state
            .properties
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.default.clone())
    }

    /// 只接受声明过的属性
    pub fn set_property(&self, name: &str, value: ScriptValue) -> bool {
        let mut state = self.inner.state.lock();
        let Some(ty) = state.properties.iter().find(|p| p.name == name).map(|p| p.ty) else {
            return false;
        };
        state.values.insert(name.to_string(), ty.coerce(value));
        true
    }

    /// 占位实例不执行脚本，没有任何方法
    pub fn has_method(&self, _name: &str) -> bool {
        false
    }

    /// 被覆盖过的属性值，按声明顺序
    pub fn overridden_values(&self) -> Vec<(String, ScriptValue)> {
        let state = self.inner.state.lock();
        state
            .properties
            .iter()
            .filter_map(|p| {
                state
                    .values
                    .get(&p.name)
                    .map(|value| (p.name.clone(), value.clone()))
            })
            .collect()
    }

    /// 替换属性列表；仍然声明的属性保留已缓存的值
    pub fn update(&self, properties: Vec<PropertyInfo>) {
        let mut state = self.inner.state.lock();
        state
            .values
            .retain(|name, _| properties.iter().any(|p| &p.name == name));
        state.properties = properties;
    }
}

impl fmt::Debug for PlaceholderInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlaceholderInstance")
            .field("object_id", &self.inner.object_id)
            .field("properties", &self.inner.state.lock().properties.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binder::BinderRegistry;
    use crate::classdb::{ClassDescriptorTable, VariantType};
    use crate::config::BinderConfig;

    fn placeholder() -> (Arc<Script>, Arc<HostObject>, PlaceholderInstance) {
        let registry = BinderRegistry::new(
            BinderConfig::default(),
            Arc::new(ClassDescriptorTable::with_builtin_classes()),
        );
        let script = Script::new(registry);
        let host = HostObject::new("Node");
        let placeholder = PlaceholderInstance::new(
            &script,
            &host,
            vec![
                PropertyInfo::new("speed", VariantType::Float, 5.0.into()),
                PropertyInfo::new("label", VariantType::String, "a".into()),
            ],
        );
        (script, host, placeholder)
    }

    #[test]
    fn test_defaults_and_overrides() {
        let (_script, _host, placeholder) = placeholder();
        assert_eq!(placeholder.get_property("speed"), Some(ScriptValue::Float(5.0)));
        assert!(placeholder.set_property("speed", ScriptValue::Int(8)));
        assert_eq!(placeholder.get_property("speed"), Some(ScriptValue::Float(8.0)));
        assert!(!placeholder.set_property("undeclared", 1.into()));
        assert_eq!(placeholder.get_property("undeclared"), None);
        assert!(!placeholder.has_method("ready"));
    }

    #[test]
    fn test_update_keeps_values_of_retained_properties() {
        let (_script, _host, placeholder) = placeholder();
        placeholder.set_property("speed", 9.0.into());
        placeholder.set_property("label", "b".into());
        placeholder.update(vec![PropertyInfo::new(
            "speed",
            VariantType::Float,
            1.0.into(),
        )]);
        assert_eq!(placeholder.get_property("speed"), Some(ScriptValue::Float(9.0)));
        assert_eq!(placeholder.get_property("label"), None);
        assert_eq!(
            placeholder.overridden_values(),
            vec![("speed".to_string(), ScriptValue::Float(9.0))]
        );
    }
}
