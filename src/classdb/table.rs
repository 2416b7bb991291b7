//! 类描述符表
//!
//! 宿主暴露给脚本的基类元数据。启动时构建一次，之后只读，
//! 以 `Arc` 共享给所有 Binder。

use std::collections::HashMap;
use std::sync::Arc;

use super::descriptor::{ClassDescriptor, VariantType};
use crate::core::{BinderError, BinderResult};
use crate::script::ScriptValue;

/// 宿主类描述符表
#[derive(Debug, Default)]
pub struct ClassDescriptorTable {
    classes: HashMap<String, Arc<ClassDescriptor>>,
    /// 注册顺序，保证父类先于子类
    order: Vec<String>,
}

impl ClassDescriptorTable {
    pub fn builder() -> ClassTableBuilder {
        ClassTableBuilder::default()
    }

    /// 内置的宿主基类集合
    pub fn with_builtin_classes() -> Self {
        // 内置表是静态正确的，构建失败只可能是编程错误
        ClassTableBuilder::with_builtin_classes()
            .build()
            .unwrap_or_default()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<ClassDescriptor>> {
        self.classes.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// 按注册顺序（父类在前）遍历
    pub fn iter(&self) -> impl Iterator<Item = &Arc<ClassDescriptor>> {
        self.order.iter().filter_map(|name| self.classes.get(name))
    }

    /// `class` 是否等于或继承自 `ancestor`
    pub fn is_parent_class(&self, class: &str, ancestor: &str) -> bool {
        let mut current = Some(class);
        while let Some(name) = current {
            if name == ancestor {
                return true;
            }
            current = self
                .classes
                .get(name)
                .map(|desc| desc.base_type.as_str())
                .filter(|base| !base.is_empty());
        }
        false
    }

    /// 从自身到根类的继承链
    pub fn inheritance_chain(&self, class: &str) -> Vec<&str> {
        let mut chain = Vec::new();
        let mut current = self.classes.get(class);
        while let Some(desc) = current {
            chain.push(desc.class_name.as_str());
            current = self.classes.get(&desc.base_type);
        }
        chain
    }
}

/// 类描述符表构建器
#[derive(Debug, Default)]
pub struct ClassTableBuilder {
    pending: Vec<ClassDescriptor>,
}

impl ClassTableBuilder {
    /// 从内置类开始构建
    pub fn with_builtin_classes() -> Self {
        Self {
            pending: builtin_classes(),
        }
    }

    pub fn register(mut self, class: ClassDescriptor) -> Self {
        self.pending.push(class);
        self
    }

    /// 校验并冻结
    ///
    /// 类名必须是合法标识符且不重复，基类必须先于子类注册。
    pub fn build(self) -> BinderResult<ClassDescriptorTable> {
        let mut table = ClassDescriptorTable::default();
        for class in self.pending {
            if !is_identifier(&class.class_name) {
                return Err(BinderError::ClassRegistration(format!(
                    "'{}' is not a valid class name",
                    class.class_name
                )));
            }
            if table.classes.contains_key(&class.class_name) {
                return Err(BinderError::ClassRegistration(format!(
                    "class '{}' registered twice",
                    class.class_name
                )));
            }
            if !class.base_type.is_empty() && !table.classes.contains_key(&class.base_type) {
                return Err(BinderError::ClassRegistration(format!(
                    "class '{}' extends unknown class '{}'",
                    class.class_name, class.base_type
                )));
            }
            table.order.push(class.class_name.clone());
            table.classes.insert(class.class_name.clone(), Arc::new(class));
        }
        Ok(table)
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn builtin_classes() -> Vec<ClassDescriptor> {
    vec![
        ClassDescriptor::new("Object", "")
            .with_method("get_class", &[])
            .with_method("notification", &["what"])
            .with_signal("script_changed", &[]),
        ClassDescriptor::new("RefCounted", "Object")
            .with_method("reference", &[])
            .with_method("unreference", &[]),
        ClassDescriptor::new("Resource", "RefCounted")
            .with_property("resource_name", VariantType::String, "".into())
            .with_property("resource_path", VariantType::String, "".into())
            .with_signal("changed", &[]),
        ClassDescriptor::new("Node", "Object")
            .with_property("name", VariantType::String, "".into())
            .with_property("process_priority", VariantType::Int, 0.into())
            .with_method("get_parent", &[])
            .with_method("add_child", &["node"])
            .with_method("queue_free", &[])
            .with_signal("ready", &[])
            .with_signal("tree_entered", &[])
            .with_signal("tree_exiting", &[]),
        ClassDescriptor::new("CanvasItem", "Node")
            .with_property("visible", VariantType::Bool, true.into())
            .with_method("show", &[])
            .with_method("hide", &[])
            .with_signal("draw", &[]),
        ClassDescriptor::new("Node2D", "CanvasItem")
            .with_property(
                "position",
                VariantType::Array,
                ScriptValue::Array(vec![0.0.into(), 0.0.into()]),
            )
            .with_property("rotation", VariantType::Float, 0.0.into())
            .with_method("translate", &["offset"]),
        ClassDescriptor::new("Sprite2D", "Node2D")
            .with_property("frame", VariantType::Int, 0.into())
            .with_signal("frame_changed", &[]),
        ClassDescriptor::new("Control", "CanvasItem")
            .with_property("tooltip_text", VariantType::String, "".into())
            .with_signal("resized", &[]),
        ClassDescriptor::new("Node3D", "Node")
            .with_property(
                "position",
                VariantType::Array,
                ScriptValue::Array(vec![0.0.into(), 0.0.into(), 0.0.into()]),
            )
            .with_method("look_at", &["target", "up"]),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_table_inheritance() {
        let table = ClassDescriptorTable::with_builtin_classes();
        assert!(table.is_parent_class("Sprite2D", "Node"));
        assert!(table.is_parent_class("Node", "Node"));
        assert!(!table.is_parent_class("Node", "Node2D"));
        assert!(!table.is_parent_class("Resource", "Node"));
        assert_eq!(
            table.inheritance_chain("Node2D"),
            ["Node2D", "CanvasItem", "Node", "Object"]
        );
    }

    #[test]
    fn test_iteration_is_parent_first() {
        let table = ClassDescriptorTable::with_builtin_classes();
        let names: Vec<_> = table.iter().map(|c| c.class_name.as_str()).collect();
        let node = names.iter().position(|n| *n == "Node").unwrap();
        let node2d = names.iter().position(|n| *n == "Node2D").unwrap();
        assert!(node < node2d);
        assert_eq!(names[0], "Object");
    }

    #[test]
    fn test_register_custom_class() {
        let table = ClassTableBuilder::with_builtin_classes()
            .register(
                ClassDescriptor::new("Enemy", "Node2D")
                    .with_property("hp", VariantType::Int, 10.into()),
            )
            .build()
            .unwrap();
        assert!(table.is_parent_class("Enemy", "CanvasItem"));
        assert_eq!(
            table.get("Enemy").unwrap().property_default("hp"),
            Some(ScriptValue::Int(10))
        );
    }

    #[test]
    fn test_unknown_base_rejected() {
        let result = ClassDescriptorTable::builder()
            .register(ClassDescriptor::new("Orphan", "Missing"))
            .build();
        assert!(matches!(result, Err(BinderError::ClassRegistration(_))));
    }

    #[test]
    fn test_duplicate_and_bad_names_rejected() {
        let dup = ClassDescriptorTable::builder()
            .register(ClassDescriptor::new("Object", ""))
            .register(ClassDescriptor::new("Object", ""))
            .build();
        assert!(dup.is_err());

        let bad = ClassDescriptorTable::builder()
            .register(ClassDescriptor::new("not-a-name", ""))
            .build();
        assert!(bad.is_err());
    }
}
