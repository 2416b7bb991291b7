//! 类描述符
//!
//! 不可变的类元数据：属性、方法、信号。宿主基类在启动时注册，
//! 脚本类在编译成功时生成，之后只读共享给所有 Binder。

use serde::{Deserialize, Serialize};

use crate::script::ScriptValue;

/// 属性的声明类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariantType {
    Nil,
    Bool,
    Int,
    Float,
    String,
    Array,
    Dictionary,
    /// 任意类型
    Variant,
}

impl VariantType {
    /// 按名称解析，未知名称视为任意类型
    pub fn parse(name: &str) -> Self {
        match name {
            "nil" | "null" => VariantType::Nil,
            "bool" | "boolean" => VariantType::Bool,
            "int" | "integer" => VariantType::Int,
            "float" | "real" | "number" => VariantType::Float,
            "string" | "String" => VariantType::String,
            "array" | "Array" => VariantType::Array,
            "dictionary" | "object" | "Dictionary" => VariantType::Dictionary,
            _ => VariantType::Variant,
        }
    }

    /// 值的运行时类型
    pub fn of(value: &ScriptValue) -> Self {
        match value {
            ScriptValue::Null => VariantType::Nil,
            ScriptValue::Bool(_) => VariantType::Bool,
            ScriptValue::Int(_) => VariantType::Int,
            ScriptValue::Float(_) => VariantType::Float,
            ScriptValue::String(_) => VariantType::String,
            ScriptValue::Array(_) => VariantType::Array,
            ScriptValue::Dictionary(_) => VariantType::Dictionary,
        }
    }

    /// 两个声明类型之间能否直接迁移值
    pub fn is_compatible_with(&self, other: VariantType) -> bool {
        *self == other
            || *self == VariantType::Variant
            || other == VariantType::Variant
            || matches!(
                (self, other),
                (VariantType::Int, VariantType::Float) | (VariantType::Float, VariantType::Int)
            )
    }

    /// 把 JS 数值收敛到声明类型上（JS 只有一种 number）
    pub fn coerce(&self, value: ScriptValue) -> ScriptValue {
        match (self, value) {
            (VariantType::Float, ScriptValue::Int(i)) => ScriptValue::Float(i as f64),
            (VariantType::Int, ScriptValue::Float(f)) if f.fract() == 0.0 => {
                ScriptValue::Int(f as i64)
            }
            (_, value) => value,
        }
    }
}

/// 属性描述
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: VariantType,
    #[serde(default)]
    pub default: ScriptValue,
}

impl PropertyInfo {
    pub fn new(name: impl Into<String>, ty: VariantType, default: ScriptValue) -> Self {
        let default = ty.coerce(default);
        Self {
            name: name.into(),
            ty,
            default,
        }
    }
}

/// 方法签名
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodInfo {
    pub name: String,
    #[serde(default)]
    pub arguments: Vec<String>,
}

impl MethodInfo {
    pub fn new(name: impl Into<String>, arguments: &[&str]) -> Self {
        Self {
            name: name.into(),
            arguments: arguments.iter().map(|a| a.to_string()).collect(),
        }
    }
}

/// 信号签名
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalInfo {
    pub name: String,
    #[serde(default)]
    pub arguments: Vec<String>,
}

impl SignalInfo {
    pub fn new(name: impl Into<String>, arguments: &[&str]) -> Self {
        Self {
            name: name.into(),
            arguments: arguments.iter().map(|a| a.to_string()).collect(),
        }
    }
}

/// 类描述符
///
/// 属性、方法按声明顺序保存。注册后不再修改，重载会生成新的描述符。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassDescriptor {
    pub class_name: String,
    /// 基类名，根类为空字符串
    #[serde(default)]
    pub base_type: String,
    #[serde(default)]
    pub properties: Vec<PropertyInfo>,
    #[serde(default)]
    pub methods: Vec<MethodInfo>,
    #[serde(default)]
    pub signals: Vec<SignalInfo>,
    /// 工具脚本（编辑器中也执行）
    #[serde(default)]
    pub tool: bool,
}

impl ClassDescriptor {
    pub fn new(class_name: impl Into<String>, base_type: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            base_type: base_type.into(),
            properties: Vec::new(),
            methods: Vec::new(),
            signals: Vec::new(),
            tool: false,
        }
    }

    pub fn with_property(mut self, name: &str, ty: VariantType, default: ScriptValue) -> Self {
        self.properties.push(PropertyInfo::new(name, ty, default));
        self
    }

    pub fn with_method(mut self, name: &str, arguments: &[&str]) -> Self {
        self.methods.push(MethodInfo::new(name, arguments));
        self
    }

    pub fn with_signal(mut self, name: &str, arguments: &[&str]) -> Self {
        self.signals.push(SignalInfo::new(name, arguments));
        self
    }

    pub fn property(&self, name: &str) -> Option<&PropertyInfo> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn has_property(&self, name: &str) -> bool {
        self.property(name).is_some()
    }

    pub fn property_default(&self, name: &str) -> Option<ScriptValue> {
        self.property(name).map(|p| p.default.clone())
    }

    pub fn method(&self, name: &str) -> Option<&MethodInfo> {
        self.methods.iter().find(|m| m.name == name)
    }

    pub fn has_method(&self, name: &str) -> bool {
        self.method(name).is_some()
    }

    pub fn signal(&self, name: &str) -> Option<&SignalInfo> {
        self.signals.iter().find(|s| s.name == name)
    }

    pub fn has_signal(&self, name: &str) -> bool {
        self.signal(name).is_some()
    }

    pub fn property_names(&self) -> impl Iterator<Item = &str> {
        self.properties.iter().map(|p| p.name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_keeps_declaration_order() {
        let desc = ClassDescriptor::new("Player", "Node")
            .with_property("speed", VariantType::Float, 100.into())
            .with_property("label", VariantType::String, "hero".into())
            .with_method("move_by", &["dx"])
            .with_signal("died", &[]);

        let names: Vec<_> = desc.property_names().collect();
        assert_eq!(names, ["speed", "label"]);
        assert!(desc.has_method("move_by"));
        assert!(!desc.has_method("speed"));
        assert!(desc.has_signal("died"));
    }

    #[test]
    fn test_default_coerced_to_declared_type() {
        let desc = ClassDescriptor::new("Player", "Node").with_property(
            "speed",
            VariantType::Float,
            ScriptValue::Int(100),
        );
        assert_eq!(desc.property_default("speed"), Some(ScriptValue::Float(100.0)));
    }

    #[test]
    fn test_type_compatibility() {
        assert!(VariantType::Int.is_compatible_with(VariantType::Float));
        assert!(VariantType::Variant.is_compatible_with(VariantType::Array));
        assert!(!VariantType::Int.is_compatible_with(VariantType::Dictionary));
        assert!(!VariantType::String.is_compatible_with(VariantType::Array));
    }

    #[test]
    fn test_deserialize_from_engine_report() {
        let json = r#"{
            "class_name": "Enemy",
            "base_type": "Node2D",
            "properties": [{"name": "hp", "type": "int", "default": 3}],
            "methods": [{"name": "hit", "arguments": ["amount"]}],
            "signals": [{"name": "died"}]
        }"#;
        let desc: ClassDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(desc.property_default("hp"), Some(ScriptValue::Int(3)));
        assert_eq!(desc.method("hit").unwrap().arguments, ["amount"]);
        assert!(desc.signal("died").unwrap().arguments.is_empty());
        assert!(!desc.tool);
    }
}
