//! 脚本值类型
//!
//! 宿主与脚本引擎之间传递的通用数据。跨越引擎边界时以 JSON 表示。

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// 脚本值 - 跨语言的通用数据类型
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum ScriptValue {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(Vec<ScriptValue>),
    Dictionary(BTreeMap<String, ScriptValue>),
}

impl ScriptValue {
    pub fn is_null(&self) -> bool {
        matches!(self, ScriptValue::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ScriptValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ScriptValue::Int(i) => Some(*i),
            ScriptValue::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ScriptValue::Int(i) => Some(*i as f64),
            ScriptValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ScriptValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// JSON 编码，供引擎侧 `JSON.parse` 使用
    pub fn to_json(&self) -> String {
        serde_json::Value::from(self).to_string()
    }

    /// 从引擎侧 `JSON.stringify` 的结果解码
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        Ok(Self::from(value))
    }
}

impl From<serde_json::Value> for ScriptValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => ScriptValue::Null,
            serde_json::Value::Bool(b) => ScriptValue::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => ScriptValue::Int(i),
                None => ScriptValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => ScriptValue::String(s),
            serde_json::Value::Array(items) => {
                ScriptValue::Array(items.into_iter().map(ScriptValue::from).collect())
            }
            serde_json::Value::Object(map) => ScriptValue::Dictionary(
                map.into_iter()
                    .map(|(k, v)| (k, ScriptValue::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<&ScriptValue> for serde_json::Value {
    fn from(value: &ScriptValue) -> Self {
        match value {
            ScriptValue::Null => serde_json::Value::Null,
            ScriptValue::Bool(b) => serde_json::Value::Bool(*b),
            ScriptValue::Int(i) => serde_json::Value::from(*i),
            // NaN 和无穷大在 JSON 中没有表示，按 JS 的 JSON.stringify 规则转为 null
            ScriptValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            ScriptValue::String(s) => serde_json::Value::String(s.clone()),
            ScriptValue::Array(items) => {
                serde_json::Value::Array(items.iter().map(serde_json::Value::from).collect())
            }
            ScriptValue::Dictionary(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), serde_json::Value::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<bool> for ScriptValue {
    fn from(value: bool) -> Self {
        ScriptValue::Bool(value)
    }
}

impl From<i64> for ScriptValue {
    fn from(value: i64) -> Self {
        ScriptValue::Int(value)
    }
}

impl From<i32> for ScriptValue {
    fn from(value: i32) -> Self {
        ScriptValue::Int(value as i64)
    }
}

impl From<f64> for ScriptValue {
    fn from(value: f64) -> Self {
        ScriptValue::Float(value)
    }
}

impl From<&str> for ScriptValue {
    fn from(value: &str) -> Self {
        ScriptValue::String(value.to_string())
    }
}

impl From<String> for ScriptValue {
    fn from(value: String) -> Self {
        ScriptValue::String(value)
    }
}

impl From<Vec<ScriptValue>> for ScriptValue {
    fn from(value: Vec<ScriptValue>) -> Self {
        ScriptValue::Array(value)
    }
}

impl fmt::Display for ScriptValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptValue::Null => write!(f, "null"),
            ScriptValue::Bool(b) => write!(f, "{}", b),
            ScriptValue::Int(i) => write!(f, "{}", i),
            ScriptValue::Float(v) => write!(f, "{}", v),
            ScriptValue::String(s) => write!(f, "{}", s),
            other => write!(f, "{}", other.to_json()),
        }
    }
}
