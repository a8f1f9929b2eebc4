use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A small sum type standing in for the "ghost" values policy programs see:
/// ordinary JSON-ish scalars/collections plus `Absent`, a totally
/// absorptive sentinel for missing fact keys. Any operation performed on
/// `Absent` yields `Absent` again, and it is falsy everywhere a bool,
/// string, number, or collection would be tested.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    /// Not actually (de)serialized; constructed in-process when a facts
    /// lookup misses.
    #[serde(skip)]
    Absent,
}

impl Value {
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null | Value::Absent => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::Bytes(b) => !b.is_empty(),
            Value::List(l) => !l.is_empty(),
            Value::Map(m) => !m.is_empty(),
        }
    }

    /// Index into a map-shaped value, or a key into a list-shaped value
    /// interpreted as an index. Every miss, and every attempt to index an
    /// `Absent`, yields `Absent` rather than erroring.
    pub fn get(&self, key: &str) -> Value {
        match self {
            Value::Map(m) => m.get(key).cloned().unwrap_or(Value::Absent),
            Value::List(l) => key
                .parse::<usize>()
                .ok()
                .and_then(|i| l.get(i).cloned())
                .unwrap_or(Value::Absent),
            _ => Value::Absent,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Value::Str(s) => s.chars().count(),
            Value::Bytes(b) => b.len(),
            Value::List(l) => l.len(),
            Value::Map(m) => m.len(),
            _ => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_str(&self) -> &str {
        match self {
            Value::Str(s) => s.as_str(),
            _ => "",
        }
    }

    pub fn as_bool(&self) -> bool {
        self.is_truthy()
    }

    pub fn from_json(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => Value::Str(s),
            serde_json::Value::Array(a) => Value::List(a.into_iter().map(Value::from_json).collect()),
            serde_json::Value::Object(o) => {
                Value::Map(o.into_iter().map(|(k, v)| (k, Value::from_json(v))).collect())
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null | Value::Absent => write!(f, ""),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(fl) => write!(f, "{fl}"),
            Value::Str(s) => write!(f, "{s}"),
            Value::Bytes(_) => write!(f, "<bytes>"),
            Value::List(_) => write!(f, "<list>"),
            Value::Map(_) => write!(f, "<map>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_is_falsy_and_absorptive() {
        let v = Value::Absent;
        assert!(!v.is_truthy());
        assert_eq!(v.len(), 0);
        assert!(matches!(v.get("anything"), Value::Absent));
        assert_eq!(v.as_str(), "");
    }

    #[test]
    fn missing_map_key_yields_absent() {
        let m = Value::Map(BTreeMap::new());
        assert!(matches!(m.get("missing"), Value::Absent));
    }

    #[test]
    fn present_values_are_truthy_per_kind() {
        assert!(Value::Int(1).is_truthy());
        assert!(!Value::Int(0).is_truthy());
        assert!(Value::Str("x".into()).is_truthy());
        assert!(!Value::Str(String::new()).is_truthy());
    }
}
