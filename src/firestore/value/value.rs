use std::collections::BTreeMap;

use serde_json::{Map, Number, Value};

use crate::firestore::value::{ArrayValue, MapValue};

#[derive(Clone, Debug, PartialEq)]
pub struct FirestoreValue {
    kind: ValueKind,
}

/// Write-time transforms. They are only valid as top level values of an update.
#[derive(Clone, Debug, PartialEq)]
pub enum SentinelValue {
    ArrayUnion(Vec<FirestoreValue>),
    ArrayRemove(Vec<FirestoreValue>),
    NumericIncrement(Box<FirestoreValue>),
}

#[derive(Clone, Debug, PartialEq)]
pub enum ValueKind {
    Null,
    Boolean(bool),
    Integer(i64),
    Double(f64),
    String(String),
    /// Full document path of the referenced document, e.g. `users/alice`.
    Reference(String),
    Array(ArrayValue),
    Map(MapValue),
    Sentinel(SentinelValue),
}

impl FirestoreValue {
    pub fn null() -> Self {
        Self {
            kind: ValueKind::Null,
        }
    }

    pub fn from_bool(value: bool) -> Self {
        Self {
            kind: ValueKind::Boolean(value),
        }
    }

    pub fn from_integer(value: i64) -> Self {
        Self {
            kind: ValueKind::Integer(value),
        }
    }

    pub fn from_double(value: f64) -> Self {
        Self {
            kind: ValueKind::Double(value),
        }
    }

    pub fn from_string(value: impl Into<String>) -> Self {
        Self {
            kind: ValueKind::String(value.into()),
        }
    }

    pub fn from_reference(path: impl Into<String>) -> Self {
        Self {
            kind: ValueKind::Reference(path.into()),
        }
    }

    pub fn from_array(values: Vec<FirestoreValue>) -> Self {
        Self {
            kind: ValueKind::Array(ArrayValue::new(values)),
        }
    }

    pub fn from_map(map: BTreeMap<String, FirestoreValue>) -> Self {
        Self {
            kind: ValueKind::Map(MapValue::new(map)),
        }
    }

    /// Returns a sentinel that unions the provided elements with an existing array field.
    pub fn array_union(elements: Vec<FirestoreValue>) -> Self {
        Self {
            kind: ValueKind::Sentinel(SentinelValue::ArrayUnion(elements)),
        }
    }

    /// Returns a sentinel that removes the provided elements from an existing array field.
    pub fn array_remove(elements: Vec<FirestoreValue>) -> Self {
        Self {
            kind: ValueKind::Sentinel(SentinelValue::ArrayRemove(elements)),
        }
    }

    /// Returns a sentinel that increments the targeted numeric field by `operand`.
    pub fn numeric_increment(operand: FirestoreValue) -> Self {
        Self {
            kind: ValueKind::Sentinel(SentinelValue::NumericIncrement(Box::new(operand))),
        }
    }

    pub fn kind(&self) -> &ValueKind {
        &self.kind
    }

    pub fn is_null(&self) -> bool {
        matches!(self.kind, ValueKind::Null)
    }

    /// Path of the referenced document, when this value is a reference.
    pub fn as_reference(&self) -> Option<&str> {
        match &self.kind {
            ValueKind::Reference(path) => Some(path.as_str()),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&ArrayValue> {
        match &self.kind {
            ValueKind::Array(array) => Some(array),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.kind {
            ValueKind::String(value) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self.kind {
            ValueKind::Integer(value) => Some(value),
            _ => None,
        }
    }

    /// Renders the value as JSON. References become their path string and
    /// sentinels render as `null`.
    pub fn to_json(&self) -> Value {
        match &self.kind {
            ValueKind::Null | ValueKind::Sentinel(_) => Value::Null,
            ValueKind::Boolean(value) => Value::Bool(*value),
            ValueKind::Integer(value) => Value::Number(Number::from(*value)),
            ValueKind::Double(value) => Number::from_f64(*value)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            ValueKind::String(value) | ValueKind::Reference(value) => Value::String(value.clone()),
            ValueKind::Array(array) => {
                Value::Array(array.values().iter().map(FirestoreValue::to_json).collect())
            }
            ValueKind::Map(map) => Value::Object(
                map.fields()
                    .iter()
                    .map(|(key, value)| (key.clone(), value.to_json()))
                    .collect::<Map<String, Value>>(),
            ),
        }
    }

    /// Builds a value from JSON. Strings stay strings; references cannot be
    /// expressed in plain JSON.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => Self::null(),
            Value::Bool(flag) => Self::from_bool(*flag),
            Value::Number(number) => match number.as_i64() {
                Some(integer) => Self::from_integer(integer),
                None => Self::from_double(number.as_f64().unwrap_or_default()),
            },
            Value::String(text) => Self::from_string(text.clone()),
            Value::Array(items) => Self::from_array(items.iter().map(Self::from_json).collect()),
            Value::Object(entries) => Self::from_map(
                entries
                    .iter()
                    .map(|(key, value)| (key.clone(), Self::from_json(value)))
                    .collect(),
            ),
        }
    }
}

impl From<bool> for FirestoreValue {
    fn from(value: bool) -> Self {
        Self::from_bool(value)
    }
}

impl From<i64> for FirestoreValue {
    fn from(value: i64) -> Self {
        Self::from_integer(value)
    }
}

impl From<f64> for FirestoreValue {
    fn from(value: f64) -> Self {
        Self::from_double(value)
    }
}

impl From<&str> for FirestoreValue {
    fn from(value: &str) -> Self {
        Self::from_string(value)
    }
}

impl From<String> for FirestoreValue {
    fn from(value: String) -> Self {
        Self::from_string(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builds_basic_values() {
        let v = FirestoreValue::from_string("hello");
        match v.kind() {
            ValueKind::String(value) => assert_eq!(value, "hello"),
            _ => panic!("unexpected kind"),
        }
        assert_eq!(v.as_str(), Some("hello"));
        assert!(FirestoreValue::null().is_null());
    }

    #[test]
    fn reference_accessor_only_matches_references() {
        let reference = FirestoreValue::from_reference("users/alice");
        assert_eq!(reference.as_reference(), Some("users/alice"));
        assert_eq!(FirestoreValue::from_string("users/alice").as_reference(), None);
    }

    #[test]
    fn json_conversion_keeps_structure() {
        let source = json!({"name": "Hanoi", "population": 8, "tags": ["a", true], "area": 3.5});
        let value = FirestoreValue::from_json(&source);
        assert_eq!(value.to_json(), source);
    }

    #[test]
    fn references_render_as_paths() {
        let value = FirestoreValue::from_array(vec![FirestoreValue::from_reference("users/a")]);
        assert_eq!(value.to_json(), json!(["users/a"]));
    }
}
