use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::firestore::value::FirestoreValue;

use super::document::DocumentHandle;
use super::reference_array::ReferenceArray;

/// A field of a [`DocumentData`].
///
/// Reference fields hold live document handles; everything else is a raw store value.
#[derive(Clone, Debug)]
pub enum FieldValue {
    Value(FirestoreValue),
    Document(Option<DocumentHandle>),
    DocumentArray(ReferenceArray),
}

impl FieldValue {
    /// Converts handles into raw references suitable for writing.
    pub fn to_store_value(&self) -> FirestoreValue {
        match self {
            FieldValue::Value(value) => value.clone(),
            FieldValue::Document(Some(document)) => document.reference_value(),
            FieldValue::Document(None) => FirestoreValue::null(),
            FieldValue::DocumentArray(array) => FirestoreValue::from_array(
                array
                    .to_vec()
                    .iter()
                    .map(DocumentHandle::reference_value)
                    .collect(),
            ),
        }
    }

    pub fn as_value(&self) -> Option<&FirestoreValue> {
        match self {
            FieldValue::Value(value) => Some(value),
            _ => None,
        }
    }
}

impl From<FirestoreValue> for FieldValue {
    fn from(value: FirestoreValue) -> Self {
        FieldValue::Value(value)
    }
}

impl From<DocumentHandle> for FieldValue {
    fn from(document: DocumentHandle) -> Self {
        FieldValue::Document(Some(document))
    }
}

impl From<&DocumentHandle> for FieldValue {
    fn from(document: &DocumentHandle) -> Self {
        FieldValue::Document(Some(document.clone()))
    }
}

impl From<Option<DocumentHandle>> for FieldValue {
    fn from(document: Option<DocumentHandle>) -> Self {
        FieldValue::Document(document)
    }
}

impl From<ReferenceArray> for FieldValue {
    fn from(array: ReferenceArray) -> Self {
        FieldValue::DocumentArray(array)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Value(FirestoreValue::from_string(value))
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Value(FirestoreValue::from_string(value))
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Value(FirestoreValue::from_integer(value))
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Value(FirestoreValue::from_double(value))
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Value(FirestoreValue::from_bool(value))
    }
}

/// The cached field data of a document.
///
/// Reference arrays inside a document's own data are the live arrays of its
/// trackers, so clones observe later snapshot updates of those fields.
#[derive(Clone, Debug, Default)]
pub struct DocumentData {
    id: Option<String>,
    fields: BTreeMap<String, FieldValue>,
}

impl DocumentData {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_raw(id: &str, fields: &BTreeMap<String, FirestoreValue>) -> Self {
        Self {
            id: Some(id.to_owned()),
            fields: fields
                .iter()
                .map(|(name, value)| (name.clone(), FieldValue::Value(value.clone())))
                .collect(),
        }
    }

    /// Id of the document this data belongs to; stamped locally, never stored as a field.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub(crate) fn stamp_id(&mut self, id: &str) {
        self.id = Some(id.to_owned());
    }

    pub(crate) fn fields_mut(&mut self) -> &mut BTreeMap<String, FieldValue> {
        &mut self.fields
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<FieldValue>) {
        self.fields.insert(name.into(), value.into());
    }

    pub fn remove(&mut self, name: &str) -> Option<FieldValue> {
        self.fields.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Raw value of a plain field.
    pub fn value(&self, name: &str) -> Option<&FirestoreValue> {
        self.get(name).and_then(FieldValue::as_value)
    }

    /// Linked handle of a single-reference field.
    pub fn document(&self, name: &str) -> Option<DocumentHandle> {
        match self.get(name) {
            Some(FieldValue::Document(document)) => document.clone(),
            _ => None,
        }
    }

    /// Reference array of an array-reference field.
    pub fn documents(&self, name: &str) -> Option<&ReferenceArray> {
        match self.get(name) {
            Some(FieldValue::DocumentArray(array)) => Some(array),
            _ => None,
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Fields with every handle replaced by its raw reference.
    pub fn to_store_map(&self) -> BTreeMap<String, FirestoreValue> {
        self.fields
            .iter()
            .map(|(name, value)| (name.clone(), value.to_store_value()))
            .collect()
    }

    /// JSON rendering of [`DocumentData::to_store_map`]; references render as document paths.
    pub fn to_json(&self) -> Value {
        let map: Map<String, Value> = self
            .to_store_map()
            .iter()
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect();
        Value::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accessors_follow_field_kind() {
        let data = DocumentData::new()
            .with("name", "Alpha")
            .with("population", 120_i64)
            .with("owner", None::<DocumentHandle>);

        assert_eq!(data.value("name"), Some(&FirestoreValue::from_string("Alpha")));
        assert!(data.document("owner").is_none());
        assert!(data.documents("name").is_none());
        assert_eq!(data.len(), 3);
        assert!(data.id().is_none());
    }

    #[test]
    fn store_map_turns_empty_reference_into_null() {
        let data = DocumentData::new()
            .with("owner", None::<DocumentHandle>)
            .with("members", ReferenceArray::new());
        let map = data.to_store_map();
        assert!(map["owner"].is_null());
        assert_eq!(map["members"], FirestoreValue::from_array(Vec::new()));
    }

    #[test]
    fn json_rendering() {
        let mut data = DocumentData::new().with("name", "Alpha").with("active", true);
        data.stamp_id("v1");
        assert_eq!(data.to_json(), json!({"active": true, "name": "Alpha"}));
        assert_eq!(data.id(), Some("v1"));
    }
}
