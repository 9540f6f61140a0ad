//! Declarative descriptor tables for collections.
//!
//! A [`CollectionSchema`] is built once per document type and tells document
//! handles which fields hold references and which nested collections exist.

use std::collections::BTreeMap;
use std::sync::Arc;

/// How a declared field is routed when a snapshot is applied.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FieldKind {
    Plain,
    /// A single reference into the collection at `collection_path` (from the database root).
    Reference { collection_path: String },
    /// An ordered reference list into the collection at `collection_path`.
    ReferenceArray { collection_path: String },
}

#[derive(Clone, Debug, PartialEq)]
pub struct CollectionSchema {
    type_name: String,
    fields: BTreeMap<String, FieldKind>,
    collections: BTreeMap<String, Arc<CollectionSchema>>,
}

impl CollectionSchema {
    /// `type_name` names the document type in diagnostics.
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            fields: BTreeMap::new(),
            collections: BTreeMap::new(),
        }
    }

    pub fn field(mut self, name: impl Into<String>) -> Self {
        self.fields.insert(name.into(), FieldKind::Plain);
        self
    }

    pub fn reference(mut self, name: impl Into<String>, collection_path: impl Into<String>) -> Self {
        self.fields.insert(
            name.into(),
            FieldKind::Reference {
                collection_path: collection_path.into(),
            },
        );
        self
    }

    pub fn reference_array(
        mut self,
        name: impl Into<String>,
        collection_path: impl Into<String>,
    ) -> Self {
        self.fields.insert(
            name.into(),
            FieldKind::ReferenceArray {
                collection_path: collection_path.into(),
            },
        );
        self
    }

    /// Declares a collection nested under every document of this type.
    pub fn collection(mut self, name: impl Into<String>, schema: CollectionSchema) -> Self {
        self.collections.insert(name.into(), Arc::new(schema));
        self
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn field_kind(&self, name: &str) -> Option<&FieldKind> {
        self.fields.get(name)
    }

    pub fn is_declared(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldKind)> {
        self.fields.iter().map(|(name, kind)| (name.as_str(), kind))
    }

    pub(crate) fn collections(&self) -> impl Iterator<Item = (&str, &Arc<CollectionSchema>)> {
        self.collections
            .iter()
            .map(|(name, schema)| (name.as_str(), schema))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_descriptor_table() {
        let schema = CollectionSchema::new("Village")
            .field("name")
            .reference("owner", "users")
            .reference_array("members", "users")
            .collection("wells", CollectionSchema::new("Well").field("depth"));

        assert_eq!(schema.type_name(), "Village");
        assert_eq!(schema.field_kind("name"), Some(&FieldKind::Plain));
        assert_eq!(
            schema.field_kind("members"),
            Some(&FieldKind::ReferenceArray {
                collection_path: "users".into()
            })
        );
        assert!(!schema.is_declared("unknown"));
        let nested: Vec<_> = schema.collections().map(|(name, _)| name).collect();
        assert_eq!(nested, vec!["wells"]);
    }
}
