use crate::firestore::constants::MAX_IN_FILTER_VALUES;
use crate::firestore::error::{invalid_argument, FirestoreResult};
use crate::firestore::model::{DocumentKey, FieldPath, IntoFieldPath, ResourcePath};
use crate::firestore::value::{FirestoreValue, ValueKind};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterOperator {
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    ArrayContains,
    ArrayContainsAny,
    In,
    NotIn,
}

impl FilterOperator {
    fn takes_value_list(self) -> bool {
        matches!(
            self,
            FilterOperator::In | FilterOperator::NotIn | FilterOperator::ArrayContainsAny
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OrderDirection {
    Ascending,
    Descending,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FieldFilter {
    field: FieldPath,
    operator: FilterOperator,
    value: FirestoreValue,
}

impl FieldFilter {
    pub fn field(&self) -> &FieldPath {
        &self.field
    }

    pub fn operator(&self) -> FilterOperator {
        self.operator
    }

    pub fn value(&self) -> &FirestoreValue {
        &self.value
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct OrderBy {
    field: FieldPath,
    direction: OrderDirection,
}

impl OrderBy {
    pub fn field(&self) -> &FieldPath {
        &self.field
    }

    pub fn direction(&self) -> OrderDirection {
        self.direction
    }
}

/// A query over the documents directly inside one collection.
///
/// Queries are immutable; every builder method returns a new query.
#[derive(Clone, Debug, PartialEq)]
pub struct Query {
    collection_path: ResourcePath,
    filters: Vec<FieldFilter>,
    order_by: Vec<OrderBy>,
    limit: Option<u32>,
}

impl Query {
    pub fn new(collection_path: ResourcePath) -> FirestoreResult<Self> {
        if !collection_path.is_collection() {
            return Err(invalid_argument(
                "Queries must reference a collection (odd number of path segments)",
            ));
        }
        Ok(Self {
            collection_path,
            filters: Vec::new(),
            order_by: Vec::new(),
            limit: None,
        })
    }

    pub fn collection_path(&self) -> &ResourcePath {
        &self.collection_path
    }

    pub fn filters(&self) -> &[FieldFilter] {
        &self.filters
    }

    pub fn order_by_clauses(&self) -> &[OrderBy] {
        &self.order_by
    }

    pub fn limit_value(&self) -> Option<u32> {
        self.limit
    }

    /// Adds a field filter.
    ///
    /// Filters on [`FieldPath::document_id`] compare reference values; plain
    /// string ids are resolved against this query's collection.
    pub fn where_field(
        &self,
        field: impl IntoFieldPath,
        operator: FilterOperator,
        value: FirestoreValue,
    ) -> FirestoreResult<Self> {
        let field = field.into_field_path()?;
        if operator.takes_value_list() {
            let Some(values) = value.as_array() else {
                return Err(invalid_argument(format!(
                    "Filter operator {operator:?} requires an array value"
                )));
            };
            if values.is_empty() || values.len() > MAX_IN_FILTER_VALUES {
                return Err(invalid_argument(format!(
                    "Filter operator {operator:?} supports between 1 and {MAX_IN_FILTER_VALUES} values, got {}",
                    values.len()
                )));
            }
        }
        let value = if field.is_document_id() {
            self.normalize_document_id_value(value)?
        } else {
            value
        };
        let mut next = self.clone();
        next.filters.push(FieldFilter {
            field,
            operator,
            value,
        });
        Ok(next)
    }

    pub fn order_by(
        &self,
        field: impl IntoFieldPath,
        direction: OrderDirection,
    ) -> FirestoreResult<Self> {
        let field = field.into_field_path()?;
        let mut next = self.clone();
        next.order_by.push(OrderBy { field, direction });
        Ok(next)
    }

    pub fn limit(&self, limit: u32) -> Self {
        let mut next = self.clone();
        next.limit = Some(limit);
        next
    }

    /// Whether `key` names a document directly inside the queried collection.
    pub fn matches_collection(&self, key: &DocumentKey) -> bool {
        key.collection_path() == self.collection_path
    }

    fn normalize_document_id_value(&self, value: FirestoreValue) -> FirestoreResult<FirestoreValue> {
        match value.kind() {
            ValueKind::Array(values) => Ok(FirestoreValue::from_array(
                values
                    .values()
                    .iter()
                    .cloned()
                    .map(|item| self.normalize_document_id_value(item))
                    .collect::<FirestoreResult<Vec<_>>>()?,
            )),
            ValueKind::String(id) => {
                let key = DocumentKey::in_collection(&self.collection_path, id)?;
                Ok(FirestoreValue::from_reference(key.path().canonical_string()))
            }
            ValueKind::Reference(_) => Ok(value),
            _ => Err(invalid_argument(
                "Document id filters require document ids or references",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users() -> Query {
        Query::new(ResourcePath::from_string("users").unwrap()).unwrap()
    }

    #[test]
    fn rejects_document_paths() {
        let path = ResourcePath::from_string("users/alice").unwrap();
        assert!(Query::new(path).is_err());
    }

    #[test]
    fn in_filter_limits_cardinality() {
        let values = (0..=MAX_IN_FILTER_VALUES as i64)
            .map(FirestoreValue::from_integer)
            .collect();
        let err = users()
            .where_field("age", FilterOperator::In, FirestoreValue::from_array(values))
            .unwrap_err();
        assert_eq!(err.code_str(), "firestore/invalid-argument");
    }

    #[test]
    fn document_id_strings_become_references() {
        let query = users()
            .where_field(
                FieldPath::document_id(),
                FilterOperator::In,
                FirestoreValue::from_array(vec![FirestoreValue::from_string("alice")]),
            )
            .unwrap();
        assert_eq!(
            query.filters()[0].value(),
            &FirestoreValue::from_array(vec![FirestoreValue::from_reference("users/alice")])
        );
    }

    #[test]
    fn builders_do_not_mutate_the_source() {
        let base = users();
        let limited = base.limit(3);
        assert_eq!(base.limit_value(), None);
        assert_eq!(limited.limit_value(), Some(3));
    }
}
