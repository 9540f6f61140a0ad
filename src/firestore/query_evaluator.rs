use std::cmp::Ordering;

use crate::firestore::api::{DocumentSnapshot, FieldFilter, FilterOperator, OrderBy, OrderDirection, Query};
use crate::firestore::model::FieldPath;
use crate::firestore::value::{ArrayValue, FirestoreValue, MapValue, ValueKind};

/// Applies the query's filters, ordering and limit to a set of candidate documents.
///
/// Candidates outside the queried collection and missing documents are dropped.
/// Without explicit ordering the result follows document path order.
pub(crate) fn apply_query_to_documents(
    documents: Vec<DocumentSnapshot>,
    query: &Query,
) -> Vec<DocumentSnapshot> {
    let mut filtered: Vec<DocumentSnapshot> = documents
        .into_iter()
        .filter(|snapshot| snapshot.exists() && query.matches_collection(snapshot.key()))
        .filter(|snapshot| document_satisfies_filters(snapshot, query.filters()))
        .collect();

    filtered.sort_by(|left, right| {
        compare_snapshots(left, right, query.order_by_clauses())
            .then_with(|| left.key().cmp(right.key()))
    });

    if let Some(limit) = query.limit_value() {
        filtered.truncate(limit as usize);
    }

    filtered
}

fn document_satisfies_filters(snapshot: &DocumentSnapshot, filters: &[FieldFilter]) -> bool {
    filters
        .iter()
        .all(|filter| match get_field_value(snapshot, filter.field()) {
            Some(value) => evaluate_filter(filter, &value),
            None => match filter.operator() {
                FilterOperator::NotEqual => evaluate_filter(filter, &FirestoreValue::null()),
                _ => false,
            },
        })
}

fn evaluate_filter(filter: &FieldFilter, value: &FirestoreValue) -> bool {
    match filter.operator() {
        FilterOperator::Equal => value == filter.value(),
        FilterOperator::NotEqual => value != filter.value(),
        FilterOperator::LessThan => compare_values(value, filter.value()) == Some(Ordering::Less),
        FilterOperator::LessThanOrEqual => matches!(
            compare_values(value, filter.value()),
            Some(Ordering::Less | Ordering::Equal)
        ),
        FilterOperator::GreaterThan => {
            compare_values(value, filter.value()) == Some(Ordering::Greater)
        }
        FilterOperator::GreaterThanOrEqual => matches!(
            compare_values(value, filter.value()),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        FilterOperator::ArrayContains => match value.kind() {
            ValueKind::Array(array) => array.contains(filter.value()),
            _ => false,
        },
        FilterOperator::ArrayContainsAny => match (value.kind(), filter.value().kind()) {
            (ValueKind::Array(array), ValueKind::Array(needles)) => {
                array_contains_any(array, needles)
            }
            _ => false,
        },
        FilterOperator::In => match filter.value().kind() {
            ValueKind::Array(values) => values.contains(value),
            _ => false,
        },
        FilterOperator::NotIn => match filter.value().kind() {
            ValueKind::Array(values) => !value.is_null() && !values.contains(value),
            _ => false,
        },
    }
}

fn get_field_value(snapshot: &DocumentSnapshot, field: &FieldPath) -> Option<FirestoreValue> {
    if field.is_document_id() {
        let path = snapshot.key().path().canonical_string();
        return Some(FirestoreValue::from_reference(path));
    }

    let map = snapshot.map_value()?;
    find_in_map(map, field.segments()).cloned()
}

fn find_in_map<'a>(map: &'a MapValue, segments: &'a [String]) -> Option<&'a FirestoreValue> {
    let (first, rest) = segments.split_first()?;
    let value = map.get(first)?;
    if rest.is_empty() {
        Some(value)
    } else if let ValueKind::Map(child) = value.kind() {
        find_in_map(child, rest)
    } else {
        None
    }
}

fn compare_snapshots(
    left: &DocumentSnapshot,
    right: &DocumentSnapshot,
    order_by: &[OrderBy],
) -> Ordering {
    for order in order_by {
        let left_value = get_field_value(left, order.field()).unwrap_or_else(FirestoreValue::null);
        let right_value =
            get_field_value(right, order.field()).unwrap_or_else(FirestoreValue::null);

        let mut ordering = compare_values(&left_value, &right_value).unwrap_or(Ordering::Equal);
        if order.direction() == OrderDirection::Descending {
            ordering = ordering.reverse();
        }
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

fn compare_values(left: &FirestoreValue, right: &FirestoreValue) -> Option<Ordering> {
    match (left.kind(), right.kind()) {
        (ValueKind::Null, ValueKind::Null) => Some(Ordering::Equal),
        (ValueKind::Boolean(a), ValueKind::Boolean(b)) => Some(a.cmp(b)),
        (ValueKind::Integer(a), ValueKind::Integer(b)) => Some(a.cmp(b)),
        (ValueKind::Double(a), ValueKind::Double(b)) => a.partial_cmp(b),
        (ValueKind::Integer(a), ValueKind::Double(b)) => (*a as f64).partial_cmp(b),
        (ValueKind::Double(a), ValueKind::Integer(b)) => a.partial_cmp(&(*b as f64)),
        (ValueKind::String(a), ValueKind::String(b)) => Some(a.cmp(b)),
        (ValueKind::Reference(a), ValueKind::Reference(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn array_contains_any(array: &ArrayValue, needles: &ArrayValue) -> bool {
    needles.values().iter().any(|needle| array.contains(needle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firestore::model::{DocumentKey, ResourcePath};
    use std::collections::BTreeMap;

    fn wells() -> Query {
        Query::new(ResourcePath::from_string("wells").unwrap()).unwrap()
    }

    fn snapshot_for(path: &str, depth: i64) -> DocumentSnapshot {
        let key = DocumentKey::from_string(path).unwrap();
        let map = BTreeMap::from([("depth".to_string(), FirestoreValue::from_integer(depth))]);
        DocumentSnapshot::new(key, Some(MapValue::new(map)))
    }

    #[test]
    fn applies_limit_and_ordering() {
        let query = wells()
            .order_by("depth", OrderDirection::Ascending)
            .unwrap()
            .limit(2);

        let docs = vec![
            snapshot_for("wells/north", 100),
            snapshot_for("wells/east", 50),
            snapshot_for("wells/west", 75),
        ];

        let result = apply_query_to_documents(docs, &query);
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].id(), "east");
        assert_eq!(result[1].id(), "west");
    }

    #[test]
    fn document_id_in_filter_matches_by_reference() {
        let ids = vec![
            FirestoreValue::from_string("west"),
            FirestoreValue::from_string("north"),
        ];
        let query = wells()
            .where_field(
                FieldPath::document_id(),
                FilterOperator::In,
                FirestoreValue::from_array(ids),
            )
            .unwrap();

        let docs = vec![
            snapshot_for("wells/north", 100),
            snapshot_for("wells/east", 50),
            snapshot_for("wells/west", 75),
        ];

        let ids: Vec<_> = apply_query_to_documents(docs, &query)
            .iter()
            .map(|snapshot| snapshot.id().to_string())
            .collect();
        assert_eq!(ids, vec!["north", "west"]);
    }

    #[test]
    fn ignores_documents_from_other_collections() {
        let docs = vec![
            snapshot_for("wells/north", 1),
            snapshot_for("villages/v1/wells/south", 2),
        ];
        let result = apply_query_to_documents(docs, &wells());
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].id(), "north");
    }
}
