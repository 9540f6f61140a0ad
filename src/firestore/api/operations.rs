use std::collections::BTreeMap;

use crate::firestore::error::{invalid_argument, FirestoreResult};
use crate::firestore::model::FieldPath;
use crate::firestore::value::{FirestoreValue, MapValue, SentinelValue, ValueKind};

/// Pre-encoded data for `set` style writes.
#[derive(Clone, Debug)]
pub struct EncodedSetData {
    pub map: MapValue,
    pub transforms: Vec<FieldTransform>,
}

/// Pre-encoded data for `update` style writes.
#[derive(Clone, Debug)]
pub struct EncodedUpdateData {
    pub map: MapValue,
    pub field_paths: Vec<FieldPath>,
    pub transforms: Vec<FieldTransform>,
}

/// Describes a single field transform applied during a write.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldTransform {
    field_path: FieldPath,
    operation: TransformOperation,
}

impl FieldTransform {
    pub fn new(field_path: FieldPath, operation: TransformOperation) -> Self {
        Self {
            field_path,
            operation,
        }
    }

    pub fn field_path(&self) -> &FieldPath {
        &self.field_path
    }

    pub fn operation(&self) -> &TransformOperation {
        &self.operation
    }
}

/// Write-time sentinel operations supported by the store.
#[derive(Clone, Debug, PartialEq)]
pub enum TransformOperation {
    ArrayUnion(Vec<FirestoreValue>),
    ArrayRemove(Vec<FirestoreValue>),
    NumericIncrement(FirestoreValue),
}

impl TransformOperation {
    /// Computes the value a field holds after applying this transform to `current`.
    pub fn apply(&self, current: Option<&FirestoreValue>) -> FirestoreValue {
        match self {
            TransformOperation::ArrayUnion(elements) => {
                let base = current.and_then(FirestoreValue::as_array).cloned().unwrap_or_default();
                FirestoreValue::from_array(base.union_with(elements).into_values())
            }
            TransformOperation::ArrayRemove(elements) => {
                let base = current.and_then(FirestoreValue::as_array).cloned().unwrap_or_default();
                FirestoreValue::from_array(base.remove_all(elements).into_values())
            }
            TransformOperation::NumericIncrement(operand) => {
                let current = current.map(FirestoreValue::kind);
                match (current, operand.kind()) {
                    (Some(ValueKind::Integer(a)), ValueKind::Integer(b)) => {
                        FirestoreValue::from_integer(a.saturating_add(*b))
                    }
                    (Some(ValueKind::Integer(a)), ValueKind::Double(b)) => {
                        FirestoreValue::from_double(*a as f64 + b)
                    }
                    (Some(ValueKind::Double(a)), ValueKind::Integer(b)) => {
                        FirestoreValue::from_double(a + *b as f64)
                    }
                    (Some(ValueKind::Double(a)), ValueKind::Double(b)) => {
                        FirestoreValue::from_double(a + b)
                    }
                    _ => operand.clone(),
                }
            }
        }
    }
}

pub fn encode_set_data(data: BTreeMap<String, FirestoreValue>) -> FirestoreResult<EncodedSetData> {
    let (sanitized, transforms) = sanitize_for_write(data)?;
    Ok(EncodedSetData {
        map: MapValue::new(sanitized),
        transforms,
    })
}

pub fn encode_update_document_data(
    data: BTreeMap<String, FirestoreValue>,
) -> FirestoreResult<EncodedUpdateData> {
    let (sanitized, transforms) = sanitize_for_write(data)?;
    if sanitized.is_empty() && transforms.is_empty() {
        return Err(invalid_argument(
            "update requires at least one field/value pair",
        ));
    }
    let field_paths = collect_update_paths(&sanitized)?;
    Ok(EncodedUpdateData {
        map: MapValue::new(sanitized),
        field_paths,
        transforms,
    })
}

fn sanitize_for_write(
    data: BTreeMap<String, FirestoreValue>,
) -> FirestoreResult<(BTreeMap<String, FirestoreValue>, Vec<FieldTransform>)> {
    let mut transforms = Vec::new();
    let sanitized = sanitize_map(&data, &[], &mut transforms)?;
    Ok((sanitized, transforms))
}

fn sanitize_map(
    data: &BTreeMap<String, FirestoreValue>,
    parent_segments: &[String],
    transforms: &mut Vec<FieldTransform>,
) -> FirestoreResult<BTreeMap<String, FirestoreValue>> {
    let mut cleaned = BTreeMap::new();
    for (key, value) in data {
        let mut segments = parent_segments.to_vec();
        segments.push(key.clone());
        let field_path = FieldPath::new(segments.clone())?;
        match value.kind() {
            ValueKind::Sentinel(sentinel) => {
                validate_sentinel_usage(sentinel, &field_path)?;
                transforms.push(transform_from_sentinel(field_path, sentinel.clone()));
            }
            ValueKind::Map(map) => {
                let nested = sanitize_map(map.fields(), &segments, transforms)?;
                cleaned.insert(key.clone(), FirestoreValue::from_map(nested));
            }
            ValueKind::Array(_) => {
                assert_no_sentinel_in_value(value, &field_path)?;
                cleaned.insert(key.clone(), value.clone());
            }
            _ => {
                cleaned.insert(key.clone(), value.clone());
            }
        }
    }
    Ok(cleaned)
}

fn validate_sentinel_usage(
    sentinel: &SentinelValue,
    field_path: &FieldPath,
) -> FirestoreResult<()> {
    match sentinel {
        SentinelValue::ArrayUnion(elements) | SentinelValue::ArrayRemove(elements) => {
            for element in elements {
                assert_no_sentinel_in_value(element, field_path)?;
            }
            Ok(())
        }
        SentinelValue::NumericIncrement(operand) => match operand.as_ref().kind() {
            ValueKind::Integer(_) | ValueKind::Double(_) => Ok(()),
            _ => Err(invalid_argument(
                "numeric_increment() requires a numeric operand",
            )),
        },
    }
}

fn transform_from_sentinel(field_path: FieldPath, sentinel: SentinelValue) -> FieldTransform {
    let operation = match sentinel {
        SentinelValue::ArrayUnion(elements) => TransformOperation::ArrayUnion(elements),
        SentinelValue::ArrayRemove(elements) => TransformOperation::ArrayRemove(elements),
        SentinelValue::NumericIncrement(operand) => TransformOperation::NumericIncrement(*operand),
    };
    FieldTransform::new(field_path, operation)
}

fn assert_no_sentinel_in_value(value: &FirestoreValue, context: &FieldPath) -> FirestoreResult<()> {
    match value.kind() {
        ValueKind::Sentinel(_) => Err(invalid_argument(format!(
            "Invalid data. Sentinel values cannot be used inside arrays (field '{}').",
            context.canonical_string()
        ))),
        ValueKind::Array(array) => {
            for element in array.values() {
                assert_no_sentinel_in_value(element, context)?;
            }
            Ok(())
        }
        ValueKind::Map(map) => {
            for element in map.fields().values() {
                assert_no_sentinel_in_value(element, context)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn collect_update_paths(
    data: &BTreeMap<String, FirestoreValue>,
) -> FirestoreResult<Vec<FieldPath>> {
    let mut paths = Vec::new();
    for key in data.keys() {
        paths.push(FieldPath::new([key.clone()])?);
    }
    Ok(paths)
}

pub(crate) fn value_for_field_path(map: &MapValue, path: &FieldPath) -> Option<FirestoreValue> {
    value_for_segments(map, path.segments())
}

fn value_for_segments(map: &MapValue, segments: &[String]) -> Option<FirestoreValue> {
    let (first, rest) = segments.split_first()?;
    let value = map.get(first)?;
    if rest.is_empty() {
        Some(value.clone())
    } else if let ValueKind::Map(child) = value.kind() {
        value_for_segments(child, rest)
    } else {
        None
    }
}

pub(crate) fn set_value_at_field_path(
    fields: &mut BTreeMap<String, FirestoreValue>,
    path: &FieldPath,
    value: FirestoreValue,
) {
    set_value_at_segments(fields, path.segments(), value);
}

fn set_value_at_segments(
    fields: &mut BTreeMap<String, FirestoreValue>,
    segments: &[String],
    value: FirestoreValue,
) {
    let Some((first, rest)) = segments.split_first() else {
        return;
    };

    if rest.is_empty() {
        fields.insert(first.clone(), value);
        return;
    }

    let entry = fields
        .entry(first.clone())
        .or_insert_with(|| FirestoreValue::from_map(BTreeMap::new()));

    let mut child_fields = match entry.kind() {
        ValueKind::Map(map) => map.fields().clone(),
        _ => BTreeMap::new(),
    };

    set_value_at_segments(&mut child_fields, rest, value);
    *entry = FirestoreValue::from_map(child_fields);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference(path: &str) -> FirestoreValue {
        FirestoreValue::from_reference(path)
    }

    #[test]
    fn update_with_only_transform_is_allowed() {
        let mut data = BTreeMap::new();
        data.insert(
            "members".to_string(),
            FirestoreValue::array_union(vec![reference("users/a")]),
        );
        let encoded = encode_update_document_data(data).unwrap();
        assert!(encoded.map.fields().is_empty());
        assert!(encoded.field_paths.is_empty());
        assert_eq!(encoded.transforms.len(), 1);
        assert_eq!(encoded.transforms[0].field_path().canonical_string(), "members");
    }

    #[test]
    fn empty_update_is_rejected() {
        let err = encode_update_document_data(BTreeMap::new()).unwrap_err();
        assert_eq!(err.code_str(), "firestore/invalid-argument");
    }

    #[test]
    fn array_rejects_nested_sentinel() {
        let mut data = BTreeMap::new();
        data.insert(
            "values".to_string(),
            FirestoreValue::from_array(vec![FirestoreValue::array_remove(vec![])]),
        );
        let err = encode_set_data(data).unwrap_err();
        assert_eq!(err.code_str(), "firestore/invalid-argument");
    }

    #[test]
    fn increment_requires_numeric_operand() {
        let mut data = BTreeMap::new();
        data.insert(
            "total".to_string(),
            FirestoreValue::numeric_increment(FirestoreValue::from_string("five")),
        );
        let err = encode_update_document_data(data).unwrap_err();
        assert_eq!(err.code_str(), "firestore/invalid-argument");
    }

    #[test]
    fn array_union_skips_present_values() {
        let current = FirestoreValue::from_array(vec![reference("users/a")]);
        let op = TransformOperation::ArrayUnion(vec![reference("users/a"), reference("users/b")]);
        assert_eq!(
            op.apply(Some(&current)),
            FirestoreValue::from_array(vec![reference("users/a"), reference("users/b")])
        );
    }

    #[test]
    fn array_remove_drops_every_occurrence() {
        let current = FirestoreValue::from_array(vec![
            reference("users/a"),
            reference("users/b"),
            reference("users/a"),
        ]);
        let op = TransformOperation::ArrayRemove(vec![reference("users/a")]);
        assert_eq!(
            op.apply(Some(&current)),
            FirestoreValue::from_array(vec![reference("users/b")])
        );
    }

    #[test]
    fn increment_starts_from_operand_on_missing_field() {
        let op = TransformOperation::NumericIncrement(FirestoreValue::from_integer(2));
        assert_eq!(op.apply(None), FirestoreValue::from_integer(2));
        assert_eq!(
            op.apply(Some(&FirestoreValue::from_integer(3))),
            FirestoreValue::from_integer(5)
        );
    }
}
