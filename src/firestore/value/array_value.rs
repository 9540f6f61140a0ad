use crate::firestore::value::FirestoreValue;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ArrayValue {
    values: Vec<FirestoreValue>,
}

impl ArrayValue {
    pub fn new(values: Vec<FirestoreValue>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[FirestoreValue] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn contains(&self, needle: &FirestoreValue) -> bool {
        self.values.iter().any(|candidate| candidate == needle)
    }

    /// Returns the referenced paths when every element is a reference.
    ///
    /// An empty array qualifies; a single non-reference element disqualifies the whole array.
    pub fn reference_paths(&self) -> Option<Vec<&str>> {
        self.values.iter().map(FirestoreValue::as_reference).collect()
    }

    /// Appends each element that is not already present.
    pub fn union_with(&self, elements: &[FirestoreValue]) -> Self {
        let mut values = self.values.clone();
        for element in elements {
            if !values.contains(element) {
                values.push(element.clone());
            }
        }
        Self { values }
    }

    /// Removes every occurrence of each element.
    pub fn remove_all(&self, elements: &[FirestoreValue]) -> Self {
        let values = self
            .values
            .iter()
            .filter(|value| !elements.contains(value))
            .cloned()
            .collect();
        Self { values }
    }

    pub fn into_values(self) -> Vec<FirestoreValue> {
        self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn union_skips_present_elements() {
        let array = ArrayValue::new(vec![FirestoreValue::from_integer(1)]);
        let merged = array.union_with(&[
            FirestoreValue::from_integer(1),
            FirestoreValue::from_integer(2),
            FirestoreValue::from_integer(2),
        ]);
        assert_eq!(
            merged.values(),
            &[FirestoreValue::from_integer(1), FirestoreValue::from_integer(2)]
        );
    }

    #[test]
    fn remove_drops_duplicates() {
        let array = ArrayValue::new(vec![
            FirestoreValue::from_string("a"),
            FirestoreValue::from_string("b"),
            FirestoreValue::from_string("a"),
        ]);
        let trimmed = array.remove_all(&[FirestoreValue::from_string("a")]);
        assert_eq!(trimmed.values(), &[FirestoreValue::from_string("b")]);
    }

    #[test]
    fn reference_paths_require_all_references() {
        assert_eq!(ArrayValue::default().reference_paths(), Some(vec![]));
        let mixed = ArrayValue::new(vec![
            FirestoreValue::from_reference("users/a"),
            FirestoreValue::from_string("users/b"),
        ]);
        assert_eq!(mixed.reference_paths(), None);
    }
}
