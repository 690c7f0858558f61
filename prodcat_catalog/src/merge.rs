//! Deep merge of nested mappings.
//!
//! For every key of the overlay: keys missing from the base are inserted, keys holding a mapping
//! on both sides are merged recursively, and in every other case the overlay value replaces the
//! base value wholesale. Sequences are never concatenated.
//!
//! Both inputs are borrowed and a new mapping is returned, so a caller that retries after a
//! conflict always merges against freshly read state.

use crate::value::{Mapping, Value};

/// Merge `overlay` into `base`.
pub fn merge(base: &Mapping, overlay: &Mapping) -> Mapping {
    let mut merged = base.clone();
    for (key, incoming) in overlay {
        let next = match (merged.get(key), incoming) {
            (Some(Value::Mapping(existing)), Value::Mapping(incoming)) => {
                Value::Mapping(merge(existing, incoming))
            }
            _ => incoming.clone(),
        };
        merged.insert(key.clone(), next);
    }
    merged
}

/// Merge two arbitrary values. Only a pair of mappings is combined, anything else is replaced by
/// `overlay`.
pub fn merge_values(base: &Value, overlay: &Value) -> Value {
    match (base, overlay) {
        (Value::Mapping(base), Value::Mapping(overlay)) => Value::Mapping(merge(base, overlay)),
        _ => overlay.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn mapping(document: &str) -> Mapping {
        match Value::from_yaml_str(document).unwrap() {
            Value::Mapping(mapping) => mapping,
            Value::Null => Mapping::new(),
            other => panic!("not a mapping: {other:?}"),
        }
    }

    #[test]
    fn inserts_missing_keys() {
        let merged = merge(&mapping("chart: a"), &mapping("artifact: b"));
        assert_eq!(merged, mapping("chart: a\nartifact: b"));
    }

    #[test]
    fn merges_nested_mappings() {
        let base = mapping(
            r#"
component_versions:
  docker:
    - name: a
      version: 1
  helm:
    - name: chart
      version: 2
configuration:
  commit: abc
"#,
        );
        let overlay = mapping(
            r#"
component_versions:
  docker:
    - name: b
      version: 3
configuration:
  import_branch: main
"#,
        );

        let expected = mapping(
            r#"
component_versions:
  docker:
    - name: b
      version: 3
  helm:
    - name: chart
      version: 2
configuration:
  commit: abc
  import_branch: main
"#,
        );
        assert_eq!(merge(&base, &overlay), expected);
    }

    #[test]
    fn overlay_replaces_on_type_mismatch() {
        assert_eq!(
            merge(&mapping("a: {x: 1}"), &mapping("a: [1, 2]")),
            mapping("a: [1, 2]")
        );
        assert_eq!(
            merge(&mapping("a: 1"), &mapping("a: {x: 1}")),
            mapping("a: {x: 1}")
        );
        assert_eq!(merge(&mapping("a: 1"), &mapping("a: null")), mapping("a: null"));
    }

    #[test]
    fn empty_overlay_and_empty_leaves() {
        let base = mapping("'1.0': {x: 1}\n'2.0': {}");
        assert_eq!(merge(&base, &Mapping::new()), base);
        assert_eq!(merge(&base, &mapping("'2.0': {}")), base);
        assert_eq!(
            merge(&Mapping::new(), &mapping("'3.0': {}")),
            mapping("'3.0': {}")
        );
    }

    #[test]
    fn inputs_are_left_untouched() {
        let base = mapping("a: {x: 1}");
        let overlay = mapping("a: {y: 2}");
        let _ = merge(&base, &overlay);
        assert_eq!(base, mapping("a: {x: 1}"));
        assert_eq!(overlay, mapping("a: {y: 2}"));
    }

    #[test]
    fn merge_values_only_combines_mappings() {
        let base = Value::Mapping(mapping("x: 1"));
        let overlay = Value::Mapping(mapping("y: 2"));
        assert_eq!(
            merge_values(&base, &overlay),
            Value::Mapping(mapping("x: 1\ny: 2"))
        );
        assert_eq!(merge_values(&base, &Value::Integer(3)), Value::Integer(3));
    }

    fn arb_value() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::Integer),
            any::<f64>().prop_map(Value::Float),
            "[a-z]{0,6}".prop_map(Value::String),
        ];
        leaf.prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..3).prop_map(Value::Sequence),
                prop::collection::btree_map("[a-d]", inner, 0..4).prop_map(Value::Mapping),
            ]
        })
    }

    fn arb_mapping() -> impl Strategy<Value = Mapping> {
        prop::collection::btree_map("[a-d]", arb_value(), 0..4)
    }

    proptest! {
        #[test]
        fn merge_is_idempotent(x in arb_mapping()) {
            prop_assert_eq!(merge(&x, &x), x);
        }

        #[test]
        fn merging_twice_is_merging_once(base in arb_mapping(), overlay in arb_mapping()) {
            let once = merge(&base, &overlay);
            prop_assert_eq!(merge(&once, &overlay), once);
        }

        #[test]
        fn disjoint_fragments_can_be_pre_merged(
            base in arb_mapping(),
            a in prop::collection::btree_map("a[a-d]", arb_value(), 0..4),
            b in prop::collection::btree_map("b[a-d]", arb_value(), 0..4),
        ) {
            let sequential = merge(&merge(&base, &a), &b);
            let combined = merge(&base, &merge(&a, &b));
            prop_assert_eq!(sequential, combined);
        }
    }
}
