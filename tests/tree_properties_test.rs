//! Property tests for the public tree pipeline
//!
//! Random schemas go through walk, populate and flatten, checking the laws
//! that hold for every cycle regardless of shape.

use proptest::prelude::*;
use serde_json::{Map, Value};
use uatree_rs::{populate, walk, Flattener, ResolutionTarget, Schema, Variant};

/// Schema documents up to four levels deep with unique keys per level
fn schema_document() -> impl Strategy<Value = Value> {
    let leaf = "[A-Z][a-z]{0,6}".prop_map(Value::String);
    leaf.prop_recursive(4, 32, 4, |inner| {
        prop::collection::btree_map("[a-z]{1,5}", inner, 0..4)
            .prop_map(|entries| Value::Object(entries.into_iter().collect::<Map<_, _>>()))
    })
    .prop_filter_map("schema root must be an object", |value| match value {
        Value::Object(_) => Some(value),
        Value::String(name) => {
            let mut root = Map::new();
            root.insert("root".to_string(), Value::String(name));
            Some(Value::Object(root))
        }
        _ => None,
    })
}

proptest! {
    #[test]
    fn walk_yields_one_target_per_leaf(doc in schema_document()) {
        let schema = Schema::from_json(&doc).unwrap();
        let targets = walk(&schema);
        prop_assert_eq!(targets.len(), schema.leaf_count());
        for target in &targets {
            prop_assert_eq!(target.remote_path.len(), target.tree_location.len() + 1);
        }
    }

    #[test]
    fn populate_then_flatten_round_trips(doc in schema_document()) {
        let schema = Schema::from_json(&doc).unwrap();
        let targets = walk(&schema);
        let values: Vec<_> = targets
            .iter()
            .enumerate()
            .map(|(i, t)| (t, Variant::Int(i as i64)))
            .collect();
        let tree = populate(&schema.skeleton(), "T", values).unwrap();

        for (i, target) in targets.iter().enumerate() {
            let mut path = target.tree_location.clone();
            path.push(target.display_name.clone());
            let value = tree.value_at(&path).and_then(|v| v.as_value()).cloned();
            prop_assert_eq!(value, Some(Variant::Int(i as i64)));
        }

        let flattener = Flattener::new();
        let rows = flattener.flatten(&tree);
        prop_assert_eq!(rows.len(), targets.len());
        prop_assert_eq!(rows.clone(), flattener.flatten(&tree));
        for (row, target) in rows.iter().zip(&targets) {
            let expected = format!("{}.{}", target.location_string(), target.display_name);
            prop_assert_eq!(&row.variable, &expected);
        }
    }

    #[test]
    fn unpopulated_tree_flattens_to_nothing(doc in schema_document()) {
        let schema = Schema::from_json(&doc).unwrap();
        let tree = populate(&schema.skeleton(), "T", Vec::<(&ResolutionTarget, Variant)>::new()).unwrap();
        prop_assert!(Flattener::new().flatten(&tree).is_empty());
        let with_unset = Flattener::new().with_unset_rows(true).flatten(&tree);
        prop_assert_eq!(with_unset.len(), schema.leaf_count());
    }
}
