// Property tests for the pure engines
//
// Small-scope proptest suites over the update engine, field paths and
// metadata serialisation.

use jsonbase_core::field_path;
use jsonbase_core::metadata::CollectionMetadata;
use jsonbase_core::UpdateEngine;
use proptest::prelude::*;
use serde_json::{json, Value};

/// Scalar JSON values (no containers)
fn scalar_value() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        any::<i32>().prop_map(|n| json!(n)),
        "[a-z]{0,12}".prop_map(|s| json!(s)),
    ]
}

/// Simple field names
fn field_name() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9]{0,8}"
}

/// Dot paths up to three segments deep
fn dot_path() -> impl Strategy<Value = String> {
    prop::collection::vec(field_name(), 1..=3).prop_map(|segments| segments.join("."))
}

/// Flat documents with an _id and a handful of scalar fields
fn flat_document() -> impl Strategy<Value = Value> {
    prop::collection::hash_map(field_name(), scalar_value(), 0..6).prop_map(|fields| {
        let mut doc = serde_json::Map::new();
        doc.insert("_id".to_string(), json!("doc-id"));
        for (k, v) in fields {
            doc.insert(k, v);
        }
        Value::Object(doc)
    })
}

proptest! {
    #[test]
    fn prop_update_never_mutates_input(doc in flat_document(), path in dot_path(), value in scalar_value()) {
        let engine = UpdateEngine::new();
        let before = doc.clone();
        let update = json!({"$set": {path: value}});

        let _ = engine.apply(&doc, &update);
        prop_assert_eq!(doc, before);
    }

    #[test]
    fn prop_update_preserves_id(doc in flat_document(), path in dot_path(), value in scalar_value()) {
        let engine = UpdateEngine::new();
        let update = json!({"$set": {path: value}});

        let out = engine.apply(&doc, &update).unwrap();
        prop_assert_eq!(out.get("_id"), doc.get("_id"));
    }

    #[test]
    fn prop_set_twice_is_idempotent(doc in flat_document(), path in dot_path(), value in scalar_value()) {
        let engine = UpdateEngine::new();
        let update = json!({"$set": {path: value}});

        let once = engine.apply(&doc, &update).unwrap();
        let twice = engine.apply(&once, &update).unwrap();
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn prop_set_then_get_round_trip(path in dot_path(), value in scalar_value()) {
        let mut doc = json!({});
        field_path::set_path(&mut doc, &path, value.clone());
        prop_assert_eq!(field_path::get_path(&doc, &path), Some(&value));
    }

    #[test]
    fn prop_unset_after_set_removes(path in dot_path(), value in scalar_value()) {
        let mut doc = json!({});
        field_path::set_path(&mut doc, &path, value.clone());
        let removed = field_path::unset_path(&mut doc, &path);
        prop_assert_eq!(removed, Some(value));
        prop_assert_eq!(field_path::get_path(&doc, &path), None);
    }

    #[test]
    fn prop_metadata_round_trip(
        name in "[a-z]{1,12}",
        file_id in "[a-z0-9-]{1,24}",
        count in 0u64..10_000,
        token in prop::option::of("[a-f0-9]{8}"),
    ) {
        let mut meta = CollectionMetadata::new(&name, &file_id).unwrap();
        meta.set_document_count(count);
        meta.set_modification_token(token).unwrap();

        let restored = CollectionMetadata::from_value(&meta.to_value()).unwrap();
        prop_assert_eq!(restored, meta);
    }
}
