// jsonbase-core/src/query/mod.rs
//! Query engine for MongoDB-style filter expressions
//!
//! A filter is a JSON object. Top-level keys form an implicit conjunction;
//! each key is either a logical operator (`$and`, `$or`) or a dot-notation
//! field path whose value is a scalar (strict equality / array membership),
//! an operator object (`{"$gt": 5}`) or a plain object (subset match).
//!
//! The whole query tree is validated in a single pre-traversal before any
//! document is touched, so execution itself only fails on well-typed input
//! when an operator object smuggles in a logical operator.

pub mod operators;

pub use operators::QueryOperator;

use crate::error::{JsonBaseError, Result};
use crate::field_path;
use crate::value_compare;
use serde_json::{Map, Value};
use std::collections::HashSet;

/// Configuration for [`QueryEngine`]
#[derive(Debug, Clone)]
pub struct QueryConfig {
    /// Operator names accepted during validation
    pub supported_operators: HashSet<String>,
    /// Maximum depth of the query tree (validation-only bound)
    pub max_nested_depth: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        QueryConfig {
            supported_operators: ["$eq", "$gt", "$lt", "$and", "$or"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            max_nested_depth: 10,
        }
    }
}

/// Filter evaluator over in-memory document sets
#[derive(Debug, Clone, Default)]
pub struct QueryEngine {
    config: QueryConfig,
}

impl QueryEngine {
    /// Create an engine with the default operator set and depth bound
    pub fn new() -> Self {
        QueryEngine {
            config: QueryConfig::default(),
        }
    }

    pub fn with_config(config: QueryConfig) -> Self {
        QueryEngine { config }
    }

    /// Return the documents matching `query`, preserving input order
    ///
    /// An empty query matches every document (returned as a shallow copy).
    pub fn execute(&self, documents: &[Value], query: &Value) -> Result<Vec<Value>> {
        let root = match query.as_object() {
            Some(map) => map,
            None => {
                return Err(JsonBaseError::InvalidArgument(
                    "Query must be a JSON object".to_string(),
                ));
            }
        };

        self.validate_node(query, 0)?;

        if root.is_empty() {
            return Ok(documents.to_vec());
        }

        let mut results = Vec::new();
        for doc in documents {
            if self.matches_object(doc, root)? {
                results.push(doc.clone());
            }
        }
        Ok(results)
    }

    /// Check a single document against a validated filter
    pub fn matches(&self, document: &Value, query: &Value) -> Result<bool> {
        let root = query.as_object().ok_or_else(|| {
            JsonBaseError::InvalidArgument("Query must be a JSON object".to_string())
        })?;
        self.validate_node(query, 0)?;
        self.matches_object(document, root)
    }

    // ========================================================================
    // VALIDATION (single pre-traversal)
    // ========================================================================

    fn validate_node(&self, value: &Value, depth: usize) -> Result<()> {
        if depth > self.config.max_nested_depth {
            return Err(JsonBaseError::InvalidQuery(format!(
                "Query exceeds maximum nested depth of {}",
                self.config.max_nested_depth
            )));
        }

        match value {
            Value::Object(map) => {
                for (key, child) in map {
                    if key.starts_with('$') {
                        if !self.config.supported_operators.contains(key) {
                            return Err(JsonBaseError::InvalidQuery(format!(
                                "Unsupported operator: {}",
                                key
                            )));
                        }

                        let logical = QueryOperator::from_name(key)
                            .map(|op| op.is_logical())
                            .unwrap_or(false);
                        if logical {
                            self.validate_logical_operand(key, child, depth + 1)?;
                            continue;
                        }
                    }
                    self.validate_node(child, depth + 1)?;
                }
                Ok(())
            }
            Value::Array(items) => {
                for item in items {
                    self.validate_node(item, depth + 1)?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn validate_logical_operand(&self, op: &str, operand: &Value, depth: usize) -> Result<()> {
        let conditions = operand.as_array().ok_or_else(|| {
            JsonBaseError::InvalidQuery(format!("{} requires an array of conditions", op))
        })?;

        for condition in conditions {
            if !condition.is_object() {
                return Err(JsonBaseError::InvalidQuery(format!(
                    "{} conditions must be objects",
                    op
                )));
            }
            self.validate_node(condition, depth + 1)?;
        }
        Ok(())
    }

    // ========================================================================
    // EXECUTION
    // ========================================================================

    fn matches_object(&self, doc: &Value, query: &Map<String, Value>) -> Result<bool> {
        // Top-level keys are an implicit conjunction
        for (key, condition) in query {
            let matched = match QueryOperator::from_name(key) {
                Some(QueryOperator::And) => self.matches_all(doc, condition)?,
                Some(QueryOperator::Or) => self.matches_any(doc, condition)?,
                _ => self.matches_field(doc, key, condition)?,
            };

            if !matched {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// `$and`: every sub-condition matches; an empty operand matches
    fn matches_all(&self, doc: &Value, operand: &Value) -> Result<bool> {
        for condition in operand.as_array().into_iter().flatten() {
            let map = condition.as_object().ok_or_else(|| {
                JsonBaseError::InvalidQuery("$and conditions must be objects".to_string())
            })?;
            if !self.matches_object(doc, map)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// `$or`: at least one sub-condition matches; an empty operand matches nothing
    fn matches_any(&self, doc: &Value, operand: &Value) -> Result<bool> {
        for condition in operand.as_array().into_iter().flatten() {
            let map = condition.as_object().ok_or_else(|| {
                JsonBaseError::InvalidQuery("$or conditions must be objects".to_string())
            })?;
            if self.matches_object(doc, map)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn matches_field(&self, doc: &Value, path: &str, condition: &Value) -> Result<bool> {
        let doc_value = field_path::get_path(doc, path);

        if let Some(ops) = value_compare::operator_map(condition) {
            return value_compare::apply_operators(doc_value, ops);
        }

        if condition.is_object() && !crate::date_tag::is_date(condition) {
            // Nested object condition: subset semantics, not equality
            return match doc_value {
                Some(v) => value_compare::subset_match(v, condition, true),
                None => Ok(false),
            };
        }

        Ok(match doc_value {
            Some(v) => value_compare::values_equal(v, condition, true),
            None => condition.is_null(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_docs() -> Vec<Value> {
        vec![
            json!({"_id": "1", "a": 5, "b": true}),
            json!({"_id": "2", "a": 10, "b": true}),
            json!({"_id": "3", "a": 10, "b": false}),
        ]
    }

    fn ids(results: &[Value]) -> Vec<&str> {
        results.iter().map(|d| d["_id"].as_str().unwrap()).collect()
    }

    #[test]
    fn test_empty_query_matches_all() {
        let engine = QueryEngine::new();
        let docs = sample_docs();
        let results = engine.execute(&docs, &json!({})).unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results, docs);
    }

    #[test]
    fn test_implicit_conjunction() {
        let engine = QueryEngine::new();
        let docs = sample_docs();
        let results = engine
            .execute(&docs, &json!({"a": {"$gt": 5}, "b": true}))
            .unwrap();
        assert_eq!(ids(&results), vec!["2"]);
    }

    #[test]
    fn test_or_operator() {
        let engine = QueryEngine::new();
        let docs = sample_docs();
        let results = engine
            .execute(&docs, &json!({"$or": [{"a": 5}, {"b": false}]}))
            .unwrap();
        assert_eq!(ids(&results), vec!["1", "3"]);
    }

    #[test]
    fn test_and_operator() {
        let engine = QueryEngine::new();
        let docs = sample_docs();
        let results = engine
            .execute(&docs, &json!({"$and": [{"a": 10}, {"b": true}]}))
            .unwrap();
        assert_eq!(ids(&results), vec!["2"]);
    }

    #[test]
    fn test_empty_logical_operands() {
        let engine = QueryEngine::new();
        let docs = sample_docs();

        // Empty $and matches everything
        let results = engine.execute(&docs, &json!({"$and": []})).unwrap();
        assert_eq!(results.len(), 3);

        // Empty $or matches nothing
        let results = engine.execute(&docs, &json!({"$or": []})).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_result_preserves_input_order() {
        let engine = QueryEngine::new();
        let docs = sample_docs();
        let results = engine.execute(&docs, &json!({"a": 10})).unwrap();
        assert_eq!(ids(&results), vec!["2", "3"]);
    }

    #[test]
    fn test_dot_notation_path() {
        let engine = QueryEngine::new();
        let docs = vec![
            json!({"_id": "1", "profile": {"city": "NYC"}}),
            json!({"_id": "2", "profile": {"city": "LA"}}),
        ];
        let results = engine
            .execute(&docs, &json!({"profile.city": "NYC"}))
            .unwrap();
        assert_eq!(ids(&results), vec!["1"]);
    }

    #[test]
    fn test_nested_object_subset_semantics() {
        let engine = QueryEngine::new();
        let docs = vec![json!({"_id": "1", "profile": {"city": "NYC", "zip": 10001}})];

        // Subset: extra fields in the document are fine
        let results = engine
            .execute(&docs, &json!({"profile": {"city": "NYC"}}))
            .unwrap();
        assert_eq!(results.len(), 1);

        // Mismatched field fails
        let results = engine
            .execute(&docs, &json!({"profile": {"city": "LA"}}))
            .unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_array_membership() {
        let engine = QueryEngine::new();
        let docs = vec![
            json!({"_id": "1", "tags": ["rust", "db"]}),
            json!({"_id": "2", "tags": ["go"]}),
        ];
        let results = engine.execute(&docs, &json!({"tags": "rust"})).unwrap();
        assert_eq!(ids(&results), vec!["1"]);
    }

    #[test]
    fn test_null_matches_missing_field() {
        let engine = QueryEngine::new();
        let docs = vec![
            json!({"_id": "1", "email": null}),
            json!({"_id": "2"}),
            json!({"_id": "3", "email": "x@y.z"}),
        ];
        let results = engine.execute(&docs, &json!({"email": null})).unwrap();
        assert_eq!(ids(&results), vec!["1", "2"]);
    }

    #[test]
    fn test_comparison_against_missing_is_false() {
        let engine = QueryEngine::new();
        let docs = vec![json!({"_id": "1"}), json!({"_id": "2", "n": null})];
        let results = engine.execute(&docs, &json!({"n": {"$gt": 0}})).unwrap();
        assert!(results.is_empty());
        let results = engine.execute(&docs, &json!({"n": {"$lt": 0}})).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_query_must_be_object() {
        let engine = QueryEngine::new();
        let docs = sample_docs();
        for bad in [json!(null), json!("a = 1"), json!([1, 2]), json!(42)] {
            let err = engine.execute(&docs, &bad).unwrap_err();
            assert!(matches!(err, JsonBaseError::InvalidArgument(_)));
        }
    }

    #[test]
    fn test_unsupported_operator_rejected() {
        let engine = QueryEngine::new();
        let docs = sample_docs();
        let err = engine
            .execute(&docs, &json!({"a": {"$gte": 5}}))
            .unwrap_err();
        assert!(matches!(err, JsonBaseError::InvalidQuery(_)));
        assert!(err.to_string().contains("$gte"));
    }

    #[test]
    fn test_logical_operand_must_be_array_of_objects() {
        let engine = QueryEngine::new();
        let docs = sample_docs();

        let err = engine.execute(&docs, &json!({"$or": {"a": 1}})).unwrap_err();
        assert!(matches!(err, JsonBaseError::InvalidQuery(_)));

        let err = engine.execute(&docs, &json!({"$and": [5]})).unwrap_err();
        assert!(matches!(err, JsonBaseError::InvalidQuery(_)));
    }

    #[test]
    fn test_depth_limit() {
        let engine = QueryEngine::with_config(QueryConfig {
            max_nested_depth: 3,
            ..QueryConfig::default()
        });
        let docs = sample_docs();

        // Shallow query passes
        assert!(engine.execute(&docs, &json!({"a": {"$gt": 1}})).is_ok());

        // Deeply nested query trips the bound
        let deep = json!({"a": {"b": {"c": {"d": {"e": 1}}}}});
        let err = engine.execute(&docs, &deep).unwrap_err();
        assert!(matches!(err, JsonBaseError::InvalidQuery(_)));
        assert!(err.to_string().contains("depth"));
    }

    #[test]
    fn test_nested_logical_combination() {
        let engine = QueryEngine::new();
        let docs = vec![
            json!({"_id": "1", "city": "NYC", "age": 30, "active": true}),
            json!({"_id": "2", "city": "LA", "age": 20, "active": true}),
            json!({"_id": "3", "city": "Chicago", "age": 30, "active": true}),
        ];
        let query = json!({
            "$and": [
                {"$or": [{"city": "NYC"}, {"city": "LA"}]},
                {"age": {"$gt": 25}},
                {"active": true}
            ]
        });
        let results = engine.execute(&docs, &query).unwrap();
        assert_eq!(ids(&results), vec!["1"]);
    }
}
