// jsonbase-core/src/update/operators.rs
//! Tagged update operator enumeration and update-document parsing
//!
//! An update document is `{ "$op": { "<path>": <operand>, ... }, ... }`.
//! Parsing validates the overall shape once; the engine then dispatches on
//! the `UpdateOperator` tag without re-checking strings.

use crate::error::{JsonBaseError, Result};
use serde_json::{Map, Value};

/// The update operators this engine applies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateOperator {
    Set,
    Inc,
    Mul,
    Min,
    Max,
    Unset,
    Push,
    Pull,
    AddToSet,
}

impl UpdateOperator {
    /// Look up an operator by its wire name
    pub fn from_name(name: &str) -> Option<UpdateOperator> {
        match name {
            "$set" => Some(UpdateOperator::Set),
            "$inc" => Some(UpdateOperator::Inc),
            "$mul" => Some(UpdateOperator::Mul),
            "$min" => Some(UpdateOperator::Min),
            "$max" => Some(UpdateOperator::Max),
            "$unset" => Some(UpdateOperator::Unset),
            "$push" => Some(UpdateOperator::Push),
            "$pull" => Some(UpdateOperator::Pull),
            "$addToSet" => Some(UpdateOperator::AddToSet),
            _ => None,
        }
    }

    /// Wire name of the operator
    pub fn name(&self) -> &'static str {
        match self {
            UpdateOperator::Set => "$set",
            UpdateOperator::Inc => "$inc",
            UpdateOperator::Mul => "$mul",
            UpdateOperator::Min => "$min",
            UpdateOperator::Max => "$max",
            UpdateOperator::Unset => "$unset",
            UpdateOperator::Push => "$push",
            UpdateOperator::Pull => "$pull",
            UpdateOperator::AddToSet => "$addToSet",
        }
    }
}

/// One parsed operator with its `path -> operand` map
#[derive(Debug, Clone)]
pub struct UpdateOp {
    pub operator: UpdateOperator,
    pub fields: Map<String, Value>,
}

/// Parse and validate an update document
///
/// Rejects non-object updates (`InvalidArgument`), empty updates, unknown
/// operators and operands that are not non-empty objects (`InvalidQuery`).
pub fn parse_update(update: &Value) -> Result<Vec<UpdateOp>> {
    let map = update.as_object().ok_or_else(|| {
        JsonBaseError::InvalidArgument("Update must be a JSON object".to_string())
    })?;

    if map.is_empty() {
        return Err(JsonBaseError::InvalidQuery(
            "Update document must not be empty".to_string(),
        ));
    }

    let mut ops = Vec::with_capacity(map.len());
    for (key, operand) in map {
        let operator = UpdateOperator::from_name(key).ok_or_else(|| {
            JsonBaseError::InvalidQuery(format!("Unsupported update operator: {}", key))
        })?;

        let fields = operand.as_object().ok_or_else(|| {
            JsonBaseError::InvalidQuery(format!(
                "{} requires an object of field paths",
                operator.name()
            ))
        })?;

        if fields.is_empty() {
            return Err(JsonBaseError::InvalidQuery(format!(
                "{} requires a non-empty object of field paths",
                operator.name()
            )));
        }

        ops.push(UpdateOp {
            operator,
            fields: fields.clone(),
        });
    }

    Ok(ops)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_valid_update() {
        let ops = parse_update(&json!({"$set": {"a": 1}, "$inc": {"b": 2}})).unwrap();
        assert_eq!(ops.len(), 2);
        assert!(ops.iter().any(|op| op.operator == UpdateOperator::Set));
        assert!(ops.iter().any(|op| op.operator == UpdateOperator::Inc));
    }

    #[test]
    fn test_parse_rejects_non_object() {
        for bad in [json!(null), json!("$set"), json!([1])] {
            assert!(matches!(
                parse_update(&bad).unwrap_err(),
                JsonBaseError::InvalidArgument(_)
            ));
        }
    }

    #[test]
    fn test_parse_rejects_empty_update() {
        assert!(matches!(
            parse_update(&json!({})).unwrap_err(),
            JsonBaseError::InvalidQuery(_)
        ));
    }

    #[test]
    fn test_parse_rejects_unknown_operator() {
        let err = parse_update(&json!({"$rename": {"a": "b"}})).unwrap_err();
        assert!(err.to_string().contains("$rename"));
    }

    #[test]
    fn test_parse_rejects_bad_operand() {
        assert!(parse_update(&json!({"$set": 5})).is_err());
        assert!(parse_update(&json!({"$set": {}})).is_err());
        assert!(parse_update(&json!({"$unset": [1, 2]})).is_err());
    }

    #[test]
    fn test_from_name_round_trip() {
        for name in [
            "$set",
            "$inc",
            "$mul",
            "$min",
            "$max",
            "$unset",
            "$push",
            "$pull",
            "$addToSet",
        ] {
            let op = UpdateOperator::from_name(name).unwrap();
            assert_eq!(op.name(), name);
        }
        assert!(UpdateOperator::from_name("$pop").is_none());
    }
}
