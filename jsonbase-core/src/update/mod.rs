// jsonbase-core/src/update/mod.rs
//! Update engine for MongoDB-style update operators
//!
//! [`UpdateEngine::apply`] never mutates its input: operators run against a
//! deep clone and the new document is returned. The stored `_id` survives
//! every update, including a `$set` that targets it.
//!
//! Arithmetic operators require numeric operands and numeric (or missing)
//! current values. `$min`/`$max` compare strictly per type - number against
//! number, string against string, date against date - and fail with
//! `InvalidQuery` on any other pairing.

pub mod operators;

pub use operators::{UpdateOp, UpdateOperator};

use crate::date_tag;
use crate::error::{JsonBaseError, Result};
use crate::field_path;
use crate::value_compare;
use serde_json::Value;
use std::cmp::Ordering;

/// Applies update operators to documents
#[derive(Debug, Clone, Default)]
pub struct UpdateEngine;

impl UpdateEngine {
    pub fn new() -> Self {
        UpdateEngine
    }

    /// Apply an update document, returning the new document
    ///
    /// Operators are processed in the iteration order of the update's keys;
    /// within an operator, field paths in operand iteration order.
    pub fn apply(&self, document: &Value, update: &Value) -> Result<Value> {
        if !document.is_object() {
            return Err(JsonBaseError::InvalidArgument(
                "Document must be a JSON object".to_string(),
            ));
        }

        let ops = operators::parse_update(update)?;

        let mut result = document.clone();
        for op in &ops {
            for (path, operand) in &op.fields {
                match op.operator {
                    UpdateOperator::Set => {
                        field_path::set_path(&mut result, path, operand.clone());
                    }
                    UpdateOperator::Inc => self.apply_inc(&mut result, path, operand)?,
                    UpdateOperator::Mul => self.apply_mul(&mut result, path, operand)?,
                    UpdateOperator::Min => self.apply_min_max(&mut result, path, operand, true)?,
                    UpdateOperator::Max => self.apply_min_max(&mut result, path, operand, false)?,
                    UpdateOperator::Unset => {
                        field_path::unset_path(&mut result, path);
                    }
                    UpdateOperator::Push => self.apply_push(&mut result, path, operand)?,
                    UpdateOperator::Pull => self.apply_pull(&mut result, path, operand),
                    UpdateOperator::AddToSet => self.apply_add_to_set(&mut result, path, operand)?,
                }
            }
        }

        // The stored _id is immutable
        if let Some(original_id) = document.get("_id") {
            if let Some(map) = result.as_object_mut() {
                map.insert("_id".to_string(), original_id.clone());
            }
        }

        Ok(result)
    }

    fn apply_inc(&self, doc: &mut Value, path: &str, operand: &Value) -> Result<()> {
        let amount = numeric_operand(operand, "$inc", path)?;

        let new_value = match field_path::get_path(doc, path) {
            None => operand.clone(),
            Some(Value::Number(current)) => {
                // Prefer integer arithmetic to preserve integer types
                if let (Some(ci), Some(ai)) = (current.as_i64(), operand.as_i64()) {
                    Value::from(ci + ai)
                } else {
                    Value::from(current.as_f64().unwrap_or(0.0) + amount)
                }
            }
            Some(_) => {
                return Err(JsonBaseError::InvalidQuery(format!(
                    "$inc: field '{}' is not numeric",
                    path
                )));
            }
        };

        field_path::set_path(doc, path, new_value);
        Ok(())
    }

    fn apply_mul(&self, doc: &mut Value, path: &str, operand: &Value) -> Result<()> {
        let factor = numeric_operand(operand, "$mul", path)?;

        let new_value = match field_path::get_path(doc, path) {
            // Missing field multiplies an implicit zero
            None => {
                if operand.as_i64().is_some() {
                    Value::from(0i64)
                } else {
                    Value::from(0.0)
                }
            }
            Some(Value::Number(current)) => {
                if let (Some(ci), Some(fi)) = (current.as_i64(), operand.as_i64()) {
                    Value::from(ci * fi)
                } else {
                    Value::from(current.as_f64().unwrap_or(0.0) * factor)
                }
            }
            Some(_) => {
                return Err(JsonBaseError::InvalidQuery(format!(
                    "$mul: field '{}' is not numeric",
                    path
                )));
            }
        };

        field_path::set_path(doc, path, new_value);
        Ok(())
    }

    fn apply_min_max(
        &self,
        doc: &mut Value,
        path: &str,
        operand: &Value,
        is_min: bool,
    ) -> Result<()> {
        let current = match field_path::get_path(doc, path) {
            Some(v) => v.clone(),
            None => {
                field_path::set_path(doc, path, operand.clone());
                return Ok(());
            }
        };

        let op_name = if is_min { "$min" } else { "$max" };
        match value_compare::compare_order(operand, &current) {
            Some(Ordering::Less) if is_min => {
                field_path::set_path(doc, path, operand.clone());
            }
            Some(Ordering::Greater) if !is_min => {
                field_path::set_path(doc, path, operand.clone());
            }
            Some(_) => {}
            None => {
                return Err(JsonBaseError::InvalidQuery(format!(
                    "{}: cannot compare values of different types for '{}'",
                    op_name, path
                )));
            }
        }
        Ok(())
    }

    fn apply_push(&self, doc: &mut Value, path: &str, operand: &Value) -> Result<()> {
        let items = each_items(operand, "$push")?;

        let mut array = match field_path::get_path(doc, path) {
            Some(Value::Array(arr)) => arr.clone(),
            Some(_) => {
                return Err(JsonBaseError::InvalidQuery(format!(
                    "$push: field '{}' is not an array",
                    path
                )));
            }
            None => Vec::new(),
        };

        array.extend(items);
        field_path::set_path(doc, path, Value::Array(array));
        Ok(())
    }

    /// Remove all array elements matching the criterion
    ///
    /// A missing or non-array field is a no-op. Evaluation errors on an
    /// individual element keep that element.
    fn apply_pull(&self, doc: &mut Value, path: &str, criterion: &Value) {
        let filtered = match field_path::get_path(doc, path) {
            Some(Value::Array(arr)) => {
                let kept: Vec<Value> = arr
                    .iter()
                    .filter(|elem| !pull_matches(elem, criterion))
                    .cloned()
                    .collect();
                if kept.len() == arr.len() {
                    return;
                }
                kept
            }
            _ => return,
        };

        field_path::set_path(doc, path, Value::Array(filtered));
    }

    fn apply_add_to_set(&self, doc: &mut Value, path: &str, operand: &Value) -> Result<()> {
        let raw_items = each_items(operand, "$addToSet")?;

        // De-duplicate within the batch before touching the document
        let mut items: Vec<Value> = Vec::new();
        for item in raw_items {
            if !items
                .iter()
                .any(|existing| set_equal(existing, &item))
            {
                items.push(item);
            }
        }

        let mut array = match field_path::get_path(doc, path) {
            Some(Value::Array(arr)) => arr.clone(),
            Some(_) => {
                return Err(JsonBaseError::InvalidQuery(format!(
                    "$addToSet: field '{}' is not an array",
                    path
                )));
            }
            None => Vec::new(),
        };

        for item in items {
            if !array.iter().any(|existing| set_equal(existing, &item)) {
                array.push(item);
            }
        }

        field_path::set_path(doc, path, Value::Array(array));
        Ok(())
    }
}

/// Membership comparator for `$addToSet` (no array-contains semantics)
fn set_equal(a: &Value, b: &Value) -> bool {
    value_compare::values_equal(a, b, false)
}

fn pull_matches(elem: &Value, criterion: &Value) -> bool {
    if criterion.is_object() && !date_tag::is_date(criterion) {
        // Operator objects and plain mappings use subset semantics;
        // an evaluation error retains the element
        value_compare::subset_match(elem, criterion, true).unwrap_or(false)
    } else {
        value_compare::values_equal(elem, criterion, false)
    }
}

fn numeric_operand(operand: &Value, op: &str, path: &str) -> Result<f64> {
    operand.as_f64().ok_or_else(|| {
        JsonBaseError::InvalidQuery(format!("{}: amount for '{}' must be numeric", op, path))
    })
}

/// Resolve `{ "$each": [v, ...] }` operands to the item list
fn each_items(operand: &Value, op: &str) -> Result<Vec<Value>> {
    if let Some(map) = operand.as_object() {
        if map.contains_key("$each") {
            if map.len() > 1 {
                let extra = map.keys().find(|k| *k != "$each").cloned().unwrap_or_default();
                return Err(JsonBaseError::InvalidQuery(format!(
                    "{}: unsupported modifier '{}'",
                    op, extra
                )));
            }
            return match map.get("$each") {
                Some(Value::Array(items)) => Ok(items.clone()),
                _ => Err(JsonBaseError::InvalidQuery(format!(
                    "{}: $each requires an array",
                    op
                ))),
            };
        }
    }
    Ok(vec![operand.clone()])
}
