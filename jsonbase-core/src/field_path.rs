// jsonbase-core/src/field_path.rs
//! Dot-notation field paths over JSON values
//!
//! Supports:
//! - Simple fields: "name"
//! - Nested objects: "address.city"
//! - Array indexing: "items.0.name"
//!
//! Traversal never fails: a path that runs into a missing key, an
//! out-of-bounds index or a non-container simply yields `None` (reads) or
//! does nothing (writes/deletes).

use lazy_static::lazy_static;
use lru::LruCache;
use serde_json::Value;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

lazy_static! {
    /// Global cache for parsed path segments
    /// LRU with 256 entry limit to prevent memory bloat
    static ref SEGMENT_CACHE: Mutex<LruCache<String, Arc<Vec<String>>>> =
        Mutex::new(LruCache::new(NonZeroUsize::new(256).unwrap()));
}

/// Split a dot-notation path into its segments, memoised process-wide
///
/// Returns `None` for empty or whitespace-only paths.
pub fn split_path(path: &str) -> Option<Arc<Vec<String>>> {
    if path.trim().is_empty() {
        return None;
    }

    {
        let mut cache = SEGMENT_CACHE.lock().unwrap();
        if let Some(segments) = cache.get(path) {
            return Some(segments.clone());
        }
    }

    let segments: Arc<Vec<String>> =
        Arc::new(path.split('.').map(|s| s.to_string()).collect());

    {
        let mut cache = SEGMENT_CACHE.lock().unwrap();
        cache.put(path.to_string(), segments.clone());
    }

    Some(segments)
}

/// Read the value at a dot-notation path
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use jsonbase_core::field_path::get_path;
///
/// let doc = json!({"address": {"city": "NYC"}});
/// assert_eq!(get_path(&doc, "address.city"), Some(&json!("NYC")));
/// ```
pub fn get_path<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    let segments = split_path(path)?;

    let mut value = doc;
    for segment in segments.iter() {
        match value {
            Value::Object(map) => value = map.get(segment)?,
            Value::Array(arr) => {
                if let Ok(index) = segment.parse::<usize>() {
                    value = arr.get(index)?;
                } else {
                    return None;
                }
            }
            _ => return None,
        }
    }
    Some(value)
}

/// Write a value at a dot-notation path, creating missing intermediates
///
/// Missing intermediate segments become objects. An existing intermediate
/// that is neither an object nor an array is overwritten with a fresh
/// object (known quirk, kept for compatibility with existing blobs). Array
/// intermediates are only descended through valid in-bounds indexes;
/// anything else makes the write a no-op.
pub fn set_path(doc: &mut Value, path: &str, value: Value) {
    let segments = match split_path(path) {
        Some(s) => s,
        None => return,
    };

    set_at_segments(doc, &segments, value);
}

fn set_at_segments(current: &mut Value, segments: &[String], value: Value) {
    if segments.is_empty() {
        return;
    }

    if segments.len() == 1 {
        match current {
            Value::Object(map) => {
                map.insert(segments[0].clone(), value);
            }
            Value::Array(arr) => {
                if let Ok(index) = segments[0].parse::<usize>() {
                    if index < arr.len() {
                        arr[index] = value;
                    }
                }
            }
            _ => {
                // Scalar in the way: replace it with an object holding the leaf
                let mut obj = serde_json::Map::new();
                obj.insert(segments[0].clone(), value);
                *current = Value::Object(obj);
            }
        }
        return;
    }

    match current {
        Value::Object(map) => {
            let next = map
                .entry(segments[0].clone())
                .or_insert_with(|| Value::Object(serde_json::Map::new()));
            set_at_segments(next, &segments[1..], value);
        }
        Value::Array(arr) => {
            if let Ok(index) = segments[0].parse::<usize>() {
                if index < arr.len() {
                    set_at_segments(&mut arr[index], &segments[1..], value);
                }
            }
        }
        _ => {
            let nested = create_nested(segments, value);
            *current = nested;
        }
    }
}

fn create_nested(segments: &[String], value: Value) -> Value {
    if segments.is_empty() {
        return value;
    }

    let mut obj = serde_json::Map::new();
    obj.insert(segments[0].clone(), create_nested(&segments[1..], value));
    Value::Object(obj)
}

/// Remove the value at a dot-notation path
///
/// Object leaves are removed by key; array leaves addressed by a numeric
/// segment are removed and the remaining elements shift left. Missing
/// intermediates make the call a no-op.
pub fn unset_path(doc: &mut Value, path: &str) -> Option<Value> {
    let segments = split_path(path)?;
    unset_at_segments(doc, &segments)
}

fn unset_at_segments(current: &mut Value, segments: &[String]) -> Option<Value> {
    if segments.is_empty() {
        return None;
    }

    if segments.len() == 1 {
        return match current {
            Value::Object(map) => map.remove(&segments[0]),
            Value::Array(arr) => {
                if let Ok(index) = segments[0].parse::<usize>() {
                    if index < arr.len() {
                        return Some(arr.remove(index));
                    }
                }
                None
            }
            _ => None,
        };
    }

    match current {
        Value::Object(map) => {
            let next = map.get_mut(&segments[0])?;
            unset_at_segments(next, &segments[1..])
        }
        Value::Array(arr) => {
            if let Ok(index) = segments[0].parse::<usize>() {
                if index < arr.len() {
                    return unset_at_segments(&mut arr[index], &segments[1..]);
                }
            }
            None
        }
        _ => None,
    }
}
