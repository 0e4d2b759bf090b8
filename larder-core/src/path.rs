//! Path resolution inside a record.
//!
//! Walks a [`Value`] left to right along the segments of a dotted key. Reads
//! that miss resolve to `None`; writes create empty mappings where a segment
//! is missing. Sequences can be addressed by a numeric segment.

use serde_json::{Map, Value};

use crate::error::PathError;

/// Look up the value at `segments` inside `record`.
///
/// Any missing intermediate yields `None`, as does descending into a scalar.
pub fn resolve<'a, S: AsRef<str>>(record: &'a Value, segments: &[S]) -> Option<&'a Value> {
    let mut current = record;
    for segment in segments {
        let segment = segment.as_ref();
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Set the value at `segments` inside `record`, returning the updated record.
///
/// An absent or null record starts out as an empty mapping, and so does any
/// missing or null intermediate. With no segments the value replaces the
/// record outright.
pub fn assign<S: AsRef<str>>(
    record: Option<Value>,
    segments: &[S],
    value: Value,
) -> Result<Value, PathError> {
    let Some((last, parents)) = segments.split_last() else {
        return Ok(value);
    };

    let mut root = match record {
        None | Some(Value::Null) => Value::Object(Map::new()),
        Some(existing) => existing,
    };

    let mut current = &mut root;
    for segment in parents {
        current = child_for_write(current, segment.as_ref())?;
    }
    set_child(current, last.as_ref(), value)?;
    Ok(root)
}

/// Remove the value at `segments` from `record`, returning what was removed.
///
/// Removing from a sequence shifts later elements down.
pub fn detach<S: AsRef<str>>(record: &mut Value, segments: &[S]) -> Option<Value> {
    let (last, parents) = segments.split_last()?;
    let mut current = record;
    for segment in parents {
        let segment = segment.as_ref();
        current = match current {
            Value::Object(map) => map.get_mut(segment)?,
            Value::Array(items) => items.get_mut(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    match current {
        Value::Object(map) => map.remove(last.as_ref()),
        Value::Array(items) => {
            let index = last.as_ref().parse::<usize>().ok()?;
            (index < items.len()).then(|| items.remove(index))
        }
        _ => None,
    }
}

/// Human-readable name of a value's variant, used in error messages.
pub fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "sequence",
        Value::Object(_) => "mapping",
    }
}

fn child_for_write<'a>(parent: &'a mut Value, segment: &str) -> Result<&'a mut Value, PathError> {
    match parent {
        Value::Object(map) => {
            let child = map
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if child.is_null() {
                *child = Value::Object(Map::new());
            }
            Ok(child)
        }
        Value::Array(items) => {
            let index = parse_index(segment)?;
            let len = items.len();
            let child = items.get_mut(index).ok_or(PathError::IndexOutOfBounds {
                segment: segment.to_string(),
                index,
                len,
            })?;
            if child.is_null() {
                *child = Value::Object(Map::new());
            }
            Ok(child)
        }
        other => Err(PathError::NotAContainer {
            segment: segment.to_string(),
            found: kind_name(other).to_string(),
        }),
    }
}

fn set_child(parent: &mut Value, segment: &str, value: Value) -> Result<(), PathError> {
    match parent {
        Value::Object(map) => {
            map.insert(segment.to_string(), value);
            Ok(())
        }
        Value::Array(items) => {
            let index = parse_index(segment)?;
            let len = items.len();
            if index < len {
                items[index] = value;
            } else if index == len {
                items.push(value);
            } else {
                return Err(PathError::IndexOutOfBounds {
                    segment: segment.to_string(),
                    index,
                    len,
                });
            }
            Ok(())
        }
        other => Err(PathError::NotAContainer {
            segment: segment.to_string(),
            found: kind_name(other).to_string(),
        }),
    }
}

fn parse_index(segment: &str) -> Result<usize, PathError> {
    segment.parse::<usize>().map_err(|_| PathError::NotAContainer {
        segment: segment.to_string(),
        found: "sequence".to_string(),
    })
}
