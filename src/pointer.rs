//! JSON pointer evaluation over `serde_json::Value` trees.
//!
//! Pointers follow the RFC 6901 shape: `""` is the whole document,
//! `"/a/b/0"` descends through objects and arrays. Missing segments and
//! descents into null resolve to null instead of failing; the script
//! runtime and the transformation operators both rely on that.

use serde_json::Value;

/// Unescape a single reference token (`~1` -> `/`, `~0` -> `~`).
fn unescape(token: &str) -> String {
    token.replace("~1", "/").replace("~0", "~")
}

/// Split a pointer into unescaped segments. The empty pointer has none.
fn segments(pointer: &str) -> Vec<String> {
    if pointer.is_empty() {
        return Vec::new();
    }
    pointer
        .trim_start_matches('/')
        .split('/')
        .map(unescape)
        .collect()
}

/// Resolve `pointer` against `doc`, borrowing the target.
///
/// Returns `None` when any segment is missing or the descent hits a
/// non-container value.
#[must_use]
pub fn get_ref<'a>(doc: &'a Value, pointer: &str) -> Option<&'a Value> {
    let mut current = doc;
    for segment in segments(pointer) {
        current = match current {
            Value::Object(map) => map.get(&segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Resolve `pointer` against `doc`, cloning the target. Misses yield null.
#[must_use]
pub fn get(doc: &Value, pointer: &str) -> Value {
    get_ref(doc, pointer).cloned().unwrap_or(Value::Null)
}

/// Write `value` at `pointer`, creating intermediate objects as needed.
///
/// The empty pointer replaces the whole document. Writing through an
/// existing array uses numeric segments; an index equal to the array
/// length appends. Any other non-object intermediate is replaced by a
/// fresh object.
pub fn set(doc: &mut Value, pointer: &str, value: Value) {
    let segs = segments(pointer);
    if segs.is_empty() {
        *doc = value;
        return;
    }

    let mut current = doc;
    for (i, segment) in segs.iter().enumerate() {
        let last = i == segs.len() - 1;
        let mut array_advance_index = None;
        if let Value::Array(items) = current {
            if let Ok(index) = segment.parse::<usize>() {
                if index < items.len() {
                    if last {
                        items[index] = value;
                        return;
                    }
                    array_advance_index = Some(index);
                } else if index == items.len() {
                    if last {
                        items.push(value);
                        return;
                    }
                    items.push(Value::Object(serde_json::Map::new()));
                    array_advance_index = Some(index);
                }
            }
        }
        if let Some(index) = array_advance_index {
            let Value::Array(items) = current else {
                unreachable!()
            };
            current = &mut items[index];
            continue;
        }

        if !current.is_object() {
            *current = Value::Object(serde_json::Map::new());
        }
        let Value::Object(map) = current else {
            return;
        };
        if last {
            map.insert(segment.clone(), value);
            return;
        }
        current = map
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn get_root() {
        let doc = json!({"a": 1});
        assert_eq!(get(&doc, ""), doc);
    }

    #[test]
    fn get_nested() {
        let doc = json!({"a": {"b": {"c": 42}}});
        assert_eq!(get(&doc, "/a/b/c"), json!(42));
    }

    #[test]
    fn get_array_index() {
        let doc = json!({"items": ["x", "y", "z"]});
        assert_eq!(get(&doc, "/items/1"), json!("y"));
    }

    #[test]
    fn get_missing_is_null() {
        let doc = json!({"a": 1});
        assert_eq!(get(&doc, "/b"), Value::Null);
        assert_eq!(get(&doc, "/a/b/c"), Value::Null);
    }

    #[test]
    fn get_through_null_is_null() {
        let doc = json!({"a": null});
        assert_eq!(get(&doc, "/a/b"), Value::Null);
    }

    #[test]
    fn get_escaped_segments() {
        let doc = json!({"a/b": {"~x": 1}});
        assert_eq!(get(&doc, "/a~1b/~0x"), json!(1));
    }

    #[test]
    fn set_empty_pointer_replaces_root() {
        let mut doc = json!({"a": 1});
        set(&mut doc, "", json!([1, 2]));
        assert_eq!(doc, json!([1, 2]));
    }

    #[test]
    fn set_creates_intermediates() {
        let mut doc = json!({});
        set(&mut doc, "/a/b/c", json!(1));
        assert_eq!(doc, json!({"a": {"b": {"c": 1}}}));
    }

    #[test]
    fn set_overwrites_existing() {
        let mut doc = json!({"a": {"b": 1}});
        set(&mut doc, "/a/b", json!(2));
        assert_eq!(doc, json!({"a": {"b": 2}}));
    }

    #[test]
    fn set_into_array() {
        let mut doc = json!({"items": [1, 2, 3]});
        set(&mut doc, "/items/1", json!(9));
        assert_eq!(doc, json!({"items": [1, 9, 3]}));
    }

    #[test]
    fn set_appends_at_array_len() {
        let mut doc = json!({"items": [1]});
        set(&mut doc, "/items/1", json!(2));
        assert_eq!(doc, json!({"items": [1, 2]}));
    }

    #[test]
    fn set_replaces_scalar_intermediate() {
        let mut doc = json!({"a": 5});
        set(&mut doc, "/a/b", json!(1));
        assert_eq!(doc, json!({"a": {"b": 1}}));
    }
}
