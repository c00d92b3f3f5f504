//! JSON tree edits
//!
//! Payload shape fixes are isolated pure functions over `serde_json::Value`, run
//! before canonical decoding. Paths are dot separated; numeric segments index
//! into arrays (`choices.0.delta`).

use serde_json::{Map, Value};

/// In-place payload transform
pub type NodeTransform = fn(&mut Value);

/// Look up a value by path
pub fn get<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(value, |node, segment| match node {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn get_mut<'a>(value: &'a mut Value, path: &str) -> Option<&'a mut Value> {
    path.split('.').try_fold(value, |node, segment| match node {
        Value::Object(map) => map.get_mut(segment),
        Value::Array(items) => segment
            .parse::<usize>()
            .ok()
            .and_then(move |i| items.get_mut(i)),
        _ => None,
    })
}

/// Set a value by path, creating intermediate objects. Returns false when an
/// intermediate node exists but is not an object.
pub fn set(value: &mut Value, path: &str, new_value: Value) -> bool {
    let (parent_path, key) = match path.rsplit_once('.') {
        Some((parent, key)) => (Some(parent), key),
        None => (None, path),
    };

    let mut node = value;
    if let Some(parent_path) = parent_path {
        for segment in parent_path.split('.') {
            if node.is_null() {
                *node = Value::Object(Map::new());
            }
            node = match node {
                Value::Object(map) => map
                    .entry(segment.to_string())
                    .or_insert_with(|| Value::Object(Map::new())),
                Value::Array(items) => match segment.parse::<usize>().ok().and_then(move |i| items.get_mut(i)) {
                    Some(item) => item,
                    None => return false,
                },
                _ => return false,
            };
        }
    }

    if node.is_null() {
        *node = Value::Object(Map::new());
    }
    match node {
        Value::Object(map) => {
            map.insert(key.to_string(), new_value);
            true
        }
        _ => false,
    }
}

/// Remove a value by path, returning it
pub fn unset(value: &mut Value, path: &str) -> Option<Value> {
    match path.rsplit_once('.') {
        Some((parent, key)) => get_mut(value, parent)?.as_object_mut()?.remove(key),
        None => value.as_object_mut()?.remove(path),
    }
}

/// Move a value from one path to another. Does nothing when `from` is absent.
pub fn rename(value: &mut Value, from: &str, to: &str) -> bool {
    match unset(value, from) {
        Some(moved) => set(value, to, moved),
        None => false,
    }
}

fn for_each_choice(value: &mut Value, mut f: impl FnMut(&mut Map<String, Value>)) {
    if let Some(choices) = value.get_mut("choices").and_then(Value::as_array_mut) {
        for choice in choices.iter_mut().filter_map(Value::as_object_mut) {
            f(choice);
        }
    }
}

/// `reasoning` → `reasoning_content` in every choice message/delta
pub fn rename_reasoning(value: &mut Value) {
    for_each_choice(value, |choice| {
        for key in ["message", "delta"] {
            let Some(body) = choice.get_mut(key).and_then(Value::as_object_mut) else {
                continue;
            };
            if let Some(reasoning) = body.remove("reasoning") {
                let has_content = body
                    .get("reasoning_content")
                    .is_some_and(|v| !v.is_null());
                if !has_content && !reasoning.is_null() {
                    body.insert("reasoning_content".to_string(), reasoning);
                }
            }
        }
    });
}

/// Move usage reported inside the first choice to the top level
pub fn hoist_choice_usage(value: &mut Value) {
    if get(value, "usage").is_some_and(|u| !u.is_null()) {
        return;
    }
    let mut hoisted = None;
    for_each_choice(value, |choice| {
        if hoisted.is_none() {
            hoisted = choice.remove("usage").filter(|u| !u.is_null());
        }
    });
    if let Some(usage) = hoisted {
        set(value, "usage", usage);
    }
}

/// Turn a bot response's `bot_usage` into a top-level OpenAI usage object with a
/// web search count
pub fn lift_bot_usage(value: &mut Value) {
    let Some(bot_usage) = unset(value, "bot_usage") else {
        return;
    };

    let sum = |items: Option<&Value>, field: &str| -> u64 {
        items
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item.get(field).and_then(Value::as_u64))
                    .fold(0u64, u64::saturating_add)
            })
            .unwrap_or_default()
    };

    let model_usage = bot_usage.get("model_usage");
    let searches = sum(bot_usage.get("action_usage"), "count");

    if get(value, "usage").map_or(true, Value::is_null) {
        let prompt = sum(model_usage, "prompt_tokens");
        let completion = sum(model_usage, "completion_tokens");
        let total = prompt.saturating_add(completion);
        if total > 0 {
            set(
                value,
                "usage",
                serde_json::json!({
                    "prompt_tokens": prompt,
                    "completion_tokens": completion,
                    "total_tokens": total,
                }),
            );
        }
    }
    if searches > 0 {
        set(value, "usage.web_search_count", Value::from(searches));
    }
}

/// Ask the upstream to report usage on streamed requests
pub fn ensure_stream_usage(value: &mut Value) {
    if get(value, "stream").and_then(Value::as_bool) == Some(true) {
        set(value, "stream_options.include_usage", Value::Bool(true));
    }
}

/// Apply every transform in order
pub fn apply(value: &mut Value, transforms: &[NodeTransform]) {
    for transform in transforms {
        transform(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_get_by_path() {
        let value = json!({"choices": [{"delta": {"content": "hi"}}]});
        assert_eq!(get(&value, "choices.0.delta.content"), Some(&json!("hi")));
        assert_eq!(get(&value, "choices.1.delta"), None);
        assert_eq!(get(&value, "choices.x"), None);
    }

    #[test]
    fn test_set_creates_parents() {
        let mut value = json!({"model": "m"});
        assert!(set(&mut value, "stream_options.include_usage", json!(true)));
        assert_eq!(value["stream_options"]["include_usage"], json!(true));

        let mut scalar = json!({"a": 1});
        assert!(!set(&mut scalar, "a.b", json!(2)));
    }

    #[test]
    fn test_unset_and_rename() {
        let mut value = json!({"a": {"b": 1, "c": 2}});
        assert_eq!(unset(&mut value, "a.b"), Some(json!(1)));
        assert_eq!(value, json!({"a": {"c": 2}}));

        assert!(rename(&mut value, "a.c", "d"));
        assert_eq!(value, json!({"a": {}, "d": 2}));
        assert!(!rename(&mut value, "missing", "e"));
    }

    #[test]
    fn test_rename_reasoning() {
        let mut value = json!({
            "choices": [
                {"delta": {"reasoning": "think", "content": null}},
                {"message": {"reasoning": "x", "reasoning_content": "kept"}}
            ]
        });
        rename_reasoning(&mut value);
        assert_eq!(value["choices"][0]["delta"]["reasoning_content"], json!("think"));
        assert!(value["choices"][0]["delta"].get("reasoning").is_none());
        assert_eq!(value["choices"][1]["message"]["reasoning_content"], json!("kept"));
    }

    #[test]
    fn test_hoist_choice_usage() {
        let mut value = json!({
            "choices": [{"delta": {}, "usage": {"prompt_tokens": 3, "completion_tokens": 4}}]
        });
        hoist_choice_usage(&mut value);
        assert_eq!(value["usage"]["prompt_tokens"], json!(3));
        assert!(value["choices"][0].get("usage").is_none());
    }

    #[test]
    fn test_lift_bot_usage() {
        let mut value = json!({
            "choices": [],
            "bot_usage": {
                "model_usage": [
                    {"prompt_tokens": 10, "completion_tokens": 2},
                    {"prompt_tokens": 5, "completion_tokens": 1}
                ],
                "action_usage": [{"action_name": "web_search", "count": 2}]
            }
        });
        lift_bot_usage(&mut value);
        assert_eq!(value["usage"]["prompt_tokens"], json!(15));
        assert_eq!(value["usage"]["completion_tokens"], json!(3));
        assert_eq!(value["usage"]["web_search_count"], json!(2));
        assert!(value.get("bot_usage").is_none());
    }

    #[test]
    fn test_lift_bot_usage_saturates() {
        let mut value = json!({
            "bot_usage": {
                "model_usage": [
                    {"prompt_tokens": u64::MAX, "completion_tokens": 1},
                    {"prompt_tokens": 5, "completion_tokens": 1}
                ],
                "action_usage": [{"count": u64::MAX}, {"count": 1}]
            }
        });
        lift_bot_usage(&mut value);
        assert_eq!(value["usage"]["prompt_tokens"], json!(u64::MAX));
        assert_eq!(value["usage"]["total_tokens"], json!(u64::MAX));
        assert_eq!(value["usage"]["web_search_count"], json!(u64::MAX));
    }

    #[test]
    fn test_ensure_stream_usage_only_when_streaming() {
        let mut streaming = json!({"stream": true});
        ensure_stream_usage(&mut streaming);
        assert_eq!(streaming["stream_options"]["include_usage"], json!(true));

        let mut plain = json!({"stream": false});
        ensure_stream_usage(&mut plain);
        assert!(plain.get("stream_options").is_none());
    }
}
