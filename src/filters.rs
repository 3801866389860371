use crate::environment::Environment;
use crate::error::{CapabilityKind, Result, TemplateError};
use crate::value::{Map, Value};

/// 向环境注册所有内置过滤器
pub fn register_filters(env: &mut Environment) {
    env.add_filter("upper", filter_upper);
    env.add_filter("lower", filter_lower);
    env.add_filter("capitalize", filter_capitalize);
    env.add_filter("title", filter_title);
    env.add_filter("length", filter_length);
    env.add_filter("reverse", filter_reverse);
    env.add_filter("sort", filter_sort);
    env.add_filter("keys", filter_keys);
    env.add_filter("url_encode", filter_url_encode);
    env.add_filter("join", filter_join);
    env.add_filter("default", filter_default);
    env.add_filter("json_encode", filter_json_encode);
    env.add_filter("merge", filter_merge);
}

fn invalid(name: &str, message: impl Into<String>) -> TemplateError {
    TemplateError::InvalidArgument {
        kind: CapabilityKind::Filter,
        name: name.to_string(),
        message: message.into(),
    }
}

fn filter_upper(value: Value, _args: &[Value]) -> Result<Value> {
    Ok(Value::String(value.to_string().to_uppercase()))
}

fn filter_lower(value: Value, _args: &[Value]) -> Result<Value> {
    Ok(Value::String(value.to_string().to_lowercase()))
}

/// 只改首字母，其余保持原样
fn filter_capitalize(value: Value, _args: &[Value]) -> Result<Value> {
    let value = value.to_string();
    let mut chars = value.chars();
    Ok(Value::String(match chars.next() {
        None => String::new(),
        Some(first) => {
            let mut result = first.to_uppercase().to_string();
            result.extend(chars);
            result
        }
    }))
}

/// 每个单词首字母大写（单词以空白分隔）
fn filter_title(value: Value, _args: &[Value]) -> Result<Value> {
    let mut at_word_start = true;
    let titled = value
        .to_string()
        .chars()
        .map(|c| {
            let out = if at_word_start && c.is_ascii_lowercase() {
                c.to_ascii_uppercase()
            } else {
                c
            };
            at_word_start = c.is_whitespace();
            out
        })
        .collect();
    Ok(Value::String(titled))
}

fn filter_length(value: Value, _args: &[Value]) -> Result<Value> {
    Ok(match value {
        Value::String(s) => Value::from(s.chars().count()),
        Value::List(items) => Value::from(items.len()),
        Value::Map(map) => Value::from(map.len()),
        _ => Value::Undefined,
    })
}

fn filter_reverse(value: Value, _args: &[Value]) -> Result<Value> {
    Ok(match value {
        Value::List(mut items) => {
            items.reverse();
            Value::List(items)
        }
        Value::String(s) => Value::String(s.chars().rev().collect()),
        Value::Map(mut map) => {
            map.reverse();
            Value::Map(map)
        }
        other => other,
    })
}

/// 列表按值排序；映射按值重排键的顺序
fn filter_sort(value: Value, _args: &[Value]) -> Result<Value> {
    Ok(match value {
        Value::List(mut items) => {
            items.sort_by(Value::sort_cmp);
            Value::List(items)
        }
        Value::Map(mut map) => {
            map.sort_by(|_, a, _, b| a.sort_cmp(b));
            Value::Map(map)
        }
        other => other,
    })
}

fn filter_keys(value: Value, _args: &[Value]) -> Result<Value> {
    let keys = match value {
        Value::Map(map) => map.into_keys().map(Value::String).collect(),
        Value::List(items) => (0..items.len()).map(|i| Value::String(i.to_string())).collect(),
        _ => Vec::new(),
    };
    Ok(Value::List(keys))
}

/// 与 encodeURIComponent 相同的保留字符集
fn filter_url_encode(value: Value, _args: &[Value]) -> Result<Value> {
    const UNRESERVED: &[u8] = b"-_.!~*'()";
    let mut out = String::new();
    for byte in value.to_string().bytes() {
        if byte.is_ascii_alphanumeric() || UNRESERVED.contains(&byte) {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    Ok(Value::String(out))
}

fn filter_join(value: Value, args: &[Value]) -> Result<Value> {
    let sep = args.first().map(ToString::to_string).unwrap_or_default();
    let parts: Vec<String> = match value {
        Value::List(items) => items.iter().map(ToString::to_string).collect(),
        Value::Map(map) => map.values().map(ToString::to_string).collect(),
        other => return Ok(Value::String(other.to_string())),
    };
    Ok(Value::String(parts.join(&sep)))
}

fn filter_default(value: Value, args: &[Value]) -> Result<Value> {
    let [fallback] = args else {
        return Err(invalid("default", format!("需要 1 个参数，实际 {} 个", args.len())));
    };
    let missing = match &value {
        Value::String(s) => s.is_empty(),
        other => other.is_none(),
    };
    Ok(if missing { fallback.clone() } else { value })
}

fn filter_json_encode(value: Value, _args: &[Value]) -> Result<Value> {
    serde_json::to_string(&value)
        .map(Value::String)
        .map_err(|e| invalid("json_encode", e.to_string()))
}

/// 全是列表时拼接为列表；否则合并为映射，列表元素使用递增的数字键
fn filter_merge(value: Value, args: &[Value]) -> Result<Value> {
    if args.is_empty() {
        return Err(invalid("merge", "至少需要 1 个参数"));
    }

    let operands = std::iter::once(&value).chain(args);
    if operands.clone().all(|v| matches!(v, Value::List(_))) {
        let merged = operands
            .flat_map(|v| match v {
                Value::List(items) => items.clone(),
                _ => Vec::new(),
            })
            .collect();
        return Ok(Value::List(merged));
    }

    let mut merged = Map::new();
    let mut next_index = 0usize;
    for operand in operands {
        match operand {
            Value::List(items) => {
                for item in items {
                    merged.insert(next_index.to_string(), item.clone());
                    next_index += 1;
                }
            }
            Value::Map(map) => {
                for (key, item) in map {
                    merged.insert(key.clone(), item.clone());
                    // 数字键会推进列表元素的编号，避免后续元素覆盖它
                    if let Ok(n) = key.parse::<usize>()
                        && n >= next_index
                    {
                        next_index = n + 1;
                    }
                }
            }
            other => return Err(invalid("merge", format!("无法合并 {}", other.type_name()))),
        }
    }
    Ok(Value::Map(merged))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run(f: fn(Value, &[Value]) -> Result<Value>, input: serde_json::Value, args: &[Value]) -> Value {
        f(Value::from(input), args).unwrap()
    }

    fn json_of(value: &Value) -> String {
        serde_json::to_string(value).unwrap()
    }

    #[test]
    fn string_case_filters() {
        assert_eq!(run(filter_upper, json!("abc"), &[]).to_string(), "ABC");
        assert_eq!(run(filter_capitalize, json!("hello World"), &[]).to_string(), "Hello World");
        assert_eq!(run(filter_title, json!("the quick  fox"), &[]).to_string(), "The Quick  Fox");
    }

    #[test]
    fn length_counts_chars_and_items() {
        assert_eq!(run(filter_length, json!("héllo"), &[]).to_string(), "5");
        assert_eq!(run(filter_length, json!([1, 2]), &[]).to_string(), "2");
        assert_eq!(run(filter_length, json!({"a": 1}), &[]).to_string(), "1");
    }

    #[test]
    fn reverse_and_sort_maps_keep_pairs() {
        let reversed = run(filter_reverse, json!({"a": 1, "b": 2}), &[]);
        assert_eq!(json_of(&reversed), r#"{"b":2,"a":1}"#);
        let sorted = run(filter_sort, json!({"x": 3, "y": 1, "z": 2}), &[]);
        assert_eq!(json_of(&sorted), r#"{"y":1,"z":2,"x":3}"#);
        let sorted = run(filter_sort, json!([3, 10, 2]), &[]);
        assert_eq!(json_of(&sorted), "[2,3,10]");
    }

    #[test]
    fn keys_follow_insertion_order() {
        let keys = run(filter_keys, json!({"b": 1, "a": 2}), &[]);
        assert_eq!(json_of(&keys), r#"["b","a"]"#);
    }

    #[test]
    fn url_encode_matches_uri_component() {
        assert_eq!(
            run(filter_url_encode, json!("a b&c/é(x)"), &[]).to_string(),
            "a%20b%26c%2F%C3%A9(x)"
        );
    }

    #[test]
    fn join_lists_and_maps() {
        let sep = [Value::from(", ")];
        assert_eq!(run(filter_join, json!([1, "a"]), &sep).to_string(), "1, a");
        assert_eq!(run(filter_join, json!({"k": "v", "j": "w"}), &[]).to_string(), "vw");
    }

    #[test]
    fn default_needs_exactly_one_argument() {
        assert_eq!(run(filter_default, json!(""), &[Value::from("x")]).to_string(), "x");
        assert_eq!(run(filter_default, json!(0), &[Value::from("x")]).to_string(), "0");
        assert!(matches!(
            filter_default(Value::Null, &[]).unwrap_err(),
            TemplateError::InvalidArgument { kind: CapabilityKind::Filter, .. }
        ));
    }

    #[test]
    fn json_encode_preserves_order() {
        let out = run(filter_json_encode, json!({"z": [1, null], "a": true}), &[]);
        assert_eq!(out.to_string(), r#"{"z":[1,null],"a":true}"#);
    }

    #[test]
    fn merge_lists_and_maps() {
        let lists = run(filter_merge, json!([1, 2]), &[Value::from(json!([3]))]);
        assert_eq!(json_of(&lists), "[1,2,3]");

        let mixed = run(
            filter_merge,
            json!(["a", "b"]),
            &[Value::from(json!({"4": "v"})), Value::from(json!(["c"]))],
        );
        assert_eq!(json_of(&mixed), r#"{"0":"a","1":"b","4":"v","5":"c"}"#);

        let maps = run(filter_merge, json!({"a": 1, "b": 2}), &[Value::from(json!({"b": 3, "c": 4}))]);
        assert_eq!(json_of(&maps), r#"{"a":1,"b":3,"c":4}"#);

        assert!(filter_merge(Value::List(vec![]), &[]).is_err());
    }
}
