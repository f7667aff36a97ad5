//! Named value transforms for field-mapping pipelines.
//!
//! Every transform is a pure, total function over JSON values: a transform
//! that cannot parse its input returns a safe fallback (empty string, zero,
//! or the unchanged value) instead of failing, and unknown transform names
//! are no-ops by contract. A pipeline is an ordered list of transform names
//! composed left to right.

use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;
use serde_json::{Map as JsonMap, Value as JsonValue};
use std::sync::OnceLock;

/// Date formats tried in order by `parse_date`.
const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d", "%m/%d/%Y", "%d/%m/%Y", "%Y/%m/%d", "%d-%m-%Y", "%m-%d-%Y",
];

/// Datetime formats tried in order by `parse_datetime`.
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%m/%d/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M:%S",
];

/// Tokens accepted as true by `parse_bool` and `boolean_to_bit`.
const TRUTHY_TOKENS: &[&str] = &["true", "yes", "1", "on"];

fn integer_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"-?\d+").unwrap_or_else(|_| unreachable!()))
}

fn email_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}")
            .unwrap_or_else(|_| unreachable!())
    })
}

/// Returns true when `name` identifies a known transform.
pub fn is_known(name: &str) -> bool {
    const KNOWN: &[&str] = &[
        "lowercase",
        "uppercase",
        "trim",
        "remove_spaces",
        "capitalize",
        "title_case",
        "snake_case",
        "camel_case",
        "parse_int",
        "parse_float",
        "parse_bool",
        "parse_date",
        "parse_datetime",
        "to_string",
        "to_timestamp",
        "format_date_us",
        "format_date_iso",
        "extract_numbers",
        "extract_email",
        "remove_special_chars",
        "truncate",
        "truncate_50",
        "truncate_255",
        "default_if_empty",
        "multiply",
        "divide",
        "add",
        "subtract",
        "json_stringify",
        "json_parse",
        "escape_sql",
        "null_to_empty",
        "empty_to_null",
        "boolean_to_bit",
        "normalize_phone",
        "normalize_email",
    ];
    KNOWN.contains(&name)
}

/// Applies one named transform to a value.
///
/// Unknown names return the value unchanged. `params` carries the optional
/// parameters of parameterized transforms (`length`, `default`, `factor`,
/// `value`).
pub fn apply(name: &str, value: JsonValue, params: Option<&JsonMap<String, JsonValue>>) -> JsonValue {
    match name {
        "lowercase" => JsonValue::String(value_to_string(&value).to_lowercase()),
        "uppercase" => JsonValue::String(value_to_string(&value).to_uppercase()),
        "trim" => JsonValue::String(value_to_string(&value).trim().to_string()),
        "remove_spaces" => JsonValue::String(value_to_string(&value).replace(' ', "")),
        "capitalize" => JsonValue::String(capitalize(&value_to_string(&value))),
        "title_case" => JsonValue::String(title_case(&value_to_string(&value))),
        "snake_case" => JsonValue::String(snake_case(&value_to_string(&value))),
        "camel_case" => JsonValue::String(camel_case(&value_to_string(&value))),
        "parse_int" => JsonValue::Number(parse_int(&value).into()),
        "parse_float" => float_value(parse_float(&value)),
        "parse_bool" => JsonValue::Bool(parse_bool(&value)),
        "parse_date" => parse_date(&value),
        "parse_datetime" => parse_datetime(&value),
        "to_string" => JsonValue::String(value_to_string(&value)),
        "to_timestamp" => JsonValue::Number(to_timestamp(&value).into()),
        "format_date_us" => JsonValue::String(reformat_date(&value, "%Y-%m-%d", "%m/%d/%Y")),
        "format_date_iso" => JsonValue::String(reformat_date(&value, "%m/%d/%Y", "%Y-%m-%d")),
        "extract_numbers" => JsonValue::String(extract_numbers(&value)),
        "extract_email" => JsonValue::String(extract_email(&value)),
        "remove_special_chars" => JsonValue::String(remove_special_chars(&value)),
        "truncate" => JsonValue::String(truncate(&value, param_u64(params, "length", 255))),
        "truncate_50" => JsonValue::String(truncate(&value, 50)),
        "truncate_255" => JsonValue::String(truncate(&value, 255)),
        "default_if_empty" => default_if_empty(value, params),
        "multiply" => float_value(coerce_f64(&value).map_or(0.0, |v| v * param_f64(params, "factor", 1.0))),
        "divide" => {
            let factor = param_f64(params, "factor", 1.0);
            let result = match coerce_f64(&value) {
                Some(v) if factor != 0.0 => v / factor,
                _ => 0.0,
            };
            float_value(result)
        }
        "add" => float_value(coerce_f64(&value).map_or(0.0, |v| v + param_f64(params, "value", 0.0))),
        "subtract" => {
            float_value(coerce_f64(&value).map_or(0.0, |v| v - param_f64(params, "value", 0.0)))
        }
        "json_stringify" => match value {
            JsonValue::String(s) => JsonValue::String(s),
            other => JsonValue::String(other.to_string()),
        },
        "json_parse" => match value {
            JsonValue::String(ref s) => serde_json::from_str(s).unwrap_or(value),
            other => other,
        },
        "escape_sql" => JsonValue::String(value_to_string(&value).replace('\'', "''")),
        "null_to_empty" => match value {
            JsonValue::Null => JsonValue::String(String::new()),
            other => other,
        },
        "empty_to_null" => match value {
            JsonValue::String(ref s) if s.trim().is_empty() => JsonValue::Null,
            other => other,
        },
        "boolean_to_bit" => JsonValue::Number(boolean_to_bit(&value).into()),
        "normalize_phone" => JsonValue::String(normalize_phone(&value)),
        "normalize_email" => JsonValue::String(normalize_email(&value)),
        // Unknown transform identifiers are a no-op by contract
        _ => value,
    }
}

/// Applies an ordered pipeline of transforms left to right.
pub fn apply_pipeline(names: &[String], value: JsonValue) -> JsonValue {
    names
        .iter()
        .fold(value, |acc, name| apply(name, acc, None))
}

/// Stringifies a value the way the transforms see it: null becomes the empty
/// string, strings pass through, everything else renders as JSON text.
fn value_to_string(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => String::new(),
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Falsiness used by `default_if_empty` and `normalize_email`: null, false,
/// zero, empty or blank strings, and empty containers.
fn is_empty_like(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => true,
        JsonValue::Bool(b) => !b,
        JsonValue::Number(n) => n.as_f64() == Some(0.0),
        JsonValue::String(s) => s.trim().is_empty(),
        JsonValue::Array(a) => a.is_empty(),
        JsonValue::Object(o) => o.is_empty(),
    }
}

fn float_value(v: f64) -> JsonValue {
    serde_json::Number::from_f64(v)
        .map(JsonValue::Number)
        .unwrap_or_else(|| JsonValue::Number(0.into()))
}

fn coerce_f64(value: &JsonValue) -> Option<f64> {
    match value {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse().ok(),
        JsonValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn param_f64(params: Option<&JsonMap<String, JsonValue>>, key: &str, default: f64) -> f64 {
    params
        .and_then(|p| p.get(key))
        .and_then(coerce_f64)
        .unwrap_or(default)
}

fn param_u64(params: Option<&JsonMap<String, JsonValue>>, key: &str, default: u64) -> u64 {
    params
        .and_then(|p| p.get(key))
        .and_then(JsonValue::as_u64)
        .unwrap_or(default)
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
        None => String::new(),
    }
}

fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut at_word_start = true;
    for c in s.chars() {
        if c.is_alphabetic() {
            if at_word_start {
                out.extend(c.to_uppercase());
            } else {
                out.extend(c.to_lowercase());
            }
            at_word_start = false;
        } else {
            out.push(c);
            at_word_start = true;
        }
    }
    out
}

fn snake_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 4);
    let chars: Vec<char> = s.chars().collect();
    for (i, &c) in chars.iter().enumerate() {
        if c.is_uppercase() {
            let prev_lower = i > 0 && (chars[i - 1].is_lowercase() || chars[i - 1].is_ascii_digit());
            let next_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            if i > 0 && (prev_lower || next_lower) && !out.ends_with('_') {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else if c == ' ' {
            out.push('_');
        } else {
            out.push(c);
        }
    }
    out.to_lowercase()
}

fn camel_case(s: &str) -> String {
    let mut words = s.replace('_', " ");
    words = words.trim().to_string();
    let mut parts = words.split_whitespace();
    let Some(first) = parts.next() else {
        return String::new();
    };
    let mut out = first.to_lowercase();
    for word in parts {
        out.push_str(&capitalize(word));
    }
    out
}

/// Integer parsing with leading-digit extraction; fallback 0.
fn parse_int(value: &JsonValue) -> i64 {
    match value {
        JsonValue::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(0),
        JsonValue::String(s) => integer_pattern()
            .find(s)
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(0),
        JsonValue::Bool(b) => i64::from(*b),
        _ => 0,
    }
}

/// Float parsing with currency/comma stripping; fallback 0.0.
fn parse_float(value: &JsonValue) -> f64 {
    match value {
        JsonValue::Number(n) => n.as_f64().unwrap_or(0.0),
        JsonValue::String(s) => {
            let cleaned: String = s
                .chars()
                .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
                .collect();
            cleaned.parse().unwrap_or(0.0)
        }
        _ => 0.0,
    }
}

fn parse_bool(value: &JsonValue) -> bool {
    match value {
        JsonValue::Bool(b) => *b,
        JsonValue::String(s) => TRUTHY_TOKENS.contains(&s.to_lowercase().as_str()),
        JsonValue::Number(n) => n.as_f64() != Some(0.0),
        JsonValue::Null => false,
        JsonValue::Array(a) => !a.is_empty(),
        JsonValue::Object(o) => !o.is_empty(),
    }
}

/// Date parsing against a fixed ordered format list; output `YYYY-MM-DD`.
/// Unparseable non-empty input passes through as a string.
fn parse_date(value: &JsonValue) -> JsonValue {
    if is_empty_like(value) {
        return JsonValue::Null;
    }
    let text = value_to_string(value);
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(&text, format) {
            return JsonValue::String(date.format("%Y-%m-%d").to_string());
        }
    }
    JsonValue::String(text)
}

/// Datetime parsing against a fixed ordered format list; output ISO-8601.
fn parse_datetime(value: &JsonValue) -> JsonValue {
    if is_empty_like(value) {
        return JsonValue::Null;
    }
    let text = value_to_string(value);
    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(&text, format) {
            return JsonValue::String(dt.format("%Y-%m-%dT%H:%M:%S").to_string());
        }
    }
    JsonValue::String(text)
}

fn to_timestamp(value: &JsonValue) -> i64 {
    let text = value_to_string(value);
    NaiveDate::parse_from_str(&text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp())
        .unwrap_or(0)
}

fn reformat_date(value: &JsonValue, from: &str, to: &str) -> String {
    let text = value_to_string(value);
    match NaiveDate::parse_from_str(&text, from) {
        Ok(date) => date.format(to).to_string(),
        Err(_) => text,
    }
}

fn extract_numbers(value: &JsonValue) -> String {
    value_to_string(value)
        .chars()
        .filter(char::is_ascii_digit)
        .collect()
}

fn extract_email(value: &JsonValue) -> String {
    let text = value_to_string(value);
    email_pattern()
        .find(&text)
        .map(|m| m.as_str().to_string())
        .unwrap_or_default()
}

fn remove_special_chars(value: &JsonValue) -> String {
    value_to_string(value)
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || c.is_whitespace())
        .collect()
}

fn truncate(value: &JsonValue, length: u64) -> String {
    let text = value_to_string(value);
    text.chars().take(length as usize).collect()
}

fn default_if_empty(value: JsonValue, params: Option<&JsonMap<String, JsonValue>>) -> JsonValue {
    if is_empty_like(&value) {
        params
            .and_then(|p| p.get("default"))
            .cloned()
            .unwrap_or_else(|| JsonValue::String(String::new()))
    } else {
        value
    }
}

fn boolean_to_bit(value: &JsonValue) -> i64 {
    match value {
        JsonValue::Bool(b) => i64::from(*b),
        JsonValue::String(s) => i64::from(TRUTHY_TOKENS.contains(&s.to_lowercase().as_str())),
        other => i64::from(parse_bool(other)),
    }
}

/// Digits-only phone normalization; exactly 10 digits formats as
/// `(XXX) XXX-XXXX`.
fn normalize_phone(value: &JsonValue) -> String {
    let digits: String = value_to_string(value)
        .chars()
        .filter(char::is_ascii_digit)
        .collect();
    if digits.len() == 10 {
        format!("({}) {}-{}", &digits[..3], &digits[3..6], &digits[6..])
    } else {
        digits
    }
}

fn normalize_email(value: &JsonValue) -> String {
    if is_empty_like(value) {
        return String::new();
    }
    value_to_string(value).trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn apply_named(name: &str, value: JsonValue) -> JsonValue {
        apply(name, value, None)
    }

    #[test]
    fn test_unknown_transform_is_noop() {
        assert_eq!(
            apply_named("reverse_polarity", json!("abc")),
            json!("abc")
        );
    }

    #[test]
    fn test_case_shaping() {
        assert_eq!(apply_named("lowercase", json!("HeLLo")), json!("hello"));
        assert_eq!(apply_named("uppercase", json!("hello")), json!("HELLO"));
        assert_eq!(apply_named("trim", json!("  x  ")), json!("x"));
        assert_eq!(apply_named("remove_spaces", json!("a b c")), json!("abc"));
        assert_eq!(apply_named("capitalize", json!("hELLO")), json!("Hello"));
        assert_eq!(
            apply_named("title_case", json!("hello wide world")),
            json!("Hello Wide World")
        );
        assert_eq!(
            apply_named("snake_case", json!("firstName Last")),
            json!("first_name_last")
        );
        assert_eq!(
            apply_named("camel_case", json!("first_name last")),
            json!("firstNameLast")
        );
    }

    #[test]
    fn test_parse_int_extracts_leading_digits() {
        assert_eq!(apply_named("parse_int", json!("42 items")), json!(42));
        assert_eq!(apply_named("parse_int", json!("-7 below")), json!(-7));
        assert_eq!(apply_named("parse_int", json!("no digits")), json!(0));
        assert_eq!(apply_named("parse_int", json!(3.9)), json!(3));
        assert_eq!(apply_named("parse_int", json!(12)), json!(12));
    }

    #[test]
    fn test_parse_float_strips_currency() {
        assert_eq!(apply_named("parse_float", json!("$1,234.50")), json!(1234.5));
        assert_eq!(apply_named("parse_float", json!("garbage")), json!(0.0));
    }

    #[test]
    fn test_parse_bool_truthy_tokens() {
        for token in ["true", "Yes", "1", "ON"] {
            assert_eq!(apply_named("parse_bool", json!(token)), json!(true));
        }
        assert_eq!(apply_named("parse_bool", json!("off")), json!(false));
        assert_eq!(apply_named("parse_bool", json!(0)), json!(false));
    }

    #[test]
    fn test_parse_date_formats() {
        assert_eq!(
            apply_named("parse_date", json!("03/15/2024")),
            json!("2024-03-15")
        );
        assert_eq!(
            apply_named("parse_date", json!("2024-03-15")),
            json!("2024-03-15")
        );
        // Unparseable input passes through
        assert_eq!(
            apply_named("parse_date", json!("mid-march")),
            json!("mid-march")
        );
        assert_eq!(apply_named("parse_date", json!(null)), json!(null));
    }

    #[test]
    fn test_parse_datetime() {
        assert_eq!(
            apply_named("parse_datetime", json!("2024-03-15 10:30:00")),
            json!("2024-03-15T10:30:00")
        );
    }

    #[test]
    fn test_date_reformatting() {
        assert_eq!(
            apply_named("format_date_us", json!("2024-03-15")),
            json!("03/15/2024")
        );
        assert_eq!(
            apply_named("format_date_iso", json!("03/15/2024")),
            json!("2024-03-15")
        );
        assert_eq!(apply_named("to_timestamp", json!("1970-01-02")), json!(86400));
    }

    #[test]
    fn test_string_extraction() {
        assert_eq!(
            apply_named("extract_numbers", json!("a1b22c333")),
            json!("122333")
        );
        assert_eq!(
            apply_named("extract_email", json!("reach me at bob@example.org now")),
            json!("bob@example.org")
        );
        assert_eq!(apply_named("extract_email", json!("no email")), json!(""));
        assert_eq!(
            apply_named("remove_special_chars", json!("a!b@c d")),
            json!("abc d")
        );
    }

    #[test]
    fn test_truncate() {
        let mut params = JsonMap::new();
        params.insert("length".to_string(), json!(3));
        assert_eq!(apply("truncate", json!("abcdef"), Some(&params)), json!("abc"));
        assert_eq!(
            apply_named("truncate_50", json!("x".repeat(80))),
            json!("x".repeat(50))
        );
    }

    #[test]
    fn test_arithmetic() {
        let mut params = JsonMap::new();
        params.insert("factor".to_string(), json!(2));
        assert_eq!(apply("multiply", json!(21), Some(&params)), json!(42.0));
        assert_eq!(apply("divide", json!(10), Some(&params)), json!(5.0));

        let mut zero = JsonMap::new();
        zero.insert("factor".to_string(), json!(0));
        assert_eq!(apply("divide", json!(10), Some(&zero)), json!(0.0));

        let mut addend = JsonMap::new();
        addend.insert("value".to_string(), json!(5));
        assert_eq!(apply("add", json!("7"), Some(&addend)), json!(12.0));
        assert_eq!(apply("subtract", json!(7), Some(&addend)), json!(2.0));
        // Unparseable operand falls back to zero
        assert_eq!(apply("add", json!("n/a"), Some(&addend)), json!(0.0));
    }

    #[test]
    fn test_json_coercions() {
        assert_eq!(
            apply_named("json_stringify", json!({"a": 1})),
            json!(r#"{"a":1}"#)
        );
        assert_eq!(
            apply_named("json_parse", json!(r#"{"a":1}"#)),
            json!({"a": 1})
        );
        assert_eq!(
            apply_named("json_parse", json!("not json")),
            json!("not json")
        );
    }

    #[test]
    fn test_null_coercions() {
        assert_eq!(apply_named("null_to_empty", json!(null)), json!(""));
        assert_eq!(apply_named("null_to_empty", json!("x")), json!("x"));
        assert_eq!(apply_named("empty_to_null", json!("   ")), json!(null));
        assert_eq!(apply_named("empty_to_null", json!("x")), json!("x"));
    }

    #[test]
    fn test_boolean_to_bit() {
        assert_eq!(apply_named("boolean_to_bit", json!(true)), json!(1));
        assert_eq!(apply_named("boolean_to_bit", json!("yes")), json!(1));
        assert_eq!(apply_named("boolean_to_bit", json!("no")), json!(0));
    }

    #[test]
    fn test_normalize_phone() {
        assert_eq!(
            apply_named("normalize_phone", json!("+1 (555) 867-5309")),
            json!("15558675309")
        );
        assert_eq!(
            apply_named("normalize_phone", json!("555.867.5309")),
            json!("(555) 867-5309")
        );
    }

    #[test]
    fn test_normalize_email() {
        assert_eq!(
            apply_named("normalize_email", json!(" A@B.COM ")),
            json!("a@b.com")
        );
        assert_eq!(apply_named("normalize_email", json!(null)), json!(""));
    }

    #[test]
    fn test_escape_sql() {
        assert_eq!(
            apply_named("escape_sql", json!("O'Brien")),
            json!("O''Brien")
        );
    }

    #[test]
    fn test_default_if_empty() {
        let mut params = JsonMap::new();
        params.insert("default".to_string(), json!("n/a"));
        assert_eq!(apply("default_if_empty", json!(""), Some(&params)), json!("n/a"));
        assert_eq!(apply("default_if_empty", json!("x"), Some(&params)), json!("x"));
    }

    #[test]
    fn test_pipeline_composes_left_to_right() {
        let names = vec!["trim".to_string(), "lowercase".to_string()];
        assert_eq!(apply_pipeline(&names, json!("  MiXeD  ")), json!("mixed"));
    }

    #[test]
    fn test_pipeline_is_deterministic() {
        let names = vec![
            "trim".to_string(),
            "normalize_email".to_string(),
            "truncate_50".to_string(),
        ];
        let a = apply_pipeline(&names, json!("  A@B.COM "));
        let b = apply_pipeline(&names, json!("  A@B.COM "));
        assert_eq!(a, b);
    }
}
