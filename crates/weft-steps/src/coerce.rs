use serde_json::{Number, Value};

/// Render a value as text: strings raw, null empty, containers as compact JSON.
pub fn to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

/// Numeric reading of a value. Strings are trimmed and parsed; booleans and null are not numbers.
pub fn to_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_f64_text(s),
        _ => None,
    }
}

/// Parse trimmed, non-empty text as a finite float.
pub fn parse_f64_text(text: &str) -> Option<f64> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|f| f.is_finite())
}

/// Parse text as an integer first, then as a float.
pub fn parse_number(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Ok(i) = trimmed.parse::<i64>() {
        return Some(Value::Number(i.into()));
    }
    parse_f64_text(trimmed).and_then(Number::from_f64).map(Value::Number)
}

/// Only `"true"` (any case) is true.
pub fn parse_bool(text: &str) -> bool {
    text.trim().eq_ignore_ascii_case("true")
}

/// Loose truthiness used for config flags given as strings or numbers.
pub use weft_core::workflow::flag_value as to_bool;

/// Integer reading of a value; floats with no fractional part are accepted.
pub fn to_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

/// Display form of a float: integral values print without a decimal point.
pub fn number_value(f: f64) -> Value {
    if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
        Value::Number((f as i64).into())
    } else {
        Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_to_text() {
        assert_eq!(to_text(&json!("hi")), "hi");
        assert_eq!(to_text(&json!(3)), "3");
        assert_eq!(to_text(&json!(2.5)), "2.5");
        assert_eq!(to_text(&Value::Null), "");
        assert_eq!(to_text(&json!([1, 2])), "[1,2]");
    }

    #[test]
    fn test_to_number() {
        assert_eq!(to_number(&json!(" 10 ")), Some(10.0));
        assert_eq!(to_number(&json!(1.5)), Some(1.5));
        assert_eq!(to_number(&json!("ten")), None);
        assert_eq!(to_number(&json!("")), None);
        assert_eq!(to_number(&json!(true)), None);
    }

    #[test]
    fn test_parse_number_prefers_integers() {
        assert_eq!(parse_number("42"), Some(json!(42)));
        assert_eq!(parse_number("4.25"), Some(json!(4.25)));
        assert_eq!(parse_number("abc"), None);
    }

    #[test]
    fn test_parse_bool_is_strict() {
        assert!(parse_bool("TRUE"));
        assert!(parse_bool("true"));
        assert!(!parse_bool("yes"));
        assert!(!parse_bool("1"));
    }

    #[test]
    fn test_to_i64() {
        assert_eq!(to_i64(&json!(5)), Some(5));
        assert_eq!(to_i64(&json!(5.0)), Some(5));
        assert_eq!(to_i64(&json!(5.5)), None);
        assert_eq!(to_i64(&json!("7")), Some(7));
    }
}
