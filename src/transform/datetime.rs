//! Date operators: parsing to and formatting from ISO-8601.
//!
//! Format strings are strftime patterns. Unparseable input is data, not
//! a template error, so it yields null and lets the chain bail.

use chrono::{NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;

use crate::transform::decode_args;
use crate::Result;

const ISO_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

#[derive(serde::Deserialize)]
struct DateArgs {
    format: String,
    /// Accepted for template compatibility; rendering is invariant.
    #[serde(default)]
    #[allow(dead_code)]
    locale: Option<String>,
}

fn parse_iso(s: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, ISO_FORMAT) {
        return Some(dt);
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Locale-formatted string in, ISO-8601 out.
pub(crate) fn op_parse_date(arg: &Value, input: &Value) -> Result<Value> {
    let args: DateArgs = decode_args("parseDate", arg)?;
    let Some(s) = input.as_str() else {
        return Ok(Value::Null);
    };

    let parsed = NaiveDateTime::parse_from_str(s, &args.format)
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(s, &args.format)
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        });
    match parsed {
        Some(dt) => Ok(Value::String(dt.format(ISO_FORMAT).to_string())),
        None => Ok(Value::Null),
    }
}

/// ISO-8601 string in, formatted string out.
pub(crate) fn op_format_date(arg: &Value, input: &Value) -> Result<Value> {
    let args: DateArgs = decode_args("formatDate", arg)?;
    let Some(s) = input.as_str() else {
        return Ok(Value::Null);
    };
    match parse_iso(s) {
        Some(dt) => Ok(Value::String(dt.format(&args.format).to_string())),
        None => Ok(Value::Null),
    }
}

/// Current unix time in seconds.
pub(crate) fn op_now() -> Value {
    Value::from(Utc::now().timestamp())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::transform::Transformation;

    fn run(template: Value, input: Value) -> Value {
        Transformation::new(&template)
            .unwrap()
            .transform(&input)
            .unwrap()
    }

    #[test]
    fn parse_date_to_iso() {
        assert_eq!(
            run(
                json!({"parseDate": {"format": "%d/%m/%Y %H:%M"}}),
                json!("01/03/2021 12:30")
            ),
            json!("2021-03-01T12:30:00")
        );
    }

    #[test]
    fn parse_date_date_only_format() {
        assert_eq!(
            run(json!({"parseDate": {"format": "%d.%m.%Y"}}), json!("02.01.2020")),
            json!("2020-01-02T00:00:00")
        );
    }

    #[test]
    fn parse_date_garbage_is_null() {
        assert_eq!(
            run(json!({"parseDate": {"format": "%Y-%m-%d"}}), json!("not a date")),
            Value::Null
        );
    }

    #[test]
    fn format_date_from_iso() {
        assert_eq!(
            run(
                json!({"formatDate": {"format": "%d.%m.%Y"}}),
                json!("2021-03-01T12:30:00")
            ),
            json!("01.03.2021")
        );
    }

    #[test]
    fn format_date_accepts_rfc3339_offsets() {
        assert_eq!(
            run(
                json!({"formatDate": {"format": "%H:%M"}}),
                json!("2021-03-01T12:30:00+02:00")
            ),
            json!("10:30")
        );
    }

    #[test]
    fn parse_then_format_roundtrip() {
        let iso = run(
            json!({"parseDate": {"format": "%m/%d/%Y"}}),
            json!("03/01/2021"),
        );
        assert_eq!(
            run(json!({"formatDate": {"format": "%m/%d/%Y"}}), iso),
            json!("03/01/2021")
        );
    }

    #[test]
    fn now_is_unix_seconds() {
        let out = run(json!({"now": {}}), json!({}));
        // 2024-01-01 as a floor; the exact value is wall-clock dependent.
        assert!(out.as_i64().unwrap() > 1_704_067_200);
    }
}
