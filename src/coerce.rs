//! Coercion of raw wire values into a field's native type, plus text rendering and ordering of values.

use crate::schema::ScalarKind;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use serde_json::{Number, Value};
use std::cmp::Ordering;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoerceError {
    #[error("value may not be null")]
    NotNullable,
    #[error("expected {expected}, got {got}")]
    Invalid { expected: &'static str, got: String },
}

fn invalid(expected: &'static str, got: &Value) -> CoerceError {
    CoerceError::Invalid {
        expected,
        got: got.to_string(),
    }
}

fn is_text_kind(kind: ScalarKind) -> bool {
    matches!(kind, ScalarKind::CharField | ScalarKind::TextField | ScalarKind::Other)
}

/// Coerce `raw` to the native wire representation of `kind`.
/// Empty strings count as null for nullable non-text fields (form posts cannot express null).
pub fn coerce_scalar(kind: ScalarKind, nullable: bool, raw: &Value) -> Result<Value, CoerceError> {
    let is_blank = matches!(raw, Value::String(s) if s.trim().is_empty());
    if raw.is_null() || (is_blank && nullable && !is_text_kind(kind)) {
        return if nullable || kind == ScalarKind::NullBooleanField {
            Ok(Value::Null)
        } else {
            Err(CoerceError::NotNullable)
        };
    }
    coerce_present(kind, raw)
}

/// Coerce a primary key value (never null).
pub fn coerce_key(kind: ScalarKind, raw: &Value) -> Result<Value, CoerceError> {
    if raw.is_null() {
        return Err(CoerceError::NotNullable);
    }
    coerce_present(kind, raw)
}

fn coerce_present(kind: ScalarKind, raw: &Value) -> Result<Value, CoerceError> {
    use ScalarKind::*;
    match kind {
        AutoField | BigAutoField | IntegerField | BigIntegerField | SmallIntegerField => {
            to_integer(raw).map(Value::from).ok_or_else(|| invalid("an integer", raw))
        }
        PositiveIntegerField | PositiveSmallIntegerField => match to_integer(raw) {
            Some(n) if n >= 0 => Ok(Value::from(n)),
            _ => Err(invalid("a non-negative integer", raw)),
        },
        FloatField => to_float(raw)
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| invalid("a number", raw)),
        DecimalField => match raw {
            Value::Number(n) => Ok(Value::String(n.to_string())),
            Value::String(s) if s.trim().parse::<f64>().map(f64::is_finite).unwrap_or(false) => {
                Ok(Value::String(s.trim().to_string()))
            }
            _ => Err(invalid("a decimal", raw)),
        },
        BooleanField | NullBooleanField => to_bool(raw).map(Value::Bool).ok_or_else(|| invalid("a boolean", raw)),
        CharField | TextField => match raw {
            Value::String(_) => Ok(raw.clone()),
            Value::Number(n) => Ok(Value::String(n.to_string())),
            Value::Bool(b) => Ok(Value::String(if *b { "True" } else { "False" }.into())),
            _ => Err(invalid("a string", raw)),
        },
        DateField => raw
            .as_str()
            .and_then(parse_date)
            .map(|d| Value::String(d.format("%Y-%m-%d").to_string()))
            .ok_or_else(|| invalid("a date (YYYY-MM-DD)", raw)),
        DateTimeField => raw
            .as_str()
            .and_then(normalize_datetime)
            .map(Value::String)
            .ok_or_else(|| invalid("a date and time", raw)),
        TimeField => raw
            .as_str()
            .and_then(parse_time)
            .map(|t| Value::String(t.format("%H:%M:%S").to_string()))
            .ok_or_else(|| invalid("a time (HH:MM[:SS])", raw)),
        UUIDField => raw
            .as_str()
            .and_then(|s| uuid::Uuid::parse_str(s.trim()).ok())
            .map(|u| Value::String(u.to_string()))
            .ok_or_else(|| invalid("a UUID", raw)),
        JSONField | Other => Ok(raw.clone()),
    }
}

fn to_integer(raw: &Value) -> Option<i64> {
    match raw {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn to_float(raw: &Value) -> Option<f64> {
    match raw {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

fn to_bool(raw: &Value) -> Option<bool> {
    match raw {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_i64() {
            Some(0) => Some(false),
            Some(1) => Some(true),
            _ => None,
        },
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "on" | "yes" | "1" => Some(true),
            "false" | "off" | "no" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .or_else(|| parse_naive_datetime(s).map(|dt| dt.date()))
        .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.date_naive()))
}

fn parse_naive_datetime(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M"))
        .ok()
}

fn normalize_datetime(s: &str) -> Option<String> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.to_rfc3339());
    }
    if let Some(dt) = parse_naive_datetime(s) {
        return Some(dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string());
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .map(|d| format!("{}T00:00:00", d.format("%Y-%m-%d")))
}

fn parse_time(s: &str) -> Option<NaiveTime> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, "%H:%M:%S%.f")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .ok()
}

/// Text form used for display strings, filter comparison and SQL text parameters. `None` for null.
pub fn value_to_text(v: &Value) -> Option<String> {
    match v {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(_) | Value::Object(_) => Some(v.to_string()),
    }
}

/// Whether a stored value equals a query-string filter term.
pub fn matches_term(stored: &Value, term: &str) -> bool {
    match stored {
        Value::Null => term.eq_ignore_ascii_case("none") || term.eq_ignore_ascii_case("null"),
        Value::Bool(b) => to_bool(&Value::String(term.to_string())) == Some(*b),
        Value::Number(n) => match (n.as_f64(), term.trim().parse::<f64>()) {
            (Some(a), Ok(b)) => a == b,
            _ => false,
        },
        other => value_to_text(other).as_deref() == Some(term),
    }
}

/// Total order over stored values: nulls first, then numbers, booleans, strings, anything else by text.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Number(_) => 1,
            Value::Bool(_) => 2,
            Value::String(_) => 3,
            _ => 4,
        }
    }
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .unwrap_or(0.0)
            .partial_cmp(&y.as_f64().unwrap_or(0.0))
            .unwrap_or(Ordering::Equal),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ if rank(a) != rank(b) => rank(a).cmp(&rank(b)),
        _ => a.to_string().cmp(&b.to_string()),
    }
}
