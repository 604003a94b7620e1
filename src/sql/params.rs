//! Convert serde_json::Value to bindable text parameters. Every parameter is bound as text and cast in SQL
//! to the column type, so one binding path serves every scalar kind.

use crate::coerce::{coerce_key, value_to_text};
use crate::schema::ScalarKind;
use serde_json::Value;

/// PostgreSQL type used to cast a text parameter for a scalar kind. `None` leaves the parameter uncast.
pub fn pg_cast(kind: ScalarKind) -> Option<&'static str> {
    use ScalarKind::*;
    Some(match kind {
        AutoField | BigAutoField | IntegerField | BigIntegerField | SmallIntegerField | PositiveIntegerField
        | PositiveSmallIntegerField => "int8",
        FloatField => "float8",
        DecimalField => "numeric",
        BooleanField | NullBooleanField => "bool",
        CharField | TextField => "text",
        DateField => "date",
        DateTimeField => "timestamptz",
        TimeField => "time",
        UUIDField => "uuid",
        JSONField => "jsonb",
        Other => return None,
    })
}

/// Text parameter for a value of the given kind; `None` binds SQL NULL.
pub fn text_param(kind: ScalarKind, v: &Value) -> Option<String> {
    match (kind, v) {
        (_, Value::Null) => None,
        (ScalarKind::JSONField, v) => Some(v.to_string()),
        (_, v) => value_to_text(v),
    }
}

/// Normalize a query-string filter term to the column's canonical text form ("True" → "true", "05" → "5").
/// Terms that do not coerce are compared as given.
pub fn filter_term(kind: ScalarKind, term: &str) -> String {
    coerce_key(kind, &Value::String(term.to_string()))
        .ok()
        .and_then(|v| value_to_text(&v))
        .unwrap_or_else(|| term.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_values_bind_as_json_text() {
        assert_eq!(text_param(ScalarKind::JSONField, &json!("a")), Some("\"a\"".into()));
        assert_eq!(text_param(ScalarKind::CharField, &json!("a")), Some("a".into()));
        assert_eq!(text_param(ScalarKind::IntegerField, &Value::Null), None);
    }

    #[test]
    fn filter_terms_are_canonicalized() {
        assert_eq!(filter_term(ScalarKind::BooleanField, "True"), "true");
        assert_eq!(filter_term(ScalarKind::IntegerField, "05"), "5");
        assert_eq!(filter_term(ScalarKind::IntegerField, "abc"), "abc");
    }
}
