//! Typed errors and HTTP mapping.

use crate::response::{json_response, MutationEnvelope};
use crate::store::StoreError;
use axum::{
    http::{header::ALLOW, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing reference: {kind} '{id}'")]
    MissingReference { kind: &'static str, id: String },
    #[error("record type {0} has no discoverable primary key")]
    MissingPrimaryKey(String),
    #[error("invalid primary key: record type {record_type} field {field}")]
    InvalidPrimaryKey { record_type: String, field: String },
    #[error("duplicate record type: {0}")]
    DuplicateRecordType(String),
    #[error("duplicate path segment: {0}")]
    DuplicatePathSegment(String),
    #[error("duplicate field {field} on {record_type}")]
    DuplicateField { record_type: String, field: String },
    #[error("schema load: {0}")]
    Load(String),
    #[error("settings: {0}")]
    Settings(String),
    #[error("validation: {0}")]
    Validation(String),
}

pub const MSG_UNPARSEABLE: &str = "Unable to parse incoming record.";
pub const MSG_NOT_FOUND: &str = "The record could not be found.";
pub const MSG_BAD_FILTER: &str = "Bad search term.";
pub const MSG_INTERNAL: &str = "An internal error occurred.";
pub const MSG_FORBIDDEN: &str = "You are not permitted to access this resource.";
pub const MSG_METHOD_NOT_ALLOWED: &str = "Method not allowed.";

/// Request-level failure. Every variant renders as the mutation envelope with `success: false`.
#[derive(Error, Debug)]
pub enum AppError {
    /// Malformed body or a payload value the record cannot take.
    #[error("validation: {message}")]
    Validation {
        message: String,
        /// Diagnostic echoed under `exception`; only the create path sets it.
        exception: Option<String>,
    },
    #[error("not found: {0}")]
    NotFound(String),
    #[error("bad filter: {0}")]
    BadFilter(String),
    #[error("forbidden")]
    Forbidden,
    #[error("method not allowed")]
    MethodNotAllowed { allow: &'static str },
    /// Anything unanticipated from the store; never echoed to the client.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        AppError::Validation {
            message: message.into(),
            exception: None,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation { .. } | AppError::BadFilter(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            AppError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            AppError::MethodNotAllowed { allow } => {
                let mut response = json_response(status, &MutationEnvelope::failure(MSG_METHOD_NOT_ALLOWED));
                response.headers_mut().insert(ALLOW, HeaderValue::from_static(allow));
                return response;
            }
            AppError::Validation { exception, .. } => {
                tracing::warn!(error = %self, "rejected incoming record");
                MutationEnvelope::failure(MSG_UNPARSEABLE).with_exception(exception.clone())
            }
            AppError::NotFound(_) => MutationEnvelope::failure(MSG_NOT_FOUND),
            AppError::BadFilter(_) => {
                tracing::warn!(error = %self, "rejected read filter");
                MutationEnvelope::failure(MSG_BAD_FILTER)
            }
            AppError::Forbidden => MutationEnvelope::failure(MSG_FORBIDDEN),
            AppError::Store(_) => {
                tracing::error!(error = %self, "request failed");
                MutationEnvelope::failure(MSG_INTERNAL)
            }
        };
        json_response(status, &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header::CONTENT_TYPE;

    #[test]
    fn method_not_allowed_carries_allow_header() {
        let response = AppError::MethodNotAllowed { allow: "PUT, DELETE" }.into_response();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers().get(ALLOW).and_then(|v| v.to_str().ok()), Some("PUT, DELETE"));
        assert_eq!(
            response.headers().get(CONTENT_TYPE).and_then(|v| v.to_str().ok()),
            Some(crate::response::CONTENT_TYPE_JSON)
        );
    }

    #[test]
    fn status_classes() {
        assert_eq!(AppError::validation("x").status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::BadFilter("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::NotFound("x".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(AppError::Forbidden.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            AppError::Store(StoreError::Backend("x".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
