//! Grid response envelopes and the JSON writer.

use crate::record::FlatRecord;
use crate::schema::FieldMeta;
use axum::{
    http::{header::CONTENT_TYPE, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Serialize;

pub const CONTENT_TYPE_JSON: &str = "application/json; charset=UTF-8";

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaData {
    pub root: &'static str,
    pub id_property: String,
    pub success_property: &'static str,
    pub fields: Vec<FieldMeta>,
}

/// Collection form: metadata plus rows.
#[derive(Clone, Debug, Serialize)]
pub struct CollectionEnvelope {
    #[serde(rename = "metaData")]
    pub meta_data: MetaData,
    pub rows: Vec<FlatRecord>,
}

/// Mutation form: outcome of create/update/delete or any failure.
#[derive(Clone, Debug, Default, Serialize)]
pub struct MutationEnvelope {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<FlatRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exception: Option<String>,
}

impl MutationEnvelope {
    pub fn success(message: Option<&str>, data: Option<FlatRecord>) -> Self {
        Self {
            success: true,
            message: message.map(String::from),
            data,
            exception: None,
        }
    }

    pub fn failure(message: &str) -> Self {
        Self {
            success: false,
            message: Some(message.to_string()),
            ..Self::default()
        }
    }

    pub fn with_exception(mut self, exception: Option<String>) -> Self {
        self.exception = exception;
        self
    }
}

/// Serialize `body` with the grid content type. Serialization of these envelopes cannot fail in practice;
/// if it does, the client still gets a well-formed failure body.
pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response {
    let (status, bytes) = match serde_json::to_vec(body) {
        Ok(bytes) => (status, bytes),
        Err(e) => {
            tracing::error!(error = %e, "response serialization failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                br#"{"success":false,"message":"An internal error occurred."}"#.to_vec(),
            )
        }
    };
    (
        status,
        [(CONTENT_TYPE, HeaderValue::from_static(CONTENT_TYPE_JSON))],
        bytes,
    )
        .into_response()
}
