//! JSON grid handlers: create, read, update, delete with one transaction per mutating request.

use super::CrudHandlerSet;
use crate::coerce::coerce_key;
use crate::error::AppError;
use crate::extractors::Caller;
use crate::query::QuerySpec;
use crate::record::{FlatRecord, Record};
use crate::response::{json_response, MutationEnvelope};
use crate::schema::{FieldDescriptor, RecordType, Registry};
use crate::serialize::{to_envelope, to_flat_record};
use crate::setter::{partition_payload, set_field, SetFieldError};
use crate::store::{RecordStore, Scope, StoreError, StoreTransaction};
use async_trait::async_trait;
use axum::{body::Bytes, http::StatusCode, response::Response};
use serde_json::Value;
use std::fmt::Display;
use std::sync::Arc;

pub const MSG_CREATED: &str = "Created new record.";
pub const MSG_DELETED: &str = "Record deleted.";

/// `{"data": {...}}` → the inner object.
fn data_object(value: Value) -> Option<FlatRecord> {
    match value {
        Value::Object(mut outer) => match outer.remove("data") {
            Some(Value::Object(data)) => Some(data),
            _ => None,
        },
        _ => None,
    }
}

/// Form-encoded pairs as a payload. Repeated keys of many-to-many fields collect into an array;
/// any other repeated key keeps its last value.
fn form_payload(rt: &RecordType, body: &[u8]) -> Result<FlatRecord, serde_urlencoded::de::Error> {
    let pairs: Vec<(String, String)> = serde_urlencoded::from_bytes(body)?;
    let mut payload = FlatRecord::new();
    for (name, value) in pairs {
        if rt.field(&name).is_some_and(FieldDescriptor::is_many_to_many) {
            if let Value::Array(items) = payload.entry(name).or_insert_with(|| Value::Array(Vec::new())) {
                items.push(Value::String(value));
            }
        } else {
            payload.insert(name, Value::String(value));
        }
    }
    Ok(payload)
}

fn create_payload(rt: &RecordType, body: &[u8]) -> Result<FlatRecord, AppError> {
    let unparseable = |detail: String| AppError::Validation {
        message: detail.clone(),
        exception: Some(detail),
    };
    match serde_json::from_slice::<Value>(body) {
        Ok(value) => data_object(value).ok_or_else(|| unparseable("request body has no \"data\" object".into())),
        Err(_) => form_payload(rt, body).map_err(|e| unparseable(e.to_string())),
    }
}

fn update_payload(body: &[u8]) -> Result<FlatRecord, AppError> {
    serde_json::from_slice::<Value>(body)
        .ok()
        .and_then(data_object)
        .ok_or_else(|| AppError::validation("request body is not a JSON object with a \"data\" object"))
}

/// The caller's visible record set: owner-scoped types only show the caller's own records.
fn scope(rt: &RecordType, caller: &Caller) -> Scope {
    let mut scope = Scope::new();
    if let Some(owner) = &rt.owner_field {
        scope.insert(owner.clone(), caller.user.clone());
    }
    scope
}

fn parse_id(rt: &RecordType, id: &str) -> Result<Value, AppError> {
    coerce_key(rt.primary_key_field().kind, &Value::String(id.to_string()))
        .map_err(|_| AppError::NotFound(format!("{} {}", rt.name, id)))
}

fn setter_failure(e: SetFieldError) -> AppError {
    match e {
        SetFieldError::Store(e) => AppError::Store(e),
        e @ SetFieldError::TargetNotFound { .. } => AppError::NotFound(e.to_string()),
        e => AppError::validation(e.to_string()),
    }
}

async fn rollback<T: StoreTransaction>(tx: T, rt: &RecordType, reason: &(dyn Display + Sync)) {
    tracing::warn!(record_type = %rt.name, reason = %reason, "rolling back");
    if let Err(e) = tx.rollback().await {
        tracing::error!(record_type = %rt.name, error = %e, "rollback failed");
    }
}

/// The record as stored, so the response carries store-assigned defaults and resolved relations.
async fn reload<T: StoreTransaction>(tx: &mut T, rt: &RecordType, record: Record) -> Result<Record, StoreError> {
    let Some(pk) = record.pk().cloned() else {
        return Ok(record);
    };
    Ok(tx.fetch(rt, &pk, &Scope::new()).await?.unwrap_or(record))
}

/// Grid handlers over any [`RecordStore`].
pub struct ExtJsonHandlers<S> {
    store: Arc<S>,
    registry: Arc<Registry>,
}

impl<S: RecordStore> ExtJsonHandlers<S> {
    pub fn new(store: Arc<S>, registry: Arc<Registry>) -> Self {
        Self { store, registry }
    }

    /// Plain and foreign-key fields, then the owner stamp, then the first save, then many-to-many
    /// fields (they need the primary key the save produced). The store's save is idempotent, so no
    /// second save follows the link writes.
    async fn apply_create(
        &self,
        tx: &mut S::Tx,
        rt: &RecordType,
        caller: &Caller,
        payload: &FlatRecord,
    ) -> Result<Record, SetFieldError> {
        let (plain, related) = partition_payload(rt, payload);
        let mut record = Record::new(rt);
        for (name, raw) in plain {
            if rt.owner_field.as_deref() == Some(name) {
                continue;
            }
            set_field(tx, &self.registry, rt, &mut record, name, raw).await?;
        }
        if let Some(owner) = &rt.owner_field {
            let user = Value::String(caller.user.clone());
            set_field(tx, &self.registry, rt, &mut record, owner, &user).await?;
        }
        tx.save(rt, &mut record).await?;
        for (name, raw) in related {
            set_field(tx, &self.registry, rt, &mut record, name, raw).await?;
        }
        Ok(record)
    }

    async fn apply_update(
        &self,
        tx: &mut S::Tx,
        rt: &RecordType,
        record: &mut Record,
        payload: &FlatRecord,
    ) -> Result<(), SetFieldError> {
        for (name, raw) in payload {
            if rt.owner_field.as_deref() == Some(name.as_str()) {
                continue;
            }
            set_field(tx, &self.registry, rt, record, name, raw).await?;
        }
        tx.save(rt, record).await?;
        Ok(())
    }
}

#[async_trait]
impl<S: RecordStore> CrudHandlerSet for ExtJsonHandlers<S> {
    async fn create(&self, rt: &RecordType, caller: &Caller, body: Bytes) -> Result<Response, AppError> {
        let payload = create_payload(rt, &body)?;
        let mut tx = self.store.begin().await?;
        let applied = match self.apply_create(&mut tx, rt, caller, &payload).await {
            Ok(record) => reload(&mut tx, rt, record).await.map_err(SetFieldError::from),
            Err(e) => Err(e),
        };
        let record = match applied {
            Ok(record) => record,
            Err(e) => {
                rollback(tx, rt, &e).await;
                return Err(AppError::Validation {
                    message: e.to_string(),
                    exception: Some(e.to_string()),
                });
            }
        };
        tx.commit().await?;
        tracing::debug!(record_type = %rt.name, "created record");
        let envelope = MutationEnvelope::success(Some(MSG_CREATED), Some(to_flat_record(rt, &record)));
        Ok(json_response(StatusCode::OK, &envelope))
    }

    async fn read(&self, rt: &RecordType, caller: &Caller, params: &[(String, String)]) -> Result<Response, AppError> {
        let mut spec = QuerySpec::from_params(params);
        if let Some(owner) = &rt.owner_field {
            spec = spec.with_filter(owner.clone(), caller.user.clone());
        }
        let records = self.store.query(rt, &spec).await.map_err(|e| match e {
            e @ StoreError::UnknownField { .. } => AppError::BadFilter(e.to_string()),
            e => AppError::Store(e),
        })?;
        Ok(json_response(StatusCode::OK, &to_envelope(rt, &records)))
    }

    async fn update(&self, rt: &RecordType, caller: &Caller, id: &str, body: Bytes) -> Result<Response, AppError> {
        let payload = update_payload(&body)?;
        let id = parse_id(rt, id)?;
        let mut tx = self.store.begin().await?;
        let mut record = match tx.fetch(rt, &id, &scope(rt, caller)).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                rollback(tx, rt, &"record not found").await;
                return Err(AppError::NotFound(format!("{} {}", rt.name, id)));
            }
            Err(e) => {
                rollback(tx, rt, &e).await;
                return Err(e.into());
            }
        };
        if let Err(e) = self.apply_update(&mut tx, rt, &mut record, &payload).await {
            rollback(tx, rt, &e).await;
            return Err(setter_failure(e));
        }
        let record = match reload(&mut tx, rt, record).await {
            Ok(record) => record,
            Err(e) => {
                rollback(tx, rt, &e).await;
                return Err(e.into());
            }
        };
        tx.commit().await?;
        let envelope = MutationEnvelope::success(None, Some(to_flat_record(rt, &record)));
        Ok(json_response(StatusCode::OK, &envelope))
    }

    async fn delete(&self, rt: &RecordType, caller: &Caller, id: &str) -> Result<Response, AppError> {
        let id = parse_id(rt, id)?;
        if self.store.fetch(rt, &id, &scope(rt, caller)).await?.is_none() {
            return Err(AppError::NotFound(format!("{} {}", rt.name, id)));
        }
        self.store.delete(rt, &id).await?;
        Ok(json_response(StatusCode::OK, &MutationEnvelope::success(Some(MSG_DELETED), None)))
    }
}
