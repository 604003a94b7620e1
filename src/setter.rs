//! Field setter: applies one raw wire value to a record, resolving relations through the open transaction.

use crate::coerce::{coerce_key, coerce_scalar, value_to_text, CoerceError};
use crate::record::{FieldValue, FlatRecord, Record, RelatedRef};
use crate::schema::{FieldDescriptor, RecordType, Registry, Relation, RelationTarget};
use crate::store::{Scope, StoreError, StoreTransaction};
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SetFieldError {
    #[error("{record_type} has no field '{field}'")]
    UnknownField { record_type: String, field: String },
    #[error("{field}: {source}")]
    InvalidValue {
        field: String,
        #[source]
        source: CoerceError,
    },
    #[error("{target} matching query does not exist (pk={pk})")]
    TargetNotFound { target: String, pk: String },
    #[error("primary key of {record_type} cannot change")]
    PrimaryKeyChange { record_type: String },
    #[error("{field}: record must be saved before it can be related")]
    NotSaved { field: String },
    #[error(transparent)]
    Store(#[from] StoreError),
}

fn invalid(field: &FieldDescriptor, source: CoerceError) -> SetFieldError {
    SetFieldError::InvalidValue {
        field: field.name.clone(),
        source,
    }
}

fn is_blank(raw: &Value) -> bool {
    match raw {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

/// Split a payload into (plain and foreign-key fields, many-to-many fields), keeping payload order.
/// Names the record type does not know stay in the first group so applying them reports the error.
pub fn partition_payload<'a>(
    rt: &RecordType,
    payload: &'a FlatRecord,
) -> (Vec<(&'a str, &'a Value)>, Vec<(&'a str, &'a Value)>) {
    payload
        .iter()
        .map(|(k, v)| (k.as_str(), v))
        .partition(|(k, _)| !rt.field(k).is_some_and(FieldDescriptor::is_many_to_many))
}

/// Apply `raw` to `field` of `record`.
///
/// Plain fields are coerced to their native type. A foreign key is resolved to an existing target
/// record (its display string is captured for serialization). A many-to-many field replaces the whole
/// related set, which requires the record to have been saved already.
pub async fn set_field<T: StoreTransaction>(
    tx: &mut T,
    registry: &Registry,
    rt: &RecordType,
    record: &mut Record,
    field: &str,
    raw: &Value,
) -> Result<(), SetFieldError> {
    let descriptor = rt.field(field).ok_or_else(|| SetFieldError::UnknownField {
        record_type: rt.name.clone(),
        field: field.to_string(),
    })?;

    match &descriptor.relation {
        Relation::None if descriptor.name == rt.primary_key => set_primary_key(rt, record, descriptor, raw),
        Relation::None => {
            let value = coerce_scalar(descriptor.kind, descriptor.nullable, raw).map_err(|e| invalid(descriptor, e))?;
            record.set(descriptor.name.clone(), FieldValue::Scalar(value));
            Ok(())
        }
        Relation::ForeignKey(target) => {
            if is_blank(raw) {
                if !descriptor.nullable {
                    return Err(invalid(descriptor, CoerceError::NotNullable));
                }
                record.set(descriptor.name.clone(), FieldValue::ForeignKey(None));
                return Ok(());
            }
            let related = resolve_target(tx, registry, descriptor, target, raw).await?;
            record.set(descriptor.name.clone(), FieldValue::ForeignKey(Some(related)));
            Ok(())
        }
        Relation::ManyToMany(target, _) => {
            let raw_keys: Vec<&Value> = match raw {
                Value::Array(items) => items.iter().filter(|v| !is_blank(v)).collect(),
                v if is_blank(v) => Vec::new(),
                v => vec![v],
            };
            // Resolve everything before touching the current links.
            let mut keys: Vec<Value> = Vec::with_capacity(raw_keys.len());
            for raw_key in raw_keys {
                let related = resolve_target(tx, registry, descriptor, target, raw_key).await?;
                if !keys.iter().any(|k| value_to_text(k) == value_to_text(&related.pk)) {
                    keys.push(related.pk);
                }
            }
            let pk = match record.pk() {
                Some(pk) if record.is_persisted() => pk.clone(),
                _ => {
                    return Err(SetFieldError::NotSaved {
                        field: descriptor.name.clone(),
                    })
                }
            };
            tx.clear_related(rt, descriptor, &pk).await?;
            tx.add_related(rt, descriptor, &pk, &keys).await?;
            record.set(descriptor.name.clone(), FieldValue::ManyToMany(keys));
            Ok(())
        }
    }
}

/// A payload may repeat the current primary key; a new record may choose its own.
fn set_primary_key(rt: &RecordType, record: &mut Record, field: &FieldDescriptor, raw: &Value) -> Result<(), SetFieldError> {
    if record.pk().is_none() && is_blank(raw) {
        return Ok(());
    }
    let pk = coerce_key(field.kind, raw).map_err(|e| invalid(field, e))?;
    match record.pk() {
        Some(current) if value_to_text(current) == value_to_text(&pk) => Ok(()),
        Some(_) => Err(SetFieldError::PrimaryKeyChange {
            record_type: rt.name.clone(),
        }),
        None => {
            record.set_pk(pk);
            Ok(())
        }
    }
}

async fn resolve_target<T: StoreTransaction>(
    tx: &mut T,
    registry: &Registry,
    field: &FieldDescriptor,
    target: &RelationTarget,
    raw: &Value,
) -> Result<RelatedRef, SetFieldError> {
    let target_rt = registry
        .get(&target.name)
        .ok_or_else(|| StoreError::UnknownRecordType(target.name.clone()))?;
    let pk = coerce_key(target.primary_key_kind, raw).map_err(|e| invalid(field, e))?;
    let found = tx
        .fetch(target_rt, &pk, &Scope::new())
        .await?
        .ok_or_else(|| SetFieldError::TargetNotFound {
            target: target.name.clone(),
            pk: value_to_text(&pk).unwrap_or_default(),
        })?;
    Ok(RelatedRef {
        pk: found.pk().cloned().unwrap_or(pk),
        display: target_rt.display_for(&found),
    })
}
