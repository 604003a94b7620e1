//! Live record instances: a bag of field values plus an optional primary key.

use crate::schema::RecordType;
use serde_json::Value;
use std::collections::HashMap;

/// Flat wire form of one record. Keys keep insertion order.
pub type FlatRecord = serde_json::Map<String, Value>;

/// Resolved foreign-key target: its primary key and display string.
#[derive(Clone, Debug, PartialEq)]
pub struct RelatedRef {
    pub pk: Value,
    pub display: String,
}

#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    Scalar(Value),
    ForeignKey(Option<RelatedRef>),
    /// Primary keys of the related records.
    ManyToMany(Vec<Value>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    pk_field: String,
    pk: Option<Value>,
    persisted: bool,
    values: HashMap<String, FieldValue>,
}

impl Record {
    /// Fresh, unsaved record with no field values.
    pub fn new(record_type: &RecordType) -> Self {
        Self {
            pk_field: record_type.primary_key.clone(),
            pk: None,
            persisted: false,
            values: HashMap::new(),
        }
    }

    /// Record as loaded by a store.
    pub fn loaded(record_type: &RecordType, pk: Value, values: HashMap<String, FieldValue>) -> Self {
        let mut record = Self {
            pk_field: record_type.primary_key.clone(),
            pk: None,
            persisted: true,
            values,
        };
        record.set_pk(pk);
        record
    }

    pub fn pk(&self) -> Option<&Value> {
        self.pk.as_ref()
    }

    pub fn is_persisted(&self) -> bool {
        self.persisted
    }

    /// Assign the primary key; mirrored into the primary key field's value.
    pub fn set_pk(&mut self, pk: Value) {
        self.values.insert(self.pk_field.clone(), FieldValue::Scalar(pk.clone()));
        self.pk = Some(pk);
    }

    /// Called by a store once the record has been written.
    pub fn mark_persisted(&mut self, pk: Value) {
        self.set_pk(pk);
        self.persisted = true;
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.values.get(field)
    }

    pub fn scalar(&self, field: &str) -> Option<&Value> {
        match self.values.get(field) {
            Some(FieldValue::Scalar(v)) => Some(v),
            _ => None,
        }
    }

    pub fn set(&mut self, field: impl Into<String>, value: FieldValue) {
        self.values.insert(field.into(), value);
    }
}
