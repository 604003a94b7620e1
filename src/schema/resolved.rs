//! Resolved registry: record types validated and flattened for runtime use.

use crate::record::{FieldValue, FlatRecord, Record};
use crate::schema::{FieldMeta, ScalarKind};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// What a relation field points at. Carries enough of the target to map wire types and coerce keys.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelationTarget {
    pub name: String,
    pub primary_key: String,
    pub primary_key_kind: ScalarKind,
}

/// Link table backing a many-to-many field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Through {
    pub table: String,
    pub source_column: String,
    pub target_column: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Relation {
    None,
    ForeignKey(RelationTarget),
    ManyToMany(RelationTarget, Through),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: String,
    pub kind: ScalarKind,
    pub relation: Relation,
    pub nullable: bool,
    /// Storage column for scalars and foreign keys. Unused for many-to-many.
    pub column: String,
}

impl FieldDescriptor {
    pub fn is_many_to_many(&self) -> bool {
        matches!(self.relation, Relation::ManyToMany(..))
    }

    pub fn is_foreign_key(&self) -> bool {
        matches!(self.relation, Relation::ForeignKey(_))
    }

    pub fn target(&self) -> Option<&RelationTarget> {
        match &self.relation {
            Relation::None => None,
            Relation::ForeignKey(t) | Relation::ManyToMany(t, _) => Some(t),
        }
    }
}

/// Per-record serializer registered in code; replaces the flat-record rules for its type.
#[derive(Clone)]
pub struct CustomSerializer(Arc<dyn Fn(&Record) -> FlatRecord + Send + Sync>);

impl CustomSerializer {
    pub fn call(&self, record: &Record) -> FlatRecord {
        (self.0)(record)
    }
}

impl fmt::Debug for CustomSerializer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CustomSerializer")
    }
}

#[derive(Clone, Debug)]
pub struct RecordType {
    pub name: String,
    pub table: String,
    pub path_segment: String,
    pub primary_key: String,
    /// Declaration order; includes the primary key. Crate-private so resolution is the only
    /// constructor and the list is never empty.
    pub(crate) fields: Vec<FieldDescriptor>,
    pub display_field: Option<String>,
    pub owner_field: Option<String>,
    pub fields_override: Option<Vec<FieldMeta>>,
    pub serializer: Option<CustomSerializer>,
}

impl RecordType {
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn primary_key_field(&self) -> &FieldDescriptor {
        // Resolution refuses types whose primary key is not among their fields.
        self.fields
            .iter()
            .find(|f| f.name == self.primary_key)
            .unwrap_or(&self.fields[0])
    }

    pub fn many_to_many_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(|f| f.is_many_to_many())
    }

    /// Install a per-record serializer that is used verbatim instead of the default rules.
    pub fn with_serializer<F>(mut self, f: F) -> Self
    where
        F: Fn(&Record) -> FlatRecord + Send + Sync + 'static,
    {
        self.serializer = Some(CustomSerializer(Arc::new(f)));
        self
    }

    /// Human-readable string for a record of this type.
    pub fn display_for(&self, record: &Record) -> String {
        if let Some(field) = &self.display_field {
            return match record.get(field) {
                Some(FieldValue::Scalar(v)) => crate::coerce::value_to_text(v).unwrap_or_default(),
                _ => String::new(),
            };
        }
        let pk = record
            .pk()
            .and_then(crate::coerce::value_to_text)
            .unwrap_or_else(|| "None".into());
        format!("{} object ({})", self.name, pk)
    }

    /// Display string from a primary key and the raw display-field value, as loaded by a store.
    pub fn display_from_parts(&self, pk: &Value, display_value: Option<&Value>) -> String {
        if self.display_field.is_some() {
            return display_value
                .and_then(crate::coerce::value_to_text)
                .unwrap_or_default();
        }
        let pk = crate::coerce::value_to_text(pk).unwrap_or_else(|| "None".into());
        format!("{} object ({})", self.name, pk)
    }
}

/// Every registered record type, keyed by name and by path segment. Read-only once built.
#[derive(Clone, Debug, Default)]
pub struct Registry {
    pub(crate) types: Vec<Arc<RecordType>>,
    pub(crate) by_name: HashMap<String, Arc<RecordType>>,
    pub(crate) by_path: HashMap<String, Arc<RecordType>>,
}

impl Registry {
    /// Registration order.
    pub fn types(&self) -> &[Arc<RecordType>] {
        &self.types
    }

    pub fn get(&self, name: &str) -> Option<&Arc<RecordType>> {
        self.by_name.get(name)
    }

    pub fn record_type_by_path(&self, path: &str) -> Option<&Arc<RecordType>> {
        self.by_path.get(path)
    }

    /// Replace a registered type (e.g. to attach a custom serializer). Returns false when the name is
    /// unknown or the replacement's primary key is not one of its fields.
    pub fn replace(&mut self, record_type: RecordType) -> bool {
        let Some(existing) = self.by_name.get(&record_type.name).cloned() else {
            return false;
        };
        if record_type.field(&record_type.primary_key).is_none() {
            return false;
        }
        let new = Arc::new(record_type);
        for slot in self.types.iter_mut() {
            if Arc::ptr_eq(slot, &existing) {
                *slot = new.clone();
            }
        }
        self.by_path.insert(new.path_segment.clone(), new.clone());
        self.by_name.insert(new.name.clone(), new);
        true
    }
}
