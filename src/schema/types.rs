//! Raw registry types matching the schema JSON document.

use serde::{Deserialize, Serialize};

/// Scalar kind of a field, spelled the way schema documents name model field classes (`CharField`, ...).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarKind {
    AutoField,
    BigAutoField,
    IntegerField,
    BigIntegerField,
    SmallIntegerField,
    PositiveIntegerField,
    PositiveSmallIntegerField,
    FloatField,
    DecimalField,
    BooleanField,
    NullBooleanField,
    CharField,
    TextField,
    DateField,
    DateTimeField,
    TimeField,
    UUIDField,
    JSONField,
    /// Any kind this crate has no special handling for; passed through untyped.
    #[default]
    #[serde(other)]
    Other,
}

/// Explicit many-to-many link table. Missing parts fall back to naming defaults.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ThroughConfig {
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default)]
    pub source_column: Option<String>,
    #[serde(default)]
    pub target_column: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FieldConfig {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: ScalarKind,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default)]
    pub primary_key: bool,
    #[serde(default)]
    pub column: Option<String>,
    /// Target record type name.
    #[serde(default)]
    pub foreign_key: Option<String>,
    /// Target record type name.
    #[serde(default)]
    pub many_to_many: Option<String>,
    #[serde(default)]
    pub through: Option<ThroughConfig>,
}

/// Field entry of a metadata override, emitted verbatim to clients.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMeta {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl FieldMeta {
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RecordTypeConfig {
    pub name: String,
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default)]
    pub path_segment: Option<String>,
    #[serde(default)]
    pub primary_key: Option<String>,
    pub fields: Vec<FieldConfig>,
    /// Field whose text form is the record's display string.
    #[serde(default)]
    pub display_field: Option<String>,
    /// Scalar field holding the owning caller; restricts every request to the caller's records.
    #[serde(default)]
    pub owner_field: Option<String>,
    #[serde(default)]
    pub serialised_fields: Option<Vec<FieldMeta>>,
}

/// Full registry document: `{"record_types": [...]}`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SchemaConfig {
    #[serde(default)]
    pub record_types: Vec<RecordTypeConfig>,
}
