//! Registry validation: primary keys, relation targets and field references.

use crate::error::ConfigError;
use crate::schema::{FieldConfig, RecordTypeConfig, SchemaConfig};
use std::collections::HashSet;

/// Name of the primary key field of a record type, or `None` when none is discoverable.
/// Order: a field flagged `primary_key`, then the type-level `primary_key`, then a field named `id`.
pub fn primary_key_name(rt: &RecordTypeConfig) -> Option<&str> {
    if let Some(f) = rt.fields.iter().find(|f| f.primary_key) {
        return Some(f.name.as_str());
    }
    if let Some(pk) = rt.primary_key.as_deref() {
        return rt.fields.iter().find(|f| f.name == pk).map(|f| f.name.as_str());
    }
    rt.fields.iter().find(|f| f.name == "id").map(|f| f.name.as_str())
}

fn is_relation(f: &FieldConfig) -> bool {
    f.foreign_key.is_some() || f.many_to_many.is_some()
}

pub fn validate(config: &SchemaConfig) -> Result<(), ConfigError> {
    let type_names: HashSet<&str> = config.record_types.iter().map(|t| t.name.as_str()).collect();
    if type_names.len() != config.record_types.len() {
        let mut seen = HashSet::new();
        for t in &config.record_types {
            if !seen.insert(t.name.as_str()) {
                return Err(ConfigError::DuplicateRecordType(t.name.clone()));
            }
        }
    }

    let mut path_segments = HashSet::new();
    for rt in &config.record_types {
        let segment = rt.path_segment.clone().unwrap_or_else(|| rt.name.to_lowercase());
        if !path_segments.insert(segment.clone()) {
            return Err(ConfigError::DuplicatePathSegment(segment));
        }

        let mut field_names = HashSet::new();
        for f in &rt.fields {
            if !field_names.insert(f.name.as_str()) {
                return Err(ConfigError::DuplicateField {
                    record_type: rt.name.clone(),
                    field: f.name.clone(),
                });
            }
            if f.foreign_key.is_some() && f.many_to_many.is_some() {
                return Err(ConfigError::Validation(format!(
                    "{}.{} declares both foreign_key and many_to_many",
                    rt.name, f.name
                )));
            }
            for target in f.foreign_key.iter().chain(f.many_to_many.iter()) {
                if !type_names.contains(target.as_str()) {
                    return Err(ConfigError::MissingReference {
                        kind: "record type",
                        id: target.clone(),
                    });
                }
            }
        }

        let pk = primary_key_name(rt).ok_or_else(|| ConfigError::MissingPrimaryKey(rt.name.clone()))?;
        if rt.fields.iter().any(|f| f.name == pk && is_relation(f)) {
            return Err(ConfigError::InvalidPrimaryKey {
                record_type: rt.name.clone(),
                field: pk.to_string(),
            });
        }

        for (what, name) in [("display_field", &rt.display_field), ("owner_field", &rt.owner_field)] {
            let Some(name) = name else { continue };
            match rt.fields.iter().find(|f| &f.name == name) {
                Some(f) if !is_relation(f) => {}
                _ => {
                    return Err(ConfigError::Validation(format!(
                        "{} of {} must name a scalar field, got '{}'",
                        what, rt.name, name
                    )))
                }
            }
        }
    }

    Ok(())
}
