//! Wire type tags used in grid field metadata.

use crate::schema::{FieldDescriptor, Relation, ScalarKind};

pub const WIRE_INT: &str = "int";
pub const WIRE_FLOAT: &str = "float";
pub const WIRE_BOOLEAN: &str = "boolean";
pub const WIRE_DATE: &str = "date";
pub const WIRE_AUTO: &str = "auto";
pub const WIRE_STRING: &str = "string";

/// Wire tag for a scalar kind. Kinds without a dedicated tag (text, decimal, uuid, ...) are `auto`.
pub fn wire_type(kind: ScalarKind) -> &'static str {
    use ScalarKind::*;
    match kind {
        AutoField | BigAutoField | IntegerField | BigIntegerField | SmallIntegerField | PositiveIntegerField
        | PositiveSmallIntegerField => WIRE_INT,
        FloatField => WIRE_FLOAT,
        BooleanField | NullBooleanField => WIRE_BOOLEAN,
        DateField | DateTimeField | TimeField => WIRE_DATE,
        _ => WIRE_AUTO,
    }
}

/// Wire tag for a field. Foreign keys take the tag of the target's primary key.
pub fn field_wire_type(field: &FieldDescriptor) -> &'static str {
    match &field.relation {
        Relation::ForeignKey(target) => wire_type(target.primary_key_kind),
        _ => wire_type(field.kind),
    }
}
