//! Entity metadata
//!
//! An [`EntityMetadata`] is built once per entity type and never changes
//! afterwards. The builder always places the primary key, the soft-delete
//! flag and the version counter in front of the user supplied fields.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::field::{Cascade, FieldMetadata, FieldType};
use crate::error::{OrmError, OrmResult};

pub const ID_FIELD: &str = "Id";
pub const DELETED_FIELD: &str = "Deleted";
pub const VERSION_FIELD: &str = "Version";

/// Immutable description of one entity type
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityMetadata {
    name: String,
    table: String,
    fields: Vec<FieldMetadata>,
}

/// Declarative schema description as it appears in JSON
#[derive(Debug, Deserialize)]
struct EntityDescription {
    name: String,
    #[serde(default)]
    table: Option<String>,
    #[serde(default)]
    fields: Vec<FieldMetadata>,
}

impl EntityMetadata {
    pub fn builder(name: impl Into<String>) -> EntityMetadataBuilder {
        EntityMetadataBuilder::new(name)
    }

    /// Load metadata from a JSON schema description
    ///
    /// ```json
    /// { "name": "Person", "table": "People",
    ///   "fields": [ { "name": "Name", "type": "string", "mandatory": true } ] }
    /// ```
    pub fn from_json(json: &str) -> OrmResult<Self> {
        let description: EntityDescription = serde_json::from_str(json)?;
        let mut builder = EntityMetadataBuilder::new(description.name);
        if let Some(table) = description.table {
            builder = builder.table(table);
        }
        description
            .fields
            .into_iter()
            .fold(builder, EntityMetadataBuilder::field)
            .build()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// All fields, base fields first
    pub fn fields(&self) -> &[FieldMetadata] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldMetadata> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn require_field(&self, name: &str) -> OrmResult<&FieldMetadata> {
        self.field(name).ok_or_else(|| {
            OrmError::query(format!("{} has no mapped field '{}'", self.name, name))
        })
    }

    pub fn primary_key(&self) -> &FieldMetadata {
        // The builder guarantees the first field is the primary key
        &self.fields[0]
    }

    /// Fields declared by the entity author
    pub fn user_fields(&self) -> impl Iterator<Item = &FieldMetadata> {
        self.fields.iter().filter(|f| !is_base_field(&f.name))
    }

    /// Fields stored in the entity's own table
    pub fn columns(&self) -> impl Iterator<Item = &FieldMetadata> {
        self.fields.iter().filter(|f| f.is_column())
    }

    /// Foreign key fields
    pub fn references(&self) -> impl Iterator<Item = &FieldMetadata> {
        self.fields.iter().filter(|f| f.is_reference())
    }

    /// One-to-many fields
    pub fn collections(&self) -> impl Iterator<Item = &FieldMetadata> {
        self.fields.iter().filter(|f| f.is_collection())
    }

    /// Associations that a save or delete propagates through
    pub fn cascading(&self, deleting: bool) -> impl Iterator<Item = &FieldMetadata> {
        self.fields.iter().filter(move |f| {
            f.is_complex_field_type()
                && if deleting {
                    f.cascade.deletes()
                } else {
                    f.cascade.saves()
                }
        })
    }
}

pub fn is_base_field(name: &str) -> bool {
    matches!(name, ID_FIELD | DELETED_FIELD | VERSION_FIELD)
}

/// Builder for [`EntityMetadata`]
#[derive(Debug)]
pub struct EntityMetadataBuilder {
    name: String,
    table: Option<String>,
    fields: Vec<FieldMetadata>,
}

impl EntityMetadataBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: None,
            fields: Vec::new(),
        }
    }

    /// Physical table name, defaults to the entity name
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn field(mut self, field: FieldMetadata) -> Self {
        self.fields.push(field);
        self
    }

    pub fn build(self) -> OrmResult<EntityMetadata> {
        let invalid = |reason: String| OrmError::InvalidMetadata(reason);

        if !is_identifier(&self.name) {
            return Err(invalid(format!("'{}' is not a valid entity name", self.name)));
        }
        let table = self.table.unwrap_or_else(|| self.name.clone());
        if !is_identifier(&table) {
            return Err(invalid(format!("'{}' is not a valid table name", table)));
        }

        let mut id = FieldMetadata::new(ID_FIELD, FieldType::Integer).mandatory().unique();
        id.primary_key = true;
        let mut fields = vec![
            id,
            FieldMetadata::new(DELETED_FIELD, FieldType::Boolean).mandatory(),
            FieldMetadata::new(VERSION_FIELD, FieldType::Integer).mandatory(),
        ];

        let mut seen = HashSet::new();
        for field in self.fields {
            if is_base_field(&field.name) {
                return Err(invalid(format!(
                    "{}.{} is managed by the engine and cannot be declared",
                    self.name, field.name
                )));
            }
            if !is_identifier(&field.name) {
                return Err(invalid(format!(
                    "'{}' is not a valid field name on {}",
                    field.name, self.name
                )));
            }
            if !seen.insert(field.name.clone()) {
                return Err(invalid(format!("{}.{} is declared twice", self.name, field.name)));
            }
            check_field(&self.name, &field)?;
            fields.push(field);
        }

        Ok(EntityMetadata {
            name: self.name,
            table,
            fields,
        })
    }
}

fn check_field(entity: &str, field: &FieldMetadata) -> OrmResult<()> {
    let fail = |reason: &str| {
        Err(OrmError::InvalidMetadata(format!(
            "{}.{}: {}",
            entity, field.name, reason
        )))
    };

    if field.collection {
        if !field.is_complex_field_type() {
            return fail("collections must hold entities");
        }
        if field.reference_field.is_none() {
            return fail("collections need the inverse reference field");
        }
        if field.mandatory || field.unique {
            return fail("collections are not columns and cannot be mandatory or unique");
        }
    } else if field.eager {
        return fail("only collections can be loaded eagerly");
    }
    if field.cascade != Cascade::None && !field.is_complex_field_type() {
        return fail("cascade only applies to associations");
    }
    if field.max_length.is_some() && field.field_type != FieldType::String {
        return fail("max length only applies to strings");
    }
    match (field.precision, field.scale) {
        (Some(_), _) | (_, Some(_)) if field.field_type != FieldType::Decimal => {
            fail("precision only applies to decimals")
        }
        (Some(precision), Some(scale)) if scale > precision => {
            fail("scale cannot exceed precision")
        }
        _ => Ok(()),
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person() -> EntityMetadata {
        EntityMetadata::builder("Person")
            .field(FieldMetadata::new("Name", FieldType::String).mandatory().max_length(50))
            .field(FieldMetadata::new("Age", FieldType::Integer))
            .field(
                FieldMetadata::collection("Addresses", "Address", "Person")
                    .cascade(Cascade::SaveDelete)
                    .eager(),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn test_base_fields_are_always_present() {
        let meta = person();
        let names: Vec<_> = meta.fields().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["Id", "Deleted", "Version", "Name", "Age", "Addresses"]);
        assert!(meta.primary_key().is_primary_key());
        assert_eq!(meta.primary_key().name, ID_FIELD);
        assert_eq!(meta.table(), "Person");
        assert_eq!(meta.user_fields().count(), 3);
        assert_eq!(meta.columns().count(), 5);
        assert_eq!(meta.collections().count(), 1);
    }

    #[test]
    fn test_reserved_and_duplicate_names_are_rejected() {
        let reserved = EntityMetadata::builder("Person")
            .field(FieldMetadata::new("Version", FieldType::Integer))
            .build();
        assert!(matches!(reserved, Err(OrmError::InvalidMetadata(_))));

        let duplicate = EntityMetadata::builder("Person")
            .field(FieldMetadata::new("Name", FieldType::String))
            .field(FieldMetadata::new("Name", FieldType::String))
            .build();
        assert!(matches!(duplicate, Err(OrmError::InvalidMetadata(_))));
    }

    #[test]
    fn test_field_rules() {
        let cascade_on_scalar = EntityMetadata::builder("Person")
            .field(FieldMetadata::new("Name", FieldType::String).cascade(Cascade::Save))
            .build();
        assert!(cascade_on_scalar.is_err());

        let bad_scale = EntityMetadata::builder("Invoice")
            .field(FieldMetadata::new("Total", FieldType::Decimal).precision(4, 6))
            .build();
        assert!(bad_scale.is_err());

        let eager_reference = EntityMetadata::builder("Address")
            .field(FieldMetadata::reference("Person", "Person").eager())
            .build();
        assert!(eager_reference.is_err());
    }

    #[test]
    fn test_cascading_fields() {
        let meta = person();
        assert_eq!(meta.cascading(false).count(), 1);
        assert_eq!(meta.cascading(true).count(), 1);
    }

    #[test]
    fn test_from_json() {
        let meta = EntityMetadata::from_json(
            r#"{
                "name": "Artist",
                "table": "Artists",
                "fields": [
                    { "name": "Name", "type": "string", "mandatory": true, "max_length": 80 },
                    { "name": "Fee", "type": "decimal", "precision": 10, "scale": 2 },
                    { "name": "Agent", "type": "Person", "cascade": "Save" }
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(meta.table(), "Artists");
        assert_eq!(meta.field("Fee").unwrap().scale, Some(2));
        assert_eq!(meta.field("Agent").unwrap().target(), Some("Person"));
        assert_eq!(meta.field("Agent").unwrap().cascade, Cascade::Save);
        assert!(EntityMetadata::from_json("{ \"fields\": [] }").is_err());
    }
}
