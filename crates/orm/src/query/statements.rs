//! Metadata-driven statements
//!
//! The statements the session issues on its own behalf: loads by key and the
//! writes of a commit. Updates and deletes are guarded by the version the
//! entity was loaded with.

use crate::backends::{DatabaseValue, Query};
use crate::metadata::{EntityMetadata, FieldMetadata, FieldType, ID_FIELD, VERSION_FIELD};

pub struct StatementBuilder;

impl StatementBuilder {
    pub fn select_by_id(metadata: &EntityMetadata, id: i64) -> Query {
        let mut query = Query::new("").for_entity(metadata.name());
        let id_param = query.bind(DatabaseValue::Int64(id), Some(FieldType::Integer));
        query.command = format!(
            "SELECT * FROM {} WHERE {} = {}",
            metadata.table(),
            ID_FIELD,
            id_param
        );
        query
    }

    pub fn insert(metadata: &EntityMetadata, values: &[(&FieldMetadata, DatabaseValue)]) -> Query {
        let mut query = Query::new("").for_entity(metadata.name());
        let mut columns = Vec::with_capacity(values.len());
        let mut params = Vec::with_capacity(values.len());
        for (field, value) in values {
            columns.push(field.name.as_str());
            params.push(query.bind(value.clone(), Some(field.field_type.clone())));
        }
        query.command = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            metadata.table(),
            columns.join(", "),
            params.join(", ")
        );
        query
    }

    /// Update the given columns, advance the version and check the old one
    pub fn update(
        metadata: &EntityMetadata,
        id: i64,
        version: i64,
        changes: &[(&FieldMetadata, DatabaseValue)],
    ) -> Query {
        let mut query = Query::new("").for_entity(metadata.name());
        let mut assignments = Vec::with_capacity(changes.len() + 1);
        for (field, value) in changes {
            let param = query.bind(value.clone(), Some(field.field_type.clone()));
            assignments.push(format!("{} = {}", field.name, param));
        }
        let next_version = query.bind(DatabaseValue::Int64(version + 1), Some(FieldType::Integer));
        assignments.push(format!("{} = {}", VERSION_FIELD, next_version));

        let id_param = query.bind(DatabaseValue::Int64(id), Some(FieldType::Integer));
        let version_param = query.bind(DatabaseValue::Int64(version), Some(FieldType::Integer));
        query.command = format!(
            "UPDATE {} SET {} WHERE {} = {} AND {} = {}",
            metadata.table(),
            assignments.join(", "),
            ID_FIELD,
            id_param,
            VERSION_FIELD,
            version_param
        );
        query
    }

    pub fn delete(metadata: &EntityMetadata, id: i64, version: i64) -> Query {
        let mut query = Query::new("").for_entity(metadata.name());
        let id_param = query.bind(DatabaseValue::Int64(id), Some(FieldType::Integer));
        let version_param = query.bind(DatabaseValue::Int64(version), Some(FieldType::Integer));
        query.command = format!(
            "DELETE FROM {} WHERE {} = {} AND {} = {}",
            metadata.table(),
            ID_FIELD,
            id_param,
            VERSION_FIELD,
            version_param
        );
        query
    }

    /// Fill in a foreign key that had to wait for its target's insert
    pub fn update_reference(
        metadata: &EntityMetadata,
        id: i64,
        field: &FieldMetadata,
        target_id: i64,
    ) -> Query {
        let mut query = Query::new("").for_entity(metadata.name());
        let value = query.bind(DatabaseValue::Int64(target_id), Some(field.field_type.clone()));
        let id_param = query.bind(DatabaseValue::Int64(id), Some(FieldType::Integer));
        query.command = format!(
            "UPDATE {} SET {} = {} WHERE {} = {}",
            metadata.table(),
            field.name,
            value,
            ID_FIELD,
            id_param
        );
        query
    }
}
