//! Table schema capability
//!
//! The column layout of an entity's table as seen by DDL generators. Only
//! column fields appear here; collections live in the other table.

use serde::Serialize;

use super::entity::EntityMetadata;
use super::field::FieldType;
use super::resolver::MetadataResolver;
use crate::error::OrmResult;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnDefinition {
    pub name: String,
    pub field_type: FieldType,
    pub primary_key: bool,
    pub mandatory: bool,
    pub unique: bool,
    pub max_length: Option<u32>,
    pub precision: Option<u8>,
    pub scale: Option<u8>,
    /// Referenced table for foreign keys
    pub references: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableSchema {
    pub table: String,
    pub entity: String,
    pub columns: Vec<ColumnDefinition>,
}

impl TableSchema {
    pub fn build(metadata: &EntityMetadata, resolver: &MetadataResolver) -> OrmResult<Self> {
        let mut columns = Vec::new();
        for field in metadata.columns() {
            let references = match field.target() {
                Some(target) => Some(resolver.metadata_by_name(target)?.table().to_string()),
                None => None,
            };
            columns.push(ColumnDefinition {
                name: field.name.clone(),
                field_type: field.field_type.clone(),
                primary_key: field.is_primary_key(),
                mandatory: field.mandatory,
                unique: field.unique,
                max_length: field.max_length,
                precision: field.precision,
                scale: field.scale,
                references,
            });
        }

        Ok(TableSchema {
            table: metadata.table().to_string(),
            entity: metadata.name().to_string(),
            columns,
        })
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDefinition> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn primary_key(&self) -> Option<&ColumnDefinition> {
        self.columns.iter().find(|c| c.primary_key)
    }
}
