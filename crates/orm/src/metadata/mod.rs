//! Entity metadata model
//!
//! Immutable descriptions of entity types, the registry that resolves them
//! and the table layout derived from them.

pub mod entity;
pub mod field;
pub mod resolver;
pub mod schema;

pub use entity::{
    is_base_field, EntityMetadata, EntityMetadataBuilder, DELETED_FIELD, ID_FIELD, VERSION_FIELD,
};
pub use field::{Cascade, FieldMetadata, FieldType};
pub use resolver::{MetadataResolver, MetadataResolverBuilder, ReferencingField};
pub use schema::{ColumnDefinition, TableSchema};
