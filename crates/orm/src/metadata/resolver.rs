//! Metadata resolver
//!
//! Registry mapping entity types to their metadata. It is filled once through
//! [`MetadataResolverBuilder`] and is read-only afterwards, so a single
//! `Arc<MetadataResolver>` can be shared by every session.

use std::any::{type_name, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use once_cell::sync::OnceCell;

use super::entity::EntityMetadata;
use super::schema::TableSchema;
use crate::entity::{AnyEntity, Entity, EntityType};
use crate::error::{OrmError, OrmResult};

type EntityFactory = Arc<dyn Fn() -> AnyEntity + Send + Sync>;

struct Registration {
    metadata: Arc<EntityMetadata>,
    type_id: TypeId,
    type_name: &'static str,
    factory: EntityFactory,
}

/// A foreign key pointing at some entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferencingField {
    pub entity: String,
    pub field: String,
}

/// Process-wide entity registry
pub struct MetadataResolver {
    registrations: Vec<Registration>,
    by_type: HashMap<TypeId, usize>,
    by_name: HashMap<String, usize>,
    referencing: OnceCell<HashMap<String, Vec<ReferencingField>>>,
}

impl MetadataResolver {
    pub fn builder() -> MetadataResolverBuilder {
        MetadataResolverBuilder::default()
    }

    /// Metadata of an entity type
    pub fn metadata_of<T: EntityType>(&self) -> OrmResult<Arc<EntityMetadata>> {
        self.by_type
            .get(&TypeId::of::<T>())
            .map(|&index| self.registrations[index].metadata.clone())
            .ok_or_else(|| OrmError::MetadataNotFound(type_name::<T>().to_string()))
    }

    /// Metadata of an entity instance
    pub fn metadata_for(&self, entity: &dyn Entity) -> OrmResult<Arc<EntityMetadata>> {
        self.by_type
            .get(&entity.as_any().type_id())
            .map(|&index| self.registrations[index].metadata.clone())
            .ok_or_else(|| OrmError::MetadataNotFound("unregistered entity instance".to_string()))
    }

    pub fn metadata_by_name(&self, name: &str) -> OrmResult<Arc<EntityMetadata>> {
        self.registration(name).map(|r| r.metadata.clone())
    }

    /// The Rust type registered for the metadata
    pub fn entity_type(&self, metadata: &EntityMetadata) -> OrmResult<TypeId> {
        self.registration(metadata.name()).map(|r| r.type_id)
    }

    /// Name of the Rust type registered for the metadata
    pub fn entity_type_name(&self, metadata: &EntityMetadata) -> OrmResult<&'static str> {
        self.registration(metadata.name()).map(|r| r.type_name)
    }

    /// All registered entity descriptions, in registration order
    pub fn entity_metadata(&self) -> impl Iterator<Item = &Arc<EntityMetadata>> {
        self.registrations.iter().map(|r| &r.metadata)
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    pub fn contains<T: EntityType>(&self) -> bool {
        self.by_type.contains_key(&TypeId::of::<T>())
    }

    /// Construct an empty instance of the named entity
    pub fn create(&self, name: &str) -> OrmResult<AnyEntity> {
        self.registration(name).map(|r| (r.factory)())
    }

    /// Foreign keys of all registered entities that point at `target`
    pub fn referencing_fields(&self, target: &str) -> &[ReferencingField] {
        let index = self.referencing.get_or_init(|| {
            let mut index: HashMap<String, Vec<ReferencingField>> = HashMap::new();
            for metadata in self.entity_metadata() {
                for field in metadata.references() {
                    if let Some(target) = field.target() {
                        index.entry(target.to_string()).or_default().push(ReferencingField {
                            entity: metadata.name().to_string(),
                            field: field.name.clone(),
                        });
                    }
                }
            }
            index
        });
        index.get(target).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Column layout of the named entity's table for DDL generators
    pub fn table_schema(&self, name: &str) -> OrmResult<TableSchema> {
        let metadata = self.metadata_by_name(name)?;
        TableSchema::build(&metadata, self)
    }

    fn registration(&self, name: &str) -> OrmResult<&Registration> {
        self.by_name
            .get(name)
            .map(|&index| &self.registrations[index])
            .ok_or_else(|| OrmError::MetadataNotFound(name.to_string()))
    }
}

impl fmt::Debug for MetadataResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetadataResolver")
            .field(
                "entities",
                &self.registrations.iter().map(|r| r.metadata.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Collects registrations and validates them as a whole
#[derive(Default)]
pub struct MetadataResolverBuilder {
    registrations: Vec<Registration>,
    error: Option<OrmError>,
}

impl MetadataResolverBuilder {
    /// Register an entity type with its own metadata
    pub fn register<T: EntityType>(self) -> Self {
        match T::metadata() {
            Ok(metadata) => self.register_with::<T>(metadata),
            Err(err) => self.fail(err),
        }
    }

    /// Register an entity type with metadata from elsewhere, such as a JSON
    /// schema description
    pub fn register_with<T: EntityType>(mut self, metadata: EntityMetadata) -> Self {
        self.registrations.push(Registration {
            metadata: Arc::new(metadata),
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            factory: Arc::new(|| AnyEntity::new(T::default())),
        });
        self
    }

    fn fail(mut self, err: OrmError) -> Self {
        self.error.get_or_insert(err);
        self
    }

    pub fn build(self) -> OrmResult<MetadataResolver> {
        if let Some(err) = self.error {
            return Err(err);
        }

        let mut by_type = HashMap::new();
        let mut by_name = HashMap::new();
        for (index, registration) in self.registrations.iter().enumerate() {
            if by_type.insert(registration.type_id, index).is_some() {
                return Err(OrmError::InvalidMetadata(format!(
                    "{} is registered twice",
                    registration.type_name
                )));
            }
            let name = registration.metadata.name().to_string();
            if by_name.insert(name.clone(), index).is_some() {
                return Err(OrmError::InvalidMetadata(format!(
                    "entity name '{}' is used by more than one type",
                    name
                )));
            }
        }

        let resolver = MetadataResolver {
            registrations: self.registrations,
            by_type,
            by_name,
            referencing: OnceCell::new(),
        };
        check_associations(&resolver)?;
        Ok(resolver)
    }
}

fn check_associations(resolver: &MetadataResolver) -> OrmResult<()> {
    for metadata in resolver.entity_metadata() {
        for field in metadata.fields().iter().filter(|f| f.is_complex_field_type()) {
            let target_name = field.target().unwrap_or_default();
            let target = resolver.metadata_by_name(target_name).map_err(|_| {
                OrmError::InvalidMetadata(format!(
                    "{}.{} refers to unregistered entity '{}'",
                    metadata.name(),
                    field.name,
                    target_name
                ))
            })?;

            let Some(inverse_name) = field.reference_field.as_deref() else {
                continue;
            };
            let inverse = target.field(inverse_name).ok_or_else(|| {
                OrmError::InvalidMetadata(format!(
                    "{}.{} names missing inverse field {}.{}",
                    metadata.name(),
                    field.name,
                    target_name,
                    inverse_name
                ))
            })?;
            if field.collection && !(inverse.is_reference() && inverse.target() == Some(metadata.name())) {
                return Err(OrmError::InvalidMetadata(format!(
                    "{}.{} must be a reference to {}",
                    target_name,
                    inverse_name,
                    metadata.name()
                )));
            }
        }
    }
    Ok(())
}
