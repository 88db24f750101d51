//! Loading and hydration
//!
//! Rows become entities through the identity map: a row whose key is already
//! mapped yields the mapped instance. Associations are resolved with a work
//! queue rather than recursion, so deep or cyclic graphs load in bounded
//! stack space.

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::debug;

use super::identity_map::EntityKey;
use super::Session;
use crate::backends::{DatabaseRow, DatabaseValue};
use crate::entity::{snapshot, with_tracking_disabled, AnyEntity, EntityRef, EntityType};
use crate::error::{OrmError, OrmResult};
use crate::metadata::{EntityMetadata, DELETED_FIELD, ID_FIELD, VERSION_FIELD};
use crate::query::{
    Expression, Filter, Parameter, Predicate, QueryTranslator, SelectKind, SqlTokenComposer,
    StatementBuilder,
};

struct PendingReference {
    owner: AnyEntity,
    field: String,
    target: String,
    id: i64,
}

struct PendingCollection {
    owner: AnyEntity,
    metadata: Arc<EntityMetadata>,
    field: String,
}

#[derive(Default)]
struct Pending {
    references: VecDeque<PendingReference>,
    collections: VecDeque<PendingCollection>,
}

impl Session {
    /// Load an entity by key
    ///
    /// Returns the identity-mapped instance when there is one. A missing row
    /// (or a soft deleted one, while deleted rows are filtered) is `None`.
    pub async fn get<T: EntityType>(&mut self, id: i64) -> OrmResult<Option<EntityRef<T>>> {
        let metadata = self.resolver.metadata_of::<T>()?;
        match self.load_by_id(&metadata, id).await? {
            Some(entity) => Ok(Some(entity.downcast::<T>()?)),
            None => Ok(None),
        }
    }

    /// Like [`get`](Session::get), failing with [`OrmError::EntityNotFound`]
    pub async fn get_required<T: EntityType>(&mut self, id: i64) -> OrmResult<EntityRef<T>> {
        let metadata = self.resolver.metadata_of::<T>()?;
        self.load_by_id(&metadata, id)
            .await?
            .ok_or_else(|| OrmError::EntityNotFound {
                entity: metadata.name().to_string(),
                id,
            })?
            .downcast::<T>()
    }

    /// All entities matching a predicate
    pub async fn query<T: EntityType>(&mut self, predicate: &Predicate<T>) -> OrmResult<Vec<EntityRef<T>>> {
        self.ensure_ready().await?;
        let metadata = self.resolver.metadata_of::<T>()?;
        let not_deleted = not_deleted();
        let mut filters = vec![Filter::from(predicate)];
        if self.config.filter_deleted {
            filters.push(Filter::new("x", &not_deleted));
        }
        let tokens = QueryTranslator::new(&self.resolver).tokens(&metadata, SelectKind::Rows, &filters)?;
        let query = SqlTokenComposer::compose(&tokens)?.for_entity(metadata.name());

        let rows = self.execute_reader(&query).await?;
        let mut pending = Pending::default();
        let mut entities = Vec::with_capacity(rows.len());
        for row in &rows {
            entities.push(self.materialize(&metadata, row.as_ref(), &mut pending)?);
        }
        self.hydrate(pending).await?;
        debug!("Query on {} returned {} rows", metadata.name(), entities.len());

        let filter_deleted = self.config.filter_deleted;
        entities
            .into_iter()
            .filter(|e| !(filter_deleted && e.read().base().is_deleted()))
            .map(|e| e.downcast::<T>())
            .collect()
    }

    /// Number of rows matching a predicate
    pub async fn count<T: EntityType>(&mut self, predicate: &Predicate<T>) -> OrmResult<i64> {
        self.ensure_ready().await?;
        let metadata = self.resolver.metadata_of::<T>()?;
        let not_deleted = not_deleted();
        let mut filters = vec![Filter::from(predicate)];
        if self.config.filter_deleted {
            filters.push(Filter::new("x", &not_deleted));
        }
        let tokens = QueryTranslator::new(&self.resolver).tokens(&metadata, SelectKind::Count, &filters)?;
        let query = SqlTokenComposer::compose(&tokens)?.for_entity(metadata.name());

        match self.execute_scalar(&query).await? {
            DatabaseValue::Null => Ok(0),
            value => value.into_typed::<i64>(),
        }
    }

    /// Load a collection that is not eager, assigning it to the entity
    pub async fn load_collection<T: EntityType>(
        &mut self,
        entity: &EntityRef<T>,
        field: &str,
    ) -> OrmResult<Vec<AnyEntity>> {
        self.ensure_ready().await?;
        let owner = entity.to_any();
        if !self.is_attached_any(&owner) {
            return Err(OrmError::invalid_state("entity is not attached to this session"));
        }
        let metadata = self.resolver.metadata_of::<T>()?;
        let mut pending = Pending::default();
        let items = self
            .fetch_collection(&metadata, &owner, field, &mut pending)
            .await?;
        self.hydrate(pending).await?;

        with_tracking_disabled(&mut *owner.write(), |e| e.set_collection(field, items.clone()))?;
        Ok(items)
    }

    async fn load_by_id(
        &mut self,
        metadata: &Arc<EntityMetadata>,
        id: i64,
    ) -> OrmResult<Option<AnyEntity>> {
        self.ensure_ready().await?;
        if let Some(entity) = self.identity_map.get(metadata.name(), id) {
            if self.config.filter_deleted && entity.read().base().is_deleted() {
                return Ok(None);
            }
            return Ok(Some(entity));
        }

        let query = StatementBuilder::select_by_id(metadata, id);
        let rows = self.execute_reader(&query).await?;
        let Some(row) = rows.first() else {
            return Ok(None);
        };
        if self.config.filter_deleted && row.get_by_name(DELETED_FIELD)?.into_typed::<bool>()? {
            return Ok(None);
        }

        let mut pending = Pending::default();
        let entity = self.materialize(metadata, row.as_ref(), &mut pending)?;
        self.hydrate(pending).await?;
        Ok(Some(entity))
    }

    /// Build (or find) the entity for a row and queue its associations
    fn materialize(
        &mut self,
        metadata: &Arc<EntityMetadata>,
        row: &dyn DatabaseRow,
        pending: &mut Pending,
    ) -> OrmResult<AnyEntity> {
        let id = row
            .get_by_name(ID_FIELD)?
            .as_id()
            .ok_or_else(|| OrmError::conversion(format!("{} row without a key", metadata.name())))?;
        if let Some(existing) = self.identity_map.get(metadata.name(), id) {
            return Ok(existing);
        }

        let entity = self.resolver.create(metadata.name())?;
        {
            let mut guard = entity.write();
            with_tracking_disabled(&mut *guard, |e| -> OrmResult<()> {
                let deleted = row.get_by_name(DELETED_FIELD)?.into_typed::<bool>()?;
                let version = row.get_by_name(VERSION_FIELD)?.into_typed::<i64>()?;
                e.base_mut().assign_key(id, version, deleted);
                for field in metadata.user_fields().filter(|f| f.is_column() && !f.is_reference()) {
                    e.set_value(&field.name, row.get_by_name(&field.name)?)?;
                }
                Ok(())
            })?;
            let baseline = snapshot(&*guard, metadata)?;
            guard.base_mut().tracker_mut().reset(baseline);
            guard.base_mut().attach(self.id);
        }

        for field in metadata.references() {
            let target_id = row.get_by_name(&field.name)?.as_id().filter(|id| *id != 0);
            if let (Some(target_id), Some(target)) = (target_id, field.target()) {
                pending.references.push_back(PendingReference {
                    owner: entity.clone(),
                    field: field.name.clone(),
                    target: target.to_string(),
                    id: target_id,
                });
            }
        }
        for field in metadata.collections().filter(|f| f.eager) {
            pending.collections.push_back(PendingCollection {
                owner: entity.clone(),
                metadata: metadata.clone(),
                field: field.name.clone(),
            });
        }

        self.identity_map
            .attach(entity.clone(), Some(EntityKey::new(metadata.name(), id)));
        Ok(entity)
    }

    async fn hydrate(&mut self, mut pending: Pending) -> OrmResult<()> {
        loop {
            if let Some(reference) = pending.references.pop_front() {
                let target = match self.identity_map.get(&reference.target, reference.id) {
                    Some(target) => target,
                    None => {
                        let metadata = self.resolver.metadata_by_name(&reference.target)?;
                        let query = StatementBuilder::select_by_id(&metadata, reference.id);
                        let rows = self.execute_reader(&query).await?;
                        let row = rows.first().ok_or_else(|| OrmError::EntityNotFound {
                            entity: reference.target.clone(),
                            id: reference.id,
                        })?;
                        self.materialize(&metadata, row.as_ref(), &mut pending)?
                    }
                };
                let mut owner = reference.owner.write();
                with_tracking_disabled(&mut *owner, |e| {
                    e.set_reference(&reference.field, Some(target))
                })?;
                continue;
            }

            if let Some(collection) = pending.collections.pop_front() {
                let items = self
                    .fetch_collection(
                        &collection.metadata,
                        &collection.owner,
                        &collection.field,
                        &mut pending,
                    )
                    .await?;
                let mut owner = collection.owner.write();
                with_tracking_disabled(&mut *owner, |e| e.set_collection(&collection.field, items))?;
                continue;
            }

            return Ok(());
        }
    }

    /// Entities whose inverse reference points at `owner`
    async fn fetch_collection(
        &mut self,
        metadata: &EntityMetadata,
        owner: &AnyEntity,
        field: &str,
        pending: &mut Pending,
    ) -> OrmResult<Vec<AnyEntity>> {
        let collection = metadata.require_field(field)?;
        let (Some(target), Some(inverse)) = (collection.target(), collection.reference_field.as_deref())
        else {
            return Err(OrmError::query(format!(
                "{}.{} is not a collection",
                metadata.name(),
                field
            )));
        };
        if !collection.is_collection() {
            return Err(OrmError::query(format!(
                "{}.{} is not a collection",
                metadata.name(),
                field
            )));
        }

        let target = self.resolver.metadata_by_name(target)?;
        let owned_by = Parameter::new("x").field(inverse).equals(DatabaseValue::Int64(owner.id()));
        let not_deleted = not_deleted();
        let mut filters = vec![Filter::new("x", &owned_by)];
        if self.config.filter_deleted {
            filters.push(Filter::new("x", &not_deleted));
        }
        let tokens = QueryTranslator::new(&self.resolver).tokens(&target, SelectKind::Rows, &filters)?;
        let query = SqlTokenComposer::compose(&tokens)?.for_entity(target.name());

        let rows = self.execute_reader(&query).await?;
        let mut items = Vec::with_capacity(rows.len());
        for row in &rows {
            items.push(self.materialize(&target, row.as_ref(), pending)?);
        }
        Ok(items)
    }
}

fn not_deleted() -> Expression {
    Parameter::new("x").field(DELETED_FIELD).equals(false)
}
