//! Save, delete and evict
//!
//! These operations only change session bookkeeping; statements are issued
//! by the next commit. Cascades walk the association graph once per entity
//! instance, so back references cannot loop.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use super::identity_map::EntityKey;
use super::Session;
use crate::entity::{AnyEntity, Entity, EntityRef};
use crate::error::{OrmError, OrmResult};

impl Session {
    /// Attach an entity and everything reachable through save cascades
    pub fn save_or_update<T: Entity>(&mut self, entity: &EntityRef<T>) -> OrmResult<()> {
        self.save_or_update_any(&entity.to_any())
    }

    pub fn save_or_update_any(&mut self, entity: &AnyEntity) -> OrmResult<()> {
        self.ensure_not_closed()?;
        let reachable = self.cascade_set(entity, false)?;
        for item in &reachable {
            self.check_attachable(item)?;
        }
        for item in &reachable {
            self.attach(item)?;
        }
        self.link_inverses(&reachable)?;
        debug!(
            "Session {} saved {} entities through cascade",
            self.id,
            reachable.len()
        );
        Ok(())
    }

    /// Mark an entity and its delete cascades as deleted
    ///
    /// Fails with [`OrmError::ReferentialIntegrity`] while another attached
    /// entity holds a mandatory, non cascading reference to any of them.
    pub fn delete<T: Entity>(&mut self, entity: &EntityRef<T>) -> OrmResult<()> {
        self.delete_any(&entity.to_any())
    }

    pub fn delete_any(&mut self, entity: &AnyEntity) -> OrmResult<()> {
        self.ensure_not_closed()?;
        let doomed = self.cascade_set(entity, true)?;
        for item in &doomed {
            self.check_attachable(item)?;
        }
        self.check_integrity(&doomed)?;

        for item in &doomed {
            if item.id() == 0 {
                // Never written, so there is nothing to delete
                self.identity_map.remove(item);
                item.write().base_mut().detach();
                continue;
            }
            self.attach(item)?;
            item.write().base_mut().mark_deleted();
        }
        debug!("Session {} marked {} entities deleted", self.id, doomed.len());
        Ok(())
    }

    /// Detach an entity; it will never be returned by this session again
    pub fn evict<T: Entity>(&mut self, entity: &EntityRef<T>) -> OrmResult<()> {
        self.evict_any(&entity.to_any())
    }

    pub fn evict_any(&mut self, entity: &AnyEntity) -> OrmResult<()> {
        self.ensure_not_closed()?;
        if !self.identity_map.remove(entity) {
            return Err(OrmError::invalid_state("entity is not attached to this session"));
        }
        entity.write().base_mut().evict();
        debug!("Session {} evicted {:?}", self.id, entity);
        Ok(())
    }

    /// `entity` plus every entity reachable through cascading associations
    fn cascade_set(&self, entity: &AnyEntity, deleting: bool) -> OrmResult<Vec<AnyEntity>> {
        let mut visited = HashSet::new();
        let mut reachable = Vec::new();
        let mut pending = vec![entity.clone()];

        while let Some(current) = pending.pop() {
            if !visited.insert(current.key()) {
                continue;
            }
            let metadata = self.resolver.metadata_for(&*current.read())?;
            let mut children = Vec::new();
            {
                let guard = current.read();
                for field in metadata.cascading(deleting) {
                    if field.is_collection() {
                        children.extend(guard.collection(&field.name).unwrap_or_default());
                    } else if let Some(target) = guard.reference(&field.name) {
                        children.push(target);
                    }
                }
            }
            // Reversed so they pop in declaration order
            pending.extend(children.into_iter().rev());
            reachable.push(current);
        }
        Ok(reachable)
    }

    fn check_attachable(&self, entity: &AnyEntity) -> OrmResult<()> {
        let metadata = self.resolver.metadata_for(&*entity.read())?;
        let (id, evicted, owner) = {
            let guard = entity.read();
            let base = guard.base();
            (base.id(), base.is_evicted(), base.session())
        };

        if evicted {
            return Err(OrmError::invalid_state(format!(
                "{}#{} was evicted and cannot be attached again",
                metadata.name(),
                id
            )));
        }
        if let Some(other) = owner.filter(|s| *s != self.id) {
            return Err(OrmError::invalid_state(format!(
                "{}#{} is attached to session {}",
                metadata.name(),
                id,
                other
            )));
        }
        if id != 0 {
            if let Some(existing) = self.identity_map.get(metadata.name(), id) {
                if !existing.ptr_eq(entity) {
                    return Err(OrmError::invalid_state(format!(
                        "another instance of {}#{} is already attached",
                        metadata.name(),
                        id
                    )));
                }
            }
        }
        Ok(())
    }

    fn attach(&mut self, entity: &AnyEntity) -> OrmResult<()> {
        let metadata = self.resolver.metadata_for(&*entity.read())?;
        let id = {
            let mut guard = entity.write();
            guard.base_mut().attach(self.id);
            guard.base().id()
        };
        let key = (id != 0).then(|| EntityKey::new(metadata.name(), id));
        self.identity_map.attach(entity.clone(), key);
        Ok(())
    }

    /// Point collection items back at their owner
    fn link_inverses(&self, entities: &[AnyEntity]) -> OrmResult<()> {
        for owner in entities {
            let metadata = self.resolver.metadata_for(&*owner.read())?;
            for field in metadata.collections() {
                let Some(inverse) = field.reference_field.as_deref() else { continue };
                let items = owner.read().collection(&field.name).unwrap_or_default();
                for item in items.iter().filter(|item| !item.ptr_eq(owner)) {
                    let linked = item
                        .read()
                        .reference(inverse)
                        .is_some_and(|target| target.ptr_eq(owner));
                    if !linked {
                        item.write().set_reference(inverse, Some(owner.clone()))?;
                    }
                }
            }
        }
        Ok(())
    }

    fn check_integrity(&self, doomed: &[AnyEntity]) -> OrmResult<()> {
        let keys: HashSet<usize> = doomed.iter().map(AnyEntity::key).collect();

        // Mandatory, non cascading foreign keys into any of the doomed types
        let mut guarded: HashMap<String, Vec<String>> = HashMap::new();
        let mut targets = HashSet::new();
        for item in doomed {
            let target = self.resolver.metadata_for(&*item.read())?;
            if !targets.insert(target.name().to_string()) {
                continue;
            }
            for referencing in self.resolver.referencing_fields(target.name()) {
                let metadata = self.resolver.metadata_by_name(&referencing.entity)?;
                let blocks = metadata
                    .field(&referencing.field)
                    .is_some_and(|f| f.mandatory && !f.cascade.deletes());
                if blocks {
                    guarded
                        .entry(referencing.entity.clone())
                        .or_default()
                        .push(referencing.field.clone());
                }
            }
        }
        if guarded.is_empty() {
            return Ok(());
        }

        for other in self.identity_map.entities() {
            if keys.contains(&other.key()) {
                continue;
            }
            let metadata = self.resolver.metadata_for(&*other.read())?;
            let Some(fields) = guarded.get(metadata.name()) else {
                continue;
            };
            let blocking = {
                let guard = other.read();
                if guard.base().is_deleted() {
                    continue;
                }
                fields.iter().find_map(|field| {
                    guard
                        .reference(field)
                        .filter(|target| keys.contains(&target.key()))
                        .map(|target| (field.clone(), target))
                })
            };

            if let Some((field, target)) = blocking {
                let target_metadata = self.resolver.metadata_for(&*target.read())?;
                return Err(OrmError::ReferentialIntegrity {
                    entity: target_metadata.name().to_string(),
                    id: target.id(),
                    referenced_by: metadata.name().to_string(),
                    field,
                });
            }
        }
        Ok(())
    }
}
