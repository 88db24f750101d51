//! Commit and entity listeners
//!
//! Commit listeners run once per successful commit, after every statement
//! succeeded and before the physical commit. Entity listeners run while the
//! commit is planned, before any statement is issued; either kind can abort
//! the commit by returning an error.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use super::commit::CommitSummary;
use crate::entity::Entity;
use crate::error::OrmResult;
use crate::metadata::EntityMetadata;

#[async_trait]
pub trait CommitListener: Send + Sync {
    async fn on_commit(&self, summary: &CommitSummary) -> OrmResult<()>;
}

/// Hooks around the writes of a single entity
pub trait EntityListener: Send + Sync {
    fn before_insert(&self, _entity: &mut dyn Entity, _metadata: &EntityMetadata) -> OrmResult<()> {
        Ok(())
    }

    fn before_update(&self, _entity: &mut dyn Entity, _metadata: &EntityMetadata) -> OrmResult<()> {
        Ok(())
    }

    fn before_delete(&self, _entity: &mut dyn Entity, _metadata: &EntityMetadata) -> OrmResult<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EntityEvent {
    Insert,
    Update,
    Delete,
}

/// Entity listeners, global or per entity name
#[derive(Clone, Default)]
pub struct ListenerRegistry {
    global: Vec<Arc<dyn EntityListener>>,
    by_entity: HashMap<String, Vec<Arc<dyn EntityListener>>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Listen to every entity
    pub fn register_global(&mut self, listener: Arc<dyn EntityListener>) {
        self.global.push(listener);
    }

    /// Listen to one entity
    pub fn register(&mut self, entity: impl Into<String>, listener: Arc<dyn EntityListener>) {
        self.by_entity.entry(entity.into()).or_default().push(listener);
    }

    pub fn listener_count(&self) -> usize {
        self.global.len() + self.by_entity.values().map(Vec::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.listener_count() == 0
    }

    pub(crate) fn trigger(
        &self,
        event: EntityEvent,
        entity: &mut dyn Entity,
        metadata: &EntityMetadata,
    ) -> OrmResult<()> {
        let scoped = self.by_entity.get(metadata.name()).into_iter().flatten();
        for listener in self.global.iter().chain(scoped) {
            match event {
                EntityEvent::Insert => listener.before_insert(entity, metadata)?,
                EntityEvent::Update => listener.before_update(entity, metadata)?,
                EntityEvent::Delete => listener.before_delete(entity, metadata)?,
            }
        }
        Ok(())
    }
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("global", &self.global.len())
            .field("entities", &self.by_entity.keys().collect::<Vec<_>>())
            .finish()
    }
}
