//! Commit
//!
//! A commit is planned before any statement runs: entity listeners,
//! validation and the transient reference check can veto it without touching
//! the database. Saves are ordered so that referenced rows are written before
//! the rows pointing at them; deletes run in the opposite order. Ids, versions
//! and baselines change in memory only after every statement and commit
//! listener succeeded.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use super::identity_map::EntityKey;
use super::listeners::EntityEvent;
use super::scope::UndoRecord;
use super::Session;
use crate::backends::DatabaseValue;
use crate::config::DeleteMode;
use crate::entity::{field_value, snapshot, validate, AnyEntity};
use crate::error::{OrmError, OrmResult};
use crate::metadata::{EntityMetadata, FieldMetadata, DELETED_FIELD, VERSION_FIELD};
use crate::query::StatementBuilder;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChangeKind {
    Inserted,
    Updated,
    Deleted,
}

/// One row written by a commit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityChange {
    pub entity: String,
    pub id: i64,
    pub kind: ChangeKind,
}

/// What a commit wrote, handed to commit listeners and returned to the caller
#[derive(Debug, Clone, Serialize)]
pub struct CommitSummary {
    pub session: Uuid,
    pub changes: Vec<EntityChange>,
}

impl CommitSummary {
    fn new(session: Uuid) -> Self {
        Self {
            session,
            changes: Vec::new(),
        }
    }

    pub fn inserted(&self) -> usize {
        self.count(ChangeKind::Inserted)
    }

    pub fn updated(&self) -> usize {
        self.count(ChangeKind::Updated)
    }

    pub fn deleted(&self) -> usize {
        self.count(ChangeKind::Deleted)
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    fn count(&self, kind: ChangeKind) -> usize {
        self.changes.iter().filter(|c| c.kind == kind).count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteKind {
    Insert,
    Update,
    Delete,
}

struct PlannedWrite {
    entity: AnyEntity,
    metadata: Arc<EntityMetadata>,
    kind: WriteKind,
}

struct CommitPlan {
    saves: Vec<PlannedWrite>,
    deletes: Vec<PlannedWrite>,
}

enum Outcome {
    Inserted(i64),
    Updated,
    SoftDeleted,
    HardDeleted,
    Unchanged,
}

/// Column value read from an entity; references are resolved to keys later
enum ColumnSource<'m> {
    Value(&'m FieldMetadata, DatabaseValue),
    Reference(&'m FieldMetadata, Option<AnyEntity>),
}

/// Foreign key written after its target's insert
struct DeferredReference {
    owner: AnyEntity,
    metadata: Arc<EntityMetadata>,
    field: String,
    target: AnyEntity,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    Active,
    Done,
}

impl Session {
    /// Write every pending change of the session
    ///
    /// Without an active transaction the commit runs in its own physical
    /// transaction. Inside a scope the statements join the scope and become
    /// durable when the outermost scope commits. On failure the current scope
    /// is rolled back and no entity state changes.
    pub async fn commit(&mut self) -> OrmResult<CommitSummary> {
        self.ensure_ready().await?;
        let plan = self.plan_commit()?;

        match self.transactions.innermost() {
            Some(serial) => self.flush(plan, serial).await,
            None => {
                let serial = self.begin_frame().await?;
                let summary = self.flush(plan, serial).await?;
                self.end_frame().await?;
                Ok(summary)
            }
        }
    }

    pub(crate) async fn commit_scope(&mut self, serial: u64) -> OrmResult<CommitSummary> {
        self.ensure_ready().await?;
        match self.transactions.innermost() {
            Some(innermost) if innermost == serial => {}
            _ if self.transactions.contains(serial) => {
                return Err(OrmError::invalid_state(
                    "a nested transaction scope is still active",
                ))
            }
            _ => return Err(OrmError::invalid_state("transaction scope has already ended")),
        }

        let plan = match self.plan_commit() {
            Ok(plan) => plan,
            Err(err) => return Err(self.abort(serial, err).await),
        };
        let summary = self.flush(plan, serial).await?;
        self.end_frame().await?;
        Ok(summary)
    }

    async fn flush(&mut self, plan: CommitPlan, serial: u64) -> OrmResult<CommitSummary> {
        let (summary, outcomes) = match self.write_plan(&plan).await {
            Ok(written) => written,
            Err(err) => return Err(self.abort(serial, err).await),
        };

        let mut records = Vec::new();
        if let Err(err) = self.apply(&plan, &outcomes, &mut records) {
            self.undo(&records);
            return Err(self.abort(serial, err).await);
        }
        self.transactions.record(records);

        info!(
            "Session {} committed {} inserts, {} updates, {} deletes",
            self.id,
            summary.inserted(),
            summary.updated(),
            summary.deleted()
        );
        Ok(summary)
    }

    async fn abort(&mut self, serial: u64, err: OrmError) -> OrmError {
        warn!("Commit of session {} failed, rolling back: {}", self.id, err);
        if let Err(rollback) = self.rollback_through(serial).await {
            warn!("Rollback of session {} failed: {}", self.id, rollback);
        }
        err
    }

    fn plan_commit(&mut self) -> OrmResult<CommitPlan> {
        let mut saves = Vec::new();
        let mut deletes = Vec::new();

        for entity in self.identity_map.entities() {
            let metadata = self.resolver.metadata_for(&*entity.read())?;
            let kind = {
                let guard = entity.read();
                let base = guard.base();
                match (base.id(), base.is_deleted()) {
                    (0, false) => Some(WriteKind::Insert),
                    (0, true) => None,
                    (_, true) if base.tracker().is_field_dirty(DELETED_FIELD) => {
                        Some(WriteKind::Delete)
                    }
                    (_, true) => None,
                    (_, false) if base.tracker().is_dirty() => Some(WriteKind::Update),
                    (_, false) => None,
                }
            };
            let Some(kind) = kind else { continue };

            {
                let mut guard = entity.write();
                let event = match kind {
                    WriteKind::Insert => EntityEvent::Insert,
                    WriteKind::Update => EntityEvent::Update,
                    WriteKind::Delete => EntityEvent::Delete,
                };
                self.entity_listeners.trigger(event, &mut *guard, &metadata)?;
                if kind != WriteKind::Delete {
                    validate(&*guard, &metadata)?;
                }
            }

            let write = PlannedWrite {
                entity,
                metadata,
                kind,
            };
            if kind == WriteKind::Delete {
                deletes.push(write);
            } else {
                saves.push(write);
            }
        }

        for write in &saves {
            self.check_references(write)?;
        }

        let saves = dependency_order(saves);
        let mut deletes = dependency_order(deletes);
        deletes.reverse();
        Ok(CommitPlan { saves, deletes })
    }

    /// Referenced entities must be saved or part of this commit
    fn check_references(&self, write: &PlannedWrite) -> OrmResult<()> {
        let targets: Vec<(&FieldMetadata, AnyEntity)> = {
            let guard = write.entity.read();
            let targets = write
                .metadata
                .references()
                .filter_map(|field| guard.reference(&field.name).map(|t| (field, t)))
                .collect();
            targets
        };

        for (field, target) in targets {
            let (id, owner) = {
                let guard = target.read();
                (guard.base().id(), guard.base().session())
            };
            match owner {
                Some(other) if other != self.id => {
                    return Err(OrmError::invalid_state(format!(
                        "{}.{} references an entity attached to session {}",
                        write.metadata.name(),
                        field.name,
                        other
                    )));
                }
                _ if id == 0 && !self.identity_map.contains(&target) => {
                    return Err(OrmError::invalid_state(format!(
                        "{}.{} references an unsaved entity that is not part of this session",
                        write.metadata.name(),
                        field.name
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }

    async fn write_plan(&mut self, plan: &CommitPlan) -> OrmResult<(CommitSummary, Vec<Outcome>)> {
        let mut summary = CommitSummary::new(self.id);
        let mut outcomes = Vec::with_capacity(plan.saves.len() + plan.deletes.len());
        let mut assigned: HashMap<usize, i64> = HashMap::new();
        let mut deferred = Vec::new();

        for write in &plan.saves {
            let outcome = match write.kind {
                WriteKind::Insert => self.write_insert(write, &mut assigned, &mut deferred).await?,
                _ => self.write_update(write, &assigned, &mut deferred, "update").await?,
            };
            record_change(&mut summary, write, &outcome);
            outcomes.push(outcome);
        }

        for reference in deferred {
            let entity = reference.metadata.name();
            let unsaved = || {
                OrmError::invalid_state(format!(
                    "{}.{} references an entity that was not saved",
                    entity, reference.field
                ))
            };
            let owner_id = saved_id(&reference.owner, &assigned).ok_or_else(unsaved)?;
            let target_id = saved_id(&reference.target, &assigned).ok_or_else(unsaved)?;
            let field = reference.metadata.require_field(&reference.field)?;
            let query = StatementBuilder::update_reference(&reference.metadata, owner_id, field, target_id);
            self.execute_non_query(&query)
                .await
                .map_err(|e| OrmError::commit_failed("update reference", entity, e))?;
        }

        for write in &plan.deletes {
            let outcome = match self.config.delete_mode {
                DeleteMode::Soft => {
                    match self.write_update(write, &assigned, &mut Vec::new(), "soft delete").await? {
                        Outcome::Unchanged => Outcome::Unchanged,
                        _ => Outcome::SoftDeleted,
                    }
                }
                DeleteMode::Hard => self.write_delete(write).await?,
            };
            record_change(&mut summary, write, &outcome);
            outcomes.push(outcome);
        }

        for listener in self.commit_listeners.clone() {
            listener.on_commit(&summary).await.map_err(|err| match err {
                OrmError::Listener(_) => err,
                other => OrmError::Listener(other.to_string()),
            })?;
        }

        Ok((summary, outcomes))
    }

    async fn write_insert(
        &mut self,
        write: &PlannedWrite,
        assigned: &mut HashMap<usize, i64>,
        deferred: &mut Vec<DeferredReference>,
    ) -> OrmResult<Outcome> {
        let metadata = &write.metadata;
        let columns = {
            let guard = write.entity.read();
            let mut columns = Vec::new();
            for field in metadata.columns().filter(|f| !f.is_primary_key()) {
                columns.push(match field.name.as_str() {
                    DELETED_FIELD => ColumnSource::Value(field, DatabaseValue::Bool(false)),
                    VERSION_FIELD => ColumnSource::Value(field, DatabaseValue::Int64(1)),
                    _ if field.is_reference() => {
                        ColumnSource::Reference(field, guard.reference(&field.name))
                    }
                    _ => ColumnSource::Value(field, field_value(&*guard, metadata, field)?),
                });
            }
            columns
        };

        let values = resolve_columns(write, columns, assigned, deferred);
        let query = StatementBuilder::insert(metadata, &values);
        let id = self
            .execute_insert(&query)
            .await
            .map_err(|e| OrmError::commit_failed("insert", metadata.name(), e))?;
        assigned.insert(write.entity.key(), id);
        Ok(Outcome::Inserted(id))
    }

    /// Version guarded update of the dirty columns
    async fn write_update(
        &mut self,
        write: &PlannedWrite,
        assigned: &HashMap<usize, i64>,
        deferred: &mut Vec<DeferredReference>,
        operation: &str,
    ) -> OrmResult<Outcome> {
        let metadata = &write.metadata;
        let (id, version, columns) = {
            let guard = write.entity.read();
            let base = guard.base();
            let mut columns = Vec::new();
            for name in base.tracker().dirty_fields() {
                let Some(field) = metadata.field(&name) else { continue };
                if !field.is_column() || field.is_primary_key() || field.name == VERSION_FIELD {
                    continue;
                }
                columns.push(if field.is_reference() {
                    ColumnSource::Reference(field, guard.reference(&field.name))
                } else {
                    ColumnSource::Value(field, field_value(&*guard, metadata, field)?)
                });
            }
            (base.id(), base.version(), columns)
        };
        if columns.is_empty() {
            return Ok(Outcome::Unchanged);
        }

        let values = resolve_columns(write, columns, assigned, deferred);
        let query = StatementBuilder::update(metadata, id, version, &values);
        let affected = self
            .execute_non_query(&query)
            .await
            .map_err(|e| OrmError::commit_failed(operation, metadata.name(), e))?;
        if affected == 0 {
            return Err(conflict(metadata, id, version));
        }
        Ok(Outcome::Updated)
    }

    async fn write_delete(&mut self, write: &PlannedWrite) -> OrmResult<Outcome> {
        let metadata = &write.metadata;
        let (id, version) = {
            let guard = write.entity.read();
            (guard.base().id(), guard.base().version())
        };
        let query = StatementBuilder::delete(metadata, id, version);
        let affected = self
            .execute_non_query(&query)
            .await
            .map_err(|e| OrmError::commit_failed("delete", metadata.name(), e))?;
        if affected == 0 {
            return Err(conflict(metadata, id, version));
        }
        Ok(Outcome::HardDeleted)
    }

    /// Move ids, versions and baselines forward, recording how to undo it
    fn apply(
        &mut self,
        plan: &CommitPlan,
        outcomes: &[Outcome],
        records: &mut Vec<UndoRecord>,
    ) -> OrmResult<()> {
        let writes = plan.saves.iter().chain(plan.deletes.iter());
        for (write, outcome) in writes.zip(outcomes) {
            let inserted = {
                let mut guard = write.entity.write();
                let base = guard.base();
                let (id, version, deleted) = (base.id(), base.version(), base.is_deleted());
                records.push(UndoRecord {
                    entity: write.entity.clone(),
                    id,
                    version,
                    tracker: base.tracker().clone(),
                    inserted: None,
                    removed: None,
                });

                let inserted = match outcome {
                    Outcome::Inserted(new_id) => {
                        guard.base_mut().assign_key(*new_id, 1, false);
                        Some(EntityKey::new(write.metadata.name(), *new_id))
                    }
                    Outcome::Updated | Outcome::SoftDeleted => {
                        guard.base_mut().assign_key(id, version + 1, deleted);
                        None
                    }
                    Outcome::HardDeleted | Outcome::Unchanged => None,
                };
                let baseline = snapshot(&*guard, &write.metadata)?;
                guard.base_mut().tracker_mut().reset(baseline);
                inserted
            };

            if let Some(key) = inserted {
                self.identity_map.register(key.clone(), write.entity.clone());
                if let Some(record) = records.last_mut() {
                    record.inserted = Some(key);
                }
            }
            // The row is gone; the instance stays attached but is no longer found by key
            if let Outcome::HardDeleted = outcome {
                let key = EntityKey::new(write.metadata.name(), write.entity.id());
                self.identity_map.unregister(&key);
                if let Some(record) = records.last_mut() {
                    record.removed = Some(key);
                }
            }
        }
        Ok(())
    }
}

fn conflict(metadata: &EntityMetadata, id: i64, version: i64) -> OrmError {
    OrmError::ConcurrencyConflict {
        entity: metadata.name().to_string(),
        id,
        version,
    }
}

fn record_change(summary: &mut CommitSummary, write: &PlannedWrite, outcome: &Outcome) {
    let (id, kind) = match outcome {
        Outcome::Inserted(id) => (*id, ChangeKind::Inserted),
        Outcome::Updated => (write.entity.id(), ChangeKind::Updated),
        Outcome::SoftDeleted | Outcome::HardDeleted => (write.entity.id(), ChangeKind::Deleted),
        Outcome::Unchanged => return,
    };
    summary.changes.push(EntityChange {
        entity: write.metadata.name().to_string(),
        id,
        kind,
    });
}

/// Key of an entity, including keys assigned earlier in the same commit
fn saved_id(entity: &AnyEntity, assigned: &HashMap<usize, i64>) -> Option<i64> {
    assigned
        .get(&entity.key())
        .copied()
        .or_else(|| Some(entity.id()).filter(|id| *id != 0))
}

fn resolve_columns<'m>(
    write: &PlannedWrite,
    columns: Vec<ColumnSource<'m>>,
    assigned: &HashMap<usize, i64>,
    deferred: &mut Vec<DeferredReference>,
) -> Vec<(&'m FieldMetadata, DatabaseValue)> {
    columns
        .into_iter()
        .map(|column| match column {
            ColumnSource::Value(field, value) => (field, value),
            ColumnSource::Reference(field, None) => (field, DatabaseValue::Null),
            ColumnSource::Reference(field, Some(target)) => match saved_id(&target, assigned) {
                Some(id) => (field, DatabaseValue::Int64(id)),
                None => {
                    // Reference cycle: the target row does not exist yet
                    deferred.push(DeferredReference {
                        owner: write.entity.clone(),
                        metadata: write.metadata.clone(),
                        field: field.name.clone(),
                        target,
                    });
                    (field, DatabaseValue::Null)
                }
            },
        })
        .collect()
}

/// Order writes so that referenced entities come before their referrers.
/// Cycles are broken arbitrarily; their foreign keys are deferred.
fn dependency_order(writes: Vec<PlannedWrite>) -> Vec<PlannedWrite> {
    let index: HashMap<usize, usize> = writes
        .iter()
        .enumerate()
        .map(|(i, w)| (w.entity.key(), i))
        .collect();
    let edges: Vec<Vec<usize>> = writes
        .iter()
        .map(|write| {
            let guard = write.entity.read();
            let targets: Vec<usize> = write
                .metadata
                .references()
                .filter_map(|field| guard.reference(&field.name))
                .filter_map(|target| index.get(&target.key()).copied())
                .collect();
            targets
        })
        .collect();

    let mut marks = vec![Mark::Unvisited; writes.len()];
    let mut order = Vec::with_capacity(writes.len());
    for root in 0..writes.len() {
        if marks[root] != Mark::Unvisited {
            continue;
        }
        marks[root] = Mark::Active;
        let mut stack = vec![(root, 0usize)];
        while let Some(&(node, next)) = stack.last() {
            match edges[node].get(next) {
                Some(&target) => {
                    if let Some(top) = stack.last_mut() {
                        top.1 += 1;
                    }
                    if marks[target] == Mark::Unvisited {
                        marks[target] = Mark::Active;
                        stack.push((target, 0));
                    }
                }
                None => {
                    marks[node] = Mark::Done;
                    order.push(node);
                    stack.pop();
                }
            }
        }
    }

    let mut slots: Vec<Option<PlannedWrite>> = writes.into_iter().map(Some).collect();
    order.into_iter().filter_map(|i| slots[i].take()).collect()
}
