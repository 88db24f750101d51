//! Transaction scopes
//!
//! The outermost scope owns the physical transaction, every nested scope is a
//! savepoint inside it. Each frame keeps undo records for the in-memory
//! effects of the commits flushed inside it, so rolling a frame back restores
//! ids, versions and baselines along with the database state.

use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};

use tracing::{debug, warn};

use super::identity_map::EntityKey;
use super::{CommitSummary, Session};
use crate::entity::{snapshot, AnyEntity, ChangeTracker};
use crate::error::{OrmError, OrmResult};
use crate::transactions::SavepointManager;

/// State of one entity before a commit touched it
#[derive(Debug)]
pub(crate) struct UndoRecord {
    pub entity: AnyEntity,
    pub id: i64,
    pub version: i64,
    pub tracker: ChangeTracker,
    /// Key registered by an insert
    pub inserted: Option<EntityKey>,
    /// Key released by a hard delete
    pub removed: Option<EntityKey>,
}

#[derive(Debug)]
struct Frame {
    serial: u64,
    savepoint: Option<String>,
    undo: Vec<UndoRecord>,
}

#[derive(Debug)]
pub(crate) struct TransactionStack {
    frames: Vec<Frame>,
    savepoints: SavepointManager,
    next_serial: u64,
    pending_rollback: Option<u64>,
}

impl TransactionStack {
    pub fn new(savepoint_prefix: &str) -> Self {
        Self {
            frames: Vec::new(),
            savepoints: SavepointManager::new(savepoint_prefix),
            next_serial: 0,
            pending_rollback: None,
        }
    }

    pub fn is_active(&self) -> bool {
        !self.frames.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn innermost(&self) -> Option<u64> {
        self.frames.last().map(|f| f.serial)
    }

    pub fn contains(&self, serial: u64) -> bool {
        self.position(serial).is_some()
    }

    /// Record undo information in the innermost frame
    pub fn record(&mut self, records: Vec<UndoRecord>) {
        if let Some(frame) = self.frames.last_mut() {
            frame.undo.extend(records);
        }
    }

    pub fn outermost(&self) -> Option<u64> {
        self.frames.first().map(|f| f.serial)
    }

    fn position(&self, serial: u64) -> Option<usize> {
        self.frames.iter().position(|f| f.serial == serial)
    }

    fn push(&mut self, savepoint: Option<String>) -> u64 {
        let serial = self.next_serial;
        self.next_serial += 1;
        self.frames.push(Frame {
            serial,
            savepoint,
            undo: Vec::new(),
        });
        serial
    }

    fn schedule_rollback(&mut self, serial: u64) {
        // Rolling back an outer frame covers every frame inside it
        let position = match self.position(serial) {
            Some(position) => position,
            None => return,
        };
        let outermost = match self.pending_rollback.and_then(|s| self.position(s)) {
            Some(pending) if pending < position => pending,
            _ => position,
        };
        self.pending_rollback = Some(self.frames[outermost].serial);
    }
}

impl Session {
    /// Start a transaction scope; nested calls create savepoints
    pub async fn begin_transaction(&mut self) -> OrmResult<TransactionScope<'_>> {
        self.ensure_ready().await?;
        let serial = self.begin_frame().await?;
        Ok(TransactionScope {
            session: self,
            serial,
            finished: false,
        })
    }

    /// Roll back the innermost transaction scope
    pub async fn rollback(&mut self) -> OrmResult<()> {
        self.ensure_ready().await?;
        let serial = self
            .transactions
            .innermost()
            .ok_or_else(|| OrmError::invalid_state("no transaction is active"))?;
        self.rollback_through(serial).await
    }

    pub(crate) async fn begin_frame(&mut self) -> OrmResult<u64> {
        let savepoint = if self.transactions.is_active() {
            Some(
                self.transactions
                    .savepoints
                    .create_savepoint(self.connection.as_mut())
                    .await?,
            )
        } else {
            self.connection
                .begin_transaction(self.config.isolation_level)
                .await?;
            debug!(
                "Session {} began transaction ({})",
                self.id, self.config.isolation_level
            );
            None
        };
        Ok(self.transactions.push(savepoint))
    }

    /// Complete the innermost frame: commit the physical transaction or
    /// release the savepoint into its parent.
    pub(crate) async fn end_frame(&mut self) -> OrmResult<()> {
        let frame = self
            .transactions
            .frames
            .pop()
            .ok_or_else(|| OrmError::invalid_state("no transaction is active"))?;

        match &frame.savepoint {
            None => {
                self.transactions.savepoints.reset();
                if let Err(err) = self.connection.commit().await {
                    self.undo(&frame.undo);
                    if let Err(rollback) = self.connection.rollback().await {
                        warn!("Rollback after failed commit also failed: {}", rollback);
                    }
                    return Err(err);
                }
                debug!("Session {} committed transaction", self.id);
            }
            Some(savepoint) => {
                let released = self
                    .transactions
                    .savepoints
                    .release_savepoint(self.connection.as_mut(), savepoint)
                    .await;
                if let Err(err) = released {
                    self.undo(&frame.undo);
                    if let Err(rollback) = self
                        .transactions
                        .savepoints
                        .rollback_to_savepoint(self.connection.as_mut(), savepoint)
                        .await
                    {
                        warn!("Rollback to {} also failed: {}", savepoint, rollback);
                    }
                    return Err(err);
                }
                self.transactions.record(frame.undo);
            }
        }
        Ok(())
    }

    /// Roll back the frame `serial` together with every frame nested in it
    pub(crate) async fn rollback_through(&mut self, serial: u64) -> OrmResult<()> {
        let position = match self.transactions.position(serial) {
            Some(position) => position,
            None => return Ok(()),
        };
        if self
            .transactions
            .pending_rollback
            .is_some_and(|pending| self.transactions.position(pending).map_or(true, |p| p >= position))
        {
            self.transactions.pending_rollback = None;
        }

        let frames: Vec<Frame> = self.transactions.frames.drain(position..).collect();
        for frame in frames.iter().rev() {
            self.undo(&frame.undo);
        }

        match &frames[0].savepoint {
            None => {
                self.transactions.savepoints.reset();
                self.connection.rollback().await?;
                debug!("Session {} rolled back transaction", self.id);
            }
            Some(savepoint) => {
                let savepoints = &mut self.transactions.savepoints;
                savepoints
                    .rollback_to_savepoint(self.connection.as_mut(), savepoint)
                    .await?;
                savepoints
                    .release_savepoint(self.connection.as_mut(), savepoint)
                    .await?;
            }
        }
        Ok(())
    }

    /// Undo every frame in memory only; the connection discards the transaction itself
    pub(crate) fn discard_transactions(&mut self) {
        let frames = std::mem::take(&mut self.transactions.frames);
        self.transactions.pending_rollback = None;
        self.transactions.savepoints.reset();
        for frame in frames.iter().rev() {
            self.undo(&frame.undo);
        }
    }

    /// Perform a rollback left behind by a dropped scope
    pub(crate) async fn settle_pending_rollback(&mut self) -> OrmResult<()> {
        match self.transactions.pending_rollback.take() {
            Some(serial) => self.rollback_through(serial).await,
            None => Ok(()),
        }
    }

    /// Put keys and baselines back; edits made after the flush stay dirty
    pub(crate) fn undo(&mut self, records: &[UndoRecord]) {
        for record in records.iter().rev() {
            {
                let mut guard = record.entity.write();
                guard.base_mut().restore_key(record.id, record.version);
                let current = self
                    .resolver
                    .metadata_for(&*guard)
                    .and_then(|metadata| snapshot(&*guard, &metadata));
                let current = match current {
                    Ok(current) => current,
                    Err(err) => {
                        warn!("Could not read entity #{} while rolling back: {}", record.id, err);
                        BTreeMap::new()
                    }
                };
                guard
                    .base_mut()
                    .tracker_mut()
                    .rebase(&record.tracker, &current);
            }
            if let Some(key) = &record.inserted {
                self.identity_map.unregister(key);
            }
            if let Some(key) = &record.removed {
                self.identity_map.register(key.clone(), record.entity.clone());
            }
        }
    }
}

/// Guard for one transaction scope
///
/// Dereferences to the session so work can be done inside the scope. A scope
/// that is dropped without [`commit`](TransactionScope::commit) or
/// [`rollback`](TransactionScope::rollback) is rolled back before the session
/// performs its next operation.
pub struct TransactionScope<'s> {
    session: &'s mut Session,
    serial: u64,
    finished: bool,
}

impl<'s> TransactionScope<'s> {
    /// Flush pending changes and complete this scope
    pub async fn commit(mut self) -> OrmResult<CommitSummary> {
        self.finished = true;
        let serial = self.serial;
        self.session.commit_scope(serial).await
    }

    pub async fn rollback(mut self) -> OrmResult<()> {
        self.finished = true;
        let serial = self.serial;
        self.session.ensure_not_closed()?;
        if !self.session.transactions.contains(serial) {
            return Err(OrmError::invalid_state("transaction scope has already ended"));
        }
        self.session.rollback_through(serial).await
    }

    pub fn is_active(&self) -> bool {
        self.session.transactions.contains(self.serial)
    }
}

impl Deref for TransactionScope<'_> {
    type Target = Session;

    fn deref(&self) -> &Session {
        self.session
    }
}

impl DerefMut for TransactionScope<'_> {
    fn deref_mut(&mut self) -> &mut Session {
        self.session
    }
}

impl Drop for TransactionScope<'_> {
    fn drop(&mut self) {
        if self.finished || !self.session.transactions.contains(self.serial) {
            return;
        }
        warn!(
            "Transaction scope of session {} dropped without commit; rolling back",
            self.session.id
        );
        self.session.transactions.schedule_rollback(self.serial);
    }
}
