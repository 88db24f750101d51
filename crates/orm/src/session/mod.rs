//! Session (unit of work)
//!
//! A session owns a connection, the identity map of every entity it loaded or
//! was asked to save, and the stack of transaction scopes. It is used by one
//! task at a time: every operation takes `&mut self`.
//!
//! Only the connection boundary is awaited. Entity locks are never held
//! across an `.await`.

mod cascade;
mod commit;
pub mod factory;
mod identity_map;
pub mod listeners;
mod loading;
mod scope;


use std::fmt;
use std::sync::Arc;

use tracing::{debug, trace, warn};
use uuid::Uuid;

pub use commit::{ChangeKind, CommitSummary, EntityChange};
pub use factory::SessionFactory;
pub use identity_map::EntityKey;
pub use listeners::{CommitListener, EntityListener, ListenerRegistry};
pub use scope::TransactionScope;

use identity_map::IdentityMap;
use scope::TransactionStack;

use crate::backends::{Connection, DatabaseRow, DatabaseValue, Query};
use crate::config::SessionConfig;
use crate::entity::{AnyEntity, Entity, EntityRef};
use crate::error::{OrmError, OrmResult};
use crate::metadata::MetadataResolver;

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Accepting work, no transaction active
    Open,
    /// A physical transaction is active
    InTransaction,
    /// Closed; every further operation fails
    Disposed,
}

pub struct Session {
    id: Uuid,
    resolver: Arc<MetadataResolver>,
    connection: Box<dyn Connection>,
    config: SessionConfig,
    commit_listeners: Vec<Arc<dyn CommitListener>>,
    entity_listeners: Arc<ListenerRegistry>,
    identity_map: IdentityMap,
    transactions: TransactionStack,
    closed: bool,
}

impl Session {
    /// Create a session over a connection; the connection is opened on first use
    pub fn new(
        connection: Box<dyn Connection>,
        resolver: Arc<MetadataResolver>,
        config: SessionConfig,
    ) -> Self {
        let transactions = TransactionStack::new(&config.savepoint_prefix);
        let id = Uuid::new_v4();
        debug!("Session {} created", id);
        Self {
            id,
            resolver,
            connection,
            config,
            commit_listeners: Vec::new(),
            entity_listeners: Arc::new(ListenerRegistry::default()),
            identity_map: IdentityMap::default(),
            transactions,
            closed: false,
        }
    }

    pub fn with_commit_listener(mut self, listener: Arc<dyn CommitListener>) -> Self {
        self.commit_listeners.push(listener);
        self
    }

    pub fn with_entity_listeners(mut self, listeners: Arc<ListenerRegistry>) -> Self {
        self.entity_listeners = listeners;
        self
    }

    pub fn add_commit_listener(&mut self, listener: Arc<dyn CommitListener>) {
        self.commit_listeners.push(listener);
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn resolver(&self) -> &Arc<MetadataResolver> {
        &self.resolver
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        if self.closed {
            SessionState::Disposed
        } else if self.transactions.is_active() {
            SessionState::InTransaction
        } else {
            SessionState::Open
        }
    }

    /// Depth of nested transaction scopes
    pub fn transaction_depth(&self) -> usize {
        self.transactions.depth()
    }

    /// Number of entities owned by the session
    pub fn attached_count(&self) -> usize {
        self.identity_map.len()
    }

    pub fn is_attached<T: Entity>(&self, entity: &EntityRef<T>) -> bool {
        self.is_attached_any(&entity.to_any())
    }

    pub fn is_attached_any(&self, entity: &AnyEntity) -> bool {
        self.identity_map.contains(entity) && entity.read().base().session() == Some(self.id)
    }

    /// Roll back any active transaction, release every entity and close the
    /// connection. Closing twice is a no-op.
    pub async fn close(&mut self) -> OrmResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let rollback = match self.transactions.outermost() {
            Some(serial) => self.rollback_through(serial).await,
            None => Ok(()),
        };
        self.detach_all();
        let close = self.connection.close().await;
        debug!("Session {} closed", self.id);
        rollback.and(close)
    }

    fn ensure_not_closed(&self) -> OrmResult<()> {
        if self.closed {
            Err(OrmError::SessionClosed)
        } else {
            Ok(())
        }
    }

    /// Checks run before every operation that reaches the connection
    async fn ensure_ready(&mut self) -> OrmResult<()> {
        self.ensure_not_closed()?;
        if !self.connection.is_open() {
            self.connection.open().await?;
        }
        self.settle_pending_rollback().await
    }

    fn detach_all(&mut self) {
        for entity in self.identity_map.drain() {
            entity.write().base_mut().detach();
        }
    }

    async fn execute_reader(&mut self, query: &Query) -> OrmResult<Vec<Box<dyn DatabaseRow>>> {
        log_statement("query", query);
        self.connection.execute_reader(query).await
    }

    async fn execute_scalar(&mut self, query: &Query) -> OrmResult<DatabaseValue> {
        log_statement("scalar", query);
        self.connection.execute_scalar(query).await
    }

    async fn execute_non_query(&mut self, query: &Query) -> OrmResult<u64> {
        log_statement("statement", query);
        self.connection.execute_non_query(query).await
    }

    async fn execute_insert(&mut self, query: &Query) -> OrmResult<i64> {
        log_statement("insert", query);
        self.connection.execute_insert(query).await
    }
}

fn log_statement(kind: &str, query: &Query) {
    debug!("Executing {}: {} ({} parameters)", kind, query.command, query.parameters.len());
    trace!("Parameters of {}: {}", kind, query.parameters_json());
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("attached", &self.identity_map.len())
            .field("transaction_depth", &self.transactions.depth())
            .finish()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if self.transactions.is_active() {
            warn!(
                "Session {} dropped with an active transaction; it is left to the connection to roll back",
                self.id
            );
            self.discard_transactions();
        }
        self.detach_all();
    }
}
