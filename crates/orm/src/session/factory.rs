//! Session factory
//!
//! Holds everything sessions share: the connection factory, the metadata
//! resolver, configuration and registered listeners. Each session gets its
//! own connection.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use super::listeners::{CommitListener, EntityListener, ListenerRegistry};
use super::Session;
use crate::backends::ConnectionFactory;
use crate::config::SessionConfig;
use crate::error::OrmResult;
use crate::metadata::MetadataResolver;

pub struct SessionFactory {
    connections: Arc<dyn ConnectionFactory>,
    resolver: Arc<MetadataResolver>,
    config: SessionConfig,
    commit_listeners: Vec<Arc<dyn CommitListener>>,
    entity_listeners: Arc<ListenerRegistry>,
}

impl SessionFactory {
    pub fn new(connections: Arc<dyn ConnectionFactory>, resolver: Arc<MetadataResolver>) -> Self {
        Self {
            connections,
            resolver,
            config: SessionConfig::default(),
            commit_listeners: Vec::new(),
            entity_listeners: Arc::new(ListenerRegistry::default()),
        }
    }

    /// Use `config` for every session opened from now on
    pub fn with_config(mut self, config: SessionConfig) -> OrmResult<Self> {
        config.validate()?;
        self.config = config;
        Ok(self)
    }

    pub fn add_commit_listener(&mut self, listener: Arc<dyn CommitListener>) {
        self.commit_listeners.push(listener);
    }

    /// Register an entity listener for one entity name
    pub fn add_entity_listener(&mut self, entity: impl Into<String>, listener: Arc<dyn EntityListener>) {
        Arc::make_mut(&mut self.entity_listeners).register(entity, listener);
    }

    pub fn add_global_entity_listener(&mut self, listener: Arc<dyn EntityListener>) {
        Arc::make_mut(&mut self.entity_listeners).register_global(listener);
    }

    pub fn resolver(&self) -> &Arc<MetadataResolver> {
        &self.resolver
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Open a session on a fresh connection
    pub async fn open_session(&self) -> OrmResult<Session> {
        let mut connection = self.connections.create_connection().await?;
        connection.open().await?;

        let mut session = Session::new(connection, self.resolver.clone(), self.config.clone())
            .with_entity_listeners(self.entity_listeners.clone());
        for listener in &self.commit_listeners {
            session.add_commit_listener(listener.clone());
        }
        debug!("Opened session {}", session.id());
        Ok(session)
    }
}

impl fmt::Debug for SessionFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionFactory")
            .field("entities", &self.resolver.len())
            .field("config", &self.config)
            .field("commit_listeners", &self.commit_listeners.len())
            .field("entity_listeners", &self.entity_listeners)
            .finish()
    }
}
