//! Transaction Savepoints
//!
//! Nested transaction scopes are modeled as named savepoints inside the one
//! physical transaction a session owns.

use tracing::debug;

use crate::backends::Connection;
use crate::error::{OrmError, OrmResult};

/// Savepoint manager for handling nested transactions
#[derive(Debug)]
pub struct SavepointManager {
    prefix: String,
    savepoint_count: u32,
}

impl SavepointManager {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            savepoint_count: 0,
        }
    }

    /// Create a new savepoint
    pub async fn create_savepoint(&mut self, connection: &mut dyn Connection) -> OrmResult<String> {
        self.savepoint_count += 1;
        let savepoint_name = format!("{}{}", self.prefix, self.savepoint_count);

        connection.save(&savepoint_name).await.map_err(|e| {
            OrmError::connection(format!("Failed to create savepoint {}: {}", savepoint_name, e))
        })?;
        debug!("Created savepoint {}", savepoint_name);

        Ok(savepoint_name)
    }

    /// Release a savepoint
    pub async fn release_savepoint(
        &mut self,
        connection: &mut dyn Connection,
        savepoint_name: &str,
    ) -> OrmResult<()> {
        connection.release(savepoint_name).await.map_err(|e| {
            OrmError::connection(format!("Failed to release savepoint {}: {}", savepoint_name, e))
        })
    }

    /// Rollback to a savepoint
    pub async fn rollback_to_savepoint(
        &mut self,
        connection: &mut dyn Connection,
        savepoint_name: &str,
    ) -> OrmResult<()> {
        connection.rollback_to(savepoint_name).await.map_err(|e| {
            OrmError::connection(format!(
                "Failed to rollback to savepoint {}: {}",
                savepoint_name, e
            ))
        })?;
        debug!("Rolled back to savepoint {}", savepoint_name);
        Ok(())
    }

    /// Get the current savepoint count
    pub fn savepoint_count(&self) -> u32 {
        self.savepoint_count
    }

    /// Start numbering again once the physical transaction has ended
    pub fn reset(&mut self) {
        self.savepoint_count = 0;
    }
}

impl Default for SavepointManager {
    fn default() -> Self {
        Self::new("sp_")
    }
}
