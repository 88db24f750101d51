//! Transaction Management
//!
//! Isolation levels requested from the connection provider and the savepoint
//! naming used for nested transaction scopes.

pub mod isolation;
pub mod savepoints;

pub use isolation::IsolationLevel;
pub use savepoints::SavepointManager;
