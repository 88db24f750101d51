//! # kestrel-orm: persistence engine
//!
//! Maps domain objects to relational tables through declarative metadata,
//! tracks their changes and writes them back in dependency order inside a
//! session (unit of work).
//!
//! The engine talks to a database only through the [`Connection`] trait;
//! drivers live in their own crates.
//!
//! ```ignore
//! let resolver = Arc::new(
//!     MetadataResolver::builder()
//!         .register::<Person>()
//!         .register::<Address>()
//!         .build()?,
//! );
//! let mut session = Session::new(connection, resolver, SessionConfig::default());
//!
//! let person = EntityRef::new(Person::named("Max", 30));
//! session.save_or_update(&person)?;
//! session.commit().await?;
//!
//! let adults = session
//!     .query(&Predicate::<Person>::new(|x| x.field("Age").ge(18)))
//!     .await?;
//! ```

pub mod backends;
pub mod config;
pub mod entity;
pub mod error;
pub mod metadata;
pub mod query;
pub mod session;
pub mod transactions;

#[cfg(test)]
mod test_support;

pub use backends::{
    Connection, ConnectionFactory, DatabaseRow, DatabaseValue, FromDatabaseValue, Query,
    QueryParameter, ValueRow,
};
pub use config::{ConfigError, DeleteMode, SessionConfig};
pub use entity::{
    downcast_all, erase_all, unknown_field, AnyEntity, ChangeTracker, Entity, EntityBase,
    EntityRef, EntityType,
};
pub use error::{OrmError, OrmResult};
pub use metadata::{
    Cascade, ColumnDefinition, EntityMetadata, FieldMetadata, FieldType, MetadataResolver,
    TableSchema,
};
pub use query::{Expression, Operator, Parameter, Predicate};
pub use session::{
    ChangeKind, CommitListener, CommitSummary, EntityChange, EntityKey, EntityListener,
    ListenerRegistry, Session, SessionFactory, SessionState, TransactionScope,
};
pub use transactions::IsolationLevel;
