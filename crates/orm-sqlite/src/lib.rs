//! # kestrel-sqlite
//!
//! SQLite provider for `kestrel-orm`: a [`Connection`](kestrel_orm::Connection)
//! over sqlx, a connection factory for
//! [`SessionFactory`](kestrel_orm::SessionFactory) and a table generator
//! driven by entity metadata.
//!
//! ```ignore
//! let factory = SessionFactory::new(
//!     Arc::new(SqliteConnectionFactory::from_path("people.db")),
//!     resolver.clone(),
//! );
//! let mut session = factory.open_session().await?;
//! ```

pub mod connection;
pub mod table;

pub use connection::{SqliteConnection, SqliteConnectionFactory};
pub use table::SqliteTable;
