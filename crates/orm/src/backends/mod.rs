//! Database Backend Abstractions
//!
//! The connection capability the engine consumes. Concrete drivers live in
//! their own crates and implement [`Connection`] and [`ConnectionFactory`].

pub mod core;
pub mod values;

pub use self::core::*;
pub use values::{DatabaseValue, FromDatabaseValue};
