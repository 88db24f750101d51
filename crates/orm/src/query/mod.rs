//! Query translation
//!
//! Predicates are translated into tokens against entity metadata, and tokens
//! are composed into one parameterized statement. The statement builder
//! produces the session's own load and write statements.

pub mod composer;
pub mod expression;
pub mod statements;
pub mod tokens;
pub mod translator;

pub use composer::SqlTokenComposer;
pub use expression::{Expression, Operator, Parameter, Predicate};
pub use statements::StatementBuilder;
pub use tokens::{LinkKind, SqlToken};
pub use translator::{Filter, QueryTranslator, SelectKind};
