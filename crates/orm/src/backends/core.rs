//! Core Database Backend Traits
//!
//! The engine talks to a database only through [`Connection`]. Statements are
//! handed over as a [`Query`]: command text with named `@pN` parameters and a
//! typed parameter list. Providers translate the names to whatever their
//! driver expects.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::{OrmError, OrmResult};
use crate::metadata::FieldType;
use crate::transactions::IsolationLevel;

pub use super::values::DatabaseValue;

/// Connection capability consumed by the session
#[async_trait]
pub trait Connection: Send + Sync {
    /// Open the physical connection
    async fn open(&mut self) -> OrmResult<()>;

    /// Close the physical connection
    async fn close(&mut self) -> OrmResult<()>;

    fn is_open(&self) -> bool;

    /// Begin a physical transaction
    async fn begin_transaction(&mut self, isolation_level: IsolationLevel) -> OrmResult<()>;

    /// Commit the physical transaction
    async fn commit(&mut self) -> OrmResult<()>;

    /// Roll back the physical transaction
    async fn rollback(&mut self) -> OrmResult<()>;

    /// Create a savepoint
    async fn save(&mut self, savepoint: &str) -> OrmResult<()>;

    /// Roll back to a savepoint
    async fn rollback_to(&mut self, savepoint: &str) -> OrmResult<()>;

    /// Release a savepoint. Backends without partial release may do nothing.
    async fn release(&mut self, savepoint: &str) -> OrmResult<()>;

    /// Execute a statement and return the affected row count
    async fn execute_non_query(&mut self, query: &Query) -> OrmResult<u64>;

    /// Execute a statement and return the first column of the first row
    async fn execute_scalar(&mut self, query: &Query) -> OrmResult<DatabaseValue>;

    /// Execute a statement and return all result rows
    async fn execute_reader(&mut self, query: &Query) -> OrmResult<Vec<Box<dyn DatabaseRow>>>;

    /// Execute an insert and return the generated primary key
    async fn execute_insert(&mut self, query: &Query) -> OrmResult<i64>;
}

/// Creates connections for new sessions
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn create_connection(&self) -> OrmResult<Box<dyn Connection>>;
}

/// Abstract database row trait
pub trait DatabaseRow: Send + Sync {
    /// Get a column value by name
    fn get_by_name(&self, name: &str) -> OrmResult<DatabaseValue>;

    /// Get column names
    fn column_names(&self) -> Vec<String>;

    /// Convert row to HashMap
    fn to_map(&self) -> OrmResult<HashMap<String, DatabaseValue>> {
        let mut map = HashMap::new();
        for name in self.column_names() {
            let value = self.get_by_name(&name)?;
            map.insert(name, value);
        }
        Ok(map)
    }
}

/// A materialized result row
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValueRow {
    columns: Vec<(String, DatabaseValue)>,
}

impl ValueRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: impl Into<String>, value: impl Into<DatabaseValue>) -> Self {
        self.push(column, value);
        self
    }

    pub fn push(&mut self, column: impl Into<String>, value: impl Into<DatabaseValue>) {
        self.columns.push((column.into(), value.into()));
    }
}

impl DatabaseRow for ValueRow {
    fn get_by_name(&self, name: &str) -> OrmResult<DatabaseValue> {
        self.columns
            .iter()
            .find(|(column, _)| column.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.clone())
            .ok_or_else(|| OrmError::query(format!("Column '{}' is not part of the result", name)))
    }

    fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|(name, _)| name.clone()).collect()
    }
}

/// One named statement parameter
#[derive(Debug, Clone, PartialEq)]
pub struct QueryParameter {
    /// Parameter name including the `@` marker
    pub name: String,
    /// Bound value, `Null` is passed explicitly
    pub value: DatabaseValue,
    /// Semantic type of the field the value belongs to, when known
    pub field_type: Option<FieldType>,
}

impl QueryParameter {
    pub fn new(name: impl Into<String>, value: DatabaseValue, field_type: Option<FieldType>) -> Self {
        Self {
            name: name.into(),
            value,
            field_type,
        }
    }
}

/// A parameterized statement ready for a connection
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub command: String,
    pub parameters: Vec<QueryParameter>,
    /// Entity the statement was generated for
    pub entity: Option<String>,
}

impl Query {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            parameters: Vec::new(),
            entity: None,
        }
    }

    pub fn for_entity(mut self, entity: impl Into<String>) -> Self {
        self.entity = Some(entity.into());
        self
    }

    /// Append a parameter named after its position (`@p0`, `@p1`, ...)
    pub fn bind(&mut self, value: DatabaseValue, field_type: Option<FieldType>) -> String {
        let name = format!("@p{}", self.parameters.len());
        self.parameters
            .push(QueryParameter::new(name.clone(), value, field_type));
        name
    }

    pub fn parameter(&self, name: &str) -> Option<&QueryParameter> {
        self.parameters.iter().find(|p| p.name == name)
    }

    pub fn values(&self) -> Vec<DatabaseValue> {
        self.parameters.iter().map(|p| p.value.clone()).collect()
    }

    /// Parameters as a JSON object keyed by name, for diagnostics
    pub fn parameters_json(&self) -> serde_json::Value {
        self.parameters
            .iter()
            .map(|p| (p.name.clone(), p.value.to_json()))
            .collect::<serde_json::Map<_, _>>()
            .into()
    }
}
