//! SQLite connection provider
//!
//! Implements the engine's [`Connection`] over a single sqlx SQLite
//! connection. Named `@pN` parameters are rewritten to SQLite's numbered
//! `?N` form and bound in declaration order.

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use once_cell::sync::OnceCell;
use regex::{Captures, Regex};
use sqlx::sqlite::{Sqlite, SqliteArguments, SqliteConnectOptions, SqliteRow};
use sqlx::{Column, ConnectOptions, Connection as _, Row, TypeInfo, ValueRef};
use tokio::sync::Mutex;
use tracing::debug;

use kestrel_orm::{
    Connection, ConnectionFactory, DatabaseRow, DatabaseValue, IsolationLevel, OrmError,
    OrmResult, Query, ValueRow,
};

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

/// Connection to one SQLite database file
pub struct SqliteConnection {
    options: SqliteConnectOptions,
    // The mutex only makes the handle `Sync`; every access goes through `get_mut`
    conn: Option<Mutex<sqlx::SqliteConnection>>,
}

impl SqliteConnection {
    pub fn new(options: SqliteConnectOptions) -> Self {
        Self {
            options,
            conn: None,
        }
    }

    /// Connection to a database URL such as `sqlite://people.db`
    pub fn from_url(url: &str) -> OrmResult<Self> {
        Ok(Self::new(parse_url(url)?))
    }

    /// Connection to a database file, created when missing
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        Self::new(file_options(path.as_ref()))
    }

    fn handle(&mut self) -> OrmResult<&mut sqlx::SqliteConnection> {
        self.conn
            .as_mut()
            .map(Mutex::get_mut)
            .ok_or_else(|| OrmError::connection("SQLite connection is not open"))
    }

    async fn run(&mut self, sql: &str) -> OrmResult<()> {
        debug!("Executing: {}", sql);
        let conn = self.handle()?;
        sqlx::query(sql)
            .execute(&mut *conn)
            .await
            .map_err(|e| OrmError::connection(format!("{} failed: {}", sql, e)))?;
        Ok(())
    }
}

impl std::fmt::Debug for SqliteConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteConnection")
            .field("filename", &self.options.clone().get_filename())
            .field("open", &self.conn.is_some())
            .finish()
    }
}

#[async_trait]
impl Connection for SqliteConnection {
    async fn open(&mut self) -> OrmResult<()> {
        if self.conn.is_some() {
            return Ok(());
        }
        let conn = self
            .options
            .connect()
            .await
            .map_err(|e| OrmError::connection(format!("Failed to open SQLite database: {}", e)))?;
        debug!("Opened SQLite database {:?}", self.options.clone().get_filename());
        self.conn = Some(Mutex::new(conn));
        Ok(())
    }

    async fn close(&mut self) -> OrmResult<()> {
        if let Some(conn) = self.conn.take() {
            conn.into_inner()
                .close()
                .await
                .map_err(|e| OrmError::connection(format!("Failed to close SQLite database: {}", e)))?;
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.conn.is_some()
    }

    async fn begin_transaction(&mut self, isolation_level: IsolationLevel) -> OrmResult<()> {
        // SQLite is always serializable; take the write lock up front when asked to
        let sql = match isolation_level {
            IsolationLevel::Serializable => "BEGIN IMMEDIATE",
            _ => "BEGIN DEFERRED",
        };
        self.run(sql).await
    }

    async fn commit(&mut self) -> OrmResult<()> {
        self.run("COMMIT").await
    }

    async fn rollback(&mut self) -> OrmResult<()> {
        self.run("ROLLBACK").await
    }

    async fn save(&mut self, savepoint: &str) -> OrmResult<()> {
        self.run(&format!("SAVEPOINT {}", savepoint)).await
    }

    async fn rollback_to(&mut self, savepoint: &str) -> OrmResult<()> {
        self.run(&format!("ROLLBACK TO SAVEPOINT {}", savepoint)).await
    }

    async fn release(&mut self, savepoint: &str) -> OrmResult<()> {
        self.run(&format!("RELEASE SAVEPOINT {}", savepoint)).await
    }

    async fn execute_non_query(&mut self, query: &Query) -> OrmResult<u64> {
        let sql = to_sqlite(query)?;
        let conn = self.handle()?;
        let result = bind_all(sqlx::query(&sql), query)
            .execute(&mut *conn)
            .await
            .map_err(|e| OrmError::connection(format!("Query execution failed: {}", e)))?;
        Ok(result.rows_affected())
    }

    async fn execute_scalar(&mut self, query: &Query) -> OrmResult<DatabaseValue> {
        let sql = to_sqlite(query)?;
        let conn = self.handle()?;
        let row = bind_all(sqlx::query(&sql), query)
            .fetch_optional(&mut *conn)
            .await
            .map_err(|e| OrmError::connection(format!("Query fetch failed: {}", e)))?;
        match row {
            Some(row) if !row.is_empty() => sqlite_value(&row, 0),
            _ => Ok(DatabaseValue::Null),
        }
    }

    async fn execute_reader(&mut self, query: &Query) -> OrmResult<Vec<Box<dyn DatabaseRow>>> {
        let sql = to_sqlite(query)?;
        let conn = self.handle()?;
        let rows = bind_all(sqlx::query(&sql), query)
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| OrmError::connection(format!("Query fetch failed: {}", e)))?;

        rows.iter()
            .map(|row| to_value_row(row).map(|r| Box::new(r) as Box<dyn DatabaseRow>))
            .collect()
    }

    async fn execute_insert(&mut self, query: &Query) -> OrmResult<i64> {
        let sql = to_sqlite(query)?;
        let conn = self.handle()?;
        let result = bind_all(sqlx::query(&sql), query)
            .execute(&mut *conn)
            .await
            .map_err(|e| OrmError::connection(format!("Insert failed: {}", e)))?;
        Ok(result.last_insert_rowid())
    }
}

/// Hands out one new connection per session
#[derive(Debug, Clone)]
pub struct SqliteConnectionFactory {
    options: SqliteConnectOptions,
}

impl SqliteConnectionFactory {
    pub fn new(options: SqliteConnectOptions) -> Self {
        Self { options }
    }

    pub fn from_url(url: &str) -> OrmResult<Self> {
        Ok(Self::new(parse_url(url)?))
    }

    pub fn from_path(path: impl AsRef<Path>) -> Self {
        Self::new(file_options(path.as_ref()))
    }
}

#[async_trait]
impl ConnectionFactory for SqliteConnectionFactory {
    async fn create_connection(&self) -> OrmResult<Box<dyn Connection>> {
        Ok(Box::new(SqliteConnection::new(self.options.clone())))
    }
}

fn parse_url(url: &str) -> OrmResult<SqliteConnectOptions> {
    SqliteConnectOptions::from_str(url)
        .map(|options| options.create_if_missing(true))
        .map_err(|e| OrmError::connection(format!("Invalid SQLite URL '{}': {}", url, e)))
}

fn file_options(path: &Path) -> SqliteConnectOptions {
    SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .foreign_keys(true)
}

fn parameter_pattern() -> OrmResult<&'static Regex> {
    static PATTERN: OnceCell<Regex> = OnceCell::new();
    PATTERN.get_or_try_init(|| {
        Regex::new(r"@p\d+").map_err(|e| OrmError::query(format!("Invalid parameter pattern: {}", e)))
    })
}

/// Rewrite `@pN` names to the 1-based position of their parameter
pub(crate) fn to_sqlite(query: &Query) -> OrmResult<String> {
    let pattern = parameter_pattern()?;
    let sql = pattern.replace_all(&query.command, |caps: &Captures| {
        match query.parameters.iter().position(|p| p.name == caps[0]) {
            Some(index) => format!("?{}", index + 1),
            None => caps[0].to_string(),
        }
    });
    Ok(sql.into_owned())
}

fn bind_all<'q>(mut statement: SqliteQuery<'q>, query: &Query) -> SqliteQuery<'q> {
    for parameter in &query.parameters {
        statement = bind_value(statement, &parameter.value);
    }
    statement
}

fn bind_value<'q>(statement: SqliteQuery<'q>, value: &DatabaseValue) -> SqliteQuery<'q> {
    match value {
        DatabaseValue::Null => statement.bind(None::<i64>),
        DatabaseValue::Bool(b) => statement.bind(*b),
        DatabaseValue::Int32(i) => statement.bind(*i),
        DatabaseValue::Int64(i) => statement.bind(*i),
        DatabaseValue::Float64(f) => statement.bind(*f),
        DatabaseValue::String(s) => statement.bind(s.clone()),
        DatabaseValue::DateTime(dt) => statement.bind(dt.to_rfc3339()),
    }
}

fn to_value_row(row: &SqliteRow) -> OrmResult<ValueRow> {
    let mut values = ValueRow::new();
    for (index, column) in row.columns().iter().enumerate() {
        values.push(column.name(), sqlite_value(row, index)?);
    }
    Ok(values)
}

/// Convert a column by the storage class of the value it holds
fn sqlite_value(row: &SqliteRow, index: usize) -> OrmResult<DatabaseValue> {
    let raw = row
        .try_get_raw(index)
        .map_err(|e| OrmError::conversion(format!("Failed to read column {}: {}", index, e)))?;
    if raw.is_null() {
        return Ok(DatabaseValue::Null);
    }
    let type_name = raw.type_info().name().to_string();

    let failed = |e: sqlx::Error| {
        OrmError::conversion(format!(
            "Failed to read {} value from column {}: {}",
            type_name, index, e
        ))
    };
    match type_name.as_str() {
        "INTEGER" | "BOOLEAN" => row.try_get::<i64, _>(index).map(DatabaseValue::Int64).map_err(failed),
        "REAL" | "NUMERIC" => row.try_get::<f64, _>(index).map(DatabaseValue::Float64).map_err(failed),
        "BLOB" => Err(OrmError::conversion(format!(
            "Column {} holds a BLOB, which no field type maps to",
            index
        ))),
        _ => row.try_get::<String, _>(index).map(DatabaseValue::String).map_err(failed),
    }
}
