//! SQLite table generator
//!
//! Creates, drops and probes the table of a registered entity from its
//! [`TableSchema`].

use tracing::info;

use kestrel_orm::{
    ColumnDefinition, Connection, DatabaseValue, EntityType, FieldType, MetadataResolver,
    OrmResult, Query, TableSchema,
};

#[derive(Debug, Clone)]
pub struct SqliteTable {
    schema: TableSchema,
}

impl SqliteTable {
    pub fn new(schema: TableSchema) -> Self {
        Self { schema }
    }

    /// Table of a registered entity type
    pub fn of<T: EntityType>(resolver: &MetadataResolver) -> OrmResult<Self> {
        let metadata = resolver.metadata_of::<T>()?;
        Ok(Self::new(resolver.table_schema(metadata.name())?))
    }

    /// Tables of every registered entity, in registration order
    pub fn all(resolver: &MetadataResolver) -> OrmResult<Vec<Self>> {
        resolver
            .entity_metadata()
            .map(|metadata| resolver.table_schema(metadata.name()).map(Self::new))
            .collect()
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn name(&self) -> &str {
        &self.schema.table
    }

    pub fn create_sql(&self) -> String {
        let columns: Vec<String> = self.schema.columns.iter().map(column_sql).collect();
        format!(
            "CREATE TABLE {} (\n    {}\n)",
            self.schema.table,
            columns.join(",\n    ")
        )
    }

    pub fn drop_sql(&self) -> String {
        format!("DROP TABLE IF EXISTS {}", self.schema.table)
    }

    pub async fn create(&self, connection: &mut dyn Connection) -> OrmResult<()> {
        connection.execute_non_query(&Query::new(self.create_sql())).await?;
        info!("Created table {}", self.schema.table);
        Ok(())
    }

    pub async fn drop(&self, connection: &mut dyn Connection) -> OrmResult<()> {
        connection.execute_non_query(&Query::new(self.drop_sql())).await?;
        info!("Dropped table {}", self.schema.table);
        Ok(())
    }

    pub async fn exists(&self, connection: &mut dyn Connection) -> OrmResult<bool> {
        let mut query = Query::new("");
        let name = query.bind(DatabaseValue::from(self.schema.table.as_str()), Some(FieldType::String));
        query.command = format!(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = {}",
            name
        );
        let count = connection.execute_scalar(&query).await?.into_typed::<i64>()?;
        Ok(count > 0)
    }

    /// Drop and create the table, discarding its rows
    pub async fn recreate(&self, connection: &mut dyn Connection) -> OrmResult<()> {
        self.drop(connection).await?;
        self.create(connection).await
    }
}

fn column_sql(column: &ColumnDefinition) -> String {
    if column.primary_key {
        return format!("{} INTEGER PRIMARY KEY AUTOINCREMENT", column.name);
    }

    let mut sql = format!("{} {}", column.name, sqlite_type(&column.field_type));
    // Foreign keys stay nullable: keys in a reference cycle are written after the insert
    if column.mandatory && column.references.is_none() {
        sql.push_str(" NOT NULL");
    }
    if column.unique {
        sql.push_str(" UNIQUE");
    }
    if let (FieldType::String, Some(max_length)) = (&column.field_type, column.max_length) {
        sql.push_str(&format!(" CHECK (length({}) <= {})", column.name, max_length));
    }
    if let Some(table) = &column.references {
        sql.push_str(&format!(" REFERENCES {}(Id)", table));
    }
    sql
}

fn sqlite_type(field_type: &FieldType) -> &'static str {
    match field_type {
        FieldType::Integer | FieldType::Boolean | FieldType::Entity(_) => "INTEGER",
        FieldType::Decimal => "REAL",
        FieldType::String | FieldType::Timestamp => "TEXT",
    }
}
