// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQLite local store.
//!
//! Each synced table is a real SQLite table with one column per defined
//! field, so compiled filters run natively:
//!
//! ```sql
//! CREATE TABLE IF NOT EXISTS [todo] ([id] TEXT PRIMARY KEY);
//! ALTER TABLE [todo] ADD COLUMN [text] TEXT;
//! ALTER TABLE [todo] ADD COLUMN [updatedAt] REAL;   -- DateTime: epoch seconds
//! ```
//!
//! Value mapping per [`ColumnType`]:
//!
//! | Column type | At rest            | Read back as          |
//! |-------------|--------------------|-----------------------|
//! | Text        | TEXT               | string                |
//! | Integer     | INTEGER            | number                |
//! | Real        | REAL               | number                |
//! | Boolean     | INTEGER 0/1        | bool                  |
//! | DateTime    | REAL epoch seconds | ISO-8601 string       |
//! | Json        | TEXT (serialized)  | parsed JSON           |
//!
//! ## Parameter binding
//!
//! Compiled statements name their parameters `@p1, @p2, …`. sqlx binds
//! SQLite parameters by number, so statements are rewritten to `?1, ?2, …`
//! before execution (see [`crate::query::CompiledStatement::numbered_sql`]).

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{Number, Value};
use sqlx::query::Query;
use sqlx::sqlite::{
    SqliteArguments, SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
    SqliteRow, SqliteSynchronous,
};
use sqlx::{Column, Row as _, Sqlite, TypeInfo, ValueRef};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use crate::config::SyncConfig;
use crate::metrics;
use crate::query::sql_compiler::quote_identifier;
use crate::query::temporal::{format_datetime, from_epoch_seconds, parse_datetime, to_epoch_seconds};
use crate::query::{QueryDescription, SqlCompiler, SqlParam};
use crate::resilience::retry::{retry, RetryConfig};
use super::traits::{row_id, ColumnType, LocalStore, QueryResult, Row, StorageError, TableDefinition};

/// SQLite caps host parameters per statement; stay well below it.
const DELETE_CHUNK: usize = 500;

type SqliteQuery<'q> = Query<'q, Sqlite, SqliteArguments<'q>>;

pub struct SqliteStore {
    pool: SqlitePool,
    tables: RwLock<HashMap<String, TableDefinition>>,
}

impl SqliteStore {
    /// Opens (creating if missing) the database at `url` with startup-mode retry.
    ///
    /// `sqlite::memory:` is supported; it is pinned to a single connection so
    /// the database lives as long as the store.
    pub async fn new(url: &str) -> Result<Self, StorageError> {
        Self::connect(url, 5, &RetryConfig::startup()).await
    }

    pub async fn from_config(config: &SyncConfig) -> Result<Self, StorageError> {
        let url = config.store_url.as_deref().unwrap_or("sqlite::memory:");
        Self::connect(url, config.max_connections, &config.connect_retry.to_retry_config()).await
    }

    async fn connect(url: &str, max_connections: u32, retry_config: &RetryConfig) -> Result<Self, StorageError> {
        let in_memory = url.contains(":memory:");
        let mut options = SqliteConnectOptions::from_str(url)
            .map_err(|e| StorageError::Backend(e.to_string()))?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));
        if !in_memory {
            options = options
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal);
        }

        let pool = retry("sqlite_connect", retry_config, || async {
            let builder = SqlitePoolOptions::new().acquire_timeout(Duration::from_secs(10));
            let builder = if in_memory {
                builder
                    .max_connections(1)
                    .min_connections(1)
                    .idle_timeout(None)
                    .max_lifetime(None)
            } else {
                builder
                    .max_connections(max_connections.max(1))
                    .idle_timeout(Duration::from_secs(300))
            };
            builder
                .connect_with(options.clone())
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))
        })
        .await?;

        info!(url, in_memory, "SQLite store opened");
        Ok(Self {
            pool,
            tables: RwLock::new(HashMap::new()),
        })
    }

    /// Get a clone of the connection pool.
    pub fn pool(&self) -> SqlitePool {
        self.pool.clone()
    }

    fn definition(&self, table: &str) -> Result<TableDefinition, StorageError> {
        self.tables
            .read()
            .get(table)
            .cloned()
            .ok_or_else(|| StorageError::UndefinedTable(table.to_string()))
    }

    async fn existing_columns(&self, table: &str) -> Result<Vec<String>, StorageError> {
        let sql = format!("PRAGMA table_info({})", quote_identifier(table)?);
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        rows.iter()
            .map(|r| r.try_get::<String, _>("name").map_err(backend))
            .collect()
    }
}

fn backend(e: sqlx::Error) -> StorageError {
    StorageError::Backend(e.to_string())
}

fn sql_type(column_type: ColumnType) -> &'static str {
    match column_type {
        ColumnType::Text | ColumnType::Json => "TEXT",
        ColumnType::Integer | ColumnType::Boolean => "INTEGER",
        ColumnType::Real | ColumnType::DateTime => "REAL",
    }
}

fn bind<'q>(query: SqliteQuery<'q>, param: Option<&SqlParam>) -> SqliteQuery<'q> {
    match param {
        None => query.bind(None::<String>),
        Some(SqlParam::Integer(i)) => query.bind(*i),
        Some(SqlParam::Real(f)) => query.bind(*f),
        Some(SqlParam::Text(s)) => query.bind(s.clone()),
    }
}

/// Compiled statements are not cached: a `SELECT *` prepared before an
/// `ALTER TABLE ADD COLUMN` keeps the old column count on pooled connections.
fn bind_all<'q>(sql: &'q str, params: &[SqlParam]) -> SqliteQuery<'q> {
    params
        .iter()
        .fold(sqlx::query(sql).persistent(false), |q, p| bind(q, Some(p)))
}

/// Converts a JSON value into its at-rest representation. `None` is NULL.
fn to_sql_value(table: &str, column: &str, column_type: ColumnType, value: &Value) -> Result<Option<SqlParam>, StorageError> {
    let invalid = || StorageError::InvalidRow {
        table: table.to_string(),
        reason: format!("value {value} does not fit column '{column}' ({column_type:?})"),
    };
    let param = match (column_type, value) {
        (_, Value::Null) => return Ok(None),
        (ColumnType::Text, Value::String(s)) => SqlParam::Text(s.clone()),
        (ColumnType::Text, other) => SqlParam::Text(other.to_string()),
        (ColumnType::Json, other) => SqlParam::Text(serde_json::to_string(other)?),
        (ColumnType::Integer, Value::Number(n)) => match n.as_i64() {
            Some(i) => SqlParam::Integer(i),
            None => SqlParam::Integer(n.as_f64().ok_or_else(invalid)? as i64),
        },
        (ColumnType::Integer | ColumnType::Boolean, Value::Bool(b)) => SqlParam::Integer(i64::from(*b)),
        (ColumnType::Integer, Value::String(s)) => SqlParam::Integer(s.trim().parse().map_err(|_| invalid())?),
        (ColumnType::Boolean, Value::Number(n)) => SqlParam::Integer(i64::from(n.as_f64().is_some_and(|f| f != 0.0))),
        (ColumnType::Real, Value::Number(n)) => SqlParam::Real(n.as_f64().ok_or_else(invalid)?),
        (ColumnType::Real, Value::String(s)) => SqlParam::Real(s.trim().parse().map_err(|_| invalid())?),
        (ColumnType::DateTime, Value::String(s)) => {
            SqlParam::Real(to_epoch_seconds(&parse_datetime(s).ok_or_else(invalid)?))
        }
        (ColumnType::DateTime, Value::Number(n)) => SqlParam::Real(n.as_f64().ok_or_else(invalid)?),
        _ => return Err(invalid()),
    };
    Ok(Some(param))
}

/// Reads column `index` of `row` back into JSON according to its declared type.
/// Columns without a declaration (aggregates, aliases) use SQLite's storage class.
fn from_sql_value(row: &SqliteRow, index: usize, column_type: Option<ColumnType>) -> Result<Value, StorageError> {
    let raw = row.try_get_raw(index).map_err(backend)?;
    if raw.is_null() {
        return Ok(Value::Null);
    }
    let storage_class = raw.type_info().name().to_string();
    let column_type = column_type.unwrap_or(match storage_class.as_str() {
        "INTEGER" => ColumnType::Integer,
        "REAL" => ColumnType::Real,
        _ => ColumnType::Text,
    });

    let value = match column_type {
        ColumnType::Text => Value::String(row.try_get_unchecked::<String, _>(index).map_err(backend)?),
        ColumnType::Integer => Value::from(row.try_get_unchecked::<i64, _>(index).map_err(backend)?),
        ColumnType::Real => {
            let f = row.try_get_unchecked::<f64, _>(index).map_err(backend)?;
            Number::from_f64(f).map_or(Value::Null, Value::Number)
        }
        ColumnType::Boolean => Value::Bool(row.try_get_unchecked::<i64, _>(index).map_err(backend)? != 0),
        ColumnType::DateTime => {
            let secs = row.try_get_unchecked::<f64, _>(index).map_err(backend)?;
            from_epoch_seconds(secs).map_or(Value::Null, |dt| Value::String(format_datetime(&dt)))
        }
        ColumnType::Json => {
            let text = row.try_get_unchecked::<String, _>(index).map_err(backend)?;
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        }
    };
    Ok(value)
}

fn decode_row(row: &SqliteRow, definition: &TableDefinition) -> Result<Row, StorageError> {
    let mut out = Row::new();
    for (index, column) in row.columns().iter().enumerate() {
        let name = column.name();
        out.insert(name.to_string(), from_sql_value(row, index, definition.column_type(name))?);
    }
    Ok(out)
}

#[async_trait]
impl LocalStore for SqliteStore {
    async fn define_table(&self, definition: TableDefinition) -> Result<(), StorageError> {
        let table = quote_identifier(&definition.name)?;
        let create = format!("CREATE TABLE IF NOT EXISTS {table} ([id] TEXT PRIMARY KEY)");

        retry("sqlite_define_table", &RetryConfig::startup(), || async {
            sqlx::query(&create).execute(&self.pool).await.map_err(backend)
        })
        .await?;

        let existing = self.existing_columns(&definition.name).await?;
        for (column, column_type) in &definition.columns {
            if existing.iter().any(|c| c == column) {
                continue;
            }
            let sql = format!(
                "ALTER TABLE {table} ADD COLUMN {} {}",
                quote_identifier(column)?,
                sql_type(*column_type)
            );
            sqlx::query(&sql).execute(&self.pool).await.map_err(backend)?;
            debug!(table = %definition.name, column = %column, "Added column");
        }

        let mut tables = self.tables.write();
        match tables.get_mut(&definition.name) {
            Some(known) => known.columns.extend(definition.columns),
            None => {
                tables.insert(definition.name.clone(), definition);
            }
        }
        Ok(())
    }

    async fn read(&self, query: &QueryDescription) -> Result<QueryResult, StorageError> {
        let start = Instant::now();
        let definition = self.definition(&query.table_name)?;
        let compiled = SqlCompiler::compile(query)?;

        let select_sql = compiled.select.numbered_sql();
        let rows = bind_all(&select_sql, &compiled.select.parameters)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        let rows = rows
            .iter()
            .map(|r| decode_row(r, &definition))
            .collect::<Result<Vec<_>, _>>()?;

        let total_count = match &compiled.count {
            Some(count) => {
                let count_sql = count.numbered_sql();
                let total: i64 = bind_all(&count_sql, &count.parameters)
                    .fetch_one(&self.pool)
                    .await
                    .map_err(backend)?
                    .try_get("count")
                    .map_err(backend)?;
                Some(total.max(0) as u64)
            }
            None => None,
        };

        metrics::record_store_latency("sqlite", "read", start.elapsed());
        Ok(QueryResult { rows, total_count })
    }

    async fn upsert(&self, table: &str, rows: &[Row], from_server: bool) -> Result<(), StorageError> {
        if rows.is_empty() {
            return Ok(());
        }
        let start = Instant::now();
        let definition = self.definition(table)?;
        let quoted_table = quote_identifier(table)?;

        // Build every statement before touching the database.
        let mut statements = Vec::with_capacity(rows.len());
        for row in rows {
            if row_id(row).is_none() {
                return Err(StorageError::InvalidRow {
                    table: table.to_string(),
                    reason: "missing string 'id'".into(),
                });
            }
            let mut columns = Vec::new();
            let mut params = Vec::new();
            for (column, value) in row {
                match definition.column_type(column) {
                    Some(column_type) => {
                        columns.push(quote_identifier(column)?);
                        params.push(to_sql_value(table, column, column_type, value)?);
                    }
                    None if from_server => continue,
                    None => {
                        return Err(StorageError::UndefinedColumn {
                            table: table.to_string(),
                            column: column.clone(),
                        })
                    }
                }
            }

            let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
            let updates: Vec<String> = columns
                .iter()
                .filter(|c| c.as_str() != "[id]")
                .map(|c| format!("{c} = excluded.{c}"))
                .collect();
            let conflict = if updates.is_empty() {
                "DO NOTHING".to_string()
            } else {
                format!("DO UPDATE SET {}", updates.join(", "))
            };
            let sql = format!(
                "INSERT INTO {quoted_table} ({}) VALUES ({}) ON CONFLICT([id]) {conflict}",
                columns.join(", "),
                placeholders.join(", ")
            );
            statements.push((sql, params));
        }

        let mut tx = self.pool.begin().await.map_err(backend)?;
        for (sql, params) in &statements {
            params
                .iter()
                .fold(sqlx::query(sql), |q, p| bind(q, p.as_ref()))
                .execute(&mut *tx)
                .await
                .map_err(backend)?;
        }
        tx.commit().await.map_err(backend)?;

        metrics::record_store_latency("sqlite", "upsert", start.elapsed());
        Ok(())
    }

    async fn delete(&self, query: &QueryDescription) -> Result<u64, StorageError> {
        self.definition(&query.table_name)?;
        let compiled = SqlCompiler::compile_delete(query)?;
        let sql = compiled.numbered_sql();
        let result = bind_all(&sql, &compiled.parameters)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(result.rows_affected())
    }

    async fn delete_ids(&self, table: &str, ids: &[String]) -> Result<u64, StorageError> {
        self.definition(table)?;
        let quoted_table = quote_identifier(table)?;
        let mut tx = self.pool.begin().await.map_err(backend)?;
        let mut deleted = 0;
        for chunk in ids.chunks(DELETE_CHUNK) {
            let placeholders: Vec<String> = (1..=chunk.len()).map(|i| format!("?{i}")).collect();
            let sql = format!("DELETE FROM {quoted_table} WHERE [id] IN ({})", placeholders.join(", "));
            let result = chunk
                .iter()
                .fold(sqlx::query(&sql), |q, id| q.bind(id.clone()))
                .execute(&mut *tx)
                .await
                .map_err(backend)?;
            deleted += result.rows_affected();
        }
        tx.commit().await.map_err(backend)?;
        Ok(deleted)
    }

    async fn lookup(&self, table: &str, id: &str) -> Result<Option<Row>, StorageError> {
        let definition = self.definition(table)?;
        let sql = format!("SELECT * FROM {} WHERE [id] = ?1", quote_identifier(table)?);
        let row = sqlx::query(&sql)
            .persistent(false)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.map(|r| decode_row(&r, &definition)).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::CompiledStatement;
    use serde_json::json;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    fn todo_table() -> TableDefinition {
        TableDefinition::new("todo")
            .column("text", ColumnType::Text)
            .column("priority", ColumnType::Integer)
            .column("weight", ColumnType::Real)
            .column("done", ColumnType::Boolean)
            .column("due", ColumnType::DateTime)
            .column("tags", ColumnType::Json)
    }

    async fn store() -> SqliteStore {
        let store = SqliteStore::new("sqlite::memory:").await.unwrap();
        store.define_table(todo_table()).await.unwrap();
        store
    }

    #[test]
    fn test_numbered_sql() {
        let statement = CompiledStatement {
            sql: "SELECT * FROM [t] WHERE ([a] = @p1) AND ([b] = @p10)".into(),
            parameters: (0..10).map(SqlParam::Integer).collect(),
        };
        assert_eq!(
            statement.numbered_sql(),
            "SELECT * FROM [t] WHERE ([a] = ?1) AND ([b] = ?10)"
        );
    }

    #[test]
    fn test_value_conversion() {
        assert_eq!(
            to_sql_value("t", "c", ColumnType::Boolean, &json!(true)).unwrap(),
            Some(SqlParam::Integer(1))
        );
        assert_eq!(
            to_sql_value("t", "c", ColumnType::DateTime, &json!("2014-07-09T00:00:00.000Z")).unwrap(),
            Some(SqlParam::Real(1_404_864_000.0))
        );
        assert_eq!(to_sql_value("t", "c", ColumnType::Text, &Value::Null).unwrap(), None);
        assert!(to_sql_value("t", "c", ColumnType::Integer, &json!("abc")).is_err());
    }

    #[tokio::test]
    async fn test_round_trip_typed_columns() {
        let store = store().await;
        let item = row(json!({
            "id": "1",
            "text": "buy milk",
            "priority": 2,
            "weight": 1.5,
            "done": false,
            "due": "2014-07-09T00:00:00.000Z",
            "tags": ["home", "errand"]
        }));
        store.upsert("todo", &[item.clone()], false).await.unwrap();

        let loaded = store.lookup("todo", "1").await.unwrap().unwrap();
        assert_eq!(loaded, item);
    }

    #[tokio::test]
    async fn test_upsert_merges_and_rejects_unknown_columns() {
        let store = store().await;
        store
            .upsert("todo", &[row(json!({"id": "1", "text": "a", "priority": 1}))], false)
            .await
            .unwrap();
        store
            .upsert("todo", &[row(json!({"id": "1", "priority": 5}))], false)
            .await
            .unwrap();
        let loaded = store.lookup("todo", "1").await.unwrap().unwrap();
        assert_eq!(loaded["text"], "a");
        assert_eq!(loaded["priority"], 5);

        let err = store
            .upsert("todo", &[row(json!({"id": "2", "colour": "red"}))], false)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::UndefinedColumn { .. }));

        store
            .upsert("todo", &[row(json!({"id": "2", "colour": "red"}))], true)
            .await
            .unwrap();
        assert!(store.lookup("todo", "2").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_read_with_compiled_filter() {
        let store = store().await;
        let rows: Vec<Row> = (0..10)
            .map(|i| row(json!({"id": format!("{i}"), "text": format!("item {i}"), "priority": i, "weight": i as f64 + 0.5})))
            .collect();
        store.upsert("todo", &rows, false).await.unwrap();

        let query = QueryDescription::parse(
            "todo",
            "$filter=priority ge 3 and floor(weight) lt 8&$orderby=priority desc&$top=2&$skip=1&$inlinecount=allpages&$select=id,priority",
        )
        .unwrap();
        let result = store.read(&query).await.unwrap();
        assert_eq!(result.total_count, Some(5));
        assert_eq!(result.rows, vec![
            row(json!({"id": "6", "priority": 6})),
            row(json!({"id": "5", "priority": 5})),
        ]);
    }

    #[tokio::test]
    async fn test_date_functions_run_natively() {
        let store = store().await;
        store
            .upsert("todo", &[
                row(json!({"id": "a", "due": "2012-05-29T09:13:28Z"})),
                row(json!({"id": "b", "due": "2013-01-02T00:00:00Z"})),
            ], false)
            .await
            .unwrap();
        let query = QueryDescription::parse("todo", "$filter=year(due) eq 2012 and day(due) eq 29").unwrap();
        let result = store.read(&query).await.unwrap();
        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.rows[0]["id"], "a");

        let query = QueryDescription::parse("todo", "$filter=due gt datetime'2012-12-31T00:00:00'").unwrap();
        assert_eq!(store.read(&query).await.unwrap().rows[0]["id"], "b");
    }

    #[tokio::test]
    async fn test_delete_query_and_ids() {
        let store = store().await;
        let rows: Vec<Row> = (0..5)
            .map(|i| row(json!({"id": format!("{i}"), "priority": i})))
            .collect();
        store.upsert("todo", &rows, false).await.unwrap();

        let query = QueryDescription::parse("todo", "$filter=priority lt 2").unwrap();
        assert_eq!(store.delete(&query).await.unwrap(), 2);
        assert_eq!(store.delete_ids("todo", &["3".into(), "404".into()]).await.unwrap(), 1);

        let remaining = store.read(&QueryDescription::new("todo").order_by("id")).await.unwrap();
        let ids: Vec<&str> = remaining.rows.iter().filter_map(row_id).collect();
        assert_eq!(ids, vec!["2", "4"]);
    }

    #[tokio::test]
    async fn test_define_table_adds_columns() {
        let store = store().await;
        store
            .define_table(TableDefinition::new("todo").column("colour", ColumnType::Text))
            .await
            .unwrap();
        store
            .upsert("todo", &[row(json!({"id": "1", "colour": "red", "text": "x"}))], false)
            .await
            .unwrap();
        let loaded = store.lookup("todo", "1").await.unwrap().unwrap();
        assert_eq!(loaded["colour"], "red");
    }

    #[tokio::test]
    async fn test_read_after_widening_file_database() {
        let dir = tempfile::TempDir::new().unwrap();
        let url = format!("sqlite://{}", dir.path().join("widen.db").display());
        let store = SqliteStore::new(&url).await.unwrap();
        store
            .define_table(TableDefinition::new("todo").column("text", ColumnType::Text))
            .await
            .unwrap();
        store
            .upsert("todo", &[row(json!({"id": "1", "text": "a"}))], false)
            .await
            .unwrap();
        let query = QueryDescription::new("todo").order_by("id");
        for _ in 0..4 {
            assert_eq!(store.read(&query).await.unwrap().rows.len(), 1);
        }

        store
            .define_table(TableDefinition::new("todo").column("colour", ColumnType::Text))
            .await
            .unwrap();
        store
            .upsert("todo", &[row(json!({"id": "2", "text": "b", "colour": "red"}))], false)
            .await
            .unwrap();
        for _ in 0..4 {
            let rows = store.read(&query).await.unwrap().rows;
            assert_eq!(rows.len(), 2);
            assert_eq!(rows[1]["colour"], "red");
            assert_eq!(rows[0]["colour"], Value::Null);
        }
        store.pool().close().await;
    }

    #[tokio::test]
    async fn test_undefined_table() {
        let store = store().await;
        assert!(matches!(
            store.lookup("missing", "1").await,
            Err(StorageError::UndefinedTable(_))
        ));
    }
}
