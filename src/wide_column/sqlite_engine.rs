//! SQLite-backed [`StorageEngine`].
//!
//! Each keyspace is an attached SQLite database (a file under the data
//! directory, or an in-memory database). Tables are `WITHOUT ROWID` tables
//! whose primary key is `(partition key, clustering key)`; a secondary index
//! carries the declared clustering order so partition scans come back sorted.
//! A batch runs inside one SQLite transaction.

use super::engine::{StorageEngine, StorageError};
use super::schema::{ColumnType, Keyspace, TableSchema, BASE_DB_VERSION};
use super::statement::{Batch, Delete, Mutation, Select, Statement, Upsert};
use super::value::{Row, Value};
use async_trait::async_trait;
use rusqlite::types::{ToSqlOutput, Value as SqlValue};
use rusqlite::{params, params_from_iter, Connection, DatabaseName, ToSql};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

const SYSTEM_DB_FILE: &str = "system.db";

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self.encode() {
            Some(s) => ToSqlOutput::Owned(SqlValue::Text(s)),
            None => ToSqlOutput::Owned(SqlValue::Null),
        })
    }
}

struct EngineState {
    conn: Option<Connection>,
    keyspace: Option<String>,
}

impl EngineState {
    fn connection(&mut self) -> Result<&mut Connection, StorageError> {
        self.conn.as_mut().ok_or(StorageError::Closed)
    }

    fn session(&mut self) -> Result<(&mut Connection, &str), StorageError> {
        let conn = self.conn.as_mut().ok_or(StorageError::Closed)?;
        let keyspace = self
            .keyspace
            .as_deref()
            .ok_or(StorageError::KeyspaceNotSelected)?;
        Ok((conn, keyspace))
    }
}

#[derive(Clone)]
pub struct SqliteEngine {
    state: Arc<Mutex<EngineState>>,
    data_dir: Option<PathBuf>,
}

impl SqliteEngine {
    /// Opens an engine whose keyspaces live as files inside `data_dir`.
    pub fn open<P: AsRef<Path>>(data_dir: P) -> Result<Self, StorageError> {
        let data_dir = data_dir.as_ref().to_path_buf();
        let conn = Connection::open_with_flags(
            data_dir.join(SYSTEM_DB_FILE),
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI
                | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        info!("Opened storage engine at {:?}", data_dir);
        Ok(Self::with_connection(conn, Some(data_dir)))
    }

    /// Opens an engine that keeps every keyspace in memory.
    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        Ok(Self::with_connection(conn, None))
    }

    fn with_connection(conn: Connection, data_dir: Option<PathBuf>) -> Self {
        SqliteEngine {
            state: Arc::new(Mutex::new(EngineState {
                conn: Some(conn),
                keyspace: None,
            })),
            data_dir,
        }
    }

    fn keyspace_location(&self, name: &str) -> String {
        match &self.data_dir {
            Some(dir) => dir.join(format!("{}.db", name)).to_string_lossy().to_string(),
            None => ":memory:".to_string(),
        }
    }

    /// Runs `f` on the blocking pool while holding the connection.
    async fn run<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&mut EngineState) -> Result<T, StorageError> + Send + 'static,
    {
        let state = self.state.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = state
                .lock()
                .map_err(|_| StorageError::Unavailable("engine lock poisoned".to_string()))?;
            f(&mut guard)
        })
        .await?
    }
}

fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

fn qualified(keyspace: &str, table: &TableSchema) -> String {
    format!("{}.{}", quote(keyspace), quote(table.name))
}

/// Expression a column is sorted by. Decimals are stored as text and have to
/// be compared numerically. The REAL cast keeps about 15 significant digits,
/// so decimals that differ only beyond that compare equal and fall through
/// to the next clustering column. `listening::models::MAX_DIGITS` bounds the
/// minutes that reach this layer.
fn order_expression(table: &TableSchema, column: &str) -> String {
    match table.column(column).map(|c| c.column_type) {
        Some(ColumnType::Decimal) => format!("CAST({} AS REAL)", quote(column)),
        _ => quote(column),
    }
}

fn is_attached(conn: &Connection, name: &str) -> Result<bool, StorageError> {
    let mut stmt = conn.prepare("PRAGMA database_list")?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(names.iter().any(|n| n == name))
}

fn table_exists(conn: &Connection, keyspace: &str, table: &TableSchema) -> Result<bool, StorageError> {
    let count: i64 = conn.query_row(
        &format!(
            "SELECT COUNT(*) FROM {}.sqlite_master WHERE type = 'table' AND name = ?1",
            quote(keyspace)
        ),
        params![table.name],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn existing_columns(
    conn: &Connection,
    keyspace: &str,
    table: &TableSchema,
) -> Result<Vec<(String, bool)>, StorageError> {
    let mut stmt = conn.prepare(&format!(
        "PRAGMA {}.table_info({})",
        quote(keyspace),
        quote(table.name)
    ))?;
    let columns = stmt
        .query_map([], |row| {
            Ok((row.get::<_, String>(1)?, row.get::<_, i64>(5)? > 0))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(columns)
}

fn create_table_sql(keyspace: &str, table: &TableSchema) -> String {
    let mut sql = format!("CREATE TABLE IF NOT EXISTS {} (", qualified(keyspace, table));
    for (index, column) in table.columns.iter().enumerate() {
        if index > 0 {
            sql.push_str(", ");
        }
        sql.push_str(&format!("{} TEXT", quote(column.name)));
        if table.is_key_column(column.name) {
            sql.push_str(" NOT NULL");
        }
    }
    sql.push_str(&format!(
        ", PRIMARY KEY ({})) WITHOUT ROWID;",
        table
            .primary_key()
            .iter()
            .map(|c| quote(c))
            .collect::<Vec<_>>()
            .join(", ")
    ));
    sql
}

fn clustering_index_sql(keyspace: &str, table: &TableSchema) -> Option<String> {
    if table.clustering.is_empty() {
        return None;
    }
    let columns = table
        .partition_key
        .iter()
        .map(|c| quote(c))
        .chain(table.clustering.iter().map(|c| {
            format!("{} {}", order_expression(table, c.name), c.order.as_sql())
        }))
        .collect::<Vec<_>>()
        .join(", ");
    Some(format!(
        "CREATE INDEX IF NOT EXISTS {}.{} ON {} ({});",
        quote(keyspace),
        quote(&table.clustering_index_name()),
        quote(table.name),
        columns
    ))
}

fn select_sql(keyspace: &str, select: &Select) -> String {
    let table = select.table;
    let mut sql = format!(
        "SELECT {} FROM {}",
        table
            .columns
            .iter()
            .map(|c| quote(c.name))
            .collect::<Vec<_>>()
            .join(", "),
        qualified(keyspace, table)
    );
    if !select.restrictions.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(
            &select
                .restrictions
                .iter()
                .enumerate()
                .map(|(i, (column, _))| format!("{} = ?{}", quote(column), i + 1))
                .collect::<Vec<_>>()
                .join(" AND "),
        );
    }
    let ordering = table
        .partition_key
        .iter()
        .map(|c| format!("{} ASC", quote(c)))
        .chain(table.clustering.iter().map(|c| {
            format!("{} {}", order_expression(table, c.name), c.order.as_sql())
        }))
        .collect::<Vec<_>>()
        .join(", ");
    sql.push_str(&format!(" ORDER BY {}", ordering));
    if let Some(limit) = select.limit {
        // SQLite reads LIMIT as a signed 64-bit integer.
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        sql.push_str(&format!(" LIMIT {}", limit));
    }
    sql
}

fn upsert_sql(keyspace: &str, upsert: &Upsert) -> String {
    let table = upsert.table;
    let columns: Vec<String> = upsert.values.iter().map(|(c, _)| quote(c)).collect();
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();
    let updates: Vec<String> = upsert
        .values
        .iter()
        .filter(|(c, _)| !table.is_key_column(c))
        .map(|(c, _)| format!("{} = excluded.{}", quote(c), quote(c)))
        .collect();
    let conflict_action = if updates.is_empty() {
        "DO NOTHING".to_string()
    } else {
        format!("DO UPDATE SET {}", updates.join(", "))
    };
    format!(
        "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT ({}) {}",
        qualified(keyspace, table),
        columns.join(", "),
        placeholders.join(", "),
        table
            .primary_key()
            .iter()
            .map(|c| quote(c))
            .collect::<Vec<_>>()
            .join(", "),
        conflict_action
    )
}

fn delete_sql(keyspace: &str, delete: &Delete) -> String {
    format!(
        "DELETE FROM {} WHERE {}",
        qualified(keyspace, delete.table),
        delete
            .key
            .iter()
            .enumerate()
            .map(|(i, (column, _))| format!("{} = ?{}", quote(column), i + 1))
            .collect::<Vec<_>>()
            .join(" AND ")
    )
}

fn run_select(conn: &Connection, keyspace: &str, select: &Select) -> Result<Vec<Row>, StorageError> {
    select.validate()?;
    let table = select.table;
    let sql = select_sql(keyspace, select);
    debug!("{}", sql);
    let mut stmt = conn.prepare_cached(&sql)?;
    let raw_rows = stmt
        .query_map(
            params_from_iter(select.restrictions.iter().map(|(_, v)| v)),
            |row| {
                table
                    .columns
                    .iter()
                    .enumerate()
                    .map(|(i, _)| row.get::<_, Option<String>>(i))
                    .collect::<Result<Vec<_>, _>>()
            },
        )?
        .collect::<Result<Vec<_>, _>>()?;

    raw_rows
        .into_iter()
        .map(|cells| {
            let mut row = Row::new();
            for (column, cell) in table.columns.iter().zip(cells) {
                let value = match cell {
                    Some(raw) => column.column_type.decode(column.name, &raw)?,
                    None => Value::Null,
                };
                row.insert(column.name, value);
            }
            Ok(row)
        })
        .collect()
}

fn apply_mutation(conn: &Connection, keyspace: &str, mutation: &Mutation) -> Result<(), StorageError> {
    mutation.validate()?;
    let (sql, values) = match mutation {
        Mutation::Upsert(upsert) => (upsert_sql(keyspace, upsert), &upsert.values),
        Mutation::Delete(delete) => (delete_sql(keyspace, delete), &delete.key),
    };
    debug!("{}", sql);
    let mut stmt = conn.prepare_cached(&sql)?;
    stmt.execute(params_from_iter(values.iter().map(|(_, v)| v)))?;
    Ok(())
}

#[async_trait]
impl StorageEngine for SqliteEngine {
    async fn create_keyspace(&self, keyspace: &'static Keyspace) -> Result<(), StorageError> {
        let location = self.keyspace_location(keyspace.name);
        let file_backed = self.data_dir.is_some();
        self.run(move |state| {
            let conn = state.connection()?;
            if !is_attached(conn, keyspace.name)? {
                conn.execute(
                    &format!("ATTACH DATABASE ?1 AS {}", quote(keyspace.name)),
                    params![location],
                )?;
                if file_backed {
                    conn.pragma_update(
                        Some(DatabaseName::Attached(keyspace.name)),
                        "journal_mode",
                        "WAL",
                    )?;
                }
            }

            let expected = BASE_DB_VERSION + keyspace.version;
            let found: i64 = conn.query_row(
                &format!("PRAGMA {}.user_version", quote(keyspace.name)),
                [],
                |row| row.get(0),
            )?;
            if found == 0 {
                conn.pragma_update(
                    Some(DatabaseName::Attached(keyspace.name)),
                    "user_version",
                    expected as i64,
                )?;
                info!(
                    "Created keyspace {} at version {}",
                    keyspace.name, keyspace.version
                );
            } else if found != expected as i64 {
                return Err(StorageError::KeyspaceVersion {
                    name: keyspace.name,
                    found: found - BASE_DB_VERSION as i64,
                    expected: keyspace.version,
                });
            }
            Ok(())
        })
        .await
    }

    async fn use_keyspace(&self, name: &str) -> Result<(), StorageError> {
        let name = name.to_string();
        self.run(move |state| {
            if !is_attached(state.connection()?, &name)? {
                return Err(StorageError::UnknownKeyspace(name));
            }
            state.keyspace = Some(name);
            Ok(())
        })
        .await
    }

    async fn create_table(&self, table: &'static TableSchema) -> Result<(), StorageError> {
        table.check_declaration()?;
        self.run(move |state| {
            let (conn, keyspace) = state.session()?;
            if table_exists(conn, keyspace, table)? {
                table.validate_existing(&existing_columns(conn, keyspace, table)?)?;
            } else {
                let sql = create_table_sql(keyspace, table);
                debug!("{}", sql);
                conn.execute(&sql, [])?;
            }
            if let Some(sql) = clustering_index_sql(keyspace, table) {
                conn.execute(&sql, [])?;
            }
            Ok(())
        })
        .await
    }

    async fn execute(&self, statement: Statement) -> Result<Vec<Row>, StorageError> {
        self.run(move |state| {
            let (conn, keyspace) = state.session()?;
            match &statement {
                Statement::Select(select) => run_select(conn, keyspace, select),
                Statement::Mutation(mutation) => {
                    apply_mutation(conn, keyspace, mutation)?;
                    Ok(Vec::new())
                }
            }
        })
        .await
    }

    async fn batch(&self, batch: Batch) -> Result<(), StorageError> {
        batch.validate()?;
        self.run(move |state| {
            let (conn, keyspace) = state.session()?;
            let keyspace = keyspace.to_string();
            debug!(
                "Applying batch of {} mutations over {} partitions",
                batch.len(),
                batch.partition_groups().len()
            );
            let tx = conn.transaction()?;
            for mutation in batch.mutations() {
                apply_mutation(&tx, &keyspace, mutation)?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn close(&self) -> Result<(), StorageError> {
        self.run(|state| {
            state.keyspace = None;
            if let Some(conn) = state.conn.take() {
                conn.close().map_err(|(_, e)| StorageError::Sqlite(e))?;
                info!("Storage engine closed");
            }
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wide_column::schema::{ClusteringColumn, ClusteringOrder, Column};
    use bigdecimal::BigDecimal;
    use std::str::FromStr;
    use tempfile::TempDir;

    const LEADERBOARD: TableSchema = TableSchema {
        name: "leaderboard",
        columns: &[
            Column {
                name: "board",
                column_type: ColumnType::Text,
            },
            Column {
                name: "score",
                column_type: ColumnType::Decimal,
            },
            Column {
                name: "player",
                column_type: ColumnType::Text,
            },
            Column {
                name: "note",
                column_type: ColumnType::Text,
            },
        ],
        partition_key: &["board"],
        clustering: &[
            ClusteringColumn {
                name: "score",
                order: ClusteringOrder::Desc,
            },
            ClusteringColumn {
                name: "player",
                order: ClusteringOrder::Asc,
            },
        ],
    };

    const TEST_KEYSPACE: Keyspace = Keyspace {
        name: "games",
        version: 0,
        tables: &[&LEADERBOARD],
    };

    fn decimal(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    fn score(board: &str, value: &str, player: &str) -> Upsert {
        Upsert::on(&LEADERBOARD)
            .set("board", board)
            .set("score", decimal(value))
            .set("player", player)
    }

    async fn provisioned_engine() -> SqliteEngine {
        let engine = SqliteEngine::open_in_memory().unwrap();
        engine.create_keyspace(&TEST_KEYSPACE).await.unwrap();
        engine.use_keyspace("games").await.unwrap();
        engine.create_table(&LEADERBOARD).await.unwrap();
        engine
    }

    #[tokio::test]
    async fn statements_fail_before_keyspace_selection() {
        let engine = SqliteEngine::open_in_memory().unwrap();
        let result = engine.execute(Select::on(&LEADERBOARD).into()).await;
        assert!(matches!(result, Err(StorageError::KeyspaceNotSelected)));

        let result = engine.use_keyspace("games").await;
        assert!(matches!(result, Err(StorageError::UnknownKeyspace(_))));
    }

    #[tokio::test]
    async fn provisioning_is_idempotent() {
        let engine = provisioned_engine().await;
        engine.execute(score("b", "1", "ana").into()).await.unwrap();

        engine.create_keyspace(&TEST_KEYSPACE).await.unwrap();
        engine.create_table(&LEADERBOARD).await.unwrap();

        let rows = engine.execute(Select::on(&LEADERBOARD).into()).await.unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn partition_scan_follows_numeric_clustering_order() {
        let engine = provisioned_engine().await;
        for (value, player) in [("9.5", "c"), ("10", "a"), ("2", "b"), ("10", "0")] {
            engine.execute(score("b", value, player).into()).await.unwrap();
        }
        engine.execute(score("other", "100", "z").into()).await.unwrap();

        let rows = engine
            .execute(Select::on(&LEADERBOARD).eq("board", "b").limit(3).into())
            .await
            .unwrap();
        let players: Vec<String> = rows.iter().map(|r| r.text("player").unwrap()).collect();
        assert_eq!(players, vec!["0", "a", "c"]);
        assert_eq!(rows[0].decimal("score").unwrap(), decimal("10"));
    }

    #[tokio::test]
    async fn limit_beyond_sqlite_integer_range_returns_whole_partition() {
        let engine = provisioned_engine().await;
        engine.execute(score("b", "1", "ana").into()).await.unwrap();
        engine.execute(score("b", "2", "bea").into()).await.unwrap();

        let rows = engine
            .execute(Select::on(&LEADERBOARD).eq("board", "b").limit(usize::MAX).into())
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn upsert_overwrites_only_named_columns() {
        let engine = provisioned_engine().await;
        engine
            .execute(score("b", "1", "ana").set("note", "first").into())
            .await
            .unwrap();
        engine.execute(score("b", "1.0", "ana").into()).await.unwrap();

        let rows = engine
            .execute(
                Select::on(&LEADERBOARD)
                    .eq("board", "b")
                    .eq("score", decimal("1"))
                    .into(),
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].text("note").unwrap(), "first");
    }

    #[tokio::test]
    async fn failed_batch_leaves_no_partial_state() {
        let engine = provisioned_engine().await;
        let mut batch = Batch::new();
        batch.push(score("b", "1", "ana"));
        batch.push(Upsert::on(&LEADERBOARD).set("board", "b"));

        assert!(engine.batch(batch).await.is_err());
        let rows = engine.execute(Select::on(&LEADERBOARD).into()).await.unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn batch_applies_delete_then_insert() {
        let engine = provisioned_engine().await;
        engine.execute(score("b", "1", "ana").into()).await.unwrap();

        let mut batch = Batch::new();
        batch.push(
            Delete::on(&LEADERBOARD)
                .key("board", "b")
                .key("score", decimal("1"))
                .key("player", "ana"),
        );
        batch.push(score("b", "4", "ana"));
        engine.batch(batch).await.unwrap();

        let rows = engine
            .execute(Select::on(&LEADERBOARD).eq("board", "b").into())
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].decimal("score").unwrap(), decimal("4"));
    }

    #[tokio::test]
    async fn detects_schema_drift_on_existing_table() {
        let engine = SqliteEngine::open_in_memory().unwrap();
        engine.create_keyspace(&TEST_KEYSPACE).await.unwrap();
        engine.use_keyspace("games").await.unwrap();
        engine
            .run(|state| {
                state.connection()?.execute(
                    "CREATE TABLE \"games\".\"leaderboard\" (board TEXT, player TEXT, PRIMARY KEY (board))",
                    [],
                )?;
                Ok(())
            })
            .await
            .unwrap();

        let result = engine.create_table(&LEADERBOARD).await;
        assert!(matches!(result, Err(StorageError::SchemaMismatch { .. })));
    }

    #[tokio::test]
    async fn keyspace_persists_across_reopen() {
        let temp_dir = TempDir::new().unwrap();
        {
            let engine = SqliteEngine::open(temp_dir.path()).unwrap();
            engine.create_keyspace(&TEST_KEYSPACE).await.unwrap();
            engine.use_keyspace("games").await.unwrap();
            engine.create_table(&LEADERBOARD).await.unwrap();
            engine.execute(score("b", "3", "ana").into()).await.unwrap();
            engine.close().await.unwrap();
            assert!(matches!(
                engine.execute(Select::on(&LEADERBOARD).into()).await,
                Err(StorageError::Closed)
            ));
        }

        let engine = SqliteEngine::open(temp_dir.path()).unwrap();
        engine.create_keyspace(&TEST_KEYSPACE).await.unwrap();
        engine.use_keyspace("games").await.unwrap();
        engine.create_table(&LEADERBOARD).await.unwrap();
        let rows = engine.execute(Select::on(&LEADERBOARD).into()).await.unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn rejects_keyspace_at_other_version() {
        const NEWER: Keyspace = Keyspace {
            name: "games",
            version: 1,
            tables: &[&LEADERBOARD],
        };
        let engine = SqliteEngine::open_in_memory().unwrap();
        engine.create_keyspace(&TEST_KEYSPACE).await.unwrap();
        let result = engine.create_keyspace(&NEWER).await;
        assert!(matches!(result, Err(StorageError::KeyspaceVersion { .. })));
    }
}
