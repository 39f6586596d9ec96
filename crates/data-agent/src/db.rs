//! Read access to the database the agent analyzes.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use data_agent_core::tool::Table;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use serde_json::{Number, Value};
use tokio::task::spawn_blocking;

/// How many rows a query returns by default. The rest are counted but not
/// read.
pub const DEFAULT_MAX_ROWS: usize = 200;

/// Error type for [`Database`] operations.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    /// The database file could not be opened.
    #[error("cannot open database `{}`: {source}", path.display())]
    Open {
        /// Path of the database file.
        path: PathBuf,
        /// Underlying SQLite error.
        source: rusqlite::Error,
    },
    /// SQLite rejected or failed the statement.
    #[error("{0}")]
    Sqlite(#[from] rusqlite::Error),
    /// The blocking worker running the statement panicked or was cancelled.
    #[error("query worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

/// A relational database the agent can query.
#[async_trait]
pub trait Database: Send + Sync + 'static {
    /// Runs a SQL statement and returns its rows.
    async fn query(&self, sql: &str) -> Result<Table, DatabaseError>;

    /// Returns the DDL of the tables the agent may query, one statement per
    /// table. It is embedded in the system prompt.
    async fn table_info(&self) -> Result<String, DatabaseError>;
}

/// A SQLite database file.
///
/// Every statement runs on a fresh connection in the blocking pool, so
/// concurrent tool calls never share a connection. Connections are read-only
/// unless [`SqliteDatabase::writable`] is used.
///
/// Results are capped at [`DEFAULT_MAX_ROWS`] rows, see
/// [`SqliteDatabase::with_max_rows`].
#[derive(Clone, Debug)]
pub struct SqliteDatabase {
    path: PathBuf,
    flags: OpenFlags,
    max_rows: usize,
}

impl SqliteDatabase {
    /// Creates a read-only handle to the database at `path`.
    ///
    /// The file is not opened until the first statement runs.
    pub fn open<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            flags: OpenFlags::SQLITE_OPEN_READ_ONLY
                | OpenFlags::SQLITE_OPEN_NO_MUTEX
                | OpenFlags::SQLITE_OPEN_URI,
            max_rows: DEFAULT_MAX_ROWS,
        }
    }

    /// Allows statements to modify the database.
    pub fn writable(mut self) -> Self {
        self.flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX
            | OpenFlags::SQLITE_OPEN_URI;
        self
    }

    /// Sets how many rows a query returns. Extra rows are reported in
    /// [`Table::truncated_rows`].
    pub fn with_max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = max_rows;
        self
    }

    /// Returns the path of the database file.
    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn run<T, F>(&self, f: F) -> Result<T, DatabaseError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, DatabaseError> + Send + 'static,
    {
        let path = self.path.clone();
        let flags = self.flags;
        spawn_blocking(move || {
            let conn = Connection::open_with_flags(&path, flags)
                .map_err(|source| DatabaseError::Open { path, source })?;
            f(&conn)
        })
        .await?
    }
}

#[async_trait]
impl Database for SqliteDatabase {
    async fn query(&self, sql: &str) -> Result<Table, DatabaseError> {
        debug!("running query: {sql}");
        let sql = sql.to_owned();
        let max_rows = self.max_rows;
        let table = self
            .run(move |conn| read_table(conn, &sql, max_rows))
            .await?;
        if table.truncated_rows > 0 {
            info!(
                "query returned {} rows, kept the first {}",
                table.rows.len() + table.truncated_rows,
                table.rows.len()
            );
        } else {
            debug!("query returned {} rows", table.rows.len());
        }
        Ok(table)
    }

    async fn table_info(&self) -> Result<String, DatabaseError> {
        self.run(|conn| {
            let mut stmt = conn.prepare(
                "SELECT sql FROM sqlite_master \
                 WHERE type = 'table' AND name NOT LIKE 'sqlite_%' \
                 ORDER BY name",
            )?;
            let statements = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(statements.join("\n"))
        })
        .await
    }
}

fn read_table(
    conn: &Connection,
    sql: &str,
    max_rows: usize,
) -> Result<Table, DatabaseError> {
    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<String> =
        stmt.column_names().into_iter().map(str::to_owned).collect();

    let mut rows = Vec::new();
    let mut truncated_rows = 0;
    let mut cursor = stmt.query([])?;
    while let Some(row) = cursor.next()? {
        if rows.len() == max_rows {
            truncated_rows += 1;
            continue;
        }
        let mut values = Vec::with_capacity(columns.len());
        for idx in 0..columns.len() {
            values.push(to_json(row.get_ref(idx)?));
        }
        rows.push(values);
    }

    Ok(Table {
        columns,
        rows,
        truncated_rows,
    })
}

fn to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => {
            Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
        }
        ValueRef::Text(bytes) => {
            Value::String(String::from_utf8_lossy(bytes).into_owned())
        }
        ValueRef::Blob(bytes) => Value::String(format!("<{} bytes>", bytes.len())),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;

    fn fixture() -> (TempDir, SqliteDatabase) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("factory.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE production (month TEXT NOT NULL, units INTEGER, yield REAL);
             INSERT INTO production VALUES ('2024-01', 120, 0.97);
             INSERT INTO production VALUES ('2024-02', 95, NULL);",
        )
        .unwrap();
        (dir, SqliteDatabase::open(path))
    }

    #[tokio::test]
    async fn test_query_rows() {
        let (_dir, db) = fixture();
        let table = db
            .query("SELECT month, units, yield FROM production ORDER BY month")
            .await
            .unwrap();
        assert_eq!(table.columns, ["month", "units", "yield"]);
        assert_eq!(
            table.rows,
            [
                vec![json!("2024-01"), json!(120), json!(0.97)],
                vec![json!("2024-02"), json!(95), Value::Null],
            ]
        );
    }

    #[tokio::test]
    async fn test_rows_are_capped() {
        let (_dir, db) = fixture();
        let db = db.with_max_rows(3);
        let table = db
            .query(
                "WITH RECURSIVE n(i) AS (SELECT 1 UNION ALL SELECT i + 1 FROM n WHERE i < 10) \
                 SELECT i FROM n",
            )
            .await
            .unwrap();
        assert_eq!(table.rows, [[json!(1)], [json!(2)], [json!(3)]]);
        assert_eq!(table.truncated_rows, 7);
        assert!(table.to_markdown().ends_with("| 3 |\n(7 more rows truncated)\n"));

        // Results within the cap are complete.
        let table = db.query("SELECT month FROM production").await.unwrap();
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.truncated_rows, 0);
    }

    #[tokio::test]
    async fn test_query_error() {
        let (_dir, db) = fixture();
        let err = db.query("SELECT * FROM missing_table").await.unwrap_err();
        assert!(matches!(err, DatabaseError::Sqlite(_)));
        assert!(err.to_string().contains("no such table: missing_table"));
    }

    #[tokio::test]
    async fn test_read_only_by_default() {
        let (_dir, db) = fixture();
        let err = db.query("DELETE FROM production").await.unwrap_err();
        assert!(err.to_string().contains("readonly"));

        let rows = db.query("SELECT COUNT(*) FROM production").await.unwrap();
        assert_eq!(rows.rows, [vec![json!(2)]]);
    }

    #[tokio::test]
    async fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let db = SqliteDatabase::open(dir.path().join("nope.db"));
        let err = db.query("SELECT 1").await.unwrap_err();
        assert!(matches!(err, DatabaseError::Open { .. }));
    }

    #[tokio::test]
    async fn test_table_info() {
        let (_dir, db) = fixture();
        let info = db.table_info().await.unwrap();
        assert_eq!(
            info,
            "CREATE TABLE production (month TEXT NOT NULL, units INTEGER, yield REAL)"
        );
    }
}
