//! SQLite driver backed by rusqlite
//!
//! Accepts `:memory:`, plain paths, and `sqlite:`/`sqlite://` URLs. File
//! databases run in WAL mode with foreign keys on; the busy timeout follows
//! the configured command timeout. Generated `@N` markers bind through
//! SQLite's native named-parameter support, so statements execute without
//! rewriting. Dates, times, decimals, UUIDs, and JSON are stored as TEXT in
//! the formats the value coercions parse back. Bulk loads take the
//! table-direct cursor: one prepared INSERT reused for every row.

use std::sync::Arc;
use std::time::Duration;

use rusqlite::types::ValueRef;
use rusqlite::ErrorCode;
use tracing::debug;

use crate::connection::{Capabilities, Connection, DatabaseConfig, Driver, IsolationLevel, QueryOutput};
use crate::error::{Error, Result};
use crate::reader::RowSource;
use crate::types::Value;

/// Opens SQLite connections
#[derive(Debug, Default, Clone, Copy)]
pub struct SqliteDriver;

/// Resolve the filesystem target from a connection URL
fn database_target(url: &str) -> &str {
    let stripped = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))
        .unwrap_or(url);
    if stripped.is_empty() || stripped == ":memory:" {
        ":memory:"
    } else {
        stripped
    }
}

impl Driver for SqliteDriver {
    fn connect(&self, config: &DatabaseConfig) -> Result<Box<dyn Connection>> {
        let target = database_target(&config.url);
        let inner = if target == ":memory:" {
            rusqlite::Connection::open_in_memory()
        } else {
            rusqlite::Connection::open(target)
        }
        .map_err(|e| Error::connection_with_source(format!("open '{target}'"), e))?;

        inner
            .execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(|e| Error::connection_with_source("apply connection pragmas", e))?;
        if target != ":memory:" {
            inner
                .execute_batch("PRAGMA journal_mode = WAL;")
                .map_err(|e| Error::connection_with_source("enable WAL journal", e))?;
        }
        if config.command_timeout_ms > 0 {
            inner
                .busy_timeout(config.command_timeout())
                .map_err(|e| Error::connection_with_source("set busy timeout", e))?;
        }

        debug!(target, "sqlite connection opened");
        Ok(Box::new(SqliteConnection { inner }))
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }
}

struct SqliteConnection {
    inner: rusqlite::Connection,
}

/// Translate a rusqlite failure into the engine taxonomy. Busy and locked
/// databases surface as timeouts so the retry predicate sees them;
/// constraint violations carry the failing constraint text.
fn map_sqlite_error(sql: &str, e: rusqlite::Error) -> Error {
    match &e {
        rusqlite::Error::SqliteFailure(code, message) => match code.code {
            ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => Error::timeout(
                message
                    .clone()
                    .unwrap_or_else(|| "database is locked".to_string()),
            ),
            ErrorCode::ConstraintViolation => {
                let message = message.clone().unwrap_or_else(|| e.to_string());
                // "UNIQUE constraint failed: widget.name" -> "widget.name"
                let name = message
                    .rsplit_once(": ")
                    .map(|(_, name)| name.to_string())
                    .unwrap_or_else(|| message.clone());
                Error::constraint(name, message)
            }
            _ => Error::query_with_source(e.to_string(), sql, e),
        },
        _ => Error::query_with_source(e.to_string(), sql, e),
    }
}

/// Bind `args` to the prepared statement through `@N` named parameters
fn bind_args(stmt: &mut rusqlite::Statement<'_>, sql: &str, args: &[Value]) -> Result<()> {
    use rusqlite::types::Null;

    for (position, value) in args.iter().enumerate() {
        let marker = format!("@{position}");
        // Derived statements (count forms with ORDER BY stripped) may
        // reference only a subset of the caller's markers; skip the rest.
        let Some(index) = stmt
            .parameter_index(&marker)
            .map_err(|e| map_sqlite_error(sql, e))?
        else {
            continue;
        };

        let bound = match value {
            Value::Null => stmt.raw_bind_parameter(index, Null),
            Value::Bool(b) => stmt.raw_bind_parameter(index, i64::from(*b)),
            Value::Int8(v) => stmt.raw_bind_parameter(index, i64::from(*v)),
            Value::Int16(v) => stmt.raw_bind_parameter(index, i64::from(*v)),
            Value::Int32(v) => stmt.raw_bind_parameter(index, i64::from(*v)),
            Value::Int64(v) => stmt.raw_bind_parameter(index, *v),
            Value::Float32(v) => stmt.raw_bind_parameter(index, f64::from(*v)),
            Value::Float64(v) => stmt.raw_bind_parameter(index, *v),
            Value::Decimal(d) => stmt.raw_bind_parameter(index, d.to_string()),
            Value::String(s) => stmt.raw_bind_parameter(index, s.as_str()),
            Value::Bytes(b) => stmt.raw_bind_parameter(index, b.as_slice()),
            Value::Date(d) => stmt.raw_bind_parameter(index, d.to_string()),
            Value::Time(t) => {
                stmt.raw_bind_parameter(index, t.format("%H:%M:%S%.f").to_string())
            }
            Value::DateTime(dt) => {
                stmt.raw_bind_parameter(index, dt.format("%Y-%m-%d %H:%M:%S%.f").to_string())
            }
            Value::DateTimeTz(dt) => stmt.raw_bind_parameter(index, dt.to_rfc3339()),
            Value::Uuid(u) => stmt.raw_bind_parameter(index, u.to_string()),
            Value::Json(j) => stmt.raw_bind_parameter(index, j.to_string()),
            Value::Array(_) => {
                return Err(Error::parameter(
                    "array value reached the driver unexpanded",
                ));
            }
        };
        bound.map_err(|e| map_sqlite_error(sql, e))?;
    }
    Ok(())
}

fn read_cell(cell: ValueRef<'_>) -> Result<Value> {
    Ok(match cell {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Int64(i),
        ValueRef::Real(f) => Value::Float64(f),
        ValueRef::Text(t) => Value::String(
            std::str::from_utf8(t)
                .map_err(|_| Error::mapping("TEXT cell is not valid UTF-8"))?
                .to_string(),
        ),
        ValueRef::Blob(b) => Value::Bytes(b.to_vec()),
    })
}

impl Connection for SqliteConnection {
    fn execute(&mut self, sql: &str, args: &[Value]) -> Result<u64> {
        let mut stmt = self
            .inner
            .prepare(sql)
            .map_err(|e| map_sqlite_error(sql, e))?;
        bind_args(&mut stmt, sql, args)?;
        let changed = stmt.raw_execute().map_err(|e| map_sqlite_error(sql, e))?;
        Ok(changed as u64)
    }

    fn query(&mut self, sql: &str, args: &[Value]) -> Result<QueryOutput> {
        let mut stmt = self
            .inner
            .prepare(sql)
            .map_err(|e| map_sqlite_error(sql, e))?;
        bind_args(&mut stmt, sql, args)?;

        let columns: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
        let column_count = columns.len();

        let mut rows = stmt.raw_query();
        let mut values = Vec::new();
        while let Some(row) = rows.next().map_err(|e| map_sqlite_error(sql, e))? {
            let mut cells = Vec::with_capacity(column_count);
            for index in 0..column_count {
                let cell = row
                    .get_ref(index)
                    .map_err(|e| map_sqlite_error(sql, e))?;
                cells.push(read_cell(cell)?);
            }
            values.push(cells);
        }

        Ok(QueryOutput {
            columns: Arc::new(columns),
            rows: values,
        })
    }

    fn begin(&mut self, _level: IsolationLevel) -> Result<()> {
        // SQLite transactions are serializable; IMMEDIATE takes the write
        // lock up front so later statements cannot deadlock on upgrade.
        self.inner
            .execute_batch("BEGIN IMMEDIATE;")
            .map_err(|e| map_sqlite_error("BEGIN IMMEDIATE", e))
    }

    fn commit(&mut self) -> Result<()> {
        self.inner
            .execute_batch("COMMIT;")
            .map_err(|e| map_sqlite_error("COMMIT", e))
    }

    fn rollback(&mut self) -> Result<()> {
        self.inner
            .execute_batch("ROLLBACK;")
            .map_err(|e| map_sqlite_error("ROLLBACK", e))
    }

    fn last_insert_id(&mut self) -> Result<i64> {
        Ok(self.inner.last_insert_rowid())
    }

    fn set_command_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.inner
            .busy_timeout(timeout)
            .map_err(|e| map_sqlite_error("PRAGMA busy_timeout", e))
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            bulk_copy: false,
            table_direct: true,
        }
    }

    fn table_direct_insert(&mut self, table: &str, source: &mut dyn RowSource) -> Result<u64> {
        let columns: Vec<String> = source
            .schema()
            .iter()
            .map(|column| format!("\"{}\"", column.name.replace('"', "\"\"")))
            .collect();
        let markers: Vec<String> = (0..columns.len()).map(|i| format!("@{i}")).collect();
        let sql = format!(
            "INSERT INTO \"{}\" ({}) VALUES ({})",
            table.replace('"', "\"\""),
            columns.join(", "),
            markers.join(", ")
        );

        // One prepared statement serves the whole cursor; raw_execute resets
        // it for the next row's bindings.
        let mut stmt = self
            .inner
            .prepare(&sql)
            .map_err(|e| map_sqlite_error(&sql, e))?;
        let column_count = columns.len();
        let mut row = Vec::with_capacity(column_count);
        let mut inserted = 0u64;
        while source.advance()? {
            row.clear();
            for column in 0..column_count {
                row.push(source.get(column)?);
            }
            bind_args(&mut stmt, &sql, &row)?;
            stmt.raw_execute().map_err(|e| map_sqlite_error(&sql, e))?;
            inserted += 1;
        }
        Ok(inserted)
    }

    fn is_valid(&mut self) -> bool {
        self.inner
            .query_row("SELECT 1", [], |_| Ok(()))
            .is_ok()
    }
}
