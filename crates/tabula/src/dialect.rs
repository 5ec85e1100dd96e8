//! SQL dialect behavior
//!
//! A closed enum rather than a trait object: each variant carries the full set
//! of per-dialect decisions the engine needs (paging idiom, parameter prefix,
//! identity-retrieval form, max parameter count, quoting). Generated SQL uses
//! uniform `@N` markers on every dialect; all four engines accept `@`-prefixed
//! named parameters, so the prefix only varies in principle, not here.

use crate::error::{Error, Result};

/// SQL Server engine generation; 2012 introduced native OFFSET/FETCH
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlServerVersion {
    /// 2008 and earlier: paging via ROW_NUMBER window
    V2008,
    /// 2012 and later: paging via OFFSET ... FETCH NEXT
    V2012,
}

/// How a dialect pages a SELECT
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageIdiom {
    /// Wrap in a ROW_NUMBER() window and filter on the row number
    RowNumber,
    /// Append `OFFSET @n ROWS FETCH NEXT @m ROWS ONLY`
    OffsetFetch,
    /// Append `LIMIT @m OFFSET @n`
    LimitOffset,
}

/// How a dialect returns a database-assigned primary key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityForm {
    /// Append a follow-up SELECT to the INSERT batch and read its scalar
    AppendedSelect(&'static str),
    /// Add a RETURNING clause to the INSERT itself
    Returning,
    /// Ask the connection for the last inserted row id
    LastRowId,
}

/// A supported SQL dialect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    /// Microsoft SQL Server
    SqlServer(SqlServerVersion),
    /// PostgreSQL
    Postgres,
    /// MySQL / MariaDB
    MySql,
    /// SQLite
    Sqlite,
}

impl Dialect {
    /// Resolve a dialect from a configuration name
    pub fn from_name(name: &str) -> Result<Self> {
        match name.to_lowercase().as_str() {
            "sqlserver" | "mssql" => Ok(Self::SqlServer(SqlServerVersion::V2012)),
            "sqlserver-2008" | "mssql-2008" => Ok(Self::SqlServer(SqlServerVersion::V2008)),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "mysql" | "mariadb" => Ok(Self::MySql),
            "sqlite" | "sqlite3" => Ok(Self::Sqlite),
            other => Err(Error::config(format!("unknown dialect '{other}'"))),
        }
    }

    /// Dialect name for logging and diagnostics
    pub fn name(self) -> &'static str {
        match self {
            Self::SqlServer(_) => "SQL Server",
            Self::Postgres => "PostgreSQL",
            Self::MySql => "MySQL",
            Self::Sqlite => "SQLite",
        }
    }

    /// Parameter marker prefix in generated SQL
    pub const fn param_prefix(self) -> char {
        '@'
    }

    /// Marker for the argument at `index`
    pub fn placeholder(self, index: usize) -> String {
        format!("@{index}")
    }

    /// Quote an identifier
    pub fn quote_identifier(self, name: &str) -> String {
        match self {
            Self::SqlServer(_) => format!("[{}]", name.replace(']', "]]")),
            Self::MySql => format!("`{}`", name.replace('`', "``")),
            Self::Postgres | Self::Sqlite => format!("\"{}\"", name.replace('"', "\"\"")),
        }
    }

    /// Escape a string literal (doubling single quotes)
    pub fn escape_string(self, value: &str) -> String {
        value.replace('\'', "''")
    }

    /// Per-statement bound parameter ceiling, with headroom under each
    /// engine's hard limit
    pub const fn max_parameters(self) -> usize {
        match self {
            Self::SqlServer(_) => 2000,
            Self::Postgres | Self::MySql => 65_535,
            Self::Sqlite => 999,
        }
    }

    /// Paging idiom for this dialect
    pub const fn page_idiom(self) -> PageIdiom {
        match self {
            Self::SqlServer(SqlServerVersion::V2008) => PageIdiom::RowNumber,
            Self::SqlServer(SqlServerVersion::V2012) => PageIdiom::OffsetFetch,
            Self::Postgres | Self::MySql | Self::Sqlite => PageIdiom::LimitOffset,
        }
    }

    /// Identity-retrieval form for database-assigned keys
    pub const fn identity_form(self) -> IdentityForm {
        match self {
            Self::SqlServer(_) => IdentityForm::AppendedSelect("SELECT SCOPE_IDENTITY();"),
            Self::MySql => IdentityForm::AppendedSelect("SELECT LAST_INSERT_ID();"),
            Self::Postgres => IdentityForm::Returning,
            Self::Sqlite => IdentityForm::LastRowId,
        }
    }

    /// Next-value expression for a sequence-backed key, where supported
    pub fn sequence_next_value(self, sequence: &str) -> Option<String> {
        match self {
            Self::Postgres => Some(format!("nextval('{}')", self.escape_string(sequence))),
            _ => None,
        }
    }

    /// Deterministic no-op ordering for window/offset forms that require an
    /// ORDER BY the caller did not supply
    pub const fn null_order_clause(self) -> &'static str {
        "ORDER BY (SELECT NULL)"
    }

    /// SQL probing for a table's existence (consumed by migration layers)
    pub fn table_exists_sql(self, table: &str) -> String {
        let table = self.escape_string(table);
        match self {
            Self::SqlServer(_) => format!(
                "SELECT CASE WHEN EXISTS(SELECT 1 FROM INFORMATION_SCHEMA.TABLES WHERE TABLE_NAME = '{table}') THEN 1 ELSE 0 END"
            ),
            Self::Postgres => format!(
                "SELECT EXISTS(SELECT 1 FROM information_schema.tables WHERE table_schema = 'public' AND table_name = '{table}')"
            ),
            Self::MySql => format!(
                "SELECT EXISTS(SELECT 1 FROM information_schema.tables WHERE table_schema = DATABASE() AND table_name = '{table}')"
            ),
            Self::Sqlite => format!(
                "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = '{table}')"
            ),
        }
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
