//! # tabula
//!
//! Synchronous relational persistence engine: typed records to and from rows
//! across SQL dialects.
//!
//! Records declare their table shape once through a [`meta::TableDescriptor`];
//! the engine generates the SQL around it, maps result rows back through
//! cached materialization plans, and keeps one ambient connection per scope
//! so sequential operations and nested transactions share it.
//!
//! ## Features
//!
//! - **Typed CRUD**: insert with generated-key writeback, update, delete,
//!   save, and a bounded insert-or-update alternation safe under races
//! - **Auto-SELECT Expansion**: fetch with just a `WHERE ...` fragment; the
//!   column list and FROM clause come from record metadata
//! - **Paging**: any SELECT becomes a count query plus a page query in the
//!   dialect's idiom (ROW_NUMBER, OFFSET/FETCH, or LIMIT/OFFSET)
//! - **Multi-Segment Fetch**: one joined row materializes two or three
//!   record types, split on column-name boundaries
//! - **Bulk Insert**: native bulk copy, table-direct cursors, or batched
//!   multi-row INSERTs under the dialect's parameter ceiling
//! - **Retry Policies**: per-connection-identity retry with exponential
//!   backoff and jitter for transient faults
//! - **Dialect Abstraction**: SQL Server (2008/2012+), PostgreSQL,
//!   MySQL/MariaDB, and SQLite quoting, paging, and identity retrieval
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use tabula::prelude::*;
//!
//! // Open an embedded SQLite database
//! let db = Database::new(DatabaseConfig::new(":memory:", "sqlite"))?;
//!
//! // Fetch with auto-SELECT expansion; Article declares its table shape
//! // through an Entity descriptor
//! let recent: Vec<Article> =
//!     db.fetch("WHERE published >= @0 ORDER BY id DESC", &[cutoff.into()])?;
//!
//! // Insert writes the generated key back into the record
//! let mut article = Article { title: "hello".into(), ..Default::default() };
//! db.insert(&mut article)?;
//! assert!(article.id > 0);
//!
//! // Page 2 at ten rows per page, with total counts
//! let page = db.page::<Article>(2, 10, "ORDER BY id", &[])?;
//! println!("{} of {} pages", page.current_page, page.total_pages);
//!
//! // Unit of work over the ambient scope
//! let tx = db.transaction()?;
//! db.execute("DELETE FROM article WHERE draft = @0", &[true.into()])?;
//! tx.complete()?;
//! ```
//!
//! ## Feature Flags
//!
//! - `sqlite` - Embedded SQLite driver via rusqlite (enabled by default)

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

mod bulk;
pub mod connection;
pub mod database;
pub mod dialect;
pub mod error;
pub mod mapper;
pub mod meta;
pub mod paging;
pub mod params;
pub mod reader;
pub mod retry;
pub mod scope;
pub mod sql;
pub mod testing;
pub mod types;

// Driver implementations (conditionally compiled)
#[cfg(feature = "sqlite")]
pub mod sqlite;

/// Prelude module for convenient imports
pub mod prelude {
    // Error types
    pub use crate::error::{Error, ErrorCategory, Result};

    // Value and type system
    pub use crate::types::{FromValue, Row, SqlType, Value};

    // Database façade
    pub use crate::database::{Database, Persisted};

    // Connection traits and config
    pub use crate::connection::{
        Capabilities, Connection, DatabaseConfig, Driver, IsolationLevel, QueryOutput,
    };

    // Record metadata
    pub use crate::meta::{table_for, ColumnDescriptor, Entity, TableDescriptor};

    // Dialect types
    pub use crate::dialect::{Dialect, IdentityForm, PageIdiom, SqlServerVersion};

    // Scope and transactions
    pub use crate::scope::{ConnectionScope, Transaction};

    // Paging types
    pub use crate::paging::{Page, PageQueries};

    // SQL builder
    pub use crate::sql::Sql;

    // Retry policies
    pub use crate::retry::{ConnectionPolicies, RetryPolicy};
}

// Re-export commonly used items at crate root
pub use database::Database;
pub use error::{Error, Result};
pub use types::Value;
