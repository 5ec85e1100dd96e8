//! Streaming row source adapter
//!
//! [`RecordSource`] exposes a record sequence as a forward-only row cursor
//! for native bulk-copy and table-direct inserts: schema metadata is declared
//! once up front, each [`RowSource::advance`] yields one row, and cells are
//! read on demand through the descriptor's cached column accessors. Schema
//! attribute combinations inconsistent with the provider type tag (a
//! fixed-width integer with a column size, say) are rejected at declaration
//! time, before any I/O.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::meta::{Entity, TableDescriptor};
use crate::types::{SqlType, Value};

/// Schema metadata for one bulk column, declared once per load
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkColumn {
    /// Column name (mappings are always by name, never ordinal)
    pub name: String,
    /// Provider type tag
    pub sql_type: SqlType,
    /// Whether NULL is a legal cell value
    pub nullable: bool,
    /// Whether the column carries a uniqueness constraint
    pub unique: bool,
    /// Bounded size for character/binary types
    pub size: Option<u32>,
    /// Numeric or fractional-second precision
    pub precision: Option<u8>,
    /// Numeric scale
    pub scale: Option<u8>,
}

impl BulkColumn {
    /// Declare a column with no optional attributes
    pub fn new(name: impl Into<String>, sql_type: SqlType) -> Self {
        Self {
            name: name.into(),
            sql_type,
            nullable: false,
            unique: false,
            size: None,
            precision: None,
            scale: None,
        }
    }

    /// Reject attribute combinations the provider type does not admit
    pub fn validate(&self) -> Result<()> {
        if self.size.is_some() && !self.sql_type.allows_size() {
            return Err(Error::metadata(format!(
                "column '{}': type {} does not take a column size",
                self.name, self.sql_type
            )));
        }
        if self.precision.is_some() && !self.sql_type.allows_precision() {
            return Err(Error::metadata(format!(
                "column '{}': type {} does not take a precision",
                self.name, self.sql_type
            )));
        }
        if self.scale.is_some() && !self.sql_type.allows_scale() {
            return Err(Error::metadata(format!(
                "column '{}': type {} does not take a scale",
                self.name, self.sql_type
            )));
        }
        if self.scale.is_some() && self.precision.is_none() {
            return Err(Error::metadata(format!(
                "column '{}': scale declared without a precision",
                self.name
            )));
        }
        Ok(())
    }
}

/// Forward-only row cursor consumed by native bulk facilities.
///
/// The reported row count reflects successful advances, not downstream
/// durable commits.
pub trait RowSource {
    /// Declared column schema, fixed for the cursor's lifetime
    fn schema(&self) -> &[BulkColumn];

    /// Move to the next row; `false` once the sequence is exhausted
    fn advance(&mut self) -> Result<bool>;

    /// Read one cell of the current row
    fn get(&mut self, column: usize) -> Result<Value>;

    /// Rows yielded so far
    fn rows_read(&self) -> u64;
}

/// Validated bulk schema for `T`'s insertable columns (result-only and
/// database-assigned key columns excluded)
pub fn bulk_schema<T: Entity>(table: &TableDescriptor<T>) -> Result<Vec<BulkColumn>> {
    let columns: Vec<BulkColumn> = table
        .insert_columns()
        .into_iter()
        .map(|c| BulkColumn {
            name: c.name.clone(),
            sql_type: c.sql_type,
            nullable: c.nullable,
            unique: c.unique,
            size: c.size,
            precision: c.precision,
            scale: c.scale,
        })
        .collect();

    if columns.is_empty() {
        return Err(Error::metadata(format!(
            "table '{}' has no insertable columns",
            table.name
        )));
    }
    for column in &columns {
        column.validate()?;
    }
    Ok(columns)
}

/// Adapts an in-memory or lazily iterated record sequence to [`RowSource`].
///
/// Owns only the iterator; dropping the source drops the iterator and
/// nothing else.
pub struct RecordSource<T: Entity, I: Iterator<Item = T>> {
    table: Arc<TableDescriptor<T>>,
    schema: Vec<BulkColumn>,
    /// Indices into `table.columns` aligned with `schema`
    fields: Vec<usize>,
    records: I,
    current: Option<T>,
    rows_read: u64,
}

impl<T: Entity, I: Iterator<Item = T>> RecordSource<T, I> {
    /// Build a cursor over `records`, validating the declared schema
    pub fn new(table: Arc<TableDescriptor<T>>, records: I) -> Result<Self> {
        let schema = bulk_schema(&table)?;
        let fields = schema
            .iter()
            .map(|bulk| {
                table
                    .columns
                    .iter()
                    .position(|c| c.name == bulk.name)
                    .ok_or_else(|| {
                        Error::metadata(format!(
                            "bulk column '{}' missing from table '{}'",
                            bulk.name, table.name
                        ))
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            table,
            schema,
            fields,
            records,
            current: None,
            rows_read: 0,
        })
    }

    /// Destination table name
    pub fn table_name(&self) -> &str {
        &self.table.name
    }
}

impl<T: Entity, I: Iterator<Item = T>> RowSource for RecordSource<T, I> {
    fn schema(&self) -> &[BulkColumn] {
        &self.schema
    }

    fn advance(&mut self) -> Result<bool> {
        self.current = self.records.next();
        if self.current.is_some() {
            self.rows_read += 1;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn get(&mut self, column: usize) -> Result<Value> {
        let record = self
            .current
            .as_ref()
            .ok_or_else(|| Error::state("no current row; call advance first"))?;
        let field = *self.fields.get(column).ok_or_else(|| {
            Error::metadata(format!(
                "bulk column index {column} out of range ({} declared)",
                self.schema.len()
            ))
        })?;
        Ok((self.table.columns[field].get)(record))
    }

    fn rows_read(&self) -> u64 {
        self.rows_read
    }
}
