//! Table/column metadata and the record trait
//!
//! Record types declare their table shape once through [`Entity::descriptor`]:
//! column names, provider type tags, and a pair of typed accessor closures per
//! column. Descriptors are built on first use and cached for the process
//! lifetime; everything downstream (mapper, SQL synthesis, bulk load) works
//! from the cached descriptor, never from per-call introspection.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::types::{SqlType, Value};

/// Typed read accessor for one column of `T`
pub type GetFn<T> = fn(&T) -> Value;

/// Typed write accessor for one column of `T`; receives non-null values
pub type SetFn<T> = fn(&mut T, Value) -> Result<()>;

/// Value-level conversion applied before the typed setter
pub type ConvertFn = fn(Value) -> Result<Value>;

/// One column of a record type
pub struct ColumnDescriptor<T> {
    /// Column name as it appears in the database
    pub name: String,
    /// Provider type tag
    pub sql_type: SqlType,
    /// Whether NULL is a legal stored value
    pub nullable: bool,
    /// Whether the column carries a uniqueness constraint (bulk schema only)
    pub unique: bool,
    /// Computed/result-only columns are read back but never written
    pub result_only: bool,
    /// Bounded size for character/binary types
    pub size: Option<u32>,
    /// Numeric or fractional-second precision
    pub precision: Option<u8>,
    /// Numeric scale
    pub scale: Option<u8>,
    /// Read the column value out of a record
    pub get: GetFn<T>,
    /// Write a converted value into a record
    pub set: SetFn<T>,
    /// Override for the value conversion applied while materializing
    pub convert: Option<ConvertFn>,
}

impl<T> ColumnDescriptor<T> {
    /// Create a column with the given accessors; attributes default off
    pub fn new(
        name: impl Into<String>,
        sql_type: SqlType,
        get: GetFn<T>,
        set: SetFn<T>,
    ) -> Self {
        Self {
            name: name.into(),
            sql_type,
            nullable: false,
            unique: false,
            result_only: false,
            size: None,
            precision: None,
            scale: None,
            get,
            set,
            convert: None,
        }
    }

    /// Mark the column nullable
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Mark the column unique
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Mark the column result-only (read back, never written)
    pub fn result_only(mut self) -> Self {
        self.result_only = true;
        self
    }

    /// Declare a bounded column size
    pub fn size(mut self, size: u32) -> Self {
        self.size = Some(size);
        self
    }

    /// Declare numeric/fractional precision
    pub fn precision(mut self, precision: u8) -> Self {
        self.precision = Some(precision);
        self
    }

    /// Declare numeric scale
    pub fn scale(mut self, scale: u8) -> Self {
        self.scale = Some(scale);
        self
    }

    /// Route materialized values through `convert` before the setter
    pub fn converted_by(mut self, convert: ConvertFn) -> Self {
        self.convert = Some(convert);
        self
    }
}

impl<T> std::fmt::Debug for ColumnDescriptor<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ColumnDescriptor")
            .field("name", &self.name)
            .field("sql_type", &self.sql_type)
            .field("nullable", &self.nullable)
            .field("unique", &self.unique)
            .field("result_only", &self.result_only)
            .field("size", &self.size)
            .field("precision", &self.precision)
            .field("scale", &self.scale)
            .finish()
    }
}

/// Declarative table shape for a record type
pub struct TableDescriptor<T> {
    /// Table name
    pub name: String,
    /// Primary-key column name
    pub primary_key: String,
    /// Whether the primary key is assigned by the database
    pub auto_increment: bool,
    /// Sequence backing the primary key, for dialects that use one
    pub sequence: Option<String>,
    /// Declared columns, in declaration order
    pub columns: Vec<ColumnDescriptor<T>>,
}

impl<T> TableDescriptor<T> {
    /// Start a descriptor for `table` keyed by `primary_key`
    pub fn new(table: impl Into<String>, primary_key: impl Into<String>) -> Self {
        Self {
            name: table.into(),
            primary_key: primary_key.into(),
            auto_increment: false,
            sequence: None,
            columns: Vec::new(),
        }
    }

    /// Mark the primary key database-assigned
    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    /// Back the primary key with a named sequence
    pub fn sequence(mut self, sequence: impl Into<String>) -> Self {
        self.sequence = Some(sequence.into());
        self
    }

    /// Append a column
    pub fn column(mut self, column: ColumnDescriptor<T>) -> Self {
        self.columns.push(column);
        self
    }

    /// Find a column by name (case-insensitive)
    pub fn find(&self, name: &str) -> Option<&ColumnDescriptor<T>> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// The primary-key column's descriptor, if declared
    pub fn pk_column(&self) -> Option<&ColumnDescriptor<T>> {
        self.find(&self.primary_key)
    }

    /// Read the primary-key value out of a record
    pub fn pk_value(&self, record: &T) -> Result<Value> {
        let col = self.pk_column().ok_or_else(|| {
            Error::metadata(format!(
                "table '{}' declares primary key '{}' but no such column",
                self.name, self.primary_key
            ))
        })?;
        Ok((col.get)(record))
    }

    /// Whether `column` is the auto-increment primary key
    fn is_auto_pk(&self, column: &ColumnDescriptor<T>) -> bool {
        self.auto_increment && column.name.eq_ignore_ascii_case(&self.primary_key)
    }

    /// Columns written by INSERT and bulk paths: result-only columns and a
    /// database-assigned primary key are excluded (a sequence-backed key is
    /// excluded here too; the statement inlines the sequence expression).
    pub fn insert_columns(&self) -> Vec<&ColumnDescriptor<T>> {
        self.columns
            .iter()
            .filter(|c| !c.result_only && !self.is_auto_pk(c))
            .filter(|c| {
                !(self.sequence.is_some() && c.name.eq_ignore_ascii_case(&self.primary_key))
            })
            .collect()
    }

    /// Columns written by UPDATE: primary key and result-only columns excluded
    pub fn update_columns(&self) -> Vec<&ColumnDescriptor<T>> {
        self.columns
            .iter()
            .filter(|c| !c.result_only && !c.name.eq_ignore_ascii_case(&self.primary_key))
            .collect()
    }

    /// Lowercased column-name set, used for multi-segment window splitting
    pub fn column_name_set(&self) -> std::collections::HashSet<String> {
        self.columns
            .iter()
            .map(|c| c.name.to_lowercase())
            .collect()
    }
}

impl<T> std::fmt::Debug for TableDescriptor<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableDescriptor")
            .field("name", &self.name)
            .field("primary_key", &self.primary_key)
            .field("auto_increment", &self.auto_increment)
            .field("sequence", &self.sequence)
            .field("columns", &self.columns)
            .finish()
    }
}

/// A record type that maps to one table.
///
/// `descriptor()` is invoked at most once per process; the result is cached
/// and shared. `Default` supplies the blank record the materializer fills in,
/// so skipped (NULL) columns keep their default field values.
pub trait Entity: Default + Send + 'static {
    /// Declare the table shape for this type
    fn descriptor() -> TableDescriptor<Self>;

    /// Hook invoked after a record is materialized from a row
    fn on_loaded(&mut self) {}
}

static DESCRIPTORS: LazyLock<RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));

/// Cached descriptor for `T`, built on first use.
pub fn table_for<T: Entity>() -> Arc<TableDescriptor<T>> {
    let key = TypeId::of::<T>();
    if let Some(existing) = DESCRIPTORS.read().get(&key) {
        if let Some(table) = existing.downcast_ref::<Arc<TableDescriptor<T>>>() {
            return Arc::clone(table);
        }
    }

    let built = Arc::new(T::descriptor());
    let mut write = DESCRIPTORS.write();
    // Another thread may have populated the slot while we built ours.
    if let Some(existing) = write.get(&key) {
        if let Some(table) = existing.downcast_ref::<Arc<TableDescriptor<T>>>() {
            return Arc::clone(table);
        }
    }
    write.insert(key, Arc::new(Arc::clone(&built)) as Arc<dyn Any + Send + Sync>);
    built
}
