//! Row materialization and the compiled-plan cache
//!
//! A [`Materializer`] turns one row's values into a populated record. Plans
//! are compiled once per (type, row shape) and cached for the process
//! lifetime: compilation walks the column window, matches source columns to
//! declared bindings by case-insensitive name, and fixes the value converter
//! per column up front. Unmatched source columns are ignored; NULL cells skip
//! the setter so the field keeps its default.
//!
//! The cache key is a compact fingerprint of (SQL text, connection identity,
//! UTC flag, column window) rather than the texts themselves, bounding key
//! memory at the cost of a vanishingly small collision window.
//!
//! Map-like destinations need no plan: [`crate::types::Row`] already carries
//! one key/value pair per source column. Scalar destinations go through
//! [`scalar_from_row`].

use std::any::{Any, TypeId};
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::{Arc, LazyLock};

use parking_lot::RwLock;
use tracing::trace;

use crate::error::{Error, Result};
use crate::meta::{table_for, Entity, SetFn};
use crate::types::{FromValue, Value};

/// One row shape: the statement and connection it came from plus the column
/// window this plan reads
#[derive(Debug, Clone, Copy)]
pub struct RowShape<'a> {
    /// Statement text the rows were produced by
    pub sql: &'a str,
    /// Connection identity the rows were produced on
    pub identity: &'a str,
    /// Stamp naive datetimes as UTC instants
    pub force_utc: bool,
    /// Full result header
    pub columns: &'a [String],
    /// First column of this plan's window
    pub start: usize,
    /// Window width
    pub len: usize,
}

impl RowShape<'_> {
    /// Shape over the whole header
    pub fn full<'a>(
        sql: &'a str,
        identity: &'a str,
        force_utc: bool,
        columns: &'a [String],
    ) -> RowShape<'a> {
        RowShape {
            sql,
            identity,
            force_utc,
            columns,
            start: 0,
            len: columns.len(),
        }
    }

    /// Same shape restricted to the window `[start, start + len)`
    pub fn window(&self, start: usize, len: usize) -> RowShape<'_> {
        RowShape {
            start,
            len,
            ..*self
        }
    }

    fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.sql.hash(&mut hasher);
        self.identity.hash(&mut hasher);
        self.force_utc.hash(&mut hasher);
        self.start.hash(&mut hasher);
        self.len.hash(&mut hasher);
        hasher.finish()
    }
}

/// Converter fixed per binding at compile time. Resolution order: declared
/// override, then the forced-UTC datetime rule, then identity; everything
/// else (integral widening, string parsing) lives in the typed setter.
#[derive(Clone, Copy)]
enum Convert {
    Identity,
    ForceUtc,
    Custom(fn(Value) -> Result<Value>),
}

impl Convert {
    fn apply(&self, value: Value) -> Result<Value> {
        match self {
            Self::Identity => Ok(value),
            Self::ForceUtc => Ok(match value {
                Value::DateTime(naive) => Value::DateTimeTz(naive.and_utc()),
                other => other,
            }),
            Self::Custom(f) => f(value),
        }
    }
}

struct Binding<T> {
    /// Absolute index into the row's values
    column: usize,
    name: String,
    set: SetFn<T>,
    convert: Convert,
}

/// Compiled plan converting one row window into a `T`
pub struct Materializer<T: Entity> {
    bindings: Vec<Binding<T>>,
    start: usize,
    len: usize,
}

impl<T: Entity> Materializer<T> {
    fn compile(shape: &RowShape<'_>) -> Self {
        let table = table_for::<T>();
        let end = (shape.start + shape.len).min(shape.columns.len());
        let mut bindings = Vec::new();
        for index in shape.start..end {
            let Some(column) = table.find(&shape.columns[index]) else {
                continue;
            };
            let convert = match column.convert {
                Some(f) => Convert::Custom(f),
                None if shape.force_utc => Convert::ForceUtc,
                None => Convert::Identity,
            };
            bindings.push(Binding {
                column: index,
                name: column.name.clone(),
                set: column.set,
                convert,
            });
        }
        Self {
            bindings,
            start: shape.start,
            len: end - shape.start,
        }
    }

    /// Materialize one record from a full row's values
    pub fn materialize(&self, values: &[Value]) -> Result<T> {
        let mut record = T::default();
        for binding in &self.bindings {
            let value = match values.get(binding.column) {
                Some(v) if !v.is_null() => v.clone(),
                _ => continue,
            };
            let converted = binding.convert.apply(value)?;
            if converted.is_null() {
                continue;
            }
            (binding.set)(&mut record, converted).map_err(|e| {
                Error::mapping(format!(
                    "column '{}' of {}: {e}",
                    binding.name,
                    std::any::type_name::<T>()
                ))
            })?;
        }
        record.on_loaded();
        Ok(record)
    }

    /// Whether every cell in this plan's window is NULL, as an outer join
    /// produces for an unmatched right side
    pub fn window_is_null(&self, values: &[Value]) -> bool {
        let end = (self.start + self.len).min(values.len());
        values[self.start..end].iter().all(Value::is_null)
    }

    /// Number of columns this plan actually binds
    pub fn bound_columns(&self) -> usize {
        self.bindings.len()
    }
}

#[derive(PartialEq, Eq, Hash)]
struct PlanKey {
    type_id: TypeId,
    fingerprint: u64,
}

static PLANS: LazyLock<RwLock<HashMap<PlanKey, Arc<dyn Any + Send + Sync>>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));

/// Cached materializer for `T` over `shape`, compiled on first use
pub fn materializer_for<T: Entity>(shape: &RowShape<'_>) -> Arc<Materializer<T>> {
    let key = PlanKey {
        type_id: TypeId::of::<T>(),
        fingerprint: shape.fingerprint(),
    };
    if let Some(plan) = PLANS.read().get(&key) {
        if let Some(materializer) = plan.downcast_ref::<Arc<Materializer<T>>>() {
            return Arc::clone(materializer);
        }
    }

    let built = Arc::new(Materializer::<T>::compile(shape));
    let mut write = PLANS.write();
    // Another thread may have compiled the same plan while we did.
    if let Some(plan) = write.get(&key) {
        if let Some(materializer) = plan.downcast_ref::<Arc<Materializer<T>>>() {
            return Arc::clone(materializer);
        }
    }
    trace!(
        ty = std::any::type_name::<T>(),
        start = shape.start,
        len = shape.len,
        bound = built.bound_columns(),
        "materializer compiled"
    );
    write.insert(key, Arc::new(Arc::clone(&built)) as Arc<dyn Any + Send + Sync>);
    built
}

/// Materialize the first cell of a row into a scalar destination
pub fn scalar_from_row<S: FromValue>(values: Vec<Value>) -> Result<S> {
    let first = values.into_iter().next().unwrap_or(Value::Null);
    S::from_nullable(first)
}

/// Find the boundary where a joined result's columns stop describing the
/// current segment's type and start describing the next: the first column
/// (from `start`) that repeats a name already consumed, or that the current
/// type does not declare but the next type does. Columns known to neither
/// stay with the current segment.
pub fn split_boundary(
    columns: &[String],
    current: &HashSet<String>,
    next: &HashSet<String>,
    start: usize,
) -> Result<usize> {
    let mut consumed = HashSet::new();
    for (index, column) in columns.iter().enumerate().skip(start) {
        let name = column.to_lowercase();
        if consumed.contains(&name) {
            return Ok(index);
        }
        if !current.contains(&name) && next.contains(&name) {
            return Ok(index);
        }
        consumed.insert(name);
    }
    Err(Error::mapping(
        "could not locate the boundary between joined result segments",
    ))
}
