//! Bulk insert engine
//!
//! Loads N records of a type through the fastest facility the connection
//! offers: the native bulk-copy protocol when present and permitted, a
//! table-direct cursor when one exists, and otherwise multi-row INSERT
//! statements batched so each stays under the dialect's bound-parameter
//! ceiling. Batches run sequentially and are never retried; atomicity
//! belongs to the caller's transaction. Schema problems fail before any row
//! is sent.

use std::sync::Arc;

use tracing::debug;

use crate::connection::Connection;
use crate::dialect::Dialect;
use crate::error::{Error, Result};
use crate::meta::{table_for, Entity, TableDescriptor};
use crate::reader::{bulk_schema, RecordSource};

/// Facility the engine loaded rows through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BulkPath {
    /// Native bulk-copy protocol
    Copy,
    /// Table-direct cursor, row by row
    TableDirect,
    /// Batched multi-row INSERT statements
    Batched,
}

/// Batch layout for the multi-row INSERT path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BatchPlan {
    pub records_per_batch: usize,
    pub batches: usize,
}

/// Split `record_count` records of `params_per_record` bound parameters each
/// into batches under `max_parameters`
pub(crate) fn plan_batches(
    record_count: usize,
    params_per_record: usize,
    max_parameters: usize,
) -> Result<BatchPlan> {
    if params_per_record == 0 {
        return Err(Error::metadata("no insertable columns declared"));
    }
    let records_per_batch = max_parameters / params_per_record;
    if records_per_batch == 0 {
        return Err(Error::parameter(format!(
            "a single record binds {params_per_record} parameters, over the dialect ceiling of \
             {max_parameters}"
        )));
    }
    Ok(BatchPlan {
        records_per_batch,
        batches: record_count.div_ceil(records_per_batch),
    })
}

/// Insert `records` through the best available facility, returning the
/// number inserted and the path taken
pub(crate) fn insert_records<T: Entity>(
    connection: &mut dyn Connection,
    dialect: Dialect,
    allow_native_copy: bool,
    records: Vec<T>,
) -> Result<(u64, BulkPath)> {
    if records.is_empty() {
        return Ok((0, BulkPath::Batched));
    }

    let table = table_for::<T>();
    // Validates declared attributes against provider types before any I/O.
    let schema = bulk_schema(&table)?;

    let capabilities = connection.capabilities();
    if allow_native_copy && capabilities.bulk_copy {
        let mappings: Vec<(String, String)> = schema
            .iter()
            .map(|column| (column.name.clone(), column.name.clone()))
            .collect();
        let mut source = RecordSource::new(Arc::clone(&table), records.into_iter())?;
        let copied = connection.bulk_copy(&table.name, &mappings, &mut source)?;
        debug!(table = %table.name, rows = copied, "bulk insert via native copy");
        return Ok((copied, BulkPath::Copy));
    }

    if capabilities.table_direct {
        let mut source = RecordSource::new(Arc::clone(&table), records.into_iter())?;
        let inserted = connection.table_direct_insert(&table.name, &mut source)?;
        debug!(table = %table.name, rows = inserted, "bulk insert via table-direct cursor");
        return Ok((inserted, BulkPath::TableDirect));
    }

    let inserted = batched_insert(connection, dialect, &table, &records)?;
    Ok((inserted, BulkPath::Batched))
}

/// Multi-row INSERT path: one statement per batch, markers numbered from
/// zero within each batch
fn batched_insert<T: Entity>(
    connection: &mut dyn Connection,
    dialect: Dialect,
    table: &TableDescriptor<T>,
    records: &[T],
) -> Result<u64> {
    let insert_columns = table.insert_columns();
    let plan = plan_batches(records.len(), insert_columns.len(), dialect.max_parameters())?;

    let sequence_expr = table
        .sequence
        .as_deref()
        .and_then(|sequence| dialect.sequence_next_value(sequence));

    let quoted_table = dialect.quote_identifier(&table.name);
    let mut column_names = Vec::with_capacity(insert_columns.len() + 1);
    if sequence_expr.is_some() {
        column_names.push(dialect.quote_identifier(&table.primary_key));
    }
    column_names.extend(
        insert_columns
            .iter()
            .map(|column| dialect.quote_identifier(&column.name)),
    );
    let insert_prefix = format!(
        "INSERT INTO {quoted_table} ({}) VALUES ",
        column_names.join(", ")
    );

    for chunk in records.chunks(plan.records_per_batch) {
        let mut sql = insert_prefix.clone();
        let mut args = Vec::with_capacity(chunk.len() * insert_columns.len());
        for (row_index, record) in chunk.iter().enumerate() {
            if row_index > 0 {
                sql.push_str(", ");
            }
            sql.push('(');
            let mut first = true;
            if let Some(expr) = &sequence_expr {
                sql.push_str(expr);
                first = false;
            }
            for column in &insert_columns {
                if !first {
                    sql.push_str(", ");
                }
                first = false;
                sql.push_str(&dialect.placeholder(args.len()));
                args.push((column.get)(record));
            }
            sql.push(')');
        }
        connection.execute(&sql, &args)?;
    }

    debug!(
        table = %table.name,
        records = records.len(),
        batches = plan.batches,
        "bulk insert via batched statements"
    );
    Ok(records.len() as u64)
}
