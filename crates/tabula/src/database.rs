//! Database façade
//!
//! A [`Database`] owns the driver, dialect, configuration, retry policies,
//! and execution hooks for one connection identity, and exposes the typed
//! surface: execute/scalar, eager fetch with cardinality helpers, per-record
//! CRUD with generated-key writeback, the bounded insert-or-update
//! alternation, paged and windowed fetches, multi-segment joined fetches,
//! and bulk insert. Commands run under the registered command retry policy;
//! every database error passes through the exception hook before it
//! propagates.
//!
//! The façade is `Send` but not `Sync`: it carries the ambient scope for one
//! logical unit of work.

use std::cell::RefCell;
use std::sync::Arc;

use tracing::{debug, error, trace};

use crate::bulk;
use crate::connection::{DatabaseConfig, Driver, IsolationLevel, QueryOutput};
use crate::dialect::{Dialect, IdentityForm};
use crate::error::{Error, ErrorCategory, Result};
use crate::mapper::{self, RowShape};
use crate::meta::{table_for, ColumnDescriptor, Entity, TableDescriptor};
use crate::paging::{self, Page};
use crate::params;
use crate::retry::{self, RetryPolicy};
use crate::scope::{ConnectionScope, Transaction};
use crate::types::{FromValue, Row, Value};

/// How [`Database::insert_or_update`] persisted the record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Persisted {
    /// A new row was inserted
    Inserted,
    /// An existing row was updated
    Updated,
}

/// Rounds of the insert-or-update alternation after the initial update.
/// The bound is part of the observable race behavior; see `insert_or_update`.
const UPSERT_ROUNDS: u32 = 4;

type CommandHook = Box<dyn Fn(&str, usize) + Send>;
type ExceptionHook = Box<dyn Fn(&Error) + Send>;

#[derive(Default)]
struct Hooks {
    executing: Option<CommandHook>,
    executed: Option<CommandHook>,
    exception: Option<ExceptionHook>,
}

#[derive(Default)]
struct LastCommand {
    sql: String,
    args: Vec<Value>,
}

/// Typed access to one database
pub struct Database {
    scope: ConnectionScope,
    dialect: Dialect,
    config: DatabaseConfig,
    command_retry: RetryPolicy,
    hooks: Hooks,
    last: RefCell<LastCommand>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("dialect", &self.dialect)
            .finish_non_exhaustive()
    }
}

impl Database {
    /// Open against `config` with the embedded SQLite driver.
    ///
    /// Other dialects need a driver supplied through [`Self::with_driver`].
    #[cfg(feature = "sqlite")]
    pub fn new(config: DatabaseConfig) -> Result<Self> {
        let dialect = Dialect::from_name(&config.dialect)?;
        if dialect != Dialect::Sqlite {
            return Err(Error::config(format!(
                "no embedded driver for dialect '{}'; supply one with Database::with_driver",
                config.dialect
            )));
        }
        Self::with_driver(Arc::new(crate::sqlite::SqliteDriver), config)
    }

    /// Open against `config` through `driver`, picking up any retry policies
    /// registered for the connection identity
    pub fn with_driver(driver: Arc<dyn Driver>, config: DatabaseConfig) -> Result<Self> {
        let dialect = Dialect::from_name(&config.dialect)?;
        let policies = retry::policies_for(config.connection_identity());
        debug!(
            dialect = %dialect,
            driver = driver.name(),
            identity = config.connection_identity(),
            "database opened"
        );
        let scope = ConnectionScope::new(driver, config.clone(), policies.connect);
        Ok(Self {
            scope,
            dialect,
            config,
            command_retry: policies.command,
            hooks: Hooks::default(),
            last: RefCell::new(LastCommand::default()),
        })
    }

    /// Dialect in force
    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Configuration this database was opened with
    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// The ambient connection/transaction scope
    pub fn scope(&self) -> &ConnectionScope {
        &self.scope
    }

    /// Observe each command before it executes (SQL text and argument count)
    pub fn on_executing_command(&mut self, hook: impl Fn(&str, usize) + Send + 'static) {
        self.hooks.executing = Some(Box::new(hook));
    }

    /// Observe each command after it executes successfully
    pub fn on_executed_command(&mut self, hook: impl Fn(&str, usize) + Send + 'static) {
        self.hooks.executed = Some(Box::new(hook));
    }

    /// Observe every database error before it propagates. The hook never
    /// suppresses the error.
    pub fn on_exception(&mut self, hook: impl Fn(&Error) + Send + 'static) {
        self.hooks.exception = Some(Box::new(hook));
    }

    // ------------------------------------------------------------------
    // Diagnostics
    // ------------------------------------------------------------------

    /// Text of the most recent command
    pub fn last_sql(&self) -> String {
        self.last.borrow().sql.clone()
    }

    /// Arguments of the most recent command
    pub fn last_args(&self) -> Vec<Value> {
        self.last.borrow().args.clone()
    }

    /// The most recent command formatted with its arguments, for logs
    pub fn last_command(&self) -> String {
        let last = self.last.borrow();
        format_command(&last.sql, &last.args)
    }

    fn remember(&self, sql: &str, args: &[Value]) {
        let mut last = self.last.borrow_mut();
        last.sql.clear();
        last.sql.push_str(sql);
        last.args.clear();
        last.args.extend_from_slice(args);
    }

    fn surface(&self, error: Error) -> Error {
        if let Some(hook) = &self.hooks.exception {
            hook(&error);
        } else {
            error!(error = %error, command = %self.last_command(), "database operation failed");
        }
        error
    }

    // ------------------------------------------------------------------
    // Command execution
    // ------------------------------------------------------------------

    fn run_command<R>(
        &self,
        sql: &str,
        args: &[Value],
        op: impl Fn(&mut dyn crate::connection::Connection) -> Result<R>,
    ) -> Result<R> {
        self.remember(sql, args);
        if let Some(hook) = &self.hooks.executing {
            hook(sql, args.len());
        }
        trace!(sql, params = args.len(), "executing");
        let result = self
            .command_retry
            .run(|| self.scope.with_connection(|conn| op(conn)));
        match result {
            Ok(value) => {
                if let Some(hook) = &self.hooks.executed {
                    hook(sql, args.len());
                }
                Ok(value)
            }
            Err(e) => Err(self.surface(e)),
        }
    }

    fn run_query(&self, sql: &str, args: &[Value]) -> Result<QueryOutput> {
        self.run_command(sql, args, |conn| conn.query(sql, args))
    }

    /// Execute a non-query statement, returning the affected-row count
    pub fn execute(&self, sql: &str, args: &[Value]) -> Result<u64> {
        let (sql, args) = expand(sql, args)?;
        self.run_command(&sql, &args, |conn| conn.execute(&sql, &args))
    }

    /// Execute a query and read the first column of the first row.
    ///
    /// An empty result reads as NULL, so scalar destinations fail and
    /// `Option` destinations yield `None`.
    pub fn execute_scalar<S: FromValue>(&self, sql: &str, args: &[Value]) -> Result<S> {
        let (sql, args) = expand(sql, args)?;
        let output = self.run_query(&sql, &args)?;
        mapper::scalar_from_row(output.rows.into_iter().next().unwrap_or_default())
            .map_err(|e| self.surface(e))
    }

    // ------------------------------------------------------------------
    // Typed fetch
    // ------------------------------------------------------------------

    /// Fetch every row as a `T`, eagerly
    pub fn fetch<T: Entity>(&self, sql: &str, args: &[Value]) -> Result<Vec<T>> {
        let sql = self.auto_select::<T>(sql);
        let (sql, args) = expand(&sql, args)?;
        let output = self.run_query(&sql, &args)?;
        self.materialize_all(&sql, output)
    }

    /// Fetch rows without a destination type, as name-addressable [`Row`]s
    pub fn fetch_rows(&self, sql: &str, args: &[Value]) -> Result<Vec<Row>> {
        let (sql, args) = expand(sql, args)?;
        let output = self.run_query(&sql, &args)?;
        let header = output.columns;
        Ok(output
            .rows
            .into_iter()
            .map(|values| Row::new(Arc::clone(&header), values))
            .collect())
    }

    /// First row as a `T`; an empty result is an error
    pub fn first<T: Entity>(&self, sql: &str, args: &[Value]) -> Result<T> {
        self.first_or_none(sql, args)?
            .ok_or_else(|| self.surface(Error::data("query returned no rows")))
    }

    /// First row as a `T`, or `None` on an empty result
    pub fn first_or_none<T: Entity>(&self, sql: &str, args: &[Value]) -> Result<Option<T>> {
        Ok(self.fetch(sql, args)?.into_iter().next())
    }

    /// Exactly one row as a `T`; zero or several rows are errors
    pub fn single<T: Entity>(&self, sql: &str, args: &[Value]) -> Result<T> {
        self.single_or_none(sql, args)?
            .ok_or_else(|| self.surface(Error::data("query returned no rows")))
    }

    /// At most one row as a `T`; several rows are an error
    pub fn single_or_none<T: Entity>(&self, sql: &str, args: &[Value]) -> Result<Option<T>> {
        let mut records = self.fetch(sql, args)?;
        if records.len() > 1 {
            return Err(self.surface(Error::data("query returned more than one row")));
        }
        Ok(records.pop())
    }

    /// Record with the given primary key, if present
    pub fn find<T: Entity>(&self, key: impl Into<Value>) -> Result<Option<T>> {
        let table = table_for::<T>();
        let sql = format!(
            "WHERE {} = @0",
            self.dialect.quote_identifier(&table.primary_key)
        );
        self.single_or_none(&sql, &[key.into()])
    }

    // ------------------------------------------------------------------
    // Single-record CRUD
    // ------------------------------------------------------------------

    /// Insert `record`, writing a database-assigned key back into it.
    ///
    /// Returns the primary-key value: the generated key for auto-increment
    /// tables (retrieved per the dialect's identity form), the record's own
    /// key otherwise. A declared sequence is inlined as the dialect's
    /// next-value expression.
    pub fn insert<T: Entity>(&self, record: &mut T) -> Result<Value> {
        let table = table_for::<T>();
        let quoted_table = self.dialect.quote_identifier(&table.name);

        let mut names = Vec::new();
        let mut markers = Vec::new();
        let mut args = Vec::new();
        if let Some(sequence) = &table.sequence {
            if let Some(expr) = self.dialect.sequence_next_value(sequence) {
                names.push(self.dialect.quote_identifier(&table.primary_key));
                markers.push(expr);
            }
        }
        for column in table.insert_columns() {
            names.push(self.dialect.quote_identifier(&column.name));
            markers.push(self.dialect.placeholder(args.len()));
            args.push((column.get)(record));
        }
        if names.is_empty() {
            return Err(Error::metadata(format!(
                "table '{}' declares no insertable columns",
                table.name
            )));
        }
        let insert = format!(
            "INSERT INTO {quoted_table} ({}) VALUES ({})",
            names.join(", "),
            markers.join(", ")
        );

        if !table.auto_increment {
            self.run_command(&insert, &args, |conn| conn.execute(&insert, &args))?;
            debug!(table = %table.name, "record inserted");
            return table.pk_value(record);
        }

        let id = match self.dialect.identity_form() {
            IdentityForm::AppendedSelect(select) => {
                let batch = format!("{insert};\n{select}");
                let output = self.run_command(&batch, &args, |conn| conn.query(&batch, &args))?;
                let id: i64 =
                    mapper::scalar_from_row(output.rows.into_iter().next().unwrap_or_default())?;
                Value::Int64(id)
            }
            IdentityForm::Returning => {
                let sql = format!(
                    "{insert} RETURNING {}",
                    self.dialect.quote_identifier(&table.primary_key)
                );
                let output = self.run_command(&sql, &args, |conn| conn.query(&sql, &args))?;
                let id: i64 =
                    mapper::scalar_from_row(output.rows.into_iter().next().unwrap_or_default())?;
                Value::Int64(id)
            }
            IdentityForm::LastRowId => {
                let id = self.run_command(&insert, &args, |conn| {
                    conn.execute(&insert, &args)?;
                    conn.last_insert_id()
                })?;
                Value::Int64(id)
            }
        };

        if let Some(pk) = table.pk_column() {
            (pk.set)(record, id.clone()).map_err(|e| {
                Error::mapping(format!(
                    "writing generated key back to {}: {e}",
                    std::any::type_name::<T>()
                ))
            })?;
        }
        debug!(table = %table.name, id = ?id, "record inserted");
        Ok(id)
    }

    /// Update `record` by primary key, returning the affected-row count.
    /// The primary key and result-only columns stay out of the SET list.
    pub fn update<T: Entity>(&self, record: &T) -> Result<u64> {
        let table = table_for::<T>();
        let columns = table.update_columns();
        self.update_with(&table, record, &columns)
    }

    /// Update only the named columns of `record`. Unknown, primary-key, and
    /// result-only column names are metadata errors.
    pub fn update_only<T: Entity>(&self, record: &T, names: &[&str]) -> Result<u64> {
        let table = table_for::<T>();
        let mut columns = Vec::with_capacity(names.len());
        for name in names {
            let column = table.find(name).ok_or_else(|| {
                Error::metadata(format!(
                    "table '{}' does not declare column '{name}'",
                    table.name
                ))
            })?;
            if column.result_only || column.name.eq_ignore_ascii_case(&table.primary_key) {
                return Err(Error::metadata(format!(
                    "column '{}' of table '{}' cannot be updated",
                    column.name, table.name
                )));
            }
            columns.push(column);
        }
        self.update_with(&table, record, &columns)
    }

    fn update_with<T: Entity>(
        &self,
        table: &TableDescriptor<T>,
        record: &T,
        columns: &[&ColumnDescriptor<T>],
    ) -> Result<u64> {
        if columns.is_empty() {
            return Err(Error::metadata(format!(
                "table '{}' declares no updatable columns",
                table.name
            )));
        }
        let mut sets = Vec::with_capacity(columns.len());
        let mut args = Vec::with_capacity(columns.len() + 1);
        for column in columns {
            sets.push(format!(
                "{} = {}",
                self.dialect.quote_identifier(&column.name),
                self.dialect.placeholder(args.len())
            ));
            args.push((column.get)(record));
        }
        let sql = format!(
            "UPDATE {} SET {} WHERE {} = {}",
            self.dialect.quote_identifier(&table.name),
            sets.join(", "),
            self.dialect.quote_identifier(&table.primary_key),
            self.dialect.placeholder(args.len())
        );
        args.push(table.pk_value(record)?);
        let affected = self.run_command(&sql, &args, |conn| conn.execute(&sql, &args))?;
        debug!(table = %table.name, affected, "record updated");
        Ok(affected)
    }

    /// Delete `record` by its primary-key value
    pub fn delete<T: Entity>(&self, record: &T) -> Result<u64> {
        let key = table_for::<T>().pk_value(record)?;
        self.delete_by_key::<T>(key)
    }

    /// Delete the row with the given primary key
    pub fn delete_by_key<T: Entity>(&self, key: impl Into<Value>) -> Result<u64> {
        let table = table_for::<T>();
        let sql = format!(
            "DELETE FROM {} WHERE {} = @0",
            self.dialect.quote_identifier(&table.name),
            self.dialect.quote_identifier(&table.primary_key)
        );
        let args = [key.into()];
        self.run_command(&sql, &args, |conn| conn.execute(&sql, &args))
    }

    /// Whether a row with the given primary key exists
    pub fn exists<T: Entity>(&self, key: impl Into<Value>) -> Result<bool> {
        let table = table_for::<T>();
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE {} = @0",
            self.dialect.quote_identifier(&table.name),
            self.dialect.quote_identifier(&table.primary_key)
        );
        let count: i64 = self.execute_scalar(&sql, &[key.into()])?;
        Ok(count != 0)
    }

    /// Whether `record` has never been saved: its primary key still holds
    /// the default value (NULL, zero, empty string, nil UUID)
    pub fn is_new<T: Entity>(&self, record: &T) -> Result<bool> {
        Ok(is_default_key(&table_for::<T>().pk_value(record)?))
    }

    /// Insert or update `record` depending on [`Self::is_new`]
    pub fn save<T: Entity>(&self, record: &mut T) -> Result<()> {
        if self.is_new(record)? {
            self.insert(record)?;
        } else {
            self.update(record)?;
        }
        Ok(())
    }

    /// Persist `record` against concurrent writers: try an update, insert if
    /// nothing matched, and on a constraint race fall back to update again.
    ///
    /// Dialect-portable upsert: the alternation runs at most four
    /// insert/update rounds after the initial update, then gives up with a
    /// data error. Under heavy contention the final winner may not reflect
    /// true write order.
    pub fn insert_or_update<T: Entity>(&self, record: &mut T) -> Result<Persisted> {
        self.upsert(record, None)
    }

    /// [`Self::insert_or_update`] with a caller-supplied update clause
    /// (everything after `UPDATE <table>`), for updates keyed on something
    /// other than the primary key
    pub fn insert_or_update_with<T: Entity>(
        &self,
        record: &mut T,
        update_clause: &str,
        update_args: &[Value],
    ) -> Result<Persisted> {
        self.upsert(record, Some((update_clause, update_args)))
    }

    fn upsert<T: Entity>(
        &self,
        record: &mut T,
        custom: Option<(&str, &[Value])>,
    ) -> Result<Persisted> {
        if self.update_arm(record, custom)? > 0 {
            return Ok(Persisted::Updated);
        }
        let mut round = 0;
        loop {
            match self.insert(record) {
                Ok(_) => return Ok(Persisted::Inserted),
                Err(e) if e.category() == ErrorCategory::Constraint => {
                    debug!(round, error = %e, "insert raced a concurrent writer, retrying as update");
                    if self.update_arm(record, custom)? > 0 {
                        return Ok(Persisted::Updated);
                    }
                    round += 1;
                    if round == UPSERT_ROUNDS {
                        return Err(Error::data("record could not be inserted or updated"));
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn update_arm<T: Entity>(&self, record: &T, custom: Option<(&str, &[Value])>) -> Result<u64> {
        match custom {
            Some((clause, args)) => {
                let table = table_for::<T>();
                let sql = format!(
                    "UPDATE {} {clause}",
                    self.dialect.quote_identifier(&table.name)
                );
                self.execute(&sql, args)
            }
            None => self.update(record),
        }
    }

    // ------------------------------------------------------------------
    // Paging
    // ------------------------------------------------------------------

    /// Fetch page `page` (1-based) of `per_page` rows, along with the total
    /// row and page counts of the unpaged query
    pub fn page<T: Entity>(
        &self,
        page: u64,
        per_page: u64,
        sql: &str,
        args: &[Value],
    ) -> Result<Page<T>> {
        if per_page == 0 {
            return Err(Error::parameter("page size must be greater than zero"));
        }
        let skip = page
            .checked_sub(1)
            .ok_or_else(|| Error::parameter("page number is 1-based"))?
            .checked_mul(per_page)
            .ok_or_else(|| Error::parameter("paging argument out of range"))?;
        let (queries, count_args, page_args) = self.paged_queries::<T>(skip, per_page, sql, args)?;

        let output = self.run_query(&queries.count_sql, &count_args)?;
        let total_items: i64 =
            mapper::scalar_from_row(output.rows.into_iter().next().unwrap_or_default())
                .map_err(|e| self.surface(e))?;
        let total_items = u64::try_from(total_items).unwrap_or(0);
        let total_pages = paging::total_pages(total_items, per_page)?;

        let output = self.run_query(&queries.page_sql, &page_args)?;
        let items = self.materialize_all(&queries.page_sql, output)?;
        Ok(Page {
            current_page: page,
            items_per_page: per_page,
            total_items,
            total_pages,
            items,
        })
    }

    /// Fetch the window of `take` rows after skipping `skip`
    pub fn skip_take<T: Entity>(
        &self,
        skip: u64,
        take: u64,
        sql: &str,
        args: &[Value],
    ) -> Result<Vec<T>> {
        let (queries, _, page_args) = self.paged_queries::<T>(skip, take, sql, args)?;
        let output = self.run_query(&queries.page_sql, &page_args)?;
        self.materialize_all(&queries.page_sql, output)
    }

    fn paged_queries<T: Entity>(
        &self,
        skip: u64,
        take: u64,
        sql: &str,
        args: &[Value],
    ) -> Result<(paging::PageQueries, Vec<Value>, Vec<Value>)> {
        let sql = self.auto_select::<T>(sql);
        let (sql, flat) = expand(&sql, args)?;
        let count_args = flat.clone();
        let mut page_args = flat;
        let queries = paging::build_page_queries(self.dialect, skip, take, &sql, &mut page_args)?;
        Ok((queries, count_args, page_args))
    }

    // ------------------------------------------------------------------
    // Multi-segment fetch
    // ------------------------------------------------------------------

    /// Fetch a two-segment joined result as `(A, Option<B>)` pairs; an
    /// all-null right segment (unmatched outer join) yields `None`
    pub fn fetch_two<A, B>(&self, sql: &str, args: &[Value]) -> Result<Vec<(A, Option<B>)>>
    where
        A: Entity,
        B: Entity,
    {
        self.fetch_two_with(|a, b| (a, b), sql, args)
    }

    /// Fetch a two-segment joined result through a combiner
    pub fn fetch_two_with<A, B, R, F>(
        &self,
        mut combine: F,
        sql: &str,
        args: &[Value],
    ) -> Result<Vec<R>>
    where
        A: Entity,
        B: Entity,
        F: FnMut(A, Option<B>) -> R,
    {
        let (sql, args) = expand(sql, args)?;
        let output = self.run_query(&sql, &args)?;
        let a_set = table_for::<A>().column_name_set();
        let b_set = table_for::<B>().column_name_set();
        let boundary = mapper::split_boundary(&output.columns, &a_set, &b_set, 0)
            .map_err(|e| self.surface(e))?;

        let shape = self.shape_for(&sql, &output.columns);
        let plan_a = mapper::materializer_for::<A>(&shape.window(0, boundary));
        let plan_b =
            mapper::materializer_for::<B>(&shape.window(boundary, output.columns.len() - boundary));
        output
            .rows
            .iter()
            .map(|row| {
                let a = plan_a.materialize(row)?;
                let b = (!plan_b.window_is_null(row))
                    .then(|| plan_b.materialize(row))
                    .transpose()?;
                Ok(combine(a, b))
            })
            .collect::<Result<Vec<R>>>()
            .map_err(|e| self.surface(e))
    }

    /// Fetch a three-segment joined result as `(A, Option<B>, Option<C>)`
    /// triples; all-null trailing segments yield `None`
    pub fn fetch_three<A, B, C>(
        &self,
        sql: &str,
        args: &[Value],
    ) -> Result<Vec<(A, Option<B>, Option<C>)>>
    where
        A: Entity,
        B: Entity,
        C: Entity,
    {
        self.fetch_three_with(|a, b, c| (a, b, c), sql, args)
    }

    /// Fetch a three-segment joined result through a combiner
    pub fn fetch_three_with<A, B, C, R, F>(
        &self,
        mut combine: F,
        sql: &str,
        args: &[Value],
    ) -> Result<Vec<R>>
    where
        A: Entity,
        B: Entity,
        C: Entity,
        F: FnMut(A, Option<B>, Option<C>) -> R,
    {
        let (sql, args) = expand(sql, args)?;
        let output = self.run_query(&sql, &args)?;
        let a_set = table_for::<A>().column_name_set();
        let b_set = table_for::<B>().column_name_set();
        let c_set = table_for::<C>().column_name_set();
        let first = mapper::split_boundary(&output.columns, &a_set, &b_set, 0)
            .map_err(|e| self.surface(e))?;
        let second = mapper::split_boundary(&output.columns, &b_set, &c_set, first)
            .map_err(|e| self.surface(e))?;

        let shape = self.shape_for(&sql, &output.columns);
        let plan_a = mapper::materializer_for::<A>(&shape.window(0, first));
        let plan_b = mapper::materializer_for::<B>(&shape.window(first, second - first));
        let plan_c =
            mapper::materializer_for::<C>(&shape.window(second, output.columns.len() - second));
        output
            .rows
            .iter()
            .map(|row| {
                let a = plan_a.materialize(row)?;
                let b = (!plan_b.window_is_null(row))
                    .then(|| plan_b.materialize(row))
                    .transpose()?;
                let c = (!plan_c.window_is_null(row))
                    .then(|| plan_c.materialize(row))
                    .transpose()?;
                Ok(combine(a, b, c))
            })
            .collect::<Result<Vec<R>>>()
            .map_err(|e| self.surface(e))
    }

    // ------------------------------------------------------------------
    // Bulk insert
    // ------------------------------------------------------------------

    /// Insert many records through the fastest facility the connection
    /// offers, returning the count inserted.
    ///
    /// Batches are never retried; run inside a transaction for atomicity.
    pub fn insert_bulk<T: Entity>(&self, records: Vec<T>) -> Result<u64> {
        let allow_copy = self.config.allow_bulk_copy;
        let dialect = self.dialect;
        let result = self
            .scope
            .with_connection(|conn| bulk::insert_records(conn, dialect, allow_copy, records));
        match result {
            Ok((inserted, path)) => {
                debug!(inserted, path = ?path, "bulk insert complete");
                Ok(inserted)
            }
            Err(e) => Err(self.surface(e)),
        }
    }

    // ------------------------------------------------------------------
    // Transactions and schema
    // ------------------------------------------------------------------

    /// Begin a unit of work at the default isolation level
    pub fn transaction(&self) -> Result<Transaction<'_>> {
        self.scope.transaction(IsolationLevel::default())
    }

    /// Begin a unit of work at `level`
    pub fn transaction_with(&self, level: IsolationLevel) -> Result<Transaction<'_>> {
        self.scope.transaction(level)
    }

    /// Whether a transaction is active on this database's scope
    pub fn in_transaction(&self) -> bool {
        self.scope.in_transaction()
    }

    /// Whether `table` exists in the target database
    pub fn table_exists(&self, table: &str) -> Result<bool> {
        let sql = self.dialect.table_exists_sql(table);
        self.execute_scalar(&sql, &[])
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    /// Expand a fragment that lacks its SELECT clause from the destination
    /// type's descriptor. A leading `;` escapes the expansion; statements
    /// already starting with SELECT, EXECUTE, or CALL pass through.
    fn auto_select<T: Entity>(&self, sql: &str) -> String {
        let trimmed = sql.trim_start();
        if let Some(rest) = trimmed.strip_prefix(';') {
            return rest.to_string();
        }
        if !self.config.auto_select
            || leading_keyword(trimmed, "SELECT")
            || leading_keyword(trimmed, "EXECUTE")
            || leading_keyword(trimmed, "CALL")
        {
            return sql.to_string();
        }

        let table = table_for::<T>();
        let quoted_table = self.dialect.quote_identifier(&table.name);
        let columns = table
            .columns
            .iter()
            .filter(|c| !c.result_only)
            .map(|c| format!("{quoted_table}.{}", self.dialect.quote_identifier(&c.name)))
            .collect::<Vec<_>>()
            .join(", ");
        if leading_keyword(trimmed, "FROM") {
            format!("SELECT {columns} {sql}")
        } else {
            format!("SELECT {columns} FROM {quoted_table} {sql}")
        }
    }

    fn shape_for<'a>(&'a self, sql: &'a str, columns: &'a [String]) -> RowShape<'a> {
        RowShape::full(
            sql,
            self.scope.connection_identity(),
            self.config.force_utc,
            columns,
        )
    }

    fn materialize_all<T: Entity>(&self, sql: &str, output: QueryOutput) -> Result<Vec<T>> {
        let plan = mapper::materializer_for::<T>(&self.shape_for(sql, &output.columns));
        output
            .rows
            .into_iter()
            .map(|row| plan.materialize(&row).map_err(|e| self.surface(e)))
            .collect()
    }
}

fn expand(sql: &str, args: &[Value]) -> Result<(String, Vec<Value>)> {
    let mut flat = Vec::with_capacity(args.len());
    let text = params::process(sql, args, &[], &mut flat)?;
    Ok((text, flat))
}

fn leading_keyword(sql: &str, word: &str) -> bool {
    // Byte-wise prefix match; the boundary at `word.len()` is only sliced
    // once the prefix is known to be ASCII.
    sql.len() > word.len()
        && sql.as_bytes()[..word.len()].eq_ignore_ascii_case(word.as_bytes())
        && sql[word.len()..].starts_with(|c: char| c.is_whitespace())
}

/// Whether a primary-key value still holds its unsaved default
fn is_default_key(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Int8(n) => *n == 0,
        Value::Int16(n) => *n == 0,
        Value::Int32(n) => *n == 0,
        Value::Int64(n) => *n == 0,
        Value::String(s) => s.is_empty(),
        Value::Uuid(u) => u.is_nil(),
        Value::Decimal(d) => d.is_zero(),
        _ => false,
    }
}

fn format_command(sql: &str, args: &[Value]) -> String {
    let mut out = String::from(sql);
    for (index, arg) in args.iter().enumerate() {
        out.push_str(&format!("\n\t -> @{index} = {arg:?}"));
    }
    out
}
