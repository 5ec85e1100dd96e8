//! Ambient connection and transaction scope
//!
//! A [`ConnectionScope`] carries the shared connection and transaction state
//! for one logical unit of work. The shared connection is depth-counted:
//! opens nest, the physical handle closes when the count returns to zero
//! (unless keep-alive holds it). Transactions nest the same way: only the
//! outermost completion commits or rolls back, and an abort anywhere in the
//! stack poisons the whole unit. A nested begin may not request a stricter
//! isolation level than the active transaction.
//!
//! The scope is `Send` but not `Sync`: state lives in single-thread cells,
//! and each unit of work must own its own scope.

use std::cell::{Cell, RefCell};
use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::connection::{Connection, DatabaseConfig, Driver, IsolationLevel};
use crate::error::{Error, ErrorCategory, Result};
use crate::retry::RetryPolicy;

/// Shared connection plus nested transaction state for one unit of work
pub struct ConnectionScope {
    driver: Arc<dyn Driver>,
    config: DatabaseConfig,
    connect_retry: RetryPolicy,
    connection: RefCell<Option<Box<dyn Connection>>>,
    connection_depth: Cell<usize>,
    transaction_depth: Cell<usize>,
    transaction_aborted: Cell<bool>,
    active_isolation: Cell<Option<IsolationLevel>>,
}

impl ConnectionScope {
    /// Create a scope; no connection is opened until first use
    pub fn new(driver: Arc<dyn Driver>, config: DatabaseConfig, connect_retry: RetryPolicy) -> Self {
        Self {
            driver,
            config,
            connect_retry,
            connection: RefCell::new(None),
            connection_depth: Cell::new(0),
            transaction_depth: Cell::new(0),
            transaction_aborted: Cell::new(false),
            active_isolation: Cell::new(None),
        }
    }

    /// Identity string for this scope's connection (keys caches and policies)
    pub fn connection_identity(&self) -> &str {
        self.config.connection_identity()
    }

    /// Current transaction nesting depth
    pub fn transaction_depth(&self) -> usize {
        self.transaction_depth.get()
    }

    /// Whether a transaction is active on this scope
    pub fn in_transaction(&self) -> bool {
        self.transaction_depth.get() > 0
    }

    /// Isolation level of the active transaction, if any
    pub fn active_isolation(&self) -> Option<IsolationLevel> {
        self.active_isolation.get()
    }

    fn connect(&self) -> Result<Box<dyn Connection>> {
        let connection = self
            .connect_retry
            .run(|| self.driver.connect(&self.config))?;
        debug!(
            driver = self.driver.name(),
            identity = self.connection_identity(),
            "connection opened"
        );
        Ok(connection)
    }

    /// Open the shared connection (nests; matched by [`Self::close_shared`])
    pub fn open_shared(&self) -> Result<()> {
        if self.connection_depth.get() == 0 {
            let mut slot = self
                .connection
                .try_borrow_mut()
                .map_err(|_| Error::state("connection scope re-entered while in use"))?;
            // A kept-alive connection may have gone stale between units of work.
            if let Some(existing) = slot.as_mut() {
                if !existing.is_valid() {
                    debug!("kept-alive connection is stale, reopening");
                    *slot = None;
                }
            }
            if slot.is_none() {
                let mut connection = self.connect()?;
                if self.config.command_timeout_ms > 0 {
                    connection.set_command_timeout(self.config.command_timeout())?;
                }
                *slot = Some(connection);
            }
        }
        self.connection_depth.set(self.connection_depth.get() + 1);
        Ok(())
    }

    /// Close one shared-connection reference; the physical handle drops at
    /// zero unless keep-alive or an active transaction holds it
    pub fn close_shared(&self) {
        let depth = self.connection_depth.get();
        if depth == 0 {
            error!("close_shared called with no open connection reference");
            return;
        }
        self.connection_depth.set(depth - 1);
        if depth - 1 == 0 && !self.config.keep_connection_alive && self.transaction_depth.get() == 0
        {
            if self.connection.borrow_mut().take().is_some() {
                debug!("connection closed");
            }
        }
    }

    /// Run `f` against the shared connection, opening and closing around it.
    ///
    /// `f` must not call back into this scope; re-entrant use is reported as
    /// a state error.
    pub fn with_connection<R>(
        &self,
        f: impl FnOnce(&mut dyn Connection) -> Result<R>,
    ) -> Result<R> {
        self.open_shared()?;
        let result = {
            let mut slot = match self.connection.try_borrow_mut() {
                Ok(slot) => slot,
                Err(_) => {
                    self.close_shared();
                    return Err(Error::state("connection scope re-entered while in use"));
                }
            };
            match slot.as_mut() {
                Some(connection) => f(connection.as_mut()),
                None => Err(Error::state("shared connection missing while open")),
            }
        };
        self.close_shared();

        if let Err(e) = &result {
            if e.category() == ErrorCategory::Connection {
                self.discard_if_broken();
            }
        }
        result
    }

    /// Drop a kept-alive connection that no longer responds, so the next use
    /// reopens. No-op while any reference or transaction holds it.
    pub(crate) fn discard_if_broken(&self) {
        if self.connection_depth.get() > 0 || self.transaction_depth.get() > 0 {
            return;
        }
        if let Ok(mut slot) = self.connection.try_borrow_mut() {
            let broken = slot.as_mut().is_some_and(|c| !c.is_valid());
            if broken {
                debug!("discarding broken connection");
                *slot = None;
            }
        }
    }

    /// Begin a transaction, nesting onto any active one.
    ///
    /// The first call opens the connection and starts the physical
    /// transaction; nested calls only join it, and fail if they request a
    /// stricter isolation level than the one in force.
    pub fn begin_transaction(&self, level: IsolationLevel) -> Result<()> {
        if self.transaction_depth.get() == 0 {
            self.open_shared()?;
            let begun = self.with_borrowed(|conn| conn.begin(level));
            if let Err(e) = begun {
                self.close_shared();
                return Err(e);
            }
            self.active_isolation.set(Some(level));
            self.transaction_aborted.set(false);
            debug!(isolation = %level, "transaction started");
        } else if let Some(active) = self.active_isolation.get() {
            if level > active {
                return Err(Error::state(format!(
                    "already in a transaction with a lower isolation level than requested \
                     (active {active}, requested {level})"
                )));
            }
        }
        self.transaction_depth.set(self.transaction_depth.get() + 1);
        Ok(())
    }

    /// Complete one transaction level; the outermost completion commits,
    /// unless an abort anywhere in the stack poisoned the unit of work
    pub fn complete_transaction(&self) -> Result<()> {
        match self.transaction_depth.get() {
            0 => Err(Error::state("complete_transaction without begin_transaction")),
            1 => self.finish_transaction(),
            n => {
                self.transaction_depth.set(n - 1);
                Ok(())
            }
        }
    }

    /// Abort the unit of work; the outermost completion rolls back
    pub fn abort_transaction(&self) -> Result<()> {
        self.transaction_aborted.set(true);
        match self.transaction_depth.get() {
            0 => Err(Error::state("abort_transaction without begin_transaction")),
            1 => self.finish_transaction(),
            n => {
                self.transaction_depth.set(n - 1);
                Ok(())
            }
        }
    }

    fn finish_transaction(&self) -> Result<()> {
        let aborted = self.transaction_aborted.get();
        let result = self.with_borrowed(|conn| {
            if aborted {
                warn!("unit of work aborted, rolling back");
                conn.rollback()
            } else {
                debug!("transaction committed");
                conn.commit()
            }
        });
        self.transaction_depth.set(0);
        self.active_isolation.set(None);
        self.transaction_aborted.set(false);
        self.close_shared();
        result
    }

    fn with_borrowed<R>(&self, f: impl FnOnce(&mut dyn Connection) -> Result<R>) -> Result<R> {
        let mut slot = self
            .connection
            .try_borrow_mut()
            .map_err(|_| Error::state("connection scope re-entered while in use"))?;
        match slot.as_mut() {
            Some(connection) => f(connection.as_mut()),
            None => Err(Error::state("no open connection for transaction control")),
        }
    }

    /// Begin a transaction guarded by RAII: dropping the guard without
    /// [`Transaction::complete`] aborts the unit of work
    pub fn transaction(&self, level: IsolationLevel) -> Result<Transaction<'_>> {
        self.begin_transaction(level)?;
        Ok(Transaction {
            scope: self,
            depth: self.transaction_depth.get(),
            done: false,
        })
    }
}

impl Drop for ConnectionScope {
    fn drop(&mut self) {
        if self.transaction_depth.get() > 0 {
            error!(
                depth = self.transaction_depth.get(),
                "scope dropped with an open transaction; rolling back"
            );
            self.transaction_aborted.set(true);
            let _ = self.finish_transaction();
        }
    }
}

/// RAII guard for one transaction level.
///
/// Guards form a strict stack: a parent may not be completed or aborted
/// while a child guard is still live.
pub struct Transaction<'a> {
    scope: &'a ConnectionScope,
    /// This guard's position in the transaction stack
    depth: usize,
    done: bool,
}

impl std::fmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("depth", &self.depth)
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

impl Transaction<'_> {
    /// Complete this level; commits when outermost and not poisoned
    pub fn complete(mut self) -> Result<()> {
        self.done = true;
        self.check_stack_position()?;
        self.scope.complete_transaction()
    }

    /// Abort the unit of work explicitly
    pub fn abort(mut self) -> Result<()> {
        self.done = true;
        self.check_stack_position()?;
        self.scope.abort_transaction()
    }

    /// Isolation level in force for the unit of work
    pub fn isolation(&self) -> Option<IsolationLevel> {
        self.scope.active_isolation()
    }

    fn check_stack_position(&self) -> Result<()> {
        let current = self.scope.transaction_depth();
        if current != self.depth {
            return Err(Error::state(format!(
                "transaction completed out of order: a nested transaction is still active \
                 (depth {current}, expected {})",
                self.depth
            )));
        }
        Ok(())
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        let current = self.scope.transaction_depth();
        if current < self.depth {
            error!("transaction guard dropped after its scope already unwound");
            return;
        }
        if current > self.depth {
            error!("transaction guard dropped while a nested transaction is still active");
        }
        if let Err(e) = self.scope.abort_transaction() {
            warn!(error = %e, "rollback on drop failed");
        }
    }
}
