//! Prepared statement handles and lazy row iteration.
//!
//! A [`Statement`] owns one compiled engine statement. Every execution starts with an implicit
//! reset, so a handle can be reused any number of times; starting a new execution silently
//! ends any [`Rows`] iterator still reading the previous one.
//!
//! Parameters passed to an execution are bound fresh for that execution. [`Statement::bind`]
//! instead fixes a set of parameters for the handle's lifetime, after which executions must
//! be called with no parameters.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::iter::FusedIterator;
use std::rc::{Rc, Weak};
use std::sync::Arc;

use tracing::{debug, trace};

use crate::connection::DatabaseInner;
use crate::error::{SqliteError, SqliteResult};
use crate::params::{Params, parameter_name};
use crate::raw::{RawStatement, changes};
use crate::row::{FromRow, Row};
use crate::types::{Value, from_storage, to_storage};

/// A prepared statement.
///
/// Cloning is cheap and yields another handle to the same compiled statement.
#[derive(Clone)]
pub struct Statement {
    inner: Rc<StatementInner>,
}

pub(crate) struct StatementInner {
    id: u64,
    db: Weak<DatabaseInner>,
    sql: String,
    raw: RefCell<Option<RawStatement>>,
    readonly: bool,
    param_names: Vec<Option<String>>,
    columns: Arc<[String]>,
    bound: Cell<bool>,
    execution: Cell<u64>,
    wide_integers: Cell<bool>,
}

impl StatementInner {
    /// Release the engine statement. Returns false if it was already released.
    pub(crate) fn finalize_raw(&self) -> bool {
        let raw = self.raw.borrow_mut().take();
        self.execution.set(self.execution.get().wrapping_add(1));
        raw.is_some()
    }
}

impl Drop for StatementInner {
    fn drop(&mut self) {
        if let Some(db) = self.db.upgrade() {
            db.forget_statement(self.id);
        }
    }
}

impl Statement {
    pub(crate) fn new(db: &Rc<DatabaseInner>, raw: RawStatement, sql: &str) -> Self {
        let param_names = (1..=raw.parameter_count())
            .map(|i| raw.parameter_name(i))
            .collect();
        let inner = Rc::new(StatementInner {
            id: db.next_statement_id(),
            db: Rc::downgrade(db),
            sql: sql.to_string(),
            readonly: raw.readonly(),
            param_names,
            columns: raw.column_names().into(),
            raw: RefCell::new(Some(raw)),
            bound: Cell::new(false),
            execution: Cell::new(0),
            wide_integers: Cell::new(db.wide_integers()),
        });
        db.register_statement(inner.id, Rc::downgrade(&inner));
        Self { inner }
    }

    /// The SQL text this statement was prepared from.
    pub fn sql(&self) -> &str {
        &self.inner.sql
    }

    /// Whether the statement leaves the database unchanged.
    pub fn readonly(&self) -> bool {
        self.inner.readonly
    }

    /// Number of parameter slots.
    pub fn param_count(&self) -> usize {
        self.inner.param_names.len()
    }

    /// Parameter names including sigils, by slot. Anonymous `?` slots are `None`.
    pub fn param_names(&self) -> &[Option<String>] {
        &self.inner.param_names
    }

    /// Result column names, in order.
    pub fn column_names(&self) -> &[String] {
        &self.inner.columns
    }

    /// Number of result columns.
    pub fn column_count(&self) -> usize {
        self.inner.columns.len()
    }

    pub fn is_finalized(&self) -> bool {
        self.inner.raw.borrow().is_none()
    }

    /// Whether parameters have been fixed with [`bind`](Self::bind).
    pub fn is_bound(&self) -> bool {
        self.inner.bound.get()
    }

    pub fn wide_integers(&self) -> bool {
        self.inner.wide_integers.get()
    }

    /// Choose how integers outside the safe range are read by later executions.
    pub fn set_wide_integers(&self, enabled: bool) {
        self.inner.wide_integers.set(enabled);
    }

    fn with_raw<R>(&self, f: impl FnOnce(&RawStatement) -> SqliteResult<R>) -> SqliteResult<R> {
        let raw = self.inner.raw.borrow();
        let raw = raw
            .as_ref()
            .ok_or_else(|| SqliteError::state("statement has been finalized"))?;
        match self.inner.db.upgrade() {
            Some(db) if db.is_open() => {}
            _ => return Err(SqliteError::state("database is closed")),
        }
        f(raw)
    }

    fn next_execution(&self) -> u64 {
        let next = self.inner.execution.get().wrapping_add(1);
        self.inner.execution.set(next);
        next
    }

    fn apply(&self, raw: &RawStatement, params: &Params) -> SqliteResult<()> {
        match params {
            Params::None => Ok(()),
            Params::Positional(values) => {
                let slots = raw.parameter_count();
                if values.len() > slots {
                    return Err(SqliteError::bind(format!(
                        "statement has {} parameter slot(s), {} value(s) supplied",
                        slots,
                        values.len()
                    )));
                }
                for (i, value) in values.iter().enumerate() {
                    raw.bind(i + 1, &to_storage(value))?;
                }
                Ok(())
            }
            Params::Named(values) => {
                for (key, value) in values {
                    let name = parameter_name(key);
                    let index = raw.parameter_index(&name)?.ok_or_else(|| {
                        SqliteError::bind(format!("statement has no parameter named {}", name))
                    })?;
                    raw.bind(index, &to_storage(value))?;
                }
                Ok(())
            }
        }
    }

    /// Start a new execution: reset, then rebind unless parameters are fixed.
    fn begin(&self, raw: &RawStatement, params: &Params) -> SqliteResult<()> {
        let bound = self.inner.bound.get();
        if bound && !params.is_empty() {
            return Err(SqliteError::state(
                "parameters are fixed by bind(); execute without parameters",
            ));
        }

        raw.reset();
        self.next_execution();
        if !bound {
            raw.clear_bindings();
            self.apply(raw, params)?;
        }
        Ok(())
    }

    fn read_values(&self, raw: &RawStatement) -> Vec<Value> {
        let wide = self.inner.wide_integers.get();
        (0..raw.column_count())
            .map(|i| from_storage(raw.column_value(i), wide))
            .collect()
    }

    fn read_row(&self, raw: &RawStatement) -> Row {
        let values = self.read_values(raw);
        let columns = if values.len() == self.inner.columns.len() {
            Arc::clone(&self.inner.columns)
        } else {
            raw.column_names().into()
        };
        Row::new(columns, values)
    }

    fn collect<T>(
        &self,
        params: Params,
        mut map: impl FnMut(&RawStatement) -> T,
    ) -> SqliteResult<Vec<T>> {
        self.with_raw(|raw| {
            self.begin(raw, &params)?;
            trace!(sql = %self.inner.sql, "Stepping statement to completion");
            let mut rows = Vec::new();
            let outcome = loop {
                match raw.step() {
                    Ok(true) => rows.push(map(raw)),
                    Ok(false) => break Ok(()),
                    Err(e) => break Err(e),
                }
            };
            raw.reset();
            outcome.map(|()| rows)
        })
    }

    fn first<T>(
        &self,
        params: Params,
        map: impl FnOnce(&RawStatement) -> T,
    ) -> SqliteResult<Option<T>> {
        self.with_raw(|raw| {
            self.begin(raw, &params)?;
            let outcome = raw.step().map(|has_row| has_row.then(|| map(raw)));
            raw.reset();
            outcome
        })
    }

    /// Fix parameters for every later execution. May be called once per statement.
    pub fn bind(&self, params: impl Into<Params>) -> SqliteResult<()> {
        let params = params.into();
        self.with_raw(|raw| {
            if self.inner.bound.get() {
                return Err(SqliteError::state("statement parameters are already bound"));
            }
            raw.reset();
            self.next_execution();
            raw.clear_bindings();
            self.apply(raw, &params)?;
            self.inner.bound.set(true);
            debug!(sql = %self.inner.sql, params = params.len(), "Bound statement parameters");
            Ok(())
        })
    }

    /// Execute to completion, discarding rows. Returns the number of rows changed.
    pub fn run(&self, params: impl Into<Params>) -> SqliteResult<u64> {
        let params = params.into();
        self.with_raw(|raw| {
            self.begin(raw, &params)?;
            trace!(sql = %self.inner.sql, "Running statement");
            let outcome = loop {
                match raw.step() {
                    Ok(true) => continue,
                    Ok(false) => break Ok(()),
                    Err(e) => break Err(e),
                }
            };
            raw.reset();
            outcome?;
            Ok(if raw.readonly() { 0 } else { changes(raw.db()) })
        })
    }

    /// Execute and collect every row.
    pub fn all(&self, params: impl Into<Params>) -> SqliteResult<Vec<Row>> {
        self.collect(params.into(), |raw| self.read_row(raw))
    }

    /// Execute and collect every row as positional values.
    pub fn values(&self, params: impl Into<Params>) -> SqliteResult<Vec<Vec<Value>>> {
        self.collect(params.into(), |raw| self.read_values(raw))
    }

    /// Execute and return the first row, if any. Remaining rows are discarded.
    pub fn get(&self, params: impl Into<Params>) -> SqliteResult<Option<Row>> {
        self.first(params.into(), |raw| self.read_row(raw))
    }

    /// Execute and return the first column of the first row.
    ///
    /// `None` when there are no rows or the statement has no result columns.
    pub fn value(&self, params: impl Into<Params>) -> SqliteResult<Option<Value>> {
        let wide = self.inner.wide_integers.get();
        let value = self.first(params.into(), |raw| {
            (raw.column_count() > 0).then(|| from_storage(raw.column_value(0), wide))
        })?;
        Ok(value.flatten())
    }

    /// Execute and convert every row.
    pub fn all_as<T: FromRow>(&self, params: impl Into<Params>) -> SqliteResult<Vec<T>> {
        self.all(params)?.into_iter().map(T::from_row).collect()
    }

    /// Execute and convert the first row.
    pub fn get_as<T: FromRow>(&self, params: impl Into<Params>) -> SqliteResult<Option<T>> {
        self.get(params)?.map(T::from_row).transpose()
    }

    /// Start a lazy iteration over the result rows.
    ///
    /// Statements with parameter slots must have them fixed with [`bind`](Self::bind) first.
    pub fn iter(&self) -> SqliteResult<Rows<'_>> {
        let execution = self.with_raw(|raw| {
            if raw.parameter_count() > 0 && !self.inner.bound.get() {
                return Err(SqliteError::state(
                    "statement has parameters; bind() them before iterating",
                ));
            }
            self.begin(raw, &Params::None)?;
            Ok(self.inner.execution.get())
        })?;
        Ok(Rows {
            statement: self,
            execution,
            done: false,
        })
    }

    /// Abandon the current execution, ending any outstanding iterator. Bindings are kept.
    pub fn reset(&self) -> SqliteResult<()> {
        self.with_raw(|raw| {
            raw.reset();
            self.next_execution();
            Ok(())
        })
    }

    /// SQL text with the current bindings substituted.
    pub fn expanded_sql(&self) -> SqliteResult<String> {
        self.with_raw(|raw| {
            raw.expanded_sql()
                .ok_or_else(|| SqliteError::state("expanded SQL is unavailable"))
        })
    }

    /// Release the compiled statement. Every later call on any clone fails with a state error.
    pub fn finalize(&self) -> SqliteResult<()> {
        if !self.inner.finalize_raw() {
            return Err(SqliteError::state("statement has already been finalized"));
        }
        if let Some(db) = self.inner.db.upgrade() {
            db.forget_statement(self.inner.id);
        }
        debug!(sql = %self.inner.sql, "Finalized statement");
        Ok(())
    }
}

impl fmt::Debug for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Statement")
            .field("sql", &self.inner.sql)
            .field("bound", &self.inner.bound.get())
            .field("finalized", &self.is_finalized())
            .finish()
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inner.sql)
    }
}

/// Lazy, single-pass iterator over a statement's rows.
///
/// Rows are produced one engine step at a time. The iterator ends early, without error, if
/// the statement is re-executed, reset or finalized while it is outstanding.
pub struct Rows<'stmt> {
    statement: &'stmt Statement,
    execution: u64,
    done: bool,
}

impl Rows<'_> {
    fn step(&self) -> SqliteResult<Option<Row>> {
        self.statement.with_raw(|raw| match raw.step() {
            Ok(true) => Ok(Some(self.statement.read_row(raw))),
            Ok(false) => {
                raw.reset();
                Ok(None)
            }
            Err(e) => {
                raw.reset();
                Err(e)
            }
        })
    }
}

impl Iterator for Rows<'_> {
    type Item = SqliteResult<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.statement.inner.execution.get() != self.execution {
            self.done = true;
            return None;
        }
        match self.step() {
            Ok(Some(row)) => Some(Ok(row)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

impl FusedIterator for Rows<'_> {}
