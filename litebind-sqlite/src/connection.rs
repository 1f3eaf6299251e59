//! Database connections.
//!
//! A [`Database`] owns one engine connection and every statement prepared on it. Closing the
//! database finalizes those statements before the connection itself is released, so handles
//! still held by callers turn into state errors instead of dangling.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
use rusqlite::{Connection, ffi};
use tracing::{debug, info, instrument, trace, warn};

use crate::config::{MEMORY_PATH, OpenOptions};
use crate::error::{SqliteError, SqliteResult};
use crate::params::Params;
use crate::raw::{self, RawStatement};
use crate::statement::{Statement, StatementInner};
use crate::transaction::Transaction;

pub(crate) struct DatabaseInner {
    conn: RefCell<Option<Connection>>,
    path: String,
    options: OpenOptions,
    depth: Cell<u32>,
    next_statement_id: Cell<u64>,
    statements: RefCell<HashMap<u64, Weak<StatementInner>>>,
    /// Least recently used first.
    cache: RefCell<IndexMap<String, Statement>>,
    cache_capacity: Cell<usize>,
    rollback_error: RefCell<Option<SqliteError>>,
}

impl DatabaseInner {
    pub(crate) fn is_open(&self) -> bool {
        self.conn.borrow().is_some()
    }

    pub(crate) fn wide_integers(&self) -> bool {
        self.options.wide_integers
    }

    /// Raw engine handle. Valid while the connection stays open.
    pub(crate) fn handle(&self) -> SqliteResult<*mut ffi::sqlite3> {
        match self.conn.borrow().as_ref() {
            // SAFETY: the handle is only used while `conn` is held open by this struct.
            Some(conn) => Ok(unsafe { conn.handle() }),
            None => Err(SqliteError::state("database is closed")),
        }
    }

    pub(crate) fn next_statement_id(&self) -> u64 {
        let id = self.next_statement_id.get();
        self.next_statement_id.set(id + 1);
        id
    }

    pub(crate) fn register_statement(&self, id: u64, statement: Weak<StatementInner>) {
        self.statements.borrow_mut().insert(id, statement);
    }

    pub(crate) fn forget_statement(&self, id: u64) {
        if let Ok(mut statements) = self.statements.try_borrow_mut() {
            statements.remove(&id);
        }
    }

    fn close(&self) {
        if !self.is_open() {
            return;
        }

        let cached: Vec<Statement> = self.cache.borrow_mut().drain(..).map(|(_, s)| s).collect();
        drop(cached);

        let live: Vec<Rc<StatementInner>> = self
            .statements
            .borrow_mut()
            .drain()
            .filter_map(|(_, statement)| statement.upgrade())
            .collect();
        let finalized = live.iter().filter(|s| s.finalize_raw()).count();
        drop(live);

        if let Some(conn) = self.conn.borrow_mut().take() {
            if let Err((_, e)) = conn.close() {
                warn!(path = %self.path, error = %e, "SQLite connection did not close cleanly");
            }
        }
        self.depth.set(0);
        info!(path = %self.path, finalized, "SQLite database closed");
    }
}

impl Drop for DatabaseInner {
    fn drop(&mut self) {
        self.close();
    }
}

/// A connection to one database.
///
/// `Database` is single-threaded: it is neither `Send` nor `Sync`, and neither are the
/// statements prepared from it.
///
/// # Example
///
/// ```rust
/// use litebind_sqlite::{Database, Value, params};
///
/// let db = Database::open_in_memory()?;
/// db.exec("CREATE TABLE foo (bar TEXT)", ())?;
/// db.exec("INSERT INTO foo VALUES (?)", params!["baz"])?;
///
/// let row = db.query("SELECT * FROM foo")?.get(())?.unwrap();
/// assert_eq!(row["bar"], Value::Text("baz".into()));
/// # Ok::<(), litebind_sqlite::SqliteError>(())
/// ```
pub struct Database {
    inner: Rc<DatabaseInner>,
}

impl Database {
    /// Open a database file with default options.
    pub fn open(path: impl Into<String>) -> SqliteResult<Self> {
        Self::open_with(path, OpenOptions::default())
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> SqliteResult<Self> {
        Self::open_with(MEMORY_PATH, OpenOptions::memory())
    }

    /// Open a database with explicit options.
    #[instrument(skip_all)]
    pub fn open_with(path: impl Into<String>, options: OpenOptions) -> SqliteResult<Self> {
        let path = path.into();
        if path.contains('\0') {
            return Err(SqliteError::config("database path contains a NUL byte"));
        }
        let flags = options.open_flags()?;
        debug!(path = %path, flags = ?flags, "Opening SQLite database");

        let conn = Connection::open_with_flags(&path, flags)?;
        let cache_capacity = options.statement_cache_capacity;
        info!(path = %path, readonly = options.is_readonly(), "SQLite database opened");

        Ok(Self {
            inner: Rc::new(DatabaseInner {
                conn: RefCell::new(Some(conn)),
                path,
                options,
                depth: Cell::new(0),
                next_statement_id: Cell::new(0),
                statements: RefCell::new(HashMap::new()),
                cache: RefCell::new(IndexMap::new()),
                cache_capacity: Cell::new(cache_capacity),
                rollback_error: RefCell::new(None),
            }),
        })
    }

    /// Execute SQL text and return the number of rows changed by the last statement.
    ///
    /// Without parameters the text may hold any number of statements, run in order until one
    /// fails. With parameters it must hold exactly one.
    #[instrument(skip(self, sql, params), fields(sql_len = sql.len()))]
    pub fn exec(&self, sql: &str, params: impl Into<Params>) -> SqliteResult<u64> {
        let params = params.into();
        if !params.is_empty() {
            debug!(sql = %sql, params = params.len(), "Executing statement");
            let (statement, single) = self.compile(sql)?;
            if !single {
                return Err(SqliteError::bind(
                    "parameters can only be bound to SQL text holding a single statement",
                ));
            }
            return Statement::new(&self.inner, statement, sql).run(params);
        }

        debug!("Executing SQL batch");
        let db = self.inner.handle()?;
        let mut rest = sql;
        let mut changes = 0;
        while !rest.trim().is_empty() {
            let (statement, consumed) = RawStatement::prepare(db, rest)?;
            rest = rest.get(consumed..).unwrap_or_default();
            let Some(statement) = statement else {
                if consumed == 0 {
                    break;
                }
                continue;
            };
            while statement.step()? {}
            changes = if statement.readonly() { 0 } else { raw::changes(db) };
            trace!(changes, "Batch statement done");
        }
        Ok(changes)
    }

    /// Compile a single statement.
    ///
    /// Empty text and text holding more than one statement are rejected.
    #[instrument(skip(self), level = "debug")]
    pub fn prepare(&self, sql: &str) -> SqliteResult<Statement> {
        let (statement, single) = self.compile(sql)?;
        if !single {
            return Err(SqliteError::syntax(
                ffi::SQLITE_MISUSE,
                "SQL text holds more than one statement; use exec() for batches",
            ));
        }
        Ok(Statement::new(&self.inner, statement, sql))
    }

    /// Compile the first statement of `sql` and report whether nothing but whitespace or
    /// comments follows it.
    fn compile(&self, sql: &str) -> SqliteResult<(RawStatement, bool)> {
        let db = self.inner.handle()?;
        let (statement, consumed) = RawStatement::prepare(db, sql)?;
        let statement = statement
            .ok_or_else(|| SqliteError::syntax(ffi::SQLITE_MISUSE, "SQL text holds no statement"))?;
        let tail = sql.get(consumed..).unwrap_or_default();
        let single = matches!(RawStatement::prepare(db, tail), Ok((None, _)));
        Ok((statement, single))
    }

    /// Prepare through a per-connection cache keyed by SQL text.
    ///
    /// Repeated calls with the same text return the same handle, so state such as
    /// [`Statement::bind`] is shared between them. The cache holds at most
    /// [`statement_cache_capacity`](OpenOptions::statement_cache_capacity) statements and drops
    /// the least recently used one when full. Handles still held by callers stay usable after
    /// eviction.
    pub fn query(&self, sql: &str) -> SqliteResult<Statement> {
        let hit = self.inner.cache.borrow_mut().shift_remove(sql);
        let statement = match hit {
            Some(statement) if !statement.is_finalized() => {
                trace!(sql = %sql, "Using cached statement");
                statement
            }
            _ => self.prepare(sql)?,
        };
        self.cache_insert(sql, statement.clone());
        Ok(statement)
    }

    fn cache_insert(&self, sql: &str, statement: Statement) {
        let capacity = self.inner.cache_capacity.get();
        if capacity == 0 {
            return;
        }
        let mut cache = self.inner.cache.borrow_mut();
        while cache.len() >= capacity {
            if let Some((evicted, _)) = cache.shift_remove_index(0) {
                debug!(sql = %evicted, "Evicting cached statement");
            }
        }
        cache.insert(sql.to_string(), statement);
    }

    /// Number of statements held by the [`query`](Self::query) cache.
    pub fn cached_statements(&self) -> usize {
        self.inner.cache.borrow().len()
    }

    pub fn statement_cache_capacity(&self) -> usize {
        self.inner.cache_capacity.get()
    }

    /// Change the cache capacity, evicting the least recently used statements that no longer fit.
    pub fn set_statement_cache_capacity(&self, capacity: usize) {
        self.inner.cache_capacity.set(capacity);
        let evicted: Vec<(String, Statement)> = {
            let mut cache = self.inner.cache.borrow_mut();
            let excess = cache.len().saturating_sub(capacity);
            cache.drain(..excess).collect()
        };
        if !evicted.is_empty() {
            debug!(evicted = evicted.len(), capacity, "Shrunk statement cache");
        }
    }

    /// Wrap `body` into a reusable transactional function.
    ///
    /// See [`Transaction`] for the nesting and rollback rules.
    pub fn transaction<A, T, F>(&self, body: F) -> Transaction<'_, F>
    where
        F: FnMut(&Database, A) -> SqliteResult<T>,
    {
        Transaction::new(self, body)
    }

    /// Close the connection. Finalizes every statement first. Safe to call more than once.
    pub fn close(&self) {
        self.inner.close();
    }

    pub fn is_open(&self) -> bool {
        self.inner.is_open()
    }

    /// Path the database was opened with.
    pub fn path(&self) -> &str {
        &self.inner.path
    }

    pub fn options(&self) -> &OpenOptions {
        &self.inner.options
    }

    pub fn is_readonly(&self) -> bool {
        self.inner.options.is_readonly()
    }

    pub fn wide_integers(&self) -> bool {
        self.inner.wide_integers()
    }

    /// Rows changed by the most recent INSERT, UPDATE or DELETE.
    pub fn changes(&self) -> SqliteResult<u64> {
        self.inner.handle().map(raw::changes)
    }

    /// Rows changed since the connection was opened.
    pub fn total_changes(&self) -> SqliteResult<u64> {
        self.inner.handle().map(raw::total_changes)
    }

    /// Rowid of the most recent successful INSERT.
    pub fn last_insert_rowid(&self) -> SqliteResult<i64> {
        match self.inner.conn.borrow().as_ref() {
            Some(conn) => Ok(conn.last_insert_rowid()),
            None => Err(SqliteError::state("database is closed")),
        }
    }

    /// Whether the engine is outside any explicit transaction. True once closed.
    pub fn is_autocommit(&self) -> bool {
        self.inner
            .conn
            .borrow()
            .as_ref()
            .is_none_or(Connection::is_autocommit)
    }

    /// Whether an explicit transaction is open.
    pub fn in_transaction(&self) -> bool {
        !self.is_autocommit()
    }

    /// Number of transaction frames currently open through [`transaction`](Self::transaction).
    pub fn transaction_depth(&self) -> u32 {
        self.inner.depth.get()
    }

    pub(crate) fn set_transaction_depth(&self, depth: u32) {
        self.inner.depth.set(depth);
    }

    /// Take the most recent rollback failure.
    ///
    /// When a transaction frame fails and its rollback fails too, the frame returns the original
    /// error and keeps the rollback failure here as the secondary error. It is also logged at
    /// `error` level. A later rollback failure replaces an untaken one.
    pub fn take_rollback_error(&self) -> Option<SqliteError> {
        self.inner.rollback_error.borrow_mut().take()
    }

    pub(crate) fn record_rollback_error(&self, error: SqliteError) {
        *self.inner.rollback_error.borrow_mut() = Some(error);
    }

    /// Number of statements prepared on this connection and not yet finalized.
    pub fn live_statements(&self) -> usize {
        self.inner
            .statements
            .borrow()
            .values()
            .filter(|s| s.strong_count() > 0)
            .count()
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.inner.path)
            .field("open", &self.is_open())
            .field("depth", &self.inner.depth.get())
            .finish()
    }
}
