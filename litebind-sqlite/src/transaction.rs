//! Transactions with automatic commit, rollback and savepoint nesting.
//!
//! Set `LITEBIND_DEBUG=true` to see every control statement in the logs.
//!
//! A unit of work runs inside one transaction frame. The outermost frame uses `BEGIN`; a frame
//! opened while another is active becomes a savepoint named after its depth, so an inner failure
//! rolls back only the inner work:
//!
//! ```rust
//! use litebind_sqlite::{Database, SqliteError, Value, params};
//!
//! let db = Database::open_in_memory()?;
//! db.exec("CREATE TABLE log (msg TEXT)", ())?;
//!
//! let mut outer = db.transaction(|db, ()| {
//!     db.exec("INSERT INTO log VALUES (?)", params!["kept"])?;
//!     let mut inner = db.transaction(|db, ()| {
//!         db.exec("INSERT INTO log VALUES (?)", params!["dropped"])?;
//!         Err::<(), _>(SqliteError::state("abandon inner work"))
//!     });
//!     assert!(inner.run(()).is_err());
//!     Ok(())
//! });
//! outer.run(())?;
//!
//! let rows = db.query("SELECT msg FROM log")?.values(())?;
//! assert_eq!(rows, vec![vec![Value::Text("kept".into())]]);
//! # Ok::<(), SqliteError>(())
//! ```
//!
//! # Modes
//!
//! ```rust
//! use litebind_sqlite::TransactionMode;
//!
//! assert_eq!(TransactionMode::Default.as_sql(), "BEGIN");
//! assert_eq!(TransactionMode::Immediate.as_sql(), "BEGIN IMMEDIATE");
//! ```

use std::fmt;

use tracing::{debug, error};

use crate::connection::Database;
use crate::error::{SqliteError, SqliteResult};

/// How the outermost frame acquires locks. Nested frames ignore the mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TransactionMode {
    /// Plain `BEGIN`.
    #[default]
    Default,
    /// `BEGIN DEFERRED`.
    Deferred,
    /// `BEGIN IMMEDIATE`.
    Immediate,
    /// `BEGIN EXCLUSIVE`.
    Exclusive,
}

impl TransactionMode {
    /// Get the SQL that opens an outermost frame in this mode.
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Default => "BEGIN",
            Self::Deferred => "BEGIN DEFERRED",
            Self::Immediate => "BEGIN IMMEDIATE",
            Self::Exclusive => "BEGIN EXCLUSIVE",
        }
    }
}

impl fmt::Display for TransactionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// One level of transaction nesting, identified by the depth it was opened at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionFrame {
    depth: u32,
    mode: TransactionMode,
}

impl TransactionFrame {
    pub fn new(depth: u32, mode: TransactionMode) -> Self {
        Self { depth, mode }
    }

    /// Depth before this frame was opened.
    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn mode(&self) -> TransactionMode {
        self.mode
    }

    /// Whether this frame is a savepoint inside another frame.
    pub fn is_nested(&self) -> bool {
        self.depth > 0
    }

    /// Savepoint name for nested frames.
    pub fn savepoint_name(&self) -> Option<String> {
        self.is_nested().then(|| format!("sp_{}", self.depth))
    }

    /// Get the SQL that opens this frame.
    pub fn begin_sql(&self) -> String {
        match self.savepoint_name() {
            Some(name) => format!("SAVEPOINT {}", name),
            None => self.mode.as_sql().to_string(),
        }
    }

    /// Get the SQL that keeps this frame's work.
    pub fn commit_sql(&self) -> String {
        match self.savepoint_name() {
            Some(name) => format!("RELEASE {}", name),
            None => "COMMIT".to_string(),
        }
    }

    /// Get the SQL that discards this frame's work, in execution order.
    pub fn rollback_sql(&self) -> Vec<String> {
        match self.savepoint_name() {
            Some(name) => vec![format!("ROLLBACK TO {}", name), format!("RELEASE {}", name)],
            None => vec!["ROLLBACK".to_string()],
        }
    }
}

fn control(db: &Database, sql: &str) -> SqliteResult<()> {
    debug!(sql, depth = db.transaction_depth(), "Transaction control");
    db.query(sql)?.run(())?;
    Ok(())
}

fn rollback(db: &Database, frame: &TransactionFrame) {
    // the engine may already have rolled the whole transaction back
    if db.is_autocommit() {
        debug!(depth = frame.depth, "Transaction already ended, skipping rollback");
        return;
    }
    for sql in frame.rollback_sql() {
        if let Err(e) = control(db, &sql) {
            error!(
                depth = frame.depth,
                sql = %sql,
                error = %e,
                "Rollback failed; reporting the original error"
            );
            db.record_rollback_error(e);
            return;
        }
    }
}

/// Rolls the frame back and restores depth if the unit of work unwinds.
struct FrameGuard<'a> {
    db: &'a Database,
    frame: TransactionFrame,
    armed: bool,
}

impl Drop for FrameGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            rollback(self.db, &self.frame);
            self.db.set_transaction_depth(self.frame.depth);
        }
    }
}

/// Run `body` inside a new transaction frame on `db`.
///
/// The frame commits when `body` returns `Ok` and rolls back when it returns `Err` or panics.
/// Depth is restored in every case. A failed commit rolls the frame back and is returned as the
/// error. If the rollback fails as well, the original error is still the one returned and the
/// rollback failure is available from [`Database::take_rollback_error`].
pub fn run_transaction<T, E, F>(db: &Database, mode: TransactionMode, body: F) -> Result<T, E>
where
    F: FnOnce(&Database) -> Result<T, E>,
    E: From<SqliteError>,
{
    let frame = TransactionFrame::new(db.transaction_depth(), mode);
    control(db, &frame.begin_sql())?;
    db.set_transaction_depth(frame.depth + 1);

    let mut guard = FrameGuard {
        db,
        frame,
        armed: true,
    };
    let outcome = body(db);
    guard.armed = false;
    drop(guard);

    let result = match outcome {
        Ok(value) => match control(db, &frame.commit_sql()) {
            Ok(()) => Ok(value),
            Err(e) => {
                rollback(db, &frame);
                Err(E::from(e))
            }
        },
        Err(e) => {
            rollback(db, &frame);
            Err(e)
        }
    };
    db.set_transaction_depth(frame.depth);
    result
}

/// A reusable transactional function returned by
/// [`Database::transaction`](crate::Database::transaction).
///
/// Each call opens a new frame and passes `args` through to the wrapped function.
pub struct Transaction<'db, F> {
    db: &'db Database,
    body: F,
}

impl<'db, F> Transaction<'db, F> {
    /// Wrap `body`. Use this directly when the body's error type is not [`SqliteError`].
    pub fn new(db: &'db Database, body: F) -> Self {
        Self { db, body }
    }

    /// Run in the given mode.
    pub fn run_with<A, T, E>(&mut self, mode: TransactionMode, args: A) -> Result<T, E>
    where
        F: FnMut(&Database, A) -> Result<T, E>,
        E: From<SqliteError>,
    {
        let body = &mut self.body;
        run_transaction(self.db, mode, |db| body(db, args))
    }

    /// Run with a plain `BEGIN`.
    pub fn run<A, T, E>(&mut self, args: A) -> Result<T, E>
    where
        F: FnMut(&Database, A) -> Result<T, E>,
        E: From<SqliteError>,
    {
        self.run_with(TransactionMode::Default, args)
    }

    pub fn deferred<A, T, E>(&mut self, args: A) -> Result<T, E>
    where
        F: FnMut(&Database, A) -> Result<T, E>,
        E: From<SqliteError>,
    {
        self.run_with(TransactionMode::Deferred, args)
    }

    pub fn immediate<A, T, E>(&mut self, args: A) -> Result<T, E>
    where
        F: FnMut(&Database, A) -> Result<T, E>,
        E: From<SqliteError>,
    {
        self.run_with(TransactionMode::Immediate, args)
    }

    pub fn exclusive<A, T, E>(&mut self, args: A) -> Result<T, E>
    where
        F: FnMut(&Database, A) -> Result<T, E>,
        E: From<SqliteError>,
    {
        self.run_with(TransactionMode::Exclusive, args)
    }
}

#[cfg(test)]
mod tests {
    use std::panic::{AssertUnwindSafe, catch_unwind};

    use super::*;
    use crate::{Value, params};

    fn db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.exec("CREATE TABLE t (n INTEGER)", ()).unwrap();
        db
    }

    fn count(db: &Database) -> Option<Value> {
        db.query("SELECT count(*) FROM t").unwrap().value(()).unwrap()
    }

    #[test]
    fn test_mode_sql() {
        assert_eq!(TransactionMode::Default.as_sql(), "BEGIN");
        assert_eq!(TransactionMode::Deferred.as_sql(), "BEGIN DEFERRED");
        assert_eq!(TransactionMode::Exclusive.to_string(), "BEGIN EXCLUSIVE");
    }

    #[test]
    fn test_frame_sql() {
        let outer = TransactionFrame::new(0, TransactionMode::Immediate);
        assert!(!outer.is_nested());
        assert_eq!(outer.begin_sql(), "BEGIN IMMEDIATE");
        assert_eq!(outer.commit_sql(), "COMMIT");
        assert_eq!(outer.rollback_sql(), vec!["ROLLBACK"]);

        let inner = TransactionFrame::new(2, TransactionMode::Immediate);
        assert_eq!(inner.savepoint_name().as_deref(), Some("sp_2"));
        assert_eq!(inner.begin_sql(), "SAVEPOINT sp_2");
        assert_eq!(inner.commit_sql(), "RELEASE sp_2");
        assert_eq!(inner.rollback_sql(), vec!["ROLLBACK TO sp_2", "RELEASE sp_2"]);
    }

    #[test]
    fn test_commit_on_success() {
        let db = db();
        let mut tx = db.transaction(|db, n: i64| {
            assert_eq!(db.transaction_depth(), 1);
            assert!(db.in_transaction());
            db.exec("INSERT INTO t VALUES (?)", params![n])
        });
        assert_eq!(tx.run(1).unwrap(), 1);
        assert_eq!(tx.immediate(2).unwrap(), 1);
        assert_eq!(tx.exclusive(3).unwrap(), 1);
        assert_eq!(tx.deferred(4).unwrap(), 1);

        assert_eq!(db.transaction_depth(), 0);
        assert!(db.is_autocommit());
        assert_eq!(count(&db), Some(Value::Integer(4)));
    }

    #[test]
    fn test_rollback_on_error() {
        let db = db();
        let mut tx = db.transaction(|db, ()| {
            db.exec("INSERT INTO t VALUES (1)", ())?;
            Err::<(), _>(SqliteError::state("boom"))
        });
        let err = tx.run(()).unwrap_err();
        assert!(err.to_string().contains("boom"));
        assert_eq!(db.transaction_depth(), 0);
        assert!(db.is_autocommit());
        assert_eq!(count(&db), Some(Value::Integer(0)));
    }

    #[test]
    fn test_nested_failure_keeps_outer_work() {
        let db = db();
        let mut outer = db.transaction(|db, ()| {
            db.exec("INSERT INTO t VALUES (1)", ())?;
            let mut inner = db.transaction(|db, ()| {
                assert_eq!(db.transaction_depth(), 2);
                db.exec("INSERT INTO t VALUES (2)", ())?;
                Err::<(), _>(SqliteError::state("inner"))
            });
            assert!(inner.run(()).is_err());
            assert_eq!(db.transaction_depth(), 1);
            db.exec("INSERT INTO t VALUES (3)", ())?;
            Ok(())
        });
        outer.run(()).unwrap();

        let rows = db.query("SELECT n FROM t ORDER BY n").unwrap().values(()).unwrap();
        assert_eq!(rows, vec![vec![Value::Integer(1)], vec![Value::Integer(3)]]);
    }

    #[test]
    fn test_outer_failure_discards_released_inner_work() {
        let db = db();
        let mut outer = db.transaction(|db, ()| {
            let mut inner = db.transaction(|db, ()| db.exec("INSERT INTO t VALUES (1)", ()));
            inner.run(())?;
            Err::<(), _>(SqliteError::state("outer"))
        });
        assert!(outer.run(()).is_err());
        assert_eq!(count(&db), Some(Value::Integer(0)));
    }

    #[test]
    fn test_engine_ended_transaction_skips_rollback() {
        let db = db();
        let mut tx = db.transaction(|db, ()| {
            db.exec("ROLLBACK", ())?;
            Err::<(), _>(SqliteError::state("after manual rollback"))
        });
        let err = tx.run(()).unwrap_err();
        assert!(err.to_string().contains("after manual rollback"));
        assert_eq!(db.transaction_depth(), 0);
    }

    #[test]
    fn test_failed_rollback_is_kept_as_secondary_error() {
        let db = db();
        let mut outer = db.transaction(|db, ()| {
            db.exec("INSERT INTO t VALUES (1)", ())?;
            let mut inner = db.transaction(|db, ()| {
                // releasing the frame's own savepoint makes its rollback fail
                db.exec("RELEASE sp_1", ())?;
                Err::<(), _>(SqliteError::state("inner gives up"))
            });
            let err = inner.run(()).unwrap_err();
            assert!(err.is_state_error());
            assert_eq!(db.transaction_depth(), 1);

            let secondary = db.take_rollback_error().unwrap();
            assert!(secondary.is_engine_error());
            assert!(secondary.to_string().contains("no such savepoint"));
            assert!(db.take_rollback_error().is_none());
            Ok(())
        });
        outer.run(()).unwrap();
        assert_eq!(count(&db), Some(Value::Integer(1)));
    }

    #[test]
    fn test_mode_variants_nest_as_savepoints() {
        let db = db();
        let mut outer = db.transaction(|db, ()| {
            db.exec("INSERT INTO t VALUES (1)", ())?;
            let mut inner = db.transaction(|db, (n, fail): (i64, bool)| {
                assert_eq!(db.transaction_depth(), 2);
                db.exec("INSERT INTO t VALUES (?)", params![n])?;
                if fail {
                    return Err(SqliteError::state("inner rejected"));
                }
                Ok(())
            });
            inner.exclusive((2, false))?;
            inner.immediate((3, false))?;
            inner.deferred((4, false))?;
            let err = inner.exclusive((5, true)).unwrap_err();
            assert!(err.is_state_error());
            assert_eq!(db.transaction_depth(), 1);
            Ok(())
        });
        outer.run(()).unwrap();

        let rows = db.query("SELECT n FROM t ORDER BY n").unwrap().values(()).unwrap();
        let expected: Vec<Vec<Value>> = (1..=4).map(|n| vec![Value::Integer(n)]).collect();
        assert_eq!(rows, expected);
        assert!(db.take_rollback_error().is_none());
    }

    #[test]
    fn test_failed_commit_is_reported() {
        let db = db();
        let mut tx = db.transaction(|db, ()| db.exec("COMMIT", ()));
        let err = tx.run(()).unwrap_err();
        assert!(err.is_engine_error());
        assert_eq!(db.transaction_depth(), 0);
        assert!(db.is_autocommit());
    }

    #[test]
    fn test_panic_rolls_back() {
        let db = db();
        let result = catch_unwind(AssertUnwindSafe(|| {
            let mut tx = db.transaction(|db, ()| -> SqliteResult<()> {
                db.exec("INSERT INTO t VALUES (1)", ())?;
                panic!("unit of work panicked");
            });
            let _ = tx.run(());
        }));
        assert!(result.is_err());
        assert_eq!(db.transaction_depth(), 0);
        assert!(db.is_autocommit());
        assert_eq!(count(&db), Some(Value::Integer(0)));
    }

    #[test]
    fn test_custom_error_type() {
        #[derive(Debug)]
        enum AppError {
            Db(SqliteError),
            Rejected,
        }

        impl From<SqliteError> for AppError {
            fn from(e: SqliteError) -> Self {
                Self::Db(e)
            }
        }

        let db = db();
        let result = run_transaction(&db, TransactionMode::Default, |db| {
            db.exec("INSERT INTO t VALUES (1)", ())?;
            Err::<(), AppError>(AppError::Rejected)
        });
        assert!(matches!(result, Err(AppError::Rejected)));

        let result: Result<u64, AppError> = run_transaction(&db, TransactionMode::Default, |db| {
            Ok(db.exec("INSERT INTO t VALUES (1)", ())?)
        });
        assert!(matches!(result, Ok(1)));
        assert!(matches!(
            run_transaction::<(), AppError, _>(&db, TransactionMode::Default, |db| {
                db.exec("NOT SQL", ())?;
                Ok(())
            }),
            Err(AppError::Db(SqliteError::Syntax(_)))
        ));
    }
}
