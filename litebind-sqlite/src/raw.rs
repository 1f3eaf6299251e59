//! Safe wrapper around one compiled engine statement.
//!
//! Everything here talks to the engine's C interface directly. The owning
//! [`Database`](crate::Database) guarantees the connection outlives every `RawStatement`:
//! statements are finalized (dropped) before the connection handle is closed.

use std::ffi::{CStr, CString, c_char, c_int};
use std::ptr::{self, NonNull};

use rusqlite::ffi;
use rusqlite::types::{Value as StorageValue, ValueRef};

use crate::error::{SqliteError, SqliteResult};

/// Engine failure for `code`, carrying the connection's current error message.
pub(crate) fn engine_error(db: *mut ffi::sqlite3, code: c_int) -> rusqlite::Error {
    // SAFETY: `db` is an open connection; the message is copied out before any other call on it.
    let message = unsafe {
        let ptr = ffi::sqlite3_errmsg(db);
        if ptr.is_null() {
            None
        } else {
            Some(CStr::from_ptr(ptr).to_string_lossy().into_owned())
        }
    };
    SqliteError::from_code(code, message)
}

/// Rows changed by the most recent INSERT, UPDATE or DELETE on `db`.
pub(crate) fn changes(db: *mut ffi::sqlite3) -> u64 {
    // SAFETY: `db` is an open connection handle.
    let n = unsafe { ffi::sqlite3_changes64(db) };
    u64::try_from(n).unwrap_or_default()
}

/// Rows changed since `db` was opened.
pub(crate) fn total_changes(db: *mut ffi::sqlite3) -> u64 {
    // SAFETY: `db` is an open connection handle.
    let n = unsafe { ffi::sqlite3_total_changes64(db) };
    u64::try_from(n).unwrap_or_default()
}

fn to_c_int(value: usize, what: &str) -> SqliteResult<c_int> {
    c_int::try_from(value).map_err(|_| SqliteError::bind(format!("{} is too large", what)))
}

pub(crate) struct RawStatement {
    db: *mut ffi::sqlite3,
    stmt: NonNull<ffi::sqlite3_stmt>,
}

impl RawStatement {
    /// Compile the first statement in `sql`.
    ///
    /// Returns the statement (absent when the text holds only whitespace or comments) and the
    /// number of bytes consumed.
    pub(crate) fn prepare(db: *mut ffi::sqlite3, sql: &str) -> SqliteResult<(Option<Self>, usize)> {
        let len = c_int::try_from(sql.len())
            .map_err(|_| SqliteError::syntax(ffi::SQLITE_TOOBIG, "SQL text is too long"))?;
        let mut stmt: *mut ffi::sqlite3_stmt = ptr::null_mut();
        let mut tail: *const c_char = ptr::null();

        // SAFETY: `db` is open, `sql` is valid for `len` bytes, and `tail` points into `sql`.
        let code = unsafe {
            ffi::sqlite3_prepare_v2(db, sql.as_ptr().cast(), len, &mut stmt, &mut tail)
        };
        if code != ffi::SQLITE_OK {
            return Err(SqliteError::Syntax(engine_error(db, code)));
        }

        let consumed = if tail.is_null() {
            sql.len()
        } else {
            (tail as usize).saturating_sub(sql.as_ptr() as usize).min(sql.len())
        };
        Ok((NonNull::new(stmt).map(|stmt| Self { db, stmt }), consumed))
    }

    pub(crate) fn db(&self) -> *mut ffi::sqlite3 {
        self.db
    }

    fn check(&self, code: c_int) -> SqliteResult<()> {
        if code == ffi::SQLITE_OK {
            Ok(())
        } else {
            Err(SqliteError::Engine(engine_error(self.db, code)))
        }
    }

    // SAFETY (all methods below): `stmt` stays valid until `Drop`, and the owning `Database`
    // finalizes it before closing `db`, so the connection outlives the statement.

    pub(crate) fn readonly(&self) -> bool {
        // SAFETY: `stmt` is a live statement.
        unsafe { ffi::sqlite3_stmt_readonly(self.stmt.as_ptr()) != 0 }
    }

    pub(crate) fn parameter_count(&self) -> usize {
        // SAFETY: `stmt` is a live statement.
        let n = unsafe { ffi::sqlite3_bind_parameter_count(self.stmt.as_ptr()) };
        usize::try_from(n).unwrap_or_default()
    }

    /// Name of the 1-based slot `index`; `None` for anonymous `?` slots.
    pub(crate) fn parameter_name(&self, index: usize) -> Option<String> {
        let index = c_int::try_from(index).ok()?;
        // SAFETY: `stmt` is a live statement; out-of-range indexes return null.
        let ptr = unsafe { ffi::sqlite3_bind_parameter_name(self.stmt.as_ptr(), index) };
        if ptr.is_null() {
            None
        } else {
            // SAFETY: non-null names are NUL-terminated and live as long as `stmt`.
            Some(unsafe { CStr::from_ptr(ptr).to_string_lossy().into_owned() })
        }
    }

    /// 1-based slot for a parameter name including its sigil.
    pub(crate) fn parameter_index(&self, name: &str) -> SqliteResult<Option<usize>> {
        let name = CString::new(name)
            .map_err(|_| SqliteError::bind("parameter name contains a NUL byte"))?;
        // SAFETY: `stmt` is a live statement and `name` is NUL-terminated.
        let index = unsafe { ffi::sqlite3_bind_parameter_index(self.stmt.as_ptr(), name.as_ptr()) };
        Ok(usize::try_from(index).ok().filter(|i| *i > 0))
    }

    pub(crate) fn clear_bindings(&self) {
        // SAFETY: `stmt` is a live statement.
        unsafe {
            ffi::sqlite3_clear_bindings(self.stmt.as_ptr());
        }
    }

    /// Bind a storage value to the 1-based slot `index`.
    pub(crate) fn bind(&self, index: usize, value: &StorageValue) -> SqliteResult<()> {
        let stmt = self.stmt.as_ptr();
        let index = to_c_int(index, "parameter index")?;
        // SAFETY: `stmt` is a live statement. Text and blob bytes are valid for `len` and copied
        // by the engine (`SQLITE_TRANSIENT`) before the call returns.
        let code = match value {
            StorageValue::Null => unsafe { ffi::sqlite3_bind_null(stmt, index) },
            StorageValue::Integer(i) => unsafe { ffi::sqlite3_bind_int64(stmt, index, *i) },
            StorageValue::Real(f) => unsafe { ffi::sqlite3_bind_double(stmt, index, *f) },
            StorageValue::Text(s) => {
                let len = to_c_int(s.len(), "text parameter")?;
                unsafe {
                    ffi::sqlite3_bind_text(stmt, index, s.as_ptr().cast(), len, ffi::SQLITE_TRANSIENT())
                }
            }
            StorageValue::Blob(b) if b.is_empty() => unsafe {
                ffi::sqlite3_bind_zeroblob(stmt, index, 0)
            },
            StorageValue::Blob(b) => {
                let len = to_c_int(b.len(), "blob parameter")?;
                unsafe {
                    ffi::sqlite3_bind_blob(stmt, index, b.as_ptr().cast(), len, ffi::SQLITE_TRANSIENT())
                }
            }
        };
        self.check(code)
    }

    /// Advance one step. `Ok(true)` when a row is available, `Ok(false)` when done.
    pub(crate) fn step(&self) -> SqliteResult<bool> {
        // SAFETY: `stmt` is a live statement. Column values read from the previous row are
        // copied out before the next step.
        match unsafe { ffi::sqlite3_step(self.stmt.as_ptr()) } {
            ffi::SQLITE_ROW => Ok(true),
            ffi::SQLITE_DONE => Ok(false),
            code => Err(SqliteError::Engine(engine_error(self.db, code))),
        }
    }

    /// Rewind to the start. The engine repeats the last step failure here, which has already
    /// been reported, so the result code is discarded.
    pub(crate) fn reset(&self) {
        // SAFETY: `stmt` is a live statement; no column value borrowed from it survives a reset.
        unsafe {
            ffi::sqlite3_reset(self.stmt.as_ptr());
        }
    }

    pub(crate) fn column_count(&self) -> usize {
        // SAFETY: `stmt` is a live statement.
        let n = unsafe { ffi::sqlite3_column_count(self.stmt.as_ptr()) };
        usize::try_from(n).unwrap_or_default()
    }

    pub(crate) fn column_name(&self, index: usize) -> String {
        let Ok(index) = c_int::try_from(index) else {
            return String::new();
        };
        // SAFETY: `stmt` is a live statement; out-of-range indexes return null.
        let ptr = unsafe { ffi::sqlite3_column_name(self.stmt.as_ptr(), index) };
        if ptr.is_null() {
            String::new()
        } else {
            // SAFETY: the name is NUL-terminated and copied before the statement changes.
            unsafe { CStr::from_ptr(ptr).to_string_lossy().into_owned() }
        }
    }

    pub(crate) fn column_names(&self) -> Vec<String> {
        (0..self.column_count()).map(|i| self.column_name(i)).collect()
    }

    /// Column value of the current row. Valid until the next step or reset.
    pub(crate) fn column_value(&self, index: usize) -> ValueRef<'_> {
        let stmt = self.stmt.as_ptr();
        let Ok(index) = c_int::try_from(index) else {
            return ValueRef::Null;
        };
        // SAFETY: `stmt` is a live statement positioned on a row. The returned `ValueRef`
        // borrows `self`, and callers convert it to an owned value before the next step or
        // reset. Text and blob lengths come from `sqlite3_column_bytes` after the pointer
        // fetch, as the engine requires.
        match unsafe { ffi::sqlite3_column_type(stmt, index) } {
            ffi::SQLITE_INTEGER => ValueRef::Integer(unsafe { ffi::sqlite3_column_int64(stmt, index) }),
            ffi::SQLITE_FLOAT => ValueRef::Real(unsafe { ffi::sqlite3_column_double(stmt, index) }),
            ffi::SQLITE_TEXT => {
                let ptr = unsafe { ffi::sqlite3_column_text(stmt, index) };
                let len = unsafe { ffi::sqlite3_column_bytes(stmt, index) };
                ValueRef::Text(unsafe { column_bytes(ptr.cast(), len) })
            }
            ffi::SQLITE_BLOB => {
                let ptr = unsafe { ffi::sqlite3_column_blob(stmt, index) };
                let len = unsafe { ffi::sqlite3_column_bytes(stmt, index) };
                ValueRef::Blob(unsafe { column_bytes(ptr.cast(), len) })
            }
            _ => ValueRef::Null,
        }
    }

    /// SQL text with the current bindings substituted.
    pub(crate) fn expanded_sql(&self) -> Option<String> {
        // SAFETY: `stmt` is a live statement; the engine-allocated string is copied and then
        // released with `sqlite3_free`, its matching allocator.
        unsafe {
            let ptr = ffi::sqlite3_expanded_sql(self.stmt.as_ptr());
            if ptr.is_null() {
                return None;
            }
            let sql = CStr::from_ptr(ptr).to_string_lossy().into_owned();
            ffi::sqlite3_free(ptr.cast());
            Some(sql)
        }
    }
}

/// Borrow `len` bytes at `ptr`, or an empty slice for a null pointer.
///
/// # Safety
///
/// A non-null `ptr` must be valid for reads of `len` bytes for the lifetime `'a`.
unsafe fn column_bytes<'a>(ptr: *const u8, len: c_int) -> &'a [u8] {
    match usize::try_from(len) {
        // SAFETY: guaranteed by the caller.
        Ok(len) if len > 0 && !ptr.is_null() => unsafe { std::slice::from_raw_parts(ptr, len) },
        _ => &[],
    }
}

impl Drop for RawStatement {
    fn drop(&mut self) {
        // SAFETY: `stmt` is finalized exactly once, here, while `db` is still open.
        unsafe {
            ffi::sqlite3_finalize(self.stmt.as_ptr());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory() -> rusqlite::Connection {
        rusqlite::Connection::open_in_memory().unwrap()
    }

    #[test]
    fn test_prepare_reports_tail() {
        let conn = memory();
        let db = unsafe { conn.handle() };
        let sql = "SELECT 1; SELECT 2;";
        let (stmt, consumed) = RawStatement::prepare(db, sql).unwrap();
        assert!(stmt.is_some());
        assert_eq!(&sql[consumed..], " SELECT 2;");
    }

    #[test]
    fn test_prepare_whitespace_only() {
        let conn = memory();
        let db = unsafe { conn.handle() };
        let (stmt, _) = RawStatement::prepare(db, "  -- nothing here\n").unwrap();
        assert!(stmt.is_none());
    }

    #[test]
    fn test_prepare_syntax_error() {
        let conn = memory();
        let db = unsafe { conn.handle() };
        let err = RawStatement::prepare(db, "SELEC 1").err().unwrap();
        assert!(matches!(err, SqliteError::Syntax(_)));
        assert!(err.to_string().contains("syntax error"));
    }

    #[test]
    fn test_bind_step_columns() {
        let conn = memory();
        let db = unsafe { conn.handle() };
        let (stmt, _) = RawStatement::prepare(db, "SELECT ?1 AS a, :b AS b").unwrap();
        let stmt = stmt.unwrap();
        assert_eq!(stmt.parameter_count(), 2);
        assert_eq!(stmt.parameter_name(2).as_deref(), Some(":b"));
        assert_eq!(stmt.parameter_index(":b").unwrap(), Some(2));
        assert_eq!(stmt.parameter_index(":missing").unwrap(), None);
        assert_eq!(stmt.column_names(), vec!["a".to_string(), "b".to_string()]);
        assert!(stmt.readonly());

        stmt.bind(1, &StorageValue::Integer(7)).unwrap();
        stmt.bind(2, &StorageValue::Text("x".into())).unwrap();
        assert!(stmt.step().unwrap());
        assert_eq!(stmt.column_value(0), ValueRef::Integer(7));
        assert_eq!(stmt.column_value(1), ValueRef::Text(b"x"));
        assert!(!stmt.step().unwrap());
        stmt.reset();
    }

    #[test]
    fn test_bind_out_of_range() {
        let conn = memory();
        let db = unsafe { conn.handle() };
        let (stmt, _) = RawStatement::prepare(db, "SELECT ?").unwrap();
        let err = stmt.unwrap().bind(5, &StorageValue::Null).unwrap_err();
        assert_eq!(err.error_code(), Some(rusqlite::ErrorCode::ParameterOutOfRange));
    }

    #[test]
    fn test_expanded_sql() {
        let conn = memory();
        let db = unsafe { conn.handle() };
        let (stmt, _) = RawStatement::prepare(db, "SELECT ?").unwrap();
        let stmt = stmt.unwrap();
        stmt.bind(1, &StorageValue::Text("it's".into())).unwrap();
        assert_eq!(stmt.expanded_sql().as_deref(), Some("SELECT 'it''s'"));
    }
}
