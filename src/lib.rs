//! # Litebind
//!
//! Synchronous bindings to an embedded SQLite database.
//!
//! Litebind provides:
//! - Prepared statements with positional or named parameters, reusable any number of times
//! - Eager (`all`, `values`, `get`, `value`) and lazy (`iter`) result materialization
//! - Nested transactions built from `BEGIN` and savepoints, rolled back on error or panic
//! - A fixed, documented mapping between Rust values and SQLite storage classes
//!
//! ## Quick Start
//!
//! ```rust
//! use litebind::prelude::*;
//!
//! let db = Database::open_in_memory()?;
//! db.exec("CREATE TABLE foo (bar TEXT); INSERT INTO foo VALUES ('baz');", ())?;
//!
//! let stmt = db.query("SELECT * FROM foo WHERE bar = ?")?;
//! let row = stmt.get(params!["baz"])?.unwrap();
//! assert_eq!(row["bar"], Value::Text("baz".into()));
//! assert_eq!(stmt.value(params!["baz"])?, Some(Value::Text("baz".into())));
//! # Ok::<(), litebind::SqliteError>(())
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

/// The SQLite binding layer.
pub mod sqlite {
    pub use litebind_sqlite::*;
}

pub use litebind_sqlite::{named_params, params};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::sqlite::{
        Database, FromRow, FromValue, OpenOptions, Params, Row, Rows, SqliteError, SqliteResult,
        Statement, Transaction, TransactionMode, Value,
    };
    pub use crate::{named_params, params};
}

// Re-export key types at the crate root
pub use sqlite::{Database, SqliteError, SqliteResult, Statement};
