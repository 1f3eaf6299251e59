//! Synchronous SQLite binding layer.
//!
//! This crate sits between application code and the SQLite engine. It compiles SQL into
//! reusable [`Statement`] handles, converts values between Rust and the engine's storage
//! classes, and runs units of work inside nested transactions.
//!
//! # Features
//!
//! - Positional (`?`, `?NNN`) and named (`:name`, `@name`, `$name`) parameters
//! - Parameters per execution, or fixed once with [`Statement::bind`]
//! - Eager results ([`Statement::all`], [`Statement::values`], [`Statement::get`],
//!   [`Statement::value`]) and a lazy [`Rows`] iterator
//! - Nested transactions via savepoints ([`Database::transaction`])
//! - Optional wide-integer reads for values outside `±(2^53 - 1)`
//!
//! # Example
//!
//! ```rust
//! use litebind_sqlite::{Database, Value, named_params};
//!
//! let db = Database::open_in_memory()?;
//! db.exec("CREATE TABLE foo (bar TEXT)", ())?;
//! db.exec("INSERT INTO foo VALUES (:bar)", named_params! { "bar" => "baz" })?;
//!
//! let values = db.query("SELECT bar FROM foo")?.values(())?;
//! assert_eq!(values, vec![vec![Value::Text("baz".into())]]);
//! # Ok::<(), litebind_sqlite::SqliteError>(())
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod logging;
pub mod params;
mod raw;
pub mod row;
pub mod statement;
pub mod transaction;
pub mod types;

pub use config::{DEFAULT_STATEMENT_CACHE_CAPACITY, MEMORY_PATH, OpenOptions};
pub use connection::Database;
pub use error::{SqliteError, SqliteResult};
pub use indexmap::IndexMap;
pub use params::Params;
pub use row::{FromRow, Row};
pub use statement::{Rows, Statement};
pub use transaction::{Transaction, TransactionFrame, TransactionMode, run_transaction};
pub use types::{FromValue, MAX_SAFE_INTEGER, MIN_SAFE_INTEGER, Value};
