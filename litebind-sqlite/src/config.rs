//! Connection open options.

use rusqlite::OpenFlags;
use serde::Deserialize;

use crate::error::{SqliteError, SqliteResult};

/// Path string that opens a private in-memory database.
pub const MEMORY_PATH: &str = ":memory:";

/// Default number of statements kept by [`Database::query`](crate::Database::query).
pub const DEFAULT_STATEMENT_CACHE_CAPACITY: usize = 16;

/// Options used when opening a [`Database`](crate::Database).
///
/// Defaults: the file is created if missing, opened read-write, on disk, with the lossy
/// default integer mapping.
///
/// # Example
///
/// ```rust
/// use litebind_sqlite::OpenOptions;
///
/// let options = OpenOptions::new().readonly(true).wide_integers(true);
/// assert!(options.readonly);
/// assert!(!options.create);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OpenOptions {
    /// Create the database file if it does not exist. Ignored when `readonly` is set.
    pub create: bool,
    /// Open the database read-only.
    pub readonly: bool,
    /// Keep the database in memory.
    pub memory: bool,
    /// Read integers outside the safe range as [`Value::BigInt`](crate::Value::BigInt).
    pub wide_integers: bool,
    /// Raw `SQLITE_OPEN_*` bits; overrides every other flag-bearing option.
    pub raw_flags: Option<i32>,
    /// Statements kept by the [`query`](crate::Database::query) cache before the least recently
    /// used one is evicted. Zero disables caching.
    pub statement_cache_capacity: usize,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            create: true,
            readonly: false,
            memory: false,
            wide_integers: false,
            raw_flags: None,
            statement_cache_capacity: DEFAULT_STATEMENT_CACHE_CAPACITY,
        }
    }
}

impl OpenOptions {
    /// Create options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Options for an in-memory database.
    pub fn memory() -> Self {
        Self {
            memory: true,
            ..Default::default()
        }
    }

    /// Create the file if missing.
    pub fn create(mut self, enabled: bool) -> Self {
        self.create = enabled;
        self
    }

    /// Open read-only. Enabling this also turns `create` off.
    pub fn readonly(mut self, enabled: bool) -> Self {
        self.readonly = enabled;
        if enabled {
            self.create = false;
        }
        self
    }

    /// Keep the database in memory.
    pub fn in_memory(mut self, enabled: bool) -> Self {
        self.memory = enabled;
        self
    }

    /// Enable or disable wide-integer reads.
    pub fn wide_integers(mut self, enabled: bool) -> Self {
        self.wide_integers = enabled;
        self
    }

    /// Set the capacity of the statement cache.
    pub fn statement_cache_capacity(mut self, capacity: usize) -> Self {
        self.statement_cache_capacity = capacity;
        self
    }

    /// Use raw open flags.
    pub fn raw_flags(mut self, flags: i32) -> Self {
        self.raw_flags = Some(flags);
        self
    }

    /// Check the options for contradictions.
    ///
    /// Only raw flags can contradict themselves. `readonly` takes precedence over `create`, so
    /// the default options with `readonly` set are valid.
    pub fn validate(&self) -> SqliteResult<()> {
        if let Some(bits) = self.raw_flags {
            let flags = OpenFlags::from_bits(bits)
                .ok_or_else(|| SqliteError::config(format!("unknown open flag bits: {:#x}", bits)))?;
            let both = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_READ_WRITE;
            let access = flags & both;
            if access.is_empty() || access == both {
                return Err(SqliteError::config(
                    "raw flags must contain exactly one of READ_ONLY or READ_WRITE",
                ));
            }
            if flags.contains(OpenFlags::SQLITE_OPEN_READ_ONLY)
                && flags.contains(OpenFlags::SQLITE_OPEN_CREATE)
            {
                return Err(SqliteError::config("raw flags combine READ_ONLY with CREATE"));
            }
            return Ok(());
        }
        Ok(())
    }

    /// Assemble the engine open flags.
    pub fn open_flags(&self) -> SqliteResult<OpenFlags> {
        self.validate()?;

        if let Some(bits) = self.raw_flags {
            // validate() already proved the bits are known
            return Ok(OpenFlags::from_bits_truncate(bits));
        }

        let mut flags = OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        if self.readonly {
            flags |= OpenFlags::SQLITE_OPEN_READ_ONLY;
        } else {
            flags |= OpenFlags::SQLITE_OPEN_READ_WRITE;
            if self.create {
                flags |= OpenFlags::SQLITE_OPEN_CREATE;
            }
        }
        if self.memory {
            flags |= OpenFlags::SQLITE_OPEN_MEMORY;
        }
        Ok(flags)
    }

    /// Whether the connection will reject writes.
    pub fn is_readonly(&self) -> bool {
        match self.raw_flags {
            Some(bits) => bits & OpenFlags::SQLITE_OPEN_READ_ONLY.bits() != 0,
            None => self.readonly,
        }
    }
}
