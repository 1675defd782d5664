//! SQLite storage bootstrap, schema migrations and transactions.
//!
//! # Responsibility
//! - Open and configure SQLite connections for the customer store.
//! - Apply schema migrations in deterministic order.
//! - Share one connection across async tasks and bound mutations with
//!   explicit transactions.
//!
//! # Invariants
//! - Migration version is tracked via `PRAGMA user_version`.
//! - Core code must not read/write application data before migrations succeed.
//! - A transaction owns the connection guard for its whole lifetime.
//! - Waiting for the shared connection is bounded by the statement timeout.

use log::warn;
use rusqlite::Connection;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard, OwnedMutexGuard};

pub mod migrations;
mod open;
pub mod transaction;

pub use open::{open_db, open_db_in_memory, DEFAULT_STATEMENT_TIMEOUT};

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },
    /// The shared connection stayed held by another task for `waited`.
    ConnectionBusy { waited: Duration },
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::UnsupportedSchemaVersion {
                db_version,
                latest_supported,
            } => write!(
                f,
                "database schema version {db_version} is newer than supported {latest_supported}"
            ),
            Self::ConnectionBusy { waited } => write!(
                f,
                "database connection still busy after {} ms",
                waited.as_millis()
            ),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::UnsupportedSchemaVersion { .. } | Self::ConnectionBusy { .. } => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

/// Shared handle to the one SQLite connection of the process.
///
/// Cloning is cheap; all clones serialize on the same connection mutex.
#[derive(Debug, Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    lock_timeout: Duration,
}

impl Database {
    /// Wraps an already bootstrapped connection.
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            lock_timeout: DEFAULT_STATEMENT_TIMEOUT,
        }
    }

    /// Opens (and migrates) a database file with the given statement timeout.
    ///
    /// The same timeout bounds waits for the shared connection.
    pub fn open(path: impl AsRef<Path>, statement_timeout: Duration) -> DbResult<Self> {
        open_db(path, statement_timeout)
            .map(Self::new)
            .map(|db| db.with_lock_timeout(statement_timeout))
    }

    /// Opens (and migrates) a private in-memory database.
    pub fn open_in_memory() -> DbResult<Self> {
        open_db_in_memory().map(Self::new)
    }

    /// Handle sharing the same connection with a different wait bound.
    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    /// Waits for the connection and borrows it for a short read.
    ///
    /// # Errors
    /// - `ConnectionBusy` when the connection is not free within the lock
    ///   timeout.
    pub async fn lock(&self) -> DbResult<MutexGuard<'_, Connection>> {
        tokio::time::timeout(self.lock_timeout, self.conn.lock())
            .await
            .map_err(|_| {
                warn!(
                    "event=db_lock module=db status=error reason=connection_busy waited_ms={}",
                    self.lock_timeout.as_millis()
                );
                DbError::ConnectionBusy {
                    waited: self.lock_timeout,
                }
            })
    }

    /// Waits for the connection and takes an owned guard, used by transactions.
    ///
    /// Returns `None` when the connection is not free within `wait`.
    pub(crate) async fn lock_owned(&self, wait: Duration) -> Option<OwnedMutexGuard<Connection>> {
        tokio::time::timeout(wait, Arc::clone(&self.conn).lock_owned())
            .await
            .ok()
    }
}
