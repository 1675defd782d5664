//! Transaction coordinator for mutating operations.
//!
//! # Responsibility
//! - Open one transaction scope per mutating operation, or join the ambient
//!   transaction the caller passes in.
//! - Enforce the configured transaction timeout while waiting for the
//!   connection and again at commit time.
//! - Roll back every scope that is dropped without `commit`.
//!
//! # Invariants
//! - A `Transaction` holds the connection guard until it commits, rolls
//!   back, or is dropped; no other task can run statements meanwhile.
//! - Dropping an active `Transaction` always issues `ROLLBACK`.
//! - A joined scope never commits; dropping it uncommitted marks the outer
//!   transaction rollback-only.

use super::Database;
use log::{debug, info, warn};
use rusqlite::Connection;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;
use tokio::time::Instant;
use uuid::Uuid;

/// Transaction timeout used when the caller has no configured value.
pub const DEFAULT_TRANSACTION_TIMEOUT: Duration = Duration::from_secs(20);

pub type TransactionResult<T> = Result<T, TransactionError>;

/// Errors raised while opening or finishing a transaction.
#[derive(Debug)]
pub enum TransactionError {
    /// Driver failure on `BEGIN`, `COMMIT` or `ROLLBACK`.
    Sqlite(rusqlite::Error),
    /// The timeout elapsed before the connection was free, while work was
    /// running, or before commit; any work was rolled back.
    TimedOut { elapsed: Duration, timeout: Duration },
    /// A joined scope was dropped uncommitted; the work was rolled back.
    Aborted(Uuid),
}

impl Display for TransactionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::TimedOut { elapsed, timeout } => write!(
                f,
                "transaction timed out after {} ms (timeout {} ms)",
                elapsed.as_millis(),
                timeout.as_millis()
            ),
            Self::Aborted(id) => {
                write!(f, "transaction {id} was aborted by an inner scope")
            }
        }
    }
}

impl Error for TransactionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::TimedOut { .. } | Self::Aborted(_) => None,
        }
    }
}

impl From<rusqlite::Error> for TransactionError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

/// Requested isolation, mapped onto SQLite begin modes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IsolationLevel {
    /// `BEGIN DEFERRED`: locks are taken lazily by the first statement.
    #[default]
    ReadCommitted,
    /// `BEGIN IMMEDIATE`: the write lock is taken up front.
    RepeatableRead,
    /// `BEGIN EXCLUSIVE`: no other connection may read or write.
    Serializable,
}

impl IsolationLevel {
    fn begin_sql(self) -> &'static str {
        match self {
            Self::ReadCommitted => "BEGIN DEFERRED;",
            Self::RepeatableRead => "BEGIN IMMEDIATE;",
            Self::Serializable => "BEGIN EXCLUSIVE;",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ReadCommitted => "read_committed",
            Self::RepeatableRead => "repeatable_read",
            Self::Serializable => "serializable",
        }
    }
}

/// Options for a new physical transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionOptions {
    pub timeout: Duration,
    pub isolation: IsolationLevel,
}

impl TransactionOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Self::default()
        }
    }
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TRANSACTION_TIMEOUT,
            isolation: IsolationLevel::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransactionState {
    Active,
    Committed,
    RolledBack,
}

/// One physical SQLite transaction.
///
/// This is the handle repositories receive; it is passed unchanged into
/// every storage call of one operation.
pub struct Transaction {
    id: Uuid,
    conn: OwnedMutexGuard<Connection>,
    options: TransactionOptions,
    started_at: Instant,
    state: TransactionState,
    rollback_only: bool,
}

impl Transaction {
    fn begin(
        conn: OwnedMutexGuard<Connection>,
        options: TransactionOptions,
    ) -> TransactionResult<Self> {
        conn.execute_batch(options.isolation.begin_sql())?;
        let tx = Self {
            id: Uuid::new_v4(),
            conn,
            options,
            started_at: Instant::now(),
            state: TransactionState::Active,
            rollback_only: false,
        };
        debug!(
            "event=tx_begin module=db status=ok tx_id={} isolation={} timeout_ms={}",
            tx.id,
            options.isolation.as_str(),
            options.timeout.as_millis()
        );
        Ok(tx)
    }

    /// Stable id used to correlate log lines of one transaction.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Connection bound to this transaction; statements run inside it.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn options(&self) -> TransactionOptions {
        self.options
    }

    /// Time since `BEGIN`.
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Time left before the configured timeout; zero once it has passed.
    pub fn remaining(&self) -> Duration {
        self.options.timeout.saturating_sub(self.elapsed())
    }

    /// Error reported when work inside this transaction overran its timeout.
    pub fn timed_out(&self) -> TransactionError {
        warn!(
            "event=tx_timeout module=db status=error tx_id={} elapsed_ms={} timeout_ms={}",
            self.id,
            self.elapsed().as_millis(),
            self.options.timeout.as_millis()
        );
        TransactionError::TimedOut {
            elapsed: self.elapsed(),
            timeout: self.options.timeout,
        }
    }

    /// Whether an inner scope has doomed this transaction.
    pub fn is_rollback_only(&self) -> bool {
        self.rollback_only
    }

    /// Commits the transaction.
    ///
    /// # Errors
    /// - `Aborted` when an inner scope was dropped uncommitted.
    /// - `TimedOut` when the configured timeout already elapsed.
    /// - `Sqlite` when `COMMIT` fails.
    ///
    /// Every error path leaves the transaction rolled back.
    pub fn commit(mut self) -> TransactionResult<()> {
        self.finish_commit()
    }

    /// Rolls the transaction back explicitly.
    pub fn rollback(mut self) -> TransactionResult<()> {
        self.finish_rollback()
    }

    fn mark_rollback_only(&mut self) {
        if !self.rollback_only {
            warn!(
                "event=tx_doomed module=db status=error tx_id={} reason=inner_scope_not_committed",
                self.id
            );
        }
        self.rollback_only = true;
    }

    fn finish_commit(&mut self) -> TransactionResult<()> {
        if self.rollback_only {
            self.finish_rollback()?;
            return Err(TransactionError::Aborted(self.id));
        }

        let elapsed = self.started_at.elapsed();
        if elapsed > self.options.timeout {
            self.finish_rollback()?;
            return Err(TransactionError::TimedOut {
                elapsed,
                timeout: self.options.timeout,
            });
        }

        if let Err(err) = self.conn.execute_batch("COMMIT;") {
            if let Err(rollback_err) = self.finish_rollback() {
                warn!(
                    "event=tx_rollback module=db status=error tx_id={} error={}",
                    self.id, rollback_err
                );
            }
            return Err(err.into());
        }
        self.state = TransactionState::Committed;
        debug!(
            "event=tx_commit module=db status=ok tx_id={} duration_ms={}",
            self.id,
            elapsed.as_millis()
        );
        Ok(())
    }

    fn finish_rollback(&mut self) -> TransactionResult<()> {
        if self.state != TransactionState::Active {
            return Ok(());
        }
        // Marked first so a failing ROLLBACK is not retried from Drop.
        self.state = TransactionState::RolledBack;
        self.conn.execute_batch("ROLLBACK;")?;
        info!(
            "event=tx_rollback module=db status=ok tx_id={} duration_ms={}",
            self.id,
            self.started_at.elapsed().as_millis()
        );
        Ok(())
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if let Err(err) = self.finish_rollback() {
            warn!(
                "event=tx_rollback module=db status=error tx_id={} error={}",
                self.id, err
            );
        }
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("options", &self.options)
            .field("state", &self.state)
            .field("rollback_only", &self.rollback_only)
            .finish()
    }
}

enum ScopeInner<'a> {
    Owned(Transaction),
    Joined {
        outer: &'a mut Transaction,
        completed: bool,
    },
}

/// Transaction boundary of one mutating operation.
///
/// Either owns a fresh transaction or joins the caller's ambient one.
/// Dropping the scope without [`TransactionScope::commit`] rolls back.
pub struct TransactionScope<'a> {
    inner: ScopeInner<'a>,
}

impl TransactionScope<'_> {
    /// Handle to pass into repository calls.
    pub fn transaction(&mut self) -> &mut Transaction {
        match &mut self.inner {
            ScopeInner::Owned(tx) => tx,
            ScopeInner::Joined { outer, .. } => &mut **outer,
        }
    }

    /// Whether this scope composes with an outer transaction.
    pub fn is_joined(&self) -> bool {
        matches!(self.inner, ScopeInner::Joined { .. })
    }

    /// Completes the scope.
    ///
    /// Owned scopes commit the physical transaction. Joined scopes only mark
    /// themselves complete; the outer owner decides.
    pub fn commit(mut self) -> TransactionResult<()> {
        match &mut self.inner {
            ScopeInner::Owned(tx) => tx.finish_commit(),
            ScopeInner::Joined { completed, .. } => {
                *completed = true;
                Ok(())
            }
        }
    }
}

impl Drop for TransactionScope<'_> {
    fn drop(&mut self) {
        // Owned transactions roll themselves back on drop.
        if let ScopeInner::Joined {
            outer,
            completed: false,
        } = &mut self.inner
        {
            outer.mark_rollback_only();
        }
    }
}

/// Opens transaction scopes against one [`Database`].
#[derive(Debug, Clone)]
pub struct TransactionCoordinator {
    db: Database,
    defaults: TransactionOptions,
}

impl TransactionCoordinator {
    /// Creates a coordinator whose default timeout is `default_timeout`.
    pub fn new(db: Database, default_timeout: Duration) -> Self {
        Self {
            db,
            defaults: TransactionOptions::with_timeout(default_timeout),
        }
    }

    /// Options used when the caller does not override them.
    pub fn default_options(&self) -> TransactionOptions {
        self.defaults
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Starts a new physical transaction owned by the caller.
    ///
    /// Waits for the shared connection; the returned transaction holds it
    /// until it finishes.
    ///
    /// # Errors
    /// - `TimedOut` when the connection is not free within `options.timeout`.
    /// - `Sqlite` when `BEGIN` fails.
    pub async fn begin(&self, options: TransactionOptions) -> TransactionResult<Transaction> {
        match self.db.lock_owned(options.timeout).await {
            Some(conn) => Transaction::begin(conn, options),
            None => {
                warn!(
                    "event=tx_begin module=db status=error reason=connection_busy timeout_ms={}",
                    options.timeout.as_millis()
                );
                Err(TransactionError::TimedOut {
                    elapsed: options.timeout,
                    timeout: options.timeout,
                })
            }
        }
    }

    /// Opens the scope for one mutating operation.
    ///
    /// With `ambient = Some(outer)` no new transaction is started and
    /// `options` are ignored; commit responsibility stays with the owner
    /// of `outer`.
    pub async fn open<'a>(
        &self,
        options: TransactionOptions,
        ambient: Option<&'a mut Transaction>,
    ) -> TransactionResult<TransactionScope<'a>> {
        match ambient {
            Some(outer) => {
                debug!(
                    "event=tx_join module=db status=ok tx_id={}",
                    outer.id()
                );
                Ok(TransactionScope {
                    inner: ScopeInner::Joined {
                        outer,
                        completed: false,
                    },
                })
            }
            None => Ok(TransactionScope {
                inner: ScopeInner::Owned(self.begin(options).await?),
            }),
        }
    }
}
