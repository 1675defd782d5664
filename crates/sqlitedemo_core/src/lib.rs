//! Core of the SQLite customer demo.
//! This crate is the single source of truth for customer invariants.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use config::{AppSettings, DatabaseSettings, LoggingSettings, SettingsError};
pub use db::transaction::{
    IsolationLevel, Transaction, TransactionCoordinator, TransactionError, TransactionOptions,
    TransactionScope,
};
pub use db::{Database, DbError};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::customer::{
    Customer, CustomerDeleted, CustomerFilter, CustomerPatch, ValidationError,
};
pub use repo::customer_repo::{
    CustomerRepository, RepoError, RepoResult, SqliteCustomerRepository,
};
pub use service::customer_service::CustomerService;
pub use service::error::{classify, ErrorKind, OperationError, ServiceResult};
pub use service::lock_table::{EntityLockTable, LockLease, OperationKind};
pub use service::recorder::{LogFacadeRecorder, LogProperties, LogRecorder, NullRecorder};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
