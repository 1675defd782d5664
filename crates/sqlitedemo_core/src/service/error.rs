//! Operation error taxonomy and the single classification funnel.
//!
//! # Responsibility
//! - Name every way a customer operation can fail.
//! - Resolve wrapped errors to their root cause before logging.
//! - Log each failure exactly once and hand the error back to the caller.
//!
//! # Invariants
//! - `classify` never swallows an error and never changes a storage-driver
//!   error; other errors come back as their root cause.
//! - `kind()` of a wrapped error is the kind of its root.

use crate::db::transaction::TransactionError;
use crate::db::DbError;
use crate::model::customer::ValidationError;
use crate::repo::customer_repo::RepoError;
use crate::service::lock_table::OperationKind;
use crate::service::recorder::{LogProperties, LogRecorder};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type ServiceResult<T> = Result<T, OperationError>;

/// Coarse error kind for callers mapping failures to responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    NotFound,
    AmbiguousState,
    Conflict,
    LockConflict,
    Storage,
    Unclassified,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::NotFound => "not_found",
            Self::AmbiguousState => "ambiguous_state",
            Self::Conflict => "conflict",
            Self::LockConflict => "lock_conflict",
            Self::Storage => "storage",
            Self::Unclassified => "unclassified",
        }
    }
}

/// Failure of a customer operation.
#[derive(Debug)]
pub enum OperationError {
    /// Missing, empty or malformed required input.
    Validation(ValidationError),
    /// Existence check found no row for the key.
    NotFound { key: String },
    /// Existence check found more than one row for the key.
    AmbiguousState { key: String, matches: usize },
    /// Create target already exists.
    Conflict { key: String },
    /// Another operation holds the key.
    LockConflict {
        key: String,
        held_by: Option<OperationKind>,
    },
    /// Mutation reported an affected-row count other than one.
    Storage {
        operation: OperationKind,
        key: String,
        affected: usize,
    },
    /// Repository or driver failure.
    Repository(RepoError),
    /// Transaction begin/commit failure.
    Transaction(TransactionError),
    /// Committed state does not read back as exactly one row.
    InconsistentState { key: String, rows: usize },
    /// Wrapper adding where an inner failure happened.
    Context {
        context: String,
        source: Box<OperationError>,
    },
}

impl OperationError {
    /// Wraps `self` with a description of the failing step.
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Kind of the root cause.
    pub fn kind(&self) -> ErrorKind {
        match root_cause(self) {
            Self::Validation(_) => ErrorKind::Validation,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::AmbiguousState { .. } => ErrorKind::AmbiguousState,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::LockConflict { .. } => ErrorKind::LockConflict,
            Self::Storage { .. } => ErrorKind::Storage,
            Self::Repository(_)
            | Self::Transaction(_)
            | Self::InconsistentState { .. }
            | Self::Context { .. } => ErrorKind::Unclassified,
        }
    }

    /// Whether this error came straight from the storage driver or the
    /// row-count check, which the funnel passes through unchanged.
    pub fn is_storage_driver(&self) -> bool {
        matches!(
            self,
            Self::Storage { .. }
                | Self::Repository(RepoError::Db(DbError::Sqlite(_)))
                | Self::Transaction(TransactionError::Sqlite(_))
        )
    }

    /// Consumes the chain and returns its innermost error.
    pub fn into_root_cause(self) -> Self {
        match self {
            Self::Context { source, .. } => source.into_root_cause(),
            other => other,
        }
    }
}

/// Walks `Context` wrappers down to the innermost error.
pub fn root_cause(error: &OperationError) -> &OperationError {
    let mut current = error;
    while let OperationError::Context { source, .. } = current {
        current = &**source;
    }
    current
}

/// Logs `error` once and returns the error the caller must propagate.
///
/// Errors rooted in the storage driver are logged and returned as they are,
/// context included. Anything else is reduced to its root cause, which is
/// logged with `properties`.
pub fn classify(
    error: OperationError,
    recorder: &dyn LogRecorder,
    properties: &LogProperties,
) -> OperationError {
    if root_cause(&error).is_storage_driver() {
        recorder.write_error(&error);
        return error;
    }

    let root = error.into_root_cause();
    let mut properties = properties.clone();
    properties.insert("ErrorKind".to_string(), root.kind().as_str().to_string());
    recorder.write_error_with(&root, &properties);
    root
}

impl Display for OperationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::NotFound { key } => write!(f, "The CustomerID {key} is not found."),
            Self::AmbiguousState { key, matches } => write!(
                f,
                "The CustomerID {key} matches {matches} rows; expected exactly one."
            ),
            Self::Conflict { key } => write!(f, "The CustomerID {key} is exists."),
            Self::LockConflict { key, held_by } => match held_by {
                Some(kind) => write!(f, "The CustomerID {key} is locked by {kind}."),
                None => write!(f, "The CustomerID {key} is locked."),
            },
            Self::Storage {
                operation,
                key,
                affected,
            } => write!(
                f,
                "{} failed for CustomerID {key}: {affected} rows affected.",
                storage_verb(*operation)
            ),
            Self::Repository(err) => write!(f, "{err}"),
            Self::Transaction(err) => write!(f, "{err}"),
            Self::InconsistentState { key, rows } => write!(
                f,
                "inconsistent customer state: CustomerID {key} read back {rows} rows"
            ),
            Self::Context { context, source } => write!(f, "{context}: {source}"),
        }
    }
}

fn storage_verb(operation: OperationKind) -> &'static str {
    match operation {
        OperationKind::Add => "Insert",
        OperationKind::Update => "Update",
        OperationKind::Delete => "Delete",
    }
}

impl Error for OperationError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Repository(err) => Some(err),
            Self::Transaction(err) => Some(err),
            Self::Context { source, .. } => Some(&**source),
            Self::NotFound { .. }
            | Self::AmbiguousState { .. }
            | Self::Conflict { .. }
            | Self::LockConflict { .. }
            | Self::Storage { .. }
            | Self::InconsistentState { .. } => None,
        }
    }
}

impl From<ValidationError> for OperationError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<RepoError> for OperationError {
    fn from(value: RepoError) -> Self {
        Self::Repository(value)
    }
}

impl From<TransactionError> for OperationError {
    fn from(value: TransactionError) -> Self {
        Self::Transaction(value)
    }
}
