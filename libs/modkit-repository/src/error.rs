//! Infrastructure error channel for the repository layer.
//!
//! Domain-level conditions (not found, bad field name, missing identity
//! capability) are reported through [`Outcome`](crate::Outcome) values. Everything
//! in this module is an infrastructure failure: the store, the transaction
//! lifecycle, cancellation, or configuration.

use sea_orm::DbErr;
use thiserror::Error;

use crate::migration_runner::MigrationError;

/// Library-local result type.
pub type Result<T> = std::result::Result<T, RepositoryError>;

/// Typed error for the persistence context, repositories and unit of work.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// The underlying store rejected the operation (connectivity, constraint
    /// violation, missing row on update, ...). Never retried by this crate.
    #[error(transparent)]
    Db(#[from] DbErr),

    /// The caller's cancellation token fired before the store call completed.
    #[error("operation cancelled")]
    Cancelled,

    #[error("a transaction is already active on this unit of work")]
    TransactionAlreadyActive,

    #[error("no active transaction")]
    NoActiveTransaction,

    /// The context (and its connection pool) has already been released.
    #[error("persistence context has been disposed")]
    Disposed,

    #[error("invalid persistence configuration: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error(transparent)]
    Migration(#[from] MigrationError),
}

impl From<figment::Error> for RepositoryError {
    fn from(e: figment::Error) -> Self {
        RepositoryError::Config(Box::new(e))
    }
}

impl RepositoryError {
    /// Returns `true` when the error was produced by a fired cancellation token.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RepositoryError::Cancelled)
    }
}
