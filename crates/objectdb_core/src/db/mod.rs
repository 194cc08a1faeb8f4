//! Store bootstrap, pooling and execution entry points.
//!
//! # Responsibility
//! - Describe how to reach the embedded or networked store.
//! - Own the bounded connection pool and the worker pool for deferred work.
//! - Execute accessor operations in direct or deferred mode.
//!
//! # Invariants
//! - Store driver errors are propagated unmodified inside `DbError`.
//! - No work is admitted after `Database::shutdown`.

use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod config;
pub mod database;
pub mod pool;
pub mod workers;

pub use config::{PoolConfig, StoreConfig};
pub use database::{AsyncResult, Database, Execution, ExecutionMode, RepeatingTask};
pub use pool::{PoolStatus, StorePool};
pub use workers::{WorkerPolicy, WorkerPoolConfig};

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug)]
pub enum DbError {
    /// Invalid or missing construction parameters.
    Config(String),
    /// A runtime argument failed validation before any store interaction.
    InvalidArgument(String),
    Sqlite(rusqlite::Error),
    Postgres(postgres::Error),
    /// Connection could not be borrowed from the pool.
    Pool(r2d2::Error),
    /// A persisted row could not be mapped into a `Record`.
    InvalidData(String),
    /// The database was shut down.
    Unavailable(String),
    /// Deferred work ended without producing a result.
    WorkerLost(String),
    /// A blocking wait was requested where it would stall the async runtime.
    WouldBlock(String),
}

impl DbError {
    /// Returns whether this is a store-level uniqueness/constraint failure.
    pub fn is_constraint_violation(&self) -> bool {
        match self {
            Self::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => {
                err.code == rusqlite::ErrorCode::ConstraintViolation
            }
            Self::Postgres(err) => err.code().is_some_and(|state| {
                *state == postgres::error::SqlState::UNIQUE_VIOLATION
                    || *state == postgres::error::SqlState::INTEGRITY_CONSTRAINT_VIOLATION
            }),
            _ => false,
        }
    }

    /// Returns whether the error comes from the store driver or the pool.
    pub fn is_store_error(&self) -> bool {
        matches!(self, Self::Sqlite(_) | Self::Postgres(_) | Self::Pool(_))
    }
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(message) => write!(f, "invalid configuration: {message}"),
            Self::InvalidArgument(message) => write!(f, "invalid argument: {message}"),
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::Postgres(err) => write!(f, "{err}"),
            Self::Pool(err) => write!(f, "connection pool error: {err}"),
            Self::InvalidData(message) => write!(f, "invalid persisted record data: {message}"),
            Self::Unavailable(message) => write!(f, "database unavailable: {message}"),
            Self::WorkerLost(message) => write!(f, "deferred operation lost: {message}"),
            Self::WouldBlock(message) => write!(f, "blocking wait refused: {message}"),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::Postgres(err) => Some(err),
            Self::Pool(err) => Some(err),
            Self::Config(_)
            | Self::InvalidArgument(_)
            | Self::InvalidData(_)
            | Self::Unavailable(_)
            | Self::WorkerLost(_)
            | Self::WouldBlock(_) => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

impl From<postgres::Error> for DbError {
    fn from(value: postgres::Error) -> Self {
        Self::Postgres(value)
    }
}

impl From<r2d2::Error> for DbError {
    fn from(value: r2d2::Error) -> Self {
        Self::Pool(value)
    }
}
