//! Pooled data access for the `objects` table.
//! One accessor contract, executed directly or on a worker pool.

pub mod db;
pub mod logging;
pub mod model;
pub mod repo;

pub use db::{
    AsyncResult, Database, DbError, DbResult, Execution, ExecutionMode, PoolConfig,
    RepeatingTask, StoreConfig, StorePool, WorkerPolicy, WorkerPoolConfig,
};
pub use logging::{default_log_level, flush_logs, init_logging, logging_status, LogSettings};
pub use model::record::{Record, RecordId};
pub use repo::object_dao::{
    parse_record_id, ObjectDao, PostgresObjectDao, SqliteObjectDao,
};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
