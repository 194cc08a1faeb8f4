//! Bounded connection pool over the embedded or networked store.
//!
//! # Responsibility
//! - Open an r2d2 pool for SQLite files or PostgreSQL servers.
//! - Configure every new embedded connection before first use.
//! - Lend one connection at a time to an accessor unit of work.
//!
//! # Invariants
//! - A borrowed connection is used by exactly one operation at a time.
//! - The pool never exceeds `PoolConfig::max_size` open connections.
//! - No retry or reconnect happens here; failures surface to the caller.

use super::config::{PoolConfig, StoreConfig};
use super::{DbError, DbResult};
use crate::repo::object_dao::{ObjectDao, PostgresObjectDao, SqliteObjectDao};
use log::{debug, error, info};
use postgres::NoTls;
use r2d2::Pool;
use r2d2_postgres::PostgresConnectionManager;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use std::time::{Duration, Instant};

const SQLITE_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub type SqlitePool = Pool<SqliteConnectionManager>;
pub type PostgresPool = Pool<PostgresConnectionManager<NoTls>>;

/// Connection pool for one store.
///
/// Cloning is cheap and shares the same underlying connections.
#[derive(Clone)]
pub enum StorePool {
    Embedded(SqlitePool),
    Networked(PostgresPool),
}

/// Snapshot of pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    pub max_size: u32,
    pub connections: u32,
    pub idle_connections: u32,
}

/// Runs on each new SQLite connection.
#[derive(Debug)]
struct SqliteCustomizer {
    statement_cache_capacity: usize,
}

impl r2d2::CustomizeConnection<Connection, rusqlite::Error> for SqliteCustomizer {
    fn on_acquire(&self, conn: &mut Connection) -> Result<(), rusqlite::Error> {
        conn.busy_timeout(SQLITE_BUSY_TIMEOUT)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;\
             PRAGMA foreign_keys = ON;\
             PRAGMA synchronous = NORMAL;",
        )?;
        conn.set_prepared_statement_cache_capacity(self.statement_cache_capacity);
        Ok(())
    }
}

impl StorePool {
    /// Opens a pool for `store` using the limits in `config`.
    ///
    /// # Side effects
    /// - Establishes the initial idle connections.
    /// - Emits `pool_open` logging events with duration and status.
    ///
    /// # Errors
    /// - `DbError::Config` when store or pool parameters are invalid.
    /// - `DbError::Pool` when the initial connections cannot be established.
    pub fn open(store: &StoreConfig, config: &PoolConfig) -> DbResult<Self> {
        let started_at = Instant::now();
        let kind = store.kind();
        info!(
            "event=pool_open module=db status=start kind={} url={} max_size={}",
            kind,
            store.connection_url(),
            config.max_size
        );

        match Self::build(store, config) {
            Ok(pool) => {
                info!(
                    "event=pool_open module=db status=ok kind={} duration_ms={}",
                    kind,
                    started_at.elapsed().as_millis()
                );
                Ok(pool)
            }
            Err(err) => {
                error!(
                    "event=pool_open module=db status=error kind={} duration_ms={} error={}",
                    kind,
                    started_at.elapsed().as_millis(),
                    err
                );
                Err(err)
            }
        }
    }

    fn build(store: &StoreConfig, config: &PoolConfig) -> DbResult<Self> {
        store.validate()?;
        config.validate()?;

        match store {
            StoreConfig::Embedded { .. } => {
                let path = store.database_path().ok_or_else(|| {
                    DbError::Config("embedded store has no database path".to_string())
                })?;
                let manager = SqliteConnectionManager::file(path);
                let pool = Pool::builder()
                    .max_size(config.max_size)
                    .min_idle(config.min_idle)
                    .idle_timeout(config.idle_timeout)
                    .connection_timeout(config.connection_timeout)
                    .connection_customizer(Box::new(SqliteCustomizer {
                        statement_cache_capacity: config.statement_cache_capacity,
                    }))
                    .build(manager)?;
                Ok(Self::Embedded(pool))
            }
            StoreConfig::Networked { .. } => {
                let pg_config = store.postgres_config()?.ok_or_else(|| {
                    DbError::Config("networked store has no driver configuration".to_string())
                })?;
                let manager = PostgresConnectionManager::new(pg_config, NoTls);
                let pool = Pool::builder()
                    .max_size(config.max_size)
                    .min_idle(config.min_idle)
                    .idle_timeout(config.idle_timeout)
                    .connection_timeout(config.connection_timeout)
                    .build(manager)?;
                Ok(Self::Networked(pool))
            }
        }
    }

    /// Borrows one connection, runs `op` against the dialect accessor bound to
    /// it, then returns the connection to the pool.
    pub fn with_dao<R, F>(&self, op: F) -> DbResult<R>
    where
        F: FnOnce(&mut dyn ObjectDao) -> DbResult<R>,
    {
        match self {
            Self::Embedded(pool) => {
                let conn = pool.get()?;
                debug!("event=conn_borrow module=db status=ok kind=embedded");
                let mut dao = SqliteObjectDao::new(&conn);
                op(&mut dao)
            }
            Self::Networked(pool) => {
                let mut client = pool.get()?;
                debug!("event=conn_borrow module=db status=ok kind=networked");
                let mut dao = PostgresObjectDao::new(&mut client);
                op(&mut dao)
            }
        }
    }

    pub fn status(&self) -> PoolStatus {
        let (max_size, state) = match self {
            Self::Embedded(pool) => (pool.max_size(), pool.state()),
            Self::Networked(pool) => (pool.max_size(), pool.state()),
        };
        PoolStatus {
            max_size,
            connections: state.connections,
            idle_connections: state.idle_connections,
        }
    }
}
