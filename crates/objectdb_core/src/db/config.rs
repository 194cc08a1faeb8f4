//! Store and pool configuration.
//!
//! # Responsibility
//! - Describe how to reach the embedded file store or the networked store.
//! - Hold pool sizing and timeout limits.
//! - Render the connection URL used for diagnostics and driver setup.
//!
//! # Invariants
//! - Configuration is fixed at construction time.
//! - Credentials never appear in a rendered URL.

use super::{DbError, DbResult};
use std::path::PathBuf;
use std::time::Duration;

pub const EMBEDDED_SCHEME: &str = "sqlite";
pub const EMBEDDED_EXTENSION: &str = "db";
pub const NETWORKED_SCHEME: &str = "postgresql";

const DEFAULT_MAX_POOL_SIZE: u32 = 10;
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(10 * 60);
const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_STATEMENT_CACHE_CAPACITY: usize = 16;

/// Which store to open and the parameters needed to reach it.
#[derive(Clone, PartialEq, Eq)]
pub enum StoreConfig {
    /// File-backed SQLite database. The file name is used without extension;
    /// `.db` is appended when opening.
    Embedded { file: PathBuf },
    /// PostgreSQL server reached over the network.
    Networked {
        host: String,
        port: u16,
        database: String,
        username: String,
        password: String,
        /// Raw connection flags appended after `?`, e.g. `connect_timeout=10`.
        flags: String,
    },
}

impl StoreConfig {
    pub fn embedded(file: impl Into<PathBuf>) -> Self {
        Self::Embedded { file: file.into() }
    }

    pub fn networked(
        host: impl Into<String>,
        port: u16,
        database: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        flags: impl Into<String>,
    ) -> Self {
        Self::Networked {
            host: host.into(),
            port,
            database: database.into(),
            username: username.into(),
            password: password.into(),
            flags: flags.into(),
        }
    }

    /// Short store kind label used in log events.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Embedded { .. } => "embedded",
            Self::Networked { .. } => "networked",
        }
    }

    /// Path of the embedded database file (`<file>.db`).
    pub fn database_path(&self) -> Option<PathBuf> {
        match self {
            Self::Embedded { file } => {
                let mut path = file.clone().into_os_string();
                path.push(".");
                path.push(EMBEDDED_EXTENSION);
                Some(PathBuf::from(path))
            }
            Self::Networked { .. } => None,
        }
    }

    /// Renders the connection URL.
    ///
    /// - embedded: `sqlite:<file>.db`
    /// - networked: `postgresql://<host>:<port>/<database>?<flags>`
    pub fn connection_url(&self) -> String {
        match self {
            Self::Embedded { file } => format!(
                "{EMBEDDED_SCHEME}:{}.{EMBEDDED_EXTENSION}",
                file.display()
            ),
            Self::Networked {
                host,
                port,
                database,
                flags,
                ..
            } => {
                let mut url = format!("{NETWORKED_SCHEME}://{host}:{port}/{database}");
                if !flags.is_empty() {
                    url.push('?');
                    url.push_str(flags);
                }
                url
            }
        }
    }

    /// Checks required parameters before any connection is attempted.
    pub fn validate(&self) -> DbResult<()> {
        match self {
            Self::Embedded { file } => {
                if file.as_os_str().is_empty() {
                    return Err(DbError::Config(
                        "embedded store file name cannot be empty".to_string(),
                    ));
                }
            }
            Self::Networked {
                host,
                port,
                database,
                username,
                ..
            } => {
                if host.trim().is_empty() {
                    return Err(DbError::Config("networked store host cannot be empty".to_string()));
                }
                if *port == 0 {
                    return Err(DbError::Config("networked store port cannot be 0".to_string()));
                }
                if database.trim().is_empty() {
                    return Err(DbError::Config(
                        "networked store database name cannot be empty".to_string(),
                    ));
                }
                if username.trim().is_empty() {
                    return Err(DbError::Config(
                        "networked store username cannot be empty".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Builds the driver configuration for the networked store.
    pub(crate) fn postgres_config(&self) -> DbResult<Option<postgres::Config>> {
        let Self::Networked {
            username, password, ..
        } = self
        else {
            return Ok(None);
        };

        let url = self.connection_url();
        let mut config: postgres::Config = url.parse().map_err(|err| {
            DbError::Config(format!("invalid networked connection url `{url}`: {err}"))
        })?;
        config.user(username);
        if !password.is_empty() {
            config.password(password);
        }
        Ok(Some(config))
    }
}

impl std::fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Embedded { file } => f.debug_struct("Embedded").field("file", file).finish(),
            Self::Networked {
                host,
                port,
                database,
                username,
                flags,
                ..
            } => f
                .debug_struct("Networked")
                .field("host", host)
                .field("port", port)
                .field("database", database)
                .field("username", username)
                .field("password", &"<redacted>")
                .field("flags", flags)
                .finish(),
        }
    }
}

/// Connection pool limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Upper bound on open connections. Must be at least 1.
    pub max_size: u32,
    /// Idle connections kept open; `None` keeps the pool full.
    pub min_idle: Option<u32>,
    /// Idle connections beyond `min_idle` are closed after this long.
    pub idle_timeout: Option<Duration>,
    /// How long a caller waits to borrow a connection.
    pub connection_timeout: Duration,
    /// Prepared statement cache per embedded connection; 0 disables it.
    pub statement_cache_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MAX_POOL_SIZE,
            min_idle: None,
            idle_timeout: Some(DEFAULT_IDLE_TIMEOUT),
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
            statement_cache_capacity: DEFAULT_STATEMENT_CACHE_CAPACITY,
        }
    }
}

impl PoolConfig {
    pub fn with_max_size(mut self, max_size: u32) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn validate(&self) -> DbResult<()> {
        if self.max_size == 0 {
            return Err(DbError::Config("pool max_size must be at least 1".to_string()));
        }
        if let Some(min_idle) = self.min_idle {
            if min_idle > self.max_size {
                return Err(DbError::Config(format!(
                    "pool min_idle {min_idle} exceeds max_size {}",
                    self.max_size
                )));
            }
        }
        if self.connection_timeout.is_zero() {
            return Err(DbError::Config(
                "pool connection_timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
