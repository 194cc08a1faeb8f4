//! Worker-pool policies for deferred execution.
//!
//! # Responsibility
//! - Enumerate the supported worker-pool policies and their sizing.
//! - Build the runtime whose blocking pool executes deferred operations.
//!
//! # Invariants
//! - Every policy caps the number of concurrently running operations.
//! - The `Single` policy runs operations one at a time in submission order.
//! - Thread naming comes from `WorkerPoolConfig`, never from global state.

use super::{DbError, DbResult};
use log::info;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::{Builder, Runtime};

pub const DEFAULT_THREAD_NAME: &str = "Database IO";

const SCHEDULED_WORKERS: usize = 8;
const ELASTIC_KEEP_ALIVE: Duration = Duration::from_secs(60);

/// How deferred work is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerPolicy {
    /// Fixed worker count with delayed and periodic task support.
    Scheduled,
    /// Grows up to half the processors, shrinks after 60 s idle; unbounded queue.
    Elastic,
    /// Sized to the available processors minus one, at least two.
    Fixed,
    /// One worker; operations run sequentially in submission order.
    Single,
}

impl WorkerPolicy {
    pub const ALL: [WorkerPolicy; 4] = [
        WorkerPolicy::Scheduled,
        WorkerPolicy::Elastic,
        WorkerPolicy::Fixed,
        WorkerPolicy::Single,
    ];

    /// Resolves a numeric policy selector (`0..=3`).
    pub fn from_id(id: i32) -> DbResult<Self> {
        match id {
            0 => Ok(Self::Scheduled),
            1 => Ok(Self::Elastic),
            2 => Ok(Self::Fixed),
            3 => Ok(Self::Single),
            other => Err(DbError::Config(format!(
                "worker policy id {other} not found; expected 0..=3"
            ))),
        }
    }

    pub fn id(self) -> i32 {
        match self {
            Self::Scheduled => 0,
            Self::Elastic => 1,
            Self::Fixed => 2,
            Self::Single => 3,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Elastic => "elastic",
            Self::Fixed => "fixed",
            Self::Single => "single",
        }
    }

    /// Whether delayed and periodic submissions are accepted.
    pub fn supports_scheduling(self) -> bool {
        matches!(self, Self::Scheduled)
    }

    /// Maximum number of operations running at once.
    pub fn max_workers(self) -> usize {
        let processors = available_processors();
        match self {
            Self::Scheduled => SCHEDULED_WORKERS,
            Self::Elastic => (processors / 2).max(1),
            Self::Fixed => processors.saturating_sub(1).max(2),
            Self::Single => 1,
        }
    }

    /// Idle time after which a worker thread exits; `None` keeps the
    /// runtime default.
    pub fn keep_alive(self) -> Option<Duration> {
        match self {
            Self::Elastic => Some(ELASTIC_KEEP_ALIVE),
            Self::Scheduled | Self::Fixed | Self::Single => None,
        }
    }
}

impl Display for WorkerPolicy {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for WorkerPolicy {
    type Err = DbError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        if let Ok(id) = normalized.parse::<i32>() {
            return Self::from_id(id);
        }
        Self::ALL
            .into_iter()
            .find(|policy| policy.name() == normalized)
            .ok_or_else(|| {
                DbError::Config(format!(
                    "unknown worker policy `{value}`; expected scheduled|elastic|fixed|single"
                ))
            })
    }
}

/// Worker-pool construction parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerPoolConfig {
    pub policy: WorkerPolicy,
    /// Worker threads are named `<thread_name> #<n>`.
    pub thread_name: String,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            policy: WorkerPolicy::Fixed,
            thread_name: DEFAULT_THREAD_NAME.to_string(),
        }
    }
}

impl WorkerPoolConfig {
    pub fn new(policy: WorkerPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    pub fn with_thread_name(mut self, thread_name: impl Into<String>) -> Self {
        self.thread_name = thread_name.into();
        self
    }
}

/// Builds the runtime that executes deferred operations for `config`.
///
/// Operations run on the runtime's blocking pool, whose thread cap and idle
/// keep-alive implement the policy. One async worker drives timers for
/// scheduled submissions.
pub(crate) fn build_runtime(config: &WorkerPoolConfig) -> DbResult<Runtime> {
    if config.thread_name.trim().is_empty() {
        return Err(DbError::Config("worker thread name cannot be empty".to_string()));
    }

    let policy = config.policy;
    let prefix = config.thread_name.clone();
    let counter = Arc::new(AtomicUsize::new(1));

    let mut builder = Builder::new_multi_thread();
    builder
        .worker_threads(1)
        .max_blocking_threads(policy.max_workers())
        .thread_name_fn(move || {
            let n = counter.fetch_add(1, Ordering::Relaxed);
            format!("{prefix} #{n}")
        })
        .enable_time();
    if let Some(keep_alive) = policy.keep_alive() {
        builder.thread_keep_alive(keep_alive);
    }

    let runtime = builder.build().map_err(|err| {
        DbError::Config(format!("failed to start `{policy}` worker pool: {err}"))
    })?;

    info!(
        "event=workers_start module=db status=ok policy={} max_workers={} thread_name={}",
        policy,
        policy.max_workers(),
        config.thread_name
    );
    Ok(runtime)
}

fn available_processors() -> usize {
    std::thread::available_parallelism().map_or(1, |n| n.get())
}

#[cfg(test)]
mod tests {
    use super::{build_runtime, WorkerPolicy, WorkerPoolConfig};
    use crate::db::DbError;

    #[test]
    fn from_id_maps_known_selectors_and_rejects_others() {
        for policy in WorkerPolicy::ALL {
            assert_eq!(WorkerPolicy::from_id(policy.id()).unwrap(), policy);
        }
        let err = WorkerPolicy::from_id(4).unwrap_err();
        assert!(matches!(err, DbError::Config(message) if message.contains('4')));
        assert!(WorkerPolicy::from_id(-1).is_err());
    }

    #[test]
    fn parses_names_and_numeric_selectors() {
        assert_eq!("Elastic".parse::<WorkerPolicy>().unwrap(), WorkerPolicy::Elastic);
        assert_eq!(" single ".parse::<WorkerPolicy>().unwrap(), WorkerPolicy::Single);
        assert_eq!("0".parse::<WorkerPolicy>().unwrap(), WorkerPolicy::Scheduled);
        assert!("cached".parse::<WorkerPolicy>().is_err());
    }

    #[test]
    fn sizing_follows_policy() {
        assert_eq!(WorkerPolicy::Scheduled.max_workers(), 8);
        assert_eq!(WorkerPolicy::Single.max_workers(), 1);
        assert!(WorkerPolicy::Fixed.max_workers() >= 2);
        assert!(WorkerPolicy::Elastic.max_workers() >= 1);
        assert!(WorkerPolicy::Elastic.keep_alive().is_some());
        assert!(WorkerPolicy::Scheduled.supports_scheduling());
        assert!(!WorkerPolicy::Fixed.supports_scheduling());
    }

    #[test]
    fn worker_threads_use_configured_name() {
        let config = WorkerPoolConfig::new(WorkerPolicy::Single).with_thread_name("Objects IO");
        let runtime = build_runtime(&config).unwrap();
        let name = runtime
            .block_on(runtime.spawn_blocking(|| {
                std::thread::current().name().map(str::to_string)
            }))
            .unwrap()
            .unwrap();
        assert!(name.starts_with("Objects IO #"), "unexpected thread name {name}");
    }

    #[test]
    fn empty_thread_name_is_rejected() {
        let config = WorkerPoolConfig::new(WorkerPolicy::Fixed).with_thread_name("  ");
        assert!(matches!(build_runtime(&config), Err(DbError::Config(_))));
    }
}
