//! Execution façade over the connection pool and the worker pool.
//!
//! # Responsibility
//! - Run one accessor operation directly on the caller's thread, or defer it
//!   to the worker pool and hand back an eventual result.
//! - Own the lifecycle of both pools, including explicit shutdown.
//!
//! # Invariants
//! - Both execution modes share one connection pool and one accessor contract.
//! - Deferred failures are delivered through the result handle; a failure
//!   nobody is waiting for is logged, never dropped silently.
//! - Shutdown drains: admitted operations finish, new ones are refused with
//!   `DbError::Unavailable`.

use super::config::{PoolConfig, StoreConfig};
use super::pool::{PoolStatus, StorePool};
use super::workers::{build_runtime, WorkerPolicy, WorkerPoolConfig};
use super::{DbError, DbResult};
use crate::repo::object_dao::ObjectDao;
use log::{debug, info, warn};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio::runtime::{Handle, Runtime, RuntimeFlavor};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Where an operation runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionMode {
    /// On the calling thread, blocking until the store round trip completes.
    Sync,
    /// On the worker pool; the caller receives an [`AsyncResult`].
    Async,
}

impl ExecutionMode {
    pub fn from_async_flag(is_async: bool) -> Self {
        if is_async {
            Self::Async
        } else {
            Self::Sync
        }
    }
}

/// Outcome of [`Database::run`].
pub enum Execution<R> {
    /// Direct execution already finished.
    Ready(DbResult<R>),
    /// Deferred execution is in progress.
    Pending(AsyncResult<R>),
}

impl<R> Execution<R> {
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }

    /// Waits for the result, blocking the current thread in deferred mode.
    ///
    /// # Errors
    /// - Same as [`AsyncResult::join`].
    pub fn join(self) -> DbResult<R> {
        match self {
            Self::Ready(result) => result,
            Self::Pending(handle) => handle.join(),
        }
    }

    /// Converts into an awaitable handle regardless of mode.
    pub fn into_async(self) -> AsyncResult<R> {
        match self {
            Self::Ready(result) => AsyncResult::ready(result),
            Self::Pending(handle) => handle,
        }
    }
}

/// Eventual result of a deferred operation.
///
/// Await it from async code, or call [`AsyncResult::join`] from a plain thread.
pub struct AsyncResult<R> {
    state: AsyncState<R>,
}

enum AsyncState<R> {
    Ready(Option<DbResult<R>>),
    Pending(oneshot::Receiver<DbResult<R>>),
}

// `R` is only ever moved out, never pinned.
impl<R> Unpin for AsyncResult<R> {}

impl<R> AsyncResult<R> {
    fn ready(result: DbResult<R>) -> Self {
        Self {
            state: AsyncState::Ready(Some(result)),
        }
    }

    fn pending(receiver: oneshot::Receiver<DbResult<R>>) -> Self {
        Self {
            state: AsyncState::Pending(receiver),
        }
    }

    /// Blocks the current thread until the deferred operation finishes.
    ///
    /// Inside a multi-thread tokio runtime the wait goes through
    /// `block_in_place`, so other tasks keep running.
    ///
    /// # Errors
    /// - The operation's own error.
    /// - `DbError::WorkerLost` when the operation panicked or was cancelled.
    /// - `DbError::WouldBlock` on a current-thread runtime, where blocking
    ///   would stall the runtime; `.await` the handle there. The operation
    ///   itself keeps running.
    pub fn join(self) -> DbResult<R> {
        let receiver = match self.state {
            AsyncState::Ready(result) => return result.unwrap_or_else(|| Err(result_taken())),
            AsyncState::Pending(receiver) => receiver,
        };
        let received = match Handle::try_current() {
            Err(_) => receiver.blocking_recv(),
            Ok(handle) => match handle.runtime_flavor() {
                RuntimeFlavor::MultiThread => {
                    tokio::task::block_in_place(|| receiver.blocking_recv())
                }
                flavor => {
                    return Err(DbError::WouldBlock(format!(
                        "cannot wait for a deferred result on a {flavor:?} runtime"
                    )))
                }
            },
        };
        received.unwrap_or_else(|_| Err(worker_lost()))
    }
}

impl<R> Future for AsyncResult<R> {
    type Output = DbResult<R>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().state {
            AsyncState::Ready(result) => {
                Poll::Ready(result.take().unwrap_or_else(|| Err(result_taken())))
            }
            AsyncState::Pending(receiver) => Pin::new(receiver)
                .poll(cx)
                .map(|received| received.unwrap_or_else(|_| Err(worker_lost()))),
        }
    }
}

/// Handle to a periodic operation started by [`Database::schedule_repeating`].
pub struct RepeatingTask {
    task: JoinHandle<()>,
    outcome: AsyncResult<()>,
}

impl RepeatingTask {
    /// Stops further runs. A run already in progress completes.
    pub fn cancel(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits until the task stops.
    ///
    /// Returns the error of the first failed run. After cancellation or
    /// shutdown it returns `DbError::WorkerLost`, or `Ok(())` when the task
    /// itself observed the shutdown between runs.
    pub fn join(self) -> DbResult<()> {
        self.outcome.join()
    }
}

/// Admission control shared by every execution path.
#[derive(Default)]
struct Gate {
    state: Mutex<GateState>,
    idle: Condvar,
}

#[derive(Default)]
struct GateState {
    closed: bool,
    in_flight: usize,
}

/// Marks one admitted operation; released on drop, including on panic.
struct Admission {
    gate: Arc<Gate>,
}

impl Gate {
    fn admit(self: &Arc<Self>) -> DbResult<Admission> {
        let mut state = lock(&self.state);
        if state.closed {
            return Err(DbError::Unavailable("database has been shut down".to_string()));
        }
        state.in_flight += 1;
        Ok(Admission {
            gate: Arc::clone(self),
        })
    }

    /// Closes the gate. Returns `false` when it was already closed.
    fn close(&self) -> bool {
        let mut state = lock(&self.state);
        let was_open = !state.closed;
        state.closed = true;
        was_open
    }

    fn in_flight(&self) -> usize {
        lock(&self.state).in_flight
    }

    fn wait_idle(&self) {
        let mut state = lock(&self.state);
        while state.in_flight > 0 {
            state = self
                .idle
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

impl Drop for Admission {
    fn drop(&mut self) {
        let mut state = lock(&self.gate.state);
        state.in_flight = state.in_flight.saturating_sub(1);
        if state.in_flight == 0 {
            self.gate.idle.notify_all();
        }
    }
}

/// Pooled store access with direct and deferred execution.
///
/// `Database` is `Send + Sync`; share it behind an `Arc` across threads.
pub struct Database {
    store: StoreConfig,
    policy: WorkerPolicy,
    pool: Mutex<Option<StorePool>>,
    runtime: Mutex<Option<Runtime>>,
    handle: Handle,
    gate: Arc<Gate>,
}

impl Database {
    /// Opens the store and starts the worker pool.
    ///
    /// # Errors
    /// - `DbError::Config` for invalid store, pool or worker parameters.
    /// - Store errors when the initial connections cannot be established.
    ///   Nothing is left running in that case.
    pub fn open(
        store: StoreConfig,
        pool_config: &PoolConfig,
        workers: &WorkerPoolConfig,
    ) -> DbResult<Self> {
        store.validate()?;
        pool_config.validate()?;
        let runtime = build_runtime(workers)?;

        let pool = match StorePool::open(&store, pool_config) {
            Ok(pool) => pool,
            Err(err) => {
                runtime.shutdown_background();
                return Err(err);
            }
        };

        Ok(Self::assemble(store, pool, runtime, workers))
    }

    /// Builds a database over an already opened connection pool.
    ///
    /// `store` describes where `pool` connects; it is reported by
    /// [`Database::store`] and not reopened.
    ///
    /// # Errors
    /// - `DbError::Config` for invalid worker parameters.
    pub fn from_parts(
        store: StoreConfig,
        pool: StorePool,
        workers: &WorkerPoolConfig,
    ) -> DbResult<Self> {
        let runtime = build_runtime(workers)?;
        Ok(Self::assemble(store, pool, runtime, workers))
    }

    fn assemble(
        store: StoreConfig,
        pool: StorePool,
        runtime: Runtime,
        workers: &WorkerPoolConfig,
    ) -> Self {
        info!(
            "event=database_open module=db status=ok kind={} policy={}",
            store.kind(),
            workers.policy
        );

        Self {
            store,
            policy: workers.policy,
            pool: Mutex::new(Some(pool)),
            handle: runtime.handle().clone(),
            runtime: Mutex::new(Some(runtime)),
            gate: Arc::new(Gate::default()),
        }
    }

    /// Opens `store` with default pool limits and the given worker policy.
    pub fn with_policy(store: StoreConfig, policy: WorkerPolicy) -> DbResult<Self> {
        Self::open(store, &PoolConfig::default(), &WorkerPoolConfig::new(policy))
    }

    pub fn store(&self) -> &StoreConfig {
        &self.store
    }

    pub fn policy(&self) -> WorkerPolicy {
        self.policy
    }

    pub fn is_shutdown(&self) -> bool {
        lock(&self.gate.state).closed
    }

    /// Returns pool occupancy, or `None` after shutdown.
    pub fn pool_status(&self) -> Option<PoolStatus> {
        lock(&self.pool).as_ref().map(StorePool::status)
    }

    /// Runs `op` in the requested mode.
    pub fn run<R, F>(&self, mode: ExecutionMode, op: F) -> Execution<R>
    where
        F: FnOnce(&mut dyn ObjectDao) -> DbResult<R> + Send + 'static,
        R: Send + 'static,
    {
        match mode {
            ExecutionMode::Sync => Execution::Ready(self.execute(op)),
            ExecutionMode::Async => Execution::Pending(self.submit(op)),
        }
    }

    /// Runs `op` in the requested mode and waits for its result.
    ///
    /// Deferred mode waits through [`AsyncResult::join`]: it may be called
    /// from plain threads and from a multi-thread tokio runtime, and yields
    /// `DbError::WouldBlock` on a current-thread runtime instead of panicking.
    pub fn with_execute<R, F>(&self, mode: ExecutionMode, op: F) -> DbResult<R>
    where
        F: FnOnce(&mut dyn ObjectDao) -> DbResult<R> + Send + 'static,
        R: Send + 'static,
    {
        self.run(mode, op).join()
    }

    /// Runs `op` on the calling thread.
    pub fn execute<R, F>(&self, op: F) -> DbResult<R>
    where
        F: FnOnce(&mut dyn ObjectDao) -> DbResult<R>,
    {
        let (_admission, pool) = self.admit()?;
        let result = pool.with_dao(op);
        if let Err(err) = &result {
            debug!("event=execute module=db status=error mode=sync error={}", err);
        }
        result
    }

    /// Submits `op` to the worker pool.
    ///
    /// Refusals (for example after shutdown) are delivered through the
    /// returned handle like any other failure.
    pub fn submit<R, F>(&self, op: F) -> AsyncResult<R>
    where
        F: FnOnce(&mut dyn ObjectDao) -> DbResult<R> + Send + 'static,
        R: Send + 'static,
    {
        let (admission, pool) = match self.admit() {
            Ok(admitted) => admitted,
            Err(err) => return AsyncResult::ready(Err(err)),
        };
        let (sender, receiver) = oneshot::channel();

        self.handle.spawn_blocking(move || {
            let _admission = admission;
            deliver(sender, pool.with_dao(op));
        });

        AsyncResult::pending(receiver)
    }

    /// Submits `op` to run once after `delay`.
    ///
    /// Only the `Scheduled` policy accepts delayed work; other policies yield
    /// `DbError::Config` through the handle.
    pub fn schedule<R, F>(&self, delay: Duration, op: F) -> AsyncResult<R>
    where
        F: FnOnce(&mut dyn ObjectDao) -> DbResult<R> + Send + 'static,
        R: Send + 'static,
    {
        if let Err(err) = self.ensure_scheduling() {
            return AsyncResult::ready(Err(err));
        }
        let (admission, pool) = match self.admit() {
            Ok(admitted) => admitted,
            Err(err) => return AsyncResult::ready(Err(err)),
        };
        let (sender, receiver) = oneshot::channel();

        self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tokio::task::spawn_blocking(move || {
                let _admission = admission;
                deliver(sender, pool.with_dao(op));
            })
            .await;
        });

        AsyncResult::pending(receiver)
    }

    /// Runs `op` every `period`, first after one full period.
    ///
    /// The task stops at the first failed run and reports that error through
    /// [`RepeatingTask::join`]. Runs are never overlapped.
    ///
    /// # Errors
    /// - `DbError::Config` when the policy is not `Scheduled`.
    /// - `DbError::InvalidArgument` when `period` is zero.
    /// - `DbError::Unavailable` after shutdown.
    pub fn schedule_repeating<F>(&self, period: Duration, op: F) -> DbResult<RepeatingTask>
    where
        F: Fn(&mut dyn ObjectDao) -> DbResult<()> + Send + Sync + 'static,
    {
        self.ensure_scheduling()?;
        if period.is_zero() {
            return Err(DbError::InvalidArgument(
                "repeating period must be positive".to_string(),
            ));
        }
        let (admission, pool) = self.admit()?;
        drop(admission);

        let gate = Arc::clone(&self.gate);
        let op = Arc::new(op);
        let (sender, receiver) = oneshot::channel();

        let task = self.handle.spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut ticker = tokio::time::interval_at(start, period);
            let outcome = loop {
                ticker.tick().await;
                // Shutdown ends the schedule without error.
                let Ok(admission) = gate.admit() else {
                    break Ok(());
                };
                let pool = pool.clone();
                let op = Arc::clone(&op);
                let run = tokio::task::spawn_blocking(move || {
                    let _admission = admission;
                    pool.with_dao(|dao| (*op)(dao))
                })
                .await;
                match run {
                    Ok(Ok(())) => continue,
                    Ok(Err(err)) => break Err(err),
                    Err(join_err) => break Err(DbError::WorkerLost(join_err.to_string())),
                }
            };
            deliver(sender, outcome);
        });

        Ok(RepeatingTask {
            task,
            outcome: AsyncResult::pending(receiver),
        })
    }

    /// Stops accepting work, waits for admitted operations to finish, then
    /// releases the worker pool and every pooled connection.
    ///
    /// Calling it again is a no-op. Must not be called from inside an
    /// operation running on this database, which would wait on itself.
    pub fn shutdown(&self) {
        if !self.gate.close() {
            return;
        }
        let started_at = Instant::now();
        info!(
            "event=database_shutdown module=db status=start in_flight={}",
            self.gate.in_flight()
        );

        self.gate.wait_idle();
        if let Some(runtime) = lock(&self.runtime).take() {
            runtime.shutdown_background();
        }
        let pool = lock(&self.pool).take();
        drop(pool);

        info!(
            "event=database_shutdown module=db status=ok duration_ms={}",
            started_at.elapsed().as_millis()
        );
    }

    fn admit(&self) -> DbResult<(Admission, StorePool)> {
        let admission = self.gate.admit()?;
        let pool = lock(&self.pool)
            .clone()
            .ok_or_else(|| DbError::Unavailable("connection pool is closed".to_string()))?;
        Ok((admission, pool))
    }

    fn ensure_scheduling(&self) -> DbResult<()> {
        if self.policy.supports_scheduling() {
            return Ok(());
        }
        Err(DbError::Config(format!(
            "worker policy `{}` does not support delayed or periodic work",
            self.policy
        )))
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        // Never block here; callers wanting a drain use `shutdown`.
        if let Some(runtime) = lock(&self.runtime).take() {
            debug!("event=database_drop module=db status=ok drained=false");
            runtime.shutdown_background();
        }
    }
}

fn deliver<R>(sender: oneshot::Sender<DbResult<R>>, result: DbResult<R>) {
    if let Err(Err(err)) = sender.send(result) {
        warn!(
            "event=async_result_dropped module=db status=error error={}",
            err
        );
    }
}

fn worker_lost() -> DbError {
    DbError::WorkerLost("operation panicked or was cancelled before completing".to_string())
}

fn result_taken() -> DbError {
    DbError::WorkerLost("result was already taken".to_string())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::{ExecutionMode, Gate};
    use std::sync::Arc;

    #[test]
    fn async_flag_maps_to_mode() {
        assert_eq!(ExecutionMode::from_async_flag(true), ExecutionMode::Async);
        assert_eq!(ExecutionMode::from_async_flag(false), ExecutionMode::Sync);
    }

    #[test]
    fn gate_counts_admissions_and_refuses_after_close() {
        let gate = Arc::new(Gate::default());
        let first = gate.admit().unwrap();
        let second = gate.admit().unwrap();
        assert_eq!(gate.in_flight(), 2);

        assert!(gate.close());
        assert!(!gate.close());
        assert!(gate.admit().is_err());

        drop(first);
        drop(second);
        assert_eq!(gate.in_flight(), 0);
        gate.wait_idle();
    }
}
