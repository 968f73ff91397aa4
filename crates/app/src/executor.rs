//! Executor handle and cancellable tasks.
//!
//! Every asynchronous operation returns a [`Task`]. Side effects start
//! when the task is created; awaiting only observes the outcome. A task
//! remembers every piece of spawned work it was composed from, so
//! [`Task::cancel`] reaches all of it. Dropping a task detaches it.
//!
//! Each executor also owns a serial lane: jobs queued with
//! [`Executor::run_serially`] run one at a time, in queue order.

use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::FutureExt;
use futures::future::{self, BoxFuture};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinError};

use thingmesh_domain::error::{InternalError, MeshError};

type Job = Box<dyn FnOnce() + Send>;

/// Clonable handle to the runtime that runs a technology and its things.
///
/// Clones share one serial lane. The lane's worker stops once every clone
/// is dropped.
#[derive(Debug, Clone)]
pub struct Executor {
    handle: Handle,
    lane: mpsc::UnboundedSender<Job>,
}

impl Executor {
    #[must_use]
    pub fn new(handle: Handle) -> Self {
        let (lane, jobs) = mpsc::unbounded_channel();
        handle.spawn(drain(jobs));
        Self { handle, lane }
    }

    /// Executor bound to the runtime the caller is running on.
    ///
    /// # Errors
    ///
    /// Returns [`InternalError::Invariant`] outside a tokio runtime.
    pub fn current() -> Result<Self, MeshError> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|_| InternalError::Invariant("no tokio runtime is running").into())
    }

    /// Spawn `future` and return a cancellable task observing it.
    pub fn spawn<T, F>(&self, future: F) -> Task<T>
    where
        T: Send + 'static,
        F: Future<Output = Result<T, MeshError>> + Send + 'static,
    {
        let join = self.handle.spawn(future);
        let abort = join.abort_handle();
        Task {
            future: join.map(flatten_join).boxed(),
            abort: vec![abort],
        }
    }

    /// Run `future` in the background with nobody observing the outcome.
    pub fn execute<F>(&self, future: F) -> AbortHandle
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handle.spawn(future).abort_handle()
    }

    /// Queue `job` behind every job queued before it on this executor.
    ///
    /// Jobs never overlap, whatever the runtime flavor.
    pub fn run_serially<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.lane.send(Box::new(job)).is_err() {
            tracing::warn!("serial lane closed, job dropped");
        }
    }
}

async fn drain(mut jobs: mpsc::UnboundedReceiver<Job>) {
    while let Some(job) = jobs.recv().await {
        if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
            tracing::warn!("serial job panicked");
        }
    }
}

fn flatten_join<T>(joined: Result<Result<T, MeshError>, JoinError>) -> Result<T, MeshError> {
    match joined {
        Ok(result) => result,
        Err(err) if err.is_cancelled() => Err(MeshError::Cancelled),
        Err(_) => Err(InternalError::TaskPanicked.into()),
    }
}

/// Handle to an in-flight operation.
#[must_use = "the operation runs anyway; await the task to observe its outcome"]
pub struct Task<T> {
    future: BoxFuture<'static, Result<T, MeshError>>,
    abort: Vec<AbortHandle>,
}

impl<T: Send + 'static> Task<T> {
    /// An already completed task.
    pub fn ready(value: T) -> Self {
        Self::from_result(Ok(value))
    }

    /// An already failed task.
    pub fn failed(error: impl Into<MeshError>) -> Self {
        Self::from_result(Err(error.into()))
    }

    pub fn from_result(result: Result<T, MeshError>) -> Self {
        Self {
            future: future::ready(result).boxed(),
            abort: Vec::new(),
        }
    }

    /// Transform the successful outcome. Cancelling the mapped task cancels
    /// this one.
    pub fn map<U, F>(self, f: F) -> Task<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> Result<U, MeshError> + Send + 'static,
    {
        Task {
            future: self.future.map(|result| result.and_then(f)).boxed(),
            abort: self.abort,
        }
    }

    /// Make cancelling this task also cancel `upstream`.
    pub fn chain_cancellation<U>(mut self, upstream: &Task<U>) -> Self {
        self.abort.extend(upstream.abort.iter().cloned());
        self
    }

    /// Wait for every task; the first failure wins.
    ///
    /// The tasks all run to completion independently. Cancelling the joined
    /// task cancels every one of them.
    pub fn join_all(tasks: Vec<Task<T>>) -> Task<Vec<T>> {
        let abort = tasks.iter().flat_map(|task| task.abort.iter().cloned()).collect();
        let future = future::join_all(tasks.into_iter().map(|task| task.future))
            .map(|results| results.into_iter().collect::<Result<Vec<_>, _>>())
            .boxed();
        Task { future, abort }
    }

    /// Wait for every task and yield each outcome, failures included.
    pub fn settle_all(tasks: Vec<Task<T>>) -> Task<Vec<Result<T, MeshError>>> {
        let abort = tasks.iter().flat_map(|task| task.abort.iter().cloned()).collect();
        let future = future::join_all(tasks.into_iter().map(|task| task.future))
            .map(Ok)
            .boxed();
        Task { future, abort }
    }

    /// Wait for both tasks and yield the outcome of `primary`, unless only
    /// `secondary` failed.
    ///
    /// Neither branch is cancelled when the other completes first.
    /// Cancelling the combined task cancels both.
    pub fn combine<U: Send + 'static>(primary: Task<T>, secondary: Task<U>) -> Task<T> {
        let mut abort = primary.abort;
        abort.extend(secondary.abort);
        let future = future::join(primary.future, secondary.future)
            .map(|(primary, secondary)| {
                let value = primary?;
                secondary?;
                Ok(value)
            })
            .boxed();
        Task { future, abort }
    }
}

impl<T> Task<T> {
    /// Abort every spawned operation this task was composed from.
    ///
    /// Work that already completed is unaffected; awaiting a cancelled task
    /// yields [`MeshError::Cancelled`] unless it finished first.
    pub fn cancel(&self) {
        for handle in &self.abort {
            handle.abort();
        }
    }
}

impl<T> Future for Task<T> {
    type Output = Result<T, MeshError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.get_mut().future.poll_unpin(cx)
    }
}

impl<T> fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("spawned", &self.abort.len())
            .finish_non_exhaustive()
    }
}
