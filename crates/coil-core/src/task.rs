#![forbid(unsafe_code)]

//! Cancellable background task handles.
//!
//! A [`TaskHandle`] wraps a task spawned with [`tokio::task::spawn_local`].
//! Handles are cheap to clone and compare by identity ([`TaskId`]), which is
//! what the runtime registry needs to tell "the same task again" from "a
//! different task under the same key".
//!
//! # Cancellation
//!
//! [`TaskHandle::cancel`] aborts the underlying tokio task. Cancellation is
//! cooperative: the task stops at its next suspension point. `cancel` never
//! waits; use [`TaskHandle::cancel_and_wait`] (or `cancel` then
//! [`TaskHandle::join`]) to observe completion.
//!
//! # Failure Modes
//!
//! - A task that returns `Err` or panics settles as
//!   [`TaskOutcome::Failed`]; the failure is kept for every joiner.
//! - Any number of clones may `join` concurrently; one of them drives the
//!   underlying join handle and the rest wait for it to settle. If the
//!   driving future is dropped mid-wait, the join handle is put back and a
//!   waiter takes over.

use std::cell::RefCell;
use std::future::Future;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::Notify;
use tokio::task::{AbortHandle, JoinError, JoinHandle};

use crate::error::panic_message;

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// What a background task returns.
pub type TaskResult = Result<(), Box<dyn std::error::Error + 'static>>;

/// Process-unique task identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// Why a task did not complete normally.
#[derive(Debug)]
pub enum TaskFailure {
    /// The task returned an error.
    Error(Box<dyn std::error::Error + 'static>),
    /// The task panicked; the payload rendered as text.
    Panic(String),
}

impl std::fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error(err) => write!(f, "{err}"),
            Self::Panic(msg) => write!(f, "task panicked: {msg}"),
        }
    }
}

impl std::error::Error for TaskFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Error(err) => Some(err.as_ref()),
            Self::Panic(_) => None,
        }
    }
}

/// How a task settled.
#[derive(Debug, Clone)]
pub enum TaskOutcome {
    Completed,
    Cancelled,
    Failed(Rc<TaskFailure>),
}

impl TaskOutcome {
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    #[must_use]
    pub fn failure(&self) -> Option<&TaskFailure> {
        match self {
            Self::Failed(failure) => Some(failure),
            _ => None,
        }
    }

    fn from_join(result: Result<TaskResult, JoinError>) -> Self {
        match result {
            Ok(Ok(())) => Self::Completed,
            Ok(Err(err)) => Self::Failed(Rc::new(TaskFailure::Error(err))),
            Err(err) if err.is_cancelled() => Self::Cancelled,
            Err(err) => match err.try_into_panic() {
                Ok(payload) => Self::Failed(Rc::new(TaskFailure::Panic(panic_message(
                    payload.as_ref(),
                )))),
                Err(_) => Self::Cancelled,
            },
        }
    }
}

struct TaskInner {
    id: TaskId,
    name: String,
    abort: AbortHandle,
    join: RefCell<Option<JoinHandle<TaskResult>>>,
    outcome: RefCell<Option<TaskOutcome>>,
    settled: Notify,
}

/// Shared handle to a spawned local task.
#[derive(Clone)]
pub struct TaskHandle {
    inner: Rc<TaskInner>,
}

impl TaskHandle {
    /// Spawn `future` on the current `LocalSet`.
    ///
    /// # Panics
    ///
    /// Panics if called outside a [`tokio::task::LocalSet`] context.
    pub fn spawn<F>(name: impl Into<String>, future: F) -> Self
    where
        F: Future<Output = TaskResult> + 'static,
    {
        let join = tokio::task::spawn_local(future);
        let abort = join.abort_handle();
        Self {
            inner: Rc::new(TaskInner {
                id: TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed)),
                name: name.into(),
                abort,
                join: RefCell::new(Some(join)),
                outcome: RefCell::new(None),
                settled: Notify::new(),
            }),
        }
    }

    #[must_use]
    pub fn id(&self) -> TaskId {
        self.inner.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Request cancellation. Takes effect at the task's next suspension.
    pub fn cancel(&self) {
        self.inner.abort.abort();
    }

    /// Whether the task has stopped running (for any reason).
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.inner.outcome.borrow().is_some() || self.inner.abort.is_finished()
    }

    /// The settled outcome, once some caller has joined the task.
    #[must_use]
    pub fn outcome(&self) -> Option<TaskOutcome> {
        self.inner.outcome.borrow().clone()
    }

    /// Wait for the task to settle.
    pub async fn join(&self) -> TaskOutcome {
        loop {
            if let Some(outcome) = self.outcome() {
                return outcome;
            }
            let pending = self.inner.join.borrow_mut().take();
            let Some(handle) = pending else {
                self.inner.settled.notified().await;
                continue;
            };

            let mut guard = JoinGuard {
                inner: &self.inner,
                handle: Some(handle),
            };
            let Some(result) = guard.wait().await else {
                continue;
            };
            let outcome = TaskOutcome::from_join(result);
            *self.inner.outcome.borrow_mut() = Some(outcome.clone());
            self.inner.settled.notify_waiters();
            return outcome;
        }
    }

    /// Cancel, then wait for the task to settle.
    pub async fn cancel_and_wait(&self) -> TaskOutcome {
        self.cancel();
        self.join().await
    }
}

impl PartialEq for TaskHandle {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for TaskHandle {}

impl std::fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("finished", &self.is_finished())
            .finish()
    }
}

/// Puts an un-awaited join handle back if the joining future is dropped.
struct JoinGuard<'a> {
    inner: &'a TaskInner,
    handle: Option<JoinHandle<TaskResult>>,
}

impl JoinGuard<'_> {
    async fn wait(&mut self) -> Option<Result<TaskResult, JoinError>> {
        let handle = self.handle.as_mut()?;
        let result = handle.await;
        self.handle = None;
        Some(result)
    }
}

impl Drop for JoinGuard<'_> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            *self.inner.join.borrow_mut() = Some(handle);
            self.inner.settled.notify_waiters();
        }
    }
}
