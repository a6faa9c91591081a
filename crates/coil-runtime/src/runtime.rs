#![forbid(unsafe_code)]

//! The runtime task registry.
//!
//! A [`Runtime`] tracks the background tasks a program starts (forwarders,
//! mostly) under string ids, optionally scoped to one bound property. It is a
//! small state machine:
//!
//! ```text
//! Inactive --enter_scope--> Active --exit--> Draining --> Inactive
//! ```
//!
//! While active, [`Runtime::evict`] hands tasks to an internal drain task
//! that cancels and awaits them, so "stop tracking this task" never waits for
//! "this task has stopped". [`RuntimeScope::exit`] flushes that queue, then
//! cancels and awaits every task still registered.
//!
//! # Usage
//!
//! ```ignore
//! let runtime = Runtime::new();
//! let scope = runtime.enter_scope()?;
//!
//! let task = tail(&bind(&main, "size"), bind_two_way(&preview, "size"))?;
//! scope.register(&task, "preview", None)?;
//!
//! scope.exit().await; // `task` is cancelled and awaited here
//! ```
//!
//! # Invariants
//!
//! 1. Registry operations succeed only in the `Active` state.
//! 2. A key maps to at most one task; one task may sit under several keys.
//! 3. Task failures are logged once, on target `coil::runtime`, when the task
//!    is drained. They are never returned from `exit`.
//!
//! # Failure Modes
//!
//! - Dropping a [`RuntimeScope`] without `exit` cannot await anything: tasks
//!   are cancelled (if [`RuntimeConfig::abort_on_drop`]) but not joined, and a
//!   warning is logged.

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::ops::Deref;
use std::rc::Rc;

use ahash::{AHashMap, AHashSet};
use coil_core::{BindingId, CoilError, TaskHandle, TaskOutcome, TaskResult};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::config::RuntimeConfig;

/// Lifecycle state of a [`Runtime`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeState {
    Inactive,
    Active,
    /// `exit` is in progress.
    Draining,
}

/// Registry key: a task id, optionally scoped to one bound property.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskKey {
    id: String,
    scope: Option<BindingId>,
}

impl TaskKey {
    #[must_use]
    pub fn new(id: &str, scope: Option<&BindingId>) -> Self {
        Self {
            id: id.to_string(),
            scope: scope.cloned(),
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn scope(&self) -> Option<&BindingId> {
        self.scope.as_ref()
    }
}

impl std::fmt::Display for TaskKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.scope {
            Some(scope) => write!(f, "{}@{}", self.id, scope),
            None => write!(f, "{}", self.id),
        }
    }
}

struct RuntimeInner {
    config: RuntimeConfig,
    state: Cell<RuntimeState>,
    tasks: RefCell<AHashMap<TaskKey, TaskHandle>>,
    pending: RefCell<Option<mpsc::UnboundedSender<TaskHandle>>>,
    drain: RefCell<Option<TaskHandle>>,
}

/// Shared handle to a task registry. Clones refer to the same registry.
#[derive(Clone)]
pub struct Runtime {
    inner: Rc<RuntimeInner>,
}

impl Runtime {
    /// Create an inactive runtime with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    #[must_use]
    pub fn with_config(config: RuntimeConfig) -> Self {
        Self {
            inner: Rc::new(RuntimeInner {
                config,
                state: Cell::new(RuntimeState::Inactive),
                tasks: RefCell::new(AHashMap::new()),
                pending: RefCell::new(None),
                drain: RefCell::new(None),
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn state(&self) -> RuntimeState {
        self.inner.state.get()
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state() == RuntimeState::Active
    }

    /// Activate the runtime and start its drain task.
    ///
    /// # Errors
    ///
    /// [`CoilError::RuntimeAlreadyActive`] unless the runtime is inactive.
    ///
    /// # Panics
    ///
    /// Panics if called outside a [`tokio::task::LocalSet`] context.
    pub fn enter_scope(&self) -> Result<RuntimeScope, CoilError> {
        if self.state() != RuntimeState::Inactive {
            return Err(CoilError::RuntimeAlreadyActive);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let name = self.inner.config.drain_task_name.clone();
        let drain = TaskHandle::spawn(name, drain_evicted(rx));
        *self.inner.pending.borrow_mut() = Some(tx);
        *self.inner.drain.borrow_mut() = Some(drain);
        self.inner.state.set(RuntimeState::Active);

        debug!(target: "coil::runtime", "runtime scope entered");
        Ok(RuntimeScope {
            runtime: self.clone(),
            exited: false,
        })
    }

    /// Enter a scope, run `f`, then exit the scope.
    ///
    /// # Errors
    ///
    /// [`CoilError::RuntimeAlreadyActive`] if a scope is already open.
    pub async fn run<F, Fut, T>(&self, f: F) -> Result<T, CoilError>
    where
        F: FnOnce(Runtime) -> Fut,
        Fut: Future<Output = T>,
    {
        let scope = self.enter_scope()?;
        let output = f(self.clone()).await;
        scope.exit().await;
        Ok(output)
    }

    /// Track `task` under `(id, scope)`.
    ///
    /// Registering the same task again under the same key is a no-op.
    ///
    /// # Errors
    ///
    /// - [`CoilError::RuntimeInactive`] outside an active scope.
    /// - [`CoilError::TaskKeyOccupied`] if a different task holds the key.
    pub fn register(
        &self,
        task: &TaskHandle,
        id: &str,
        scope: Option<&BindingId>,
    ) -> Result<(), CoilError> {
        self.ensure_active()?;
        let key = TaskKey::new(id, scope);
        let mut tasks = self.inner.tasks.borrow_mut();
        match tasks.get(&key) {
            Some(existing) if existing == task => Ok(()),
            Some(_) => Err(CoilError::TaskKeyOccupied {
                id: key.id,
                scope: key.scope,
            }),
            None => {
                debug!(target: "coil::runtime", key = %key, task = task.name(), "task registered");
                tasks.insert(key, task.clone());
                Ok(())
            }
        }
    }

    /// The task registered under `(id, scope)`, if any.
    ///
    /// # Errors
    ///
    /// [`CoilError::RuntimeInactive`] outside an active scope.
    pub fn find(
        &self,
        id: &str,
        scope: Option<&BindingId>,
    ) -> Result<Option<TaskHandle>, CoilError> {
        self.ensure_active()?;
        Ok(self.inner.tasks.borrow().get(&TaskKey::new(id, scope)).cloned())
    }

    /// Stop tracking `task` under every key, without cancelling it.
    ///
    /// Returns whether any key was removed.
    ///
    /// # Errors
    ///
    /// [`CoilError::RuntimeInactive`] outside an active scope.
    pub fn forget(&self, task: &TaskHandle) -> Result<bool, CoilError> {
        self.ensure_active()?;
        let mut tasks = self.inner.tasks.borrow_mut();
        let before = tasks.len();
        tasks.retain(|_, registered| registered.id() != task.id());
        Ok(tasks.len() != before)
    }

    /// Forget the task under `(id, scope)` and queue it for cancellation.
    ///
    /// Never waits: the drain task cancels and awaits it later. Returns
    /// `false` if nothing was registered under the key.
    ///
    /// # Errors
    ///
    /// [`CoilError::RuntimeInactive`] outside an active scope.
    pub fn evict(&self, id: &str, scope: Option<&BindingId>) -> Result<bool, CoilError> {
        let Some(task) = self.find(id, scope)? else {
            return Ok(false);
        };
        self.forget(&task)?;

        debug!(
            target: "coil::runtime",
            id,
            task = task.name(),
            task_id = %task.id(),
            "task evicted"
        );
        let rejected = match self.inner.pending.borrow().as_ref() {
            Some(pending) => pending.send(task).err().map(|err| err.0),
            None => Some(task),
        };
        if let Some(task) = rejected {
            // Drain task is gone; cancel without awaiting.
            task.cancel();
        }
        Ok(true)
    }

    /// Number of distinct registered tasks (the drain task is not counted).
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.inner
            .tasks
            .borrow()
            .values()
            .map(TaskHandle::id)
            .collect::<AHashSet<_>>()
            .len()
    }

    fn ensure_active(&self) -> Result<(), CoilError> {
        if self.is_active() {
            Ok(())
        } else {
            Err(CoilError::RuntimeInactive)
        }
    }

    fn take_registered(&self) -> Vec<TaskHandle> {
        let mut tasks: Vec<TaskHandle> = self
            .inner
            .tasks
            .borrow_mut()
            .drain()
            .map(|(_, task)| task)
            .collect();
        tasks.sort_by_key(TaskHandle::id);
        tasks.dedup();
        tasks
    }

    async fn shutdown(&self) {
        self.inner.state.set(RuntimeState::Draining);

        // Closing the queue lets the drain task finish what was evicted.
        self.inner.pending.borrow_mut().take();
        let drain = self.inner.drain.borrow_mut().take();
        if let Some(drain) = drain {
            let outcome = drain.join().await;
            report(&drain, &outcome);
        }

        let tasks = self.take_registered();
        for task in &tasks {
            task.cancel();
        }
        for task in &tasks {
            let outcome = task.join().await;
            report(task, &outcome);
        }

        self.inner.state.set(RuntimeState::Inactive);
        debug!(target: "coil::runtime", drained = tasks.len(), "runtime scope exited");
    }

    fn abandon(&self) {
        self.inner.pending.borrow_mut().take();
        let drain = self.inner.drain.borrow_mut().take();
        let tasks = self.take_registered();
        if self.inner.config.abort_on_drop {
            if let Some(drain) = &drain {
                drain.cancel();
            }
            for task in &tasks {
                task.cancel();
            }
        }
        self.inner.state.set(RuntimeState::Inactive);
        warn!(
            target: "coil::runtime",
            tasks = tasks.len(),
            aborted = self.inner.config.abort_on_drop,
            "runtime scope dropped without exit; tasks were not awaited"
        );
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("state", &self.state())
            .field("task_count", &self.task_count())
            .finish()
    }
}

async fn drain_evicted(mut rx: mpsc::UnboundedReceiver<TaskHandle>) -> TaskResult {
    while let Some(task) = rx.recv().await {
        let outcome = task.cancel_and_wait().await;
        report(&task, &outcome);
    }
    Ok(())
}

fn report(task: &TaskHandle, outcome: &TaskOutcome) {
    if let Some(failure) = outcome.failure() {
        error!(
            target: "coil::runtime",
            task = task.name(),
            task_id = %task.id(),
            error = %failure,
            detail = ?failure,
            "unhandled failure in registered task"
        );
    }
}

// ---------------------------------------------------------------------------
// RuntimeScope
// ---------------------------------------------------------------------------

/// An active runtime. Call [`exit`](Self::exit) to drain it.
///
/// Derefs to [`Runtime`], so registry operations can be called on the scope
/// directly.
#[must_use = "dropping a scope without `exit` cancels its tasks without awaiting them"]
pub struct RuntimeScope {
    runtime: Runtime,
    exited: bool,
}

impl RuntimeScope {
    #[must_use]
    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// Flush pending evictions, then cancel and await every registered task.
    pub async fn exit(mut self) {
        self.runtime.shutdown().await;
        self.exited = true;
    }
}

impl Deref for RuntimeScope {
    type Target = Runtime;

    fn deref(&self) -> &Runtime {
        &self.runtime
    }
}

impl Drop for RuntimeScope {
    fn drop(&mut self) {
        if !self.exited {
            self.runtime.abandon();
        }
    }
}

impl std::fmt::Debug for RuntimeScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeScope")
            .field("runtime", &self.runtime)
            .field("exited", &self.exited)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{run_local, settle};
    use coil_core::HostId;
    use proptest::prelude::*;
    use std::time::Duration;

    fn forever(name: &str) -> TaskHandle {
        TaskHandle::spawn(name, async {
            loop {
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        })
    }

    #[test]
    fn operations_require_an_active_scope() {
        run_local(async {
            let runtime = Runtime::new();
            let task = forever("idle");
            assert_eq!(runtime.register(&task, "t", None), Err(CoilError::RuntimeInactive));
            assert_eq!(runtime.find("t", None).unwrap_err(), CoilError::RuntimeInactive);
            assert_eq!(runtime.forget(&task), Err(CoilError::RuntimeInactive));
            assert_eq!(runtime.evict("t", None), Err(CoilError::RuntimeInactive));
            task.cancel();
        });
    }

    #[test]
    fn nested_scope_is_rejected() {
        run_local(async {
            let runtime = Runtime::new();
            let scope = runtime.enter_scope().unwrap();
            assert_eq!(
                runtime.enter_scope().unwrap_err(),
                CoilError::RuntimeAlreadyActive
            );
            scope.exit().await;
            assert_eq!(runtime.state(), RuntimeState::Inactive);

            // The runtime can be entered again once drained.
            runtime.enter_scope().unwrap().exit().await;
        });
    }

    #[test]
    fn register_is_idempotent_per_task() {
        run_local(async {
            let runtime = Runtime::new();
            let scope = runtime.enter_scope().unwrap();
            let a = forever("a");
            let b = forever("b");

            scope.register(&a, "job", None).unwrap();
            scope.register(&a, "job", None).unwrap();
            assert_eq!(
                scope.register(&b, "job", None),
                Err(CoilError::TaskKeyOccupied {
                    id: "job".into(),
                    scope: None
                })
            );
            assert_eq!(scope.find("job", None).unwrap(), Some(a.clone()));
            assert_eq!(scope.task_count(), 1);

            scope.exit().await;
            b.cancel();
        });
    }

    #[test]
    fn one_task_under_several_keys_is_forgotten_everywhere() {
        run_local(async {
            let runtime = Runtime::new();
            let scope = runtime.enter_scope().unwrap();
            let scoped = BindingId::new(HostId::next(), "value");
            let task = forever("shared");

            scope.register(&task, "x", None).unwrap();
            scope.register(&task, "x", Some(&scoped)).unwrap();
            assert_eq!(scope.task_count(), 1);

            assert!(scope.forget(&task).unwrap());
            assert!(!scope.forget(&task).unwrap());
            assert_eq!(scope.find("x", Some(&scoped)).unwrap(), None);

            scope.exit().await;
            assert!(!task.is_finished(), "forgotten task keeps running");
            task.cancel_and_wait().await;
        });
    }

    #[test]
    fn evict_cancels_in_the_background() {
        run_local(async {
            let runtime = Runtime::new();
            let scope = runtime.enter_scope().unwrap();
            let task = forever("evicted");
            scope.register(&task, "job", None).unwrap();

            assert!(scope.evict("job", None).unwrap());
            assert_eq!(scope.find("job", None).unwrap(), None);
            assert!(!task.is_finished(), "eviction does not wait");

            settle().await;
            assert!(task.is_finished());
            assert!(!scope.evict("job", None).unwrap());
            scope.exit().await;
        });
    }

    #[test]
    fn exit_flushes_pending_evictions() {
        run_local(async {
            let runtime = Runtime::new();
            let scope = runtime.enter_scope().unwrap();
            let task = forever("evicted");
            scope.register(&task, "job", None).unwrap();
            scope.evict("job", None).unwrap();

            scope.exit().await;
            assert!(task.outcome().is_some_and(|o| o.is_cancelled()));
        });
    }

    #[test]
    fn run_wraps_a_scope() {
        run_local(async {
            let runtime = Runtime::new();
            let task = runtime
                .run(|rt| async move {
                    let task = forever("scoped");
                    rt.register(&task, "job", None).unwrap();
                    task
                })
                .await
                .unwrap();
            assert!(task.outcome().is_some_and(|o| o.is_cancelled()));
            assert!(!runtime.is_active());
        });
    }

    #[test]
    fn dropped_scope_aborts_without_awaiting() {
        run_local(async {
            let runtime = Runtime::new();
            let task = forever("orphan");
            {
                let scope = runtime.enter_scope().unwrap();
                scope.register(&task, "job", None).unwrap();
            }
            assert_eq!(runtime.state(), RuntimeState::Inactive);
            assert!(task.join().await.is_cancelled());
        });
    }

    #[test]
    fn dropped_scope_can_leave_tasks_running() {
        run_local(async {
            let config = RuntimeConfig::default().with_abort_on_drop(false);
            let runtime = Runtime::with_config(config);
            let task = forever("survivor");
            {
                let scope = runtime.enter_scope().unwrap();
                scope.register(&task, "job", None).unwrap();
            }
            settle().await;
            assert!(!task.is_finished());
            task.cancel_and_wait().await;
        });
    }

    #[test]
    fn task_key_display() {
        let scope = BindingId::new(HostId::next(), "size");
        assert_eq!(TaskKey::new("coil.tail", None).to_string(), "coil.tail");
        assert_eq!(
            TaskKey::new("coil.tail", Some(&scope)).to_string(),
            format!("coil.tail@{scope}")
        );
    }

    #[derive(Debug, Clone)]
    enum Op {
        Register { task: usize, key: usize },
        Forget { task: usize },
        Evict { key: usize },
    }

    const TASKS: usize = 3;
    const KEYS: usize = 6;

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0..TASKS, 0..KEYS).prop_map(|(task, key)| Op::Register { task, key }),
            (0..TASKS).prop_map(|task| Op::Forget { task }),
            (0..KEYS).prop_map(|key| Op::Evict { key }),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn registry_matches_a_model_map(ops in proptest::collection::vec(op(), 1..40)) {
            run_local(async move {
                let runtime = Runtime::new();
                let scope = runtime.enter_scope().unwrap();
                let bound = BindingId::new(HostId::next(), "value");
                let keys: Vec<(&str, Option<&BindingId>)> = ["a", "b", "c"]
                    .into_iter()
                    .flat_map(|id| [(id, None), (id, Some(&bound))])
                    .collect();
                let tasks: Vec<TaskHandle> =
                    (0..TASKS).map(|n| forever(&format!("model-{n}"))).collect();
                let mut model: Vec<Option<usize>> = vec![None; KEYS];

                for op in ops {
                    match op {
                        Op::Register { task, key } => {
                            let (id, at) = keys[key];
                            let result = scope.register(&tasks[task], id, at);
                            match model[key] {
                                Some(held) if held != task => assert!(result.is_err()),
                                _ => {
                                    assert_eq!(result, Ok(()));
                                    model[key] = Some(task);
                                }
                            }
                        }
                        Op::Forget { task } => {
                            let held = model.contains(&Some(task));
                            assert_eq!(scope.forget(&tasks[task]), Ok(held));
                            model.iter_mut().filter(|m| **m == Some(task)).for_each(|m| *m = None);
                        }
                        Op::Evict { key } => {
                            let (id, at) = keys[key];
                            let held = model[key];
                            assert_eq!(scope.evict(id, at), Ok(held.is_some()));
                            if let Some(task) = held {
                                model.iter_mut().filter(|m| **m == Some(task)).for_each(|m| *m = None);
                            }
                        }
                    }

                    for (index, &(id, at)) in keys.iter().enumerate() {
                        let found = scope.find(id, at).unwrap();
                        assert_eq!(found.map(|t| t.id()), model[index].map(|t| tasks[t].id()));
                    }
                    let distinct: AHashSet<usize> = model.iter().flatten().copied().collect();
                    assert_eq!(scope.task_count(), distinct.len());
                }

                scope.exit().await;
                for task in &tasks {
                    task.cancel();
                }
            });
        }
    }
}
