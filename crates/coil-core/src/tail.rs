#![forbid(unsafe_code)]

//! Tail forwarding: apply every update of one binding to another.
//!
//! [`tail`] opens the source stream before it returns, so no write made after
//! the call is missed, then spawns a local task that writes each update into
//! the target with the update itself as the cause. Two tails pointing at each
//! other therefore converge: the echo of a forwarded write carries the
//! first write in its causal chain and is suppressed by the registry.
//!
//! # Failure Modes
//!
//! - A write that fails (target host dropped, property not declared) ends
//!   the task with that error. The runtime reports it when it drains.
//! - Cancellation lands at the next stream pull. `set` never suspends between
//!   storing and notifying, so a write is applied completely or not at all.

use std::rc::Rc;

use tracing::debug;

use crate::binding::{Bound, TwoWayBinding};
use crate::error::CoilError;
use crate::object::Bindable;
use crate::stream::EventStream;
use crate::task::{TaskHandle, TaskResult};

/// What a tail does when its source property is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum SourceDeleted {
    /// Stop forwarding; leave the target as it is.
    #[default]
    Keep,
    /// Stop forwarding and unset the target, citing the delete as cause.
    Propagate,
}

/// Options for [`tail_with`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct TailOptions {
    pub on_source_deleted: SourceDeleted,
}

impl TailOptions {
    /// Options that unset the target when the source is deleted.
    #[must_use]
    pub fn propagate_deletes() -> Self {
        Self {
            on_source_deleted: SourceDeleted::Propagate,
        }
    }

    #[must_use]
    pub fn with_on_source_deleted(mut self, policy: SourceDeleted) -> Self {
        self.on_source_deleted = policy;
        self
    }
}

/// Forward every update of `from` into `into` with default options.
///
/// # Panics
///
/// Panics if called outside a [`tokio::task::LocalSet`] context.
pub fn tail<S, H>(from: &S, into: TwoWayBinding<H>) -> Result<TaskHandle, CoilError>
where
    S: Bound<Value = H::Value>,
    H: Bindable,
{
    tail_with(from, into, TailOptions::default())
}

/// Forward every update of `from` into `into`.
///
/// Fails immediately if the source host is gone.
///
/// # Panics
///
/// Panics if called outside a [`tokio::task::LocalSet`] context.
pub fn tail_with<S, H>(
    from: &S,
    into: TwoWayBinding<H>,
    options: TailOptions,
) -> Result<TaskHandle, CoilError>
where
    S: Bound<Value = H::Value>,
    H: Bindable,
{
    let events = from.events()?;
    let name = format!("tail {} -> {}", from.id(), into.id());
    debug!(target: "coil::core", from = %from.id(), into = %into.id(), "tail started");

    Ok(TaskHandle::spawn(name, forward(events, into, options)))
}

async fn forward<H: Bindable>(
    mut events: EventStream<H::Value>,
    into: TwoWayBinding<H>,
    options: TailOptions,
) -> TaskResult {
    while let Some(event) = events.next().await {
        if let Some(value) = event.value() {
            into.set(value.clone(), Some(Rc::clone(&event))).await?;
        }
    }

    let terminal = events.terminal_event().cloned();
    debug!(
        target: "coil::core",
        from = %events.binding(),
        into = %into.id(),
        deleted = terminal.is_some(),
        "tail source ended"
    );
    if let (Some(terminal), SourceDeleted::Propagate) = (terminal, options.on_source_deleted) {
        into.unset(Some(terminal)).await?;
    }
    Ok(())
}
