#![forbid(unsafe_code)]

//! Bound assignment: make a property follow a binding.
//!
//! Assigning a binding to `(target, property)` replaces whatever forwarding
//! that property had before:
//!
//! 1. the forwarders registered for `(target, property)` are evicted;
//! 2. a self-binding stops here, leaving the property unbound;
//! 3. a forward tail `source -> target` is registered under the configured
//!    tail id;
//! 4. the source's current value is copied into the target;
//! 5. for a two-way source, a reverse tail `target -> source` is registered
//!    under the reverse id.
//!
//! Both forwarders are scoped to the target property, so a later assignment
//! to the same property finds and evicts them.

use std::rc::Rc;

use coil_core::{
    Bindable, BindingId, Bound, BoundValue, CoilError, TaskHandle, assign, bind, bind_two_way,
    tail_with,
};
use tracing::debug;

use crate::runtime::Runtime;

/// Make `target.property` follow `source`.
///
/// # Errors
///
/// - [`CoilError::RuntimeInactive`] outside an active scope.
/// - [`CoilError::HostDropped`] if the source host is gone.
/// - Any error from writing the initial value into the target.
///
/// # Panics
///
/// Panics if called outside a [`tokio::task::LocalSet`] context.
pub fn assign_bound<H, S>(
    runtime: &Runtime,
    target: &Rc<H>,
    property: &str,
    source: BoundValue<S>,
) -> Result<(), CoilError>
where
    H: Bindable,
    S: Bindable<Value = H::Value>,
{
    let config = runtime.config();
    let scope = BindingId::of(&**target, property);
    runtime.evict(&config.tail_task_id, Some(&scope))?;
    runtime.evict(&config.reverse_tail_task_id, Some(&scope))?;

    if source.id() == &scope {
        debug!(target: "coil::runtime", binding = %scope, "binding cleared");
        return Ok(());
    }

    let forward = tail_with(&source, bind_two_way(target, property), config.tail_options)?;
    install(runtime, &forward, &config.tail_task_id, &scope)?;

    if let Some(value) = source.current()? {
        assign(&**target, property, value)?;
    }

    // The reverse stream opens after the copy, so the copy is never sent back.
    if let Some(two_way) = source.as_two_way() {
        let reverse = tail_with(&bind(target, property), two_way.clone(), config.tail_options)?;
        install(runtime, &reverse, &config.reverse_tail_task_id, &scope)?;
    }

    debug!(
        target: "coil::runtime",
        binding = %scope,
        source = %source.id(),
        two_way = source.is_two_way(),
        "binding assigned"
    );
    Ok(())
}

/// Stop any forwarding into `host.property`.
///
/// Equivalent to assigning the property's own binding to it.
///
/// # Errors
///
/// [`CoilError::RuntimeInactive`] outside an active scope.
pub fn clear_binding<H: Bindable>(
    runtime: &Runtime,
    host: &Rc<H>,
    property: &str,
) -> Result<(), CoilError> {
    assign_bound(runtime, host, property, BoundValue::ReadOnly(bind(host, property)))
}

fn install(
    runtime: &Runtime,
    task: &TaskHandle,
    id: &str,
    scope: &BindingId,
) -> Result<(), CoilError> {
    runtime.register(task, id, Some(scope)).inspect_err(|_| task.cancel())
}
