#![forbid(unsafe_code)]

//! Per-object subscriber registry.
//!
//! Every bindable host owns one [`SubscriberRegistry`]: a map from property
//! name to an insertion-ordered list of callbacks. [`subscribe`] appends,
//! [`unsubscribe`] removes exactly the callback named by its
//! [`SubscriptionHandle`], and [`notify`] delivers one event to every callback
//! registered for the property.
//!
//! # Invariants
//!
//! 1. Callbacks run synchronously, in registration order, on the caller's
//!    context.
//! 2. The callback list is snapshotted before delivery and no registry borrow
//!    is held while a callback runs, so callbacks may subscribe, unsubscribe
//!    or write other properties.
//! 3. A callback that returns `Err` or panics is skipped; delivery continues
//!    with the next one and the mutator never sees the failure.
//! 4. Cyclic echoes (see [`crate::cycle`]) are dropped before any callback
//!    runs, with a warning.
//!
//! # Failure Modes
//!
//! - Unsubscribing a handle that is not registered (never was, or already
//!   removed) fails with [`CoilError::UnknownSubscription`].
//! - Swallowed callback failures are invisible unless a failure hook is set
//!   with [`SubscriberRegistry::set_failure_hook`].

use std::cell::{Cell, RefCell};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::Rc;

use ahash::AHashMap;

use crate::cycle::{chain_depth, is_cyclic_echo};
use crate::error::{CallbackError, CoilError, panic_message};
use crate::event::Event;
use crate::object::{Bindable, HostId};

type Callback<T> = Rc<dyn Fn(&Rc<Event<T>>) -> Result<(), CallbackError>>;
type FailureHook = Rc<dyn Fn(&SubscriptionHandle, &CallbackFailure)>;

/// Identifier of one callback within a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Token returned by [`subscribe`]; required to [`unsubscribe`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    property: Rc<str>,
    id: SubscriptionId,
}

impl SubscriptionHandle {
    #[must_use]
    pub fn property(&self) -> &str {
        &self.property
    }

    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }
}

impl std::fmt::Display for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.property, self.id)
    }
}

/// A swallowed subscriber failure, as seen by the failure hook.
#[derive(Debug)]
pub enum CallbackFailure {
    /// The callback returned an error.
    Error(CallbackError),
    /// The callback panicked; the payload rendered as text.
    Panic(String),
}

impl std::fmt::Display for CallbackFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error(err) => write!(f, "subscriber returned an error: {err}"),
            Self::Panic(msg) => write!(f, "subscriber panicked: {msg}"),
        }
    }
}

/// Outcome of one [`notify`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The event was offered to this many callbacks.
    Delivered(usize),
    /// The event was a cyclic echo and reached nobody.
    Suppressed,
}

struct Subscriber<T> {
    id: SubscriptionId,
    callback: Callback<T>,
}

/// Property name → ordered callbacks, owned by one host.
pub struct SubscriberRegistry<T> {
    host: HostId,
    next_id: Cell<u64>,
    subscribers: RefCell<AHashMap<Rc<str>, Vec<Subscriber<T>>>>,
    failure_hook: RefCell<Option<FailureHook>>,
}

impl<T: 'static> SubscriberRegistry<T> {
    /// Create an empty registry with a fresh [`HostId`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            host: HostId::next(),
            next_id: Cell::new(0),
            subscribers: RefCell::new(AHashMap::new()),
            failure_hook: RefCell::new(None),
        }
    }

    /// Identity of the host owning this registry.
    #[must_use]
    pub fn host_id(&self) -> HostId {
        self.host
    }

    /// Append `callback` to the subscribers of `property`.
    pub fn subscribe(
        &self,
        property: &str,
        callback: impl Fn(&Rc<Event<T>>) -> Result<(), CallbackError> + 'static,
    ) -> SubscriptionHandle {
        let id = SubscriptionId(self.next_id.get());
        self.next_id.set(id.0 + 1);

        let property: Rc<str> = Rc::from(property);
        self.subscribers
            .borrow_mut()
            .entry(Rc::clone(&property))
            .or_default()
            .push(Subscriber {
                id,
                callback: Rc::new(callback),
            });
        SubscriptionHandle { property, id }
    }

    /// Remove exactly the callback named by `handle`.
    ///
    /// # Errors
    ///
    /// [`CoilError::UnknownSubscription`] if the handle is not registered.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> Result<(), CoilError> {
        let mut subscribers = self.subscribers.borrow_mut();
        let list = subscribers.get_mut(handle.property());
        let position = list
            .as_ref()
            .and_then(|list| list.iter().position(|s| s.id == handle.id));

        match (list, position) {
            (Some(list), Some(index)) => {
                list.remove(index);
                if list.is_empty() {
                    subscribers.remove(handle.property());
                }
                Ok(())
            }
            _ => Err(CoilError::UnknownSubscription(handle.clone())),
        }
    }

    /// Deliver `event` to every subscriber of `property`.
    pub fn notify(&self, property: &str, event: &Rc<Event<T>>) -> Delivery {
        if is_cyclic_echo(event) {
            tracing::warn!(
                target: "coil::core",
                source = %event.source(),
                kind = ?event.kind(),
                depth = chain_depth(event),
                "event has a cyclic trigger; it will not be propagated"
            );
            return Delivery::Suppressed;
        }

        let snapshot: Vec<(SubscriptionId, Callback<T>)> = self
            .subscribers
            .borrow()
            .get(property)
            .map(|list| {
                list.iter()
                    .map(|s| (s.id, Rc::clone(&s.callback)))
                    .collect()
            })
            .unwrap_or_default();

        let mut delivered = 0;
        for (id, callback) in &snapshot {
            // An earlier callback may have unsubscribed this one.
            if !self.is_registered(property, *id) {
                continue;
            }
            delivered += 1;
            let failure = match catch_unwind(AssertUnwindSafe(|| callback(event))) {
                Ok(Ok(())) => continue,
                Ok(Err(err)) => CallbackFailure::Error(err),
                Err(payload) => CallbackFailure::Panic(panic_message(payload.as_ref())),
            };
            self.report_failure(property, *id, &failure);
        }
        Delivery::Delivered(delivered)
    }

    fn is_registered(&self, property: &str, id: SubscriptionId) -> bool {
        self.subscribers
            .borrow()
            .get(property)
            .is_some_and(|list| list.iter().any(|s| s.id == id))
    }

    /// Number of callbacks currently registered for `property`.
    #[must_use]
    pub fn subscriber_count(&self, property: &str) -> usize {
        self.subscribers.borrow().get(property).map_or(0, Vec::len)
    }

    /// Observe callback failures that notification otherwise swallows.
    pub fn set_failure_hook(
        &self,
        hook: impl Fn(&SubscriptionHandle, &CallbackFailure) + 'static,
    ) {
        *self.failure_hook.borrow_mut() = Some(Rc::new(hook));
    }

    pub fn clear_failure_hook(&self) {
        self.failure_hook.borrow_mut().take();
    }

    fn report_failure(&self, property: &str, id: SubscriptionId, failure: &CallbackFailure) {
        tracing::trace!(
            target: "coil::core",
            host = %self.host,
            property,
            subscription = %id,
            %failure,
            "subscriber failure swallowed"
        );
        let hook = self.failure_hook.borrow().clone();
        if let Some(hook) = hook {
            let handle = SubscriptionHandle {
                property: Rc::from(property),
                id,
            };
            hook(&handle, failure);
        }
    }
}

impl<T: 'static> Default for SubscriberRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for SubscriberRegistry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let subscribers = self.subscribers.borrow();
        f.debug_struct("SubscriberRegistry")
            .field("host", &self.host)
            .field("properties", &subscribers.len())
            .field(
                "subscriber_count",
                &subscribers.values().map(Vec::len).sum::<usize>(),
            )
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Object-level entry points
// ---------------------------------------------------------------------------

/// Subscribe `callback` to changes of `property` on `host`.
pub fn subscribe<H: Bindable>(
    host: &H,
    property: &str,
    callback: impl Fn(&Rc<Event<H::Value>>) -> Result<(), CallbackError> + 'static,
) -> SubscriptionHandle {
    host.registry().subscribe(property, callback)
}

/// Remove a subscription from `host`.
///
/// # Errors
///
/// [`CoilError::UnknownSubscription`] if `handle` is not registered on
/// `host`.
pub fn unsubscribe<H: Bindable>(host: &H, handle: &SubscriptionHandle) -> Result<(), CoilError> {
    host.registry().unsubscribe(handle)
}

/// Deliver `event` to the subscribers of `property` on `host`.
pub fn notify<H: Bindable>(host: &H, property: &str, event: &Rc<Event<H::Value>>) -> Delivery {
    host.registry().notify(property, event)
}
