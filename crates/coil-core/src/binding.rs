#![forbid(unsafe_code)]

//! Bindings: non-owning views of one `(object, property)` pair.
//!
//! A [`Binding<H>`] can only be watched: [`Bound::events`] opens a fresh
//! [`EventStream`] per call. A [`TwoWayBinding<H>`] can also write: `set`
//! stores the value and then notifies with an update event whose
//! `source_event` is the caller-supplied cause. Forwarders pass the event they
//! are applying as that cause, which is what lets the cycle detector stop
//! echoes.
//!
//! Both hold a `Weak` reference to the host. Once the host is dropped every
//! operation fails with [`CoilError::HostDropped`].
//!
//! # Usage
//!
//! ```ignore
//! let window = Record::builder().property("width", 1024).build();
//!
//! let watched = bind(&window, "width");
//! let mut events = watched.events()?;
//!
//! let writable = bind_two_way(&window, "width");
//! writable.set(1920, None).await?;
//!
//! let event = events.next().await.expect("update");
//! assert_eq!(event.value(), Some(&1920));
//! ```

use std::rc::{Rc, Weak};

use crate::error::CoilError;
use crate::event::Event;
use crate::object::{Bindable, BindingId};
use crate::stream::EventStream;

/// Requested capability for [`bind_with`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Access {
    #[default]
    ReadOnly,
    ReadWrite,
}

/// Anything that identifies a property and can stream its changes.
pub trait Bound {
    type Value: Clone + 'static;

    /// Identity of the bound property.
    fn id(&self) -> &BindingId;

    /// Open a new, independent stream of update events.
    fn events(&self) -> Result<EventStream<Self::Value>, CoilError>;

    /// Current value of the bound property (`None` if deleted).
    fn current(&self) -> Result<Option<Self::Value>, CoilError>;
}

// ---------------------------------------------------------------------------
// Binding<H> — read-only view
// ---------------------------------------------------------------------------

/// A read-only binding to one property of a host.
pub struct Binding<H> {
    host: Weak<H>,
    id: BindingId,
}

impl<H: Bindable> Binding<H> {
    #[must_use]
    pub fn new(host: &Rc<H>, property: &str) -> Self {
        Self {
            host: Rc::downgrade(host),
            id: BindingId::of(&**host, property),
        }
    }

    /// The host, if it is still alive.
    #[must_use]
    pub fn host(&self) -> Option<Rc<H>> {
        self.host.upgrade()
    }

    #[must_use]
    pub fn property(&self) -> &str {
        self.id.property()
    }

    fn upgrade(&self) -> Result<Rc<H>, CoilError> {
        self.host.upgrade().ok_or_else(|| CoilError::HostDropped {
            property: self.id.property().to_string(),
        })
    }
}

impl<H: Bindable> Bound for Binding<H> {
    type Value = H::Value;

    fn id(&self) -> &BindingId {
        &self.id
    }

    fn events(&self) -> Result<EventStream<H::Value>, CoilError> {
        let host = self.upgrade()?;
        Ok(EventStream::open(&host, &self.id))
    }

    fn current(&self) -> Result<Option<H::Value>, CoilError> {
        self.upgrade()?.get_property(self.id.property())
    }
}

// Manual Clone: no `H: Clone` bound needed for a Weak.
impl<H> Clone for Binding<H> {
    fn clone(&self) -> Self {
        Self {
            host: Weak::clone(&self.host),
            id: self.id.clone(),
        }
    }
}

impl<H> std::fmt::Debug for Binding<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Binding({})", self.id)
    }
}

// ---------------------------------------------------------------------------
// TwoWayBinding<H> — readable and writable view
// ---------------------------------------------------------------------------

/// A binding that can also write the bound property.
pub struct TwoWayBinding<H> {
    inner: Binding<H>,
}

impl<H: Bindable> TwoWayBinding<H> {
    #[must_use]
    pub fn new(host: &Rc<H>, property: &str) -> Self {
        Self {
            inner: Binding::new(host, property),
        }
    }

    /// Store `value` and notify subscribers.
    ///
    /// `cause` is the event whose application led to this write (`None` for
    /// an externally initiated write). There is no suspension point between
    /// storing and notifying, so cancelling a caller never leaves a write
    /// half-applied.
    pub async fn set(
        &self,
        value: H::Value,
        cause: Option<Rc<Event<H::Value>>>,
    ) -> Result<(), CoilError> {
        let host = self.inner.upgrade()?;
        write_slot(&*host, &self.inner.id, value, cause)
    }

    /// Delete the property and notify subscribers with a delete event.
    ///
    /// Returns `false` if the property was already deleted (nobody is
    /// notified in that case).
    pub async fn unset(&self, cause: Option<Rc<Event<H::Value>>>) -> Result<bool, CoilError> {
        let host = self.inner.upgrade()?;
        delete_slot(&*host, &self.inner.id, cause)
    }

    /// A read-only view of the same property.
    #[must_use]
    pub fn read_only(&self) -> Binding<H> {
        self.inner.clone()
    }

    #[must_use]
    pub fn host(&self) -> Option<Rc<H>> {
        self.inner.host()
    }

    #[must_use]
    pub fn property(&self) -> &str {
        self.inner.property()
    }
}

impl<H: Bindable> Bound for TwoWayBinding<H> {
    type Value = H::Value;

    fn id(&self) -> &BindingId {
        self.inner.id()
    }

    fn events(&self) -> Result<EventStream<H::Value>, CoilError> {
        self.inner.events()
    }

    fn current(&self) -> Result<Option<H::Value>, CoilError> {
        self.inner.current()
    }
}

impl<H> Clone for TwoWayBinding<H> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<H> std::fmt::Debug for TwoWayBinding<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TwoWayBinding({})", self.inner.id)
    }
}

// ---------------------------------------------------------------------------
// BoundValue<H> — either kind
// ---------------------------------------------------------------------------

/// A binding of either capability, as produced by [`bind_with`].
pub enum BoundValue<H> {
    ReadOnly(Binding<H>),
    TwoWay(TwoWayBinding<H>),
}

impl<H: Bindable> BoundValue<H> {
    #[must_use]
    pub fn is_two_way(&self) -> bool {
        matches!(self, Self::TwoWay(_))
    }

    #[must_use]
    pub fn as_two_way(&self) -> Option<&TwoWayBinding<H>> {
        match self {
            Self::TwoWay(binding) => Some(binding),
            Self::ReadOnly(_) => None,
        }
    }

    fn as_read_only(&self) -> &Binding<H> {
        match self {
            Self::ReadOnly(binding) => binding,
            Self::TwoWay(binding) => &binding.inner,
        }
    }
}

impl<H: Bindable> Bound for BoundValue<H> {
    type Value = H::Value;

    fn id(&self) -> &BindingId {
        self.as_read_only().id()
    }

    fn events(&self) -> Result<EventStream<H::Value>, CoilError> {
        self.as_read_only().events()
    }

    fn current(&self) -> Result<Option<H::Value>, CoilError> {
        self.as_read_only().current()
    }
}

impl<H> From<Binding<H>> for BoundValue<H> {
    fn from(binding: Binding<H>) -> Self {
        Self::ReadOnly(binding)
    }
}

impl<H> From<TwoWayBinding<H>> for BoundValue<H> {
    fn from(binding: TwoWayBinding<H>) -> Self {
        Self::TwoWay(binding)
    }
}

impl<H> Clone for BoundValue<H> {
    fn clone(&self) -> Self {
        match self {
            Self::ReadOnly(binding) => Self::ReadOnly(binding.clone()),
            Self::TwoWay(binding) => Self::TwoWay(binding.clone()),
        }
    }
}

impl<H> std::fmt::Debug for BoundValue<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ReadOnly(binding) => std::fmt::Debug::fmt(binding, f),
            Self::TwoWay(binding) => std::fmt::Debug::fmt(binding, f),
        }
    }
}

// ---------------------------------------------------------------------------
// Constructors and plain mutators
// ---------------------------------------------------------------------------

/// Read-only binding to `property` on `host`.
#[must_use]
pub fn bind<H: Bindable>(host: &Rc<H>, property: &str) -> Binding<H> {
    Binding::new(host, property)
}

/// Two-way binding to `property` on `host`.
#[must_use]
pub fn bind_two_way<H: Bindable>(host: &Rc<H>, property: &str) -> TwoWayBinding<H> {
    TwoWayBinding::new(host, property)
}

/// Binding with the requested [`Access`].
#[must_use]
pub fn bind_with<H: Bindable>(host: &Rc<H>, property: &str, access: Access) -> BoundValue<H> {
    match access {
        Access::ReadOnly => BoundValue::ReadOnly(bind(host, property)),
        Access::ReadWrite => BoundValue::TwoWay(bind_two_way(host, property)),
    }
}

/// Externally initiated write: store `value` and notify with an uncaused
/// update event.
pub fn assign<H: Bindable + ?Sized>(
    host: &H,
    property: &str,
    value: H::Value,
) -> Result<(), CoilError> {
    write_slot(host, &BindingId::of(host, property), value, None)
}

/// Externally initiated delete. Returns `false` if already deleted.
pub fn delete<H: Bindable + ?Sized>(host: &H, property: &str) -> Result<bool, CoilError> {
    delete_slot(host, &BindingId::of(host, property), None)
}

fn write_slot<H: Bindable + ?Sized>(
    host: &H,
    id: &BindingId,
    value: H::Value,
    cause: Option<Rc<Event<H::Value>>>,
) -> Result<(), CoilError> {
    host.set_property(id.property(), value.clone())?;
    let event = Event::updated(id.clone(), value, cause);
    host.registry().notify(id.property(), &event);
    Ok(())
}

fn delete_slot<H: Bindable + ?Sized>(
    host: &H,
    id: &BindingId,
    cause: Option<Rc<Event<H::Value>>>,
) -> Result<bool, CoilError> {
    if host.delete_property(id.property())?.is_none() {
        return Ok(false);
    }
    let event = Event::deleted(id.clone(), cause);
    host.registry().notify(id.property(), &event);
    Ok(true)
}
