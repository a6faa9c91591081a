#![forbid(unsafe_code)]

//! Object model: host identity, the [`Bindable`] capability and [`Record`].
//!
//! The engine never reaches into a host's fields directly. A host exposes
//! raw slot access (`get_property` / `set_property` / `delete_property`, none
//! of which notify) and its own [`SubscriberRegistry`]. Notifying writes are
//! layered on top in [`crate::binding`].
//!
//! # Identity
//!
//! Each registry allocates a process-unique [`HostId`] when it is created,
//! so object identity never depends on value equality or on addresses that
//! could be reused after a host is dropped.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use ahash::AHashMap;

use crate::binding;
use crate::error::CoilError;
use crate::subscription::SubscriberRegistry;

static NEXT_HOST_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a bindable object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HostId(u64);

impl HostId {
    /// Allocate a fresh identity. IDs are never reused.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_HOST_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value.
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for HostId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "host#{}", self.0)
    }
}

/// Identity of one `(object, property)` pair.
///
/// Two ids are equal iff they name the same host (by identity) and the same
/// property. This is the unit of subscription, of cycle comparison, and of
/// runtime task scoping.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BindingId {
    host: HostId,
    property: Rc<str>,
}

impl BindingId {
    #[must_use]
    pub fn new(host: HostId, property: &str) -> Self {
        Self {
            host,
            property: Rc::from(property),
        }
    }

    /// Identity of `property` on `host`.
    #[must_use]
    pub fn of<H: Bindable + ?Sized>(host: &H, property: &str) -> Self {
        Self::new(host.host_id(), property)
    }

    #[must_use]
    pub fn host(&self) -> HostId {
        self.host
    }

    #[must_use]
    pub fn property(&self) -> &str {
        &self.property
    }
}

impl std::fmt::Display for BindingId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.host, self.property)
    }
}

/// An object whose named properties can be observed and bound.
///
/// Implementors store one value type per host; use an enum when a host needs
/// heterogeneous properties.
pub trait Bindable: 'static {
    /// Value type stored in every property of this host.
    type Value: Clone + 'static;

    /// The host's private subscriber registry.
    fn registry(&self) -> &SubscriberRegistry<Self::Value>;

    /// Read a property. `Ok(None)` means the property is declared but
    /// currently deleted.
    fn get_property(&self, property: &str) -> Result<Option<Self::Value>, CoilError>;

    /// Store a value without notifying subscribers.
    fn set_property(&self, property: &str, value: Self::Value) -> Result<(), CoilError>;

    /// Remove a value without notifying subscribers, returning the old value.
    fn delete_property(&self, property: &str) -> Result<Option<Self::Value>, CoilError>;

    /// Identity of this host (allocated by its registry).
    fn host_id(&self) -> HostId {
        self.registry().host_id()
    }
}

// ---------------------------------------------------------------------------
// Record<V>
// ---------------------------------------------------------------------------

/// A bindable store with a fixed set of declared properties.
///
/// Reading or writing an undeclared property fails with
/// [`CoilError::UnknownProperty`]; deleting a declared property leaves it
/// declared but empty.
///
/// ```ignore
/// let window = Record::builder()
///     .property("width", 1024)
///     .property("height", 768)
///     .build();
///
/// window.set("width", 1920)?;
/// assert_eq!(window.get("width")?, Some(1920));
/// ```
pub struct Record<V> {
    registry: SubscriberRegistry<V>,
    slots: RefCell<AHashMap<Rc<str>, Option<V>>>,
}

impl<V: Clone + 'static> Record<V> {
    /// Start declaring a record's properties.
    #[must_use]
    pub fn builder() -> RecordBuilder<V> {
        RecordBuilder { slots: Vec::new() }
    }

    /// Current value of `property`.
    pub fn get(&self, property: &str) -> Result<Option<V>, CoilError> {
        self.get_property(property)
    }

    /// Write `property` and notify its subscribers.
    pub fn set(&self, property: &str, value: V) -> Result<(), CoilError> {
        binding::assign(self, property, value)
    }

    /// Delete `property` and notify its subscribers.
    ///
    /// Returns `false` (and notifies nobody) if the property was already
    /// deleted.
    pub fn delete(&self, property: &str) -> Result<bool, CoilError> {
        binding::delete(self, property)
    }

    /// Declared property names, sorted.
    #[must_use]
    pub fn properties(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .slots
            .borrow()
            .keys()
            .map(|name| name.to_string())
            .collect();
        names.sort();
        names
    }

    fn unknown(property: &str) -> CoilError {
        CoilError::UnknownProperty {
            property: property.to_string(),
        }
    }
}

impl<V: Clone + 'static> Bindable for Record<V> {
    type Value = V;

    fn registry(&self) -> &SubscriberRegistry<V> {
        &self.registry
    }

    fn get_property(&self, property: &str) -> Result<Option<V>, CoilError> {
        self.slots
            .borrow()
            .get(property)
            .cloned()
            .ok_or_else(|| Self::unknown(property))
    }

    fn set_property(&self, property: &str, value: V) -> Result<(), CoilError> {
        let mut slots = self.slots.borrow_mut();
        let slot = slots
            .get_mut(property)
            .ok_or_else(|| Self::unknown(property))?;
        *slot = Some(value);
        Ok(())
    }

    fn delete_property(&self, property: &str) -> Result<Option<V>, CoilError> {
        let mut slots = self.slots.borrow_mut();
        let slot = slots
            .get_mut(property)
            .ok_or_else(|| Self::unknown(property))?;
        Ok(slot.take())
    }
}

impl<V: 'static> std::fmt::Debug for Record<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Record")
            .field("host", &self.registry.host_id())
            .field("properties", &self.slots.borrow().len())
            .finish()
    }
}

/// Declares the properties of a [`Record`].
#[derive(Debug)]
pub struct RecordBuilder<V> {
    slots: Vec<(Rc<str>, Option<V>)>,
}

impl<V: Clone + 'static> RecordBuilder<V> {
    /// Declare a property with an initial value.
    #[must_use]
    pub fn property(mut self, name: &str, initial: V) -> Self {
        self.slots.push((Rc::from(name), Some(initial)));
        self
    }

    /// Declare a property that starts out deleted.
    #[must_use]
    pub fn declare(mut self, name: &str) -> Self {
        self.slots.push((Rc::from(name), None));
        self
    }

    /// Build the record. Later declarations of the same name win.
    #[must_use]
    pub fn build(self) -> Rc<Record<V>> {
        Rc::new(Record {
            registry: SubscriberRegistry::new(),
            slots: RefCell::new(self.slots.into_iter().collect()),
        })
    }
}
