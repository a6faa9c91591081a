#![forbid(unsafe_code)]

//! Change events.
//!
//! An [`Event`] records one mutation of one `(object, property)` pair. It is
//! immutable and shared through `Rc`; `source_event` links an event to the
//! event whose application caused it, forming a short causal chain that the
//! [cycle detector](crate::cycle) walks.

use std::rc::Rc;

use crate::object::BindingId;

/// What happened to the property.
#[derive(Debug, Clone, PartialEq)]
pub enum Change<T> {
    /// The property now holds this value.
    Updated(T),
    /// The property was deleted.
    Deleted,
}

/// Value-free discriminant of a [`Change`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Update,
    Delete,
}

/// One change to a bound property.
#[derive(Debug)]
pub struct Event<T> {
    source: BindingId,
    source_event: Option<Rc<Event<T>>>,
    change: Change<T>,
}

impl<T> Event<T> {
    /// An update event originating at `source`.
    #[must_use]
    pub fn updated(source: BindingId, value: T, cause: Option<Rc<Event<T>>>) -> Rc<Self> {
        Rc::new(Self {
            source,
            source_event: cause,
            change: Change::Updated(value),
        })
    }

    /// A delete event originating at `source`.
    #[must_use]
    pub fn deleted(source: BindingId, cause: Option<Rc<Event<T>>>) -> Rc<Self> {
        Rc::new(Self {
            source,
            source_event: cause,
            change: Change::Deleted,
        })
    }

    /// The binding that produced this event.
    #[must_use]
    pub fn source(&self) -> &BindingId {
        &self.source
    }

    /// The event whose application caused this one, if any.
    #[must_use]
    pub fn source_event(&self) -> Option<&Rc<Event<T>>> {
        self.source_event.as_ref()
    }

    #[must_use]
    pub fn change(&self) -> &Change<T> {
        &self.change
    }

    /// The new value, for update events.
    #[must_use]
    pub fn value(&self) -> Option<&T> {
        match &self.change {
            Change::Updated(value) => Some(value),
            Change::Deleted => None,
        }
    }

    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self.change {
            Change::Updated(_) => EventKind::Update,
            Change::Deleted => EventKind::Delete,
        }
    }

    #[must_use]
    pub fn is_update(&self) -> bool {
        self.kind() == EventKind::Update
    }

    #[must_use]
    pub fn is_delete(&self) -> bool {
        self.kind() == EventKind::Delete
    }

    /// Iterate the causal chain, nearest cause first (excluding `self`).
    pub fn ancestors(&self) -> Ancestors<'_, T> {
        Ancestors {
            next: self.source_event.as_deref(),
        }
    }
}

/// Iterator over an event's causes. See [`Event::ancestors`].
#[derive(Debug)]
pub struct Ancestors<'a, T> {
    next: Option<&'a Event<T>>,
}

impl<'a, T> Iterator for Ancestors<'a, T> {
    type Item = &'a Event<T>;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = current.source_event.as_deref();
        Some(current)
    }
}
