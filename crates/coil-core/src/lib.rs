#![forbid(unsafe_code)]

//! Observable properties, change events and bindings for Coil.
//!
//! This crate provides the single-threaded reactive core:
//!
//! - [`Bindable`]: the object-model capability (raw slot access plus a
//!   per-object [`SubscriberRegistry`]). [`Record`] is a ready-made store with
//!   declared properties.
//! - [`Event`]: an immutable change record (update or delete) carrying its
//!   origin [`BindingId`] and the event that caused it, if any.
//! - [`is_cyclic_echo`]: the causal-chain walk that stops feedback loops
//!   between mutually bound properties.
//! - [`Binding`] / [`TwoWayBinding`]: non-owning views of one
//!   `(object, property)` pair, producing [`EventStream`]s and (two-way only)
//!   writing values back.
//! - [`tail`]: a background [`TaskHandle`] forwarding every update from one
//!   binding into another.
//!
//! # Architecture
//!
//! Everything here is `!Send`: hosts are shared through `Rc`, registries use
//! `RefCell`, and background work is spawned with
//! [`tokio::task::spawn_local`]. Callers drive the engine from a
//! current-thread tokio runtime inside a [`tokio::task::LocalSet`].
//!
//! # Invariants
//!
//! 1. Subscribers of one `(object, property)` are notified in registration
//!    order, once per mutation, in mutation order.
//! 2. A callback failure never prevents delivery to the next callback and is
//!    never reported to the mutator.
//! 3. An event whose causal chain already contains an event with the same
//!    origin and kind is suppressed (logged, not delivered).
//! 4. Dropping an [`EventStream`] removes its subscription immediately.

pub mod binding;
pub mod cycle;
pub mod error;
pub mod event;
pub mod object;
pub mod stream;
pub mod subscription;
pub mod tail;
pub mod task;

pub use binding::{
    Access, Bound, BoundValue, Binding, TwoWayBinding, assign, bind, bind_two_way, bind_with,
    delete,
};
pub use cycle::{chain_depth, is_cyclic_echo};
pub use error::{CallbackError, CoilError};
pub use event::{Change, Event, EventKind};
pub use object::{Bindable, BindingId, HostId, Record, RecordBuilder};
pub use stream::EventStream;
pub use subscription::{
    CallbackFailure, Delivery, SubscriberRegistry, SubscriptionHandle, SubscriptionId, notify,
    subscribe, unsubscribe,
};
pub use tail::{SourceDeleted, TailOptions, tail, tail_with};
pub use task::{TaskFailure, TaskHandle, TaskId, TaskOutcome, TaskResult};
