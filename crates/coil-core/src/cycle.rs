#![forbid(unsafe_code)]

//! Cyclic-echo detection.
//!
//! When two properties forward into each other (A tails into B and B tails
//! into A), every write would bounce back forever. The forwarder always
//! passes the event it is applying as the cause of the write it makes, so an
//! echo shows up as an event whose causal chain already contains an event
//! with the same origin and the same kind.
//!
//! This is a chain walk, not graph cycle detection: it recognises exactly the
//! "derived from a change I already made to this property" shape that
//! forwarding produces.

use crate::event::Event;

/// Whether `event` is causally derived from an earlier event with the same
/// origin and kind.
///
/// The first event of a chain (no `source_event`) is never an echo.
#[must_use]
pub fn is_cyclic_echo<T>(event: &Event<T>) -> bool {
    let origin = event.source();
    let kind = event.kind();
    event
        .ancestors()
        .any(|ancestor| ancestor.source() == origin && ancestor.kind() == kind)
}

/// Number of causes behind `event`.
#[must_use]
pub fn chain_depth<T>(event: &Event<T>) -> usize {
    event.ancestors().count()
}
