#![forbid(unsafe_code)]

//! Subscription-backed event streams.
//!
//! Each call to [`Bound::events`](crate::Bound::events) opens an independent
//! [`EventStream`]: a subscription on the host registry feeding a private
//! FIFO queue. [`EventStream::next`] suspends until the next event arrives.
//!
//! # Invariants
//!
//! 1. The stream yields update events only, in mutation order.
//! 2. A delete event ends the stream; it is kept as the
//!    [terminal event](EventStream::terminal_event) and every later `next`
//!    returns `None`.
//! 3. The subscription is released as soon as the stream closes or is
//!    dropped, never later.
//! 4. If the host is dropped, its registry drops the queue's sender and the
//!    stream ends.

use std::rc::Rc;

use tokio::sync::mpsc;

use crate::error::CallbackError;
use crate::event::Event;
use crate::object::{Bindable, BindingId};

/// A lazy, per-subscriber stream of update events for one property.
pub struct EventStream<T> {
    binding: BindingId,
    rx: mpsc::UnboundedReceiver<Rc<Event<T>>>,
    terminal: Option<Rc<Event<T>>>,
    closed: bool,
    release: Option<Box<dyn FnOnce()>>,
}

impl<T: 'static> EventStream<T> {
    pub(crate) fn open<H: Bindable<Value = T>>(host: &Rc<H>, binding: &BindingId) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = host
            .registry()
            .subscribe(binding.property(), move |event: &Rc<Event<T>>| {
                tx.send(Rc::clone(event))
                    .map_err(|_| CallbackError::from("event stream receiver is gone"))
            });

        let host = Rc::downgrade(host);
        let release: Box<dyn FnOnce()> = Box::new(move || {
            if let Some(host) = host.upgrade() {
                // Already gone only if the host cleared its registry itself.
                let _ = host.registry().unsubscribe(&handle);
            }
        });

        tracing::debug!(target: "coil::core", binding = %binding, "event stream opened");
        Self {
            binding: binding.clone(),
            rx,
            terminal: None,
            closed: false,
            release: Some(release),
        }
    }

    /// Wait for the next update event.
    ///
    /// Returns `None` once the property has been deleted or the host dropped.
    /// Cancel-safe: dropping the returned future loses no event.
    pub async fn next(&mut self) -> Option<Rc<Event<T>>> {
        if self.closed {
            return None;
        }
        let received = self.rx.recv().await;
        self.accept(received)
    }

    /// Take the next already-queued update event without waiting.
    pub fn try_next(&mut self) -> Option<Rc<Event<T>>> {
        if self.closed {
            return None;
        }
        match self.rx.try_recv() {
            Ok(event) => self.accept(Some(event)),
            Err(mpsc::error::TryRecvError::Empty) => None,
            Err(mpsc::error::TryRecvError::Disconnected) => self.accept(None),
        }
    }

    /// The delete event that ended this stream, if any.
    #[must_use]
    pub fn terminal_event(&self) -> Option<&Rc<Event<T>>> {
        self.terminal.as_ref()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Identity of the watched property.
    #[must_use]
    pub fn binding(&self) -> &BindingId {
        &self.binding
    }

    /// Stop watching now. Queued events are discarded.
    pub fn close(&mut self) {
        if let Some(release) = self.release.take() {
            release();
            tracing::debug!(target: "coil::core", binding = %self.binding, "event stream closed");
        }
        self.closed = true;
        self.rx.close();
    }

    fn accept(&mut self, received: Option<Rc<Event<T>>>) -> Option<Rc<Event<T>>> {
        match received {
            Some(event) if event.is_update() => Some(event),
            Some(event) => {
                self.terminal = Some(event);
                self.close();
                None
            }
            None => {
                self.close();
                None
            }
        }
    }
}

impl<T> Drop for EventStream<T> {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl<T> std::fmt::Debug for EventStream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStream")
            .field("binding", &self.binding)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}
