#![forbid(unsafe_code)]

//! Error types shared by the Coil crates.

use std::any::Any;

use crate::object::BindingId;
use crate::subscription::SubscriptionHandle;

/// Error returned by a subscriber callback.
///
/// Callback errors are swallowed during notification; they only reach the
/// registry's optional failure hook.
pub type CallbackError = Box<dyn std::error::Error + 'static>;

/// Usage errors raised by bindings, registries and the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoilError {
    /// A task registry operation was attempted outside an active scope.
    RuntimeInactive,
    /// `enter_scope` was called on a runtime that is already active.
    RuntimeAlreadyActive,
    /// The subscription handle is not (or no longer) registered.
    UnknownSubscription(SubscriptionHandle),
    /// A different task is already registered under this key.
    TaskKeyOccupied {
        id: String,
        scope: Option<BindingId>,
    },
    /// The host object does not declare this property.
    UnknownProperty { property: String },
    /// The host object behind a binding has been dropped.
    HostDropped { property: String },
}

impl std::fmt::Display for CoilError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RuntimeInactive => write!(f, "no runtime scope is currently active"),
            Self::RuntimeAlreadyActive => write!(f, "runtime scope is already active"),
            Self::UnknownSubscription(handle) => write!(f, "invalid subscription: {handle}"),
            Self::TaskKeyOccupied { id, scope: None } => {
                write!(f, "another task is already registered with id `{id}`")
            }
            Self::TaskKeyOccupied {
                id,
                scope: Some(scope),
            } => write!(
                f,
                "another task is already registered with id `{id}` for {scope}"
            ),
            Self::UnknownProperty { property } => {
                write!(f, "property `{property}` is not declared on this host")
            }
            Self::HostDropped { property } => {
                write!(f, "host of bound property `{property}` has been dropped")
            }
        }
    }
}

impl std::error::Error for CoilError {}

/// Best-effort rendering of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}
