#![forbid(unsafe_code)]

//! Runtime task registry and bound assignment for Coil.
//!
//! - [`Runtime`]: tracks background tasks under `(id, scope)` keys while a
//!   [`RuntimeScope`] is open, evicts them through an internal drain task,
//!   and cancels whatever is left when the scope exits.
//! - [`assign_bound`] / [`clear_binding`]: make a property follow another
//!   binding (one-way or two-way), replacing any previous forwarding.
//! - [`RuntimeConfig`]: forwarder ids, default tail options and drop
//!   behavior. With the `config-file` feature it can be read from TOML.
//!
//! Like `coil-core`, everything here is `!Send` and must run inside a
//! [`tokio::task::LocalSet`].

pub mod assign;
pub mod config;
pub mod runtime;

pub use assign::{assign_bound, clear_binding};
#[cfg(feature = "config-file")]
pub use config::ConfigError;
pub use config::RuntimeConfig;
pub use runtime::{Runtime, RuntimeScope, RuntimeState, TaskKey};

#[cfg(test)]
pub(crate) mod testing {
    use std::future::Future;

    pub(crate) fn run_local<F: Future>(future: F) -> F::Output {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("test runtime");
        tokio::task::LocalSet::new().block_on(&rt, future)
    }

    pub(crate) async fn settle() {
        for _ in 0..32 {
            tokio::task::yield_now().await;
        }
    }
}
