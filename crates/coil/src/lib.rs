#![forbid(unsafe_code)]

//! Coil public facade crate.
//!
//! Observable properties, cause-carrying change events and bindings that
//! forward one property into another without echoing forever. The reactive
//! core lives in `coil-core`; the task registry and bound assignment in
//! `coil-runtime` (default `runtime` feature).
//!
//! # Usage
//!
//! ```ignore
//! use coil::prelude::*;
//!
//! let main = Record::builder().property("width", 1024).build();
//! let preview = Record::builder().property("width", 0).build();
//!
//! Runtime::new()
//!     .run(|rt| async move {
//!         assign_bound(&rt, &preview, "width", bind_with(&main, "width", Access::ReadWrite))?;
//!         main.set("width", 1920)?;
//!         Ok::<_, CoilError>(())
//!     })
//!     .await??;
//! ```

pub use coil_core as core;
#[cfg(feature = "runtime")]
pub use coil_runtime as runtime;

pub use coil_core::{
    Access, Bindable, Binding, Bound, BoundValue, CoilError, Event, EventStream, Record,
    TaskHandle, TwoWayBinding, bind, bind_two_way, bind_with, tail, tail_with,
};
#[cfg(feature = "runtime")]
pub use coil_runtime::{Runtime, RuntimeConfig, RuntimeScope, assign_bound, clear_binding};

pub mod prelude {
    pub use coil_core::{
        Access, Bindable, Bound, BoundValue, CoilError, Event, Record, TailOptions, TwoWayBinding,
        bind, bind_two_way, bind_with, tail, tail_with,
    };
    #[cfg(feature = "runtime")]
    pub use coil_runtime::{Runtime, RuntimeConfig, assign_bound, clear_binding};
}
