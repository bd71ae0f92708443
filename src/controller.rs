//! Controller subsystem
//!
//! Re-exports:
//! - [`Controller`]: owns the writer, the session counter, the task tracker
//!   and the shutdown token of a capture instance.
//! - [`Listeners`]: the sockets a controller serves.

pub mod controller_handler;
pub mod resource_limits;

pub use controller_handler::{Controller, Listeners};
