//! Session bookkeeping shared by the listeners.
//!
//! Sessions themselves are owned by the task handling their connection; the only
//! cross-task state is the open-session count used in log lines.

/// Submodule for the open-session counter.
pub mod session_counter;

pub use session_counter::{SessionCounter, SessionGuard};
