//! Storage subsystem
//!
//! Persists finished sessions as JSON lines in time-rotated files.
//!
//! Components:
//! - `rot_writer`: the `Storage` implementation owning the open session file.
//! - `rotation`: when a file is due for rotation.
//! - `path_template`: strftime output paths and collision suffixes.
//! - `clock`: wall-clock source, replaceable in tests.

pub mod clock;
pub mod path_template;
pub mod rot_writer;
pub mod rotation;

pub use clock::{Clock, SystemClock};
pub use path_template::PathTemplate;
pub use rot_writer::RotWriter;
pub use rotation::RotationPolicy;
