pub mod config;
pub mod types;

pub use config::{CliArgs, Config, OutputConfig};
pub use types::{ServerMode, Timezone, TlsFiles};
