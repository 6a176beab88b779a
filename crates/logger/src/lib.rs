//! Shared `tracing` setup for checkup binaries.

mod tracing;

pub use self::tracing::{LogFormat, init_with};
pub use tracing_subscriber::filter::LevelFilter;
