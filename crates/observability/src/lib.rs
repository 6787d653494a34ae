//! Process-wide tracing setup shared by the binaries.

pub mod tracing;

pub use self::tracing::{LogConfig, LogConfigError, LogFormat};

/// Install the global subscriber.
///
/// Safe to call multiple times; later calls are no-ops.
pub fn init(config: &LogConfig) {
    self::tracing::init(config);
}
