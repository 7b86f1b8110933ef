//! Process-wide tracing setup shared by the binaries.

/// Initialize tracing with the format chosen by `LOG_FORMAT`.
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init() {
    tracing::init_with(tracing::LogFormat::from_env());
}

/// Subscriber configuration (filter, output format).
pub mod tracing;
