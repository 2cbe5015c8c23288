//! Process-wide tracing setup shared by tally binaries and tests.

/// Install the JSON tracing subscriber.
///
/// Safe to call multiple times; only the first call installs anything.
pub fn init() {
    tracing::init();
}

/// Subscriber construction and filtering.
pub mod tracing;
