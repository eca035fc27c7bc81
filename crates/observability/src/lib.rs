//! Shared tracing setup for the fulfillment services and their tests.

pub mod tracing;

pub use self::tracing::{LogFormat, ENV_LOG_FORMAT};

/// Initialize process-wide logging.
///
/// Safe to call multiple times; later calls are no-ops.
pub fn init() {
    tracing::init();
}

/// Route logs through the test harness capture so they show up only for
/// failing tests.
pub fn init_for_tests() {
    tracing::init_for_tests();
}
