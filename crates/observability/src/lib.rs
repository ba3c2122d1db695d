//! Process-wide tracing/logging initialization, used by binaries and
//! integration tests that want readable output (spec.md §6, "Environment":
//! the core crates take no process-wide configuration themselves).

/// Tracing configuration (filters, layers).
pub mod tracing;

/// Initialize process-wide observability (tracing/logging).
///
/// Safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}
