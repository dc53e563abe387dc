//! Tracing and logging setup shared by the `fxrates` binaries.

/// Initialize process-wide tracing, using `default_level` when `RUST_LOG` is unset.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init_with_level(default_level: &str) {
    tracing::init(default_level);
}

/// Tracing configuration (filters, layers).
pub mod tracing;
