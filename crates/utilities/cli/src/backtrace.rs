//! Backtrace defaults for binaries.

use std::sync::Once;

static INIT: Once = Once::new();

/// Sets `RUST_BACKTRACE=1` unless a value is already present.
///
/// Call at the top of `main`, before any thread is spawned.
pub fn enable() {
    INIT.call_once(|| {
        if std::env::var_os("RUST_BACKTRACE").is_none() {
            // SAFETY: runs once, before the runtime and its threads exist.
            unsafe { std::env::set_var("RUST_BACKTRACE", "1") };
        }
    });
}
