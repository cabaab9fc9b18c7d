// SPDX-License-Identifier: MPL-2.0

//! One-time setup shared by `#[cfg(test)]` modules across this crate.

use std::sync::Once;

static INIT: Once = Once::new();

/// Installs the scheduler and initializes logging. Idempotent and cheap to
/// call at the top of every test.
pub fn init() {
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
        crate::sched::init();
    });
}
