#![deny(missing_docs)]
//! Test utilities for the wotfetch scheduler modules.

pub mod id;
pub use id::*;
pub mod output;
pub use output::*;
pub mod trust;
pub use trust::*;

/// Enable tracing with the RUST_LOG environment variable.
///
/// This is intended to be used in tests, so it defaults to DEBUG level.
pub fn enable_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(tracing::Level::DEBUG.into())
                .from_env_lossy(),
        )
        .try_init();
}

/// Poll a condition in a loop until it breaks or a timeout panics the
/// test. The block must `break` once the condition is met.
///
/// Defaults to a 1 s timeout; pass the timeout in millis as the first
/// argument to override.
#[macro_export]
macro_rules! iter_check {
    ($code:block) => {
        $crate::iter_check!(1000, $code)
    };
    ($timeout_ms:expr, $code:block) => {{
        let deadline = std::time::Instant::now()
            + std::time::Duration::from_millis($timeout_ms);
        loop {
            $code

            if std::time::Instant::now() > deadline {
                panic!("iter_check timed out");
            }

            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    }};
}
