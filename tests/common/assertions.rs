//! Custom assertion macros and utilities
//!
//! Provides enhanced assertion macros for better test output, plus polling
//! helpers for state that settles asynchronously.

use std::time::Duration;

/// Assert that a result is ok and return the value
#[macro_export]
macro_rules! assert_ok {
    ($result:expr) => {
        match $result {
            Ok(value) => value,
            Err(e) => panic!("Expected Ok, got Err: {:?}", e),
        }
    };
    ($result:expr, $message:expr) => {
        match $result {
            Ok(value) => value,
            Err(e) => panic!("{}: {:?}", $message, e),
        }
    };
}

/// Assert that a result is an error
#[macro_export]
macro_rules! assert_err {
    ($result:expr) => {
        assert!($result.is_err(), "Expected Err, got Ok");
    };
    ($result:expr, $pattern:pat) => {
        match $result {
            Err($pattern) => {}
            Ok(value) => panic!("Expected Err, got Ok: {:?}", value),
            Err(e) => panic!("Expected different error variant, got: {:?}", e),
        }
    };
}

/// Poll `condition` every 10ms (virtual time under a paused clock) until it
/// holds, panicking after `limit`
pub async fn wait_until<F>(what: &str, limit: Duration, mut condition: F)
where
    F: FnMut() -> bool,
{
    let step = Duration::from_millis(10);
    let mut waited = Duration::ZERO;
    while !condition() {
        if waited >= limit {
            panic!("timed out after {:?} waiting for {}", limit, what);
        }
        tokio::time::sleep(step).await;
        waited += step;
    }
}

/// Same as `wait_until` with a one minute budget
pub async fn eventually<F>(what: &str, condition: F)
where
    F: FnMut() -> bool,
{
    wait_until(what, Duration::from_secs(60), condition).await;
}
