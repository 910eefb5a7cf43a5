//! Fail-open utilities for graceful degradation
//!
//! For side effects that must never fail the operation that triggered them:
//! snapshot persistence and subscriber notification. Do not use for phase
//! execution or message validation.

use tracing::warn;

use crate::Result;

/// Run an infrastructure operation, logging and swallowing its error
///
/// Returns `Err` with the rendered message so callers can record it, e.g. as
/// an event in the store's debug log.
pub fn fail_open<T>(operation_name: &str, f: impl FnOnce() -> Result<T>) -> std::result::Result<T, String> {
    f().map_err(|e| {
        warn!("{} failed (fail-open): {}", operation_name, e);
        e.to_string()
    })
}

/// Like `fail_open` but also contains panics
///
/// Used for caller-supplied callbacks, where a panic must not poison the
/// caller's state.
pub fn fail_open_catching<T>(
    operation_name: &str,
    f: impl FnOnce() -> Result<T>,
) -> std::result::Result<T, String> {
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)) {
        Ok(result) => fail_open(operation_name, || result),
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "panic".to_string());
            warn!("{} panicked (fail-open): {}", operation_name, message);
            Err(message)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ChorusError;

    #[test]
    fn test_fail_open_success() {
        let result = fail_open("test_op", || Ok::<_, ChorusError>(42));
        assert_eq!(result, Ok(42));
    }

    #[test]
    fn test_fail_open_failure() {
        let result = fail_open("test_op", || {
            Err::<i32, _>(ChorusError::Other("test error".to_string()))
        });
        assert_eq!(result, Err("test error".to_string()));
    }

    #[test]
    fn test_fail_open_catching_panic() {
        let result: std::result::Result<(), String> =
            fail_open_catching("test_op", || panic!("boom"));
        assert_eq!(result, Err("boom".to_string()));
    }

    #[test]
    fn test_fail_open_catching_error() {
        let result = fail_open_catching("test_op", || {
            Err::<(), _>(ChorusError::Other("bad".to_string()))
        });
        assert_eq!(result, Err("bad".to_string()));
    }
}
