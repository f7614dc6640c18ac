//! Abort-on-error helpers for scripts, seeders and tests
//!
//! The core API never panics. Code that cannot continue without a result
//! (one-off tooling, fixtures) can opt into aborting with [`OrAbort`].

use std::fmt::Display;

/// Unwrap a result or abort with the error message.
pub trait OrAbort<T> {
    /// Returns the value, or panics with `"{context}: {error}"`.
    fn or_abort(self, context: &str) -> T;
}

impl<T, E: Display> OrAbort<T> for Result<T, E> {
    #[track_caller]
    fn or_abort(self, context: &str) -> T {
        match self {
            Ok(value) => value,
            Err(e) => panic!("{context}: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orm::Error;

    #[test]
    fn test_ok_passes_through() {
        let result: Result<i64, Error> = Ok(4);
        assert_eq!(result.or_abort("count"), 4);
    }

    #[test]
    #[should_panic(expected = "load site: equipment not found")]
    fn test_err_aborts_with_message() {
        let result: Result<i64, Error> = Err(Error::NotFound { entity: "equipment" });
        result.or_abort("load site");
    }
}
