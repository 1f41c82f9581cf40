//! Result type definition and extension traits.
//!
//! Provides logging combinators for Result types so that non-fatal failures
//! can be recorded and skipped without unwrap/expect/panic.

use crate::error::Error;

/// The standard Result type for Sealant core operations.
///
/// # Examples
///
/// ```ignore
/// fn load() -> Result<String> {
///     let text = sealant_core::fs::read_to_string("profile.heapsnapshot")?;
///     Ok(text)
/// }
/// ```
pub type Result<T> = std::result::Result<T, Error>;

/// Extension trait providing logging combinators for any displayable error.
///
/// Used where a failure is worth a log line but must not abort the caller,
/// such as an optional metric that cannot be evaluated.
pub trait ResultExt<T, E> {
    /// Convert a Result to an Option, logging the error at `warn` if present.
    fn into_option_logged(self, context: &str) -> Option<T>;

    /// Perform a side effect on the error without consuming the Result.
    fn tap_err<F: FnOnce(&E)>(self, f: F) -> Self;
}

impl<T, E: std::fmt::Display> ResultExt<T, E> for std::result::Result<T, E> {
    fn into_option_logged(self, context: &str) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("{context}: {e}");
                None
            }
        }
    }

    fn tap_err<F: FnOnce(&E)>(self, f: F) -> Self {
        if let Err(ref e) = self {
            f(e);
        }
        self
    }
}
