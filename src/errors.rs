//! Error types for the experiments engine.
//!
//! Backend (counter store) unavailability is deliberately *not* represented
//! here: the counter layer recovers from it locally and degrades to
//! zero/empty results. The variants below are caller errors and lock-store
//! failures that must surface.

use std::time::Duration;

/// Errors surfaced by engine operations
#[derive(Debug, thiserror::Error)]
pub enum ExperimentError {
    /// An alternative weight that failed to parse or is negative/non-finite
    #[error("invalid alternative weight '{0}'")]
    InvalidWeight(String),

    /// An alternative spec string that could not be parsed
    #[error("invalid alternative spec '{0}'")]
    InvalidAlternative(String),

    /// A lock timeout was supplied together with a non-blocking acquire
    #[error("cannot set timeout if not blocking")]
    TimeoutWithoutBlocking,

    /// A lock timeout beyond the representable lease range
    #[error("lock timeout too large: {0:?}")]
    TimeoutTooLarge(Duration),

    /// Lock release kept failing after bounded retries; the lease will only
    /// go away by expiring, which is worth a loud failure
    #[error("failed to release lock '{name}' after {attempts} attempts: {source}")]
    LockReleaseFailed {
        name: String,
        attempts: usize,
        #[source]
        source: crate::store::StoreError,
    },
}

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, ExperimentError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreError;

    #[test]
    fn test_error_display() {
        let err = ExperimentError::InvalidWeight("abc".to_string());
        assert!(err.to_string().contains("abc"));

        let err = ExperimentError::LockReleaseFailed {
            name: "sync".to_string(),
            attempts: 10,
            source: StoreError::Connection("refused".to_string()),
        };
        assert!(err.to_string().contains("sync"));
        assert!(err.to_string().contains("10"));
    }
}
