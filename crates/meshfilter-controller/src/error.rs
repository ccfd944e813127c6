//! Reconcile errors

use meshfilter_translation::TranslationError;
use thiserror::Error;

/// Error from one reconcile pass
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Reading or writing cluster state failed
    #[error("cluster store error: {0}")]
    Store(#[from] meshfilter_common::Error),

    /// The snapshot could not be translated
    #[error("translation failed: {0}")]
    Translation(#[from] TranslationError),

    /// Some status writes failed; the rest of the pass was applied
    #[error("{failed} status writes failed ({written} written), first: {first}")]
    StatusWrite {
        /// Number of failed writes
        failed: usize,
        /// Number of successful writes
        written: usize,
        /// First failure
        first: meshfilter_common::Error,
    },
}

impl ReconcileError {
    /// Whether retrying without a configuration change can succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store(e) => e.is_retryable(),
            // an inconsistent snapshot may resolve as watches catch up
            Self::Translation(e) => e.is_integrity(),
            // the next pass re-lists objects and writes every stale status again
            Self::StatusWrite { .. } => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integrity_failures_are_retryable() {
        let err: ReconcileError = TranslationError::DuplicateGateway {
            gateway: "default/ingress".to_string(),
        }
        .into();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("default/ingress"));
    }

    #[test]
    fn status_write_failures_are_retryable() {
        let err = ReconcileError::StatusWrite {
            failed: 2,
            written: 5,
            first: meshfilter_common::Error::internal("gone"),
        };
        assert!(err.is_retryable());
        let msg = err.to_string();
        assert!(msg.starts_with("2 status writes failed (5 written)"));
        assert!(msg.contains("gone"));
    }

    #[test]
    fn validation_store_errors_are_not_retryable() {
        let err: ReconcileError = meshfilter_common::Error::validation("bad").into();
        assert!(!err.is_retryable());
    }
}
