//! Typed errors for lease operations
//!
//! Open failures are the only error category that blocks forward progress
//! for a caller; the remaining variants indicate caller misuse of the lease
//! contract and are not retryable.

use thiserror::Error;

use crate::registry::LeaseId;

/// Errors surfaced by the lease registry and lease handles
#[derive(Debug, Error)]
pub enum LeaseError {
    /// The underlying `open()` failed (network/driver/credential problem)
    #[error("failed to open shared connection: {reason:#}")]
    ResourceUnavailable {
        /// The supplier's open error
        reason: anyhow::Error,
    },

    /// `release()` called twice on the same lease
    #[error("lease {lease_id} has already been released")]
    AlreadyReleased {
        /// The lease that was released twice
        lease_id: LeaseId,
    },

    /// Connection handle accessed after the lease was released or revoked
    #[error("lease {lease_id} used after release")]
    UseAfterRelease {
        /// The lease whose handle was accessed
        lease_id: LeaseId,
    },
}

impl LeaseError {
    /// Check if this is an open failure (the caller may choose to retry)
    pub fn is_unavailable(&self) -> bool {
        matches!(self, LeaseError::ResourceUnavailable { .. })
    }

    /// Check if this is a lease-contract violation (double release or
    /// use-after-release), i.e. a programming error rather than an
    /// environmental one
    pub fn is_misuse(&self) -> bool {
        matches!(
            self,
            LeaseError::AlreadyReleased { .. } | LeaseError::UseAfterRelease { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            LeaseError::AlreadyReleased { lease_id: 7 }.to_string(),
            "lease 7 has already been released"
        );
        assert_eq!(
            LeaseError::UseAfterRelease { lease_id: 3 }.to_string(),
            "lease 3 used after release"
        );
        let err = LeaseError::ResourceUnavailable {
            reason: anyhow::anyhow!("connection refused"),
        };
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn test_error_categories() {
        let open_err = LeaseError::ResourceUnavailable {
            reason: anyhow::anyhow!("boom"),
        };
        assert!(open_err.is_unavailable());
        assert!(!open_err.is_misuse());

        assert!(LeaseError::AlreadyReleased { lease_id: 1 }.is_misuse());
        assert!(LeaseError::UseAfterRelease { lease_id: 1 }.is_misuse());
        assert!(!LeaseError::AlreadyReleased { lease_id: 1 }.is_unavailable());
    }
}
