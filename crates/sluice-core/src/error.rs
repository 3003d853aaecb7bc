//! Caller-visible gateway errors.
//!
//! Only refusals and malformed input surface here. Drift, row-count
//! mismatches, and cache failures are absorbed by the stores and reported
//! through logs, receipts, and stats.

use crate::admission::AdmissionRefusal;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Content arrived for a pipe with no structure declaration.
    #[error(transparent)]
    AdmissionRefused(#[from] AdmissionRefusal),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl GatewayError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }
}
