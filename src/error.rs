//! Per-device scan error taxonomy

use std::time::Duration;

use crate::redfish::RedfishError;

/// Errors that can end one device's scan (or its hardware half).
///
/// None of these ever escapes the fleet scheduler; each is folded into the
/// device's `ScanResult`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScanError {
    #[error("management controller unreachable: {0}")]
    TransportUnreachable(String),

    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("credential decryption failed: {0}")]
    CredentialDecryptionFailed(String),

    #[error("malformed vendor payload: {0}")]
    MalformedVendorPayload(String),

    #[error("scan timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("scan task failed: {0}")]
    Internal(String),
}

impl ScanError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ScanError::TransportUnreachable(_))
    }

    /// Whether this error makes the whole scan unsuccessful.
    ///
    /// Authentication, decryption and payload problems only end the hardware
    /// check; the connectivity half of the scan is still a valid result.
    pub fn fails_scan(&self) -> bool {
        matches!(
            self,
            ScanError::TransportUnreachable(_) | ScanError::Timeout(_) | ScanError::Internal(_)
        )
    }
}

impl From<RedfishError> for ScanError {
    fn from(err: RedfishError) -> Self {
        match err {
            RedfishError::Unreachable(_) | RedfishError::Timeout(_) => {
                ScanError::TransportUnreachable(err.to_string())
            }
            RedfishError::AuthFailed(_) => ScanError::AuthenticationFailed(err.to_string()),
            RedfishError::MalformedResponse { .. } | RedfishError::Http { .. } => {
                ScanError::MalformedVendorPayload(err.to_string())
            }
        }
    }
}
