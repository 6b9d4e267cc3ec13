//! Transport error classification for Redfish calls

/// Errors returned by the Redfish protocol client.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RedfishError {
    /// Host down, connection refused, TLS handshake failure.
    #[error("controller unreachable: {0}")]
    Unreachable(String),

    /// Credentials rejected by the controller.
    #[error("authentication rejected: {0}")]
    AuthFailed(String),

    /// Response arrived but could not be understood.
    #[error("malformed response from {resource}: {reason}")]
    MalformedResponse { resource: String, reason: String },

    /// Non-success status other than an authentication failure.
    #[error("HTTP {status} from {resource}")]
    Http { status: u16, resource: String },

    #[error("request to {0} timed out")]
    Timeout(String),
}

impl RedfishError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, RedfishError::Unreachable(_))
    }

    pub(crate) fn malformed(resource: &str, reason: impl Into<String>) -> Self {
        RedfishError::MalformedResponse {
            resource: resource.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn from_transport(err: reqwest::Error, resource: &str) -> Self {
        if err.is_timeout() {
            RedfishError::Timeout(resource.to_string())
        } else if err.is_decode() {
            RedfishError::malformed(resource, err.to_string())
        } else {
            RedfishError::Unreachable(format!("{resource}: {err}"))
        }
    }

    pub(crate) fn from_status(status: reqwest::StatusCode, resource: &str) -> Self {
        match status {
            reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN => {
                RedfishError::AuthFailed(format!("{status} on {resource}"))
            }
            _ => RedfishError::Http {
                status: status.as_u16(),
                resource: resource.to_string(),
            },
        }
    }
}
