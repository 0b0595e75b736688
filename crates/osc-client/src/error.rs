//! Outscale client errors

use thiserror::Error;

/// Errors that can occur when interacting with the Outscale API
#[derive(Debug, Error)]
pub enum OscError {
    /// HTTP request/response error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Outscale API returned an error that does not fit a more specific variant
    #[error("Outscale API error (HTTP {status}, code {code}): {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    /// Request was rate limited (HTTP 429 / 503 or RequestLimitExceeded)
    #[error("Throttled: {0}")]
    Throttled(String),

    /// Concurrent modification of the same resource
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Resource or rule already exists
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Authentication failed (invalid access key, bad signature, clock skew)
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid request (e.g., missing required fields)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl OscError {
    /// Whether retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            OscError::Throttled(_) | OscError::Conflict(_) => true,
            OscError::Http(e) => e.is_timeout() || e.is_connect(),
            OscError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Build an error from an Outscale error body (`Errors[].Type`/`Code`/`Details`).
    pub fn from_api(status: u16, code: &str, error_type: &str, details: &str) -> Self {
        let message = if details.is_empty() {
            error_type.to_string()
        } else {
            format!("{}: {}", error_type, details)
        };

        if status == 401 || status == 403 || error_type.contains("AccessDenied") {
            return OscError::Authentication(message);
        }
        if status == 429 || status == 503 || error_type.contains("RequestLimitExceeded") {
            return OscError::Throttled(message);
        }
        if error_type.contains("AlreadyExists") || error_type.contains("Duplicate") {
            return OscError::AlreadyExists(message);
        }
        if error_type.contains("NotFound") || error_type.contains("Unknown") {
            return OscError::NotFound(message);
        }
        if status == 409 || error_type.contains("Conflict") || error_type.contains("InUse") {
            return OscError::Conflict(message);
        }
        if error_type.contains("InvalidParameter") || error_type.contains("MissingParameter") {
            return OscError::InvalidRequest(message);
        }

        OscError::Api {
            status,
            code: code.to_string(),
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classifies_throttling() {
        let err = OscError::from_api(429, "", "RequestLimitExceeded", "");
        assert!(matches!(err, OscError::Throttled(_)));
        assert!(err.is_transient());
    }

    #[test]
    fn test_classifies_duplicate_rule() {
        let err = OscError::from_api(409, "9011", "ResourceAlreadyExists", "rule already exists");
        assert!(matches!(err, OscError::AlreadyExists(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_classifies_missing_resource() {
        let err = OscError::from_api(400, "5057", "InvalidResource.NotFound", "sg-123");
        assert!(matches!(err, OscError::NotFound(_)));
    }

    #[test]
    fn test_server_errors_are_transient() {
        let err = OscError::from_api(500, "2000", "InternalError", "");
        assert!(err.is_transient());
    }
}
