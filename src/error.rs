use std::time::Duration;

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors surfaced by the reconciler and everything beneath it.
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to load cluster configuration: {0}")]
    Config(String),

    #[error("kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("{operation} timed out after {timeout:?}")]
    Timeout { operation: String, timeout: Duration },

    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("handler panicked: {0}")]
    Panic(String),

    #[error("{} error(s) reconciling namespace {namespace}: {}", errors.len(), join_errors(errors))]
    Aggregate { namespace: String, errors: Vec<Error> },
}

/// Recoverable policy problems. They are logged and the reconcile carries on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    #[error("unknown update mode {value:?} on {source_name}, falling back to Off")]
    UnknownUpdateMode { value: String, source_name: String },

    #[error("VPA name {name} is already claimed by {winner}, skipping {loser}")]
    NameCollision { name: String, winner: String, loser: String },

    #[error("owner chain of pod {pod} is deeper than {depth} levels")]
    OwnerDepthExceeded { pod: String, depth: usize },
}

impl Error {
    /// Worth retrying through the work queue.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Kube(kube::Error::Api(resp)) => {
                resp.code == 409 || resp.code == 429 || resp.code >= 500
            }
            Error::Kube(_) | Error::Timeout { .. } | Error::Panic(_) => true,
            Error::Aggregate { errors, .. } => errors.iter().any(Error::is_transient),
            Error::Config(_) | Error::Policy(_) | Error::InvariantViolation(_) => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Kube(kube::Error::Api(resp)) if resp.code == 404)
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Error::Kube(kube::Error::Api(resp)) if resp.code == 409 && resp.reason == "AlreadyExists")
    }
}

fn join_errors(errors: &[Error]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Build an API error the way the apiserver reports it.
pub fn api_error(code: u16, reason: &str, message: impl Into<String>) -> Error {
    Error::Kube(kube::Error::Api(kube::error::ErrorResponse {
        status: "Failure".to_string(),
        message: message.into(),
        reason: reason.to_string(),
        code,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(api_error(500, "InternalError", "boom").is_transient());
        assert!(api_error(409, "Conflict", "stale").is_transient());
        assert!(api_error(429, "TooManyRequests", "slow down").is_transient());
        assert!(!api_error(403, "Forbidden", "rbac").is_transient());
        assert!(Error::Timeout { operation: "list pods".into(), timeout: Duration::from_secs(30) }.is_transient());
        assert!(!Error::Config("no kubeconfig".into()).is_transient());
        assert!(!Error::InvariantViolation("no targetRef".into()).is_transient());
    }

    #[test]
    fn test_not_found_and_exists() {
        assert!(api_error(404, "NotFound", "gone").is_not_found());
        assert!(!api_error(500, "InternalError", "boom").is_not_found());
        assert!(api_error(409, "AlreadyExists", "dup").is_already_exists());
        assert!(!api_error(409, "Conflict", "stale").is_already_exists());
    }

    #[test]
    fn test_aggregate_message() {
        let err = Error::Aggregate {
            namespace: "testing".to_string(),
            errors: vec![
                api_error(500, "InternalError", "create failed"),
                api_error(403, "Forbidden", "delete failed"),
            ],
        };
        let msg = err.to_string();
        assert!(msg.starts_with("2 error(s) reconciling namespace testing"));
        assert!(msg.contains("create failed"));
        assert!(msg.contains("delete failed"));
        assert!(err.is_transient());
    }
}
