//! Error types for blobsync

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Blob Store Errors ===
    #[error("{0} does not appear to be a valid blob key")]
    InvalidKey(String),

    #[error("Key already exists: {0}")]
    KeyAlreadyExists(String),

    #[error("Key not found: {0}")]
    KeyNotFound(String),

    #[error("{caller} is not allowed to {access} {key}")]
    Unauthorized {
        caller: String,
        key: String,
        access: String,
    },

    #[error("Corrupted data: {0}")]
    Corrupted(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    // === Cluster Errors ===
    #[error("Transport failure talking to {peer}: {reason}")]
    Transport { peer: String, reason: String },

    #[error("Coordination service unavailable: {0}")]
    CoordinationUnavailable(String),

    #[error("No coordination node at {0}")]
    NoNode(String),

    #[error("Not leader: current leader is {0}")]
    NotLeader(String),

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // === Generic ===
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// A key vanished underneath us (usually a concurrent delete).
    pub fn is_key_not_found(&self) -> bool {
        matches!(self, Error::KeyNotFound(_))
    }

    /// Errors that make the rest of a reconciliation pass pointless.
    pub fn is_pass_fatal(&self) -> bool {
        matches!(self, Error::CoordinationUnavailable(_))
    }

    /// Is this a retryable error?
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Transport { .. } | Error::CoordinationUnavailable(_) | Error::NotLeader(_)
        )
    }

    /// Convert to HTTP status code
    pub fn to_http_status(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Error::InvalidKey(_) | Error::InvalidConfig(_) => StatusCode::BAD_REQUEST,
            Error::KeyNotFound(_) | Error::NoNode(_) => StatusCode::NOT_FOUND,
            Error::KeyAlreadyExists(_) => StatusCode::CONFLICT,
            Error::Unauthorized { .. } => StatusCode::FORBIDDEN,
            Error::NotLeader(_) => StatusCode::MISDIRECTED_REQUEST,
            Error::Unsupported(_) => StatusCode::NOT_IMPLEMENTED,
            Error::Transport { .. } => StatusCode::BAD_GATEWAY,
            Error::CoordinationUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        Error::Other(e.to_string())
    }
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::InvalidConfig(e.to_string())
    }
}

impl From<etcd_client::Error> for Error {
    fn from(e: etcd_client::Error) -> Self {
        Error::CoordinationUnavailable(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_coordination_failures_abort_a_pass() {
        assert!(Error::CoordinationUnavailable("session expired".into()).is_pass_fatal());
        assert!(!Error::KeyNotFound("k".into()).is_pass_fatal());
        assert!(!Error::Transport {
            peer: "nimbus-1:6627".into(),
            reason: "timeout".into()
        }
        .is_pass_fatal());
    }

    #[test]
    fn test_retryable_errors() {
        assert!(Error::Transport {
            peer: "nimbus-1:6627".into(),
            reason: "connection refused".into()
        }
        .is_retryable());
        assert!(Error::CoordinationUnavailable("lost session".into()).is_retryable());
        assert!(Error::NotLeader("nimbus-1:6627".into()).is_retryable());
        assert!(!Error::InvalidKey("..".into()).is_retryable());
        assert!(!Error::KeyAlreadyExists("k".into()).is_retryable());
    }

    #[test]
    fn test_http_status_mapping() {
        use axum::http::StatusCode;
        assert_eq!(
            Error::KeyNotFound("k".into()).to_http_status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            Error::KeyAlreadyExists("k".into()).to_http_status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            Error::InvalidKey("../x".into()).to_http_status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            Error::Unauthorized {
                caller: "anonymous".into(),
                key: "k".into(),
                access: "write".into()
            }
            .to_http_status(),
            StatusCode::FORBIDDEN
        );
    }
}
