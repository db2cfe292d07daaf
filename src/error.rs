//! Error types for the LGTM client
//!
//! This module defines the error taxonomy used throughout the crate,
//! using `thiserror` for ergonomic error handling.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Failure of a single request/response call against the agent backend
///
/// Kept `Clone` so a failure can be shared between coalesced cache readers
/// and stored as a cached error marker.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The request never produced a response (DNS, connect, reset)
    #[error("network failure: {0}")]
    Network(String),

    /// The request exceeded the configured request timeout
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The backend answered with a non-2xx status
    #[error("backend returned HTTP {status}: {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body, possibly empty
        body: String,
    },

    /// The response body was not the JSON shape we expected
    #[error("malformed response body: {0}")]
    Decode(String),
}

impl TransportError {
    /// Build a transport error from a `reqwest` failure
    pub fn from_reqwest(err: &reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            Self::Timeout(timeout)
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            Self::Status {
                status: status.as_u16(),
                body: String::new(),
            }
        } else {
            Self::Network(err.to_string())
        }
    }

    /// True when the backend reported the resource does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Status { status: 404, .. })
    }

    /// True when no response was received at all
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout(_))
    }

    /// True when repeating the same call could plausibly succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout(_) => true,
            Self::Status { status, .. } => *status >= 500 || *status == 429,
            Self::Decode(_) => false,
        }
    }
}

/// Main error type for LGTM client operations
#[derive(Error, Debug)]
pub enum LgtmError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Request/response call failed
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Server-push channel failed or the stream trigger request failed
    #[error("Stream error: {0}")]
    Stream(String),

    /// Fetching the current session failed; the session must be recreated
    #[error("Session fetch failed for {session_id}: {message}")]
    SessionFetch {
        /// Session that could not be fetched
        session_id: String,
        /// Underlying failure
        message: String,
        /// Transport failure behind the fetch, when it was one
        transport: Option<TransportError>,
    },

    /// A turn submission was refused by the lifecycle guard
    #[error("Submission rejected: {0}")]
    SubmissionRejected(String),

    /// An operation needed a session but none is held
    #[error("No active session")]
    NoSession,

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// URL parsing errors
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),
}

impl LgtmError {
    /// The transport failure behind this error, when there is one
    pub fn transport(&self) -> Option<&TransportError> {
        match self {
            Self::Transport(t) => Some(t),
            Self::SessionFetch { transport, .. } => transport.as_ref(),
            _ => None,
        }
    }
}

/// Result type alias for LGTM client operations
///
/// This is a convenience alias that uses `anyhow::Error` as the error type,
/// allowing for rich error context and easy error propagation.
pub type Result<T> = anyhow::Result<T>;

/// Error shared between every reader of one coalesced fetch
pub type SharedError = Arc<anyhow::Error>;

/// Turn a shared error back into an owned one
///
/// The original error is recovered when this was the last reference.
/// Otherwise a transport failure is carried over as a typed
/// [`TransportError`], and anything else is rendered into a new error.
pub fn unshare(err: SharedError) -> anyhow::Error {
    match Arc::try_unwrap(err) {
        Ok(owned) => owned,
        Err(shared) => match transport_error(&shared) {
            Some(transport) => LgtmError::Transport(transport.clone()).into(),
            None => anyhow::anyhow!("{:#}", shared),
        },
    }
}

/// Find the transport failure inside an `anyhow` error chain
///
/// Accepts a [`SharedError`] through deref, so cached failures classify the
/// same way as fresh ones.
pub fn transport_error(err: &anyhow::Error) -> Option<&TransportError> {
    err.chain().find_map(|cause| {
        cause
            .downcast_ref::<LgtmError>()
            .and_then(LgtmError::transport)
            .or_else(|| cause.downcast_ref::<TransportError>())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let error = LgtmError::Config("invalid format".to_string());
        assert_eq!(error.to_string(), "Configuration error: invalid format");
    }

    #[test]
    fn test_status_error_display() {
        let error = TransportError::Status {
            status: 502,
            body: "bad gateway".to_string(),
        };
        assert_eq!(error.to_string(), "backend returned HTTP 502: bad gateway");
    }

    #[test]
    fn test_not_found_is_distinguishable_from_network_failure() {
        let not_found = TransportError::Status {
            status: 404,
            body: String::new(),
        };
        let network = TransportError::Network("connection refused".to_string());

        assert!(not_found.is_not_found());
        assert!(!not_found.is_network());
        assert!(!not_found.is_retryable());

        assert!(network.is_network());
        assert!(!network.is_not_found());
        assert!(network.is_retryable());
    }

    #[test]
    fn test_timeout_is_retryable() {
        let error = TransportError::Timeout(Duration::from_secs(30));
        assert!(error.is_network());
        assert!(error.is_retryable());
        assert!(error.to_string().contains("30s"));
    }

    #[test]
    fn test_server_errors_are_retryable_client_errors_are_not() {
        let s500 = TransportError::Status {
            status: 500,
            body: String::new(),
        };
        let s400 = TransportError::Status {
            status: 400,
            body: String::new(),
        };
        assert!(s500.is_retryable());
        assert!(!s400.is_retryable());
    }

    #[test]
    fn test_transport_error_found_through_anyhow_chain() {
        let err = anyhow::anyhow!(LgtmError::Transport(TransportError::Network(
            "reset".to_string()
        )))
        .context("listing apps");
        let found = transport_error(&err).expect("transport error in chain");
        assert!(found.is_network());
    }

    #[test]
    fn test_transport_error_absent_for_other_errors() {
        let err = anyhow::anyhow!(LgtmError::NoSession);
        assert!(transport_error(&err).is_none());
    }

    #[test]
    fn test_unshare_recovers_sole_owner() {
        let shared: SharedError = Arc::new(LgtmError::NoSession.into());
        let owned = unshare(shared);
        assert!(matches!(
            owned.downcast_ref::<LgtmError>(),
            Some(LgtmError::NoSession)
        ));
    }

    #[test]
    fn test_unshare_renders_when_still_shared() {
        let shared: SharedError = Arc::new(anyhow::anyhow!("inner").context("outer"));
        let _other = Arc::clone(&shared);
        assert_eq!(unshare(shared).to_string(), "outer: inner");
    }

    #[test]
    fn test_unshare_keeps_transport_error_when_still_shared() {
        let shared: SharedError = Arc::new(
            LgtmError::Transport(TransportError::Status {
                status: 404,
                body: "Session not found".to_string(),
            })
            .into(),
        );
        let marker = Arc::clone(&shared);

        assert!(transport_error(&marker).unwrap().is_not_found());
        let owned = unshare(shared);
        let transport = transport_error(&owned).expect("typed transport error");
        assert!(transport.is_not_found());
        assert!(!transport.is_network());
        assert_eq!(
            owned.to_string(),
            "Transport error: backend returned HTTP 404: Session not found"
        );
    }

    #[test]
    fn test_session_fetch_error_display() {
        let error = LgtmError::SessionFetch {
            session_id: "s-1".to_string(),
            message: "HTTP 404".to_string(),
            transport: None,
        };
        assert_eq!(error.to_string(), "Session fetch failed for s-1: HTTP 404");
        assert!(error.transport().is_none());
    }

    #[test]
    fn test_session_fetch_exposes_transport_failure() {
        let err = anyhow::Error::from(LgtmError::SessionFetch {
            session_id: "s-1".to_string(),
            message: "backend returned HTTP 404: ".to_string(),
            transport: Some(TransportError::Status {
                status: 404,
                body: String::new(),
            }),
        });
        assert!(transport_error(&err).unwrap().is_not_found());
    }

    #[test]
    fn test_json_error_conversion() {
        let json_error = serde_json::from_str::<serde_json::Value>("{invalid json}").unwrap_err();
        let error: LgtmError = json_error.into();
        assert!(matches!(error, LgtmError::Serialization(_)));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<LgtmError>();
        assert_send_sync::<TransportError>();
    }
}
