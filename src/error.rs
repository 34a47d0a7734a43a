use std::fmt;

/// Error type returned by this crate.
#[derive(Clone, Debug, thiserror::Error)]
pub enum AuthRefreshError {
    /// The hook was wired without a usable refresher.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    /// The refresher did not produce a refresh operation to await.
    #[error("refresher must return a refresh operation to await")]
    InvalidRefreshResult,
    /// The refresh operation itself failed.
    #[error("token refresh failed: {0}")]
    RefreshFailed(String),
    /// The replayed request failed at the transport level.
    #[error("retry of failed request failed: {0}")]
    RetryFailed(#[source] TransportError),
    /// The replayed request completed with a non-success status.
    #[error("retry of failed request returned status {0}")]
    RetryRejected(u16),
}

/// Broad classification of a transport failure.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TransportErrorKind {
    Connect,
    Timeout,
    Body,
    Other,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connect => "connect",
            Self::Timeout => "timeout",
            Self::Body => "body",
            Self::Other => "other",
        };
        f.write_str(name)
    }
}

/// Network or request execution error raised by a [`Transport`](crate::Transport).
///
/// `status` is `0` for failures where no HTTP exchange completed.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[error("transport error ({kind}): {message}")]
pub struct TransportError {
    kind: TransportErrorKind,
    message: String,
    status: u16,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: 0,
        }
    }

    /// A connection-level failure with no response.
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Connect, message)
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub fn kind(&self) -> TransportErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    /// Returns `true` when the failure never produced an HTTP status.
    pub fn is_network_failure(&self) -> bool {
        self.status == 0
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            TransportErrorKind::Timeout
        } else if err.is_connect() {
            TransportErrorKind::Connect
        } else if err.is_body() || err.is_decode() {
            TransportErrorKind::Body
        } else {
            TransportErrorKind::Other
        };
        let status = err.status().map_or(0, |status| status.as_u16());
        Self::new(kind, err.to_string()).with_status(status)
    }
}

#[cfg(test)]
mod tests {
    use super::{AuthRefreshError, TransportError, TransportErrorKind};

    #[test]
    fn network_failure_has_zero_status() {
        let err = TransportError::network("connection refused");
        assert_eq!(err.kind(), TransportErrorKind::Connect);
        assert!(err.is_network_failure());
        assert!(!err.with_status(502).is_network_failure());
    }

    #[test]
    fn retry_failure_keeps_transport_source() {
        let err = AuthRefreshError::RetryFailed(TransportError::network("reset"));
        let source = std::error::Error::source(&err).map(ToString::to_string);
        assert_eq!(
            source.as_deref(),
            Some("transport error (connect): reset")
        );
    }
}
