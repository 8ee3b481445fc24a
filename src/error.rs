/// Unified error handling for tejido
///
/// Every strategy, the topology manager and the health supervisor report
/// failures through [`TejidoError`]. The retry envelope relies on
/// [`TejidoError::is_connection_error`] to decide between demote-and-retry
/// and surfacing the error immediately.

use crate::core::Endpoint;
use std::fmt;
use std::io;
use thiserror::Error;

/// Main error type for tejido operations
#[derive(Debug, Error)]
pub enum TejidoError {
    /// Missing or malformed configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Dispatch was attempted while the healthy set was empty
    #[error("No healthy backend available for client {client}")]
    NoHealthyBackend { client: String },

    /// I/O failure talking to a backend
    #[error("Connection error on {endpoint}: {source}")]
    Connection {
        endpoint: Endpoint,
        #[source]
        source: io::Error,
    },

    /// RESP framing failure; the stream is unusable afterwards
    #[error("Protocol error on {endpoint}: {message}")]
    Protocol { endpoint: Endpoint, message: String },

    /// A backend call exceeded the socket timeout
    #[error("Operation timed out on {endpoint}: {operation}")]
    Timeout { endpoint: Endpoint, operation: String },

    /// Backend returned an error or an unexpected reply
    #[error("Operation error: {message}")]
    Operation { message: String },

    /// The retry envelope gave up
    #[error("Retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: usize,
        #[source]
        last: Box<TejidoError>,
    },

    /// Encode/decode failure in the value codec
    #[error("Codec error: {message}")]
    Codec { message: String },

    /// Operation is not available on this strategy
    #[error("Unsupported operation: {operation}")]
    Unsupported { operation: String },

    /// Write attempted on a read-only client
    #[error("Write not allowed on read-only client: {operation}")]
    WriteNotAllowed { operation: String },

    /// Write-all replicas disagree
    #[error("Replica divergence: {message}")]
    ReplicaDivergence { message: String },

    /// Illegal lifecycle transition
    #[error("Lifecycle error: {message}")]
    Lifecycle { message: String },
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Missing required option: {0}")]
    Missing(String),

    #[error("Invalid value for {key}: {message}")]
    Invalid { key: String, message: String },
}

impl ConfigError {
    pub fn invalid<K: Into<String>, M: Into<String>>(key: K, message: M) -> Self {
        ConfigError::Invalid {
            key: key.into(),
            message: message.into(),
        }
    }
}

/// Result type alias for tejido operations
pub type TejidoResult<T> = Result<T, TejidoError>;

/// Convenience methods for creating specific error types
impl TejidoError {
    /// Create a connection error from an I/O failure
    pub fn connection(endpoint: &Endpoint, source: io::Error) -> Self {
        TejidoError::Connection {
            endpoint: endpoint.clone(),
            source,
        }
    }

    /// Create a protocol error
    pub fn protocol<S: Into<String>>(endpoint: &Endpoint, message: S) -> Self {
        TejidoError::Protocol {
            endpoint: endpoint.clone(),
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout<S: Into<String>>(endpoint: &Endpoint, operation: S) -> Self {
        TejidoError::Timeout {
            endpoint: endpoint.clone(),
            operation: operation.into(),
        }
    }

    /// Create an operation error
    pub fn operation<S: Into<String>>(message: S) -> Self {
        TejidoError::Operation {
            message: message.into(),
        }
    }

    /// Create a codec error
    pub fn codec<S: Into<String>>(message: S) -> Self {
        TejidoError::Codec {
            message: message.into(),
        }
    }

    /// Create an unsupported-operation error
    pub fn unsupported<S: Into<String>>(operation: S) -> Self {
        TejidoError::Unsupported {
            operation: operation.into(),
        }
    }

    /// Create a write-not-allowed error
    pub fn write_not_allowed<S: Into<String>>(operation: S) -> Self {
        TejidoError::WriteNotAllowed {
            operation: operation.into(),
        }
    }

    /// Create a replica divergence error
    pub fn divergence<S: Into<String>>(message: S) -> Self {
        TejidoError::ReplicaDivergence {
            message: message.into(),
        }
    }

    /// Create a lifecycle error
    pub fn lifecycle<S: Into<String>>(message: S) -> Self {
        TejidoError::Lifecycle {
            message: message.into(),
        }
    }

    /// Create a no-healthy-backend error
    pub fn no_healthy_backend<S: Into<String>>(client: S) -> Self {
        TejidoError::NoHealthyBackend {
            client: client.into(),
        }
    }

    /// Whether this error means the backend link itself failed.
    ///
    /// Connection-class errors demote the endpoint they happened on and are
    /// eligible for retry; everything else surfaces immediately.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            TejidoError::Connection { .. }
                | TejidoError::Protocol { .. }
                | TejidoError::Timeout { .. }
        )
    }

    /// The endpoint a connection-class error happened on
    pub fn endpoint(&self) -> Option<&Endpoint> {
        match self {
            TejidoError::Connection { endpoint, .. }
            | TejidoError::Protocol { endpoint, .. }
            | TejidoError::Timeout { endpoint, .. } => Some(endpoint),
            _ => None,
        }
    }

    /// Check if this error is recoverable (can retry)
    pub fn is_recoverable(&self) -> bool {
        self.is_connection_error() || matches!(self, TejidoError::NoHealthyBackend { .. })
    }

    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            TejidoError::Config(_) => ErrorSeverity::Critical,
            TejidoError::Lifecycle { .. } => ErrorSeverity::Critical,
            TejidoError::ReplicaDivergence { .. } => ErrorSeverity::Critical,
            TejidoError::Connection { .. } => ErrorSeverity::Warning,
            TejidoError::Protocol { .. } => ErrorSeverity::Warning,
            TejidoError::Timeout { .. } => ErrorSeverity::Warning,
            TejidoError::Unsupported { .. } => ErrorSeverity::Info,
            TejidoError::WriteNotAllowed { .. } => ErrorSeverity::Info,
            _ => ErrorSeverity::Error,
        }
    }
}

/// Error severity levels for logging and monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Critical errors that require immediate attention
    Critical,
    /// Errors that affect functionality but don't crash the system
    Error,
    /// Warnings about potential issues
    Warning,
    /// Informational messages about recoverable issues
    Info,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorSeverity::Critical => write!(f, "CRITICAL"),
            ErrorSeverity::Error => write!(f, "ERROR"),
            ErrorSeverity::Warning => write!(f, "WARNING"),
            ErrorSeverity::Info => write!(f, "INFO"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint() -> Endpoint {
        Endpoint::parse("127.0.0.1:6379").unwrap()
    }

    #[test]
    fn test_error_creation() {
        let error = TejidoError::operation("WRONGTYPE");
        assert!(matches!(error, TejidoError::Operation { .. }));
        assert_eq!(error.to_string(), "Operation error: WRONGTYPE");
    }

    #[test]
    fn test_connection_classification() {
        let refused = TejidoError::connection(
            &endpoint(),
            io::Error::new(io::ErrorKind::ConnectionRefused, "refused"),
        );
        assert!(refused.is_connection_error());
        assert_eq!(refused.endpoint(), Some(&endpoint()));

        let timeout = TejidoError::timeout(&endpoint(), "GET");
        assert!(timeout.is_connection_error());

        let op = TejidoError::operation("ERR");
        assert!(!op.is_connection_error());
        assert!(op.endpoint().is_none());

        let none = TejidoError::no_healthy_backend("app");
        assert!(!none.is_connection_error());
        assert!(none.is_recoverable());
    }

    #[test]
    fn test_error_severity() {
        let config_error = TejidoError::Config(ConfigError::Missing("server.list".to_string()));
        assert_eq!(config_error.severity(), ErrorSeverity::Critical);

        let network_error = TejidoError::connection(
            &endpoint(),
            io::Error::new(io::ErrorKind::ConnectionRefused, "test"),
        );
        assert_eq!(network_error.severity(), ErrorSeverity::Warning);
        assert_eq!(ErrorSeverity::Warning.to_string(), "WARNING");
    }

    #[test]
    fn test_retries_exhausted_keeps_last_error() {
        let last = TejidoError::timeout(&endpoint(), "GET");
        let error = TejidoError::RetriesExhausted {
            attempts: 3,
            last: Box::new(last),
        };
        assert!(!error.is_connection_error());
        assert!(error.to_string().contains("after 3 attempts"));
    }

    #[test]
    fn test_config_error_message() {
        let error = ConfigError::invalid("server.retry.count", "not a number");
        assert_eq!(
            error.to_string(),
            "Invalid value for server.retry.count: not a number"
        );
    }
}
