//! Pool error types.

use std::fmt;

use thiserror::Error;

/// Boxed error returned by [`Connector`](crate::Connector) and
/// [`Prober`](crate::Prober) implementations.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The pool operation during which an error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum PoolOperation {
    /// Initial fill of an empty pool.
    Fill,
    /// Creating connections to bring the pool back up to capacity.
    TopUp,
    /// Scanning free connections or creating a connection for a checkout miss.
    Checkout,
    /// Shutting the pool down.
    Close,
}

impl fmt::Display for PoolOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Fill => "initial fill",
            Self::TopUp => "top-up",
            Self::Checkout => "checkout",
            Self::Close => "close",
        };
        f.write_str(name)
    }
}

/// Errors that can occur during pool operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PoolError {
    /// The connector could not open a connection.
    #[error("failed to create connection during {operation}: {source}")]
    ConnectionCreation {
        /// Operation that triggered the creation.
        operation: PoolOperation,
        /// Error reported by the connector.
        #[source]
        source: BoxError,
    },

    /// A freshly opened connection was rejected by the prober.
    #[error("connection validation failed during {operation}: {source}")]
    ValidationFailed {
        /// Operation that triggered the validation.
        operation: PoolOperation,
        /// Error reported by the prober.
        #[source]
        source: BoxError,
    },

    /// The connector could not close a discarded connection.
    ///
    /// The connection has already been removed from the pool when this is
    /// returned.
    #[error("error while closing connection during {operation}: {source}")]
    ConnectionClose {
        /// Operation that triggered the discard.
        operation: PoolOperation,
        /// Error reported by the connector.
        #[source]
        source: BoxError,
    },

    /// Pool configuration error.
    #[error("pool configuration error: {0}")]
    Configuration(String),

    /// The destination connection string could not be parsed.
    #[error("invalid destination: {0}")]
    InvalidDestination(String),

    /// Pool is closed.
    #[error("pool is closed")]
    PoolClosed,
}

impl PoolError {
    /// Check if this error is transient and the operation may succeed if
    /// the caller tries again.
    ///
    /// The pool never retries on its own.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ConnectionCreation { .. }
                | Self::ValidationFailed { .. }
                | Self::ConnectionClose { .. }
        )
    }

    /// The operation that caused this error, if it came from a collaborator.
    #[must_use]
    pub fn operation(&self) -> Option<PoolOperation> {
        match self {
            Self::ConnectionCreation { operation, .. }
            | Self::ValidationFailed { operation, .. }
            | Self::ConnectionClose { operation, .. } => Some(*operation),
            _ => None,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_error_message_names_operation() {
        let err = PoolError::ConnectionCreation {
            operation: PoolOperation::TopUp,
            source: "connection refused".into(),
        };
        assert_eq!(
            err.to_string(),
            "failed to create connection during top-up: connection refused"
        );
        assert_eq!(err.operation(), Some(PoolOperation::TopUp));
    }

    #[test]
    fn test_error_source_is_preserved() {
        use std::error::Error as _;

        let err = PoolError::ConnectionClose {
            operation: PoolOperation::Checkout,
            source: "broken pipe".into(),
        };
        assert_eq!(err.source().unwrap().to_string(), "broken pipe");
    }

    #[test]
    fn test_transient_classification() {
        let creation = PoolError::ConnectionCreation {
            operation: PoolOperation::Fill,
            source: "timeout".into(),
        };
        assert!(creation.is_transient());
        assert!(!PoolError::PoolClosed.is_transient());
        assert!(!PoolError::Configuration("capacity".into()).is_transient());
        assert_eq!(PoolError::PoolClosed.operation(), None);
    }
}
