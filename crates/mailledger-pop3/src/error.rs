//! Error types for the POP3 library.

use thiserror::Error;

use crate::types::CommandResult;

/// Errors that can occur during POP3 operations.
///
/// A negative server reply is not an error: it is reported as a
/// rejected [`CommandResult`]. Errors are faults, and most of them leave the
/// session Not Connected.
#[derive(Debug, Error)]
pub enum Error {
    /// Connecting or reading the greeting failed.
    #[error("Connection error: {message}")]
    Connection {
        /// What went wrong.
        message: String,
        /// Underlying transport fault, if any.
        #[source]
        source: Option<Box<Error>>,
    },

    /// A send, receive or transaction timeout expired.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Malformed wire data, or a command issued in the wrong state.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// Another transaction is already in flight.
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// The TLS upgrade was refused or failed.
    #[error("Upgrade failed: {message}")]
    Upgrade {
        /// What went wrong.
        message: String,
        /// Underlying fault, if any.
        #[source]
        source: Option<Box<Error>>,
    },

    /// The server does not advertise a required capability.
    #[error("Server is incapable of {0}")]
    Incapable(String),

    /// Every attempted authentication path failed.
    #[error("Authentication failed: {message}")]
    Authentication {
        /// What went wrong.
        message: String,
        /// Result of the last attempted command.
        result: Option<Box<CommandResult>>,
        /// Exchange-level fault that aborted the ladder.
        #[source]
        source: Option<Box<Error>>,
    },

    /// A SASL exchange could not be carried on.
    #[error("Malformed authentication exchange: {0}")]
    MalformedExchange(String),

    /// I/O error during network operations.
    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// TLS handshake or encryption error.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// Invalid DNS name for TLS.
    #[error("Invalid DNS name: {0}")]
    InvalidDnsName(#[from] rustls::pki_types::InvalidDnsNameError),

    /// A caller-supplied argument cannot be sent.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl Error {
    /// Error raised for any command on a session that is Not Connected.
    #[must_use]
    pub fn not_connected() -> Self {
        Self::ProtocolViolation("not connected".to_string())
    }

    /// Wraps a transport fault as a connection error.
    #[must_use]
    pub fn connection(message: impl Into<String>, source: Option<Self>) -> Self {
        Self::Connection {
            message: message.into(),
            source: source.map(Box::new),
        }
    }

    /// Wraps a fault as an upgrade error.
    #[must_use]
    pub fn upgrade(message: impl Into<String>, source: Option<Self>) -> Self {
        Self::Upgrade {
            message: message.into(),
            source: source.map(Box::new),
        }
    }

    /// Returns true for a timeout.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// Returns true if the error leaves the session Not Connected.
    ///
    /// Local refusals (wrong argument, missing capability, busy session)
    /// and authentication rejections keep the connection usable.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::InvalidOperation(_)
                | Self::Incapable(_)
                | Self::InvalidArgument(_)
                | Self::Authentication { .. }
        )
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use std::error::Error as _;
    use std::io;

    use super::*;

    #[test]
    fn test_connection_error_keeps_cause() {
        let cause = Error::Transport(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
        let err = Error::connection("failed to connect to localhost:110", Some(cause));

        assert_eq!(
            err.to_string(),
            "Connection error: failed to connect to localhost:110"
        );
        assert!(err.source().unwrap().to_string().contains("refused"));
    }

    #[test]
    fn test_negative_greeting_has_no_cause() {
        let err = Error::connection("server rejected the connection", None);
        assert!(err.source().is_none());
    }

    #[test]
    fn test_not_connected() {
        assert!(matches!(
            Error::not_connected(),
            Error::ProtocolViolation(msg) if msg == "not connected"
        ));
    }

    #[test]
    fn test_is_fatal() {
        assert!(Error::Timeout("receive".into()).is_fatal());
        assert!(Error::not_connected().is_fatal());
        assert!(!Error::Incapable("TOP".into()).is_fatal());
        assert!(!Error::InvalidOperation("busy".into()).is_fatal());
    }
}
