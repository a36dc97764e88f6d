//! Error types for the SMTP ingest layer.

use std::io;

use thiserror::Error;

/// Errors that can occur while a session is being served.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Connection-level I/O failure.
    #[error("Connection error: {0}")]
    Connection(#[from] io::Error),

    /// TLS negotiation failed during STARTTLS.
    #[error("TLS negotiation failed: {0}")]
    Tls(io::Error),

    /// The peer went silent past the command timeout.
    #[error("Session timed out after {0} seconds")]
    Timeout(u64),
}

/// Errors that can occur in the listener.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// Failed to bind to the socket address.
    #[error("Failed to bind to {address}: {source}")]
    BindFailed {
        address: String,
        #[source]
        source: io::Error,
    },

    /// Failed to accept an incoming connection.
    #[error("Failed to accept connection: {0}")]
    AcceptFailed(#[from] io::Error),

    /// TLS certificate material could not be loaded.
    #[error("Failed to load TLS material from {path}: {reason}")]
    TlsSetup { path: String, reason: String },
}

#[cfg(test)]
mod tests {
    use std::error::Error as StdError;

    use super::*;

    #[test]
    fn error_display_and_source_chain() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let bind_err = ListenerError::BindFailed {
            address: "0.0.0.0:25".to_string(),
            source: io_err,
        };

        assert!(bind_err.source().is_some());
        assert_eq!(
            bind_err.to_string(),
            "Failed to bind to 0.0.0.0:25: access denied"
        );

        let timeout = SessionError::Timeout(300);
        assert_eq!(timeout.to_string(), "Session timed out after 300 seconds");
    }
}
