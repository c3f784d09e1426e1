//! Error types for the IMAP server engine.

use std::time::Duration;

use thiserror::Error;

use crate::parser::DecodeError;
use crate::store::StoreError;

/// Errors that can occur while serving an IMAP connection.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error during network operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS handshake or record-layer error.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// DEFLATE stream error.
    #[error("Compression error: {0}")]
    Compression(String),

    /// The client sent input the decoder cannot recover from.
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// The mailbox store failed.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// A session transition was requested from a state that does not allow it.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A transport upgrade could not be prepared or installed.
    #[error("Upgrade failed: {0}")]
    Upgrade(String),

    /// Protocol violation or unexpected data.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The client was idle for too long.
    #[error("Connection idle for {0:?}")]
    Timeout(Duration),

    /// The peer closed the connection.
    #[error("Connection closed")]
    ConnectionClosed,
}

impl Error {
    /// Returns true if the connection cannot continue after this error.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        match self {
            Self::Decode(e) => e.is_fatal(),
            Self::Store(_) | Self::InvalidState(_) => false,
            _ => true,
        }
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
