use thiserror::Error;

/// Errors surfaced by the session layer.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("identity must not be empty")]
    InvalidIdentity,

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Failures reported synchronously by a peer transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport is not registered")]
    NotRegistered,

    #[error("unknown channel: {0}")]
    UnknownChannel(String),

    #[error("channel closed: {0}")]
    ChannelClosed(String),

    #[error("transport shut down")]
    Shutdown,
}

/// Failures while reading a file for upload.
#[derive(Error, Debug)]
pub enum MediaError {
    #[error("failed to read media: {0}")]
    Io(#[from] std::io::Error),

    #[error("media truncated: read {read} of {expected} bytes")]
    Truncated { read: u64, expected: u64 },
}
