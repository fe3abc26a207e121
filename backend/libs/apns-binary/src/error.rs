//! Error types for the binary APNs interface
//!
//! One enum per concern: credential loading, the encrypted channel,
//! payload encoding and frame packing.

use std::io;
use thiserror::Error;

/// Errors raised while loading a certificate / private key pair
#[derive(Error, Debug)]
pub enum CredentialsError {
    /// Certificate text is missing its PEM markers or cannot be parsed
    #[error("Invalid certificate: {0}")]
    InvalidCertificate(String),

    /// Private key text is missing its PEM markers or cannot be parsed
    #[error("Invalid private key: {0}")]
    InvalidPrivateKey(String),

    /// The key is encrypted and no passphrase was configured
    #[error("Private key is encrypted but no passphrase was provided")]
    PassphraseRequired,

    /// The configured passphrase does not decrypt the key
    #[error("The passphrase for the private key appears to be invalid")]
    BadPassphrase,

    /// The private key does not belong to the leaf certificate
    #[error("Private key does not match the certificate")]
    KeyMismatch,

    /// Legacy OpenSSL `Proc-Type: 4,ENCRYPTED` keys and other schemes we cannot decrypt
    #[error("Unsupported private key encryption: {0}")]
    UnsupportedEncryption(String),
}

/// Errors raised by a push or feedback channel
#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("Failed to connect to {endpoint}: {source}")]
    Connection {
        endpoint: String,
        #[source]
        source: io::Error,
    },

    #[error("TLS handshake with {endpoint} failed: {reason}")]
    Handshake { endpoint: String, reason: String },

    /// The peer dropped the connection while we were writing.
    ///
    /// APNs closes the socket after it receives a frame it rejects, so this is
    /// recoverable by reconnecting.
    #[error("Peer dropped the connection during write: {0}")]
    TransientWrite(#[source] io::Error),

    #[error("Write failed: {0}")]
    Write(#[source] io::Error),

    #[error("Read failed: {0}")]
    Read(#[source] io::Error),

    #[error("Channel is closed")]
    Closed,
}

impl ChannelError {
    /// True when the failure is a dropped connection mid-write
    pub fn is_transient(&self) -> bool {
        matches!(self, ChannelError::TransientWrite(_))
    }
}

impl From<CredentialsError> for ChannelError {
    fn from(err: CredentialsError) -> Self {
        ChannelError::InvalidCredentials(err.to_string())
    }
}

/// Errors raised while building the JSON payload
#[derive(Error, Debug)]
pub enum PayloadError {
    #[error("The notification payload is {size} bytes, maximum is {max} bytes")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("Extra payload key '{0}' is reserved")]
    ReservedKey(String),

    #[error("Extra payload must be a JSON object")]
    InvalidExtra,

    #[error("Failed to serialize payload: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Errors raised while packing or unpacking wire frames and feedback records
#[derive(Error, Debug, PartialEq, Eq)]
pub enum FrameError {
    #[error("Invalid device token '{0}': expected 64 hexadecimal characters")]
    InvalidToken(String),

    #[error("The notification payload is {size} bytes, maximum is {max} bytes")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("Payload is empty")]
    EmptyPayload,

    #[error("Frame truncated: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("Unexpected command byte {0}")]
    UnexpectedCommand(u8),

    #[error("Unexpected token length {0}")]
    UnexpectedTokenLength(u16),
}

pub type ChannelResult<T> = Result<T, ChannelError>;
pub type PayloadResult<T> = Result<T, PayloadError>;
pub type FrameResult<T> = Result<T, FrameError>;
