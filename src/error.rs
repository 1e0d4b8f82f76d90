//! Error types for the NMEA broadcaster

use std::net::SocketAddr;
use std::time::Duration;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Broadcaster error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A sensor value is non-finite or outside its physical range
    #[error("Invalid reading: {quantity} = {value}")]
    InvalidReading {
        /// Name of the offending quantity
        quantity: &'static str,
        /// The rejected value
        value: f64,
    },

    /// Sentence body contains a character that would break NMEA framing
    #[error("Malformed payload: {0:?}")]
    MalformedPayload(String),

    /// Inbound sentence carries a checksum that does not match its payload
    #[error("Checksum error: expected {expected:02X}, got {actual:02X}")]
    ChecksumMismatch {
        /// Checksum computed over the payload
        expected: u8,
        /// Checksum found on the wire
        actual: u8,
    },

    /// No peer connected before the accept timeout elapsed
    #[error("No peer connected to {addr} within {timeout:?}")]
    NoPeerConnected {
        /// Local address that was listening
        addr: SocketAddr,
        /// How long we waited
        timeout: Duration,
    },

    /// Sending a sentence failed mid-cycle
    #[error("Transport write failure: {0}")]
    TransportWriteFailure(#[source] std::io::Error),

    /// Sending a sentence did not complete within the write timeout
    #[error("Transport write timed out after {0:?}")]
    WriteTimeout(Duration),

    /// I/O error while establishing the transport
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The reading source failed to deliver a value
    #[error("Reading source error: {0:#}")]
    Source(#[from] anyhow::Error),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Errors that reject the current cycle but leave the session running.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::InvalidReading { .. } | Error::Source(_))
    }

    /// Errors raised by the transport while a session is running.
    pub fn is_write_failure(&self) -> bool {
        matches!(
            self,
            Error::TransportWriteFailure(_) | Error::WriteTimeout(_)
        )
    }
}

impl From<toml_edit::de::Error> for Error {
    fn from(e: toml_edit::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}
