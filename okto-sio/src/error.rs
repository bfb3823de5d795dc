//! Error types for the SIO subsystem.

use thiserror::Error;

/// Errors surfaced by the SIO subsystem.
#[derive(Error, Debug)]
pub enum SioError {
    #[error("Invalid drive index: {0}")]
    InvalidDrive(u8),

    #[error("Drive {0} is not mounted")]
    NotMounted(u8),

    #[error("Drive {0} is mounted read-only")]
    ReadOnly(u8),

    #[error("Not an ATR image: {0}")]
    BadImage(String),

    #[error("Sector {0} out of range")]
    BadSector(u16),

    #[error("Cannot resolve peer address: {0}")]
    Resolve(String),

    #[error("No backend configured for mode")]
    NotConfigured,

    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] netsio_protocol::ProtocolError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for SIO operations.
pub type SioResult<T> = Result<T, SioError>;
