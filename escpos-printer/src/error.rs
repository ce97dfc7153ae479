//! Error types for printer transports and sessions

use thiserror::Error;

/// Printer error taxonomy.
///
/// Transport-level failures are never surfaced raw; backends and the
/// session translate them into exactly one of these kinds. Each kind
/// carries a stable numeric code that the host bridge attaches as
/// structured error data.
#[derive(Debug, Error)]
pub enum PrinterError {
    /// Service unavailable, device open or interface claim failure
    #[error("Connect failed: {0}")]
    Connect(String),

    /// Operation attempted on a session without an open channel
    #[error("Printer not connected")]
    NotConnected,

    /// I/O failure during write (forces a disconnect, see session)
    #[error("Send failed: {0}")]
    Send(String),

    /// I/O failure during best-effort read (session stays connected)
    #[error("Read failed: {0}")]
    Read(String),

    /// OS has not granted access to the device
    #[error("Permission denied: {0}")]
    Permission(String),

    /// Address does not resolve to any attached device
    #[error("Device not found: {0}")]
    DeviceNotFound(String),
}

impl PrinterError {
    /// Stable numeric code for programmatic handling by the host bridge.
    pub fn code(&self) -> u8 {
        match self {
            PrinterError::Connect(_) => 1,
            PrinterError::NotConnected => 2,
            PrinterError::Send(_) => 3,
            PrinterError::Read(_) => 4,
            PrinterError::Permission(_) => 5,
            PrinterError::DeviceNotFound(_) => 6,
        }
    }
}

/// Result type for printer operations
pub type PrinterResult<T> = Result<T, PrinterError>;
