//! Bridge-level errors: handle lookup and lane lifecycle rejections.
//!
//! Printer failures keep their own taxonomy (`PrinterError`) and pass
//! through unchanged so the host can attach the numeric error code.

use crate::registry::SessionHandle;
use escpos_printer::PrinterError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    /// No session exists for the handle (never created, or disposed)
    #[error("Printer with handle {0} not found")]
    SessionNotFound(SessionHandle),

    /// The handle's lane no longer accepts work
    #[error("Printer lane is shutting down")]
    LaneClosed,

    /// The operation was queued but discarded by lane teardown
    #[error("Operation abandoned during teardown")]
    Abandoned,

    /// A pending permission request was superseded or torn down
    #[error("Permission request superseded or abandoned")]
    PermissionAbandoned,

    #[error(transparent)]
    Printer(#[from] PrinterError),
}

pub type BridgeResult<T> = Result<T, BridgeError>;
