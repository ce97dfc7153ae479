//! Transport trait abstracting Bluetooth RFCOMM vs USB bulk communication.

use crate::error::PrinterResult;
use std::io;

#[cfg(unix)]
pub mod bluetooth;
pub mod usb;

/// Abstraction over the physical byte channel to a printer.
///
/// Both Bluetooth (RFCOMM socket, raw passthrough) and USB (bulk
/// endpoints on a claimed interface) implement this trait. A backend
/// is constructed from an address string and stays closed until
/// `open()` resolves the address to a device and sets up the channel.
pub trait Transport: Send {
    /// Resolve the address and open a duplex byte channel.
    ///
    /// On any failure mid-setup the backend must release every
    /// partially-acquired resource and remain closed.
    fn open(&mut self) -> PrinterResult<()>;

    /// Tear down the channel and release device resources.
    ///
    /// Best-effort and idempotent: errors during teardown are logged
    /// and swallowed, and closing a closed transport is a no-op.
    fn close(&mut self);

    /// Whether the channel and the underlying device handle are open.
    fn is_open(&self) -> bool;

    /// Write the whole buffer to the device and flush.
    fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Best-effort read of already-buffered bytes, without blocking.
    ///
    /// A zero-length result is valid and common. Backends without a
    /// readable endpoint always return an empty buffer.
    fn read_available(&mut self) -> io::Result<Vec<u8>>;
}
