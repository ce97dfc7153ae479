//! Printer session state machine over a transport backend.

use crate::error::{PrinterError, PrinterResult};
use crate::transport::Transport;
use std::time::Duration;
use tracing::{debug, warn};

/// Bytes of payload per millisecond of printer drain time.
const DRAIN_BYTES_PER_MS: usize = 16;

/// One printer connection with a uniform error taxonomy regardless of
/// backend.
///
/// The session owns its transport exclusively; callers drive it from a
/// single worker so operations never overlap. State is simple:
/// disconnected until `connect()` succeeds, disconnected again after
/// `disconnect()` or a failed `send()`.
pub struct PrinterSession {
    transport: Box<dyn Transport>,
}

impl PrinterSession {
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Open the transport channel.
    ///
    /// Connecting an already-connected session is a no-op success.
    /// On failure the transport has released any partially-acquired
    /// resources and the session remains disconnected.
    pub fn connect(&mut self) -> PrinterResult<()> {
        if self.transport.is_open() {
            debug!("connect() on connected session is a no-op");
            return Ok(());
        }
        self.transport.open()
    }

    /// Tear down the channel.
    ///
    /// Idempotent and infallible: teardown errors are logged inside
    /// the transport and swallowed.
    pub fn disconnect(&mut self) {
        self.transport.close();
    }

    /// Write the whole payload, then wait out the printer's processing
    /// time: `extra_wait_ms + len/16` milliseconds.
    ///
    /// A write failure disconnects the session so the next send
    /// requires a fresh connect instead of silently retrying on a
    /// broken channel.
    pub fn send(&mut self, data: &[u8], extra_wait_ms: u64) -> PrinterResult<()> {
        if !self.is_connected() {
            // Normalize any half-open transport state before failing.
            self.disconnect();
            return Err(PrinterError::NotConnected);
        }

        if let Err(e) = self.transport.write_all(data) {
            warn!(error = %e, "Send failed, disconnecting session");
            self.disconnect();
            return Err(PrinterError::Send(e.to_string()));
        }

        let wait = drain_wait(data.len(), extra_wait_ms);
        if !wait.is_zero() {
            std::thread::sleep(wait);
        }
        Ok(())
    }

    /// Best-effort read of whatever the device already buffered.
    ///
    /// A zero-length result is valid and common. Read failures do not
    /// force a reconnect.
    pub fn read(&mut self) -> PrinterResult<Vec<u8>> {
        if !self.is_connected() {
            self.disconnect();
            return Err(PrinterError::NotConnected);
        }

        self.transport
            .read_available()
            .map_err(|e| PrinterError::Read(e.to_string()))
    }

    /// Pure query: both channel streams allocated and the device
    /// handle still open.
    pub fn is_connected(&self) -> bool {
        self.transport.is_open()
    }
}

impl Drop for PrinterSession {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Post-write wait modeling printer processing time proportional to
/// payload size.
pub(crate) fn drain_wait(payload_len: usize, extra_wait_ms: u64) -> Duration {
    Duration::from_millis(extra_wait_ms + (payload_len / DRAIN_BYTES_PER_MS) as u64)
}
