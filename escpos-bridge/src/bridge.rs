//! Caller-facing printer bridge.
//!
//! Sessions are created against an address and a backend kind, then
//! driven by handle. Connect, disconnect, send and read are enqueued
//! on the handle's serialized lane; `is_connected` is answered from a
//! lock-free snapshot so it never suspends.

use crate::error::{BridgeError, BridgeResult};
use crate::lane::Command;
use crate::permission::PermissionBroker;
use crate::registry::{PrinterRegistry, SessionHandle};
use escpos_printer::{PrinterSession, Transport, UsbTransport};
use tokio::sync::oneshot;
use tracing::{debug, info};

#[cfg(unix)]
use escpos_printer::BluetoothTransport;

/// Which transport backend a session address refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// MAC-style address, serial-profile socket
    #[cfg(unix)]
    Bluetooth,
    /// `vendorId:productId[:deviceNamePart]` address, bulk endpoints
    Usb,
}

/// Process-wide printer dispatch: session registry, per-handle lanes
/// and pending permission tracking.
///
/// Operations on one handle execute strictly in submission order;
/// operations on different handles never block one another.
#[derive(Default)]
pub struct PrinterBridge {
    registry: PrinterRegistry,
    permissions: PermissionBroker,
}

impl PrinterBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a session bound to an address and backend kind.
    ///
    /// Always succeeds: the address is validated by `connect`, not
    /// here.
    pub fn create_session(&self, kind: BackendKind, address: &str) -> SessionHandle {
        let transport: Box<dyn Transport> = match kind {
            #[cfg(unix)]
            BackendKind::Bluetooth => Box::new(BluetoothTransport::new(address)),
            BackendKind::Usb => Box::new(UsbTransport::new(address)),
        };
        self.create_session_with(transport)
    }

    /// Mint a session over a caller-supplied transport backend.
    pub fn create_session_with(&self, transport: Box<dyn Transport>) -> SessionHandle {
        let handle = self.registry.insert(PrinterSession::new(transport));
        debug!(%handle, "Created printer session");
        handle
    }

    /// Open the session's transport channel.
    pub async fn connect(&self, handle: SessionHandle) -> BridgeResult<()> {
        let lane = self.lane(handle)?;
        let (tx, rx) = oneshot::channel();
        lane.submit(Command::Connect(tx))?;
        rx.await.map_err(|_| BridgeError::Abandoned)??;
        Ok(())
    }

    /// Tear the channel down.
    ///
    /// Serialized after any in-flight sends on the same handle;
    /// best-effort and idempotent, so it only fails on lookup or
    /// teardown races.
    pub async fn disconnect(&self, handle: SessionHandle) -> BridgeResult<()> {
        let lane = self.lane(handle)?;
        let (tx, rx) = oneshot::channel();
        lane.submit(Command::Disconnect(tx))?;
        rx.await.map_err(|_| BridgeError::Abandoned)
    }

    /// Write a raw payload, waiting out the printer drain time of
    /// `extra_wait_ms + len/16` milliseconds on the handle's lane.
    pub async fn send(
        &self,
        handle: SessionHandle,
        data: Vec<u8>,
        extra_wait_ms: u64,
    ) -> BridgeResult<()> {
        let lane = self.lane(handle)?;
        let (tx, rx) = oneshot::channel();
        lane.submit(Command::Send {
            data,
            extra_wait_ms,
            reply: tx,
        })?;
        rx.await.map_err(|_| BridgeError::Abandoned)??;
        Ok(())
    }

    /// Best-effort read of whatever the printer already sent back.
    pub async fn read(&self, handle: SessionHandle) -> BridgeResult<Vec<u8>> {
        let lane = self.lane(handle)?;
        let (tx, rx) = oneshot::channel();
        lane.submit(Command::Read(tx))?;
        let bytes = rx.await.map_err(|_| BridgeError::Abandoned)??;
        Ok(bytes)
    }

    /// Pure query, answered without touching the lane.
    pub fn is_connected(&self, handle: SessionHandle) -> BridgeResult<bool> {
        self.registry
            .is_connected(handle)
            .ok_or(BridgeError::SessionNotFound(handle))
    }

    /// Dispose a session: remove it from the registry so no new
    /// operation can find it, then run a final disconnect behind any
    /// already-queued work and stop the lane.
    ///
    /// Returns whether a session existed for the handle.
    pub async fn dispose_session(&self, handle: SessionHandle) -> bool {
        let Some(entry) = self.registry.remove(handle) else {
            return false;
        };

        if let Some(lane) = entry.into_lane() {
            let (tx, rx) = oneshot::channel();
            if lane.submit(Command::Shutdown(tx)).is_ok() {
                // Queued sends drain first; the worker disconnects and
                // exits after replying.
                let _ = rx.await;
            }
            // A lane that cannot accept the shutdown has already
            // exited and dropped (disconnected) its session.
        }
        // A never-used session is dropped with the entry, which
        // disconnects it directly.

        info!(%handle, "Disposed printer session");
        true
    }

    /// Force-stop every lane and reject all pending permission
    /// requests. Work that can no longer be enqueued is abandoned,
    /// never silently dropped.
    pub async fn shutdown(&self) {
        let entries = self.registry.drain();
        info!(sessions = entries.len(), "Shutting down printer bridge");

        for (handle, entry) in entries {
            if let Some(lane) = entry.into_lane() {
                let (tx, rx) = oneshot::channel();
                if lane.submit(Command::Shutdown(tx)).is_ok() {
                    let _ = rx.await;
                }
            }
            debug!(%handle, "Printer lane stopped at teardown");
        }

        self.permissions.clear();
    }

    /// Pending USB permission request tracking.
    pub fn permissions(&self) -> &PermissionBroker {
        &self.permissions
    }

    fn lane(&self, handle: SessionHandle) -> BridgeResult<crate::lane::CommandLane> {
        self.registry
            .lane_for(handle)
            .ok_or(BridgeError::SessionNotFound(handle))
    }
}
