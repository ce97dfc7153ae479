//! Pending USB permission requests.
//!
//! The host asks the OS for device access and the grant arrives
//! asynchronously. Each pending request stores an explicit
//! continuation (a oneshot sender) keyed by the device, so the grant
//! resumes exactly the waiting caller; at most one request per device
//! is outstanding, and a new request supersedes the previous one.

use crate::error::{BridgeError, BridgeResult};
use dashmap::DashMap;
use escpos_printer::device_key;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Tracks in-flight permission requests by device key
/// (`vendorId:productId:deviceNamePart`).
#[derive(Default)]
pub struct PermissionBroker {
    pending: DashMap<String, oneshot::Sender<bool>>,
}

/// A caller's side of one pending request.
pub struct PermissionTicket {
    rx: oneshot::Receiver<bool>,
}

impl PermissionTicket {
    /// Wait for the grant decision.
    ///
    /// Fails if the request was superseded by a newer one for the
    /// same device, or torn down with the bridge.
    pub async fn granted(self) -> BridgeResult<bool> {
        self.rx.await.map_err(|_| BridgeError::PermissionAbandoned)
    }
}

impl PermissionBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pending request for a device key.
    ///
    /// A previous outstanding request for the same device is rejected
    /// rather than queued.
    pub fn request(&self, device_key: impl Into<String>) -> PermissionTicket {
        let key = device_key.into();
        let (tx, rx) = oneshot::channel();
        if let Some(previous) = self.pending.insert(key.clone(), tx) {
            warn!(device = %key, "Superseding pending permission request");
            drop(previous);
        } else {
            debug!(device = %key, "Registered pending permission request");
        }
        PermissionTicket { rx }
    }

    /// Deliver the OS decision for an exact device key.
    ///
    /// Returns whether a waiter was resumed.
    pub fn resolve(&self, device_key: &str, granted: bool) -> bool {
        match self.take(device_key) {
            Some(tx) => {
                debug!(device = %device_key, granted, "Resolving permission request");
                tx.send(granted).is_ok()
            }
            None => {
                warn!(device = %device_key, "No pending permission request for device");
                false
            }
        }
    }

    /// Deliver the OS decision for a device described by its IDs and
    /// system path, falling back to the short `vid:pid` key form.
    pub fn resolve_device(
        &self,
        vendor_id: u16,
        product_id: u16,
        device_path: &str,
        granted: bool,
    ) -> bool {
        let key = device_key(vendor_id, product_id, device_path);
        let short_key = format!("{vendor_id}:{product_id}");
        match self.take(&key).or_else(|| self.take(&short_key)) {
            Some(tx) => {
                debug!(device = %key, granted, "Resolving permission request");
                tx.send(granted).is_ok()
            }
            None => {
                warn!(device = %key, "No pending permission request for device");
                false
            }
        }
    }

    fn take(&self, device_key: &str) -> Option<oneshot::Sender<bool>> {
        self.pending.remove(device_key).map(|(_, tx)| tx)
    }

    /// Reject every pending request; used during bridge teardown.
    pub fn clear(&self) {
        let pending = self.pending.len();
        if pending > 0 {
            warn!(pending, "Dropping pending permission requests at teardown");
        }
        self.pending.clear();
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
