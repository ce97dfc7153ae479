//! # escpos-bridge
//!
//! Session dispatch for ESC/POS printers: opaque session handles, a
//! process-wide registry, and one serialized command lane per handle
//! so independent printers print concurrently while commands to the
//! same printer never interleave.
//!
//! ## Scope
//!
//! This crate handles WHO talks to a printer and in what order:
//! - `PrinterBridge`: create/connect/send/read/dispose by handle
//! - per-handle single-worker lanes (strict FIFO, lazy spawn)
//! - `PermissionBroker`: continuation-based pending USB permission
//!   requests
//!
//! Byte channels and the connection state machine live in
//! `escpos-printer`; JavaScript marshalling and OS permission dialogs
//! stay with the host application.
//!
//! ## Example
//!
//! ```ignore
//! use escpos_bridge::{BackendKind, PrinterBridge};
//!
//! let bridge = PrinterBridge::new();
//! let receipt = bridge.create_session(BackendKind::Usb, "1234:5678");
//! bridge.connect(receipt).await?;
//! bridge.send(receipt, vec![0x1B, 0x40], 0).await?;
//! bridge.dispose_session(receipt).await;
//! ```

mod bridge;
mod error;
mod lane;
mod permission;
mod registry;

// Re-exports
pub use bridge::{BackendKind, PrinterBridge};
pub use error::{BridgeError, BridgeResult};
pub use permission::{PermissionBroker, PermissionTicket};
pub use registry::SessionHandle;
