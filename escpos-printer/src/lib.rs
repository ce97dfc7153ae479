//! # escpos-printer
//!
//! ESC/POS thermal printer transports - per-device byte channels only.
//!
//! ## Scope
//!
//! This crate handles HOW bytes reach a printer:
//! - `Transport` capability trait (open/close/write/read)
//! - Bluetooth RFCOMM backend (serial-profile socket, raw passthrough)
//! - USB backend (claimed interface, bulk endpoints via libusb)
//! - `PrinterSession` connection state machine with a uniform error
//!   taxonomy across backends
//! - USB bus enumeration for printer-looking devices
//!
//! WHAT to print stays with the caller: payloads are raw ESC/POS byte
//! buffers. Session handles, per-printer serialization and permission
//! tracking live in `escpos-bridge`.
//!
//! ## Example
//!
//! ```ignore
//! use escpos_printer::{PrinterSession, UsbTransport};
//!
//! let mut session = PrinterSession::new(Box::new(UsbTransport::new("1234:5678")));
//! session.connect()?;
//! session.send(&[0x1B, 0x40], 0)?; // ESC @ (initialize)
//! session.disconnect();
//! ```

mod error;
mod session;
mod transport;

// Re-exports
pub use error::{PrinterError, PrinterResult};
pub use session::PrinterSession;
pub use transport::Transport;
pub use transport::usb::{UsbPrinterDevice, UsbTransport, device_key, list_printer_devices};

#[cfg(unix)]
pub use transport::bluetooth::BluetoothTransport;
