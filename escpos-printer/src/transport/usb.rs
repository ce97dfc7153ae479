//! USB bulk-endpoint transport via libusb.
//!
//! Resolves a `vendorId:productId[:deviceNamePart]` address to an
//! attached device, claims a printer interface and exposes a duplex
//! byte channel over its bulk endpoints.

use crate::error::{PrinterError, PrinterResult};
use crate::transport::Transport;
use rusb::constants::LIBUSB_CLASS_PRINTER;
use rusb::{Context, Device, DeviceHandle, Direction, TransferType, UsbContext};
use std::io;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Timeout for a single bulk transfer.
const BULK_TRANSFER_TIMEOUT: Duration = Duration::from_millis(5000);

/// Short poll used for IN transfers so reads stay effectively
/// non-blocking; anything not already buffered reads as zero bytes.
const READ_POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// USB printer backend bound to a `vendorId:productId[:deviceNamePart]`
/// address.
///
/// The optional `deviceNamePart` disambiguates among identical-VID/PID
/// devices; it matches the device path exactly or as the trailing
/// segment after the last `/`.
pub struct UsbTransport {
    address: String,
    channel: Option<UsbChannel>,
}

/// An open claimed-interface channel over bulk endpoints.
struct UsbChannel {
    handle: DeviceHandle<Context>,
    interface: u8,
    out_endpoint: u8,
    /// Address and max packet size of the bulk IN endpoint, if any.
    in_endpoint: Option<(u8, usize)>,
    device_path: String,
}

impl UsbTransport {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            channel: None,
        }
    }

    /// The address this backend was created with.
    pub fn address(&self) -> &str {
        &self.address
    }
}

impl Transport for UsbTransport {
    fn open(&mut self) -> PrinterResult<()> {
        if self.channel.is_some() {
            return Ok(());
        }

        // Malformed addresses resolve like any other unknown device.
        let parsed = UsbAddress::parse(&self.address).ok_or_else(|| {
            PrinterError::DeviceNotFound(format!("USB device not found: {}", self.address))
        })?;

        let context = Context::new()
            .map_err(|e| PrinterError::Connect(format!("USB service not available: {e}")))?;

        let device = find_device(&context, &parsed)?.ok_or_else(|| {
            PrinterError::DeviceNotFound(format!("USB device not found: {}", self.address))
        })?;
        let device_path = device_path(&device);

        let handle = device.open().map_err(|e| match e {
            rusb::Error::Access => PrinterError::Permission(format!(
                "USB permission not granted for device: {device_path}"
            )),
            _ => PrinterError::Connect(format!("Failed to open USB device connection: {e}")),
        })?;

        // Linux holds printers with usblp; detach so we can claim.
        if let Err(e) = handle.set_auto_detach_kernel_driver(true) {
            debug!(error = %e, "Kernel driver auto-detach unsupported");
        }

        let iface = find_printer_interface(&device).ok_or_else(|| {
            PrinterError::Connect("No suitable USB interface found on device".to_string())
        })?;

        handle
            .claim_interface(iface.number)
            .map_err(|e| PrinterError::Connect(format!("Failed to claim USB interface: {e}")))?;

        let Some(out_endpoint) = iface.out_endpoint else {
            // Undo the claim before failing; the handle closes on drop.
            if let Err(e) = handle.release_interface(iface.number) {
                warn!(error = %e, "Error releasing USB interface");
            }
            return Err(PrinterError::Connect(
                "No bulk OUT endpoint found on USB device".to_string(),
            ));
        };

        info!(address = %self.address, device = %device_path, "Connected to USB printer");

        self.channel = Some(UsbChannel {
            handle,
            interface: iface.number,
            out_endpoint,
            in_endpoint: iface.in_endpoint,
            device_path,
        });
        Ok(())
    }

    fn close(&mut self) {
        if let Some(channel) = self.channel.take() {
            if let Err(e) = channel.handle.release_interface(channel.interface) {
                warn!(error = %e, "Error releasing USB interface");
            }
            // Dropping the handle closes the device connection.
            info!(device = %channel.device_path, "Disconnected from USB printer");
        }
    }

    fn is_open(&self) -> bool {
        self.channel.is_some()
    }

    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        let channel = self
            .channel
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "USB channel closed"))?;

        // One bulk transfer per write call.
        let written = channel
            .handle
            .write_bulk(channel.out_endpoint, data, BULK_TRANSFER_TIMEOUT)
            .map_err(|e| io::Error::other(format!("USB bulk transfer failed: {e}")))?;

        if written < data.len() {
            warn!(
                sent = written,
                total = data.len(),
                "USB bulk transfer incomplete"
            );
        }
        Ok(())
    }

    fn read_available(&mut self) -> io::Result<Vec<u8>> {
        let channel = self
            .channel
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "USB channel closed"))?;

        // No readable endpoint: permanently-empty input.
        let Some((endpoint, max_packet_size)) = channel.in_endpoint else {
            return Ok(Vec::new());
        };

        let mut buf = vec![0u8; max_packet_size];
        match channel
            .handle
            .read_bulk(endpoint, &mut buf, READ_POLL_TIMEOUT)
        {
            Ok(n) => {
                buf.truncate(n);
                Ok(buf)
            }
            // Failed or timed-out transfers read as "no data", never
            // as an error at this layer.
            Err(e) => {
                debug!(error = %e, "USB bulk IN returned no data");
                Ok(Vec::new())
            }
        }
    }
}

/// Parsed `vendorId:productId[:deviceNamePart]` address.
#[derive(Debug, Clone, PartialEq, Eq)]
struct UsbAddress {
    vendor_id: u16,
    product_id: u16,
    name_hint: Option<String>,
}

impl UsbAddress {
    /// Parse an address string. `None` for anything malformed; the
    /// caller reports those uniformly as device-not-found.
    fn parse(address: &str) -> Option<Self> {
        let parts: Vec<&str> = address.split(':').collect();
        if parts.len() < 2 {
            return None;
        }
        let vendor_id: u16 = parts[0].parse().ok()?;
        let product_id: u16 = parts[1].parse().ok()?;
        let name_hint = parts
            .get(2)
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string());
        Some(Self {
            vendor_id,
            product_id,
            name_hint,
        })
    }

    fn matches(&self, vendor_id: u16, product_id: u16, device_path: &str) -> bool {
        if self.vendor_id != vendor_id || self.product_id != product_id {
            return false;
        }
        match &self.name_hint {
            Some(hint) => matches_name_hint(device_path, hint),
            None => true,
        }
    }
}

/// Exact path match, or trailing segment after the last `/`.
fn matches_name_hint(device_path: &str, hint: &str) -> bool {
    device_path == hint || device_path.ends_with(&format!("/{hint}"))
}

/// System path of a device, as exposed by usbfs.
fn device_path<T: UsbContext>(device: &Device<T>) -> String {
    format!(
        "/dev/bus/usb/{:03}/{:03}",
        device.bus_number(),
        device.address()
    )
}

/// Stable device key `vendorId:productId:lastPathSegment`, shared by
/// device listing and pending permission tracking.
pub fn device_key(vendor_id: u16, product_id: u16, device_path: &str) -> String {
    let name_part = device_path.rsplit('/').next().unwrap_or(device_path);
    format!("{vendor_id}:{product_id}:{name_part}")
}

/// Scan the bus for the first device matching the parsed address.
fn find_device(context: &Context, address: &UsbAddress) -> PrinterResult<Option<Device<Context>>> {
    let devices = context
        .devices()
        .map_err(|e| PrinterError::Connect(format!("USB enumeration failed: {e}")))?;

    for device in devices.iter() {
        let Ok(descriptor) = device.device_descriptor() else {
            continue;
        };
        if address.matches(
            descriptor.vendor_id(),
            descriptor.product_id(),
            &device_path(&device),
        ) {
            return Ok(Some(device));
        }
    }
    Ok(None)
}

/// Interface selection result: number plus discovered bulk endpoints.
struct SelectedInterface {
    number: u8,
    out_endpoint: Option<u8>,
    in_endpoint: Option<(u8, usize)>,
}

/// Pick the interface to claim: printer-class interfaces first, then
/// any interface exposing a bulk OUT endpoint.
fn find_printer_interface<T: UsbContext>(device: &Device<T>) -> Option<SelectedInterface> {
    let config = device.active_config_descriptor().ok()?;

    // First pass: printer class.
    for interface in config.interfaces() {
        for descriptor in interface.descriptors() {
            if descriptor.class_code() == LIBUSB_CLASS_PRINTER {
                debug!(interface = interface.number(), "Found printer class interface");
                return Some(select_endpoints(interface.number(), &descriptor));
            }
        }
    }

    // Second pass: anything with a bulk OUT endpoint.
    for interface in config.interfaces() {
        for descriptor in interface.descriptors() {
            let selected = select_endpoints(interface.number(), &descriptor);
            if selected.out_endpoint.is_some() {
                debug!(
                    interface = interface.number(),
                    "Found interface with bulk OUT endpoint"
                );
                return Some(selected);
            }
        }
    }

    None
}

/// Locate the bulk OUT (required) and bulk IN (optional) endpoints on
/// an interface descriptor.
fn select_endpoints(
    number: u8,
    descriptor: &rusb::InterfaceDescriptor<'_>,
) -> SelectedInterface {
    let mut selected = SelectedInterface {
        number,
        out_endpoint: None,
        in_endpoint: None,
    };
    for endpoint in descriptor.endpoint_descriptors() {
        if endpoint.transfer_type() != TransferType::Bulk {
            continue;
        }
        match endpoint.direction() {
            Direction::Out => {
                if selected.out_endpoint.is_none() {
                    selected.out_endpoint = Some(endpoint.address());
                }
            }
            Direction::In => {
                if selected.in_endpoint.is_none() {
                    selected.in_endpoint =
                        Some((endpoint.address(), endpoint.max_packet_size() as usize));
                }
            }
        }
    }
    selected
}

/// A USB device that could plausibly be an ESC/POS printer.
#[derive(Debug, Clone)]
pub struct UsbPrinterDevice {
    /// Stable identifier, usable as a session address
    pub id: String,
    /// Product name, or a VID/PID fallback when unreadable
    pub name: String,
    pub vendor_id: u16,
    pub product_id: u16,
    pub device_class: u8,
    /// System device path (usbfs)
    pub device_path: String,
    pub manufacturer: Option<String>,
    /// Whether the device can be opened without a permission grant
    pub has_permission: bool,
}

/// Enumerate attached devices that look like printers.
///
/// Matches printer-class devices/interfaces plus anything exposing a
/// bulk OUT endpoint, which covers most ESC/POS hardware.
pub fn list_printer_devices() -> PrinterResult<Vec<UsbPrinterDevice>> {
    let context = Context::new()
        .map_err(|e| PrinterError::Connect(format!("USB service not available: {e}")))?;
    let devices = context
        .devices()
        .map_err(|e| PrinterError::Connect(format!("USB enumeration failed: {e}")))?;

    let mut found = Vec::new();
    for device in devices.iter() {
        let Ok(descriptor) = device.device_descriptor() else {
            continue;
        };
        if !is_potential_printer(&device, descriptor.class_code()) {
            continue;
        }

        let vendor_id = descriptor.vendor_id();
        let product_id = descriptor.product_id();
        let path = device_path(&device);

        let (name, manufacturer, has_permission) = match device.open() {
            Ok(handle) => (
                handle.read_product_string_ascii(&descriptor).ok(),
                handle.read_manufacturer_string_ascii(&descriptor).ok(),
                true,
            ),
            Err(rusb::Error::Access) => (None, None, false),
            Err(e) => {
                debug!(device = %path, error = %e, "Skipping unopenable USB device");
                (None, None, false)
            }
        };

        debug!(
            device = %path,
            vendor_id,
            product_id,
            has_permission,
            "Found USB printer candidate"
        );

        found.push(UsbPrinterDevice {
            id: device_key(vendor_id, product_id, &path),
            name: name
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| format!("USB Device {vendor_id}:{product_id}")),
            vendor_id,
            product_id,
            device_class: descriptor.class_code(),
            device_path: path,
            manufacturer: manufacturer.filter(|m| !m.is_empty()),
            has_permission,
        });
    }

    Ok(found)
}

/// Printer-class device or interface, or any bulk OUT endpoint.
fn is_potential_printer<T: UsbContext>(device: &Device<T>, device_class: u8) -> bool {
    if device_class == LIBUSB_CLASS_PRINTER {
        return true;
    }
    let Ok(config) = device.active_config_descriptor() else {
        return false;
    };
    for interface in config.interfaces() {
        for descriptor in interface.descriptors() {
            if descriptor.class_code() == LIBUSB_CLASS_PRINTER {
                return true;
            }
            let has_bulk_out = descriptor.endpoint_descriptors().any(|e| {
                e.transfer_type() == TransferType::Bulk && e.direction() == Direction::Out
            });
            if has_bulk_out {
                return true;
            }
        }
    }
    false
}
