//! Bluetooth RFCOMM transport.
//!
//! Opens a serial-profile socket to a paired device and passes raw
//! bytes through with no framing. Uses AF_BLUETOOTH + SOCK_STREAM +
//! BTPROTO_RFCOMM directly; pairing and runtime permission prompts are
//! the host's job.

use crate::error::{PrinterError, PrinterResult};
use crate::transport::Transport;
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;
use tracing::{debug, info, warn};

// Bluetooth socket constants (from <bluetooth/bluetooth.h> and <bluetooth/rfcomm.h>)
const AF_BLUETOOTH: i32 = 31;
const BTPROTO_RFCOMM: i32 = 3;

/// Serial Port Profile channel used by ESC/POS printers.
const RFCOMM_SPP_CHANNEL: u8 = 1;

/// Send/receive timeout applied to the socket.
const SOCKET_TIMEOUT: Duration = Duration::from_secs(5);

/// sockaddr_rc structure for RFCOMM connections.
#[repr(C)]
struct SockaddrRc {
    rc_family: u16,
    rc_bdaddr: [u8; 6],
    rc_channel: u8,
}

/// Bluetooth printer backend bound to a MAC-style address.
pub struct BluetoothTransport {
    address: String,
    socket: Option<RfcommSocket>,
}

impl BluetoothTransport {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            socket: None,
        }
    }

    /// The address this backend was created with.
    pub fn address(&self) -> &str {
        &self.address
    }
}

impl Transport for BluetoothTransport {
    fn open(&mut self) -> PrinterResult<()> {
        if self.socket.is_some() {
            return Ok(());
        }

        // A malformed address cannot resolve to any known device.
        let bdaddr = parse_bdaddr(&self.address).ok_or_else(|| {
            PrinterError::DeviceNotFound(format!("invalid Bluetooth address: {}", self.address))
        })?;

        let socket = RfcommSocket::connect(bdaddr, RFCOMM_SPP_CHANNEL).map_err(|e| {
            match e.raw_os_error() {
                Some(libc::EACCES) | Some(libc::EPERM) => PrinterError::Permission(format!(
                    "Bluetooth socket not permitted for {}: {}",
                    self.address, e
                )),
                _ => PrinterError::Connect(format!(
                    "RFCOMM connect to {} failed: {}",
                    self.address, e
                )),
            }
        })?;

        info!(address = %self.address, "Connected to Bluetooth printer");
        self.socket = Some(socket);
        Ok(())
    }

    fn close(&mut self) {
        if let Some(socket) = self.socket.take() {
            drop(socket);
            info!(address = %self.address, "Disconnected from Bluetooth printer");
        }
    }

    fn is_open(&self) -> bool {
        self.socket.is_some()
    }

    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        let socket = self
            .socket
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "socket closed"))?;
        socket.send_all(data)
    }

    fn read_available(&mut self) -> io::Result<Vec<u8>> {
        let socket = self
            .socket
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "socket closed"))?;
        socket.recv_buffered()
    }
}

/// A connected RFCOMM socket.
struct RfcommSocket {
    fd: RawFd,
}

impl RfcommSocket {
    /// Connect to a device by 6-byte bdaddr on the given channel.
    fn connect(bdaddr: [u8; 6], channel: u8) -> io::Result<Self> {
        let fd = unsafe { libc::socket(AF_BLUETOOTH, libc::SOCK_STREAM, BTPROTO_RFCOMM) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }

        let sa = SockaddrRc {
            rc_family: AF_BLUETOOTH as u16,
            rc_bdaddr: bdaddr,
            rc_channel: channel,
        };

        let ret = unsafe {
            libc::connect(
                fd,
                &sa as *const SockaddrRc as *const libc::sockaddr,
                std::mem::size_of::<SockaddrRc>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            let err = io::Error::last_os_error();
            unsafe {
                libc::close(fd);
            }
            return Err(err);
        }

        let socket = Self { fd };
        socket.set_timeout(SOCKET_TIMEOUT)?;
        Ok(socket)
    }

    fn set_timeout(&self, timeout: Duration) -> io::Result<()> {
        let tv = libc::timeval {
            tv_sec: timeout.as_secs() as libc::time_t,
            tv_usec: timeout.subsec_micros() as libc::suseconds_t,
        };
        for opt in [libc::SO_RCVTIMEO, libc::SO_SNDTIMEO] {
            let ret = unsafe {
                libc::setsockopt(
                    self.fd,
                    libc::SOL_SOCKET,
                    opt,
                    &tv as *const libc::timeval as *const libc::c_void,
                    std::mem::size_of::<libc::timeval>() as libc::socklen_t,
                )
            };
            if ret < 0 {
                return Err(io::Error::last_os_error());
            }
        }
        Ok(())
    }

    /// Write the whole buffer, retrying on short sends.
    fn send_all(&self, data: &[u8]) -> io::Result<()> {
        let mut sent = 0;
        while sent < data.len() {
            let n = unsafe {
                libc::send(
                    self.fd,
                    data[sent..].as_ptr() as *const libc::c_void,
                    data.len() - sent,
                    0,
                )
            };
            if n < 0 {
                return Err(io::Error::last_os_error());
            }
            sent += n as usize;
        }
        debug!(bytes = data.len(), "RFCOMM write complete");
        Ok(())
    }

    /// Collect whatever bytes the kernel already buffered, without waiting.
    fn recv_buffered(&self) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            let n = unsafe {
                libc::recv(
                    self.fd,
                    buf.as_mut_ptr() as *mut libc::c_void,
                    buf.len(),
                    libc::MSG_DONTWAIT,
                )
            };
            if n > 0 {
                out.extend_from_slice(&buf[..n as usize]);
                continue;
            }
            if n == 0 {
                // Peer closed; nothing more is buffered.
                break;
            }
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock {
                break;
            }
            return Err(err);
        }
        Ok(out)
    }
}

impl Drop for RfcommSocket {
    fn drop(&mut self) {
        let ret = unsafe { libc::close(self.fd) };
        if ret < 0 {
            warn!(error = %io::Error::last_os_error(), "Error closing RFCOMM socket");
        }
    }
}

/// Parse "AA:BB:CC:DD:EE:FF" into a little-endian bdaddr.
fn parse_bdaddr(addr: &str) -> Option<[u8; 6]> {
    let parts: Vec<&str> = addr.split(':').collect();
    if parts.len() != 6 {
        return None;
    }
    let mut bdaddr = [0u8; 6];
    for (i, part) in parts.iter().enumerate() {
        if part.len() != 2 {
            return None;
        }
        bdaddr[5 - i] = u8::from_str_radix(part, 16).ok()?;
    }
    Some(bdaddr)
}
