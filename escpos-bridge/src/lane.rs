//! Per-handle command lane.
//!
//! One single-worker lane per live session handle: a dedicated thread
//! draining an unbounded FIFO, so commands to the same printer never
//! interleave or reorder while unrelated printers run concurrently.
//! The lane exclusively owns its session; nothing else touches the
//! transport.

use crate::error::{BridgeError, BridgeResult};
use crate::registry::SessionHandle;
use escpos_printer::{PrinterResult, PrinterSession};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// A queued operation with its reply slot.
pub(crate) enum Command {
    Connect(oneshot::Sender<PrinterResult<()>>),
    Disconnect(oneshot::Sender<()>),
    Send {
        data: Vec<u8>,
        extra_wait_ms: u64,
        reply: oneshot::Sender<PrinterResult<()>>,
    },
    Read(oneshot::Sender<PrinterResult<Vec<u8>>>),
    /// Final disconnect, then the worker exits.
    Shutdown(oneshot::Sender<()>),
}

/// Handle to a lane worker. Cloning shares the same lane.
#[derive(Clone)]
pub(crate) struct CommandLane {
    tx: mpsc::UnboundedSender<Command>,
    connected: Arc<AtomicBool>,
}

impl CommandLane {
    /// Spawn the worker thread for a handle, taking ownership of the
    /// session.
    pub(crate) fn spawn(handle: SessionHandle, session: PrinterSession) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(session.is_connected()));

        let worker_connected = connected.clone();
        let name = format!("escpos-{}", handle.short());
        let spawned = std::thread::Builder::new()
            .name(name)
            .spawn(move || run_worker(handle, session, rx, worker_connected));
        if let Err(e) = spawned {
            // The lane stays usable for lookups but rejects all work;
            // out of threads means the process is in far worse shape.
            warn!(%handle, error = %e, "Failed to spawn printer lane thread");
        }

        Self { tx, connected }
    }

    /// Enqueue a command. Fails when the worker has already exited;
    /// nothing is ever silently dropped.
    pub(crate) fn submit(&self, command: Command) -> BridgeResult<()> {
        self.tx.send(command).map_err(|_| BridgeError::LaneClosed)
    }

    /// Lock-free snapshot of the session's connection state,
    /// maintained by the worker after every operation.
    pub(crate) fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

fn run_worker(
    handle: SessionHandle,
    mut session: PrinterSession,
    mut rx: mpsc::UnboundedReceiver<Command>,
    connected: Arc<AtomicBool>,
) {
    debug!(%handle, "Printer lane started");

    while let Some(command) = rx.blocking_recv() {
        match command {
            Command::Connect(reply) => {
                let result = session.connect();
                connected.store(session.is_connected(), Ordering::SeqCst);
                let _ = reply.send(result);
            }
            Command::Disconnect(reply) => {
                session.disconnect();
                connected.store(false, Ordering::SeqCst);
                let _ = reply.send(());
            }
            Command::Send {
                data,
                extra_wait_ms,
                reply,
            } => {
                let result = session.send(&data, extra_wait_ms);
                connected.store(session.is_connected(), Ordering::SeqCst);
                let _ = reply.send(result);
            }
            Command::Read(reply) => {
                let result = session.read();
                connected.store(session.is_connected(), Ordering::SeqCst);
                let _ = reply.send(result);
            }
            Command::Shutdown(reply) => {
                session.disconnect();
                connected.store(false, Ordering::SeqCst);
                let _ = reply.send(());
                break;
            }
        }
    }

    // Commands still queued behind a shutdown are dropped here; their
    // reply slots close, surfacing as an abandoned-operation error.
    connected.store(false, Ordering::SeqCst);
    debug!(%handle, "Printer lane stopped");
}
