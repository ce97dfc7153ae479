//! Session handle registry.

use crate::lane::CommandLane;
use dashmap::DashMap;
use escpos_printer::PrinterSession;
use std::fmt;
use std::sync::Mutex;
use uuid::Uuid;

/// Process-unique opaque token owning exactly one printer session.
///
/// Minted at session creation; never reused once the session is
/// disposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle(Uuid);

impl SessionHandle {
    pub(crate) fn mint() -> Self {
        Self(Uuid::new_v4())
    }

    /// Short prefix used for lane thread names.
    pub(crate) fn short(&self) -> String {
        let full = self.0.to_string();
        full[..8].to_string()
    }
}

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// One registry slot.
///
/// The session is parked here until the first operation spawns its
/// lane; exactly one of `parked` / `lane` is populated at any time.
/// Once running, the lane exclusively owns the session.
pub(crate) struct SessionEntry {
    parked: Mutex<Option<PrinterSession>>,
    lane: Option<CommandLane>,
}

impl SessionEntry {
    fn park(session: PrinterSession) -> Self {
        Self {
            parked: Mutex::new(Some(session)),
            lane: None,
        }
    }

    /// Lane for this entry, spawning it on first use.
    pub(crate) fn ensure_lane(&mut self, handle: SessionHandle) -> CommandLane {
        if let Some(lane) = &self.lane {
            return lane.clone();
        }
        let session = self
            .parked
            .get_mut()
            .expect("entry mutex poisoned")
            .take()
            .expect("session neither parked nor running");
        let lane = CommandLane::spawn(handle, session);
        self.lane = Some(lane.clone());
        lane
    }

    /// Connection snapshot without touching the lane.
    ///
    /// A parked session has never run a connect, so it is disconnected
    /// by construction.
    pub(crate) fn is_connected(&self) -> bool {
        match &self.lane {
            Some(lane) => lane.is_connected(),
            None => false,
        }
    }

    /// Take the lane for teardown, if running.
    pub(crate) fn into_lane(self) -> Option<CommandLane> {
        // A still-parked session is dropped here, which disconnects it.
        self.lane
    }
}

/// Process-wide table mapping session handles to printer sessions.
///
/// Insert/remove/lookup are individually atomic; entries for different
/// handles never block one another.
#[derive(Default)]
pub(crate) struct PrinterRegistry {
    sessions: DashMap<SessionHandle, SessionEntry>,
}

impl PrinterRegistry {
    pub(crate) fn insert(&self, session: PrinterSession) -> SessionHandle {
        let handle = SessionHandle::mint();
        self.sessions.insert(handle, SessionEntry::park(session));
        handle
    }

    /// Lane for a handle, spawning it on first use.
    pub(crate) fn lane_for(&self, handle: SessionHandle) -> Option<CommandLane> {
        self.sessions
            .get_mut(&handle)
            .map(|mut entry| entry.ensure_lane(handle))
    }

    pub(crate) fn is_connected(&self, handle: SessionHandle) -> Option<bool> {
        self.sessions.get(&handle).map(|entry| entry.is_connected())
    }

    /// Remove a handle so no new operation can be looked up.
    pub(crate) fn remove(&self, handle: SessionHandle) -> Option<SessionEntry> {
        self.sessions.remove(&handle).map(|(_, entry)| entry)
    }

    /// Drain every entry for overall teardown.
    pub(crate) fn drain(&self) -> Vec<(SessionHandle, SessionEntry)> {
        let handles: Vec<SessionHandle> = self.sessions.iter().map(|e| *e.key()).collect();
        handles
            .into_iter()
            .filter_map(|h| self.sessions.remove(&h))
            .collect()
    }
}
