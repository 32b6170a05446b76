//! Process/session directory and signal delivery.
//!
//! The pty core never walks a real process table; it asks this directory
//! the handful of questions job control needs (does pid exist, what is its
//! process group / session / controlling tty) and hands it signals to
//! deliver. Delivery is fire-and-forget: signals are recorded as pending
//! on each live target and an optional waker hook runs so blocked tty
//! readers can notice (that hook is how EINTR surfaces without polling).

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::debug;

use super::Pid;

/// Signals the pty layer generates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Hup,
    Int,
    Quit,
    Ttin,
    Ttou,
    Winch,
}

impl Signal {
    /// Conventional POSIX signal number.
    pub fn number(self) -> i32 {
        match self {
            Signal::Hup => 1,
            Signal::Int => 2,
            Signal::Quit => 3,
            Signal::Ttin => 21,
            Signal::Ttou => 22,
            Signal::Winch => 28,
        }
    }
}

/// Addressee of a signal delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalTarget {
    Process(Pid),
    Group(Pid),
}

/// Security identity of a process, checked by the rendezvous protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Credentials {
    pub uid: u32,
    pub gid: u32,
}

struct Entry {
    pgid: Pid,
    sid: Pid,
    creds: Credentials,
    ctty: Option<u32>,
    pending: Vec<Signal>,
}

type Waker = Box<dyn Fn(Pid, Option<u32>) + Send + Sync>;

/// In-memory process/session directory.
pub struct ProcessDirectory {
    table: Mutex<HashMap<Pid, Entry>>,
    waker: Mutex<Option<Waker>>,
}

impl ProcessDirectory {
    pub fn new() -> Self {
        Self {
            table: Mutex::new(HashMap::new()),
            waker: Mutex::new(None),
        }
    }

    /// Register a live process.
    pub fn register(&self, pid: Pid, pgid: Pid, sid: Pid, creds: Credentials) {
        self.table.lock().insert(
            pid,
            Entry {
                pgid,
                sid,
                creds,
                ctty: None,
                pending: Vec::new(),
            },
        );
    }

    /// Remove a process; its pending signals are discarded.
    pub fn deregister(&self, pid: Pid) {
        self.table.lock().remove(&pid);
    }

    pub fn exists(&self, pid: Pid) -> bool {
        self.table.lock().contains_key(&pid)
    }

    pub fn pgid_of(&self, pid: Pid) -> Option<Pid> {
        self.table.lock().get(&pid).map(|e| e.pgid)
    }

    pub fn session_of(&self, pid: Pid) -> Option<Pid> {
        self.table.lock().get(&pid).map(|e| e.sid)
    }

    pub fn controlling_tty_of(&self, pid: Pid) -> Option<u32> {
        self.table.lock().get(&pid).and_then(|e| e.ctty)
    }

    pub fn credentials_of(&self, pid: Pid) -> Option<Credentials> {
        self.table.lock().get(&pid).map(|e| e.creds)
    }

    /// Bind `pid` to a controlling tty if it has none yet.
    pub fn set_ctty(&self, pid: Pid, minor: u32) {
        if let Some(entry) = self.table.lock().get_mut(&pid) {
            if entry.ctty.is_none() {
                entry.ctty = Some(minor);
            }
        }
    }

    /// Install the hook run after each delivery, with the table lock
    /// released. Arguments: target pid and its controlling tty minor.
    pub fn set_waker(&self, waker: Waker) {
        *self.waker.lock() = Some(waker);
    }

    /// Deliver a signal. No confirmation; unknown targets are ignored.
    pub fn deliver(&self, target: SignalTarget, signal: Signal) {
        let mut hit: Vec<(Pid, Option<u32>)> = Vec::new();
        {
            let mut table = self.table.lock();
            match target {
                SignalTarget::Process(pid) => {
                    if let Some(entry) = table.get_mut(&pid) {
                        entry.pending.push(signal);
                        hit.push((pid, entry.ctty));
                    }
                }
                SignalTarget::Group(pgid) => {
                    for (pid, entry) in table.iter_mut() {
                        if entry.pgid == pgid {
                            entry.pending.push(signal);
                            hit.push((*pid, entry.ctty));
                        }
                    }
                }
            }
        }
        debug!(?target, ?signal, delivered = hit.len(), "signal delivery");
        let waker = self.waker.lock();
        if let Some(waker) = waker.as_ref() {
            for (pid, ctty) in hit {
                waker(pid, ctty);
            }
        }
    }

    /// True if `pid` has undelivered signals queued.
    pub fn has_pending(&self, pid: Pid) -> bool {
        self.table
            .lock()
            .get(&pid)
            .map(|e| !e.pending.is_empty())
            .unwrap_or(false)
    }

    /// Consume and return the pending signals of `pid`.
    pub fn take_pending(&self, pid: Pid) -> Vec<Signal> {
        self.table
            .lock()
            .get_mut(&pid)
            .map(|e| std::mem::take(&mut e.pending))
            .unwrap_or_default()
    }
}

impl Default for ProcessDirectory {
    fn default() -> Self {
        Self::new()
    }
}
