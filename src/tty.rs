//! Terminal control block and minor-number registry.
//!
//! One [`Tty`] is the single source of truth for a pty instance: line
//! discipline, window size, ownership, render strategy. Every endpoint
//! referencing the same minor number cooperates through exactly two locks
//! plus one manual-reset event:
//!
//! - the **output lock** serializes line-discipline/winsize mutation,
//!   output post-processing and adapter lifecycle
//! - the **input lock** serializes input-buffer consumption and the
//!   pending read-status sentinel
//! - the **input_available** event wakes blocked slave readers
//!
//! No operation takes both locks at once; flow control lives in an atomic
//! flag outside the output lock so a stopped writer never sleeps while
//! holding it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::discipline::{post_process_chunk, OUT_CHUNK};
use crate::error::PtyError;
use crate::host::channel::{ChannelError, ChannelReader, ChannelWriter};
use crate::host::event::Event;
use crate::host::process::{Credentials, ProcessDirectory, Signal, SignalTarget};
use crate::host::Pid;
use crate::pcon::{AdapterState, RenderStrategy};
use crate::rendezvous::RendezvousClient;
use crate::termios::{Termios, Winsize};

/// Poll interval while output is stopped by flow control.
pub(crate) const FLOW_CONTROL_POLL: Duration = Duration::from_millis(10);

/// Result of the master's most recent input-forwarding attempt, consumed
/// by slave readers after draining the pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// Input was forwarded normally.
    Ready,
    /// The master signalled end-of-input (VEOF, or last master closed).
    Eof,
    /// Forwarding hit an unrecoverable channel error.
    Failed,
}

/// Terminal control requests understood by the endpoints.
///
/// Unrecognized requests carry their raw command number and fall through
/// to the generic handler, which answers
/// [`IoctlReply::NotSupported`] instead of failing the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoctlRequest {
    GetWinsize,
    SetWinsize(Winsize),
    GetForegroundPgid,
    SetForegroundPgid(Pid),
    GetPacketMode,
    SetPacketMode(bool),
    BytesAvailable,
    Other(u32),
}

/// Replies to [`IoctlRequest`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoctlReply {
    None,
    Winsize(Winsize),
    Pgid(Option<Pid>),
    PacketMode(bool),
    Bytes(usize),
    NotSupported,
}

/// Owner/group/mode access descriptor checked by the rendezvous protocol.
/// Default mode is 0620, matching a conventional pty device node.
#[derive(Debug, Clone, Copy)]
pub struct AccessDescriptor {
    pub uid: u32,
    pub gid: u32,
    pub mode: u32,
}

impl AccessDescriptor {
    pub fn new(uid: u32, gid: u32) -> Self {
        Self {
            uid,
            gid,
            mode: 0o620,
        }
    }

    /// Whether `creds` grants modify (write-class) access.
    pub fn allows_modify(&self, creds: &Credentials) -> bool {
        if creds.uid == self.uid {
            self.mode & 0o200 != 0
        } else if creds.gid == self.gid {
            self.mode & 0o020 != 0
        } else {
            self.mode & 0o002 != 0
        }
    }
}

/// State guarded by the output lock.
pub(crate) struct OutputState {
    pub termios: Termios,
    pub winsize: Winsize,
    /// Running output column used by post-processing decisions.
    pub column: usize,
    pub strategy: RenderStrategy,
    pub adapter: Option<AdapterState>,
    pub session_id: Option<Pid>,
    pub foreground_pgid: Option<Pid>,
    pub master_pid: Option<Pid>,
}

/// State guarded by the input lock.
pub(crate) struct InputState {
    pub read_status: ReadStatus,
}

/// Slave-side channel ends held by the master for duplication into
/// opening processes (directly for the owner, via rendezvous otherwise).
pub(crate) struct SlaveSeeds {
    pub input: ChannelReader,
    pub input_raw: ChannelReader,
    pub output_raw: ChannelWriter,
    pub output: ChannelWriter,
}

impl SlaveSeeds {
    pub fn duplicate_to(&self, pid: Pid) -> SlaveSeeds {
        SlaveSeeds {
            input: self.input.duplicate_to(pid),
            input_raw: self.input_raw.duplicate_to(pid),
            output_raw: self.output_raw.duplicate_to(pid),
            output: self.output.duplicate_to(pid),
        }
    }
}

/// Shared per-pty control block.
pub struct Tty {
    minor: u32,
    access: AccessDescriptor,
    pub(crate) output: Mutex<OutputState>,
    pub(crate) input: Mutex<InputState>,
    pub(crate) input_available: Event,
    output_stopped: AtomicBool,
    adapter_active: AtomicBool,
    was_opened: AtomicBool,
    master_handles: AtomicUsize,
    slave_handles: AtomicUsize,
    pub(crate) seeds: Mutex<Option<SlaveSeeds>>,
    pub(crate) control: Mutex<Option<RendezvousClient>>,
}

impl Tty {
    pub(crate) fn new(minor: u32, access: AccessDescriptor) -> Self {
        Self {
            minor,
            access,
            output: Mutex::new(OutputState {
                termios: Termios::default(),
                winsize: Winsize::default(),
                column: 0,
                strategy: RenderStrategy::DirectPostProcessing,
                adapter: None,
                session_id: None,
                foreground_pgid: None,
                master_pid: None,
            }),
            input: Mutex::new(InputState {
                read_status: ReadStatus::Ready,
            }),
            input_available: Event::new(),
            output_stopped: AtomicBool::new(false),
            adapter_active: AtomicBool::new(false),
            was_opened: AtomicBool::new(false),
            master_handles: AtomicUsize::new(0),
            slave_handles: AtomicUsize::new(0),
            seeds: Mutex::new(None),
            control: Mutex::new(None),
        }
    }

    pub fn minor(&self) -> u32 {
        self.minor
    }

    pub fn access(&self) -> &AccessDescriptor {
        &self.access
    }

    /// Snapshot of the line discipline. Readers use this for advisory
    /// decisions; authoritative checks re-take the output lock.
    pub fn termios(&self) -> Termios {
        self.output.lock().termios
    }

    pub fn set_termios(&self, termios: Termios) {
        self.output.lock().termios = termios;
    }

    pub fn winsize(&self) -> Winsize {
        self.output.lock().winsize
    }

    /// Change the window size.
    ///
    /// A no-op when the size is unchanged (no SIGWINCH). Otherwise the
    /// adapter (if active) is resized first, the state is updated, and
    /// SIGWINCH goes to the foreground process group. Adapter resize
    /// failures are logged, never fatal.
    pub fn set_winsize(&self, size: Winsize, processes: &ProcessDirectory) {
        let pgid = {
            let mut st = self.output.lock();
            if st.winsize == size {
                return;
            }
            if let Some(adapter) = st.adapter.as_mut() {
                if let Err(e) = adapter.session.resize(size) {
                    warn!("pty{}: adapter resize failed: {}", self.minor, e);
                }
            }
            st.winsize = size;
            st.foreground_pgid
        };
        if let Some(pgid) = pgid {
            processes.deliver(SignalTarget::Group(pgid), Signal::Winch);
        }
    }

    pub fn session_id(&self) -> Option<Pid> {
        self.output.lock().session_id
    }

    pub fn foreground_pgid(&self) -> Option<Pid> {
        self.output.lock().foreground_pgid
    }

    pub fn set_foreground_pgid(&self, pgid: Pid) {
        self.output.lock().foreground_pgid = Some(pgid);
    }

    pub fn master_pid(&self) -> Option<Pid> {
        self.output.lock().master_pid
    }

    /// Flow-control state; read and toggled without any lock held.
    pub fn output_stopped(&self) -> bool {
        self.output_stopped.load(Ordering::SeqCst)
    }

    pub fn set_output_stopped(&self, stopped: bool) {
        self.output_stopped.store(stopped, Ordering::SeqCst);
    }

    /// Advisory mirror of the render strategy, readable without the
    /// output lock. The authoritative value lives in the output state.
    pub fn adapter_active(&self) -> bool {
        self.adapter_active.load(Ordering::SeqCst)
    }

    pub(crate) fn set_adapter_active(&self, active: bool) {
        self.adapter_active.store(active, Ordering::SeqCst);
    }

    pub(crate) fn read_status(&self) -> ReadStatus {
        self.input.lock().read_status
    }

    pub(crate) fn mark_opened(&self) {
        // Under the output lock at the call site (slave open).
        self.was_opened.store(true, Ordering::SeqCst);
    }

    pub fn was_opened(&self) -> bool {
        self.was_opened.load(Ordering::SeqCst)
    }

    pub fn slave_alive(&self) -> bool {
        self.slave_handles.load(Ordering::SeqCst) > 0
    }

    pub fn master_alive(&self) -> bool {
        self.master_handles.load(Ordering::SeqCst) > 0
    }

    pub(crate) fn attach_master(&self) {
        self.master_handles.fetch_add(1, Ordering::SeqCst);
    }

    /// Returns the number of master handles still open.
    pub(crate) fn detach_master(&self) -> usize {
        self.master_handles.fetch_sub(1, Ordering::SeqCst) - 1
    }

    pub(crate) fn attach_slave(&self) {
        self.slave_handles.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn detach_slave(&self) -> usize {
        self.slave_handles.fetch_sub(1, Ordering::SeqCst) - 1
    }

    /// Shared output path: post-process `data` into `dest` honoring the
    /// flow-control gate. The echo path bypasses the gate so typed input
    /// stays visible while output is stopped.
    ///
    /// Blocking mode polls the stopped flag with a bounded sleep and never
    /// holds the output lock while sleeping. Non-blocking mode returns
    /// partial progress, or `WouldBlock` when nothing was written.
    pub(crate) fn process_output(
        &self,
        dest: &ChannelWriter,
        data: &[u8],
        is_echo: bool,
        nonblocking: bool,
    ) -> Result<usize, PtyError> {
        let mut consumed = 0;
        while consumed < data.len() {
            if !is_echo && self.output_stopped() {
                if nonblocking {
                    return if consumed > 0 {
                        Ok(consumed)
                    } else {
                        Err(PtyError::WouldBlock)
                    };
                }
                while self.output_stopped() {
                    thread::sleep(FLOW_CONTROL_POLL);
                }
            }

            let mut st = self.output.lock();
            if !st.termios.output.contains(crate::termios::OutputFlags::OPOST) {
                // Raw output mode: pass bytes through in bulk.
                let n = OUT_CHUNK.min(data.len() - consumed);
                drop(st);
                write_all(dest, &data[consumed..consumed + n])?;
                consumed += n;
            } else {
                let flags = st.termios.output;
                let mut outbuf = Vec::with_capacity(OUT_CHUNK + 1);
                let took = post_process_chunk(
                    flags,
                    &mut st.column,
                    &data[consumed..],
                    &mut outbuf,
                    OUT_CHUNK,
                );
                drop(st);
                write_all(dest, &outbuf)?;
                consumed += took;
            }
        }
        Ok(consumed)
    }
}

fn write_all(dest: &ChannelWriter, data: &[u8]) -> Result<(), PtyError> {
    match dest.write(data) {
        Ok(_) => Ok(()),
        Err(ChannelError::Closed) | Err(ChannelError::WouldBlock) => Err(PtyError::Io),
    }
}

/// Registry mapping minor numbers to live control blocks.
///
/// Endpoints hold the minor number and a registry handle, never an owning
/// pointer; a block lives until its last handle detaches and no adapter
/// session is pending.
pub struct TtyRegistry {
    processes: Arc<ProcessDirectory>,
    config: Config,
    slots: Mutex<HashMap<u32, Arc<Tty>>>,
    next_minor: AtomicU32,
}

impl TtyRegistry {
    /// Create a registry wired to a process directory. Signal deliveries
    /// to a process with a controlling tty wake that tty's readers, which
    /// is what makes EINTR observable to blocked reads.
    pub fn new(processes: Arc<ProcessDirectory>, config: Config) -> Arc<TtyRegistry> {
        Arc::new_cyclic(|weak: &Weak<TtyRegistry>| {
            let hook = weak.clone();
            processes.set_waker(Box::new(move |_pid, ctty| {
                if let (Some(registry), Some(minor)) = (hook.upgrade(), ctty) {
                    if let Some(tty) = registry.lookup(minor) {
                        tty.input_available.set();
                    }
                }
            }));
            TtyRegistry {
                processes,
                config,
                slots: Mutex::new(HashMap::new()),
                next_minor: AtomicU32::new(0),
            }
        })
    }

    pub fn processes(&self) -> &Arc<ProcessDirectory> {
        &self.processes
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn lookup(&self, minor: u32) -> Option<Arc<Tty>> {
        self.slots.lock().get(&minor).cloned()
    }

    pub fn get(&self, minor: u32) -> Result<Arc<Tty>, PtyError> {
        self.lookup(minor).ok_or(PtyError::NoDevice(minor))
    }

    /// Number of live pty instances.
    pub fn count(&self) -> usize {
        self.slots.lock().len()
    }

    /// Allocate a fresh minor number and insert its control block.
    pub(crate) fn allocate(&self, access: AccessDescriptor) -> Arc<Tty> {
        let minor = self.next_minor.fetch_add(1, Ordering::SeqCst);
        let tty = Arc::new(Tty::new(minor, access));
        self.slots.lock().insert(minor, tty.clone());
        info!("pty{} allocated", minor);
        tty
    }

    /// Drop the slot once nothing references it: both handle counts zero
    /// and no adapter session active or start-pending.
    pub(crate) fn release_if_unused(&self, minor: u32) {
        let mut slots = self.slots.lock();
        let Some(tty) = slots.get(&minor) else {
            return;
        };
        if tty.master_alive() || tty.slave_alive() {
            return;
        }
        if tty.output.lock().adapter.is_some() {
            debug!("pty{}: teardown deferred, adapter still active", minor);
            return;
        }
        slots.remove(&minor);
        info!("pty{} torn down", minor);
    }
}
