//! Slave endpoint of a pty pair.
//!
//! The slave is the terminal-facing view interactive programs hold:
//! `read` implements canonical and VMIN/VTIME non-canonical semantics on
//! top of the data-available event and the input lock, `write` runs the
//! job-control gate and output post-processing, and `ioctl` exposes the
//! window-size/foreground-group surface. Opening a slave from a process
//! that does not own the master goes through the rendezvous protocol.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, trace};

use crate::error::{errno, PtyError};
use crate::host::channel::{ChannelError, ChannelReader, ChannelWriter};
use crate::host::process::{ProcessDirectory, Signal, SignalTarget};
use crate::host::Pid;
use crate::termios::{LocalFlags, Termios};
use crate::tty::{IoctlReply, IoctlRequest, ReadStatus, Tty, TtyRegistry};

/// Upper bound on one read transfer.
const INP_CHUNK: usize = 1024;

/// Bounded wait for the input lock once data is known to be available.
const INPUT_LOCK_WAIT: Duration = Duration::from_secs(1);

/// Slice length for unbounded event waits so cancellation stays
/// responsive; checked only with no lock held.
const WAIT_SLICE: Duration = Duration::from_millis(100);

/// Cooperative cancellation for blocking reads.
///
/// Cancellation is observed between wait steps, never while a lock is
/// held, so a cancelled read leaves no lock acquired and loses no byte
/// already delivered to the caller's buffer.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

enum WaitOutcome {
    Signaled,
    TimedOut,
    Cancelled,
}

/// The terminal-facing side of a pty pair.
pub struct PtySlave {
    registry: Arc<TtyRegistry>,
    processes: Arc<ProcessDirectory>,
    minor: u32,
    pid: Pid,
    nonblocking: AtomicBool,
    input: ChannelReader,
    /// Raw input read end. Unused by the slave itself but held so the
    /// raw wire survives while adapters come and go.
    _input_raw: ChannelReader,
    output: ChannelWriter,
    output_raw: ChannelWriter,
    closed: bool,
}

impl PtySlave {
    /// Open a slave view of pty `minor` for process `pid`.
    ///
    /// The master-owning process duplicates the channel set directly;
    /// everyone else performs a rendezvous round trip with the master's
    /// acceptor and is subject to its access check.
    pub fn open(registry: &Arc<TtyRegistry>, minor: u32, pid: Pid) -> Result<PtySlave, PtyError> {
        let processes = registry.processes().clone();
        let tty = registry.get(minor)?;
        {
            let _st = tty.output.lock();
            tty.mark_opened();
        }

        let handles = if tty.master_pid() == Some(pid) {
            debug!("pty{}: duplicating handles within the master process", minor);
            let seeds = tty.seeds.lock();
            match seeds.as_ref() {
                Some(seeds) => seeds.duplicate_to(pid),
                None => return Err(PtyError::HandlesClosed),
            }
        } else {
            debug!("pty{}: requesting handles via rendezvous", minor);
            let client = tty
                .control
                .lock()
                .clone()
                .ok_or(PtyError::MasterUnreachable)?;
            let timeout = Duration::from_millis(registry.config().rendezvous_timeout_ms);
            let reply = client.call(i64::from(pid), Some(pid), timeout)?;
            match reply.handles {
                Some(handles) => handles,
                None if reply.error == errno::EACCES || reply.error == errno::ESRCH => {
                    return Err(PtyError::AccessDenied)
                }
                None => return Err(PtyError::HandlesClosed),
            }
        };

        tty.attach_slave();
        processes.set_ctty(pid, minor);
        info!("pty{}: slave opened by pid {}", minor, pid);
        Ok(PtySlave {
            registry: registry.clone(),
            processes,
            minor,
            pid,
            nonblocking: AtomicBool::new(false),
            input: handles.input,
            _input_raw: handles.input_raw,
            output: handles.output,
            output_raw: handles.output_raw,
            closed: false,
        })
    }

    pub fn minor(&self) -> u32 {
        self.minor
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn set_nonblocking(&self, nonblocking: bool) {
        self.nonblocking.store(nonblocking, Ordering::SeqCst);
    }

    pub fn termios(&self) -> Result<Termios, PtyError> {
        Ok(self.tty()?.termios())
    }

    pub fn set_termios(&self, termios: Termios) -> Result<(), PtyError> {
        self.tty()?.set_termios(termios);
        Ok(())
    }

    /// Bytes readable right now.
    pub fn bytes_available(&self) -> Result<usize, PtyError> {
        Ok(self.input.peek_available().unwrap_or(0))
    }

    fn tty(&self) -> Result<Arc<Tty>, PtyError> {
        self.registry.get(self.minor)
    }

    /// Read terminal input.
    ///
    /// Canonical mode blocks until the master forwards a line or EOF.
    /// Non-canonical mode follows VMIN/VTIME: both zero polls, VTIME
    /// alone bounds the initial wait, VMIN alone blocks for that many
    /// bytes, and both together (re)start a VTIME inter-byte timer after
    /// the first byte. Returns `Ok(0)` on EOF.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize, PtyError> {
        self.read_cancellable(buf, &CancelToken::new())
    }

    /// [`read`](Self::read) with a cancellation token checked between
    /// wait steps.
    pub fn read_cancellable(
        &self,
        buf: &mut [u8],
        cancel: &CancelToken,
    ) -> Result<usize, PtyError> {
        let tty = self.tty()?;
        self.bg_check(&tty, Signal::Ttin)?;

        let t = tty.termios();
        let nonblocking = self.nonblocking.load(Ordering::SeqCst);
        let mut vmin = 0usize;
        let mut vtime = 0usize;
        let time_to_wait: Option<Duration> = if nonblocking {
            Some(Duration::ZERO)
        } else if t.canonical() {
            None
        } else {
            vmin = (t.chars.min as usize).min(INP_CHUNK);
            vtime = t.chars.time as usize;
            if vmin == 0 && vtime == 0 {
                Some(Duration::ZERO)
            } else if vtime == 0 {
                None
            } else {
                Some(Duration::from_millis(100 * vtime as u64))
            }
        };

        // VMIN=0/VTIME=0 polls report "nothing available" as a zero
        // read; non-blocking and timed reads report EAGAIN instead.
        let poll_mode = !nonblocking && !t.canonical() && vmin == 0 && vtime == 0;

        let mut totalread = 0usize;
        while totalread < buf.len() {
            match self.wait_for_input(&tty, time_to_wait, cancel) {
                WaitOutcome::Signaled => {}
                WaitOutcome::Cancelled => {
                    return if totalread > 0 {
                        Ok(totalread)
                    } else {
                        Err(PtyError::Cancelled)
                    };
                }
                WaitOutcome::TimedOut => {
                    trace!("pty{}: read wait timed out", self.minor);
                    if totalread > 0 {
                        return Ok(totalread);
                    }
                    return if poll_mode {
                        Ok(0)
                    } else {
                        Err(PtyError::WouldBlock)
                    };
                }
            }

            // A pending signal interrupts only if nothing was read yet.
            if self.processes.has_pending(self.pid) {
                if totalread > 0 {
                    return Ok(totalread);
                }
                debug!("pty{}: read interrupted by pending signal", self.minor);
                return Err(PtyError::Interrupted);
            }

            let Some(state) = tty.input.try_lock_for(INPUT_LOCK_WAIT) else {
                // The event fired but the input lock stayed contended.
                // Under a timeout policy this is EAGAIN; a blocking read
                // just retries.
                if time_to_wait.is_some() {
                    return if totalread > 0 {
                        Ok(totalread)
                    } else {
                        Err(PtyError::WouldBlock)
                    };
                }
                continue;
            };

            let available = match self.input.peek_available() {
                Ok(n) => n,
                Err(_) => {
                    let eof = state.read_status == ReadStatus::Eof;
                    drop(state);
                    return if eof { Ok(totalread) } else { Err(PtyError::Io) };
                }
            };

            if available == 0 && vmin == 0 && time_to_wait == Some(Duration::ZERO) {
                let eof = state.read_status == ReadStatus::Eof;
                if !eof {
                    tty.input_available.reset();
                }
                drop(state);
                if eof || totalread > 0 {
                    return Ok(totalread);
                }
                return if nonblocking {
                    Err(PtyError::WouldBlock)
                } else {
                    Ok(0)
                };
            }

            let mut readlen = if available > 0 {
                (buf.len() - totalread).min(INP_CHUNK)
            } else {
                0
            };
            if t.canonical() {
                readlen = readlen.min(available);
            }

            let mut n = 0;
            if readlen > 0 {
                trace!("pty{}: reading {} bytes (vtime {})", self.minor, readlen, vtime);
                match self.input.try_read(&mut buf[totalread..totalread + readlen]) {
                    Ok(m) => n = m,
                    Err(ChannelError::WouldBlock) => {}
                    Err(ChannelError::Closed) => {
                        let eof = state.read_status == ReadStatus::Eof;
                        drop(state);
                        return if eof || totalread > 0 {
                            Ok(totalread)
                        } else {
                            Err(PtyError::Io)
                        };
                    }
                }
            }

            if self.input.peek_available().unwrap_or(0) == 0 {
                tty.input_available.reset();
            }
            let status = state.read_status;
            drop(state);

            totalread += n;

            match status {
                ReadStatus::Failed => return Err(PtyError::Io),
                ReadStatus::Eof => break,
                ReadStatus::Ready => {}
            }
            if t.canonical() || nonblocking {
                if totalread > 0 {
                    break;
                }
                continue;
            }
            if vmin > 0 && totalread >= vmin {
                break;
            }
            if vmin == 0 {
                break;
            }
            // vmin not yet satisfied: wait for more; with vtime set the
            // inter-byte timer restarts on the next wait.
        }
        Ok(totalread)
    }

    /// Write terminal output.
    ///
    /// Background writers with TOSTOP set get SIGTTOU and a `Stopped`
    /// error before any byte moves. With an adapter active the bytes go
    /// raw to the adapter wire; otherwise they are post-processed into
    /// the presentation channel, honoring flow control.
    pub fn write(&self, data: &[u8]) -> Result<usize, PtyError> {
        let tty = self.tty()?;
        self.bg_check(&tty, Signal::Ttou)?;
        trace!("pty{}: write {} bytes", self.minor, data.len());
        if data.is_empty() {
            return Ok(0);
        }
        if tty.adapter_active() {
            if self.nonblocking.load(Ordering::SeqCst) {
                match self.output_raw.try_write(data) {
                    Ok(0) => Err(PtyError::WouldBlock),
                    Ok(n) => Ok(n),
                    Err(ChannelError::WouldBlock) => Err(PtyError::WouldBlock),
                    Err(ChannelError::Closed) => Err(PtyError::Io),
                }
            } else {
                self.output_raw.write(data).map_err(|_| PtyError::Io)
            }
        } else {
            tty.process_output(
                &self.output,
                data,
                false,
                self.nonblocking.load(Ordering::SeqCst),
            )
        }
    }

    /// Terminal control requests.
    ///
    /// Unrecognized requests fall through to the generic handler and
    /// report `NotSupported` instead of failing the call.
    pub fn ioctl(&self, req: IoctlRequest) -> Result<IoctlReply, PtyError> {
        let tty = self.tty()?;

        // A background ioctl with TOSTOP set raises SIGTTOU; the request
        // itself still proceeds.
        if tty.termios().local.contains(LocalFlags::TOSTOP) {
            if let (Some(pgid), Some(fg)) =
                (self.processes.pgid_of(self.pid), tty.foreground_pgid())
            {
                if pgid != fg && self.processes.controlling_tty_of(self.pid) == Some(self.minor) {
                    self.processes.deliver(SignalTarget::Group(pgid), Signal::Ttou);
                }
            }
        }

        match req {
            IoctlRequest::GetWinsize => Ok(IoctlReply::Winsize(tty.winsize())),
            IoctlRequest::SetWinsize(size) => {
                tty.set_winsize(size, &self.processes);
                Ok(IoctlReply::None)
            }
            IoctlRequest::GetForegroundPgid => Ok(IoctlReply::Pgid(tty.foreground_pgid())),
            IoctlRequest::SetForegroundPgid(pgid) => {
                let caller_session = self.processes.session_of(self.pid);
                if caller_session.is_some() && caller_session == tty.session_id() {
                    tty.set_foreground_pgid(pgid);
                    Ok(IoctlReply::None)
                } else {
                    Err(PtyError::NotPermitted)
                }
            }
            IoctlRequest::BytesAvailable => {
                Ok(IoctlReply::Bytes(self.input.peek_available().unwrap_or(0)))
            }
            IoctlRequest::GetPacketMode | IoctlRequest::SetPacketMode(_) => {
                // Master-side requests; the generic handler answers.
                Ok(IoctlReply::NotSupported)
            }
            IoctlRequest::Other(cmd) => {
                debug!("pty{}: unsupported slave ioctl {:#x}", self.minor, cmd);
                Ok(IoctlReply::NotSupported)
            }
        }
    }

    /// Close this slave view, releasing its channels. The last slave
    /// close hangs up the session if its leader is known.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let Some(tty) = self.registry.lookup(self.minor) else {
            return;
        };
        debug!("pty{}: slave closing (pid {})", self.minor, self.pid);
        if tty.detach_slave() == 0 {
            if let Some(sid) = tty.session_id() {
                debug!("pty{}: last slave closed, hangup to session {}", self.minor, sid);
                self.processes.deliver(SignalTarget::Process(sid), Signal::Hup);
            }
        }
        self.registry.release_if_unused(self.minor);
    }

    /// Job-control gate: a background process touching the terminal gets
    /// SIGTTIN (reads) or, with TOSTOP, SIGTTOU (writes).
    fn bg_check(&self, tty: &Tty, signal: Signal) -> Result<(), PtyError> {
        let Some(pgid) = self.processes.pgid_of(self.pid) else {
            return Ok(());
        };
        if self.processes.controlling_tty_of(self.pid) != Some(self.minor) {
            return Ok(());
        }
        let fg = tty.foreground_pgid();
        if fg.is_none() || fg == Some(pgid) {
            return Ok(());
        }
        if signal == Signal::Ttou && !tty.termios().local.contains(LocalFlags::TOSTOP) {
            return Ok(());
        }
        debug!(
            "pty{}: background {:?} from pgid {} (foreground {:?})",
            self.minor, signal, pgid, fg
        );
        self.processes.deliver(SignalTarget::Group(pgid), signal);
        Err(PtyError::Stopped)
    }

    /// Wait for the data-available event, bounded by the read policy.
    /// Unbounded waits are sliced so the cancel token is honored; the
    /// token is only ever checked with no lock held.
    fn wait_for_input(
        &self,
        tty: &Tty,
        timeout: Option<Duration>,
        cancel: &CancelToken,
    ) -> WaitOutcome {
        let deadline = timeout.map(|d| Instant::now() + d);
        loop {
            if cancel.is_cancelled() {
                return WaitOutcome::Cancelled;
            }
            let slice = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return if tty.input_available.is_set() {
                            WaitOutcome::Signaled
                        } else {
                            WaitOutcome::TimedOut
                        };
                    }
                    (deadline - now).min(WAIT_SLICE)
                }
                None => WAIT_SLICE,
            };
            if tty.input_available.wait(Some(slice)) {
                return WaitOutcome::Signaled;
            }
        }
    }
}

impl Drop for PtySlave {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::host::process::Credentials;
    use crate::master::PtyMaster;
    use crate::termios::Winsize;
    use std::thread;

    const MASTER_PID: Pid = 1;
    const SHELL_PID: Pid = 2;
    const BG_PID: Pid = 3;
    const FOREIGN_PID: Pid = 4;

    fn registry() -> Arc<TtyRegistry> {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
        let processes = Arc::new(ProcessDirectory::new());
        let creds = Credentials { uid: 500, gid: 500 };
        processes.register(MASTER_PID, MASTER_PID, MASTER_PID, creds);
        processes.register(SHELL_PID, SHELL_PID, MASTER_PID, creds);
        processes.register(BG_PID, BG_PID, MASTER_PID, creds);
        // Same uid, different session: passes the access check but not
        // the same-session checks.
        processes.register(FOREIGN_PID, FOREIGN_PID, FOREIGN_PID, creds);
        TtyRegistry::new(processes, Config::default())
    }

    fn open_pair(registry: &Arc<TtyRegistry>) -> (PtyMaster, PtySlave) {
        let master = PtyMaster::open(registry, MASTER_PID).unwrap();
        let slave = PtySlave::open(registry, master.minor(), SHELL_PID).unwrap();
        (master, slave)
    }

    fn set_raw(slave: &PtySlave) {
        slave.set_termios(Termios::raw()).unwrap();
    }

    #[test]
    fn vmin_one_returns_on_first_byte() {
        let registry = registry();
        let (master, slave) = open_pair(&registry);
        set_raw(&slave);

        let writer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            master.write(b"x").unwrap();
            master
        });

        let mut buf = [0u8; 8];
        let n = slave.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"x");
        writer.join().unwrap();
    }

    #[test]
    fn vmin_blocks_until_enough_bytes() {
        let registry = registry();
        let (master, slave) = open_pair(&registry);
        let mut termios = Termios::raw();
        termios.chars.min = 3;
        slave.set_termios(termios).unwrap();

        let writer = thread::spawn(move || {
            master.write(b"ab").unwrap();
            thread::sleep(Duration::from_millis(50));
            master.write(b"c").unwrap();
            master
        });

        let mut buf = [0u8; 8];
        let n = slave.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"abc");
        writer.join().unwrap();
    }

    #[test]
    fn vtime_alone_bounds_the_initial_wait() {
        let registry = registry();
        let (_master, slave) = open_pair(&registry);
        let mut termios = Termios::raw();
        termios.chars.min = 0;
        termios.chars.time = 1; // one decisecond
        slave.set_termios(termios).unwrap();

        let start = Instant::now();
        let mut buf = [0u8; 8];
        assert_eq!(slave.read(&mut buf), Err(PtyError::WouldBlock));
        assert!(start.elapsed() >= Duration::from_millis(90));
    }

    #[test]
    fn vmin_zero_vtime_zero_polls() {
        let registry = registry();
        let (master, slave) = open_pair(&registry);
        let mut termios = Termios::raw();
        termios.chars.min = 0;
        slave.set_termios(termios).unwrap();

        let mut buf = [0u8; 8];
        assert_eq!(slave.read(&mut buf).unwrap(), 0);

        master.write(b"now").unwrap();
        let n = slave.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"now");
    }

    #[test]
    fn nonblocking_read_reports_eagain() {
        let registry = registry();
        let (_master, slave) = open_pair(&registry);
        set_raw(&slave);
        slave.set_nonblocking(true);
        let mut buf = [0u8; 8];
        assert_eq!(slave.read(&mut buf), Err(PtyError::WouldBlock));
    }

    #[test]
    fn last_master_close_wakes_reader_with_eof_and_hangs_up() {
        let registry = registry();
        let (master, slave) = open_pair(&registry);
        set_raw(&slave);

        let reader = thread::spawn(move || {
            let mut buf = [0u8; 8];
            let result = slave.read(&mut buf);
            (slave, result)
        });

        thread::sleep(Duration::from_millis(50));
        drop(master);

        let (slave, result) = reader.join().unwrap();
        assert_eq!(result.unwrap(), 0);
        // SIGHUP reached the session leader exactly once.
        assert_eq!(
            registry.processes().take_pending(MASTER_PID),
            vec![Signal::Hup]
        );
        drop(slave);
    }

    #[test]
    fn canonical_eof_reads_as_zero() {
        let registry = registry();
        let (master, slave) = open_pair(&registry);
        master.write(b"\x04").unwrap(); // VEOF with an empty line
        let mut buf = [0u8; 8];
        assert_eq!(slave.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn background_write_with_tostop_is_stopped() {
        let registry = registry();
        let (master, fg_slave) = open_pair(&registry);
        let bg_slave = PtySlave::open(&registry, master.minor(), BG_PID).unwrap();

        let mut termios = fg_slave.termios().unwrap();
        termios.local.insert(LocalFlags::TOSTOP);
        fg_slave.set_termios(termios).unwrap();
        master
            .ioctl(IoctlRequest::SetForegroundPgid(SHELL_PID))
            .unwrap();

        assert_eq!(bg_slave.write(b"noise"), Err(PtyError::Stopped));
        assert_eq!(
            registry.processes().take_pending(BG_PID),
            vec![Signal::Ttou]
        );
        // Nothing reached the presentation stream.
        master.set_nonblocking(true);
        let mut buf = [0u8; 8];
        assert_eq!(master.read(&mut buf), Err(PtyError::WouldBlock));
    }

    #[test]
    fn background_write_without_tostop_is_allowed() {
        let registry = registry();
        let (master, _fg_slave) = open_pair(&registry);
        let bg_slave = PtySlave::open(&registry, master.minor(), BG_PID).unwrap();
        master
            .ioctl(IoctlRequest::SetForegroundPgid(SHELL_PID))
            .unwrap();
        assert_eq!(bg_slave.write(b"ok\n").unwrap(), 3);
    }

    #[test]
    fn background_read_raises_sigttin() {
        let registry = registry();
        let (master, _fg_slave) = open_pair(&registry);
        let bg_slave = PtySlave::open(&registry, master.minor(), BG_PID).unwrap();
        master
            .ioctl(IoctlRequest::SetForegroundPgid(SHELL_PID))
            .unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(bg_slave.read(&mut buf), Err(PtyError::Stopped));
        assert_eq!(
            registry.processes().take_pending(BG_PID),
            vec![Signal::Ttin]
        );
    }

    #[test]
    fn pending_signal_interrupts_blocked_read() {
        let registry = registry();
        let (_master, slave) = open_pair(&registry);
        set_raw(&slave);

        let processes = registry.processes().clone();
        let reader = thread::spawn(move || {
            let mut buf = [0u8; 8];
            slave.read(&mut buf)
        });

        thread::sleep(Duration::from_millis(50));
        processes.deliver(SignalTarget::Process(SHELL_PID), Signal::Int);
        assert_eq!(reader.join().unwrap(), Err(PtyError::Interrupted));
    }

    #[test]
    fn cancel_token_aborts_blocked_read() {
        let registry = registry();
        let (_master, slave) = open_pair(&registry);
        set_raw(&slave);

        let cancel = CancelToken::new();
        let observer = cancel.clone();
        let reader = thread::spawn(move || {
            let mut buf = [0u8; 8];
            slave.read_cancellable(&mut buf, &observer)
        });

        thread::sleep(Duration::from_millis(50));
        cancel.cancel();
        assert_eq!(reader.join().unwrap(), Err(PtyError::Cancelled));
    }

    #[test]
    fn foreground_pgid_requires_same_session() {
        let registry = registry();
        let (master, slave) = open_pair(&registry);
        let foreign = PtySlave::open(&registry, master.minor(), FOREIGN_PID).unwrap();

        assert_eq!(
            slave.ioctl(IoctlRequest::SetForegroundPgid(SHELL_PID)).unwrap(),
            IoctlReply::None
        );
        assert_eq!(
            foreign.ioctl(IoctlRequest::SetForegroundPgid(FOREIGN_PID)),
            Err(PtyError::NotPermitted)
        );
        assert_eq!(
            slave.ioctl(IoctlRequest::GetForegroundPgid).unwrap(),
            IoctlReply::Pgid(Some(SHELL_PID))
        );
    }

    #[test]
    fn winsize_ioctl_signals_foreground_group() {
        let registry = registry();
        let (master, slave) = open_pair(&registry);
        master
            .ioctl(IoctlRequest::SetForegroundPgid(SHELL_PID))
            .unwrap();

        let size = Winsize {
            rows: 30,
            cols: 100,
            ..Winsize::default()
        };
        slave.ioctl(IoctlRequest::SetWinsize(size)).unwrap();
        assert_eq!(
            slave.ioctl(IoctlRequest::GetWinsize).unwrap(),
            IoctlReply::Winsize(size)
        );
        assert_eq!(
            registry.processes().take_pending(SHELL_PID),
            vec![Signal::Winch]
        );

        // Same size again: idempotent, no second signal.
        slave.ioctl(IoctlRequest::SetWinsize(size)).unwrap();
        assert!(registry.processes().take_pending(SHELL_PID).is_empty());
    }

    #[test]
    fn bytes_available_counts_forwarded_input() {
        let registry = registry();
        let (master, slave) = open_pair(&registry);
        set_raw(&slave);
        master.write(b"abc").unwrap();
        assert_eq!(
            slave.ioctl(IoctlRequest::BytesAvailable).unwrap(),
            IoctlReply::Bytes(3)
        );
    }

    #[test]
    fn denied_rendezvous_surfaces_as_access_error() {
        let registry = registry();
        let processes = registry.processes();
        processes.register(99, 99, 99, Credentials { uid: 666, gid: 666 });
        let (master, _slave) = open_pair(&registry);
        assert_eq!(
            PtySlave::open(&registry, master.minor(), 99).err(),
            Some(PtyError::AccessDenied)
        );
    }

    #[test]
    fn unrecognized_ioctl_falls_through() {
        let registry = registry();
        let (_master, slave) = open_pair(&registry);
        assert_eq!(
            slave.ioctl(IoctlRequest::Other(0x5401)).unwrap(),
            IoctlReply::NotSupported
        );
    }
}
