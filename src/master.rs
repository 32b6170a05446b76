//! Master endpoint of a pty pair.
//!
//! The master owns the "physical" ends of the wire: it accepts terminal
//! input (keystrokes) and forwards it to the slave's read side, consumes
//! slave output for presentation, arbitrates echo against process output,
//! and runs two background threads for the lifetime of the endpoint:
//!
//! - the **forwarding thread** relays raw slave output to the
//!   presentation channel (sanitizing encoding, scrubbing adapter-private
//!   sequences, post-processing unless an adapter already rendered)
//! - the **rendezvous thread** serves handle-duplication requests from
//!   processes that want to open a slave (see [`crate::rendezvous`])

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, trace};

use crate::discipline::{SequenceScrubber, Utf8Sanitizer, OUT_CHUNK};
use crate::error::PtyError;
use crate::host::channel::{create_pair, ChannelError, ChannelReader, ChannelWriter};
use crate::host::process::{Credentials, ProcessDirectory, Signal, SignalTarget};
use crate::host::Pid;
use crate::pcon::{AdapterIo, AdapterState, ConsoleAdapter, RenderStrategy};
use crate::rendezvous::{acceptor_loop, control_pair, SHUTDOWN_SENTINEL};
use crate::termios::{InputFlags, LocalFlags, Termios};
use crate::tty::{
    AccessDescriptor, IoctlReply, IoctlRequest, ReadStatus, SlaveSeeds, Tty, TtyRegistry,
};

/// Poll interval of a blocking master read waiting for output.
const READ_POLL: Duration = Duration::from_millis(10);

/// How often the forwarding thread rechecks its shutdown flag.
const FWD_IDLE: Duration = Duration::from_millis(50);

/// Packet-mode tag prefixed to data reads (TIOCPKT_DATA).
const PACKET_DATA_TAG: u8 = 0;

/// Outcome of flushing the readahead buffer toward the slave.
enum AcceptStatus {
    /// Everything pending reached the slave's read channel.
    Flushed,
    /// The channel filled up; the remainder stays buffered.
    Partial,
}

/// The controlling side of a pty pair.
pub struct PtyMaster {
    registry: Arc<TtyRegistry>,
    processes: Arc<ProcessDirectory>,
    minor: u32,
    pid: Pid,
    nonblocking: AtomicBool,
    pktmode: AtomicBool,
    to_slave: ChannelWriter,
    to_slave_raw: ChannelWriter,
    from_slave: ChannelReader,
    echo_r: ChannelReader,
    echo_w: ChannelWriter,
    /// Input accepted but not yet flushed to the slave.
    readahead: Mutex<VecDeque<u8>>,
    /// Canonical-mode line under construction.
    line: Mutex<Vec<u8>>,
    fwd_stop: Arc<AtomicBool>,
    fwd_thread: Option<JoinHandle<()>>,
    rdv_thread: Option<JoinHandle<()>>,
    closed: bool,
}

impl PtyMaster {
    /// Allocate a new pty and open its master side for `pid`.
    pub fn open(registry: &Arc<TtyRegistry>, pid: Pid) -> Result<PtyMaster, PtyError> {
        let processes = registry.processes().clone();
        let creds = processes
            .credentials_of(pid)
            .unwrap_or(Credentials { uid: 0, gid: 0 });
        let tty = registry.allocate(AccessDescriptor::new(creds.uid, creds.gid));
        let minor = tty.minor();
        let cap = registry.config().channel_capacity;

        // Input wires (master writes, slave reads), cooked and raw.
        let (from_master, to_slave) = create_pair(cap, pid);
        let (from_master_raw, to_slave_raw) = create_pair(cap, pid);
        // Output wires: raw (into the forwarding thread) and
        // presentation (out of it, read back by this endpoint).
        let (from_slave_raw, to_master_raw) = create_pair(cap, pid);
        let (from_slave, to_master) = create_pair(cap, pid);
        // Echo loop, master-private.
        let (echo_r, echo_w) = create_pair(cap, pid);

        let fwd_dest = to_master.duplicate_to(pid);
        {
            let mut st = tty.output.lock();
            st.master_pid = Some(pid);
            st.session_id = processes.session_of(pid);
        }
        *tty.seeds.lock() = Some(SlaveSeeds {
            input: from_master,
            input_raw: from_master_raw,
            output_raw: to_master_raw,
            output: to_master,
        });

        let (client, request_rx) = control_pair();
        *tty.control.lock() = Some(client);
        let rdv_thread = {
            let tty = tty.clone();
            let processes = processes.clone();
            thread::spawn(move || acceptor_loop(request_rx, tty, processes, pid))
        };

        let fwd_stop = Arc::new(AtomicBool::new(false));
        let fwd_thread = {
            let tty = tty.clone();
            let stop = fwd_stop.clone();
            thread::spawn(move || forwarding_loop(tty, from_slave_raw, fwd_dest, stop))
        };

        tty.attach_master();
        info!("pty{} opened by master pid {}", minor, pid);
        Ok(PtyMaster {
            registry: registry.clone(),
            processes,
            minor,
            pid,
            nonblocking: AtomicBool::new(false),
            pktmode: AtomicBool::new(false),
            to_slave,
            to_slave_raw,
            from_slave,
            echo_r,
            echo_w,
            readahead: Mutex::new(VecDeque::new()),
            line: Mutex::new(Vec::new()),
            fwd_stop,
            fwd_thread: Some(fwd_thread),
            rdv_thread: Some(rdv_thread),
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

    fn tty(&self) -> Result<Arc<Tty>, PtyError> {
        self.registry.get(self.minor)
    }

    /// Accept terminal input (keystrokes) and forward it to the slave.
    ///
    /// With an adapter active the bytes go to the raw input wire
    /// untouched; otherwise the input side of the line discipline runs
    /// here: CR/NL translation, signal characters, flow control, echo and
    /// canonical line collection.
    ///
    /// Returns `Ok(0)` when the slave's read channel filled up before
    /// everything was flushed; the remainder is retained and flushed on
    /// later calls, so the caller must not resubmit the data.
    pub fn write(&self, data: &[u8]) -> Result<usize, PtyError> {
        let tty = self.tty()?;
        if data.is_empty() {
            return Ok(0);
        }

        if tty.adapter_active() {
            {
                let _input = tty.input.lock();
                self.to_slave_raw.write(data).map_err(|_| PtyError::Io)?;
            }
            let mut st = tty.output.lock();
            if let Some(adapter) = st.adapter.as_mut() {
                adapter.start_pending = false;
            }
            return Ok(data.len());
        }

        let t = tty.termios();
        let echo_on = t.local.contains(LocalFlags::ECHO);
        let mut echo_buf: Vec<u8> = Vec::new();
        let mut flush = false;
        {
            let mut ra = self.readahead.lock();
            let mut line = self.line.lock();
            for &raw in data {
                let mut byte = raw;
                if byte == b'\r' {
                    if t.input.contains(InputFlags::IGNCR) {
                        continue;
                    }
                    if t.input.contains(InputFlags::ICRNL) {
                        byte = b'\n';
                    }
                } else if byte == b'\n' && t.input.contains(InputFlags::INLCR) {
                    byte = b'\r';
                }

                if t.local.contains(LocalFlags::ISIG) {
                    if byte == t.chars.intr {
                        self.raise_foreground(&tty, Signal::Int);
                        continue;
                    }
                    if byte == t.chars.quit {
                        self.raise_foreground(&tty, Signal::Quit);
                        continue;
                    }
                }
                if t.input.contains(InputFlags::IXON) {
                    if byte == t.chars.stop {
                        tty.set_output_stopped(true);
                        continue;
                    }
                    if byte == t.chars.start {
                        tty.set_output_stopped(false);
                        continue;
                    }
                }

                if t.canonical() {
                    if byte == t.chars.eof {
                        ra.extend(line.drain(..));
                        flush = true;
                    } else if byte == t.chars.erase {
                        if line.pop().is_some() && echo_on {
                            echo_buf.extend_from_slice(b"\x08 \x08");
                        }
                    } else if byte == t.chars.kill {
                        let erased = line.len();
                        line.clear();
                        if echo_on {
                            for _ in 0..erased {
                                echo_buf.extend_from_slice(b"\x08 \x08");
                            }
                        }
                    } else {
                        line.push(byte);
                        if echo_on {
                            echo_buf.push(byte);
                        }
                        if byte == b'\n' || (t.chars.eol != 0 && byte == t.chars.eol) {
                            ra.extend(line.drain(..));
                            flush = true;
                        }
                    }
                } else {
                    ra.push_back(byte);
                    if echo_on {
                        echo_buf.push(byte);
                    }
                    flush = true;
                }
            }
        }

        if !echo_buf.is_empty() {
            self.doecho(&tty, &echo_buf);
        }
        if !flush {
            return Ok(data.len());
        }
        match self.accept_input(&tty)? {
            AcceptStatus::Flushed => Ok(data.len()),
            AcceptStatus::Partial => Ok(0),
        }
    }

    /// Read presentation output, echo data taking priority so typed input
    /// appears before delayed process output.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize, PtyError> {
        let tty = self.tty()?;
        self.process_slave_output(&tty, buf, false)
    }

    /// Discard pending slave output and echo data without copying it out.
    pub fn drain_output(&self) -> Result<(), PtyError> {
        let tty = self.tty()?;
        self.process_slave_output(&tty, &mut [], true).map(|_| ())
    }

    /// True when this master is the only remaining reference to the pty
    /// and a slave has existed at some point. "No slave ever opened" is
    /// not EOF.
    pub fn hit_eof(&self) -> Result<bool, PtyError> {
        let tty = self.tty()?;
        Ok(tty.was_opened() && !tty.slave_alive())
    }

    pub fn ioctl(&self, req: IoctlRequest) -> Result<IoctlReply, PtyError> {
        let tty = self.tty()?;
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
            IoctlRequest::GetPacketMode => {
                Ok(IoctlReply::PacketMode(self.pktmode.load(Ordering::SeqCst)))
            }
            IoctlRequest::SetPacketMode(on) => {
                self.pktmode.store(on, Ordering::SeqCst);
                Ok(IoctlReply::None)
            }
            IoctlRequest::BytesAvailable => Ok(IoctlReply::Bytes(
                self.from_slave.peek_available().unwrap_or(0),
            )),
            IoctlRequest::Other(cmd) => {
                debug!("pty{}: unsupported master ioctl {:#x}", self.minor, cmd);
                Ok(IoctlReply::NotSupported)
            }
        }
    }

    /// Try to delegate rendering to a host console adapter.
    ///
    /// Returns whether an adapter session is active afterwards. Failure to
    /// activate is a silent fallback to direct rendering, never an error.
    pub fn activate_adapter(&self, adapter: &dyn ConsoleAdapter) -> Result<bool, PtyError> {
        let tty = self.tty()?;
        if !self.registry.config().adapter.enabled {
            debug!("pty{}: console adapter disabled by policy", self.minor);
            return Ok(false);
        }
        let io = {
            let seeds = tty.seeds.lock();
            let Some(seeds) = seeds.as_ref() else {
                return Ok(false);
            };
            AdapterIo {
                input: seeds.input_raw.duplicate_to(self.pid),
                output: seeds.output_raw.duplicate_to(self.pid),
            }
        };

        let mut stale = None;
        let mut st = tty.output.lock();
        if let Some(existing) = st.adapter.as_ref() {
            if self.processes.exists(existing.owner_pid) {
                debug!(
                    "pty{}: adapter affinity held by live pid {}",
                    self.minor, existing.owner_pid
                );
                return Ok(false);
            }
            stale = st.adapter.take();
        }
        let size = st.winsize;
        match adapter.open(size, io) {
            Ok(session) => {
                st.adapter = Some(AdapterState {
                    session,
                    owner_pid: self.pid,
                    start_pending: true,
                    last_activity: Instant::now(),
                });
                st.strategy = RenderStrategy::AdapterRelayed;
                drop(st);
                drop(stale);
                tty.set_adapter_active(true);
                info!("pty{}: console adapter activated", self.minor);
                Ok(true)
            }
            Err(e) => {
                drop(st);
                drop(stale);
                debug!(
                    "pty{}: adapter activation failed, using direct rendering: {}",
                    self.minor, e
                );
                Ok(false)
            }
        }
    }

    /// Release the adapter session (if any) and return to direct
    /// rendering. Safe to call concurrently; the session is released
    /// exactly once.
    pub fn deactivate_adapter(&self) -> Result<(), PtyError> {
        let tty = self.tty()?;
        let released = {
            let mut st = tty.output.lock();
            st.strategy = RenderStrategy::DirectPostProcessing;
            st.adapter.take()
        };
        tty.set_adapter_active(false);
        if released.is_some() {
            info!("pty{}: console adapter released", self.minor);
        }
        drop(released);
        self.registry.release_if_unused(self.minor);
        Ok(())
    }

    /// Close the master side. The last master close wakes blocked slave
    /// readers with EOF and hangs up the session.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let Some(tty) = self.registry.lookup(self.minor) else {
            return;
        };
        debug!("pty{}: master closing", self.minor);

        // Stop the rendezvous acceptor; the sentinel is honored because
        // it carries our verified identity.
        let client = tty.control.lock().clone();
        if let Some(client) = client {
            let timeout = Duration::from_millis(self.registry.config().rendezvous_timeout_ms);
            let _ = client.call(SHUTDOWN_SENTINEL, Some(self.pid), timeout);
        }
        if tty.master_pid() == Some(self.pid) {
            *tty.control.lock() = None;
            *tty.seeds.lock() = None;
        }
        if let Some(handle) = self.rdv_thread.take() {
            let _ = handle.join();
        }

        self.fwd_stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.fwd_thread.take() {
            let _ = handle.join();
        }

        // An adapter we own dies with us.
        let released = {
            let mut st = tty.output.lock();
            if st.adapter.as_ref().map(|a| a.owner_pid) == Some(self.pid) {
                st.strategy = RenderStrategy::DirectPostProcessing;
                st.adapter.take()
            } else {
                None
            }
        };
        if released.is_some() {
            tty.set_adapter_active(false);
        }
        drop(released);

        if tty.detach_master() == 0 {
            info!("pty{}: closing last master", self.minor);
            tty.input.lock().read_status = ReadStatus::Eof;
            if let Some(sid) = tty.session_id() {
                self.processes.deliver(SignalTarget::Process(sid), Signal::Hup);
            }
            tty.input_available.set();
        }
        self.registry.release_if_unused(self.minor);
    }

    fn raise_foreground(&self, tty: &Tty, signal: Signal) {
        if let Some(pgid) = tty.foreground_pgid() {
            self.processes.deliver(SignalTarget::Group(pgid), signal);
        }
    }

    /// Echo bytes to the presentation stream through the echo channel.
    /// Failures are logged, never propagated.
    fn doecho(&self, tty: &Tty, bytes: &[u8]) {
        if let Err(e) = tty.process_output(&self.echo_w, bytes, true, false) {
            debug!("pty{}: write to echo channel failed: {}", self.minor, e);
        }
    }

    /// Flush the readahead buffer into the slave's read channel.
    ///
    /// An empty readahead records the EOF sentinel for slave readers
    /// (canonical VEOF with nothing buffered). Runs under the input lock;
    /// always signals the data-available event.
    fn accept_input(&self, tty: &Tty) -> Result<AcceptStatus, PtyError> {
        let mut input = tty.input.lock();
        let mut ra = self.readahead.lock();
        let status;
        if ra.is_empty() {
            debug!("pty{}: sending EOF to slave", self.minor);
            input.read_status = ReadStatus::Eof;
            status = Ok(AcceptStatus::Flushed);
        } else {
            let dest = if tty.adapter_active() {
                &self.to_slave_raw
            } else {
                &self.to_slave
            };
            let result = {
                ra.make_contiguous();
                let (pending, _) = ra.as_slices();
                dest.try_write(pending)
            };
            match result {
                Ok(n) => {
                    input.read_status = ReadStatus::Ready;
                    ra.drain(..n);
                    if ra.is_empty() {
                        status = Ok(AcceptStatus::Flushed);
                    } else {
                        debug!("pty{}: to-slave channel full", self.minor);
                        status = Ok(AcceptStatus::Partial);
                    }
                }
                Err(ChannelError::WouldBlock) => {
                    input.read_status = ReadStatus::Ready;
                    status = Ok(AcceptStatus::Partial);
                }
                Err(ChannelError::Closed) => {
                    input.read_status = ReadStatus::Failed;
                    status = Err(PtyError::Io);
                }
            }
        }
        tty.input_available.set();
        status
    }

    /// Retry a pending readahead flush (non-canonical input only).
    fn flush_to_slave(&self, tty: &Tty) {
        let pending = !self.readahead.lock().is_empty();
        if pending && !tty.termios().canonical() {
            let _ = self.accept_input(tty);
        }
    }

    /// The master-side read loop.
    ///
    /// Echo data is drained preferentially; otherwise up to one chunk of
    /// presentation output is returned. In packet mode the payload is
    /// prefixed with a one-byte tag. Broken-channel conditions read as
    /// EOF; "all slaves gone" reads as EIO.
    fn process_slave_output(
        &self,
        tty: &Tty,
        buf: &mut [u8],
        discard: bool,
    ) -> Result<usize, PtyError> {
        self.flush_to_slave(tty);
        if buf.is_empty() && !discard {
            return Ok(0);
        }
        loop {
            // Poll phase: echo channel first, then slave output.
            let mut from_echo = false;
            loop {
                match self.echo_r.peek_available() {
                    Ok(n) if n > 0 => {
                        from_echo = true;
                        break;
                    }
                    Ok(_) => {}
                    Err(_) => return Ok(0),
                }
                match self.from_slave.peek_available() {
                    Ok(n) if n > 0 => break,
                    Ok(_) => {}
                    // Peer gone on the read side is EOF, not an error.
                    Err(_) => return Ok(0),
                }
                if tty.was_opened() && !tty.slave_alive() {
                    return Err(PtyError::Io);
                }
                if discard || tty.termios().local.contains(LocalFlags::FLUSHO) {
                    return Ok(0);
                }
                if self.nonblocking.load(Ordering::SeqCst) {
                    return Err(PtyError::WouldBlock);
                }
                if self.processes.has_pending(self.pid) {
                    return Err(PtyError::Interrupted);
                }
                thread::sleep(READ_POLL);
                self.flush_to_slave(tty);
            }

            let source = if from_echo {
                &self.echo_r
            } else {
                &self.from_slave
            };

            if discard {
                let mut scratch = [0u8; OUT_CHUNK];
                let n = source.try_read(&mut scratch).unwrap_or(0);
                trace!("pty{}: discarded {} output bytes", self.minor, n);
                continue;
            }

            let mut off = 0;
            let mut rlen = buf.len();
            if self.pktmode.load(Ordering::SeqCst) {
                buf[0] = PACKET_DATA_TAG;
                off = 1;
                rlen -= 1;
                if rlen == 0 {
                    return Ok(1);
                }
            }
            rlen = rlen.min(OUT_CHUNK);
            match source.try_read(&mut buf[off..off + rlen]) {
                Ok(0) | Err(ChannelError::WouldBlock) => continue,
                Ok(n) => return Ok(off + n),
                Err(ChannelError::Closed) => return Ok(0),
            }
        }
    }
}

impl Drop for PtyMaster {
    fn drop(&mut self) {
        self.close();
    }
}

/// Relay raw slave output to the presentation channel for the lifetime
/// of the master endpoint.
fn forwarding_loop(
    tty: Arc<Tty>,
    source: ChannelReader,
    dest: ChannelWriter,
    stop: Arc<AtomicBool>,
) {
    let mut buf = [0u8; 4096];
    let mut scrubber = SequenceScrubber::new();
    let mut sanitizer = Utf8Sanitizer::new();
    trace!("pty{}: forwarding thread started", tty.minor());
    loop {
        if stop.load(Ordering::SeqCst) {
            break;
        }
        let n = match source.read_timeout(&mut buf, FWD_IDLE) {
            Ok(n) => n,
            Err(ChannelError::WouldBlock) => continue,
            Err(ChannelError::Closed) => break,
        };
        if n == 0 {
            continue;
        }
        let strategy = {
            let mut st = tty.output.lock();
            if let Some(adapter) = st.adapter.as_mut() {
                adapter.last_activity = Instant::now();
            }
            st.strategy
        };
        let clean = sanitizer.feed(&buf[..n]);
        let result = match strategy {
            RenderStrategy::AdapterRelayed => {
                // The adapter already rendered; drop its private control
                // sequences and pass everything else through untouched.
                let mut scrubbed = Vec::with_capacity(clean.len());
                scrubber.feed(&clean, &mut scrubbed);
                dest.write(&scrubbed).map(|_| ()).map_err(|_| PtyError::Io)
            }
            RenderStrategy::DirectPostProcessing => {
                tty.process_output(&dest, &clean, false, false).map(|_| ())
            }
        };
        if let Err(e) = result {
            debug!("pty{}: forwarding write failed: {}", tty.minor(), e);
            break;
        }
    }
    trace!("pty{}: forwarding thread exiting", tty.minor());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::host::process::ProcessDirectory;
    use crate::pcon::testing::EchoAdapter;
    use crate::slave::PtySlave;
    use crate::termios::Winsize;

    const MASTER_PID: Pid = 1;
    const SHELL_PID: Pid = 2;

    fn registry() -> Arc<TtyRegistry> {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
        let processes = Arc::new(ProcessDirectory::new());
        processes.register(MASTER_PID, MASTER_PID, MASTER_PID, Credentials { uid: 500, gid: 500 });
        processes.register(SHELL_PID, SHELL_PID, MASTER_PID, Credentials { uid: 500, gid: 500 });
        TtyRegistry::new(processes, Config::default())
    }

    fn open_pair(registry: &Arc<TtyRegistry>) -> (PtyMaster, PtySlave) {
        let master = PtyMaster::open(registry, MASTER_PID).unwrap();
        let slave = PtySlave::open(registry, master.minor(), SHELL_PID).unwrap();
        (master, slave)
    }

    #[test]
    fn slave_write_reaches_master_with_onlcr() {
        let registry = registry();
        let (master, slave) = open_pair(&registry);
        slave.write(b"hi\n").unwrap();
        let mut buf = [0u8; 16];
        let n = master.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"hi\r\n");
    }

    #[test]
    fn canonical_input_is_line_buffered_and_echoed() {
        let registry = registry();
        let (master, slave) = open_pair(&registry);

        // Nothing is forwarded until the line terminator arrives.
        assert_eq!(master.write(b"hi").unwrap(), 2);
        assert_eq!(slave.bytes_available().unwrap(), 0);

        assert_eq!(master.write(b"\r").unwrap(), 1);
        let mut buf = [0u8; 16];
        let n = slave.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"hi\n");

        // The echo comes back post-processed.
        let n = master.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"hi\r\n");
    }

    #[test]
    fn erase_and_kill_edit_the_pending_line() {
        let registry = registry();
        let (master, slave) = open_pair(&registry);
        master.write(b"ab\x7fc\n").unwrap();
        let mut buf = [0u8; 16];
        let n = slave.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"ac\n");

        master.write(b"junk\x15ok\n").unwrap();
        let n = slave.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"ok\n");
    }

    #[test]
    fn echo_takes_priority_over_slave_output() {
        let registry = registry();
        let (master, slave) = open_pair(&registry);
        let mut termios = master.termios().unwrap();
        termios.local.remove(crate::termios::LocalFlags::ICANON);
        master.set_termios(termios).unwrap();

        // Slave output lands first, typed input afterwards; the echo
        // must still be read first.
        slave.write(b"output").unwrap();
        master.write(b"typed").unwrap();

        let mut buf = [0u8; 16];
        let n = master.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"typed");
        let n = master.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"output");
    }

    #[test]
    fn interrupt_char_signals_foreground_group() {
        let registry = registry();
        let (master, slave) = open_pair(&registry);
        master
            .ioctl(IoctlRequest::SetForegroundPgid(SHELL_PID))
            .unwrap();
        master.write(b"\x03").unwrap();
        let processes = registry.processes();
        assert_eq!(processes.take_pending(SHELL_PID), vec![Signal::Int]);
        // The signal byte never reaches the slave.
        assert_eq!(slave.bytes_available().unwrap(), 0);
    }

    #[test]
    fn xoff_gates_slave_writes_until_xon() {
        let registry = registry();
        let (master, slave) = open_pair(&registry);
        slave.set_nonblocking(true);

        master.write(b"\x13").unwrap(); // ^S
        assert_eq!(slave.write(b"x"), Err(PtyError::WouldBlock));

        master.write(b"\x11").unwrap(); // ^Q
        assert_eq!(slave.write(b"x").unwrap(), 1);
    }

    #[test]
    fn packet_mode_prefixes_data_tag() {
        let registry = registry();
        let (master, slave) = open_pair(&registry);
        master.ioctl(IoctlRequest::SetPacketMode(true)).unwrap();
        slave.write(b"ok").unwrap();

        let mut buf = [0u8; 16];
        let n = master.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"\0ok");

        // Zero-length request: no tag, no bytes.
        assert_eq!(master.read(&mut []).unwrap(), 0);

        // One-byte request returns the tag alone.
        slave.write(b"x").unwrap();
        let mut one = [0u8; 1];
        assert_eq!(master.read(&mut one).unwrap(), 1);
        assert_eq!(one[0], 0);
    }

    #[test]
    fn no_slave_ever_opened_is_not_eof() {
        let registry = registry();
        let master = PtyMaster::open(&registry, MASTER_PID).unwrap();
        master.set_nonblocking(true);
        assert!(!master.hit_eof().unwrap());
        let mut buf = [0u8; 8];
        assert_eq!(master.read(&mut buf), Err(PtyError::WouldBlock));
    }

    #[test]
    fn all_slaves_gone_is_eof() {
        let registry = registry();
        let (master, slave) = open_pair(&registry);
        drop(slave);
        assert!(master.hit_eof().unwrap());
        let mut buf = [0u8; 8];
        assert_eq!(master.read(&mut buf), Err(PtyError::Io));
    }

    #[test]
    fn master_close_with_no_slaves_tears_down_registry_slot() {
        let registry = registry();
        let master = PtyMaster::open(&registry, MASTER_PID).unwrap();
        let minor = master.minor();
        drop(master);
        // A later open attempt observes "no such pty", not EOF.
        assert_eq!(
            PtySlave::open(&registry, minor, SHELL_PID).err(),
            Some(PtyError::NoDevice(minor))
        );
    }

    #[test]
    fn readahead_backpressure_reports_partial_then_recovers() {
        let processes = Arc::new(ProcessDirectory::new());
        processes.register(MASTER_PID, MASTER_PID, MASTER_PID, Credentials { uid: 500, gid: 500 });
        processes.register(SHELL_PID, SHELL_PID, MASTER_PID, Credentials { uid: 500, gid: 500 });
        let config = Config {
            channel_capacity: 8,
            ..Config::default()
        };
        let registry = TtyRegistry::new(processes, config);
        let (master, slave) = open_pair(&registry);
        let mut termios = master.termios().unwrap();
        termios.local = LocalFlags::empty();
        master.set_termios(termios).unwrap();

        // More than the channel holds: partial success, remainder
        // retained in the readahead buffer.
        assert_eq!(master.write(b"0123456789ab").unwrap(), 0);
        let mut buf = [0u8; 8];
        assert_eq!(slave.read(&mut buf).unwrap(), 8);
        assert_eq!(&buf, b"01234567");

        // A later write flushes the retained tail ahead of new bytes.
        assert_eq!(master.write(b"cd").unwrap(), 2);
        let mut rest = [0u8; 8];
        let n = slave.read(&mut rest).unwrap();
        assert_eq!(&rest[..n], b"89abcd");
    }

    #[test]
    fn drain_output_discards_pending_bytes() {
        let registry = registry();
        let (master, slave) = open_pair(&registry);
        slave.write(b"stale\n").unwrap();
        master.drain_output().unwrap();
        master.set_nonblocking(true);
        let mut buf = [0u8; 16];
        assert_eq!(master.read(&mut buf), Err(PtyError::WouldBlock));
    }

    #[test]
    fn adapter_relays_and_scrubs_slave_output() {
        let registry = registry();
        let (master, slave) = open_pair(&registry);
        let adapter = EchoAdapter::new();
        assert!(master.activate_adapter(&adapter).unwrap());

        // Slave output is relayed without post-processing (the adapter
        // side already rendered it).
        slave.write(b"painted\n").unwrap();
        let mut buf = [0u8; 32];
        let n = master.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"painted\n");

        // Keystrokes route raw through the adapter, whose private
        // sequences the forwarding thread scrubs out.
        master.write(b"key").unwrap();
        let n = master.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"key");

        master.deactivate_adapter().unwrap();
        slave.write(b"direct\n").unwrap();
        let n = master.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"direct\r\n");
    }

    #[test]
    fn adapter_resize_precedes_winsize_update() {
        let registry = registry();
        let (master, _slave) = open_pair(&registry);
        let adapter = EchoAdapter::new();
        assert!(master.activate_adapter(&adapter).unwrap());

        let size = Winsize {
            rows: 40,
            cols: 132,
            ..Winsize::default()
        };
        master.ioctl(IoctlRequest::SetWinsize(size)).unwrap();
        assert_eq!(adapter.resizes.lock().clone(), vec![size]);
        assert_eq!(master.ioctl(IoctlRequest::GetWinsize).unwrap(), IoctlReply::Winsize(size));
        master.deactivate_adapter().unwrap();
    }

    #[test]
    fn adapter_activation_failure_falls_back_silently() {
        let registry = registry();
        let (master, slave) = open_pair(&registry);
        let adapter = EchoAdapter {
            fail_open: true,
            ..EchoAdapter::new()
        };
        assert!(!master.activate_adapter(&adapter).unwrap());
        // Direct rendering still works.
        slave.write(b"ok\n").unwrap();
        let mut buf = [0u8; 8];
        let n = master.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"ok\r\n");
    }

    #[test]
    fn adapter_disabled_by_policy() {
        let processes = Arc::new(ProcessDirectory::new());
        processes.register(MASTER_PID, MASTER_PID, MASTER_PID, Credentials { uid: 500, gid: 500 });
        processes.register(SHELL_PID, SHELL_PID, MASTER_PID, Credentials { uid: 500, gid: 500 });
        let mut config = Config::default();
        config.adapter.enabled = false;
        let registry = TtyRegistry::new(processes, config);
        let (master, _slave) = open_pair(&registry);
        assert!(!master.activate_adapter(&EchoAdapter::new()).unwrap());
    }

    #[test]
    fn unrecognized_ioctl_is_not_supported() {
        let registry = registry();
        let (master, _slave) = open_pair(&registry);
        assert_eq!(
            master.ioctl(IoctlRequest::Other(0xdead)).unwrap(),
            IoctlReply::NotSupported
        );
    }
}
