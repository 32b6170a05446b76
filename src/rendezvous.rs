//! Handle-duplication rendezvous protocol.
//!
//! A process that does not own the master's channel ends cannot open a
//! slave directly; it asks the master to duplicate them. The master runs
//! an acceptor loop that serves one request/reply exchange per
//! connection: verify the requester's identity, check its credentials
//! against the tty's access descriptor, duplicate the four slave-side
//! handles into the requester, reply. Any per-exchange failure is
//! reported to that requester only; the loop keeps serving.
//!
//! A claimed pid of [`SHUTDOWN_SENTINEL`] asks the acceptor to exit and
//! is honored only when the *verified* peer is the master owner itself.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{errno, PtyError};
use crate::host::process::ProcessDirectory;
use crate::host::Pid;
use crate::tty::{SlaveSeeds, Tty};

/// Claimed-pid value that requests acceptor shutdown.
pub const SHUTDOWN_SENTINEL: i64 = -1;

/// One rendezvous exchange, as seen by the acceptor.
pub(crate) struct Request {
    /// Pid the requester claims to be.
    claimed_pid: i64,
    /// Identity stamped by the connect facility; `None` when the host
    /// cannot identify channel peers, in which case the claim is trusted.
    peer_pid: Option<Pid>,
    reply_tx: Sender<Reply>,
}

/// Acceptor reply: the duplicated handle set, or no handles plus an
/// errno-style code describing why.
pub(crate) struct Reply {
    pub handles: Option<SlaveSeeds>,
    pub error: i32,
}

/// Client end of the master's control channel.
#[derive(Clone)]
pub struct RendezvousClient {
    tx: Sender<Request>,
}

impl RendezvousClient {
    /// Perform one request/reply round trip.
    pub(crate) fn call(
        &self,
        claimed_pid: i64,
        peer_pid: Option<Pid>,
        timeout: Duration,
    ) -> Result<Reply, PtyError> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.tx
            .send(Request {
                claimed_pid,
                peer_pid,
                reply_tx,
            })
            .map_err(|_| PtyError::MasterUnreachable)?;
        reply_rx
            .recv_timeout(timeout)
            .map_err(|_| PtyError::MasterUnreachable)
    }
}

/// Create the control channel: a client handle for openers and the
/// receiver the acceptor loop drains.
pub(crate) fn control_pair() -> (RendezvousClient, Receiver<Request>) {
    let (tx, rx) = mpsc::channel();
    (RendezvousClient { tx }, rx)
}

/// Acceptor loop, run on the master's rendezvous thread for the lifetime
/// of the master endpoint.
pub(crate) fn acceptor_loop(
    rx: Receiver<Request>,
    tty: Arc<Tty>,
    processes: Arc<ProcessDirectory>,
    owner_pid: Pid,
) {
    debug!("pty{}: rendezvous acceptor entered", tty.minor());
    while let Ok(req) = rx.recv() {
        let (reply, exit) = serve_one(&req, &tty, &processes, owner_pid);
        let _ = req.reply_tx.send(reply);
        if exit {
            break;
        }
    }
    debug!("pty{}: rendezvous acceptor leaving", tty.minor());
}

fn serve_one(
    req: &Request,
    tty: &Tty,
    processes: &ProcessDirectory,
    owner_pid: Pid,
) -> (Reply, bool) {
    let denied = |error| {
        (
            Reply {
                handles: None,
                error,
            },
            false,
        )
    };

    if req.claimed_pid == SHUTDOWN_SENTINEL {
        // Verified identity only; a forged claim must not stop the loop.
        let exit = req.peer_pid == Some(owner_pid);
        if !exit {
            warn!(
                "pty{}: shutdown request from non-owner peer {:?}",
                tty.minor(),
                req.peer_pid
            );
        }
        return (
            Reply {
                handles: None,
                error: 0,
            },
            exit,
        );
    }

    // Resolve the requester: prefer the peer-identification facility,
    // fall back to the claim.
    let resolved = req.peer_pid.map(i64::from).unwrap_or(req.claimed_pid);
    if resolved < 0 {
        return denied(errno::EACCES);
    }
    let pid = resolved as Pid;

    // Impersonate the requester: evaluate *its* credentials against the
    // tty's access descriptor, then revert to our own context.
    let Some(creds) = processes.credentials_of(pid) else {
        warn!("pty{}: rendezvous from unknown pid {}", tty.minor(), pid);
        return denied(errno::ESRCH);
    };
    if !tty.access().allows_modify(&creds) {
        warn!("pty{}: pid {} denied modify access", tty.minor(), pid);
        return denied(errno::EACCES);
    }

    let seeds = tty.seeds.lock();
    match seeds.as_ref() {
        Some(seeds) => {
            debug!("pty{}: duplicating handles into pid {}", tty.minor(), pid);
            (
                Reply {
                    handles: Some(seeds.duplicate_to(pid)),
                    error: 0,
                },
                false,
            )
        }
        None => denied(errno::EACCES),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::channel::create_pair;
    use crate::host::process::Credentials;
    use crate::tty::AccessDescriptor;
    use std::thread;

    const OWNER: Pid = 100;
    const FRIEND: Pid = 101;
    const STRANGER: Pid = 102;

    struct Harness {
        _tty: Arc<Tty>,
        _processes: Arc<ProcessDirectory>,
        client: RendezvousClient,
        // Opposite channel ends, held so the seed channels stay open.
        _ends: (
            crate::host::channel::ChannelWriter,
            crate::host::channel::ChannelWriter,
            crate::host::channel::ChannelReader,
            crate::host::channel::ChannelReader,
        ),
    }

    fn harness() -> Harness {
        let processes = Arc::new(ProcessDirectory::new());
        processes.register(OWNER, OWNER, OWNER, Credentials { uid: 500, gid: 500 });
        processes.register(FRIEND, FRIEND, OWNER, Credentials { uid: 500, gid: 500 });
        processes.register(STRANGER, STRANGER, STRANGER, Credentials { uid: 666, gid: 666 });

        let tty = Arc::new(Tty::new(0, AccessDescriptor::new(500, 500)));
        let (input, to_slave) = create_pair(64, OWNER);
        let (input_raw, to_slave_raw) = create_pair(64, OWNER);
        let (from_slave_raw, output_raw) = create_pair(64, OWNER);
        let (from_slave, output) = create_pair(64, OWNER);
        *tty.seeds.lock() = Some(SlaveSeeds {
            input,
            input_raw,
            output_raw,
            output,
        });

        let (client, rx) = control_pair();
        let acceptor_tty = tty.clone();
        let acceptor_dir = processes.clone();
        thread::spawn(move || acceptor_loop(rx, acceptor_tty, acceptor_dir, OWNER));
        Harness {
            _tty: tty,
            _processes: processes,
            client,
            _ends: (to_slave, to_slave_raw, from_slave, from_slave_raw),
        }
    }

    fn timeout() -> Duration {
        Duration::from_millis(500)
    }

    #[test]
    fn grants_handles_to_permitted_pid() {
        let h = harness();
        let client = &h.client;
        let reply = client.call(FRIEND as i64, Some(FRIEND), timeout()).unwrap();
        assert_eq!(reply.error, 0);
        let handles = reply.handles.expect("handles duplicated");
        assert_eq!(handles.input.owner(), FRIEND);
        assert_eq!(handles.output.owner(), FRIEND);
    }

    #[test]
    fn denies_and_keeps_serving() {
        let h = harness();
        let client = &h.client;
        let reply = client
            .call(STRANGER as i64, Some(STRANGER), timeout())
            .unwrap();
        assert!(reply.handles.is_none());
        assert_eq!(reply.error, errno::EACCES);

        // The loop survived the failed exchange.
        let reply = client.call(FRIEND as i64, Some(FRIEND), timeout()).unwrap();
        assert!(reply.handles.is_some());
    }

    #[test]
    fn unknown_pid_is_rejected() {
        let h = harness();
        let client = &h.client;
        let reply = client.call(4242, Some(4242), timeout()).unwrap();
        assert!(reply.handles.is_none());
        assert_eq!(reply.error, errno::ESRCH);
    }

    #[test]
    fn peer_identity_overrides_claim() {
        let h = harness();
        let client = &h.client;
        // Stranger claims to be the friend; the stamped peer wins.
        let reply = client
            .call(FRIEND as i64, Some(STRANGER), timeout())
            .unwrap();
        assert!(reply.handles.is_none());
        assert_eq!(reply.error, errno::EACCES);
    }

    #[test]
    fn shutdown_sentinel_from_non_owner_is_ignored() {
        let h = harness();
        let client = &h.client;
        let reply = client
            .call(SHUTDOWN_SENTINEL, Some(FRIEND), timeout())
            .unwrap();
        assert!(reply.handles.is_none());
        // Still serving.
        let reply = client.call(FRIEND as i64, Some(FRIEND), timeout()).unwrap();
        assert!(reply.handles.is_some());
    }

    #[test]
    fn shutdown_sentinel_from_owner_stops_acceptor() {
        let h = harness();
        let client = &h.client;
        client.call(SHUTDOWN_SENTINEL, Some(OWNER), timeout()).unwrap();
        // The acceptor is gone; the next call cannot be served.
        assert!(matches!(
            client.call(FRIEND as i64, Some(FRIEND), Duration::from_millis(100)),
            Err(PtyError::MasterUnreachable)
        ));
    }
}
