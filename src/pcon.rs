//! Console adapter capability.
//!
//! When the host offers a native interactive console renderer, a pty can
//! delegate presentation to it instead of doing its own output
//! post-processing. The adapter is strictly optional: every activation
//! failure falls back to direct rendering and never fails the caller.
//!
//! Lifecycle: Unavailable → Requested → Active → Closing → Unavailable.
//! Activation and deactivation both run under the tty's output lock, so
//! the session is released exactly once even when owners race.

use std::time::Instant;

use thiserror::Error;

use crate::host::channel::{ChannelReader, ChannelWriter};
use crate::host::Pid;
use crate::termios::Winsize;

#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("console adapter is not available on this host")]
    Unavailable,
    #[error("console adapter session failed: {0}")]
    Session(String),
}

/// Channel plumbing handed to an adapter session.
///
/// The adapter reads keystrokes from `input` (the raw input channel) and
/// writes rendered output to `output` (the raw output channel, which the
/// master's forwarding thread scrubs and relays).
pub struct AdapterIo {
    pub input: ChannelReader,
    pub output: ChannelWriter,
}

/// Factory for adapter sessions; the host capability.
pub trait ConsoleAdapter: Send + Sync {
    /// Allocate a session sized to `size`.
    fn open(&self, size: Winsize, io: AdapterIo) -> Result<Box<dyn AdapterSession>, AdapterError>;
}

/// One live adapter session. Dropping it releases the host resources.
pub trait AdapterSession: Send {
    fn resize(&mut self, size: Winsize) -> Result<(), AdapterError>;
}

/// Per-tty adapter bookkeeping, stored in the output-locked state.
pub struct AdapterState {
    pub session: Box<dyn AdapterSession>,
    pub owner_pid: Pid,
    /// Set at activation, cleared once the first input reaches the
    /// adapter; while set, master input is routed raw.
    pub start_pending: bool,
    pub last_activity: Instant,
}

/// How slave output reaches the master-presentation stream.
///
/// Selected once at adapter activation/deactivation; per-call code
/// dispatches on this instead of re-deriving the mode from flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderStrategy {
    /// The pty post-processes output itself.
    DirectPostProcessing,
    /// An adapter session renders; forwarded output is already cooked.
    AdapterRelayed,
}
