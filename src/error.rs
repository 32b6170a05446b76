//! Error types for pty operations.
//!
//! Every per-call failure surfaces as a [`PtyError`]; callers that speak
//! POSIX map it to an errno value via [`PtyError::errno`]. Channel-level
//! conditions (`WouldBlock` / `Closed`) live in [`crate::host::channel`]
//! and are translated at the endpoint boundary.

use thiserror::Error;

/// POSIX errno values used by the pty surface.
pub mod errno {
    pub const EPERM: i32 = 1;
    pub const ESRCH: i32 = 3;
    pub const EINTR: i32 = 4;
    pub const EIO: i32 = 5;
    pub const ENXIO: i32 = 6;
    pub const EAGAIN: i32 = 11;
    pub const EACCES: i32 = 13;
}

/// Errors returned by master/slave endpoint operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PtyError {
    /// Non-blocking operation found no data or no buffer space.
    #[error("operation would block")]
    WouldBlock,

    /// A blocking wait was interrupted by a pending signal before any
    /// data was transferred.
    #[error("interrupted by signal")]
    Interrupted,

    /// A blocking read was aborted through its cancel token.
    #[error("read cancelled")]
    Cancelled,

    /// The underlying channel failed in a way that is not a clean EOF.
    #[error("input/output error")]
    Io,

    /// Job control stopped the operation (SIGTTIN/SIGTTOU was raised
    /// against the caller's process group).
    #[error("stopped by job control")]
    Stopped,

    /// The caller is not permitted to perform the operation
    /// (e.g. setting the foreground group from another session).
    #[error("operation not permitted")]
    NotPermitted,

    /// The requester failed the access check against the pty's
    /// access descriptor.
    #[error("permission denied")]
    AccessDenied,

    /// No pty with this minor number exists (never created, or torn down).
    #[error("no such pty: minor {0}")]
    NoDevice(u32),

    /// The master released its channel ends; no further slave opens are
    /// possible on this pty.
    #[error("pty handles have been closed")]
    HandlesClosed,

    /// The master's rendezvous acceptor could not be reached.
    #[error("cannot reach pty master")]
    MasterUnreachable,
}

impl PtyError {
    /// The errno a POSIX syscall layer would report for this error.
    pub fn errno(&self) -> i32 {
        match self {
            PtyError::WouldBlock => errno::EAGAIN,
            PtyError::Interrupted | PtyError::Cancelled | PtyError::Stopped => errno::EINTR,
            PtyError::Io => errno::EIO,
            PtyError::NotPermitted => errno::EPERM,
            PtyError::AccessDenied | PtyError::HandlesClosed => errno::EACCES,
            PtyError::NoDevice(_) | PtyError::MasterUnreachable => errno::ENXIO,
        }
    }
}
