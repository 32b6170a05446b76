//! wpty — user-space POSIX pseudo-terminal emulation.
//!
//! This crate reproduces pty semantics (line discipline, job control,
//! window-size negotiation, VMIN/VTIME reads, hangup detection) on hosts
//! that have no kernel tty driver, using byte-stream channels,
//! duplicable handles and explicit synchronization objects instead.
//!
//! # Architecture
//!
//! ```text
//! TtyRegistry (minor → control block)
//! └── Tty (shared state: termios, winsize, ownership, two locks + event)
//!     ├── PtyMaster
//!     │   ├── input acceptance (echo, signals, canonical collection)
//!     │   ├── output consumption (echo-priority read, packet mode)
//!     │   ├── forwarding thread (scrub, sanitize, post-process)
//!     │   └── rendezvous acceptor thread (handle duplication)
//!     └── PtySlave (per-open view)
//!         ├── read: canonical / VMIN/VTIME state machine
//!         ├── write: job control + post-processing + flow control
//!         └── ioctl: winsize, foreground pgid, byte counts
//! ```
//!
//! Host collaborators (process directory, signal delivery, channels,
//! events) live in [`host`]; an optional console adapter capability
//! lives in [`pcon`].
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use wpty::host::process::{Credentials, ProcessDirectory};
//! use wpty::{Config, PtyMaster, PtySlave, TtyRegistry};
//!
//! let processes = Arc::new(ProcessDirectory::new());
//! processes.register(1, 1, 1, Credentials { uid: 500, gid: 500 });
//! let registry = TtyRegistry::new(processes, Config::default());
//!
//! let master = PtyMaster::open(&registry, 1).unwrap();
//! let slave = PtySlave::open(&registry, master.minor(), 1).unwrap();
//!
//! slave.write(b"hello\n").unwrap();
//! let mut buf = [0u8; 16];
//! let n = master.read(&mut buf).unwrap();
//! assert_eq!(&buf[..n], b"hello\r\n");
//! ```

pub mod config;
pub mod discipline;
pub mod error;
pub mod host;
pub mod master;
pub mod pcon;
pub mod rendezvous;
pub mod slave;
pub mod termios;
pub mod tty;

pub use config::Config;
pub use error::PtyError;
pub use master::PtyMaster;
pub use slave::{CancelToken, PtySlave};
pub use termios::{Termios, Winsize};
pub use tty::{IoctlReply, IoctlRequest, TtyRegistry};
