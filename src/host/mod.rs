//! Host collaborator contracts.
//!
//! The pty core runs on top of a small set of primitives the surrounding
//! system provides; this module supplies in-process emulations of them:
//!
//! - **channel**: duplicable byte-stream channel pairs with peek-available
//! - **event**: manual-reset event with timed wait
//! - **process**: process/session directory and signal delivery
//!
//! On a host with real kernel objects these would wrap pipes, events and
//! the process table; the emulations keep the same contracts (explicit
//! duplication, reference-counted closure, fire-and-forget signals) so the
//! core's synchronization logic is identical either way.

pub mod channel;
pub mod event;
pub mod process;

/// Process identifier used throughout the crate.
pub type Pid = u32;
