//! Byte-stream channel pairs.
//!
//! A channel is the wire between pty endpoints: a bounded ring buffer with
//! one set of reader handles and one set of writer handles. Handles are
//! owned by a process id and cross process boundaries only through
//! [`ChannelReader::duplicate_to`] / [`ChannelWriter::duplicate_to`] —
//! there is no implicit aliasing, mirroring kernel handle duplication.
//!
//! Closure follows pipe semantics: when every writer is gone a drained
//! channel reports [`ChannelError::Closed`] to readers (EOF class), and
//! when every reader is gone writers get [`ChannelError::Closed`]
//! (broken pipe).

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use thiserror::Error;

use super::Pid;

/// Channel-level conditions; endpoints translate these into pty errors.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelError {
    /// No data (reads) or no buffer space (writes) right now.
    #[error("channel would block")]
    WouldBlock,
    /// All peer handles are closed.
    #[error("peer endpoint closed")]
    Closed,
}

struct State {
    buf: VecDeque<u8>,
    readers: usize,
    writers: usize,
}

struct Shared {
    state: Mutex<State>,
    readable: Condvar,
    writable: Condvar,
    capacity: usize,
}

/// Read end of a channel.
pub struct ChannelReader {
    shared: Arc<Shared>,
    owner: Pid,
}

/// Write end of a channel.
pub struct ChannelWriter {
    shared: Arc<Shared>,
    owner: Pid,
}

/// Create a channel with the given buffer capacity, both ends owned by
/// `owner`.
pub fn create_pair(capacity: usize, owner: Pid) -> (ChannelReader, ChannelWriter) {
    assert!(capacity > 0, "channel capacity must be non-zero");
    let shared = Arc::new(Shared {
        state: Mutex::new(State {
            buf: VecDeque::with_capacity(capacity.min(4096)),
            readers: 1,
            writers: 1,
        }),
        readable: Condvar::new(),
        writable: Condvar::new(),
        capacity,
    });
    (
        ChannelReader {
            shared: shared.clone(),
            owner,
        },
        ChannelWriter { shared, owner },
    )
}

impl ChannelReader {
    /// Process that owns this handle.
    pub fn owner(&self) -> Pid {
        self.owner
    }

    /// Duplicate this handle into another process.
    pub fn duplicate_to(&self, target: Pid) -> ChannelReader {
        self.shared.state.lock().readers += 1;
        ChannelReader {
            shared: self.shared.clone(),
            owner: target,
        }
    }

    /// Blocking read; returns at least one byte unless the channel is
    /// closed and drained.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize, ChannelError> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut st = self.shared.state.lock();
        loop {
            if !st.buf.is_empty() {
                return Ok(self.drain(&mut st, buf));
            }
            if st.writers == 0 {
                return Err(ChannelError::Closed);
            }
            self.shared.readable.wait(&mut st);
        }
    }

    /// Like [`read`](Self::read) but gives up after `timeout`.
    pub fn read_timeout(&self, buf: &mut [u8], timeout: Duration) -> Result<usize, ChannelError> {
        if buf.is_empty() {
            return Ok(0);
        }
        let deadline = Instant::now() + timeout;
        let mut st = self.shared.state.lock();
        loop {
            if !st.buf.is_empty() {
                return Ok(self.drain(&mut st, buf));
            }
            if st.writers == 0 {
                return Err(ChannelError::Closed);
            }
            if self
                .shared
                .readable
                .wait_until(&mut st, deadline)
                .timed_out()
            {
                return if st.buf.is_empty() {
                    Err(ChannelError::WouldBlock)
                } else {
                    Ok(self.drain(&mut st, buf))
                };
            }
        }
    }

    /// Non-blocking read.
    pub fn try_read(&self, buf: &mut [u8]) -> Result<usize, ChannelError> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut st = self.shared.state.lock();
        if !st.buf.is_empty() {
            return Ok(self.drain(&mut st, buf));
        }
        if st.writers == 0 {
            return Err(ChannelError::Closed);
        }
        Err(ChannelError::WouldBlock)
    }

    /// Number of bytes that can be read without blocking.
    ///
    /// A drained channel with no remaining writers reports `Closed` so
    /// callers can distinguish "empty" from "gone".
    pub fn peek_available(&self) -> Result<usize, ChannelError> {
        let st = self.shared.state.lock();
        if st.buf.is_empty() && st.writers == 0 {
            return Err(ChannelError::Closed);
        }
        Ok(st.buf.len())
    }

    fn drain(&self, st: &mut State, buf: &mut [u8]) -> usize {
        let n = buf.len().min(st.buf.len());
        for slot in buf.iter_mut().take(n) {
            *slot = st.buf.pop_front().unwrap_or(0);
        }
        self.shared.writable.notify_all();
        n
    }
}

impl Drop for ChannelReader {
    fn drop(&mut self) {
        let mut st = self.shared.state.lock();
        st.readers -= 1;
        if st.readers == 0 {
            // Writers must observe the broken pipe.
            self.shared.writable.notify_all();
        }
    }
}

impl ChannelWriter {
    /// Process that owns this handle.
    pub fn owner(&self) -> Pid {
        self.owner
    }

    /// Duplicate this handle into another process.
    pub fn duplicate_to(&self, target: Pid) -> ChannelWriter {
        self.shared.state.lock().writers += 1;
        ChannelWriter {
            shared: self.shared.clone(),
            owner: target,
        }
    }

    /// Blocking write of the whole buffer.
    pub fn write(&self, buf: &[u8]) -> Result<usize, ChannelError> {
        let mut written = 0;
        let mut st = self.shared.state.lock();
        while written < buf.len() {
            if st.readers == 0 {
                return Err(ChannelError::Closed);
            }
            let space = self.shared.capacity - st.buf.len();
            if space == 0 {
                self.shared.writable.wait(&mut st);
                continue;
            }
            let n = space.min(buf.len() - written);
            st.buf.extend(&buf[written..written + n]);
            written += n;
            self.shared.readable.notify_all();
        }
        Ok(written)
    }

    /// Non-blocking write; writes what fits and reports it.
    ///
    /// Returns `WouldBlock` only when nothing could be written.
    pub fn try_write(&self, buf: &[u8]) -> Result<usize, ChannelError> {
        let mut st = self.shared.state.lock();
        if st.readers == 0 {
            return Err(ChannelError::Closed);
        }
        let space = self.shared.capacity - st.buf.len();
        if space == 0 && !buf.is_empty() {
            return Err(ChannelError::WouldBlock);
        }
        let n = space.min(buf.len());
        st.buf.extend(&buf[..n]);
        if n > 0 {
            self.shared.readable.notify_all();
        }
        Ok(n)
    }
}

impl Drop for ChannelWriter {
    fn drop(&mut self) {
        let mut st = self.shared.state.lock();
        st.writers -= 1;
        if st.writers == 0 {
            // Blocked readers must observe EOF.
            self.shared.readable.notify_all();
        }
    }
}
