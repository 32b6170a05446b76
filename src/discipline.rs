//! Byte-level line-discipline algorithms shared by both endpoints.
//!
//! Three small machines live here:
//!
//! - **post_process_chunk**: output post-processing (CR/NL mapping and
//!   column tracking), used by the slave write path, the master echo path
//!   and the forwarding thread
//! - **SequenceScrubber**: elides adapter-private `ESC [ > ... m` spans
//!   from forwarded output while the console adapter is active
//! - **Utf8Sanitizer**: incremental conversion of forwarded bytes into
//!   well-formed UTF-8, holding incomplete trailing sequences across
//!   chunk boundaries

use crate::termios::OutputFlags;

/// Chunk size used when post-processing output toward a channel.
pub const OUT_CHUNK: usize = 1024;

/// Post-process `src` into `out` until `out` holds at least `max_out`
/// bytes or `src` is exhausted; returns how many input bytes were
/// consumed. `column` is the running output column of the tty and must be
/// mutated only under the tty's output lock.
///
/// Callers are expected to loop: write out the produced chunk, then call
/// again with the unconsumed remainder.
pub fn post_process_chunk(
    flags: OutputFlags,
    column: &mut usize,
    src: &[u8],
    out: &mut Vec<u8>,
    max_out: usize,
) -> usize {
    let mut consumed = 0;
    while consumed < src.len() && out.len() < max_out {
        match src[consumed] {
            b'\r' => {
                if flags.contains(OutputFlags::ONOCR) && *column == 0 {
                    consumed += 1;
                    continue;
                }
                if flags.contains(OutputFlags::OCRNL) {
                    out.push(b'\n');
                } else {
                    out.push(b'\r');
                    *column = 0;
                }
                consumed += 1;
            }
            b'\n' => {
                if flags.contains(OutputFlags::ONLCR) {
                    out.push(b'\r');
                    *column = 0;
                }
                if flags.contains(OutputFlags::ONLRET) {
                    *column = 0;
                }
                out.push(b'\n');
                consumed += 1;
            }
            byte => {
                out.push(byte);
                *column += 1;
                consumed += 1;
            }
        }
    }
    consumed
}

#[derive(Clone, Copy, PartialEq)]
enum ScrubState {
    Ground,
    Escape,
    Csi,
    Param,
}

/// Incremental filter removing adapter-private `ESC [ > Pm m` sequences.
///
/// Anything that is not such a sequence passes through untouched. A
/// possible sequence prefix at the end of a chunk is withheld until the
/// next chunk decides whether it completes.
pub struct SequenceScrubber {
    state: ScrubState,
    held: Vec<u8>,
}

impl SequenceScrubber {
    pub fn new() -> Self {
        Self {
            state: ScrubState::Ground,
            held: Vec::new(),
        }
    }

    /// Feed a chunk, appending the surviving bytes to `out`.
    pub fn feed(&mut self, input: &[u8], out: &mut Vec<u8>) {
        for &byte in input {
            self.step(byte, out);
        }
    }

    fn step(&mut self, byte: u8, out: &mut Vec<u8>) {
        match self.state {
            ScrubState::Ground => {
                if byte == 0x1b {
                    self.state = ScrubState::Escape;
                    self.held.push(byte);
                } else {
                    out.push(byte);
                }
            }
            ScrubState::Escape => {
                if byte == b'[' {
                    self.state = ScrubState::Csi;
                    self.held.push(byte);
                } else {
                    self.abort(byte, out);
                }
            }
            ScrubState::Csi => {
                if byte == b'>' {
                    self.state = ScrubState::Param;
                    self.held.push(byte);
                } else {
                    self.abort(byte, out);
                }
            }
            ScrubState::Param => {
                if byte.is_ascii_digit() || byte == b';' {
                    self.held.push(byte);
                } else if byte == b'm' {
                    // Private sequence complete: elide the whole span.
                    self.held.clear();
                    self.state = ScrubState::Ground;
                } else {
                    self.abort(byte, out);
                }
            }
        }
    }

    /// Not the private sequence after all: release what was held and
    /// reprocess the current byte from ground state.
    fn abort(&mut self, byte: u8, out: &mut Vec<u8>) {
        out.append(&mut self.held);
        self.state = ScrubState::Ground;
        self.step(byte, out);
    }

    /// Flush any held prefix (end of stream).
    pub fn finish(&mut self, out: &mut Vec<u8>) {
        out.append(&mut self.held);
        self.state = ScrubState::Ground;
    }
}

impl Default for SequenceScrubber {
    fn default() -> Self {
        Self::new()
    }
}

/// Incremental UTF-8 cleaner for the forwarding path.
///
/// Invalid sequences become U+FFFD; an incomplete sequence at a chunk
/// boundary is carried into the next call.
pub struct Utf8Sanitizer {
    carry: Vec<u8>,
}

impl Utf8Sanitizer {
    pub fn new() -> Self {
        Self { carry: Vec::new() }
    }

    pub fn feed(&mut self, input: &[u8]) -> Vec<u8> {
        let mut data = std::mem::take(&mut self.carry);
        data.extend_from_slice(input);
        let mut out = Vec::with_capacity(data.len());
        let mut rest: &[u8] = &data;
        while !rest.is_empty() {
            match std::str::from_utf8(rest) {
                Ok(_) => {
                    out.extend_from_slice(rest);
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    out.extend_from_slice(valid);
                    match e.error_len() {
                        Some(bad) => {
                            out.extend_from_slice("\u{FFFD}".as_bytes());
                            rest = &after[bad..];
                        }
                        None => {
                            // Incomplete trailing sequence: hold it back.
                            self.carry = after.to_vec();
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    /// Flush a dangling partial sequence as a replacement character.
    pub fn finish(&mut self) -> Vec<u8> {
        if self.carry.is_empty() {
            Vec::new()
        } else {
            self.carry.clear();
            "\u{FFFD}".as_bytes().to_vec()
        }
    }
}

impl Default for Utf8Sanitizer {
    fn default() -> Self {
        Self::new()
    }
}
