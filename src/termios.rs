//! Line-discipline state shared by both pty endpoints.
//!
//! This module holds the terminal attribute model: mode flag sets for the
//! input, output and local dimensions, the control-character table, and
//! the window-size record. It is deliberately a plain data module; all
//! behavior driven by these flags lives in the endpoints and in
//! [`crate::discipline`].

use bitflags::bitflags;

bitflags! {
    /// Input mode flags (how accepted keystrokes are translated).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct InputFlags: u32 {
        /// Map CR to NL on input.
        const ICRNL = 1 << 0;
        /// Map NL to CR on input.
        const INLCR = 1 << 1;
        /// Discard CR on input.
        const IGNCR = 1 << 2;
        /// Enable start/stop output flow control.
        const IXON  = 1 << 3;
    }
}

bitflags! {
    /// Output mode flags (post-processing between a writer and the
    /// master-presentation stream).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OutputFlags: u32 {
        /// Enable output post-processing; without it bytes pass through.
        const OPOST  = 1 << 0;
        /// Emit CR before every NL.
        const ONLCR  = 1 << 1;
        /// Map CR to NL.
        const OCRNL  = 1 << 2;
        /// Suppress CR at column 0.
        const ONOCR  = 1 << 3;
        /// NL also performs the CR function (column reset).
        const ONLRET = 1 << 4;
    }
}

bitflags! {
    /// Local mode flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct LocalFlags: u32 {
        /// Canonical (line-buffered) input.
        const ICANON = 1 << 0;
        /// Echo accepted input back to the master.
        const ECHO   = 1 << 1;
        /// Generate signals from the interrupt/quit characters.
        const ISIG   = 1 << 2;
        /// Background writes raise SIGTTOU.
        const TOSTOP = 1 << 3;
        /// Discard pending output (set by a flush in progress).
        const FLUSHO = 1 << 4;
    }
}

/// Control-character table.
///
/// `min` and `time` are the non-canonical read parameters (VMIN/VTIME);
/// `time` is measured in deciseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlChars {
    pub intr: u8,
    pub quit: u8,
    pub erase: u8,
    pub kill: u8,
    pub eof: u8,
    pub eol: u8,
    pub start: u8,
    pub stop: u8,
    pub min: u8,
    pub time: u8,
}

impl Default for ControlChars {
    fn default() -> Self {
        Self {
            intr: 0x03,  // ^C
            quit: 0x1c,  // ^\
            erase: 0x7f, // DEL
            kill: 0x15,  // ^U
            eof: 0x04,   // ^D
            eol: 0,
            start: 0x11, // ^Q
            stop: 0x13,  // ^S
            min: 1,
            time: 0,
        }
    }
}

/// Full line-discipline attribute set for one pty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Termios {
    pub input: InputFlags,
    pub output: OutputFlags,
    pub local: LocalFlags,
    pub chars: ControlChars,
}

impl Default for Termios {
    fn default() -> Self {
        Self {
            input: InputFlags::ICRNL | InputFlags::IXON,
            output: OutputFlags::OPOST | OutputFlags::ONLCR,
            local: LocalFlags::ICANON | LocalFlags::ECHO | LocalFlags::ISIG,
            chars: ControlChars::default(),
        }
    }
}

impl Termios {
    /// True when canonical (line-buffered) input is in effect.
    pub fn canonical(&self) -> bool {
        self.local.contains(LocalFlags::ICANON)
    }

    /// Raw-ish attribute set used by tests and embedders: no canonical
    /// buffering, no echo, no signal generation, output untouched.
    pub fn raw() -> Self {
        Self {
            input: InputFlags::empty(),
            output: OutputFlags::empty(),
            local: LocalFlags::empty(),
            chars: ControlChars {
                min: 1,
                time: 0,
                ..ControlChars::default()
            },
        }
    }
}

/// Window dimensions of the emulated terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Winsize {
    pub rows: u16,
    pub cols: u16,
    pub pixel_width: u16,
    pub pixel_height: u16,
}

impl Default for Winsize {
    fn default() -> Self {
        Self {
            rows: 25,
            cols: 80,
            pixel_width: 0,
            pixel_height: 0,
        }
    }
}
