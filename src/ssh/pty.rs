// ABOUTME: Pseudo-terminal request parameters for interactive sessions.
// ABOUTME: Terminal type, dimensions, and terminal mode flags sent with pty-req.

use russh::Pty;

pub const DEFAULT_TERM: &str = "xterm";
pub const DEFAULT_COLS: u32 = 80;
pub const DEFAULT_ROWS: u32 = 40;
/// Nominal line speed reported for both directions.
pub const DEFAULT_BAUD: u32 = 14400;

/// A pseudo-terminal descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PtyRequest {
    pub term: String,
    pub cols: u32,
    pub rows: u32,
    pub modes: Vec<(Pty, u32)>,
}

impl Default for PtyRequest {
    /// Echo disabled and fixed baud rates.
    fn default() -> Self {
        Self {
            term: DEFAULT_TERM.to_string(),
            cols: DEFAULT_COLS,
            rows: DEFAULT_ROWS,
            modes: vec![
                (Pty::ECHO, 0),
                (Pty::TTY_OP_ISPEED, DEFAULT_BAUD),
                (Pty::TTY_OP_OSPEED, DEFAULT_BAUD),
            ],
        }
    }
}

impl PtyRequest {
    pub fn term(mut self, term: impl Into<String>) -> Self {
        self.term = term.into();
        self
    }

    pub fn size(mut self, cols: u32, rows: u32) -> Self {
        self.cols = cols;
        self.rows = rows;
        self
    }

    /// Set a mode flag, replacing any previous value for it.
    pub fn mode(mut self, mode: Pty, value: u32) -> Self {
        self.modes.retain(|(m, _)| *m != mode);
        self.modes.push((mode, value));
        self
    }
}
