// ABOUTME: Collects non-fatal problems hit while running a command.
// ABOUTME: They are reported to the user after the main result, never as failures.

/// Non-fatal warnings gathered during one CLI invocation.
#[derive(Debug, Default)]
pub struct Diagnostics {
    warnings: Vec<Warning>,
}

impl Diagnostics {
    /// Record a warning and log it.
    pub fn warn(&mut self, warning: Warning) {
        tracing::warn!("{}", warning.message);
        self.warnings.push(warning);
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct Warning {
    pub kind: WarningKind,
    pub message: String,
}

impl Warning {
    pub fn disconnect(message: impl Into<String>) -> Self {
        Self {
            kind: WarningKind::Disconnect,
            message: message.into(),
        }
    }

    pub fn pty_unavailable(message: impl Into<String>) -> Self {
        Self {
            kind: WarningKind::PtyUnavailable,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningKind {
    /// Closing the connection or the file-transfer client failed.
    Disconnect,
    /// The server refused a terminal; the command ran without one.
    PtyUnavailable,
}
