//! What the display layer is told about: status line, notifications, view.

use std::fmt;

use crate::buffer::Chunk;
use crate::tab::{DirectoryKey, TabId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    /// Transient: the transport is retrying.
    Reconnecting,
    /// Transient: a non-fatal stream or input error.
    Warning,
    /// The process exited.
    Ended,
    /// A fatal stream error or a failed PTY creation.
    Failed,
}

/// The persistent status line shown under the terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    pub kind: StatusKind,
    pub message: String,
}

impl StatusLine {
    pub fn reconnecting(attempt: u32, max_attempts: u32) -> Self {
        Self {
            kind: StatusKind::Reconnecting,
            message: format!("Connection lost, reconnecting (attempt {attempt}/{max_attempts})..."),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            kind: StatusKind::Warning,
            message: message.into(),
        }
    }

    pub fn ended() -> Self {
        Self {
            kind: StatusKind::Ended,
            message: "Session ended. Restart to open a new shell.".to_string(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            kind: StatusKind::Failed,
            message: message.into(),
        }
    }
}

impl fmt::Display for StatusLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Published on every change a display consumer may care about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    ChunkAppended {
        directory: DirectoryKey,
        tab_id: TabId,
        chunk: Chunk,
    },
    BufferCleared {
        directory: DirectoryKey,
        tab_id: TabId,
    },
    TabsChanged {
        directory: DirectoryKey,
    },
    Focused {
        directory: DirectoryKey,
        tab_id: TabId,
    },
    Status(Option<StatusLine>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabSummary {
    pub id: TabId,
    pub label: String,
    pub bound: bool,
    pub connecting: bool,
    pub active: bool,
}

/// Everything needed to (re)draw the focused terminal from scratch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct View {
    pub directory: DirectoryKey,
    pub tab_id: TabId,
    pub tabs: Vec<TabSummary>,
    pub chunks: Vec<Chunk>,
    pub status: Option<StatusLine>,
}
