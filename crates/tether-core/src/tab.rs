use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tether_pty::SessionId;

use crate::buffer::TerminalBuffer;

/// Tab identity, formatted `tab-<n>`. Never reused within a run.
pub type TabId = String;

const TAB_ID_PREFIX: &str = "tab-";

pub fn format_tab_id(number: u64) -> TabId {
    format!("{TAB_ID_PREFIX}{number}")
}

/// The numeric suffix of a `tab-<n>` id, if it has one.
pub fn tab_number(id: &str) -> Option<u64> {
    id.strip_prefix(TAB_ID_PREFIX)?.parse().ok()
}

/// A normalized absolute working directory.
///
/// Trailing separators are stripped (the root keeps its single `/`).
/// Comparison is case-sensitive.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DirectoryKey(String);

impl DirectoryKey {
    /// Returns `None` for relative or empty paths.
    pub fn new(path: impl AsRef<Path>) -> Option<Self> {
        let path = path.as_ref();
        if !path.is_absolute() {
            return None;
        }
        let raw = path.to_string_lossy();
        let trimmed = raw.trim_end_matches(['/', '\\']);
        if trimmed.is_empty() {
            // Every character was a separator: this is the root.
            return Some(Self(raw[..1].to_string()));
        }
        Some(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn to_path_buf(&self) -> PathBuf {
        PathBuf::from(&self.0)
    }
}

impl fmt::Display for DirectoryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for DirectoryKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// One terminal slot within a directory.
///
/// Only the registry mutates tabs; everything else reads them through
/// `(directory, tab id)` lookups.
#[derive(Debug, Clone)]
pub struct Tab {
    pub(crate) id: TabId,
    pub(crate) label: String,
    pub(crate) terminal_session_id: Option<SessionId>,
    pub(crate) buffer: TerminalBuffer,
    pub(crate) is_connecting: bool,
    pub(crate) created_at: DateTime<Utc>,
}

impl Tab {
    pub(crate) fn new(id: TabId, label: String) -> Self {
        Self::restored(id, label, None, Utc::now())
    }

    /// A tab rebuilt from its durable fields: empty buffer, not connecting.
    pub(crate) fn restored(
        id: TabId,
        label: String,
        terminal_session_id: Option<SessionId>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            label,
            terminal_session_id,
            buffer: TerminalBuffer::new(),
            is_connecting: false,
            created_at,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn terminal_session_id(&self) -> Option<&str> {
        self.terminal_session_id.as_deref()
    }

    pub fn buffer(&self) -> &TerminalBuffer {
        &self.buffer
    }

    pub fn is_connecting(&self) -> bool {
        self.is_connecting
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}
