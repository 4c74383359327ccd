//! Display events emitted in `--json` mode.
//!
//! Every event is one JSON object per line, tagged with `type`. A consumer
//! rebuilds its screen from `snapshot` and then applies `output` events in
//! chunk-id order.

use serde::Serialize;
use tether_core::{Chunk, StatusKind, StatusLine, TabSummary, View};

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ViewEvent {
    /// Full state of the focused tab (sent on focus change and after lag).
    Snapshot {
        directory: String,
        tab_id: String,
        tabs: Vec<TabEntry>,
        chunks: Vec<ChunkEntry>,
        status: Option<StatusEntry>,
    },
    /// New output for the focused tab.
    Output {
        tab_id: String,
        chunk_id: u64,
        data: String,
    },
    /// The focused tab's buffer was cleared.
    Cleared { tab_id: String },
    /// Tabs were added, removed, or rebound.
    Tabs {
        directory: String,
        tabs: Vec<TabEntry>,
    },
    Status { status: Option<StatusEntry> },
    /// Reply to a console command.
    Message { text: String },
}

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct TabEntry {
    pub id: String,
    pub label: String,
    pub bound: bool,
    pub connecting: bool,
    pub active: bool,
}

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct ChunkEntry {
    pub id: u64,
    pub data: String,
}

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct StatusEntry {
    pub kind: &'static str,
    pub message: String,
}

impl From<&TabSummary> for TabEntry {
    fn from(tab: &TabSummary) -> Self {
        Self {
            id: tab.id.clone(),
            label: tab.label.clone(),
            bound: tab.bound,
            connecting: tab.connecting,
            active: tab.active,
        }
    }
}

impl From<&Chunk> for ChunkEntry {
    fn from(chunk: &Chunk) -> Self {
        Self {
            id: chunk.id,
            data: chunk.data.clone(),
        }
    }
}

impl From<&StatusLine> for StatusEntry {
    fn from(status: &StatusLine) -> Self {
        let kind = match status.kind {
            StatusKind::Reconnecting => "reconnecting",
            StatusKind::Warning => "warning",
            StatusKind::Ended => "ended",
            StatusKind::Failed => "failed",
        };
        Self {
            kind,
            message: status.message.clone(),
        }
    }
}

impl ViewEvent {
    pub fn snapshot(view: &View) -> Self {
        ViewEvent::Snapshot {
            directory: view.directory.to_string(),
            tab_id: view.tab_id.clone(),
            tabs: view.tabs.iter().map(TabEntry::from).collect(),
            chunks: view.chunks.iter().map(ChunkEntry::from).collect(),
            status: view.status.as_ref().map(StatusEntry::from),
        }
    }

    pub fn tabs(view: &View) -> Self {
        ViewEvent::Tabs {
            directory: view.directory.to_string(),
            tabs: view.tabs.iter().map(TabEntry::from).collect(),
        }
    }

    pub fn to_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
