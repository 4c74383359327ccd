//! tether-core: per-directory terminal tabs that survive reloads.
//!
//! # Architecture
//!
//! - [`TerminalBuffer`]: bounded chunk buffer with oldest-first eviction.
//! - [`Registry`]: directories, their tabs, and which tab is active.
//! - [`StreamConnector`]: the single live stream for the focused tab.
//! - [`Coordinator`]: decides when PTYs are created, reused, nudged, and closed.
//! - [`StateStore`]: where the durable layout is saved and restored from.
//!
//! Writes to a PTY (input, resize, close) go through one queue per session.

pub mod buffer;
pub mod config;
pub mod connector;
pub mod coordinator;
pub mod error;
pub mod input;
pub mod persistence;
pub mod registry;
pub mod status;
pub mod tab;
mod writer;

#[cfg(test)]
mod testing;

pub use buffer::{Chunk, TerminalBuffer, DEFAULT_BUFFER_BUDGET};
pub use config::TerminalConfig;
pub use connector::{StreamConnector, StreamUpdate};
pub use coordinator::{Activation, Completion, Coordinator, Inbound, Inbox};
pub use error::StoreError;
pub use input::{KeyInput, UnknownKey, Viewport};
pub use persistence::{MemoryStore, SqliteStore, StateStore};
pub use registry::{Directory, Registry};
pub use status::{Notification, StatusKind, StatusLine, TabSummary, View};
pub use tab::{DirectoryKey, Tab, TabId};
