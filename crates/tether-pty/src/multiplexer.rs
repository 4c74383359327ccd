use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use uuid::Uuid;

use crate::pty::PtyError;
use crate::session::{LocalSession, OUTPUT_CAPACITY};
use crate::transport::SessionId;

/// Owns every local PTY session, keyed by transport session id.
///
/// Ids are random UUIDs so an id persisted by a previous run can never
/// resolve to an unrelated process in this one.
pub struct Multiplexer {
    sessions: HashMap<SessionId, Arc<LocalSession>>,
    shell: Option<String>,
    output_capacity: usize,
}

impl Multiplexer {
    /// Create a new, empty multiplexer that spawns the user's default shell.
    pub fn new() -> Self {
        Self {
            sessions: HashMap::new(),
            shell: None,
            output_capacity: OUTPUT_CAPACITY,
        }
    }

    /// Create a multiplexer that spawns `shell` instead of `$SHELL`.
    pub fn with_shell(shell: impl Into<String>) -> Self {
        Self {
            sessions: HashMap::new(),
            shell: Some(shell.into()),
            output_capacity: OUTPUT_CAPACITY,
        }
    }

    /// How many output chunks a subscriber of a new session may fall behind by.
    pub fn with_output_capacity(mut self, capacity: usize) -> Self {
        self.output_capacity = capacity;
        self
    }

    /// Create a new terminal session and return its ID.
    pub fn create_session(
        &mut self,
        cwd: &Path,
        cols: u16,
        rows: u16,
    ) -> Result<SessionId, PtyError> {
        let id = Uuid::new_v4().to_string();
        let session = LocalSession::spawn_with_capacity(
            id.clone(),
            self.shell.as_deref(),
            cwd,
            cols,
            rows,
            self.output_capacity,
        )?;
        self.sessions.insert(id.clone(), Arc::new(session));
        Ok(id)
    }

    /// Get a session by ID.
    pub fn get_session(&self, id: &str) -> Option<Arc<LocalSession>> {
        self.sessions.get(id).cloned()
    }

    /// Remove a session. Its process is killed once the last handle drops,
    /// or explicitly by the caller.
    pub fn remove_session(&mut self, id: &str) -> Option<Arc<LocalSession>> {
        self.sessions.remove(id)
    }

    /// List all session IDs.
    pub fn list_sessions(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.sessions.keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl Default for Multiplexer {
    fn default() -> Self {
        Self::new()
    }
}
