//! Directory Registry: every tab, grouped by working directory.
//!
//! Each operation validates its target before touching anything, so a
//! failed lookup leaves the registry exactly as it was. Operations on an
//! unknown directory or tab are no-ops.

use std::collections::BTreeMap;

use tether_pty::SessionId;

use crate::buffer::{Chunk, DEFAULT_BUFFER_BUDGET};
use crate::tab::{format_tab_id, DirectoryKey, Tab, TabId};

#[derive(Debug, Clone)]
pub struct Directory {
    pub(crate) tabs: Vec<Tab>,
    /// `None` means the first tab is active.
    pub(crate) active_tab_id: Option<TabId>,
}

impl Directory {
    pub fn tabs(&self) -> &[Tab] {
        &self.tabs
    }

    pub fn active_tab_id(&self) -> Option<&str> {
        self.active_tab_id.as_deref()
    }

    /// The active tab, falling back to the first one.
    pub fn active_tab(&self) -> Option<&Tab> {
        self.active_tab_id
            .as_deref()
            .and_then(|id| self.tab(id))
            .or_else(|| self.tabs.first())
    }

    pub fn tab(&self, id: &str) -> Option<&Tab> {
        self.tabs.iter().find(|t| t.id == id)
    }

    fn tab_mut(&mut self, id: &str) -> Option<&mut Tab> {
        self.tabs.iter_mut().find(|t| t.id == id)
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.tabs.iter().position(|t| t.id == id)
    }
}

#[derive(Debug)]
pub struct Registry {
    pub(crate) directories: BTreeMap<DirectoryKey, Directory>,
    pub(crate) next_tab_number: u64,
    pub(crate) next_chunk_id: u64,
    pub(crate) buffer_budget: usize,
}

impl Registry {
    pub fn new(buffer_budget: usize) -> Self {
        Self {
            directories: BTreeMap::new(),
            next_tab_number: 1,
            next_chunk_id: 1,
            buffer_budget,
        }
    }

    pub fn buffer_budget(&self) -> usize {
        self.buffer_budget
    }

    /// The number the next created tab id will carry.
    pub fn next_tab_number(&self) -> u64 {
        self.next_tab_number
    }

    pub fn directory(&self, dir: &DirectoryKey) -> Option<&Directory> {
        self.directories.get(dir)
    }

    pub fn directories(&self) -> impl Iterator<Item = (&DirectoryKey, &Directory)> {
        self.directories.iter()
    }

    pub fn tab(&self, dir: &DirectoryKey, tab_id: &str) -> Option<&Tab> {
        self.directories.get(dir)?.tab(tab_id)
    }

    pub fn active_tab(&self, dir: &DirectoryKey) -> Option<&Tab> {
        self.directories.get(dir)?.active_tab()
    }

    /// Create `dir` with one empty tab if it does not exist yet.
    ///
    /// Returns `true` if the directory was created.
    pub fn ensure_directory(&mut self, dir: &DirectoryKey) -> bool {
        if self.directories.contains_key(dir) {
            return false;
        }
        let tab = self.fresh_tab(1);
        self.directories.insert(
            dir.clone(),
            Directory {
                tabs: vec![tab],
                active_tab_id: None,
            },
        );
        true
    }

    /// Append a new tab to `dir` and make it active.
    ///
    /// For a directory that does not exist yet, the directory is created and
    /// its initial tab is returned.
    pub fn create_tab(&mut self, dir: &DirectoryKey) -> TabId {
        if self.ensure_directory(dir) {
            if let Some(tab) = self.active_tab(dir) {
                return tab.id.clone();
            }
        }

        let count = self.directories.get(dir).map_or(0, |d| d.tabs.len());
        let tab = self.fresh_tab(count + 1);
        let id = tab.id.clone();
        if let Some(directory) = self.directories.get_mut(dir) {
            directory.tabs.push(tab);
            directory.active_tab_id = Some(id.clone());
        }
        id
    }

    /// Returns `true` if the active tab changed.
    pub fn set_active_tab(&mut self, dir: &DirectoryKey, tab_id: &str) -> bool {
        let Some(directory) = self.directories.get_mut(dir) else {
            return false;
        };
        if directory.tab(tab_id).is_none() {
            return false;
        }
        if directory.active_tab().map(|t| t.id.as_str()) == Some(tab_id) {
            return false;
        }
        directory.active_tab_id = Some(tab_id.to_string());
        true
    }

    /// Remove a tab, returning it.
    ///
    /// If it was active, activation moves to the tab now at the same index
    /// (or the new last tab). A directory left empty gets one fresh tab.
    pub fn close_tab(&mut self, dir: &DirectoryKey, tab_id: &str) -> Option<Tab> {
        let directory = self.directories.get(dir)?;
        let index = directory.position(tab_id)?;
        let was_active = directory.active_tab().map(|t| t.id.as_str()) == Some(tab_id);
        let fresh = (directory.tabs.len() == 1).then(|| self.fresh_tab(1));

        let directory = self.directories.get_mut(dir)?;
        let removed = directory.tabs.remove(index);

        if let Some(fresh) = fresh {
            directory.active_tab_id = Some(fresh.id.clone());
            directory.tabs.push(fresh);
        } else if was_active {
            let next = index.min(directory.tabs.len() - 1);
            directory.active_tab_id = Some(directory.tabs[next].id.clone());
        }

        Some(removed)
    }

    /// Swap a tab for a fresh empty one at the same position, keeping its
    /// label and active status. Returns the removed tab and the new id.
    pub fn replace_tab(&mut self, dir: &DirectoryKey, tab_id: &str) -> Option<(Tab, TabId)> {
        let directory = self.directories.get(dir)?;
        let index = directory.position(tab_id)?;
        let was_active = directory.active_tab().map(|t| t.id.as_str()) == Some(tab_id);
        let label = directory.tabs[index].label.clone();

        let fresh = Tab::new(self.allocate_tab_id(), label);
        let new_id = fresh.id.clone();

        let directory = self.directories.get_mut(dir)?;
        let removed = std::mem::replace(&mut directory.tabs[index], fresh);
        if was_active {
            directory.active_tab_id = Some(new_id.clone());
        }
        Some((removed, new_id))
    }

    /// Remove a directory and all of its tabs.
    pub fn remove_directory(&mut self, dir: &DirectoryKey) -> Option<Directory> {
        self.directories.remove(dir)
    }

    /// Bind (or unbind, with `None`) a PTY session to a tab.
    ///
    /// Binding a different session discards the buffered output. Unbinding
    /// keeps it, so the last output of an exited process stays visible.
    /// Returns `true` if the binding changed.
    pub fn set_tab_session_id(
        &mut self,
        dir: &DirectoryKey,
        tab_id: &str,
        session_id: Option<SessionId>,
    ) -> bool {
        let Some(tab) = self.tab_mut(dir, tab_id) else {
            return false;
        };
        if tab.terminal_session_id == session_id {
            return false;
        }
        if session_id.is_some() {
            tab.buffer.clear();
        }
        tab.terminal_session_id = session_id;
        true
    }

    pub fn set_connecting(&mut self, dir: &DirectoryKey, tab_id: &str, connecting: bool) {
        if let Some(tab) = self.tab_mut(dir, tab_id) {
            tab.is_connecting = connecting;
        }
    }

    /// Append output to a tab's buffer. Empty input is ignored.
    ///
    /// Returns the appended chunk.
    pub fn append_to_buffer(&mut self, dir: &DirectoryKey, tab_id: &str, text: &str) -> Option<Chunk> {
        if text.is_empty() || self.tab(dir, tab_id).is_none() {
            return None;
        }
        let chunk = Chunk {
            id: self.next_chunk_id,
            data: text.to_string(),
        };
        self.next_chunk_id += 1;

        let budget = self.buffer_budget;
        let tab = self.tab_mut(dir, tab_id)?;
        tab.buffer.push(chunk.clone(), budget);
        Some(chunk)
    }

    /// Returns `true` if the tab exists.
    pub fn clear_buffer(&mut self, dir: &DirectoryKey, tab_id: &str) -> bool {
        match self.tab_mut(dir, tab_id) {
            Some(tab) => {
                tab.buffer.clear();
                true
            }
            None => false,
        }
    }

    fn tab_mut(&mut self, dir: &DirectoryKey, tab_id: &str) -> Option<&mut Tab> {
        self.directories.get_mut(dir)?.tab_mut(tab_id)
    }

    fn allocate_tab_id(&mut self) -> TabId {
        let id = format_tab_id(self.next_tab_number);
        self.next_tab_number += 1;
        id
    }

    fn fresh_tab(&mut self, position: usize) -> Tab {
        Tab::new(self.allocate_tab_id(), format!("Terminal {position}"))
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_BUDGET)
    }
}
