//! Persistence Layer: durable projection of the registry and rehydration.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use tether_db::{PersistedDirectory, PersistedState, PersistedTab};
use tether_pty::SessionId;

use crate::error::StoreError;
use crate::registry::{Directory, Registry};
use crate::tab::{format_tab_id, tab_number, DirectoryKey, Tab};

/// Where the durable projection lives between runs.
pub trait StateStore: Send {
    fn load(&self) -> Result<PersistedState, StoreError>;
    fn save(&self, state: &PersistedState) -> Result<(), StoreError>;
}

/// Stores the layout in the terminal tables of a tether database.
pub struct SqliteStore {
    db: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn new(db: Arc<Mutex<Connection>>) -> Self {
        Self { db }
    }
}

impl StateStore for SqliteStore {
    fn load(&self) -> Result<PersistedState, StoreError> {
        let conn = self.db.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(tether_db::terminals::load_state(&conn)?)
    }

    fn save(&self, state: &PersistedState) -> Result<(), StoreError> {
        let conn = self.db.lock().map_err(|_| StoreError::Poisoned)?;
        tether_db::terminals::save_state(&conn, state)?;
        Ok(())
    }
}

/// Keeps the layout in memory only. Clones share the same slot.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemorySlot>>,
}

#[derive(Default)]
struct MemorySlot {
    state: Option<PersistedState>,
    saves: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: PersistedState) -> Self {
        let store = Self::default();
        if let Ok(mut slot) = store.inner.lock() {
            slot.state = Some(state);
        }
        store
    }

    /// The most recently saved state, if any.
    pub fn snapshot(&self) -> Option<PersistedState> {
        self.inner.lock().ok()?.state.clone()
    }

    /// How many times `save` has been called.
    pub fn save_count(&self) -> usize {
        self.inner.lock().map(|slot| slot.saves).unwrap_or(0)
    }
}

impl StateStore for MemoryStore {
    fn load(&self) -> Result<PersistedState, StoreError> {
        let slot = self.inner.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(slot.state.clone().unwrap_or_default())
    }

    fn save(&self, state: &PersistedState) -> Result<(), StoreError> {
        let mut slot = self.inner.lock().map_err(|_| StoreError::Poisoned)?;
        slot.state = Some(state.clone());
        slot.saves += 1;
        Ok(())
    }
}

impl Registry {
    /// The fields that survive a restart. Buffers and connecting flags are left out.
    pub fn durable_projection(&self) -> PersistedState {
        let sessions = self
            .directories
            .iter()
            .map(|(key, directory)| {
                let tabs = directory
                    .tabs
                    .iter()
                    .map(|tab| PersistedTab {
                        id: tab.id.clone(),
                        label: tab.label.clone(),
                        terminal_session_id: tab.terminal_session_id.clone(),
                        created_at: tab.created_at,
                    })
                    .collect();
                (
                    key.to_string(),
                    PersistedDirectory {
                        active_tab_id: directory.active_tab_id.clone(),
                        tabs,
                    },
                )
            })
            .collect();

        PersistedState {
            sessions,
            next_tab_id: self.next_tab_number,
        }
    }

    /// Rebuild a registry from persisted state.
    ///
    /// Every tab comes back with an empty buffer and not connecting. Also
    /// returns the set of PTY ids that were bound when the state was saved.
    pub fn restore(state: PersistedState, buffer_budget: usize) -> (Registry, HashSet<SessionId>) {
        let mut registry = Registry::new(buffer_budget);
        let mut restored = HashSet::new();
        let mut seen_ids = HashSet::new();
        let mut highest = 0;

        for (raw_key, persisted) in state.sessions {
            let Some(key) = DirectoryKey::new(&raw_key) else {
                log::warn!("skipping persisted directory with invalid key {raw_key:?}");
                continue;
            };
            if registry.directories.contains_key(&key) {
                log::warn!("skipping duplicate persisted directory {key}");
                continue;
            }

            let mut tabs = Vec::with_capacity(persisted.tabs.len());
            for tab in persisted.tabs {
                if !seen_ids.insert(tab.id.clone()) {
                    log::warn!("skipping duplicate persisted tab {} in {key}", tab.id);
                    continue;
                }
                if let Some(n) = tab_number(&tab.id) {
                    highest = highest.max(n);
                }
                if let Some(session) = &tab.terminal_session_id {
                    restored.insert(session.clone());
                }
                tabs.push(Tab::restored(
                    tab.id,
                    tab.label,
                    tab.terminal_session_id,
                    tab.created_at,
                ));
            }

            let active_tab_id = match persisted.active_tab_id {
                Some(id) if tabs.iter().any(|t| t.id == id) => Some(id),
                Some(_) => tabs.first().map(|t| t.id.clone()),
                None => None,
            };

            registry
                .directories
                .insert(key, Directory { tabs, active_tab_id });
        }

        registry.next_tab_number = registry
            .next_tab_number
            .max(state.next_tab_id)
            .max(highest + 1);

        // Tab ids are only allocated once the counter is settled.
        let empty: Vec<DirectoryKey> = registry
            .directories
            .iter()
            .filter(|(_, d)| d.tabs.is_empty())
            .map(|(k, _)| k.clone())
            .collect();
        for key in empty {
            let id = format_tab_id(registry.next_tab_number);
            registry.next_tab_number += 1;
            if let Some(directory) = registry.directories.get_mut(&key) {
                directory.tabs.push(Tab::new(id, "Terminal 1".to_string()));
                directory.active_tab_id = None;
            }
        }

        (registry, restored)
    }
}
