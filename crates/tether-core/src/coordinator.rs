//! Session Lifecycle Coordinator.
//!
//! The coordinator owns the registry and the stream connector and is driven
//! from a single task: UI calls go through its methods, transport results come
//! back through the [`Inbox`] and are applied with [`Coordinator::handle`].
//!
//! Async transport calls are never awaited in place. Creation is spawned and
//! carries the focus generation it was issued under; the result is only
//! applied if that generation is still current, and a stale result closes the
//! PTY it created instead of binding it. Input, resizes and closes go through
//! a per-session `SessionWriter` queue so they arrive in issue order.

use std::collections::HashSet;
use std::sync::Arc;

use tether_db::PersistedState;
use tether_pty::{CreateSession, PtyTransport, SessionId, StreamMessage};
use tokio::sync::{broadcast, mpsc};

use crate::buffer::Chunk;
use crate::config::TerminalConfig;
use crate::connector::{StreamConnector, StreamUpdate, NUDGE};
use crate::input::{KeyInput, Viewport};
use crate::persistence::StateStore;
use crate::registry::Registry;
use crate::status::{Notification, StatusLine, TabSummary, View};
use crate::tab::{DirectoryKey, TabId};
use crate::writer::SessionWriter;

const NOTIFICATION_CAPACITY: usize = 1024;

/// The focus a creation request was issued for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Activation {
    pub directory: DirectoryKey,
    pub tab_id: TabId,
    pub generation: u64,
}

/// Result of a spawned transport call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    SessionCreated {
        activation: Activation,
        result: Result<SessionId, String>,
    },
    InputFailed {
        terminal_id: SessionId,
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Stream(StreamMessage),
    Completion(Completion),
}

/// Everything the transport sends back to the coordinator.
pub struct Inbox {
    stream_rx: mpsc::UnboundedReceiver<StreamMessage>,
    completion_rx: mpsc::UnboundedReceiver<Completion>,
}

impl Inbox {
    pub async fn recv(&mut self) -> Option<Inbound> {
        tokio::select! {
            Some(message) = self.stream_rx.recv() => Some(Inbound::Stream(message)),
            Some(completion) = self.completion_rx.recv() => Some(Inbound::Completion(completion)),
            else => None,
        }
    }

    pub fn try_recv(&mut self) -> Option<Inbound> {
        if let Ok(completion) = self.completion_rx.try_recv() {
            return Some(Inbound::Completion(completion));
        }
        self.stream_rx.try_recv().ok().map(Inbound::Stream)
    }
}

pub struct Coordinator {
    registry: Registry,
    connector: StreamConnector,
    writer: SessionWriter,
    transport: Arc<dyn PtyTransport>,
    store: Box<dyn StateStore>,
    completions: mpsc::UnboundedSender<Completion>,
    notifications: broadcast::Sender<Notification>,
    focus: Option<(DirectoryKey, TabId)>,
    generation: u64,
    pending_create: Option<Activation>,
    viewport: Option<Viewport>,
    /// PTY ids bound at load time that have not been nudged yet.
    restored: HashSet<SessionId>,
    status: Option<StatusLine>,
    last_saved: Option<PersistedState>,
}

impl Coordinator {
    /// Rehydrate from `store` and return the coordinator with its inbox.
    ///
    /// No stream is opened until a directory is focused. The coordinator
    /// spawns its transport calls, so drive it from within a Tokio runtime.
    pub fn new(
        transport: Arc<dyn PtyTransport>,
        store: Box<dyn StateStore>,
        config: TerminalConfig,
    ) -> (Self, Inbox) {
        let loaded = match store.load() {
            Ok(state) => Some(state),
            Err(e) => {
                log::warn!("failed to load terminal layout, starting empty: {e}");
                None
            }
        };
        let (registry, restored) =
            Registry::restore(loaded.clone().unwrap_or_default(), config.buffer_budget);
        log::info!(
            "restored {} directories with {} bound sessions",
            registry.directories().count(),
            restored.len()
        );

        let (stream_tx, stream_rx) = mpsc::unbounded_channel();
        let (completions, completion_rx) = mpsc::unbounded_channel();
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        let connector = StreamConnector::new(Arc::clone(&transport), config.connect, stream_tx);
        let writer = SessionWriter::new(Arc::clone(&transport), completions.clone());

        let coordinator = Self {
            registry,
            connector,
            writer,
            transport,
            store,
            completions,
            notifications,
            focus: None,
            generation: 0,
            pending_create: None,
            viewport: None,
            restored,
            status: None,
            last_saved: loaded,
        };
        let inbox = Inbox {
            stream_rx,
            completion_rx,
        };
        (coordinator, inbox)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn focus(&self) -> Option<(&DirectoryKey, &str)> {
        self.focus.as_ref().map(|(dir, tab)| (dir, tab.as_str()))
    }

    pub fn status(&self) -> Option<&StatusLine> {
        self.status.as_ref()
    }

    pub fn viewport(&self) -> Option<Viewport> {
        self.viewport
    }

    /// Whether `session_id` was restored at startup and not yet nudged.
    pub fn is_restored(&self, session_id: &str) -> bool {
        self.restored.contains(session_id)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.notifications.subscribe()
    }

    /// Focus `dir`, creating it with one tab if needed.
    pub fn open_directory(&mut self, dir: &DirectoryKey) -> TabId {
        if self.registry.ensure_directory(dir) {
            self.notify(Notification::TabsChanged {
                directory: dir.clone(),
            });
        }
        let tab_id = self
            .registry
            .active_tab(dir)
            .map(|t| t.id().to_string())
            .unwrap_or_default();
        self.focus_on(dir, &tab_id);
        self.persist();
        tab_id
    }

    /// Add a tab to `dir` and focus it.
    pub fn create_tab(&mut self, dir: &DirectoryKey) -> TabId {
        let tab_id = self.registry.create_tab(dir);
        self.notify(Notification::TabsChanged {
            directory: dir.clone(),
        });
        self.focus_on(dir, &tab_id);
        self.persist();
        tab_id
    }

    /// Returns `false` if the tab does not exist.
    pub fn switch_tab(&mut self, dir: &DirectoryKey, tab_id: &str) -> bool {
        if self.registry.tab(dir, tab_id).is_none() {
            return false;
        }
        if self.registry.set_active_tab(dir, tab_id) {
            self.notify(Notification::TabsChanged {
                directory: dir.clone(),
            });
        }
        self.focus_on(dir, tab_id);
        self.persist();
        true
    }

    /// Close a tab and its PTY. Returns `false` if the tab does not exist.
    pub fn close_tab(&mut self, dir: &DirectoryKey, tab_id: &str) -> bool {
        let Some(removed) = self.registry.close_tab(dir, tab_id) else {
            return false;
        };
        if let Some(session) = removed.terminal_session_id() {
            self.release_session(session);
        }
        self.notify(Notification::TabsChanged {
            directory: dir.clone(),
        });
        if self.is_focused_directory(dir) {
            self.refocus(dir);
        }
        self.persist();
        true
    }

    /// Replace a tab with a fresh one at the same position and focus it.
    ///
    /// The old PTY is closed best-effort. Returns the new tab id.
    pub fn restart_tab(&mut self, dir: &DirectoryKey, tab_id: &str) -> Option<TabId> {
        let (removed, new_id) = self.registry.replace_tab(dir, tab_id)?;
        if let Some(session) = removed.terminal_session_id() {
            self.release_session(session);
        }
        log::info!("restarted {dir}/{tab_id} as {new_id}");
        self.registry.set_active_tab(dir, &new_id);
        self.notify(Notification::TabsChanged {
            directory: dir.clone(),
        });
        self.set_status(None);
        self.focus_on(dir, &new_id);
        self.persist();
        Some(new_id)
    }

    /// Drop a directory and close every PTY bound in it.
    pub fn remove_directory(&mut self, dir: &DirectoryKey) -> bool {
        let Some(directory) = self.registry.remove_directory(dir) else {
            return false;
        };
        for tab in directory.tabs() {
            if let Some(session) = tab.terminal_session_id() {
                self.release_session(session);
            }
        }
        if self.is_focused_directory(dir) {
            self.connector.disconnect_stream();
            self.focus = None;
            self.generation += 1;
            self.pending_create = None;
            self.set_status(None);
        }
        self.notify(Notification::TabsChanged {
            directory: dir.clone(),
        });
        self.persist();
        true
    }

    /// Forward keystroke bytes to the focused PTY.
    ///
    /// Returns `false` if there is no bound PTY to send to.
    pub fn send_input(&mut self, data: &str) -> bool {
        if data.is_empty() {
            return false;
        }
        let Some(session) = self.focused_session() else {
            return false;
        };
        self.writer.input(&session, data);
        true
    }

    pub fn send_key(&mut self, key: KeyInput) -> bool {
        match key.encode() {
            Some(bytes) => self.send_input(&bytes),
            None => false,
        }
    }

    /// Remember the viewport and resize the focused PTY to it.
    pub fn resize(&mut self, viewport: Viewport) {
        self.viewport = Some(viewport);
        if let Some(session) = self.focused_session() {
            self.writer.resize(&session, viewport);
        }
    }

    /// Clear the focused tab's buffer.
    pub fn clear_screen(&mut self) -> bool {
        let Some((dir, tab_id)) = self.focus.clone() else {
            return false;
        };
        if !self.registry.clear_buffer(&dir, &tab_id) {
            return false;
        }
        self.notify(Notification::BufferCleared {
            directory: dir,
            tab_id,
        });
        true
    }

    /// Snapshot of the focused directory for a full redraw.
    pub fn view(&self) -> Option<View> {
        let (dir, tab_id) = self.focus.as_ref()?;
        let directory = self.registry.directory(dir)?;
        let tabs = directory
            .tabs()
            .iter()
            .map(|tab| TabSummary {
                id: tab.id().to_string(),
                label: tab.label().to_string(),
                bound: tab.terminal_session_id().is_some(),
                connecting: tab.is_connecting(),
                active: tab.id() == tab_id,
            })
            .collect();
        let chunks = directory.tab(tab_id)?.buffer().chunks().cloned().collect();
        Some(View {
            directory: dir.clone(),
            tab_id: tab_id.clone(),
            tabs,
            chunks,
            status: self.status.clone(),
        })
    }

    /// Focused-tab chunks newer than `last_seen`.
    pub fn chunks_after(&self, last_seen: Option<u64>) -> Vec<Chunk> {
        let Some((dir, tab_id)) = self.focus.as_ref() else {
            return Vec::new();
        };
        self.registry
            .tab(dir, tab_id)
            .map(|tab| tab.buffer().chunks_after(last_seen).cloned().collect())
            .unwrap_or_default()
    }

    /// Apply one message from the inbox.
    pub fn handle(&mut self, inbound: Inbound) {
        match inbound {
            Inbound::Stream(message) => self.handle_stream(message),
            Inbound::Completion(completion) => self.handle_completion(completion),
        }
        self.persist();
    }

    /// Stop streaming and write the final layout. PTYs are left running.
    pub fn shutdown(&mut self) {
        self.connector.disconnect_stream();
        self.persist();
    }

    fn handle_stream(&mut self, message: StreamMessage) {
        match self.connector.handle(message, &mut self.registry) {
            StreamUpdate::Ignored => {}
            StreamUpdate::Connected {
                directory,
                tab_id,
                terminal_id,
                nudged,
            } => {
                self.set_status(None);
                self.notify(Notification::Focused { directory, tab_id });
                if let Some(viewport) = self.viewport {
                    self.writer.resize(&terminal_id, viewport);
                }
                if nudged {
                    self.restored.remove(&terminal_id);
                    self.writer.inject(&terminal_id, NUDGE);
                }
            }
            StreamUpdate::Reconnecting {
                attempt,
                max_attempts,
            } => self.set_status(Some(StatusLine::reconnecting(attempt, max_attempts))),
            StreamUpdate::Data {
                directory,
                tab_id,
                chunk,
            } => {
                if let Some(chunk) = chunk {
                    self.notify(Notification::ChunkAppended {
                        directory,
                        tab_id,
                        chunk,
                    });
                }
            }
            StreamUpdate::Exited {
                directory,
                tab_id,
                terminal_id,
                chunk,
                ..
            } => {
                // The stream is gone; reap what is left of the process.
                self.restored.remove(&terminal_id);
                self.writer.close(&terminal_id);
                if let Some(chunk) = chunk {
                    self.notify(Notification::ChunkAppended {
                        directory: directory.clone(),
                        tab_id,
                        chunk,
                    });
                }
                self.notify(Notification::TabsChanged { directory });
                self.set_status(Some(StatusLine::ended()));
            }
            StreamUpdate::Error {
                directory,
                terminal_id,
                message,
                fatal,
                ..
            } => {
                if fatal {
                    self.restored.remove(&terminal_id);
                    self.writer.close(&terminal_id);
                    self.notify(Notification::TabsChanged { directory });
                    self.set_status(Some(StatusLine::failed(format!(
                        "Connection failed: {message}"
                    ))));
                } else {
                    self.set_status(Some(StatusLine::warning(message)));
                }
            }
        }
    }

    fn handle_completion(&mut self, completion: Completion) {
        match completion {
            Completion::SessionCreated { activation, result } => {
                if self.pending_create.as_ref() == Some(&activation) {
                    self.pending_create = None;
                }
                let current = self.is_current(&activation);
                match result {
                    Ok(session) if current => {
                        log::info!(
                            "bound {session} to {}/{}",
                            activation.directory,
                            activation.tab_id
                        );
                        self.registry.set_tab_session_id(
                            &activation.directory,
                            &activation.tab_id,
                            Some(session),
                        );
                        self.notify(Notification::TabsChanged {
                            directory: activation.directory,
                        });
                        self.activate();
                    }
                    Ok(session) => {
                        log::debug!(
                            "closing {session} created for stale focus {}/{}",
                            activation.directory,
                            activation.tab_id
                        );
                        self.writer.close(&session);
                    }
                    Err(message) if current => {
                        log::warn!(
                            "failed to create terminal for {}: {message}",
                            activation.directory
                        );
                        self.registry.set_connecting(
                            &activation.directory,
                            &activation.tab_id,
                            false,
                        );
                        self.set_status(Some(StatusLine::failed(format!(
                            "Failed to start terminal: {message}"
                        ))));
                    }
                    Err(message) => {
                        log::debug!("ignoring stale creation failure: {message}");
                    }
                }
            }
            Completion::InputFailed {
                terminal_id,
                message,
            } => {
                log::warn!("failed to send input to {terminal_id}: {message}");
                if self.connector.is_tracking(&terminal_id) {
                    self.set_status(Some(StatusLine::warning(format!(
                        "Input not delivered: {message}"
                    ))));
                }
            }
        }
    }

    /// A creation result still applies if focus has not moved since it was
    /// requested and the tab is still there without a PTY.
    fn is_current(&self, activation: &Activation) -> bool {
        activation.generation == self.generation
            && self.focus.as_ref().is_some_and(|(dir, tab)| {
                *dir == activation.directory && *tab == activation.tab_id
            })
            && self
                .registry
                .tab(&activation.directory, &activation.tab_id)
                .is_some_and(|tab| tab.terminal_session_id().is_none())
    }

    fn focus_on(&mut self, dir: &DirectoryKey, tab_id: &str) {
        let next = (dir.clone(), tab_id.to_string());
        if self.focus.as_ref() != Some(&next) {
            if let Some((prev_dir, prev_tab)) = self.focus.take() {
                self.registry.set_connecting(&prev_dir, &prev_tab, false);
            }
            self.generation += 1;
            self.focus = Some(next);
            self.set_status(None);
            self.notify(Notification::Focused {
                directory: dir.clone(),
                tab_id: tab_id.to_string(),
            });
        }
        self.activate();
    }

    fn refocus(&mut self, dir: &DirectoryKey) {
        match self.registry.active_tab(dir).map(|t| t.id().to_string()) {
            Some(tab_id) => self.focus_on(dir, &tab_id),
            None => self.focus = None,
        }
    }

    /// Make sure the focused tab has a PTY and a stream.
    fn activate(&mut self) {
        let Some((dir, tab_id)) = self.focus.clone() else {
            return;
        };
        let Some(tab) = self.registry.tab(&dir, &tab_id) else {
            return;
        };

        match tab.terminal_session_id().map(str::to_string) {
            Some(session) => {
                if self.connector.is_tracking(&session) {
                    return;
                }
                let nudge = self.restored.contains(&session) && tab.buffer().is_empty();
                self.registry.set_connecting(&dir, &tab_id, true);
                self.connector.start_stream(&dir, &tab_id, &session);
                if nudge {
                    self.connector.flag_nudge(&session);
                }
            }
            None => {
                self.connector.disconnect_stream();
                let activation = Activation {
                    directory: dir.clone(),
                    tab_id: tab_id.clone(),
                    generation: self.generation,
                };
                if self.pending_create.as_ref() == Some(&activation) {
                    return;
                }
                self.registry.set_connecting(&dir, &tab_id, true);
                self.pending_create = Some(activation.clone());
                self.spawn_create(activation);
            }
        }
    }

    fn spawn_create(&self, activation: Activation) {
        let request = CreateSession {
            cwd: activation.directory.to_path_buf(),
            cols: self.viewport.map(|v| v.cols()),
            rows: self.viewport.map(|v| v.rows()),
        };
        log::debug!(
            "creating terminal for {}/{}",
            activation.directory,
            activation.tab_id
        );
        let transport = Arc::clone(&self.transport);
        let completions = self.completions.clone();
        tokio::spawn(async move {
            let result = transport
                .create_session(request)
                .await
                .map_err(|e| e.to_string());
            let _ = completions.send(Completion::SessionCreated { activation, result });
        });
    }

    /// Stop streaming from `session` if needed and close it.
    fn release_session(&mut self, session: &str) {
        if self.connector.is_tracking(session) {
            self.connector.disconnect_stream();
        }
        self.restored.remove(session);
        self.writer.close(session);
    }

    fn focused_session(&self) -> Option<SessionId> {
        let (dir, tab_id) = self.focus.as_ref()?;
        self.registry
            .tab(dir, tab_id)?
            .terminal_session_id()
            .map(str::to_string)
    }

    fn is_focused_directory(&self, dir: &DirectoryKey) -> bool {
        self.focus.as_ref().is_some_and(|(focused, _)| focused == dir)
    }

    fn set_status(&mut self, status: Option<StatusLine>) {
        if self.status != status {
            self.status = status.clone();
            self.notify(Notification::Status(status));
        }
    }

    fn notify(&self, notification: Notification) {
        // No subscribers is fine.
        let _ = self.notifications.send(notification);
    }

    /// Save the durable projection if it changed since the last save.
    fn persist(&mut self) {
        let projection = self.registry.durable_projection();
        if self.last_saved.as_ref() == Some(&projection) {
            return;
        }
        match self.store.save(&projection) {
            Ok(()) => self.last_saved = Some(projection),
            Err(e) => log::warn!("failed to save terminal layout: {e}"),
        }
    }
}
