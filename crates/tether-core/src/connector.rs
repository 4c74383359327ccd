//! Stream Connector: at most one live stream, for the focused tab.
//!
//! Messages arrive tagged with terminal and subscription ids. Anything not
//! from the current subscription of the tracked terminal is dropped, so a
//! late message from a torn-down stream can never touch a tab.

use std::sync::Arc;

use tether_pty::{
    ConnectOptions, PtyTransport, SessionId, StreamEvent, StreamMessage, StreamPayload,
    StreamSink, Subscription, SubscriptionId,
};
use tokio::sync::mpsc;

use crate::buffer::Chunk;
use crate::registry::Registry;
use crate::tab::{DirectoryKey, TabId};

/// Sent to a restored PTY so it repaints its prompt.
pub const NUDGE: &str = "\r";

struct ActiveStream {
    directory: DirectoryKey,
    tab_id: TabId,
    terminal_id: SessionId,
    subscription_id: SubscriptionId,
    subscription: Subscription,
}

/// What a handled message did, for the coordinator to act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamUpdate {
    /// Superseded or unknown; nothing changed.
    Ignored,
    /// `nudged` means the caller owes the terminal one [`NUDGE`].
    Connected {
        directory: DirectoryKey,
        tab_id: TabId,
        terminal_id: SessionId,
        nudged: bool,
    },
    Reconnecting {
        attempt: u32,
        max_attempts: u32,
    },
    Data {
        directory: DirectoryKey,
        tab_id: TabId,
        chunk: Option<Chunk>,
    },
    Exited {
        directory: DirectoryKey,
        tab_id: TabId,
        terminal_id: SessionId,
        chunk: Option<Chunk>,
        exit_code: Option<u32>,
        signal: Option<String>,
    },
    Error {
        directory: DirectoryKey,
        tab_id: TabId,
        terminal_id: SessionId,
        message: String,
        fatal: bool,
    },
}

pub struct StreamConnector {
    transport: Arc<dyn PtyTransport>,
    options: ConnectOptions,
    tx: mpsc::UnboundedSender<StreamMessage>,
    active: Option<ActiveStream>,
    next_subscription: SubscriptionId,
    pending_nudge: Option<SessionId>,
}

impl StreamConnector {
    pub fn new(
        transport: Arc<dyn PtyTransport>,
        options: ConnectOptions,
        tx: mpsc::UnboundedSender<StreamMessage>,
    ) -> Self {
        Self {
            transport,
            options,
            tx,
            active: None,
            next_subscription: 1,
            pending_nudge: None,
        }
    }

    /// Open a stream for `terminal_id`, replacing any other stream.
    ///
    /// Returns `false` if that terminal is already the tracked one.
    pub fn start_stream(&mut self, dir: &DirectoryKey, tab_id: &str, terminal_id: &str) -> bool {
        if self.is_tracking(terminal_id) {
            return false;
        }
        self.disconnect_stream();

        let subscription_id = self.next_subscription;
        self.next_subscription += 1;

        log::debug!("connecting stream {subscription_id} to {terminal_id} for {dir}/{tab_id}");
        let sink = StreamSink::new(terminal_id.to_string(), subscription_id, self.tx.clone());
        let subscription = self.transport.connect(terminal_id, sink, self.options);

        self.active = Some(ActiveStream {
            directory: dir.clone(),
            tab_id: tab_id.to_string(),
            terminal_id: terminal_id.to_string(),
            subscription_id,
            subscription,
        });
        true
    }

    /// Close the current subscription, if any.
    pub fn disconnect_stream(&mut self) {
        if let Some(mut active) = self.active.take() {
            log::debug!(
                "disconnecting stream {} from {}",
                active.subscription_id,
                active.terminal_id
            );
            active.subscription.close();
        }
        self.pending_nudge = None;
    }

    pub fn is_tracking(&self, terminal_id: &str) -> bool {
        self.active
            .as_ref()
            .is_some_and(|a| a.terminal_id == terminal_id)
    }

    /// The tracked terminal, with the tab it feeds.
    pub fn active(&self) -> Option<(&DirectoryKey, &str, &str)> {
        self.active
            .as_ref()
            .map(|a| (&a.directory, a.tab_id.as_str(), a.terminal_id.as_str()))
    }

    /// Report a nudge on the next `Connected` for `terminal_id`, once.
    pub fn flag_nudge(&mut self, terminal_id: &str) {
        self.pending_nudge = Some(terminal_id.to_string());
    }

    pub fn handle(&mut self, message: StreamMessage, registry: &mut Registry) -> StreamUpdate {
        let Some(active) = self.active.as_ref() else {
            return StreamUpdate::Ignored;
        };
        if active.terminal_id != message.terminal_id
            || active.subscription_id != message.subscription
        {
            log::trace!(
                "dropping message for superseded stream {} ({})",
                message.subscription,
                message.terminal_id
            );
            return StreamUpdate::Ignored;
        }
        let dir = active.directory.clone();
        let tab_id = active.tab_id.clone();
        let terminal_id = message.terminal_id;

        match message.payload {
            StreamPayload::Event(StreamEvent::Connected) => {
                registry.set_connecting(&dir, &tab_id, false);
                let nudged = self.pending_nudge.as_deref() == Some(terminal_id.as_str());
                if nudged {
                    self.pending_nudge = None;
                }
                StreamUpdate::Connected {
                    directory: dir,
                    tab_id,
                    terminal_id,
                    nudged,
                }
            }
            StreamPayload::Event(StreamEvent::Reconnecting {
                attempt,
                max_attempts,
            }) => StreamUpdate::Reconnecting {
                attempt,
                max_attempts,
            },
            StreamPayload::Event(StreamEvent::Data { data }) => {
                let chunk = registry.append_to_buffer(&dir, &tab_id, &data);
                StreamUpdate::Data {
                    directory: dir,
                    tab_id,
                    chunk,
                }
            }
            StreamPayload::Event(StreamEvent::Exit { exit_code, signal }) => {
                let line = exit_line(exit_code, signal.as_deref());
                let chunk = registry.append_to_buffer(&dir, &tab_id, &line);
                registry.set_tab_session_id(&dir, &tab_id, None);
                registry.set_connecting(&dir, &tab_id, false);
                self.disconnect_stream();
                log::info!("terminal {terminal_id} in {dir}/{tab_id} exited");
                StreamUpdate::Exited {
                    directory: dir,
                    tab_id,
                    terminal_id,
                    chunk,
                    exit_code,
                    signal,
                }
            }
            StreamPayload::Error { message, fatal } => {
                if fatal {
                    log::warn!("stream for {terminal_id} failed: {message}");
                    registry.set_connecting(&dir, &tab_id, false);
                    registry.set_tab_session_id(&dir, &tab_id, None);
                    self.disconnect_stream();
                } else {
                    log::debug!("stream for {terminal_id}: {message}");
                }
                StreamUpdate::Error {
                    directory: dir,
                    tab_id,
                    terminal_id,
                    message,
                    fatal,
                }
            }
        }
    }
}

impl Drop for StreamConnector {
    fn drop(&mut self) {
        self.disconnect_stream();
    }
}

/// The line appended to a tab's buffer when its process ends.
pub fn exit_line(exit_code: Option<u32>, signal: Option<&str>) -> String {
    match (exit_code, signal) {
        (_, Some(signal)) => format!("\r\n[Process exited with signal {signal}]\r\n"),
        (Some(code), None) => format!("\r\n[Process exited with code {code}]\r\n"),
        (None, None) => "\r\n[Process exited]\r\n".to_string(),
    }
}
