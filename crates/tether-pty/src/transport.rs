//! The PTY transport contract consumed by the session coordinator.
//!
//! A transport spawns and owns shell processes; the coordinator only ever
//! talks to it through [`PtyTransport`]. Stream output is delivered as tagged
//! [`StreamMessage`]s on a channel so the consumer can discard messages that
//! belong to a superseded subscription.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::pty::PtyError;

/// Identity of a PTY session, as assigned by the transport.
pub type SessionId = String;

/// Identity of one `connect` call. Unique per sink, never reused.
pub type SubscriptionId = u64;

/// Errors reported by a transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("session {0} not found")]
    SessionNotFound(SessionId),
    #[error("not an accessible directory: {0}")]
    InvalidDirectory(PathBuf),
    #[error(transparent)]
    Pty(#[from] PtyError),
    #[error("transport closed")]
    Closed,
}

/// Parameters for spawning a new PTY session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateSession {
    pub cwd: PathBuf,
    pub cols: Option<u16>,
    pub rows: Option<u16>,
}

/// Retry policy for establishing and re-establishing a stream.
///
/// Honored by transports whose attach can stall or drop, such as a remote
/// backend. [`crate::LocalTransport`] attaches in-process and ignores it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectOptions {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub connect_timeout: Duration,
}

impl ConnectOptions {
    /// Backoff before retry `attempt` (1-based): doubles from `initial_delay`, capped at `max_delay`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        self.initial_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay)
    }
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Events produced by a live stream subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Connected,
    Reconnecting { attempt: u32, max_attempts: u32 },
    Data { data: String },
    Exit {
        exit_code: Option<u32>,
        signal: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamPayload {
    Event(StreamEvent),
    Error { message: String, fatal: bool },
}

/// A stream event or error tagged with the terminal and subscription it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamMessage {
    pub terminal_id: SessionId,
    pub subscription: SubscriptionId,
    pub payload: StreamPayload,
}

/// Handler side of a subscription: everything a transport emits goes through here.
#[derive(Debug, Clone)]
pub struct StreamSink {
    terminal_id: SessionId,
    subscription: SubscriptionId,
    tx: mpsc::UnboundedSender<StreamMessage>,
}

impl StreamSink {
    pub fn new(
        terminal_id: SessionId,
        subscription: SubscriptionId,
        tx: mpsc::UnboundedSender<StreamMessage>,
    ) -> Self {
        Self {
            terminal_id,
            subscription,
            tx,
        }
    }

    pub fn terminal_id(&self) -> &str {
        &self.terminal_id
    }

    pub fn subscription(&self) -> SubscriptionId {
        self.subscription
    }

    /// Deliver an event. Returns `false` once the consumer has gone away.
    pub fn event(&self, event: StreamEvent) -> bool {
        self.send(StreamPayload::Event(event))
    }

    /// Deliver an error. `fatal` errors end the subscription from the consumer's view.
    pub fn error(&self, message: impl Into<String>, fatal: bool) -> bool {
        self.send(StreamPayload::Error {
            message: message.into(),
            fatal,
        })
    }

    fn send(&self, payload: StreamPayload) -> bool {
        self.tx
            .send(StreamMessage {
                terminal_id: self.terminal_id.clone(),
                subscription: self.subscription,
                payload,
            })
            .is_ok()
    }
}

/// Handle to an open stream. Closing (or dropping) it stops event delivery.
#[derive(Debug)]
pub struct Subscription {
    stop: Option<mpsc::Sender<()>>,
}

impl Subscription {
    /// Create a subscription and the stop receiver the transport task listens on.
    pub fn channel() -> (Self, mpsc::Receiver<()>) {
        let (tx, rx) = mpsc::channel(1);
        (Self { stop: Some(tx) }, rx)
    }

    pub fn close(&mut self) {
        if let Some(tx) = self.stop.take() {
            let _ = tx.try_send(());
        }
    }

    pub fn is_closed(&self) -> bool {
        self.stop.is_none()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}

/// A backend that spawns and owns PTY processes.
#[async_trait]
pub trait PtyTransport: Send + Sync {
    async fn create_session(&self, request: CreateSession) -> Result<SessionId, TransportError>;

    /// Open an event stream for `session_id`. Outcomes arrive through `sink`.
    fn connect(&self, session_id: &str, sink: StreamSink, options: ConnectOptions) -> Subscription;

    async fn send_input(&self, session_id: &str, data: &str) -> Result<(), TransportError>;

    async fn resize(&self, session_id: &str, cols: u16, rows: u16) -> Result<(), TransportError>;

    async fn close(&self, session_id: &str) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let options = ConnectOptions {
            max_retries: 10,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1000),
            connect_timeout: Duration::from_secs(1),
        };
        assert_eq!(options.backoff(1), Duration::from_millis(100));
        assert_eq!(options.backoff(2), Duration::from_millis(200));
        assert_eq!(options.backoff(4), Duration::from_millis(800));
        assert_eq!(options.backoff(5), Duration::from_millis(1000));
        assert_eq!(options.backoff(64), Duration::from_millis(1000));
    }

    #[test]
    fn test_sink_tags_messages() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = StreamSink::new("p1".to_string(), 7, tx);

        assert!(sink.event(StreamEvent::Connected));
        assert!(sink.error("boom", true));

        let first = rx.try_recv().unwrap();
        assert_eq!(first.terminal_id, "p1");
        assert_eq!(first.subscription, 7);
        assert_eq!(first.payload, StreamPayload::Event(StreamEvent::Connected));

        let second = rx.try_recv().unwrap();
        assert_eq!(
            second.payload,
            StreamPayload::Error {
                message: "boom".to_string(),
                fatal: true
            }
        );
    }

    #[test]
    fn test_sink_reports_closed_consumer() {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = StreamSink::new("p1".to_string(), 1, tx);
        drop(rx);
        assert!(!sink.event(StreamEvent::Connected));
    }

    #[test]
    fn test_subscription_close_is_idempotent() {
        let (mut sub, mut stop_rx) = Subscription::channel();
        assert!(!sub.is_closed());
        sub.close();
        sub.close();
        assert!(sub.is_closed());
        assert!(stop_rx.try_recv().is_ok());
    }

    #[test]
    fn test_dropping_subscription_signals_stop() {
        let (sub, mut stop_rx) = Subscription::channel();
        drop(sub);
        assert!(stop_rx.try_recv().is_ok());
    }
}
