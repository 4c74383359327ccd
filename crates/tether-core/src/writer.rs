//! Ordered writes to each PTY.
//!
//! Every session gets one queue drained by one task, so keystrokes, resizes
//! and the final close reach the transport in the order they were issued.

use std::collections::HashMap;
use std::sync::Arc;

use tether_pty::{PtyTransport, SessionId, TransportError};
use tokio::sync::mpsc;

use crate::coordinator::Completion;
use crate::input::Viewport;

#[derive(Debug)]
enum WriteOp {
    /// `report` sends a failure back as [`Completion::InputFailed`].
    Input { data: String, report: bool },
    Resize(Viewport),
    Close,
}

pub(crate) struct SessionWriter {
    transport: Arc<dyn PtyTransport>,
    completions: mpsc::UnboundedSender<Completion>,
    queues: HashMap<SessionId, mpsc::UnboundedSender<WriteOp>>,
}

impl SessionWriter {
    pub(crate) fn new(
        transport: Arc<dyn PtyTransport>,
        completions: mpsc::UnboundedSender<Completion>,
    ) -> Self {
        Self {
            transport,
            completions,
            queues: HashMap::new(),
        }
    }

    /// Keystrokes from the user.
    pub(crate) fn input(&mut self, session: &str, data: &str) {
        self.push(
            session,
            WriteOp::Input {
                data: data.to_string(),
                report: true,
            },
        );
    }

    /// Input the user did not type, failures only logged.
    pub(crate) fn inject(&mut self, session: &str, data: &str) {
        self.push(
            session,
            WriteOp::Input {
                data: data.to_string(),
                report: false,
            },
        );
    }

    pub(crate) fn resize(&mut self, session: &str, viewport: Viewport) {
        self.push(session, WriteOp::Resize(viewport));
    }

    /// Close `session` after everything already queued for it.
    pub(crate) fn close(&mut self, session: &str) {
        self.push(session, WriteOp::Close);
        self.queues.remove(session);
    }

    fn push(&mut self, session: &str, write: WriteOp) {
        let write = match self.queues.get(session) {
            Some(queue) => match queue.send(write) {
                Ok(()) => return,
                Err(mpsc::error::SendError(write)) => write,
            },
            None => write,
        };

        let (queue, rx) = mpsc::unbounded_channel();
        tokio::spawn(drain(
            Arc::clone(&self.transport),
            session.to_string(),
            rx,
            self.completions.clone(),
        ));
        // A fresh receiver cannot have been dropped yet.
        let _ = queue.send(write);
        self.queues.insert(session.to_string(), queue);
    }
}

async fn drain(
    transport: Arc<dyn PtyTransport>,
    session: SessionId,
    mut rx: mpsc::UnboundedReceiver<WriteOp>,
    completions: mpsc::UnboundedSender<Completion>,
) {
    while let Some(write) = rx.recv().await {
        match write {
            WriteOp::Input { data, report } => {
                if let Err(e) = transport.send_input(&session, &data).await {
                    if report {
                        let _ = completions.send(Completion::InputFailed {
                            terminal_id: session.clone(),
                            message: e.to_string(),
                        });
                    } else {
                        log::warn!("failed to write to terminal {session}: {e}");
                    }
                }
            }
            WriteOp::Resize(viewport) => {
                if let Err(e) = transport
                    .resize(&session, viewport.cols(), viewport.rows())
                    .await
                {
                    log::warn!("failed to resize terminal {session} to {viewport}: {e}");
                }
            }
            WriteOp::Close => {
                match transport.close(&session).await {
                    Ok(()) => {}
                    Err(TransportError::SessionNotFound(_)) => {
                        log::debug!("terminal {session} was already gone");
                    }
                    Err(e) => log::warn!("failed to close terminal {session}: {e}"),
                }
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{settle, FakeTransport};

    fn setup() -> (
        SessionWriter,
        Arc<FakeTransport>,
        mpsc::UnboundedReceiver<Completion>,
    ) {
        let transport = Arc::new(FakeTransport::new());
        let (tx, rx) = mpsc::unbounded_channel();
        (SessionWriter::new(transport.clone(), tx), transport, rx)
    }

    #[tokio::test]
    async fn test_writes_keep_their_order() {
        let (mut writer, transport, _rx) = setup();
        writer.input("p1", "a");
        writer.resize("p1", Viewport::new(100, 30).unwrap());
        writer.input("p1", "b");
        writer.close("p1");
        settle().await;

        assert_eq!(
            transport.log(),
            vec![
                "input p1 a".to_string(),
                "resize p1 100x30".to_string(),
                "input p1 b".to_string(),
                "close p1".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_close_drops_the_queue() {
        let (mut writer, transport, _rx) = setup();
        writer.input("p1", "a");
        writer.close("p1");
        assert!(writer.queues.is_empty());

        // A later write for the same id gets a fresh queue.
        writer.input("p1", "b");
        settle().await;
        assert_eq!(transport.inputs().len(), 2);
    }

    #[tokio::test]
    async fn test_only_typed_input_failures_are_reported() {
        let (mut writer, transport, mut rx) = setup();
        transport.fail_input();
        writer.input("p1", "typed");
        writer.inject("p1", "\r");
        settle().await;

        assert!(matches!(
            rx.try_recv(),
            Ok(Completion::InputFailed { terminal_id, .. }) if terminal_id == "p1"
        ));
        assert!(rx.try_recv().is_err());
    }
}
