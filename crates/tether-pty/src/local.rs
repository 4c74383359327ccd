//! In-process [`PtyTransport`] backed by a [`Multiplexer`] of local shells.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};

use crate::multiplexer::Multiplexer;
use crate::session::{LocalSession, PtyOutput};
use crate::transport::{
    ConnectOptions, CreateSession, PtyTransport, SessionId, StreamEvent, StreamSink,
    Subscription, TransportError,
};

pub const DEFAULT_COLS: u16 = 80;
pub const DEFAULT_ROWS: u16 = 24;

/// Why a forwarding pass over an attachment ended.
enum Forward {
    /// The subscription was closed or its consumer went away.
    Stopped,
    /// The process exited or the session disappeared.
    Finished,
    /// The subscriber fell behind and missed output.
    Lagged(u64),
}

#[derive(Clone)]
pub struct LocalTransport {
    mux: Arc<Mutex<Multiplexer>>,
}

impl LocalTransport {
    pub fn new(mux: Multiplexer) -> Self {
        Self {
            mux: Arc::new(Mutex::new(mux)),
        }
    }

    pub fn session_ids(&self) -> Vec<SessionId> {
        self.lock()
            .map(|mux| mux.list_sessions())
            .unwrap_or_default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Multiplexer>, TransportError> {
        self.mux.lock().map_err(|_| TransportError::Closed)
    }

    fn session(&self, session_id: &str) -> Result<Arc<LocalSession>, TransportError> {
        self.lock()?
            .get_session(session_id)
            .ok_or_else(|| TransportError::SessionNotFound(session_id.to_string()))
    }
}

impl Default for LocalTransport {
    fn default() -> Self {
        Self::new(Multiplexer::new())
    }
}

/// Run a blocking PTY call off the async workers.
async fn blocking<T, F>(f: F) -> Result<T, TransportError>
where
    F: FnOnce() -> Result<T, TransportError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|_| TransportError::Closed)?
}

#[async_trait]
impl PtyTransport for LocalTransport {
    async fn create_session(&self, request: CreateSession) -> Result<SessionId, TransportError> {
        if !request.cwd.is_dir() {
            return Err(TransportError::InvalidDirectory(request.cwd));
        }

        let cols = request.cols.unwrap_or(DEFAULT_COLS);
        let rows = request.rows.unwrap_or(DEFAULT_ROWS);
        let mux = Arc::clone(&self.mux);
        let cwd = request.cwd;

        // Spawning forks a process.
        let id = blocking(move || {
            let mut mux = mux.lock().map_err(|_| TransportError::Closed)?;
            mux.create_session(&cwd, cols, rows)
                .map_err(TransportError::from)
        })
        .await?;

        log::info!("created local PTY session {id} ({cols}x{rows})");
        Ok(id)
    }

    /// Local sessions attach synchronously and cannot drop transiently, so
    /// the retry and timeout fields of `options` do not apply here. A
    /// subscriber that falls behind re-attaches at once and is replayed the
    /// output it missed from the session backlog.
    fn connect(&self, session_id: &str, sink: StreamSink, _options: ConnectOptions) -> Subscription {
        let (subscription, stop_rx) = Subscription::channel();
        let session = self.session(session_id).ok();
        tokio::spawn(run_stream(session_id.to_string(), session, sink, stop_rx));
        subscription
    }

    async fn send_input(&self, session_id: &str, data: &str) -> Result<(), TransportError> {
        let session = self.session(session_id)?;
        let data = data.as_bytes().to_vec();
        blocking(move || session.write_input(&data).map_err(TransportError::from)).await
    }

    async fn resize(&self, session_id: &str, cols: u16, rows: u16) -> Result<(), TransportError> {
        let session = self.session(session_id)?;
        blocking(move || session.resize(cols, rows).map_err(TransportError::from)).await
    }

    async fn close(&self, session_id: &str) -> Result<(), TransportError> {
        let session = self
            .lock()?
            .remove_session(session_id)
            .ok_or_else(|| TransportError::SessionNotFound(session_id.to_string()))?;
        let id = session_id.to_string();
        blocking(move || {
            if let Err(e) = session.kill() {
                log::warn!("failed to kill session {id}: {e}");
            }
            Ok(())
        })
        .await?;
        log::info!("closed local PTY session {session_id}");
        Ok(())
    }
}

/// Forward a session's output until stopped. A lagging subscriber is
/// re-attached immediately from the last chunk it delivered.
async fn run_stream(
    session_id: SessionId,
    session: Option<Arc<LocalSession>>,
    sink: StreamSink,
    mut stop_rx: mpsc::Receiver<()>,
) {
    let Some(session) = session else {
        sink.error(format!("session {session_id} not found"), true);
        return;
    };
    if !sink.event(StreamEvent::Connected) {
        return;
    }

    let mut last_seq = None;
    loop {
        let mut attachment = session.attach(last_seq);
        if attachment.dropped > 0 {
            log::warn!(
                "stream for {session_id} lost {} chunks beyond the backlog",
                attachment.dropped
            );
            if !sink.error(
                format!("{} output chunks were dropped", attachment.dropped),
                false,
            ) {
                return;
            }
        }
        for (_, data) in attachment.replay.drain(..) {
            if !sink.event(StreamEvent::Data { data }) {
                return;
            }
        }
        last_seq = Some(attachment.head);
        if let Some(exit_code) = attachment.exited {
            sink.event(exit_event(exit_code));
            return;
        }

        match forward(&mut attachment.output, &sink, &mut stop_rx, &mut last_seq).await {
            Forward::Stopped | Forward::Finished => return,
            Forward::Lagged(missed) => {
                log::debug!("stream for {session_id} lagged by {missed} chunks, replaying");
            }
        }
    }
}

async fn forward(
    output: &mut broadcast::Receiver<PtyOutput>,
    sink: &StreamSink,
    stop_rx: &mut mpsc::Receiver<()>,
    last_seq: &mut Option<u64>,
) -> Forward {
    loop {
        tokio::select! {
            _ = stop_rx.recv() => return Forward::Stopped,
            msg = output.recv() => match msg {
                Ok(PtyOutput::Data { seq, data }) => {
                    *last_seq = Some(seq);
                    if !sink.event(StreamEvent::Data { data }) {
                        return Forward::Stopped;
                    }
                }
                Ok(PtyOutput::Exit { exit_code }) => {
                    sink.event(exit_event(exit_code));
                    return Forward::Finished;
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => return Forward::Lagged(missed),
                Err(broadcast::error::RecvError::Closed) => {
                    sink.error("session output closed", true);
                    return Forward::Finished;
                }
            }
        }
    }
}

fn exit_event(exit_code: Option<u32>) -> StreamEvent {
    StreamEvent::Exit {
        exit_code,
        signal: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{StreamMessage, StreamPayload};
    use std::time::Duration;

    fn transport() -> LocalTransport {
        LocalTransport::new(Multiplexer::with_shell("/bin/sh"))
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<StreamMessage>) -> StreamPayload {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for stream message")
            .expect("stream channel closed")
            .payload
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_create_session_rejects_missing_directory() {
        let err = transport()
            .create_session(CreateSession {
                cwd: "/definitely/not/a/dir".into(),
                cols: None,
                rows: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::InvalidDirectory(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_connect_streams_output() {
        let dir = tempfile::tempdir().unwrap();
        let transport = transport();
        let id = transport
            .create_session(CreateSession {
                cwd: dir.path().to_path_buf(),
                cols: Some(100),
                rows: Some(30),
            })
            .await
            .unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _sub = transport.connect(
            &id,
            StreamSink::new(id.clone(), 1, tx),
            ConnectOptions::default(),
        );
        assert_eq!(next(&mut rx).await, StreamPayload::Event(StreamEvent::Connected));

        transport.send_input(&id, "echo LOCAL_OK\n").await.unwrap();
        let mut text = String::new();
        while !text.contains("LOCAL_OK") {
            match next(&mut rx).await {
                StreamPayload::Event(StreamEvent::Data { data }) => text.push_str(&data),
                other => panic!("unexpected payload {other:?}"),
            }
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_connect_unknown_session_is_fatal() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _sub = transport().connect(
            "missing",
            StreamSink::new("missing".to_string(), 1, tx),
            ConnectOptions::default(),
        );
        match next(&mut rx).await {
            StreamPayload::Error { fatal, .. } => assert!(fatal),
            other => panic!("expected fatal error, got {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_exit_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let transport = transport();
        let id = transport
            .create_session(CreateSession {
                cwd: dir.path().to_path_buf(),
                cols: None,
                rows: None,
            })
            .await
            .unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _sub = transport.connect(&id, StreamSink::new(id.clone(), 1, tx), ConnectOptions::default());
        assert_eq!(next(&mut rx).await, StreamPayload::Event(StreamEvent::Connected));

        transport.send_input(&id, "exit 0\n").await.unwrap();
        loop {
            match next(&mut rx).await {
                StreamPayload::Event(StreamEvent::Exit { exit_code, .. }) => {
                    assert_eq!(exit_code, Some(0));
                    break;
                }
                StreamPayload::Event(StreamEvent::Data { .. }) => {}
                other => panic!("unexpected payload {other:?}"),
            }
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_close_removes_session() {
        let dir = tempfile::tempdir().unwrap();
        let transport = transport();
        let id = transport
            .create_session(CreateSession {
                cwd: dir.path().to_path_buf(),
                cols: None,
                rows: None,
            })
            .await
            .unwrap();

        transport.close(&id).await.unwrap();
        assert!(transport.session_ids().is_empty());
        assert!(matches!(
            transport.close(&id).await,
            Err(TransportError::SessionNotFound(_))
        ));
        assert!(matches!(
            transport.send_input(&id, "x").await,
            Err(TransportError::SessionNotFound(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_lagging_stream_loses_no_output() {
        let dir = tempfile::tempdir().unwrap();
        let transport =
            LocalTransport::new(Multiplexer::with_shell("/bin/sh").with_output_capacity(2));
        let id = transport
            .create_session(CreateSession {
                cwd: dir.path().to_path_buf(),
                cols: None,
                rows: None,
            })
            .await
            .unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _sub = transport.connect(&id, StreamSink::new(id.clone(), 1, tx), ConnectOptions::default());
        assert_eq!(next(&mut rx).await, StreamPayload::Event(StreamEvent::Connected));

        transport
            .send_input(&id, "seq 1 3000; echo SEQ_$((4+5))_DONE\n")
            .await
            .unwrap();
        let mut text = String::new();
        while !text.contains("SEQ_9_DONE") {
            match next(&mut rx).await {
                StreamPayload::Event(StreamEvent::Data { data }) => text.push_str(&data),
                other => panic!("unexpected payload {other:?}"),
            }
        }

        let numbers: Vec<u32> = text
            .split("\r\n")
            .filter_map(|line| line.trim().parse().ok())
            .collect();
        assert_eq!(numbers, (1..=3000).collect::<Vec<u32>>());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_first_connect_replays_early_output() {
        let dir = tempfile::tempdir().unwrap();
        let transport = transport();
        let id = transport
            .create_session(CreateSession {
                cwd: dir.path().to_path_buf(),
                cols: None,
                rows: None,
            })
            .await
            .unwrap();
        transport.send_input(&id, "echo BEFORE_$((1+1))\n").await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _sub = transport.connect(&id, StreamSink::new(id.clone(), 1, tx), ConnectOptions::default());
        assert_eq!(next(&mut rx).await, StreamPayload::Event(StreamEvent::Connected));
        let mut text = String::new();
        while !text.contains("BEFORE_2") {
            match next(&mut rx).await {
                StreamPayload::Event(StreamEvent::Data { data }) => text.push_str(&data),
                other => panic!("unexpected payload {other:?}"),
            }
        }
    }
}
