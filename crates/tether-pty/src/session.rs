use std::collections::VecDeque;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio::sync::broadcast;

use crate::decode::Utf8Decoder;
use crate::pty::{PtyError, PtyHandle};
use crate::transport::SessionId;

/// Number of undelivered output chunks a subscriber may fall behind by.
pub const OUTPUT_CAPACITY: usize = 1024;

/// Bytes of recent output kept for replay to late or lagging subscribers.
const BACKLOG_BYTES: usize = 1_000_000;

/// How long the read thread waits for the child's exit status after EOF.
const EXIT_WAIT: Duration = Duration::from_secs(2);

/// Output published by a session's read thread.
///
/// Data chunks carry a per-session sequence number starting at 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PtyOutput {
    Data { seq: u64, data: String },
    Exit { exit_code: Option<u32> },
}

/// A live subscription to a session's output.
pub struct Attachment {
    pub output: broadcast::Receiver<PtyOutput>,
    /// Retained chunks published before `output` subscribed, oldest first.
    pub replay: Vec<(u64, String)>,
    /// Chunks after the requested point that were evicted before replay.
    pub dropped: u64,
    /// Sequence number of the newest chunk published before this attach.
    pub head: u64,
    /// Set when the process had already exited at attach time.
    pub exited: Option<Option<u32>>,
}

/// Recent output plus the exit slot, guarded together so an attach sees
/// every chunk exactly once: either in its replay or on its receiver.
#[derive(Default)]
struct History {
    chunks: VecDeque<(u64, String)>,
    len: usize,
    next_seq: u64,
    exit: Option<Option<u32>>,
    attached: bool,
}

impl History {
    fn push(&mut self, data: String) -> u64 {
        self.next_seq += 1;
        let seq = self.next_seq;
        self.len += data.len();
        self.chunks.push_back((seq, data));
        while self.len > BACKLOG_BYTES && self.chunks.len() > 1 {
            if let Some((_, old)) = self.chunks.pop_front() {
                self.len -= old.len();
            }
        }
        seq
    }

    /// Retained chunks newer than `after`, and how many of those were evicted.
    fn since(&self, after: u64) -> (Vec<(u64, String)>, u64) {
        let oldest = self
            .chunks
            .front()
            .map_or(self.next_seq + 1, |(seq, _)| *seq);
        let replay = self
            .chunks
            .iter()
            .filter(|(seq, _)| *seq > after)
            .cloned()
            .collect();
        (replay, oldest.saturating_sub(after + 1))
    }
}

/// A local shell process plus the thread that publishes its output.
///
/// Reads happen on a dedicated OS thread because PTY reads are blocking. The
/// reader is owned by that thread, not stored behind the handle mutex, so
/// input and resize never wait on a pending read.
pub struct LocalSession {
    id: SessionId,
    cwd: PathBuf,
    pty: Arc<Mutex<PtyHandle>>,
    output: broadcast::Sender<PtyOutput>,
    history: Arc<Mutex<History>>,
}

impl LocalSession {
    /// Spawn the shell and start its read thread.
    pub fn spawn(
        id: SessionId,
        shell: Option<&str>,
        cwd: &Path,
        cols: u16,
        rows: u16,
    ) -> Result<Self, PtyError> {
        Self::spawn_with_capacity(id, shell, cwd, cols, rows, OUTPUT_CAPACITY)
    }

    /// Like [`LocalSession::spawn`], with `capacity` chunks of subscriber slack.
    pub fn spawn_with_capacity(
        id: SessionId,
        shell: Option<&str>,
        cwd: &Path,
        cols: u16,
        rows: u16,
        capacity: usize,
    ) -> Result<Self, PtyError> {
        let mut pty = PtyHandle::spawn(shell, cwd, cols, rows)?;
        let reader = pty
            .take_reader()
            .ok_or_else(|| PtyError::SpawnFailed("PTY reader unavailable".to_string()))?;

        let (output, _) = broadcast::channel(capacity.max(1));
        let session = Self {
            id,
            cwd: cwd.to_path_buf(),
            pty: Arc::new(Mutex::new(pty)),
            output,
            history: Arc::new(Mutex::new(History::default())),
        };

        let pty = Arc::clone(&session.pty);
        let output = session.output.clone();
        let history = Arc::clone(&session.history);
        std::thread::Builder::new()
            .name(format!("pty-io-{}", session.id))
            .spawn(move || read_loop(reader, pty, output, history))?;

        Ok(session)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    /// Subscribe to output.
    ///
    /// With `after`, every retained chunk newer than that sequence number is
    /// replayed. Without it, the first attach replays everything the shell
    /// printed so far and later ones start from live output.
    pub fn attach(&self, after: Option<u64>) -> Attachment {
        let mut history = lock_history(&self.history);
        let output = self.output.subscribe();
        let (replay, dropped) = match after {
            Some(seq) => history.since(seq),
            None if !history.attached => history.since(0),
            None => (Vec::new(), 0),
        };
        history.attached = true;
        Attachment {
            output,
            replay,
            dropped,
            head: history.next_seq,
            exited: history.exit,
        }
    }

    /// Returns the exit code once the process has exited.
    pub fn exit_status(&self) -> Option<Option<u32>> {
        lock_history(&self.history).exit
    }

    pub fn write_input(&self, data: &[u8]) -> Result<(), PtyError> {
        self.with_pty(|pty| pty.write(data))
    }

    pub fn resize(&self, cols: u16, rows: u16) -> Result<(), PtyError> {
        self.with_pty(|pty| pty.resize(cols, rows))
    }

    pub fn kill(&self) -> Result<(), PtyError> {
        self.with_pty(|pty| pty.kill())
    }

    fn with_pty<T>(
        &self,
        f: impl FnOnce(&mut PtyHandle) -> Result<T, PtyError>,
    ) -> Result<T, PtyError> {
        let mut pty = self.pty.lock().map_err(|e| {
            PtyError::IoError(std::io::Error::other(format!("PTY lock poisoned: {e}")))
        })?;
        f(&mut pty)
    }
}

impl Drop for LocalSession {
    fn drop(&mut self) {
        // The read thread keeps the handle alive, so its own Drop would not run yet.
        let _ = self.kill();
    }
}

fn lock_history(history: &Mutex<History>) -> MutexGuard<'_, History> {
    // History holds plain data, so a panic mid-update cannot leave it unusable.
    history.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn publish(history: &Mutex<History>, output: &broadcast::Sender<PtyOutput>, data: String) {
    let mut history = lock_history(history);
    let seq = history.push(data.clone());
    // No receivers is fine: nobody is viewing this session right now.
    let _ = output.send(PtyOutput::Data { seq, data });
}

fn read_loop(
    mut reader: Box<dyn Read + Send>,
    pty: Arc<Mutex<PtyHandle>>,
    output: broadcast::Sender<PtyOutput>,
    history: Arc<Mutex<History>>,
) {
    let mut buf = [0u8; 65536];
    let mut decoder = Utf8Decoder::new();

    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            // EIO is how Linux reports a closed slave side.
            Err(_) => break,
        };
        let text = decoder.decode(&buf[..n]);
        if !text.is_empty() {
            publish(&history, &output, text);
        }
    }

    let tail = decoder.finish();
    if !tail.is_empty() {
        publish(&history, &output, tail);
    }

    let deadline = Instant::now() + EXIT_WAIT;
    let exit_code = loop {
        let code = pty.lock().ok().and_then(|mut p| p.try_wait());
        if code.is_some() || Instant::now() >= deadline {
            break code;
        }
        std::thread::sleep(Duration::from_millis(25));
    };

    log::debug!("pty read loop finished, exit code {exit_code:?}");
    let mut history = lock_history(&history);
    history.exit = Some(exit_code);
    let _ = output.send(PtyOutput::Exit { exit_code });
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect_until(attachment: &mut Attachment, needle: &str) -> String {
        let mut text = String::new();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !text.contains(needle) {
            match tokio::time::timeout_at(deadline, attachment.output.recv()).await {
                Ok(Ok(PtyOutput::Data { data, .. })) => text.push_str(&data),
                _ => break,
            }
        }
        text
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_session_output_is_broadcast() {
        let dir = tempfile::tempdir().unwrap();
        let session =
            LocalSession::spawn("s1".to_string(), Some("/bin/sh"), dir.path(), 80, 24).unwrap();
        let mut attachment = session.attach(None);
        assert!(attachment.exited.is_none());

        session.write_input(b"echo SESS_TEST\n").unwrap();
        let text = collect_until(&mut attachment, "SESS_TEST").await;
        assert!(text.contains("SESS_TEST"), "got: {text}");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_session_runs_in_cwd() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("MARKER_FILE_XYZ");
        std::fs::write(&marker, b"").unwrap();

        let session =
            LocalSession::spawn("s1".to_string(), Some("/bin/sh"), dir.path(), 80, 24).unwrap();
        assert_eq!(session.cwd(), dir.path());
        let mut attachment = session.attach(None);
        session.write_input(b"ls\n").unwrap();
        let text = collect_until(&mut attachment, "MARKER_FILE_XYZ").await;
        assert!(text.contains("MARKER_FILE_XYZ"), "got: {text}");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_session_exit_is_broadcast_and_retained() {
        let dir = tempfile::tempdir().unwrap();
        let session =
            LocalSession::spawn("s1".to_string(), Some("/bin/sh"), dir.path(), 80, 24).unwrap();
        let mut attachment = session.attach(None);

        session.write_input(b"exit 3\n").unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        let mut exit_code = None;
        while let Ok(Ok(msg)) = tokio::time::timeout_at(deadline, attachment.output.recv()).await
        {
            if let PtyOutput::Exit { exit_code: code } = msg {
                exit_code = Some(code);
                break;
            }
        }
        assert_eq!(exit_code, Some(Some(3)));
        assert_eq!(session.exit_status(), Some(Some(3)));

        let late = session.attach(None);
        assert_eq!(late.exited, Some(Some(3)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_session_resize() {
        let dir = tempfile::tempdir().unwrap();
        let session =
            LocalSession::spawn("s1".to_string(), Some("/bin/sh"), dir.path(), 80, 24).unwrap();
        assert!(session.resize(120, 40).is_ok());
    }

    #[test]
    fn test_history_replays_after_sequence() {
        let mut history = History::default();
        for text in ["a", "b", "c"] {
            history.push(text.to_string());
        }

        let (replay, dropped) = history.since(1);
        assert_eq!(replay, vec![(2, "b".to_string()), (3, "c".to_string())]);
        assert_eq!(dropped, 0);
        assert!(history.since(3).0.is_empty());
    }

    #[test]
    fn test_history_reports_evicted_chunks() {
        let mut history = History::default();
        history.push("x".repeat(BACKLOG_BYTES));
        history.push("y".to_string());
        history.push("z".to_string());

        // The oversized first chunk was evicted to make room.
        let (replay, dropped) = history.since(0);
        assert_eq!(dropped, 1);
        assert_eq!(replay.first().map(|(seq, _)| *seq), Some(2));
        assert!(history.len <= BACKLOG_BYTES);
    }

    #[test]
    fn test_history_keeps_single_oversized_chunk() {
        let mut history = History::default();
        history.push("x".repeat(BACKLOG_BYTES + 1));
        assert_eq!(history.chunks.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_output_before_first_attach_is_replayed() {
        let dir = tempfile::tempdir().unwrap();
        let session =
            LocalSession::spawn("s1".to_string(), Some("/bin/sh"), dir.path(), 80, 24).unwrap();
        session.write_input(b"echo EARLY_$((2+3))\n").unwrap();

        // Wait for the output to land in the backlog without subscribing.
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            let history = lock_history(&session.history);
            if history.chunks.iter().any(|(_, data)| data.contains("EARLY_5")) {
                break;
            }
            drop(history);
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let first = session.attach(None);
        let replayed: String = first.replay.iter().map(|(_, data)| data.as_str()).collect();
        assert!(replayed.contains("EARLY_5"), "got: {replayed}");

        // A second fresh attach starts from live output.
        assert!(session.attach(None).replay.is_empty());
    }
}
