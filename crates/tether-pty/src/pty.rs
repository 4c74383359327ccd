use std::io::{Read, Write};
use std::path::Path;

use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};

/// Errors from PTY operations.
#[derive(Debug, thiserror::Error)]
pub enum PtyError {
    #[error("PTY spawn failed: {0}")]
    SpawnFailed(String),
    #[error("PTY I/O error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("PTY resize failed: {0}")]
    ResizeFailed(String),
}

/// Owns a portable-pty child process, master pair, reader, and writer.
pub struct PtyHandle {
    master: Box<dyn MasterPty + Send>,
    reader: Option<Box<dyn Read + Send>>,
    writer: Box<dyn Write + Send>,
    child: Box<dyn Child + Send + Sync>,
}

impl PtyHandle {
    /// Spawn a new PTY running `shell` (or the user's default shell) inside `cwd`.
    pub fn spawn(
        shell: Option<&str>,
        cwd: &Path,
        cols: u16,
        rows: u16,
    ) -> Result<Self, PtyError> {
        let pty_system = native_pty_system();

        let pair = pty_system
            .openpty(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| PtyError::SpawnFailed(format!("failed to open PTY: {e}")))?;

        let mut cmd = match shell {
            Some(s) => CommandBuilder::new(s),
            None => CommandBuilder::new(default_shell()),
        };
        cmd.cwd(cwd);
        cmd.env("TERM", "xterm-256color");

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| PtyError::SpawnFailed(format!("failed to spawn command: {e}")))?;

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| PtyError::SpawnFailed(format!("failed to clone reader: {e}")))?;

        let writer = pair
            .master
            .take_writer()
            .map_err(|e| PtyError::SpawnFailed(format!("failed to take writer: {e}")))?;

        Ok(Self {
            master: pair.master,
            reader: Some(reader),
            writer,
            child,
        })
    }

    /// Resize the PTY to new dimensions.
    pub fn resize(&self, cols: u16, rows: u16) -> Result<(), PtyError> {
        self.master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| PtyError::ResizeFailed(format!("{e}")))
    }

    /// Write bytes to the PTY master (user input -> shell).
    pub fn write(&mut self, data: &[u8]) -> Result<(), PtyError> {
        self.writer.write_all(data)?;
        self.writer.flush()?;
        Ok(())
    }

    /// Extract the blocking PTY reader for a dedicated read thread.
    ///
    /// Returns `None` if the reader was already taken.
    pub fn take_reader(&mut self) -> Option<Box<dyn Read + Send>> {
        self.reader.take()
    }

    /// Get the child process exit status if it has exited.
    ///
    /// Returns `None` if the process is still running.
    pub fn try_wait(&mut self) -> Option<u32> {
        match self.child.try_wait() {
            Ok(Some(status)) => Some(status.exit_code()),
            _ => None,
        }
    }

    /// Kill the child process. Already-exited children are not an error.
    pub fn kill(&mut self) -> Result<(), PtyError> {
        if self.try_wait().is_some() {
            return Ok(());
        }
        self.child.kill()?;
        Ok(())
    }
}

impl Drop for PtyHandle {
    fn drop(&mut self) {
        let _ = self.kill();
    }
}

/// Returns the user's default shell, falling back to `/bin/sh`.
pub fn default_shell() -> String {
    std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    fn drain(mut reader: Box<dyn Read + Send>, needle: &'static str) -> thread::JoinHandle<String> {
        thread::spawn(move || {
            let mut output = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        output.extend_from_slice(&buf[..n]);
                        if String::from_utf8_lossy(&output).contains(needle) {
                            break;
                        }
                    }
                }
            }
            String::from_utf8_lossy(&output).to_string()
        })
    }

    #[test]
    fn test_spawn_pty_in_directory() {
        let dir = tempfile::tempdir().unwrap();
        let handle = PtyHandle::spawn(Some("/bin/sh"), dir.path(), 80, 24);
        assert!(handle.is_ok(), "Failed to spawn PTY: {:?}", handle.err());
        let mut handle = handle.unwrap();
        assert!(handle.try_wait().is_none());
    }

    #[test]
    fn test_write_read_echo() {
        let dir = tempfile::tempdir().unwrap();
        let mut handle = PtyHandle::spawn(Some("/bin/sh"), dir.path(), 80, 24).unwrap();
        let reader = handle.take_reader().unwrap();
        let output = drain(reader, "TETHER_TEST_OK");

        handle.write(b"echo TETHER_TEST_OK\n").unwrap();

        let text = output.join().unwrap();
        assert!(
            text.contains("TETHER_TEST_OK"),
            "Expected output to contain TETHER_TEST_OK, got: {text}"
        );
    }

    #[test]
    fn test_take_reader_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut handle = PtyHandle::spawn(Some("/bin/sh"), dir.path(), 80, 24).unwrap();
        assert!(handle.take_reader().is_some());
        assert!(handle.take_reader().is_none());
    }

    #[test]
    fn test_resize() {
        let dir = tempfile::tempdir().unwrap();
        let handle = PtyHandle::spawn(Some("/bin/sh"), dir.path(), 80, 24).unwrap();
        let result = handle.resize(120, 40);
        assert!(result.is_ok(), "Resize failed: {:?}", result.err());
    }

    #[test]
    fn test_child_exit() {
        let dir = tempfile::tempdir().unwrap();
        let mut handle = PtyHandle::spawn(Some("/bin/sh"), dir.path(), 80, 24).unwrap();
        let reader = handle.take_reader().unwrap();
        let drained = drain(reader, "\u{0}never");

        handle.write(b"exit 0\n").unwrap();
        let _ = drained.join();

        let deadline = std::time::Instant::now() + Duration::from_secs(3);
        while std::time::Instant::now() < deadline && handle.try_wait().is_none() {
            thread::sleep(Duration::from_millis(50));
        }

        assert_eq!(handle.try_wait(), Some(0));
    }

    #[test]
    fn test_kill_running_child() {
        let dir = tempfile::tempdir().unwrap();
        let mut handle = PtyHandle::spawn(Some("/bin/sh"), dir.path(), 80, 24).unwrap();
        assert!(handle.kill().is_ok());
    }

    #[test]
    fn test_default_shell_detection() {
        let shell = default_shell();
        assert!(!shell.is_empty(), "Default shell should not be empty");
    }
}
