//! Stdout side of the console front-end.
//!
//! Plain mode writes terminal output through untouched; JSON mode writes one
//! [`ViewEvent`] per line. Both track the last chunk shown so a redraw of the
//! same tab never repeats output.

use std::io::{self, Write};

use tether_core::{Notification, StatusLine, View};

use crate::ipc::{StatusEntry, ViewEvent};

pub struct Display<W: Write> {
    out: W,
    json: bool,
    /// `(directory, tab id)` currently on screen.
    shown: Option<(String, String)>,
    last_chunk: Option<u64>,
}

impl<W: Write> Display<W> {
    pub fn new(out: W, json: bool) -> Self {
        Self {
            out,
            json,
            shown: None,
            last_chunk: None,
        }
    }

    /// Draw `view` from scratch.
    pub fn redraw(&mut self, view: Option<&View>) -> io::Result<()> {
        let Some(view) = view else {
            self.shown = None;
            self.last_chunk = None;
            return self.message("no directory open");
        };
        self.shown = Some((view.directory.to_string(), view.tab_id.clone()));
        self.last_chunk = view.chunks.last().map(|c| c.id);

        if self.json {
            return self.emit(&ViewEvent::snapshot(view));
        }
        write!(self.out, "\x1b[2J\x1b[H")?;
        self.write_tab_bar(view)?;
        for chunk in &view.chunks {
            self.out.write_all(chunk.data.as_bytes())?;
        }
        if let Some(status) = &view.status {
            self.write_status(Some(status))?;
        }
        self.out.flush()
    }

    /// Apply one notification. `view` is only called when a redraw is needed.
    pub fn notify(
        &mut self,
        notification: &Notification,
        view: impl FnOnce() -> Option<View>,
    ) -> io::Result<()> {
        match notification {
            Notification::ChunkAppended {
                directory,
                tab_id,
                chunk,
            } => {
                if !self.is_shown(directory.as_str(), tab_id)
                    || self.last_chunk.is_some_and(|last| chunk.id <= last)
                {
                    return Ok(());
                }
                self.last_chunk = Some(chunk.id);
                if self.json {
                    return self.emit(&ViewEvent::Output {
                        tab_id: tab_id.clone(),
                        chunk_id: chunk.id,
                        data: chunk.data.clone(),
                    });
                }
                self.out.write_all(chunk.data.as_bytes())?;
                self.out.flush()
            }
            Notification::BufferCleared { directory, tab_id } => {
                if !self.is_shown(directory.as_str(), tab_id) {
                    return Ok(());
                }
                if self.json {
                    return self.emit(&ViewEvent::Cleared {
                        tab_id: tab_id.clone(),
                    });
                }
                write!(self.out, "\x1b[2J\x1b[H")?;
                self.out.flush()
            }
            Notification::TabsChanged { directory } => {
                let shown_dir = self.shown.as_ref().map(|(dir, _)| dir.as_str());
                if shown_dir != Some(directory.as_str()) {
                    return Ok(());
                }
                match view() {
                    Some(view) if self.json => self.emit(&ViewEvent::tabs(&view)),
                    Some(view) => {
                        write!(self.out, "\r\n")?;
                        self.write_tab_bar(&view)?;
                        self.out.flush()
                    }
                    None => Ok(()),
                }
            }
            Notification::Focused { directory, tab_id } => {
                if self.is_shown(directory.as_str(), tab_id) {
                    return Ok(());
                }
                self.redraw(view().as_ref())
            }
            Notification::Status(status) => {
                if self.json {
                    return self.emit(&ViewEvent::Status {
                        status: status.as_ref().map(StatusEntry::from),
                    });
                }
                self.write_status(status.as_ref())?;
                self.out.flush()
            }
        }
    }

    /// A reply to a console command.
    pub fn message(&mut self, text: &str) -> io::Result<()> {
        if self.json {
            return self.emit(&ViewEvent::Message {
                text: text.to_string(),
            });
        }
        write!(self.out, "\r\n[tether] {text}\r\n")?;
        self.out.flush()
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn is_shown(&self, directory: &str, tab_id: &str) -> bool {
        self.shown
            .as_ref()
            .is_some_and(|(dir, tab)| dir == directory && tab == tab_id)
    }

    fn write_tab_bar(&mut self, view: &View) -> io::Result<()> {
        write!(self.out, "[{}]", view.directory)?;
        for tab in &view.tabs {
            let marker = if tab.active { "*" } else { " " };
            let state = match (tab.bound, tab.connecting) {
                (_, true) => " ...",
                (false, false) => " (no shell)",
                (true, false) => "",
            };
            write!(self.out, " {marker}{} {}{state}", tab.id, tab.label)?;
        }
        write!(self.out, "\r\n")
    }

    fn write_status(&mut self, status: Option<&StatusLine>) -> io::Result<()> {
        if let Some(status) = status {
            write!(self.out, "\r\n[tether] {status}\r\n")?;
        }
        Ok(())
    }

    fn emit(&mut self, event: &ViewEvent) -> io::Result<()> {
        let line = event.to_line().map_err(io::Error::from)?;
        writeln!(self.out, "{line}")?;
        self.out.flush()
    }
}
