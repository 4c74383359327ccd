//! Console commands.
//!
//! A line starting with `:` is a command; anything else is typed into the
//! focused terminal followed by a carriage return. `::` escapes a leading
//! colon.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tether_core::{Coordinator, DirectoryKey, KeyInput, UnknownKey, Viewport};

use crate::display::Display;

pub const HELP: &str = ":new  :tab <id>  :close [id]  :restart  :clear  :cd <dir>  \
:forget [dir]  :resize <cols> <rows>  :key <name>  :tabs  :status  :quit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Raw input for the focused terminal.
    Send(String),
    NewTab,
    SwitchTab(String),
    CloseTab(Option<String>),
    Restart,
    Clear,
    Cd(PathBuf),
    Forget(Option<PathBuf>),
    Resize(Viewport),
    Key(KeyInput),
    Tabs,
    Status,
    Help,
    Quit,
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("unknown command :{0} (try :help)")]
    Unknown(String),
    #[error(":{0} needs {1}")]
    MissingArgument(&'static str, &'static str),
    #[error("invalid size: {0}")]
    InvalidSize(String),
    #[error(transparent)]
    Key(#[from] UnknownKey),
    #[error("not an absolute directory: {0}")]
    InvalidDirectory(String),
}

/// Whether the console loop keeps going after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

pub fn parse(line: &str) -> Result<Command, CommandError> {
    let Some(rest) = line.strip_prefix(':') else {
        return Ok(Command::Send(format!("{line}\r")));
    };
    if rest.starts_with(':') {
        return Ok(Command::Send(format!("{rest}\r")));
    }

    let mut words = rest.split_whitespace();
    let name = words.next().unwrap_or_default();
    let arg = words.next();

    match name {
        "new" | "n" => Ok(Command::NewTab),
        "tab" | "t" => arg
            .map(|id| Command::SwitchTab(normalize_tab_id(id)))
            .ok_or(CommandError::MissingArgument("tab", "a tab id")),
        "close" => Ok(Command::CloseTab(arg.map(normalize_tab_id))),
        "restart" => Ok(Command::Restart),
        "clear" => Ok(Command::Clear),
        "cd" => arg
            .map(|dir| Command::Cd(PathBuf::from(dir)))
            .ok_or(CommandError::MissingArgument("cd", "a directory")),
        "forget" => Ok(Command::Forget(arg.map(PathBuf::from))),
        "resize" => {
            let size = (arg, words.next());
            let parsed = match size {
                (Some(cols), Some(rows)) => cols
                    .parse()
                    .ok()
                    .zip(rows.parse().ok())
                    .and_then(|(cols, rows)| Viewport::new(cols, rows)),
                _ => return Err(CommandError::MissingArgument("resize", "<cols> <rows>")),
            };
            parsed
                .map(Command::Resize)
                .ok_or_else(|| CommandError::InvalidSize(rest[name.len()..].trim().to_string()))
        }
        "key" | "k" => {
            let name = arg.ok_or(CommandError::MissingArgument("key", "a key name"))?;
            Ok(Command::Key(name.parse()?))
        }
        "tabs" => Ok(Command::Tabs),
        "status" => Ok(Command::Status),
        "help" | "h" | "?" => Ok(Command::Help),
        "quit" | "q" | "exit" => Ok(Command::Quit),
        other => Err(CommandError::Unknown(other.to_string())),
    }
}

/// `3` is shorthand for `tab-3`.
fn normalize_tab_id(id: &str) -> String {
    if id.chars().all(|c| c.is_ascii_digit()) {
        format!("tab-{id}")
    } else {
        id.to_string()
    }
}

/// Resolve `path` against the focused directory.
pub fn resolve_dir(base: Option<&DirectoryKey>, path: &Path) -> Result<DirectoryKey, CommandError> {
    let joined = match base {
        Some(base) if path.is_relative() => base.to_path_buf().join(path),
        None if path.is_relative() => {
            return Err(CommandError::InvalidDirectory(path.display().to_string()))
        }
        _ => path.to_path_buf(),
    };
    let joined = std::fs::canonicalize(&joined).unwrap_or(joined);
    DirectoryKey::new(&joined)
        .ok_or_else(|| CommandError::InvalidDirectory(path.display().to_string()))
}

pub fn execute<W: Write>(
    coordinator: &mut Coordinator,
    display: &mut Display<W>,
    command: Command,
) -> io::Result<Flow> {
    let focus = coordinator
        .focus()
        .map(|(dir, tab)| (dir.clone(), tab.to_string()));

    match command {
        Command::Send(data) => {
            if !coordinator.send_input(&data) {
                restart_shell(coordinator, display, focus.as_ref().map(|(d, _)| d))?;
            }
        }
        Command::Key(key) => {
            if !coordinator.send_key(key) {
                restart_shell(coordinator, display, focus.as_ref().map(|(d, _)| d))?;
            }
        }
        Command::NewTab => match focus {
            Some((dir, _)) => {
                coordinator.create_tab(&dir);
            }
            None => display.message("no directory open")?,
        },
        Command::SwitchTab(tab_id) => {
            let switched = focus.is_some_and(|(dir, _)| coordinator.switch_tab(&dir, &tab_id));
            if !switched {
                display.message(&format!("no such tab: {tab_id}"))?;
            }
        }
        Command::CloseTab(tab_id) => match focus {
            Some((dir, focused)) => {
                let tab_id = tab_id.unwrap_or(focused);
                if !coordinator.close_tab(&dir, &tab_id) {
                    display.message(&format!("no such tab: {tab_id}"))?;
                }
            }
            None => display.message("no directory open")?,
        },
        Command::Restart => match focus {
            Some((dir, tab_id)) => {
                coordinator.restart_tab(&dir, &tab_id);
            }
            None => display.message("no directory open")?,
        },
        Command::Clear => {
            coordinator.clear_screen();
        }
        Command::Cd(path) => match resolve_dir(focus.as_ref().map(|(d, _)| d), &path) {
            Ok(dir) => {
                coordinator.open_directory(&dir);
            }
            Err(e) => display.message(&e.to_string())?,
        },
        Command::Forget(path) => {
            let dir = match path {
                Some(path) => match resolve_dir(focus.as_ref().map(|(d, _)| d), &path) {
                    Ok(dir) => dir,
                    Err(e) => {
                        display.message(&e.to_string())?;
                        return Ok(Flow::Continue);
                    }
                },
                None => match focus {
                    Some((dir, _)) => dir,
                    None => return Ok(Flow::Continue),
                },
            };
            if !coordinator.remove_directory(&dir) {
                display.message(&format!("{dir} is not open"))?;
            } else if coordinator.focus().is_none() {
                display.redraw(None)?;
            }
        }
        Command::Resize(viewport) => coordinator.resize(viewport),
        Command::Tabs => {
            for (dir, directory) in coordinator.registry().directories() {
                let active = directory.active_tab().map(|t| t.id()).unwrap_or_default();
                let tabs: Vec<String> = directory
                    .tabs()
                    .iter()
                    .map(|tab| {
                        let marker = if tab.id() == active { "*" } else { "" };
                        match tab.terminal_session_id() {
                            Some(session) => format!("{marker}{} ({session})", tab.id()),
                            None => format!("{marker}{}", tab.id()),
                        }
                    })
                    .collect();
                display.message(&format!("{dir}: {}", tabs.join(", ")))?;
            }
        }
        Command::Status => {
            let text = coordinator
                .status()
                .map(|s| s.to_string())
                .unwrap_or_else(|| "connected".to_string());
            display.message(&text)?;
        }
        Command::Help => display.message(HELP)?,
        Command::Quit => return Ok(Flow::Quit),
    }
    Ok(Flow::Continue)
}

/// Input was typed into a tab with no shell: start one.
fn restart_shell<W: Write>(
    coordinator: &mut Coordinator,
    display: &mut Display<W>,
    dir: Option<&DirectoryKey>,
) -> io::Result<()> {
    match dir {
        Some(dir) => {
            display.message("no shell attached, starting one")?;
            coordinator.open_directory(dir);
        }
        None => display.message("no directory open")?,
    }
    Ok(())
}
