mod cli;
mod commands;
mod display;
mod ipc;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use clap::Parser;
use tether_core::{
    Coordinator, DirectoryKey, MemoryStore, SqliteStore, StateStore, TerminalConfig, Viewport,
};
use tether_pty::{LocalTransport, Multiplexer};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

use crate::cli::Cli;
use crate::commands::Flow;
use crate::display::Display;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout is the terminal display.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let data_dir = match cli.data_dir.clone() {
        Some(dir) => dir,
        None => home_dir()
            .context("could not determine home directory")?
            .join(".tether"),
    };
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("failed to create {}", data_dir.display()))?;

    // Open (or create) the SQLite database at <data-dir>/tether.db.
    let db_path = data_dir.join("tether.db");
    let db = tether_db::open(&db_path)
        .with_context(|| format!("failed to open database {}", db_path.display()))?;

    // Seed policy defaults on first launch.
    TerminalConfig::seed_defaults(&db).context("failed to seed settings")?;
    let config = TerminalConfig::load(&db);

    if cli.print_state {
        let state = tether_db::terminals::load_state(&db).context("failed to load layout")?;
        println!("{}", state.to_json()?);
        return Ok(());
    }

    let store: Box<dyn StateStore> = if cli.ephemeral {
        Box::new(MemoryStore::new())
    } else {
        Box::new(SqliteStore::new(Arc::new(Mutex::new(db))))
    };

    let dir = match cli.dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("could not determine current directory")?,
    };
    let dir = std::fs::canonicalize(&dir).unwrap_or(dir);
    let dir = DirectoryKey::new(&dir)
        .with_context(|| format!("not an absolute directory: {}", dir.display()))?;

    let mux = match &cli.shell {
        Some(shell) => Multiplexer::with_shell(shell.clone()),
        None => Multiplexer::new(),
    };
    let transport = Arc::new(LocalTransport::new(mux));

    let (mut coordinator, mut inbox) = Coordinator::new(transport, store, config);
    let mut notifications = coordinator.subscribe();
    let mut display = Display::new(std::io::stdout(), cli.json);

    match Viewport::new(cli.cols, cli.rows) {
        Some(viewport) => coordinator.resize(viewport),
        None => log::warn!("ignoring zero viewport {}x{}", cli.cols, cli.rows),
    }
    coordinator.open_directory(&dir);
    display.redraw(coordinator.view().as_ref())?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    break;
                };
                match commands::parse(&line) {
                    Ok(command) => {
                        if commands::execute(&mut coordinator, &mut display, command)? == Flow::Quit {
                            break;
                        }
                    }
                    Err(e) => display.message(&e.to_string())?,
                }
            }
            Some(inbound) = inbox.recv() => coordinator.handle(inbound),
            notification = notifications.recv() => match notification {
                Ok(notification) => display.notify(&notification, || coordinator.view())?,
                Err(RecvError::Lagged(skipped)) => {
                    log::debug!("display lagged by {skipped} notifications, redrawing");
                    display.redraw(coordinator.view().as_ref())?;
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    coordinator.shutdown();
    log::info!("layout saved, exiting");
    Ok(())
}

/// Get the user's home directory.
fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}
