use std::path::PathBuf;

use clap::Parser;

/// CLI arguments for tether
#[derive(Parser, Debug)]
#[command(name = "tether")]
#[command(about = "Per-directory terminal tabs that survive restarts")]
#[command(version)]
pub struct Cli {
    /// Where the layout database lives (default: ~/.tether)
    #[arg(long, value_name = "DIR")]
    pub data_dir: Option<PathBuf>,

    /// Directory to open (default: current directory)
    #[arg(long, value_name = "DIR")]
    pub dir: Option<PathBuf>,

    /// Emit display events as JSON lines instead of raw terminal output
    #[arg(long)]
    pub json: bool,

    /// Initial terminal width in columns
    #[arg(long, default_value_t = 80)]
    pub cols: u16,

    /// Initial terminal height in rows
    #[arg(long, default_value_t = 24)]
    pub rows: u16,

    /// Shell to spawn instead of $SHELL
    #[arg(long, value_name = "PATH")]
    pub shell: Option<String>,

    /// Keep the layout in memory only
    #[arg(long)]
    pub ephemeral: bool,

    /// Print the saved layout as JSON and exit
    #[arg(long)]
    pub print_state: bool,
}
