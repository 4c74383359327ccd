//! Policy knobs stored in the `settings` table.

use std::str::FromStr;
use std::time::Duration;

use rusqlite::Connection;
use tether_db::settings;
use tether_pty::ConnectOptions;

use crate::buffer::DEFAULT_BUFFER_BUDGET;

/// Settings key for the per-tab output budget.
pub const SETTING_BUFFER_BUDGET: &str = "terminal_buffer_budget";

/// Settings key for how many times a dropped stream is retried.
pub const SETTING_RECONNECT_MAX_ATTEMPTS: &str = "terminal_reconnect_max_attempts";

/// Settings key for the first reconnect delay.
pub const SETTING_RECONNECT_INITIAL_DELAY_MS: &str = "terminal_reconnect_initial_delay_ms";

/// Settings key for the reconnect delay ceiling.
pub const SETTING_RECONNECT_MAX_DELAY_MS: &str = "terminal_reconnect_max_delay_ms";

/// Settings key for the connection-establishment timeout.
pub const SETTING_CONNECT_TIMEOUT_MS: &str = "terminal_connect_timeout_ms";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminalConfig {
    pub buffer_budget: usize,
    pub connect: ConnectOptions,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            buffer_budget: DEFAULT_BUFFER_BUDGET,
            connect: ConnectOptions::default(),
        }
    }
}

impl TerminalConfig {
    /// Read the configuration, using defaults for missing or unparsable values.
    pub fn load(conn: &Connection) -> Self {
        let defaults = Self::default();
        Self {
            buffer_budget: read(conn, SETTING_BUFFER_BUDGET, defaults.buffer_budget),
            connect: ConnectOptions {
                max_retries: read(
                    conn,
                    SETTING_RECONNECT_MAX_ATTEMPTS,
                    defaults.connect.max_retries,
                ),
                initial_delay: read_millis(
                    conn,
                    SETTING_RECONNECT_INITIAL_DELAY_MS,
                    defaults.connect.initial_delay,
                ),
                max_delay: read_millis(
                    conn,
                    SETTING_RECONNECT_MAX_DELAY_MS,
                    defaults.connect.max_delay,
                ),
                connect_timeout: read_millis(
                    conn,
                    SETTING_CONNECT_TIMEOUT_MS,
                    defaults.connect.connect_timeout,
                ),
            },
        }
    }

    /// Write default values for any setting that has none yet.
    pub fn seed_defaults(conn: &Connection) -> rusqlite::Result<()> {
        let defaults = Self::default();
        settings::set_default(conn, SETTING_BUFFER_BUDGET, &defaults.buffer_budget.to_string())?;
        settings::set_default(
            conn,
            SETTING_RECONNECT_MAX_ATTEMPTS,
            &defaults.connect.max_retries.to_string(),
        )?;
        settings::set_default(
            conn,
            SETTING_RECONNECT_INITIAL_DELAY_MS,
            &defaults.connect.initial_delay.as_millis().to_string(),
        )?;
        settings::set_default(
            conn,
            SETTING_RECONNECT_MAX_DELAY_MS,
            &defaults.connect.max_delay.as_millis().to_string(),
        )?;
        settings::set_default(
            conn,
            SETTING_CONNECT_TIMEOUT_MS,
            &defaults.connect.connect_timeout.as_millis().to_string(),
        )?;
        Ok(())
    }
}

fn read<T: FromStr>(conn: &Connection, key: &str, default: T) -> T {
    match settings::get(conn, key) {
        Ok(Some(value)) => value.trim().parse().unwrap_or_else(|_| {
            log::warn!("ignoring invalid value {value:?} for setting {key}");
            default
        }),
        Ok(None) => default,
        Err(e) => {
            log::warn!("failed to read setting {key}: {e}");
            default
        }
    }
}

fn read_millis(conn: &Connection, key: &str, default: Duration) -> Duration {
    Duration::from_millis(read(conn, key, default.as_millis() as u64))
}
