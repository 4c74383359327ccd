//! Durable projection of the terminal layout.
//!
//! Only identity fields are stored: directory keys, tab ids and labels, the
//! bound PTY session id, creation time, and which tab is active. Output
//! buffers and connection flags are runtime-only.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use crate::settings;

/// Settings key holding the next tab number to issue.
pub const NEXT_TAB_ID_KEY: &str = "terminal_next_tab_id";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedState {
    /// `[directoryKey, directory]` pairs in display order.
    pub sessions: Vec<(String, PersistedDirectory)>,
    pub next_tab_id: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedDirectory {
    pub active_tab_id: Option<String>,
    pub tabs: Vec<PersistedTab>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedTab {
    pub id: String,
    pub label: String,
    pub terminal_session_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl PersistedState {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

/// Replace the stored layout with `state` in a single transaction.
pub fn save_state(conn: &Connection, state: &PersistedState) -> rusqlite::Result<()> {
    let tx = conn.unchecked_transaction()?;

    tx.execute("DELETE FROM terminal_tabs", [])?;
    tx.execute("DELETE FROM terminal_directories", [])?;

    for (dir_position, (key, directory)) in state.sessions.iter().enumerate() {
        tx.execute(
            "INSERT INTO terminal_directories (directory_key, active_tab_id, position) \
             VALUES (?1, ?2, ?3)",
            params![key, directory.active_tab_id, dir_position as i64],
        )?;
        for (tab_position, tab) in directory.tabs.iter().enumerate() {
            tx.execute(
                "INSERT INTO terminal_tabs \
                 (id, directory_key, label, terminal_session_id, created_at, position) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    tab.id,
                    key,
                    tab.label,
                    tab.terminal_session_id,
                    tab.created_at,
                    tab_position as i64
                ],
            )?;
        }
    }

    settings::set(&tx, NEXT_TAB_ID_KEY, &state.next_tab_id.to_string())?;
    tx.commit()
}

/// Load the stored layout. An empty database yields an empty state.
pub fn load_state(conn: &Connection) -> rusqlite::Result<PersistedState> {
    let mut dir_stmt = conn.prepare(
        "SELECT directory_key, active_tab_id FROM terminal_directories ORDER BY position",
    )?;
    let directories = dir_stmt
        .query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut tab_stmt = conn.prepare(
        "SELECT id, label, terminal_session_id, created_at FROM terminal_tabs \
         WHERE directory_key = ?1 ORDER BY position",
    )?;

    let mut sessions = Vec::with_capacity(directories.len());
    for (key, active_tab_id) in directories {
        let tabs = tab_stmt
            .query_map(params![key], |row| {
                Ok(PersistedTab {
                    id: row.get(0)?,
                    label: row.get(1)?,
                    terminal_session_id: row.get(2)?,
                    created_at: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        sessions.push((key, PersistedDirectory { active_tab_id, tabs }));
    }

    let next_tab_id = settings::get(conn, NEXT_TAB_ID_KEY)?
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    Ok(PersistedState {
        sessions,
        next_tab_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn tab(id: &str, session: Option<&str>) -> PersistedTab {
        PersistedTab {
            id: id.to_string(),
            label: format!("Terminal {id}"),
            terminal_session_id: session.map(str::to_string),
            created_at: Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap(),
        }
    }

    fn sample() -> PersistedState {
        PersistedState {
            sessions: vec![
                (
                    "/repo".to_string(),
                    PersistedDirectory {
                        active_tab_id: Some("tab-2".to_string()),
                        tabs: vec![tab("tab-1", Some("p1")), tab("tab-2", None)],
                    },
                ),
                (
                    "/other".to_string(),
                    PersistedDirectory {
                        active_tab_id: None,
                        tabs: vec![tab("tab-7", Some("p7"))],
                    },
                ),
            ],
            next_tab_id: 8,
        }
    }

    #[test]
    fn test_empty_database_loads_empty_state() {
        let conn = crate::open_in_memory().unwrap();
        assert_eq!(load_state(&conn).unwrap(), PersistedState::default());
    }

    #[test]
    fn test_save_then_load_preserves_order_and_fields() {
        let conn = crate::open_in_memory().unwrap();
        let state = sample();
        save_state(&conn, &state).unwrap();
        assert_eq!(load_state(&conn).unwrap(), state);
    }

    #[test]
    fn test_save_replaces_previous_layout() {
        let conn = crate::open_in_memory().unwrap();
        save_state(&conn, &sample()).unwrap();

        let smaller = PersistedState {
            sessions: vec![(
                "/repo".to_string(),
                PersistedDirectory {
                    active_tab_id: None,
                    tabs: vec![tab("tab-9", None)],
                },
            )],
            next_tab_id: 10,
        };
        save_state(&conn, &smaller).unwrap();
        assert_eq!(load_state(&conn).unwrap(), smaller);
    }

    #[test]
    fn test_json_layout_uses_directory_pairs() {
        let json = sample().to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["nextTabId"], 8);
        assert_eq!(value["sessions"][0][0], "/repo");
        assert_eq!(value["sessions"][0][1]["activeTabId"], "tab-2");
        assert_eq!(value["sessions"][0][1]["tabs"][0]["terminalSessionId"], "p1");
        assert!(value["sessions"][0][1]["tabs"][1]["terminalSessionId"].is_null());

        assert_eq!(PersistedState::from_json(&json).unwrap(), sample());
    }
}
