use rusqlite::Connection;

/// Current schema version. Bump this when adding migrations.
pub const CURRENT_VERSION: i64 = 1;

pub fn initialize(conn: &Connection) -> rusqlite::Result<()> {
    // Create base tables (idempotent)
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );

        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        ",
    )?;

    migrate(conn)?;
    Ok(())
}

pub fn version(conn: &Connection) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
}

fn migrate(conn: &Connection) -> rusqlite::Result<()> {
    let version = version(conn)?;

    if version < 1 {
        // Migration v1: durable terminal layout. Buffers are never stored.
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS terminal_directories (
                directory_key TEXT PRIMARY KEY,
                active_tab_id TEXT,
                position INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS terminal_tabs (
                id TEXT PRIMARY KEY,
                directory_key TEXT NOT NULL
                    REFERENCES terminal_directories(directory_key) ON DELETE CASCADE,
                label TEXT NOT NULL,
                terminal_session_id TEXT,
                created_at TEXT NOT NULL,
                position INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_terminal_tabs_directory
                ON terminal_tabs(directory_key, position);
            ",
        )?;

        conn.execute(
            "INSERT OR REPLACE INTO schema_version (version) VALUES (?1)",
            [CURRENT_VERSION],
        )?;
    }

    Ok(())
}
