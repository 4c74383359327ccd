pub mod schema;
pub mod settings;
pub mod terminals;

use rusqlite::Connection;
use std::path::Path;

pub use terminals::{PersistedDirectory, PersistedState, PersistedTab};

pub fn open(path: &Path) -> rusqlite::Result<Connection> {
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    schema::initialize(&conn)?;
    Ok(conn)
}

/// Open a private in-memory database with the schema applied.
pub fn open_in_memory() -> rusqlite::Result<Connection> {
    let conn = Connection::open_in_memory()?;
    conn.execute_batch("PRAGMA foreign_keys=ON;")?;
    schema::initialize(&conn)?;
    Ok(conn)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_creates_file_with_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tether.db");

        let conn = open(&path).unwrap();
        assert!(path.exists());
        assert_eq!(schema::version(&conn).unwrap(), schema::CURRENT_VERSION);
        drop(conn);

        // Reopening an initialized database is a no-op.
        let conn = open(&path).unwrap();
        assert_eq!(schema::version(&conn).unwrap(), schema::CURRENT_VERSION);
    }
}
