// Database module
//
// One SQLite file backs both the queue lists and the metadata documents.
// Worker processes and the master each open their own connection; WAL plus a
// busy timeout lets them share the file.

pub mod migrations;

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::Connection;

use crate::constants::SQLITE_BUSY_TIMEOUT_MS;
use crate::error::Result;

/// Connection shared by the queue and metadata stores of one process.
pub type SharedConnection = Arc<Mutex<Connection>>;

/// Open or create a database at the given path
pub fn open_db(db_path: &Path) -> Result<Connection> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let conn = Connection::open(db_path)?;

    // Enable WAL mode so workers and the master can read while one writes
    conn.execute_batch("PRAGMA journal_mode = WAL;")?;
    conn.busy_timeout(std::time::Duration::from_millis(SQLITE_BUSY_TIMEOUT_MS))?;

    migrations::run_migrations(&conn)?;

    Ok(conn)
}

/// Open the database and wrap it for sharing between stores
pub fn open_shared(db_path: &Path) -> Result<SharedConnection> {
    Ok(Arc::new(Mutex::new(open_db(db_path)?)))
}

/// In-memory database with migrations applied (tests, dry runs)
pub fn open_in_memory() -> Result<SharedConnection> {
    let conn = Connection::open_in_memory()?;
    migrations::run_migrations(&conn)?;
    Ok(Arc::new(Mutex::new(conn)))
}
