use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};

use log::{debug, info};
use rusqlite::{Connection, OpenFlags};

use crate::store::StoreError;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS credentials (
    name TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS keys (
    category TEXT NOT NULL,
    id TEXT NOT NULL,
    value TEXT NOT NULL,
    PRIMARY KEY (category, id)
);
CREATE TABLE IF NOT EXISTS messages (
    chat_id TEXT NOT NULL,
    id TEXT NOT NULL,
    sender TEXT NOT NULL,
    sender_name TEXT,
    from_me INTEGER NOT NULL,
    is_group INTEGER NOT NULL,
    timestamp INTEGER NOT NULL,
    text TEXT NOT NULL,
    recorded_at INTEGER NOT NULL,
    PRIMARY KEY (chat_id, id)
);
CREATE TABLE IF NOT EXISTS group_snapshot (
    id TEXT PRIMARY KEY,
    metadata TEXT NOT NULL,
    observed_at INTEGER NOT NULL
);
";

/// Shared handle to the SQLite database.
///
/// A single connection is guarded by a mutex and every statement runs on the
/// blocking thread pool, keeping the async workers free while SQLite does I/O.
/// Cloning the handle is cheap and all clones share the same connection.
///
/// # Examples
///
/// ```ignore
/// # use ronron::store::Database;
/// # async fn example() -> Result<(), ronron::store::StoreError> {
/// let database = Database::open("ronron.db").await?;
/// let count: i64 = database
///     .call(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?))
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl Database {
    /// Opens the database at `path`, creating the file and its schema if absent.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        info!("open database {}", path.display());

        let conn = tokio::task::spawn_blocking({
            let path = path.clone();
            move || open_connection(&path)
        })
        .await??;

        Ok(Database {
            conn: Arc::new(Mutex::new(conn)),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Runs `f` with exclusive access to the connection on the blocking pool.
    pub async fn call<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|_| StoreError::Poisoned)?;
            f(&mut guard)
        })
        .await?
    }
}

fn open_connection(path: &Path) -> Result<Connection, StoreError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|source| StoreError::CreateDir {
            path: parent.display().to_string(),
            source,
        })?;
    }

    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    let conn = Connection::open_with_flags(path, flags)?;
    apply_pragmas(&conn)?;
    conn.execute_batch(SCHEMA)?;
    debug!("database schema ready at {}", path.display());

    Ok(conn)
}

fn apply_pragmas(conn: &Connection) -> Result<(), StoreError> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    // Credentials must survive power loss once committed
    conn.pragma_update(None, "synchronous", "FULL")?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    Ok(())
}
