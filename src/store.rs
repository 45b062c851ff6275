//! Queue store trait and SQLite implementation.
//!
//! The engine's queue lives in memory. A store mirrors it to disk so that
//! operations recorded offline survive a restart of the host process.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

use crate::offline::{OfflineOperation, OperationId};

/// Trait for queue persistence backends.
pub trait QueueStore: Send + Sync {
  /// All persisted operations, in id order.
  fn load_all(&self) -> Result<Vec<OfflineOperation>>;

  /// Persist one operation (upsert by id).
  fn save(&self, operation: &OfflineOperation) -> Result<()>;

  /// Forget the given operations.
  fn remove(&self, ids: &[OperationId]) -> Result<()>;
}

/// Store that doesn't persist anything.
/// Used when persistence is disabled - all operations are no-ops.
pub struct NoopStore;

impl QueueStore for NoopStore {
  fn load_all(&self) -> Result<Vec<OfflineOperation>> {
    Ok(Vec::new()) // Nothing persisted
  }

  fn save(&self, _operation: &OfflineOperation) -> Result<()> {
    Ok(()) // Discard
  }

  fn remove(&self, _ids: &[OperationId]) -> Result<()> {
    Ok(())
  }
}

/// SQLite-based queue store.
pub struct SqliteQueueStore {
  conn: Mutex<Connection>,
}

/// Schema for the queue table.
const QUEUE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS offline_queue (
    id INTEGER PRIMARY KEY,
    op_type TEXT NOT NULL,
    data BLOB NOT NULL,
    enqueued_at TEXT NOT NULL
);
"#;

impl SqliteQueueStore {
  /// Open (or create) the store at `path`, or at the default location.
  pub fn open(path: Option<&Path>) -> Result<Self> {
    let path = match path {
      Some(p) => p.to_path_buf(),
      None => Self::default_path()?,
    };

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create queue directory: {}", e))?;
    }

    let conn = Connection::open(&path)
      .map_err(|e| eyre!("Failed to open queue database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Store backed by a private in-memory database.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory queue database: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(QUEUE_SCHEMA)
      .map_err(|e| eyre!("Failed to run queue migrations: {}", e))?;

    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("edgecache").join("queue.db"))
  }
}

impl QueueStore for SqliteQueueStore {
  fn load_all(&self) -> Result<Vec<OfflineOperation>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT id, data FROM offline_queue ORDER BY id")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows: Vec<(i64, Vec<u8>)> = stmt
      .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
      .map_err(|e| eyre!("Failed to query queue: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    let operations = rows
      .into_iter()
      .filter_map(|(id, data)| match serde_json::from_slice(&data) {
        Ok(op) => Some(op),
        Err(e) => {
          warn!(id, error = %e, "skipping unreadable queued operation");
          None
        }
      })
      .collect();

    Ok(operations)
  }

  fn save(&self, operation: &OfflineOperation) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let data =
      serde_json::to_vec(operation).map_err(|e| eyre!("Failed to serialize operation: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO offline_queue (id, op_type, data, enqueued_at)
         VALUES (?, ?, ?, ?)",
        params![
          operation.id.0 as i64,
          operation.op_type,
          data,
          operation.enqueued_at.to_rfc3339()
        ],
      )
      .map_err(|e| eyre!("Failed to store operation: {}", e))?;

    Ok(())
  }

  fn remove(&self, ids: &[OperationId]) -> Result<()> {
    if ids.is_empty() {
      return Ok(());
    }
    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;
    for id in ids {
      tx.execute("DELETE FROM offline_queue WHERE id = ?", params![id.0 as i64])
        .map_err(|e| eyre!("Failed to delete operation {}: {}", id, e))?;
    }
    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }
}
