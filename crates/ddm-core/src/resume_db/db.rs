//! SQLite-backed item database: connection, schema, and shared helpers.
//!
//! CRUD for item rows lives in `items`; this module only owns the pool and
//! the migration that creates the schema it queries.

use anyhow::Result;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Sqlite};
use std::time::{SystemTime, UNIX_EPOCH};

/// Handle to the SQLite-backed job database.
///
/// The database file is stored under the XDG state directory:
/// `~/.local/state/ddm/jobs.db` on Debian.
#[derive(Clone)]
pub struct ResumeDb {
    pub(crate) pool: Pool<Sqlite>,
}

impl ResumeDb {
    /// Open (or create) the default job database and run migrations.
    pub async fn open_default() -> Result<Self> {
        let xdg_dirs = xdg::BaseDirectories::with_prefix("ddm")?;
        let state_dir = xdg_dirs.get_state_home();
        let db_path = state_dir.join("jobs.db");
        Self::open_at(&db_path).await
    }

    /// Open (or create) the database at an explicit path. Used by callers
    /// that manage their own state directory (tests, alternate profiles)
    /// instead of the XDG default.
    pub async fn open_at(db_path: &std::path::Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let uri = format!("sqlite://{}", db_path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect(&uri)
            .await?;

        let db = ResumeDb { pool };
        db.migrate().await?;
        Ok(db)
    }

    pub(crate) async fn migrate(&self) -> Result<()> {
        // `items`: the Manager's Item/ItemPart manifest, one row per download,
        // stored as a JSON column rather than the source's hand-rolled binary
        // format (see `SPEC_FULL.md` §1a/§6). `json` carries an `ItemSnapshot`;
        // `#[serde(default)]` on every field added after the first release is
        // what makes an old row decode cleanly once new fields land.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS items (
                hash TEXT PRIMARY KEY,
                json TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        // `queue_state`: a single row holding the persisted QueueState
        // (max_concurrent, waiting list, paused flag). Active items are
        // deliberately not part of this row; see `SPEC_FULL.md` §4.8.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS queue_state (
                id INTEGER PRIMARY KEY CHECK (id = 0),
                json TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Force a WAL checkpoint. Used as the durability point for terminal
    /// events (item completion, explicit flush) instead of a per-write fsync.
    pub async fn checkpoint(&self) -> Result<()> {
        sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

pub(crate) fn unix_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Open an in-memory database for tests (no disk I/O). Shared by every test
/// module under `resume_db` and `manager` so each gets an isolated schema
/// without touching the real XDG state directory.
#[cfg(test)]
pub(crate) async fn open_memory() -> Result<ResumeDb> {
    // Single connection to avoid in-memory pool handing back a different empty DB.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    let db = ResumeDb { pool };
    db.migrate().await?;
    Ok(db)
}
