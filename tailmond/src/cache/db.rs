use std::path::Path;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, params, OptionalExtension};

/// The last status dump that parsed cleanly
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedStatus {
    pub raw: Vec<u8>,
    pub fingerprint: String,
    pub fetched_at: DateTime<Utc>,
}

/// Keeps the last good daemon output across restarts, so the dashboard has
/// something to show before the first refresh finishes.
pub struct SnapshotDb {
    conn: Connection,
}

impl SnapshotDb {
    /// Open or create the SQLite database with WAL mode enabled
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
            }
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;

        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .context("Failed to enable WAL mode")?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS status (
                id          INTEGER PRIMARY KEY CHECK (id = 1),
                raw         BLOB NOT NULL,
                fingerprint TEXT NOT NULL,
                fetched_at  TEXT NOT NULL
            );
            "#,
        )
        .context("Failed to create database schema")?;

        Ok(Self { conn })
    }

    /// Replace the stored status. Returns true if the topology fingerprint changed.
    pub fn store(&self, status: &CachedStatus) -> Result<bool> {
        let previous: Option<String> = self
            .conn
            .query_row("SELECT fingerprint FROM status WHERE id = 1", [], |row| row.get(0))
            .optional()
            .context("Failed to query stored fingerprint")?;

        self.conn.execute(
            r#"
            INSERT INTO status (id, raw, fingerprint, fetched_at)
            VALUES (1, ?1, ?2, ?3)
            ON CONFLICT(id) DO UPDATE SET
                raw = excluded.raw,
                fingerprint = excluded.fingerprint,
                fetched_at = excluded.fetched_at
            "#,
            params![&status.raw, &status.fingerprint, status.fetched_at.to_rfc3339()],
        )
        .context("Failed to store status")?;

        Ok(previous.as_deref() != Some(status.fingerprint.as_str()))
    }

    pub fn load(&self) -> Result<Option<CachedStatus>> {
        self.conn
            .query_row(
                "SELECT raw, fingerprint, fetched_at FROM status WHERE id = 1",
                [],
                |row| {
                    let fetched_at: String = row.get(2)?;
                    let fetched_at = DateTime::parse_from_rfc3339(&fetched_at)
                        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(
                            2,
                            rusqlite::types::Type::Text,
                            Box::new(e),
                        ))?
                        .with_timezone(&Utc);
                    Ok(CachedStatus {
                        raw: row.get(0)?,
                        fingerprint: row.get(1)?,
                        fetched_at,
                    })
                },
            )
            .optional()
            .context("Failed to load stored status")
    }
}
