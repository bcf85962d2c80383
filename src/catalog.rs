//! Video catalog keyed by video id, backed by SQLite.

use std::io::BufRead;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const THUMBNAIL_HOST: &str = "https://img.youtube.com/vi";
const THUMBNAIL_FILE: &str = "hqdefault.jpg";

/// Builds the thumbnail URL for a video id.
pub fn thumbnail_url(video_id: &str) -> String {
    format!("{THUMBNAIL_HOST}/{video_id}/{THUMBNAIL_FILE}")
}

/// One known video belonging to a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogRecord {
    /// Creator namespace used to partition queries.
    pub channel_name: String,
    /// Stable, globally unique video identifier.
    pub video_id: String,
    /// Human-readable video title.
    pub video_title: String,
    /// Thumbnail location derived from `video_id`.
    pub thumbnail_url: String,
}

impl CatalogRecord {
    /// Creates a record, deriving the thumbnail URL from the video id.
    pub fn new<C, V, T>(channel_name: C, video_id: V, video_title: T) -> Self
    where
        C: Into<String>,
        V: Into<String>,
        T: Into<String>,
    {
        let video_id = video_id.into();
        let thumbnail_url = thumbnail_url(&video_id);
        Self {
            channel_name: channel_name.into(),
            video_id,
            video_title: video_title.into(),
            thumbnail_url,
        }
    }
}

/// Failures raised by catalog storage.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The underlying SQLite call failed.
    #[error("catalog database error: {0}")]
    Database(#[from] rusqlite::Error),
    /// Reading an import stream failed.
    #[error("failed to read catalog import line {line}: {source}")]
    Read {
        /// 1-based line number.
        line: usize,
        /// I/O failure.
        source: std::io::Error,
    },
    /// An import line did not parse as a catalog entry.
    #[error("invalid catalog entry at line {line}: {source}")]
    InvalidEntry {
        /// 1-based line number.
        line: usize,
        /// JSON decoding failure.
        source: serde_json::Error,
    },
    /// Another thread panicked while holding the connection.
    #[error("catalog connection poisoned")]
    Poisoned,
}

/// Lookup/insert contract the pipeline needs from a catalog.
pub trait Catalog: Send + Sync {
    /// Whether a video id is already known.
    fn exists(&self, video_id: &str) -> Result<bool, CatalogError>;

    /// Inserts a video; a no-op when `video_id` is already present.
    ///
    /// Returns `true` when a new row was written.
    fn insert(
        &self,
        channel_name: &str,
        video_id: &str,
        video_title: &str,
    ) -> Result<bool, CatalogError>;

    /// All videos known for a channel, in discovery order.
    fn list_by_channel(&self, channel_name: &str) -> Result<Vec<CatalogRecord>, CatalogError>;
}

/// SQLite-backed catalog.
pub struct SqliteCatalog {
    conn: Mutex<Connection>,
}

impl SqliteCatalog {
    /// Opens (or creates) a catalog database file and ensures the schema exists.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, CatalogError> {
        let catalog = Self {
            conn: Mutex::new(Connection::open(path)?),
        };
        catalog.ensure_schema()?;
        Ok(catalog)
    }

    /// Opens a throwaway in-memory catalog.
    pub fn open_in_memory() -> Result<Self, CatalogError> {
        let catalog = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        catalog.ensure_schema()?;
        Ok(catalog)
    }

    /// Creates the `video_contents` table if missing.
    pub fn ensure_schema(&self) -> Result<(), CatalogError> {
        self.conn()?.execute_batch(
            "CREATE TABLE IF NOT EXISTS video_contents (
                channel_name TEXT NOT NULL,
                video_id TEXT NOT NULL PRIMARY KEY,
                video_title TEXT NOT NULL DEFAULT '',
                thumbnail_url TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS video_contents_channel_idx
                ON video_contents (channel_name);",
        )?;
        Ok(())
    }

    /// Drops the `video_contents` table and everything in it.
    pub fn drop_schema(&self) -> Result<(), CatalogError> {
        self.conn()?
            .execute_batch("DROP TABLE IF EXISTS video_contents;")?;
        Ok(())
    }

    /// Number of rows stored for a channel.
    pub fn count_by_channel(&self, channel_name: &str) -> Result<usize, CatalogError> {
        let count: i64 = self.conn()?.query_row(
            "SELECT COUNT(*) FROM video_contents WHERE channel_name = ?1",
            params![channel_name],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Inserts JSONL catalog entries (`channel_name`, `video_id`, `video_title`).
    ///
    /// Blank lines are skipped. Returns `(inserted, already_present)`.
    pub fn import_jsonl<R: BufRead>(&self, reader: R) -> Result<(usize, usize), CatalogError> {
        let mut inserted = 0usize;
        let mut present = 0usize;
        for (idx, line) in reader.lines().enumerate() {
            let line_no = idx + 1;
            let line = line.map_err(|source| CatalogError::Read {
                line: line_no,
                source,
            })?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: ImportEntry =
                serde_json::from_str(&line).map_err(|source| CatalogError::InvalidEntry {
                    line: line_no,
                    source,
                })?;
            if self.insert(&entry.channel_name, &entry.video_id, &entry.video_title)? {
                inserted += 1;
            } else {
                present += 1;
            }
        }
        Ok((inserted, present))
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, CatalogError> {
        self.conn.lock().map_err(|_| CatalogError::Poisoned)
    }
}

impl Catalog for SqliteCatalog {
    fn exists(&self, video_id: &str) -> Result<bool, CatalogError> {
        let found = self
            .conn()?
            .query_row(
                "SELECT 1 FROM video_contents WHERE video_id = ?1 LIMIT 1",
                params![video_id],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn insert(
        &self,
        channel_name: &str,
        video_id: &str,
        video_title: &str,
    ) -> Result<bool, CatalogError> {
        let changed = self.conn()?.execute(
            "INSERT OR IGNORE INTO video_contents
                (channel_name, video_id, video_title, thumbnail_url)
             VALUES (?1, ?2, ?3, ?4)",
            params![channel_name, video_id, video_title, thumbnail_url(video_id)],
        )?;
        Ok(changed > 0)
    }

    fn list_by_channel(&self, channel_name: &str) -> Result<Vec<CatalogRecord>, CatalogError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT channel_name, video_id, video_title, thumbnail_url
             FROM video_contents WHERE channel_name = ?1 ORDER BY rowid",
        )?;
        let rows = stmt.query_map(params![channel_name], |row| {
            Ok(CatalogRecord {
                channel_name: row.get(0)?,
                video_id: row.get(1)?,
                video_title: row.get(2)?,
                thumbnail_url: row.get(3)?,
            })
        })?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }
}

#[derive(Debug, Deserialize)]
struct ImportEntry {
    channel_name: String,
    video_id: String,
    #[serde(default)]
    video_title: String,
}
