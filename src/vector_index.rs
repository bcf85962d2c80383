//! Cosine-similarity vector index with channel filtering, persisted as a JSONL log.
//!
//! Every upsert appends one line to `{dir}/{collection}.jsonl`; opening the
//! index replays the log so the last write for each id wins. `compact` rewrites
//! the log with one line per id.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use thiserror::Error;
use tracing::{debug, warn};

use crate::embeddings::{EmbeddingRecord, ThumbnailMetadata};

/// Failures raised by the vector index.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Reading or writing the backing log failed.
    #[error("vector index I/O error on {path:?}: {source}")]
    Io {
        /// Backing file.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// A log line could not be decoded.
    #[error("corrupt vector index entry at {path:?} line {line}: {source}")]
    Corrupt {
        /// Backing file.
        path: PathBuf,
        /// 1-based line number.
        line: usize,
        /// Decoding failure.
        source: serde_json::Error,
    },
    /// Encoding an entry for the log failed.
    #[error("failed to encode vector index entry: {0}")]
    Encode(#[from] serde_json::Error),
    /// The vector length differs from the index dimensionality.
    #[error("vector has {actual} dimensions, index holds {expected}")]
    DimensionMismatch {
        /// Dimensionality fixed by the first stored vector.
        expected: usize,
        /// Offending length.
        actual: usize,
    },
    /// Zero-length vectors are never stored or queried.
    #[error("empty vector")]
    EmptyVector,
    /// NaN or infinite components cannot be ranked or written to the log.
    #[error("vector component {position} is not finite")]
    NonFinite {
        /// Index of the first offending component.
        position: usize,
    },
    /// Another thread panicked while holding an index lock.
    #[error("vector index lock poisoned")]
    Poisoned,
}

/// Restricts a query to one creator namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelFilter {
    /// Required `channel_name` metadata value.
    pub channel_name: String,
}

impl ChannelFilter {
    /// Filter matching `channel_name` exactly.
    pub fn new(channel_name: impl Into<String>) -> Self {
        Self {
            channel_name: channel_name.into(),
        }
    }

    fn matches(&self, metadata: &ThumbnailMetadata) -> bool {
        metadata.channel_name == self.channel_name
    }
}

/// One ranked query result.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredEntry {
    /// Stored id (video id).
    pub id: String,
    /// Stored metadata.
    pub metadata: ThumbnailMetadata,
    /// Cosine similarity to the query vector, higher is closer.
    pub score: f32,
}

/// Nearest-neighbor store the pipeline writes to and search reads from.
pub trait VectorIndex: Send + Sync {
    /// Inserts or replaces the entry for `id`.
    fn upsert(
        &self,
        id: &str,
        vector: &[f32],
        metadata: &ThumbnailMetadata,
    ) -> Result<(), IndexError>;

    /// Returns up to `k` entries matching `filter`, best match first.
    fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: &ChannelFilter,
    ) -> Result<Vec<ScoredEntry>, IndexError>;

    /// Whether an entry exists for `id`.
    fn contains(&self, id: &str) -> Result<bool, IndexError>;
}

#[derive(Debug, Clone)]
struct StoredEntry {
    vector: Vec<f32>,
    norm: f32,
    metadata: ThumbnailMetadata,
}

#[derive(Default)]
struct Entries {
    dimensions: Option<usize>,
    by_id: HashMap<String, StoredEntry>,
}

impl Entries {
    fn check_vector(&self, vector: &[f32]) -> Result<(), IndexError> {
        if vector.is_empty() {
            return Err(IndexError::EmptyVector);
        }
        if let Some(expected) = self.dimensions {
            if expected != vector.len() {
                return Err(IndexError::DimensionMismatch {
                    expected,
                    actual: vector.len(),
                });
            }
        }
        match vector.iter().position(|v| !v.is_finite()) {
            Some(position) => Err(IndexError::NonFinite { position }),
            None => Ok(()),
        }
    }

    fn apply(&mut self, record: EmbeddingRecord) {
        self.dimensions.get_or_insert(record.vector.len());
        let norm = l2_norm(&record.vector);
        self.by_id.insert(
            record.id,
            StoredEntry {
                vector: record.vector,
                norm,
                metadata: record.metadata,
            },
        );
    }
}

/// Exact cosine index, optionally persisted to local disk.
pub struct LocalVectorIndex {
    entries: RwLock<Entries>,
    log: Option<Mutex<LogWriter>>,
}

struct LogWriter {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl LocalVectorIndex {
    /// Index that lives only in memory.
    pub fn in_memory() -> Self {
        Self {
            entries: RwLock::new(Entries::default()),
            log: None,
        }
    }

    /// Opens (or creates) the collection stored under `dir`, replaying its log.
    pub fn open<P: AsRef<Path>>(dir: P, collection: &str) -> Result<Self, IndexError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).map_err(|source| IndexError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = dir.join(format!("{collection}.jsonl"));
        let entries = replay(&path)?;
        debug!(path = %path.display(), entries = entries.by_id.len(), "opened vector index");
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| IndexError::Io {
                path: path.clone(),
                source,
            })?;
        Ok(Self {
            entries: RwLock::new(entries),
            log: Some(Mutex::new(LogWriter {
                path,
                writer: BufWriter::new(file),
            })),
        })
    }

    /// Number of distinct ids stored.
    pub fn len(&self) -> Result<usize, IndexError> {
        Ok(self.read()?.by_id.len())
    }

    /// Whether the index holds no entries.
    pub fn is_empty(&self) -> Result<bool, IndexError> {
        Ok(self.len()? == 0)
    }

    /// Dimensionality shared by all stored vectors, once known.
    pub fn dimensions(&self) -> Result<Option<usize>, IndexError> {
        Ok(self.read()?.dimensions)
    }

    /// Ids stored under a channel, sorted.
    pub fn ids_for_channel(&self, channel_name: &str) -> Result<Vec<String>, IndexError> {
        let entries = self.read()?;
        let mut ids: Vec<String> = entries
            .by_id
            .iter()
            .filter(|(_, entry)| entry.metadata.channel_name == channel_name)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    /// Rewrites the backing log so each id appears once.
    pub fn compact(&self) -> Result<(), IndexError> {
        let Some(log) = &self.log else {
            return Ok(());
        };
        let entries = self.read()?;
        let mut log = log.lock().map_err(|_| IndexError::Poisoned)?;
        let path = log.path.clone();
        let tmp_path = path.with_extension("jsonl.tmp");
        let io_err = |path: &Path, source| IndexError::Io {
            path: path.to_path_buf(),
            source,
        };

        let tmp = File::create(&tmp_path).map_err(|e| io_err(&tmp_path, e))?;
        let mut writer = BufWriter::new(tmp);
        let mut ids: Vec<&String> = entries.by_id.keys().collect();
        ids.sort();
        for id in ids {
            let entry = &entries.by_id[id];
            let record = EmbeddingRecord {
                id: id.clone(),
                vector: entry.vector.clone(),
                metadata: entry.metadata.clone(),
            };
            serde_json::to_writer(&mut writer, &record)?;
            writer.write_all(b"\n").map_err(|e| io_err(&tmp_path, e))?;
        }
        writer.flush().map_err(|e| io_err(&tmp_path, e))?;
        drop(writer);
        fs::rename(&tmp_path, &path).map_err(|e| io_err(&path, e))?;

        let file = OpenOptions::new()
            .append(true)
            .open(&path)
            .map_err(|e| io_err(&path, e))?;
        log.writer = BufWriter::new(file);
        Ok(())
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Entries>, IndexError> {
        self.entries.read().map_err(|_| IndexError::Poisoned)
    }
}

impl VectorIndex for LocalVectorIndex {
    fn upsert(
        &self,
        id: &str,
        vector: &[f32],
        metadata: &ThumbnailMetadata,
    ) -> Result<(), IndexError> {
        let record = EmbeddingRecord {
            id: id.to_string(),
            vector: vector.to_vec(),
            metadata: metadata.clone(),
        };
        let mut entries = self.entries.write().map_err(|_| IndexError::Poisoned)?;
        entries.check_vector(vector)?;
        if let Some(log) = &self.log {
            let mut log = log.lock().map_err(|_| IndexError::Poisoned)?;
            let line = serde_json::to_string(&record)?;
            let LogWriter { path, writer } = &mut *log;
            writeln!(writer, "{line}")
                .and_then(|_| writer.flush())
                .map_err(|source| IndexError::Io {
                    path: path.clone(),
                    source,
                })?;
        }
        entries.apply(record);
        Ok(())
    }

    fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: &ChannelFilter,
    ) -> Result<Vec<ScoredEntry>, IndexError> {
        let entries = self.read()?;
        if k == 0 || entries.by_id.is_empty() {
            return Ok(Vec::new());
        }
        entries.check_vector(vector)?;
        let query_norm = l2_norm(vector);
        let mut hits: Vec<ScoredEntry> = entries
            .by_id
            .iter()
            .filter(|(_, entry)| filter.matches(&entry.metadata))
            .map(|(id, entry)| ScoredEntry {
                id: id.clone(),
                metadata: entry.metadata.clone(),
                score: cosine(vector, query_norm, &entry.vector, entry.norm),
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        hits.truncate(k);
        Ok(hits)
    }

    fn contains(&self, id: &str) -> Result<bool, IndexError> {
        Ok(self.read()?.by_id.contains_key(id))
    }
}

/// Rebuilds the entries from the log at `path`.
///
/// A final line that fails to decode is a torn append from an interrupted
/// run: it is dropped and the file is truncated back to the last complete
/// line. A bad line anywhere else is reported as `Corrupt`.
fn replay(path: &Path) -> Result<Entries, IndexError> {
    let mut entries = Entries::default();
    let io_err = |source| IndexError::Io {
        path: path.to_path_buf(),
        source,
    };
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(entries),
        Err(source) => return Err(io_err(source)),
    };

    let mut offset = 0usize;
    let mut line_no = 0usize;
    while offset < bytes.len() {
        line_no += 1;
        let rest = &bytes[offset..];
        let (line, next, terminated) = match rest.iter().position(|b| *b == b'\n') {
            Some(pos) => (&rest[..pos], offset + pos + 1, true),
            None => (rest, bytes.len(), false),
        };
        if line.iter().all(u8::is_ascii_whitespace) {
            offset = next;
            continue;
        }
        match serde_json::from_slice::<EmbeddingRecord>(line) {
            Ok(record) => {
                entries.check_vector(&record.vector)?;
                entries.apply(record);
                if !terminated {
                    append_newline(path).map_err(io_err)?;
                }
            }
            Err(source) if next == bytes.len() => {
                warn!(
                    path = %path.display(),
                    line = line_no,
                    error = %source,
                    "dropping torn vector index entry"
                );
                truncate_log(path, offset as u64).map_err(io_err)?;
            }
            Err(source) => {
                return Err(IndexError::Corrupt {
                    path: path.to_path_buf(),
                    line: line_no,
                    source,
                })
            }
        }
        offset = next;
    }
    Ok(entries)
}

fn truncate_log(path: &Path, len: u64) -> std::io::Result<()> {
    OpenOptions::new().write(true).open(path)?.set_len(len)
}

fn append_newline(path: &Path) -> std::io::Result<()> {
    OpenOptions::new().append(true).open(path)?.write_all(b"\n")
}

fn l2_norm(vector: &[f32]) -> f32 {
    vector.iter().map(|v| v * v).sum::<f32>().sqrt()
}

fn cosine(a: &[f32], a_norm: f32, b: &[f32], b_norm: f32) -> f32 {
    if a_norm == 0.0 || b_norm == 0.0 {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    dot / (a_norm * b_norm)
}
