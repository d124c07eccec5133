//! Checkpoint store trait and implementations.
//!
//! A checkpoint is a single `DateTime<Utc>`. The durable encoding is one
//! line of RFC 3339 text with nanosecond precision and a numeric UTC
//! offset, e.g. `2026-08-30T12:00:00.123456789+00:00`. `save` followed by
//! `load` yields the same instant.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::{self, StateError};

/// Storage contract for the extraction checkpoint.
///
/// Implementations must be `Send + Sync` for use behind
/// `Arc<dyn CheckpointStore>`.
pub trait CheckpointStore: Send + Sync {
    /// Read the persisted checkpoint.
    ///
    /// Returns the Unix epoch when no checkpoint has been persisted yet,
    /// which makes the next run a full-history run.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Format`] when prior state exists but does not
    /// parse, or [`StateError::Io`] on storage failure.
    fn load(&self) -> error::Result<DateTime<Utc>>;

    /// Persist the checkpoint.
    ///
    /// A `ts` equal to the Unix epoch is a no-op: nothing was ever read,
    /// so nothing is persisted.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Io`] on storage failure.
    fn save(&self, ts: DateTime<Utc>) -> error::Result<()>;
}

/// Encode a checkpoint for durable storage.
fn encode(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, false)
}

/// Decode stored checkpoint content, tolerating surrounding whitespace.
fn decode(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw.trim()).map(|ts| ts.with_timezone(&Utc))
}

/// File-backed checkpoint storage: one RFC 3339 line of plain text.
pub struct FileCheckpointStore {
    path: PathBuf,
}

impl FileCheckpointStore {
    /// Create a store backed by the file at `path`. The file is only
    /// created on the first non-epoch `save`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn load(&self) -> error::Result<DateTime<Utc>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(
                    path = %self.path.display(),
                    "No checkpoint file, starting from the epoch"
                );
                return Ok(DateTime::<Utc>::UNIX_EPOCH);
            }
            Err(err) => return Err(StateError::Io(err)),
        };
        decode(&content).map_err(|source| StateError::Format {
            path: self.path.clone(),
            source,
        })
    }

    fn save(&self, ts: DateTime<Utc>) -> error::Result<()> {
        if ts == DateTime::<Utc>::UNIX_EPOCH {
            tracing::debug!(
                path = %self.path.display(),
                "Checkpoint still at the epoch, skipping save"
            );
            return Ok(());
        }
        let encoded = encode(ts);
        std::fs::write(&self.path, &encoded)?;
        tracing::info!(path = %self.path.display(), checkpoint = %encoded, "Saved checkpoint");
        Ok(())
    }
}

/// In-memory checkpoint storage (for testing).
#[derive(Default)]
pub struct MemoryCheckpointStore {
    slot: Mutex<Option<DateTime<Utc>>>,
}

impl MemoryCheckpointStore {
    /// Create an empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The currently stored checkpoint, if any save has happened.
    pub fn current(&self) -> Option<DateTime<Utc>> {
        self.slot.lock().map(|slot| *slot).unwrap_or(None)
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn load(&self) -> error::Result<DateTime<Utc>> {
        Ok(self.current().unwrap_or(DateTime::<Utc>::UNIX_EPOCH))
    }

    fn save(&self, ts: DateTime<Utc>) -> error::Result<()> {
        if ts == DateTime::<Utc>::UNIX_EPOCH {
            return Ok(());
        }
        if let Ok(mut slot) = self.slot.lock() {
            *slot = Some(ts);
        }
        Ok(())
    }
}
