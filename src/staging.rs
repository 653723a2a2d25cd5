//! Transient storage for documents between `prepare` and `embed`.
//!
//! Every staged document lives under an opaque [`Handle`] for at most the
//! configured time-to-live. Expired entries are dropped by
//! [`StagingArea::evict_expired`] and are invisible to [`StagingArea::load`].

use crate::error::{Result, SignError};
use crate::hash::DocumentHash;
use crate::signature::SignerMetadata;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use uuid::Uuid;

/// Opaque reference to a staged document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Handle(String);

impl Handle {
    /// Generate a fresh random handle.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// The handle as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Handle {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Handle {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A document waiting for its signature.
#[derive(Debug, Clone)]
pub struct StagedDocument {
    /// The exact bytes handed to `prepare`.
    pub bytes: Vec<u8>,

    /// Hash computed over `bytes` at prepare time.
    pub hash: DocumentHash,

    /// Original filename.
    pub filename: String,

    /// Metadata supplied with `prepare`, if any.
    pub metadata: Option<SignerMetadata>,

    /// When the document was staged.
    pub staged_at: DateTime<Utc>,
}

/// Short-lived, single-use storage keyed by [`Handle`].
pub trait StagingArea: Send + Sync {
    /// Store a document and return its handle.
    fn stage(&self, document: StagedDocument) -> Result<Handle>;

    /// Fetch a staged document. Unknown or expired handles are `NotFound`.
    fn load(&self, handle: &Handle, now: DateTime<Utc>) -> Result<StagedDocument>;

    /// Remove a staged document and hand it to the caller in one step.
    ///
    /// Of two concurrent calls for the same handle at most one succeeds.
    /// Unknown or expired handles are `NotFound`.
    fn take(&self, handle: &Handle, now: DateTime<Utc>) -> Result<StagedDocument>;

    /// Put a document obtained from [`StagingArea::take`] back under its handle.
    fn restore(&self, handle: &Handle, document: StagedDocument) -> Result<()>;

    /// Remove a staged document. Returns whether it existed.
    fn discard(&self, handle: &Handle) -> Result<bool>;

    /// Remove every entry older than the TTL. Returns how many were dropped.
    fn evict_expired(&self, now: DateTime<Utc>) -> Result<usize>;

    /// Number of staged documents, expired ones included.
    fn len(&self) -> Result<usize>;

    /// True if nothing is staged.
    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

fn is_expired(staged_at: DateTime<Utc>, ttl: Duration, now: DateTime<Utc>) -> bool {
    now - staged_at >= ttl
}

fn unknown_handle(handle: &Handle) -> SignError {
    SignError::NotFound(format!("staged document '{}'", handle))
}

/// In-memory staging area.
#[derive(Debug)]
pub struct MemoryStaging {
    ttl: Duration,
    entries: Mutex<HashMap<Handle, StagedDocument>>,
}

impl MemoryStaging {
    /// Create an empty staging area with the given TTL.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// The configured time-to-live.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

impl StagingArea for MemoryStaging {
    fn stage(&self, document: StagedDocument) -> Result<Handle> {
        let handle = Handle::generate();
        self.entries.lock()?.insert(handle.clone(), document);
        Ok(handle)
    }

    fn load(&self, handle: &Handle, now: DateTime<Utc>) -> Result<StagedDocument> {
        let mut entries = self.entries.lock()?;
        let doc = entries.get(handle).ok_or_else(|| unknown_handle(handle))?;
        if !is_expired(doc.staged_at, self.ttl, now) {
            return Ok(doc.clone());
        }
        entries.remove(handle);
        log::debug!("Staged document {} expired", handle);
        Err(unknown_handle(handle))
    }

    fn take(&self, handle: &Handle, now: DateTime<Utc>) -> Result<StagedDocument> {
        let doc = self
            .entries
            .lock()?
            .remove(handle)
            .ok_or_else(|| unknown_handle(handle))?;
        if is_expired(doc.staged_at, self.ttl, now) {
            log::debug!("Staged document {} expired", handle);
            return Err(unknown_handle(handle));
        }
        Ok(doc)
    }

    fn restore(&self, handle: &Handle, document: StagedDocument) -> Result<()> {
        self.entries.lock()?.insert(handle.clone(), document);
        Ok(())
    }

    fn discard(&self, handle: &Handle) -> Result<bool> {
        Ok(self.entries.lock()?.remove(handle).is_some())
    }

    fn evict_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut entries = self.entries.lock()?;
        let before = entries.len();
        let ttl = self.ttl;
        entries.retain(|_, doc| !is_expired(doc.staged_at, ttl, now));
        Ok(before - entries.len())
    }

    fn len(&self) -> Result<usize> {
        Ok(self.entries.lock()?.len())
    }
}

#[derive(Debug, Clone)]
struct DirEntry {
    path: PathBuf,
    hash: DocumentHash,
    filename: String,
    metadata: Option<SignerMetadata>,
    staged_at: DateTime<Utc>,
}

/// Staging area that keeps document bytes as files in a directory.
///
/// File names are derived from the handle only. The hash bound at prepare
/// time is kept in memory, so later changes to a file are detectable.
#[derive(Debug)]
pub struct DirStaging {
    dir: PathBuf,
    ttl: Duration,
    index: Mutex<HashMap<Handle, DirEntry>>,
}

impl DirStaging {
    /// Use `dir` (created if missing) for staged files.
    pub fn new<P: AsRef<Path>>(dir: P, ttl: Duration) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        let staging = Self {
            dir,
            ttl,
            index: Mutex::new(HashMap::new()),
        };

        let swept = staging.sweep_orphans(Utc::now())?;
        if swept > 0 {
            log::info!(
                "Removed {} stale staged files from {}",
                swept,
                staging.dir.display()
            );
        }
        Ok(staging)
    }

    /// Directory holding the staged files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file backing a handle, if it is staged.
    pub fn path_of(&self, handle: &Handle) -> Result<Option<PathBuf>> {
        Ok(self.index.lock()?.get(handle).map(|e| e.path.clone()))
    }

    fn path_for(&self, handle: &Handle) -> PathBuf {
        self.dir.join(format!("{}.pdf", handle))
    }

    /// Remove staged files no handle refers to once they are older than the TTL.
    ///
    /// A previous process may have staged documents that were never embedded;
    /// their hashes are lost with its index, so the files can only be dropped.
    fn sweep_orphans(&self, now: DateTime<Utc>) -> Result<usize> {
        let known: HashSet<PathBuf> = self
            .index
            .lock()?
            .values()
            .map(|e| e.path.clone())
            .collect();

        let mut removed = 0;
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().map_or(true, |ext| ext != "pdf") || known.contains(&path) {
                continue;
            }
            let modified: DateTime<Utc> = match fs::metadata(&path).and_then(|m| m.modified()) {
                Ok(time) => time.into(),
                Err(e) => {
                    log::warn!("Cannot read age of {}: {}", path.display(), e);
                    continue;
                }
            };
            if is_expired(modified, self.ttl, now) {
                Self::remove_file(&path);
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn remove_file(path: &Path) {
        if let Err(e) = fs::remove_file(path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::warn!("Failed to remove staged file {}: {}", path.display(), e);
            }
        }
    }
}

impl StagingArea for DirStaging {
    fn stage(&self, document: StagedDocument) -> Result<Handle> {
        let handle = Handle::generate();
        let path = self.path_for(&handle);
        fs::write(&path, &document.bytes)?;

        let entry = DirEntry {
            path,
            hash: document.hash,
            filename: document.filename,
            metadata: document.metadata,
            staged_at: document.staged_at,
        };
        self.index.lock()?.insert(handle.clone(), entry);
        Ok(handle)
    }

    fn load(&self, handle: &Handle, now: DateTime<Utc>) -> Result<StagedDocument> {
        let entry = {
            let mut index = self.index.lock()?;
            let entry = index.get(handle).cloned().ok_or_else(|| unknown_handle(handle))?;
            if is_expired(entry.staged_at, self.ttl, now) {
                index.remove(handle);
                Self::remove_file(&entry.path);
                log::debug!("Staged document {} expired", handle);
                return Err(unknown_handle(handle));
            }
            entry
        };

        let bytes = match fs::read(&entry.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(unknown_handle(handle))
            }
            Err(e) => return Err(e.into()),
        };

        Ok(StagedDocument {
            bytes,
            hash: entry.hash,
            filename: entry.filename,
            metadata: entry.metadata,
            staged_at: entry.staged_at,
        })
    }

    fn take(&self, handle: &Handle, now: DateTime<Utc>) -> Result<StagedDocument> {
        let entry = self
            .index
            .lock()?
            .remove(handle)
            .ok_or_else(|| unknown_handle(handle))?;
        if is_expired(entry.staged_at, self.ttl, now) {
            Self::remove_file(&entry.path);
            log::debug!("Staged document {} expired", handle);
            return Err(unknown_handle(handle));
        }

        let bytes = match fs::read(&entry.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(unknown_handle(handle))
            }
            Err(e) => {
                self.index.lock()?.insert(handle.clone(), entry);
                return Err(e.into());
            }
        };
        Self::remove_file(&entry.path);

        Ok(StagedDocument {
            bytes,
            hash: entry.hash,
            filename: entry.filename,
            metadata: entry.metadata,
            staged_at: entry.staged_at,
        })
    }

    fn restore(&self, handle: &Handle, document: StagedDocument) -> Result<()> {
        let path = self.path_for(handle);
        fs::write(&path, &document.bytes)?;
        let entry = DirEntry {
            path,
            hash: document.hash,
            filename: document.filename,
            metadata: document.metadata,
            staged_at: document.staged_at,
        };
        self.index.lock()?.insert(handle.clone(), entry);
        Ok(())
    }

    fn discard(&self, handle: &Handle) -> Result<bool> {
        let removed = self.index.lock()?.remove(handle);
        match removed {
            Some(entry) => {
                Self::remove_file(&entry.path);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn evict_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let expired: Vec<DirEntry> = {
            let mut index = self.index.lock()?;
            let handles: Vec<Handle> = index
                .iter()
                .filter(|(_, e)| is_expired(e.staged_at, self.ttl, now))
                .map(|(h, _)| h.clone())
                .collect();
            handles.iter().filter_map(|h| index.remove(h)).collect()
        };

        for entry in &expired {
            Self::remove_file(&entry.path);
        }
        Ok(expired.len() + self.sweep_orphans(now)?)
    }

    fn len(&self) -> Result<usize> {
        Ok(self.index.lock()?.len())
    }
}
