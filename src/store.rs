//! Content-addressed storage of signature records.
//!
//! Records are keyed by [`DocumentHash`]; each hash maps to at most one
//! record. A `put` for a hash that already has a record replaces it (last
//! write wins) and the replaced record's id stops resolving.

use crate::error::{Result, SignError};
use crate::hash::DocumentHash;
use crate::signature::SignatureRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// Aggregate figures about a store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub total_records: usize,
    pub latest_signature_at: Option<DateTime<Utc>>,
}

/// Repository of signature records.
pub trait SignatureStore: Send + Sync {
    /// Insert a record under its document hash, returning any record it replaced.
    fn put(&self, record: SignatureRecord) -> Result<Option<SignatureRecord>>;

    /// Insert a record only if its document hash has none yet.
    ///
    /// The check and the insert happen under one lock, so of two concurrent
    /// calls for the same hash exactly one fails with `AlreadySigned`.
    fn put_if_absent(&self, record: SignatureRecord) -> Result<()>;

    /// Look up the record for a document hash.
    fn get_by_hash(&self, hash: &DocumentHash) -> Result<Option<SignatureRecord>>;

    /// Look up a record by id.
    fn get(&self, id: &str) -> Result<Option<SignatureRecord>>;

    /// All records, newest first.
    fn list(&self) -> Result<Vec<SignatureRecord>>;

    /// Permanently remove a record by id, returning it if it existed.
    fn delete(&self, id: &str) -> Result<Option<SignatureRecord>>;

    /// Record count and newest creation time.
    fn stats(&self) -> Result<StoreStats> {
        let records = self.list()?;
        Ok(StoreStats {
            total_records: records.len(),
            latest_signature_at: records.first().map(|r| r.created_at),
        })
    }
}

/// Hash-keyed records plus an id index.
#[derive(Debug, Default)]
struct RecordIndex {
    by_hash: HashMap<DocumentHash, SignatureRecord>,
    ids: HashMap<String, DocumentHash>,
}

impl RecordIndex {
    fn from_records(records: Vec<SignatureRecord>) -> Self {
        let mut index = Self::default();
        for record in records {
            index.insert(record);
        }
        index
    }

    fn insert(&mut self, record: SignatureRecord) -> Option<SignatureRecord> {
        let replaced = self.by_hash.remove(&record.document_hash);
        if let Some(old) = &replaced {
            self.ids.remove(&old.id);
        }
        self.ids.insert(record.id.clone(), record.document_hash);
        self.by_hash.insert(record.document_hash, record);
        replaced
    }

    fn ensure_absent(&self, hash: &DocumentHash) -> Result<()> {
        if self.by_hash.contains_key(hash) {
            return Err(SignError::AlreadySigned(hash.to_hex()));
        }
        Ok(())
    }

    fn get(&self, id: &str) -> Option<&SignatureRecord> {
        self.ids.get(id).and_then(|hash| self.by_hash.get(hash))
    }

    fn remove(&mut self, id: &str) -> Option<SignatureRecord> {
        let hash = self.ids.remove(id)?;
        self.by_hash.remove(&hash)
    }

    fn sorted(&self) -> Vec<SignatureRecord> {
        let mut records: Vec<SignatureRecord> = self.by_hash.values().cloned().collect();
        records.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        records
    }
}

/// In-memory signature store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<RecordIndex>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl SignatureStore for MemoryStore {
    fn put(&self, record: SignatureRecord) -> Result<Option<SignatureRecord>> {
        Ok(self.records.write()?.insert(record))
    }

    fn put_if_absent(&self, record: SignatureRecord) -> Result<()> {
        let mut index = self.records.write()?;
        index.ensure_absent(&record.document_hash)?;
        index.insert(record);
        Ok(())
    }

    fn get_by_hash(&self, hash: &DocumentHash) -> Result<Option<SignatureRecord>> {
        Ok(self.records.read()?.by_hash.get(hash).cloned())
    }

    fn get(&self, id: &str) -> Result<Option<SignatureRecord>> {
        Ok(self.records.read()?.get(id).cloned())
    }

    fn list(&self) -> Result<Vec<SignatureRecord>> {
        Ok(self.records.read()?.sorted())
    }

    fn delete(&self, id: &str) -> Result<Option<SignatureRecord>> {
        Ok(self.records.write()?.remove(id))
    }
}

/// Signature store persisted as a single JSON file.
///
/// Every mutation rewrites the file through a temporary sibling and a
/// rename. Persistence failures surface as [`SignError::StoreUnavailable`]
/// and leave the in-memory state unchanged.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    records: RwLock<RecordIndex>,
}

impl JsonFileStore {
    /// Open (or create on first write) a store at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let records = if path.exists() {
            let content = fs::read_to_string(&path).map_err(|e| unavailable(&path, e))?;
            let records: Vec<SignatureRecord> = serde_json::from_str(&content)
                .map_err(|e| unavailable(&path, e))?;
            log::info!("Loaded {} signature records from {}", records.len(), path.display());
            records
        } else {
            Vec::new()
        };

        Ok(Self {
            path,
            records: RwLock::new(RecordIndex::from_records(records)),
        })
    }

    /// Location of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, index: &RecordIndex) -> Result<()> {
        let json = serde_json::to_string_pretty(&index.sorted())?;
        let tmp = self.path.with_extension("json.tmp");
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| unavailable(&self.path, e))?;
            }
        }
        fs::write(&tmp, json).map_err(|e| unavailable(&tmp, e))?;
        fs::rename(&tmp, &self.path).map_err(|e| unavailable(&self.path, e))?;
        Ok(())
    }
}

fn unavailable(path: &Path, err: impl std::fmt::Display) -> SignError {
    SignError::StoreUnavailable(format!("{}: {}", path.display(), err))
}

impl SignatureStore for JsonFileStore {
    fn put(&self, record: SignatureRecord) -> Result<Option<SignatureRecord>> {
        let mut index = self.records.write()?;
        let id = record.id.clone();
        let replaced = index.insert(record);

        if let Err(e) = self.persist(&index) {
            index.remove(&id);
            if let Some(old) = replaced {
                index.insert(old);
            }
            return Err(e);
        }
        Ok(replaced)
    }

    fn put_if_absent(&self, record: SignatureRecord) -> Result<()> {
        let mut index = self.records.write()?;
        index.ensure_absent(&record.document_hash)?;
        let id = record.id.clone();
        index.insert(record);

        if let Err(e) = self.persist(&index) {
            index.remove(&id);
            return Err(e);
        }
        Ok(())
    }

    fn get_by_hash(&self, hash: &DocumentHash) -> Result<Option<SignatureRecord>> {
        Ok(self.records.read()?.by_hash.get(hash).cloned())
    }

    fn get(&self, id: &str) -> Result<Option<SignatureRecord>> {
        Ok(self.records.read()?.get(id).cloned())
    }

    fn list(&self) -> Result<Vec<SignatureRecord>> {
        Ok(self.records.read()?.sorted())
    }

    fn delete(&self, id: &str) -> Result<Option<SignatureRecord>> {
        let mut index = self.records.write()?;
        let removed = match index.remove(id) {
            Some(record) => record,
            None => return Ok(None),
        };

        if let Err(e) = self.persist(&index) {
            index.insert(removed);
            return Err(e);
        }
        Ok(Some(removed))
    }
}
