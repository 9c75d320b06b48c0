//! LMDB-backed cache backend.
//!
//! Uses the heed crate (Rust bindings for LMDB) to provide a persistent,
//! memory-mapped key-value store behind the decorator.
//!
//! # Value Format
//!
//! Each stored value is one tag byte followed by the payload:
//! - `0x00` + JSON text of the raw value
//! - `0x01` + the marshalled bytes, verbatim
//!
//! # Thread Safety
//!
//! LMDB provides ACID transactions. The backend uses:
//! - Read transactions for `read` and `read_multi` (one transaction per batch)
//! - Write transactions for `write`, `delete`, and `clear`
//! - Statistics are tracked under a lock

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use cacher_core::{BackendError, CacherError, CacherResult, DeserializationError};
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use tracing::{debug, trace};

use super::traits::{BackendOptions, CacheBackend, CacheStats, Envelope};

const RAW_TAG: u8 = 0x00;
const MARSHALLED_TAG: u8 = 0x01;

/// Failure inside the LMDB backend.
#[derive(Debug, thiserror::Error)]
pub enum LmdbCacheError {
    /// The store directory could not be created.
    #[error("cannot create store directory: {0}")]
    Io(#[from] std::io::Error),

    /// The environment or its database could not be opened.
    #[error("cannot open LMDB store at {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: heed::Error,
    },

    /// An LMDB call failed inside a transaction.
    #[error("LMDB {op} failed: {source}")]
    Txn {
        op: &'static str,
        #[source]
        source: heed::Error,
    },

    /// A raw value could not be written as JSON.
    #[error("raw value is not encodable: {0}")]
    Encode(#[source] serde_json::Error),

    /// A stored record does not follow the tag byte framing.
    #[error("corrupt record: {0}")]
    CorruptRecord(String),
}

impl From<LmdbCacheError> for CacherError {
    fn from(e: LmdbCacheError) -> Self {
        match e {
            LmdbCacheError::Encode(err) => CacherError::Serialization {
                reason: err.to_string(),
            },
            LmdbCacheError::CorruptRecord(reason) => {
                DeserializationError::Malformed { reason }.into()
            }
            LmdbCacheError::Io(_) | LmdbCacheError::Open { .. } => BackendError::Io {
                reason: e.to_string(),
            }
            .into(),
            LmdbCacheError::Txn { .. } => BackendError::TransactionFailed {
                reason: e.to_string(),
            }
            .into(),
        }
    }
}

fn txn(op: &'static str) -> impl FnOnce(heed::Error) -> LmdbCacheError {
    move |source| LmdbCacheError::Txn { op, source }
}

/// LMDB-backed cache backend.
///
/// # Example
///
/// ```ignore
/// use cacher_storage::{Cacher, Defaults, LmdbCacheBackend};
/// use std::sync::Arc;
///
/// let backend = LmdbCacheBackend::new("/tmp/cache", 100)?;
/// let defaults = Defaults::new();
/// defaults.set_backend(Arc::new(backend)).set_enabled(true);
///
/// let cacher = Cacher::with_defaults(defaults);
/// ```
pub struct LmdbCacheBackend {
    /// The LMDB environment.
    env: Env,
    /// The main database (single unnamed database).
    db: Database<Bytes, Bytes>,
    /// Usage statistics.
    stats: RwLock<CacheStats>,
}

impl LmdbCacheBackend {
    /// Open (or create) the store in `path`, capped at `max_size_mb`.
    ///
    /// Entries written by an earlier process are kept and counted.
    pub fn new<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbCacheError> {
        let path = path.as_ref();
        std::fs::create_dir_all(path)?;
        let opening = |source| LmdbCacheError::Open {
            path: path.to_path_buf(),
            source,
        };

        // SAFETY: heed requires one open environment per directory per
        // process. Callers hold one backend per store.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb.saturating_mul(1024 * 1024))
                .max_dbs(1)
                .open(path)
        }
        .map_err(opening)?;

        let mut wtxn = env.write_txn().map_err(opening)?;
        let db: Database<Bytes, Bytes> = env.create_database(&mut wtxn, None).map_err(opening)?;
        let entry_count = db.len(&wtxn).map_err(opening)?;
        wtxn.commit().map_err(opening)?;

        debug!(path = %path.display(), entry_count, "Opened LMDB cache store");
        Ok(Self {
            env,
            db,
            stats: RwLock::new(CacheStats {
                entry_count,
                ..CacheStats::default()
            }),
        })
    }

    fn record_read(&self, hit: bool) {
        if let Ok(mut stats) = self.stats.write() {
            if hit {
                stats.hits += 1;
            } else {
                stats.misses += 1;
            }
        }
    }

    /// Remove one entry. Returns true if it existed.
    pub fn delete(&self, key: &str) -> CacherResult<bool> {
        let mut wtxn = self.env.write_txn().map_err(txn("begin write"))?;
        let deleted = self
            .db
            .delete(&mut wtxn, key.as_bytes())
            .map_err(txn("delete"))?;
        wtxn.commit().map_err(txn("commit"))?;

        if deleted {
            if let Ok(mut stats) = self.stats.write() {
                stats.entry_count = stats.entry_count.saturating_sub(1);
            }
        }

        Ok(deleted)
    }

    /// Remove every entry. Returns how many were removed.
    pub fn clear(&self) -> CacherResult<u64> {
        let mut wtxn = self.env.write_txn().map_err(txn("begin write"))?;
        let removed = self.db.len(&wtxn).map_err(txn("count"))?;
        self.db.clear(&mut wtxn).map_err(txn("clear"))?;
        wtxn.commit().map_err(txn("commit"))?;

        if let Ok(mut stats) = self.stats.write() {
            stats.entry_count = 0;
        }

        Ok(removed)
    }

    /// Usage statistics.
    pub fn stats(&self) -> CacheStats {
        self.stats
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

fn encode_envelope(envelope: &Envelope) -> Result<Vec<u8>, LmdbCacheError> {
    match envelope {
        Envelope::Raw(value) => {
            let json = serde_json::to_vec(value).map_err(LmdbCacheError::Encode)?;
            let mut bytes = Vec::with_capacity(1 + json.len());
            bytes.push(RAW_TAG);
            bytes.extend_from_slice(&json);
            Ok(bytes)
        }
        Envelope::Marshalled(payload) => {
            let mut bytes = Vec::with_capacity(1 + payload.len());
            bytes.push(MARSHALLED_TAG);
            bytes.extend_from_slice(payload);
            Ok(bytes)
        }
    }
}

fn decode_envelope(bytes: &[u8]) -> Result<Envelope, LmdbCacheError> {
    match bytes.split_first() {
        Some((&RAW_TAG, json)) => serde_json::from_slice(json)
            .map(Envelope::Raw)
            .map_err(|e| LmdbCacheError::CorruptRecord(e.to_string())),
        Some((&MARSHALLED_TAG, payload)) => Ok(Envelope::Marshalled(payload.to_vec())),
        Some((tag, _)) => Err(LmdbCacheError::CorruptRecord(format!(
            "unknown value tag {:#04x}",
            tag
        ))),
        None => Err(LmdbCacheError::CorruptRecord("empty record".to_string())),
    }
}

impl CacheBackend for LmdbCacheBackend {
    fn read(&self, key: &str) -> CacherResult<Option<Envelope>> {
        let rtxn = self.env.read_txn().map_err(txn("begin read"))?;
        let stored = self.db.get(&rtxn, key.as_bytes()).map_err(txn("get"))?;

        self.record_read(stored.is_some());
        match stored {
            Some(bytes) => Ok(Some(decode_envelope(bytes)?)),
            None => Ok(None),
        }
    }

    fn write(&self, key: &str, value: Envelope, options: &BackendOptions) -> CacherResult<()> {
        if !options.is_empty() {
            trace!(key, ignored = options.len(), "LMDB backend ignores write options");
        }

        let bytes = encode_envelope(&value)?;

        let mut wtxn = self.env.write_txn().map_err(txn("begin write"))?;
        let is_new = self
            .db
            .get(&wtxn, key.as_bytes())
            .map_err(txn("get"))?
            .is_none();
        self.db
            .put(&mut wtxn, key.as_bytes(), &bytes)
            .map_err(txn("put"))?;
        wtxn.commit().map_err(txn("commit"))?;

        if let Ok(mut stats) = self.stats.write() {
            stats.writes += 1;
            if is_new {
                stats.entry_count += 1;
            }
        }

        Ok(())
    }

    fn read_multi(&self, keys: &[String]) -> CacherResult<HashMap<String, Envelope>> {
        let rtxn = self.env.read_txn().map_err(txn("begin read"))?;

        let mut found = HashMap::with_capacity(keys.len());
        for key in keys {
            let stored = self.db.get(&rtxn, key.as_bytes()).map_err(txn("get"))?;
            self.record_read(stored.is_some());
            if let Some(bytes) = stored {
                found.insert(key.clone(), decode_envelope(bytes)?);
            }
        }

        Ok(found)
    }
}
