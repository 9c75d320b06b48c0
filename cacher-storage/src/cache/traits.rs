//! Cache backend trait and the stored envelope type.
//!
//! This module defines the single capability a storage backend must provide
//! and the shape of what the decorator hands to it.

use std::collections::HashMap;

use cacher_core::CacherResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Opaque options forwarded verbatim to [`CacheBackend::write`].
///
/// The decorator never interprets these; a backend may honor keys such as
/// `expires_in` and ignore the rest.
pub type BackendOptions = serde_json::Map<String, Value>;

/// What is physically stored under a prepared key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Envelope {
    /// The value itself, stored when serialization is off. A stored nil is
    /// represented by the nil sentinel string.
    Raw(Value),
    /// The value run through the structured codec, stored when serialization
    /// is on.
    Marshalled(Vec<u8>),
}

impl Envelope {
    /// Short name of the envelope variant, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Raw(_) => "raw",
            Self::Marshalled(_) => "marshalled",
        }
    }

    /// Approximate payload size in bytes.
    pub fn size_hint(&self) -> usize {
        match self {
            Self::Raw(value) => value.to_string().len(),
            Self::Marshalled(bytes) => bytes.len(),
        }
    }
}

/// Cache backend trait for pluggable storage implementations.
///
/// This trait abstracts over different stores (in-memory, LMDB, a remote
/// cache). Implementations must be thread-safe; the decorator calls them
/// from whatever thread the caller is on and adds no locking of its own.
///
/// # Key Format
///
/// Keys arrive already prepared (namespaced, tagged, hashed when overlong).
/// Backends store them verbatim.
pub trait CacheBackend: Send + Sync {
    /// Read a single key. Returns `None` when the key is absent.
    fn read(&self, key: &str) -> CacherResult<Option<Envelope>>;

    /// Write a single key, overwriting any previous value.
    fn write(&self, key: &str, value: Envelope, options: &BackendOptions) -> CacherResult<()>;

    /// Read several keys at once.
    ///
    /// The returned map contains only the keys that are present. The default
    /// implementation issues one [`read`](Self::read) per key, which adapts
    /// stores without a native batch read.
    fn read_multi(&self, keys: &[String]) -> CacherResult<HashMap<String, Envelope>> {
        let mut found = HashMap::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = self.read(key)? {
                found.insert(key.clone(), value);
            }
        }
        Ok(found)
    }
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of reads that found a value.
    pub hits: u64,
    /// Number of reads that found nothing.
    pub misses: u64,
    /// Number of writes.
    pub writes: u64,
    /// Number of entries currently stored.
    pub entry_count: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::RwLock;

    #[derive(Default)]
    struct SingleKeyBackend {
        storage: RwLock<HashMap<String, Envelope>>,
    }

    impl CacheBackend for SingleKeyBackend {
        fn read(&self, key: &str) -> CacherResult<Option<Envelope>> {
            Ok(self.storage.read().unwrap().get(key).cloned())
        }

        fn write(&self, key: &str, value: Envelope, _options: &BackendOptions) -> CacherResult<()> {
            self.storage.write().unwrap().insert(key.to_string(), value);
            Ok(())
        }
    }

    #[test]
    fn test_cache_stats_hit_rate() {
        let stats = CacheStats {
            hits: 80,
            misses: 20,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.8).abs() < 0.001);

        let empty_stats = CacheStats::default();
        assert!((empty_stats.hit_rate() - 0.0).abs() < 0.001);
    }

    #[test]
    fn test_default_read_multi_returns_present_keys_only() {
        let backend = SingleKeyBackend::default();
        backend
            .write("b", Envelope::Raw(Value::from(2)), &BackendOptions::new())
            .unwrap();

        let keys = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let found = backend.read_multi(&keys).unwrap();

        assert_eq!(found.len(), 1);
        assert_eq!(found.get("b"), Some(&Envelope::Raw(Value::from(2))));
    }

    #[test]
    fn test_envelope_kind() {
        assert_eq!(Envelope::Raw(Value::Null).kind(), "raw");
        assert_eq!(Envelope::Marshalled(vec![1, 2]).kind(), "marshalled");
        assert_eq!(Envelope::Marshalled(vec![1, 2]).size_hint(), 2);
    }
}
