//! Cacher Test Utilities
//!
//! Shared test infrastructure for the cacher workspace:
//! - A recording backend that exposes what the decorator sent it
//! - Proptest generators for keys, namespaces, and values
//! - Fixtures for common decorator setups
//! - Custom assertions for cacher error variants

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub use cacher_core::{
    BackendError, CacherError, CacherOptions, CacherResult, ConfigError, DeserializationError,
    Namespace, Settings,
};
pub use cacher_storage::{
    BackendOptions, CacheBackend, CacheConfig, Cacher, CallOptions, Defaults, Envelope,
    MemoryCacheBackend, TypeRegistry,
};

// ============================================================================
// RECORDING BACKEND
// ============================================================================

#[derive(Debug, Default)]
struct Recorded {
    entries: HashMap<String, Envelope>,
    last_accessed_key: Option<String>,
    last_write_options: Option<BackendOptions>,
    last_batch: Vec<String>,
}

/// In-memory backend that records the keys and options it receives.
///
/// Optionally enforces a maximum key length, failing reads and writes of
/// longer keys with [`BackendError::KeyTooLong`] the way length-limited
/// stores do.
#[derive(Debug, Default)]
pub struct RecordingBackend {
    recorded: Mutex<Recorded>,
    max_key_length: Option<usize>,
    reads: AtomicUsize,
    writes: AtomicUsize,
    batch_reads: AtomicUsize,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject keys longer than `max` bytes.
    pub fn with_max_key_length(max: usize) -> Self {
        Self {
            max_key_length: Some(max),
            ..Self::default()
        }
    }

    fn recorded(&self) -> CacherResult<std::sync::MutexGuard<'_, Recorded>> {
        self.recorded
            .lock()
            .map_err(|_| BackendError::LockPoisoned.into())
    }

    fn check_key(&self, key: &str) -> CacherResult<()> {
        match self.max_key_length {
            Some(max) if key.len() > max => Err(BackendError::KeyTooLong {
                key: key.to_string(),
                len: key.len(),
                max,
            }
            .into()),
            _ => Ok(()),
        }
    }

    /// The key of the most recent single-key read or write.
    pub fn last_accessed_key(&self) -> Option<String> {
        self.recorded().ok()?.last_accessed_key.clone()
    }

    /// Options passed to the most recent write.
    pub fn last_write_options(&self) -> Option<BackendOptions> {
        self.recorded().ok()?.last_write_options.clone()
    }

    /// Keys passed to the most recent batch read.
    pub fn last_batch(&self) -> Vec<String> {
        self.recorded()
            .map(|recorded| recorded.last_batch.clone())
            .unwrap_or_default()
    }

    /// Stored keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .recorded()
            .map(|recorded| recorded.entries.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    /// The stored envelope for a physical key, bypassing the recording.
    pub fn raw(&self, key: &str) -> Option<Envelope> {
        self.recorded().ok()?.entries.get(key).cloned()
    }

    /// Store an envelope directly, bypassing the recording.
    pub fn insert_raw(&self, key: impl Into<String>, envelope: Envelope) {
        if let Ok(mut recorded) = self.recorded() {
            recorded.entries.insert(key.into(), envelope);
        }
    }

    /// Number of single-key reads.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of writes.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of batch reads.
    pub fn batch_reads(&self) -> usize {
        self.batch_reads.load(Ordering::SeqCst)
    }

    /// Total number of backend calls of any kind.
    pub fn calls(&self) -> usize {
        self.reads() + self.writes() + self.batch_reads()
    }
}

impl CacheBackend for RecordingBackend {
    fn read(&self, key: &str) -> CacherResult<Option<Envelope>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let mut recorded = self.recorded()?;
        recorded.last_accessed_key = Some(key.to_string());
        self.check_key(key)?;
        Ok(recorded.entries.get(key).cloned())
    }

    fn write(&self, key: &str, value: Envelope, options: &BackendOptions) -> CacherResult<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut recorded = self.recorded()?;
        recorded.last_accessed_key = Some(key.to_string());
        recorded.last_write_options = Some(options.clone());
        self.check_key(key)?;
        recorded.entries.insert(key.to_string(), value);
        Ok(())
    }

    fn read_multi(&self, keys: &[String]) -> CacherResult<HashMap<String, Envelope>> {
        self.batch_reads.fetch_add(1, Ordering::SeqCst);
        let mut recorded = self.recorded()?;
        recorded.last_batch = keys.to_vec();
        for key in keys {
            self.check_key(key)?;
        }
        Ok(keys
            .iter()
            .filter_map(|key| {
                recorded
                    .entries
                    .get(key)
                    .map(|envelope| (key.clone(), envelope.clone()))
            })
            .collect())
    }
}

// ============================================================================
// CALL COUNTING
// ============================================================================

/// Shared counter for asserting how often a producer ran.
#[derive(Debug, Clone, Default)]
pub struct CallCounter(Arc<AtomicUsize>);

impl CallCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one call and return the new count.
    pub fn hit(&self) -> usize {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

// ============================================================================
// LOGGING
// ============================================================================

/// Install a test subscriber honoring `RUST_LOG`. Safe to call repeatedly.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for cacher inputs.

    use super::*;
    use cacher_storage::cache::{is_tagged, TYPE_TAG_FIELD, TYPE_VALUE_FIELD};
    use proptest::prelude::*;
    use serde_json::Value;

    /// Printable logical keys, from short to well past the default limit.
    pub fn arb_logical_key() -> impl Strategy<Value = String> {
        prop_oneof![
            3 => "[a-zA-Z0-9_:./-]{1,40}",
            1 => "[ -~]{200,600}",
        ]
    }

    /// Disabled or a short named namespace.
    pub fn arb_namespace() -> impl Strategy<Value = Namespace> {
        prop_oneof![
            Just(Namespace::Disabled),
            "[a-z][a-z0-9_]{0,11}".prop_map(Namespace::named),
        ]
    }

    /// Maximum key sizes small enough to force hashing of some keys.
    pub fn arb_max_key_size() -> impl Strategy<Value = usize> {
        prop_oneof![Just(cacher_core::DEFAULT_MAX_KEY_SIZE), 1usize..120]
    }

    /// JSON values without floats or type tags.
    ///
    /// Object keys include `$type` and `$value`, but an object with exactly
    /// the tagged shape is never generated.
    pub fn arb_json_value() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::from),
            "[a-zA-Z0-9 ]{0,16}".prop_map(Value::String),
        ];

        leaf.prop_recursive(3, 32, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::btree_map(arb_object_key(), inner, 0..4)
                    .prop_map(|map| Value::Object(map.into_iter().collect()))
                    .prop_filter("tagged shape is reserved", |value| !is_tagged(value)),
            ]
        })
    }

    fn arb_object_key() -> impl Strategy<Value = String> {
        prop_oneof![
            4 => "[a-z]{1,6}",
            1 => "\\$[a-z]{1,6}",
            1 => Just(TYPE_TAG_FIELD.to_string()),
            1 => Just(TYPE_VALUE_FIELD.to_string()),
        ]
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built decorators for common test scenarios.

    use super::*;

    /// Fresh defaults with a recording backend and caching enabled.
    pub fn enabled_defaults() -> (Defaults, Arc<RecordingBackend>) {
        let backend = Arc::new(RecordingBackend::new());
        let defaults = Defaults::new();
        defaults.set_backend(backend.clone()).set_enabled(true);
        (defaults, backend)
    }

    /// A cacher over [`enabled_defaults`].
    pub fn enabled_cacher() -> (Cacher, Arc<RecordingBackend>) {
        let (defaults, backend) = enabled_defaults();
        (Cacher::with_defaults(defaults), backend)
    }

    /// A cacher over [`enabled_defaults`] in marshalled mode.
    pub fn marshalling_cacher() -> (Cacher, Arc<RecordingBackend>) {
        let (defaults, backend) = enabled_defaults();
        defaults.set_serialize(true);
        (Cacher::with_defaults(defaults), backend)
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertion helpers for cacher error variants.

    use super::*;

    /// Assert that a result is a Config error.
    #[track_caller]
    pub fn assert_config_error<T: std::fmt::Debug>(result: &CacherResult<T>) {
        match result {
            Err(CacherError::Config(_)) => {}
            other => panic!("Expected Config error, got: {:?}", other),
        }
    }

    /// Assert that a result is a Deserialization error.
    #[track_caller]
    pub fn assert_deserialization_error<T: std::fmt::Debug>(result: &CacherResult<T>) {
        match result {
            Err(CacherError::Deserialization(_)) => {}
            other => panic!("Expected Deserialization error, got: {:?}", other),
        }
    }

    /// Assert that a result failed on an unresolved type tag.
    #[track_caller]
    pub fn assert_unresolved_type<T: std::fmt::Debug>(result: &CacherResult<T>, type_name: &str) {
        match result {
            Err(CacherError::Deserialization(DeserializationError::UnresolvedType {
                type_name: found,
            })) => assert_eq!(found, type_name, "Wrong unresolved type name"),
            other => panic!("Expected UnresolvedType({}), got: {:?}", type_name, other),
        }
    }

    /// Assert that a physical key is a namespaced or bare hashed key.
    #[track_caller]
    pub fn assert_hashed_key(key: &str) {
        let digest = key
            .rsplit_once(cacher_core::HASHED_KEY_PREFIX)
            .map(|(_, digest)| digest.trim_end_matches(cacher_core::MARSHAL_SUFFIX))
            .unwrap_or_else(|| panic!("Expected hashed key, got: {}", key));
        assert_eq!(digest.len(), 40, "Wrong digest length in {}", key);
        assert!(
            digest.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()),
            "Digest is not lowercase hex in {}",
            key
        );
    }
}
