//! Read-through cache engine.
//!
//! This module implements the core caching logic: every call resolves one
//! snapshot of settings, then routes through the state machine
//!
//! - disabled: run the producer, touch nothing
//! - forced (`break_cache` or busting): produce and write
//! - normal: read; on a hit decode, on a miss produce and write
//!
//! Concurrent misses on the same key are not coalesced: two threads that
//! both miss will both produce and both write, and the last write wins.

use std::collections::HashMap;

use cacher_core::{CacherError, CacherOptions, CacherResult, DeserializationError, Settings};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, trace};

use super::bust::{self, BustGuard};
use super::codec::Codec;
use super::config::{CacheConfig, Defaults};
use super::key::{KeyPreparer, PhysicalKey};
use super::traits::{BackendOptions, CacheBackend};

/// Per-call options.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallOptions {
    /// Skip the read and overwrite the entry with a fresh value.
    pub break_cache: bool,
    /// Forwarded verbatim to the backend's write.
    pub backend: BackendOptions,
}

impl CallOptions {
    /// Create default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Options that force a write-through.
    pub fn forced() -> Self {
        Self {
            break_cache: true,
            ..Self::default()
        }
    }

    /// Set whether to force a write-through.
    pub fn with_break_cache(mut self, break_cache: bool) -> Self {
        self.break_cache = break_cache;
        self
    }

    /// Add a backend write option.
    pub fn with_backend_option(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.backend.insert(name.into(), value.into());
        self
    }
}

type ValueFn<'a, E> = Box<dyn FnOnce() -> Result<Value, E> + 'a>;
type BuilderFn<'a, E> = Box<dyn FnOnce(&mut Map<String, Value>) -> Result<(), E> + 'a>;

/// Computes the value to store on a miss or forced write.
pub enum Producer<'a, E> {
    /// Returns the value directly.
    Value(ValueFn<'a, E>),
    /// Fills a fresh, empty map; the filled map becomes the value.
    Builder(BuilderFn<'a, E>),
}

impl<'a, E> Producer<'a, E> {
    /// A producer that returns its value.
    pub fn value<F>(compute: F) -> Self
    where
        F: FnOnce() -> Result<Value, E> + 'a,
    {
        Self::Value(Box::new(compute))
    }

    /// A producer that builds its value into an accumulator map.
    pub fn builder<F>(build: F) -> Self
    where
        F: FnOnce(&mut Map<String, Value>) -> Result<(), E> + 'a,
    {
        Self::Builder(Box::new(build))
    }

    /// Run the producer.
    pub fn produce(self) -> Result<Value, E> {
        match self {
            Self::Value(compute) => compute(),
            Self::Builder(build) => {
                let mut accumulator = Map::new();
                build(&mut accumulator)?;
                Ok(Value::Object(accumulator))
            }
        }
    }
}

/// A caching decorator over a [`CacheBackend`].
///
/// Each `Cacher` owns one [`CacheConfig`] and therefore one identity for bust
/// flags. Share it between threads behind an `Arc`; configure it through
/// [`config_mut`](Self::config_mut) before sharing.
///
/// # Example
///
/// ```ignore
/// let mut cacher = Cacher::with_defaults(defaults);
/// cacher.config_mut().enable();
///
/// let value = cacher.get_with("user/42", &CallOptions::new(), || {
///     Ok::<_, CacherError>(load_user(42))
/// })?;
/// ```
#[derive(Debug)]
pub struct Cacher {
    config: CacheConfig,
}

impl Default for Cacher {
    fn default() -> Self {
        Self::new()
    }
}

impl Cacher {
    /// Create a cacher over the process-wide defaults.
    pub fn new() -> Self {
        Self::from_config(CacheConfig::default())
    }

    /// Create a cacher over the given defaults.
    pub fn with_defaults(defaults: Defaults) -> Self {
        Self::from_config(CacheConfig::new(defaults))
    }

    /// Create a cacher from a prepared config.
    pub fn from_config(config: CacheConfig) -> Self {
        Self { config }
    }

    /// Create a cacher from a configuration map.
    pub fn from_options(defaults: Defaults, options: &CacherOptions) -> CacherResult<Self> {
        Ok(Self::from_config(CacheConfig::from_options(defaults, options)?))
    }

    /// Run a configuration callback against this cacher's config.
    pub fn configure<F>(mut self, configure: F) -> CacherResult<Self>
    where
        F: FnOnce(&mut CacheConfig) -> CacherResult<()>,
    {
        configure(&mut self.config)?;
        Ok(self)
    }

    /// The configuration.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Mutable access to the configuration.
    pub fn config_mut(&mut self) -> &mut CacheConfig {
        &mut self.config
    }

    // ------------------------------------------------------------------
    // Bust control
    // ------------------------------------------------------------------

    /// Force write-through for this cacher on the current thread.
    ///
    /// The flag stays set until [`Cacher::unbust`] runs on the same thread.
    /// Dropping the cacher only clears the dropping thread's flag, so worker
    /// threads should use [`Cacher::bust_scope`] or [`Cacher::bust_guard`].
    pub fn bust(&self) {
        bust::bust(self.config.id());
    }

    /// Force write-through while `scoped` runs, clearing the flag on every
    /// exit path.
    pub fn bust_scope<R, F>(&self, scoped: F) -> R
    where
        F: FnOnce() -> R,
    {
        let _guard = BustGuard::new(self.config.id());
        scoped()
    }

    /// Force write-through until the returned guard is dropped.
    pub fn bust_guard(&self) -> BustGuard {
        BustGuard::new(self.config.id())
    }

    /// Clear the bust flag on the current thread.
    pub fn unbust(&self) {
        bust::unbust(self.config.id());
    }

    /// Whether this cacher is busting on the current thread.
    pub fn is_busting(&self) -> bool {
        bust::is_busting(self.config.id())
    }

    // ------------------------------------------------------------------
    // Core API
    // ------------------------------------------------------------------

    /// Whether `key` is present. Always false when caching is disabled.
    ///
    /// A stored nil counts as present.
    pub fn exists(&self, key: &str) -> CacherResult<bool> {
        let settings = self.config.settings();
        if !settings.enabled {
            return Ok(false);
        }

        let backend = self.config.backend()?;
        let physical = KeyPreparer::new(&settings).prepare(key);
        Ok(backend.read(physical.as_str())?.is_some())
    }

    /// Read `key`, returning `Value::Null` when absent.
    pub fn get(&self, key: &str) -> CacherResult<Value> {
        self.fetch::<CacherError>(key, &CallOptions::default(), None)
    }

    /// Read `key`, computing and storing the value on a miss.
    pub fn get_with<E, F>(&self, key: &str, options: &CallOptions, compute: F) -> Result<Value, E>
    where
        E: From<CacherError>,
        F: FnOnce() -> Result<Value, E>,
    {
        self.fetch(key, options, Some(Producer::value(compute)))
    }

    /// Read `key`, building and storing a map value on a miss.
    pub fn get_building<E, F>(&self, key: &str, options: &CallOptions, build: F) -> Result<Value, E>
    where
        E: From<CacherError>,
        F: FnOnce(&mut Map<String, Value>) -> Result<(), E>,
    {
        self.fetch(key, options, Some(Producer::builder(build)))
    }

    /// Compute and store a value for `key`, returning the computed value.
    pub fn set_with<E, F>(&self, key: &str, options: &CallOptions, compute: F) -> Result<Value, E>
    where
        E: From<CacherError>,
        F: FnOnce() -> Result<Value, E>,
    {
        self.store(key, options, Producer::value(compute))
    }

    /// Build and store a map value for `key`, returning the built map.
    pub fn set_building<E, F>(&self, key: &str, options: &CallOptions, build: F) -> Result<Value, E>
    where
        E: From<CacherError>,
        F: FnOnce(&mut Map<String, Value>) -> Result<(), E>,
    {
        self.store(key, options, Producer::builder(build))
    }

    /// The general read-through operation behind every `get_*` method.
    ///
    /// Without a producer, a miss or a forced read yields `Value::Null` and
    /// writes nothing.
    pub fn fetch<E>(
        &self,
        key: &str,
        options: &CallOptions,
        producer: Option<Producer<'_, E>>,
    ) -> Result<Value, E>
    where
        E: From<CacherError>,
    {
        let settings = self.config.settings();

        if !settings.enabled {
            trace!(key, "Caching disabled, bypassing backend");
            return match producer {
                Some(producer) => producer.produce(),
                None => Ok(Value::Null),
            };
        }

        if options.break_cache || self.is_busting() {
            debug!(key, break_cache = options.break_cache, "Forced write-through");
            return match producer {
                Some(producer) => self.produce_and_write(key, &settings, options, producer),
                None => Ok(Value::Null),
            };
        }

        let backend = self.config.backend()?;
        let physical = KeyPreparer::new(&settings).prepare(key);

        match backend.read(physical.as_str())? {
            Some(envelope) => {
                trace!(key, physical_key = %physical, "Cache hit");
                let registry = self.config.registry();
                Ok(Codec::new(settings.serialize, &registry).decode(envelope)?)
            }
            None => {
                trace!(key, physical_key = %physical, "Cache miss");
                match producer {
                    Some(producer) => {
                        let value = producer.produce()?;
                        self.write_value(backend.as_ref(), &physical, &settings, options, &value)?;
                        Ok(value)
                    }
                    None => Ok(Value::Null),
                }
            }
        }
    }

    /// The general write operation behind every `set_*` method.
    ///
    /// The producer always runs. When caching is disabled nothing is written.
    pub fn store<E>(&self, key: &str, options: &CallOptions, producer: Producer<'_, E>) -> Result<Value, E>
    where
        E: From<CacherError>,
    {
        let settings = self.config.settings();
        self.produce_and_write(key, &settings, options, producer)
    }

    /// Read several keys with one backend call.
    ///
    /// The result is aligned with `keys`: one value per input key, in order,
    /// `Value::Null` for keys that are absent. Ignores the enabled and bust
    /// state.
    pub fn get_multi<K: AsRef<str>>(&self, keys: &[K]) -> CacherResult<Vec<Value>> {
        let settings = self.config.settings();
        let backend = self.config.backend()?;
        let preparer = KeyPreparer::new(&settings);

        let physical: Vec<String> = keys
            .iter()
            .map(|key| preparer.prepare(key.as_ref()).into_string())
            .collect();

        let found = backend.read_multi(&physical)?;
        trace!(requested = physical.len(), found = found.len(), "Batch read");

        let registry = self.config.registry();
        let codec = Codec::new(settings.serialize, &registry);
        let mut decoded: HashMap<String, Value> = HashMap::with_capacity(found.len());
        for (key, envelope) in found {
            decoded.insert(key, codec.decode(envelope)?);
        }

        Ok(physical
            .iter()
            .map(|key| decoded.get(key).cloned().unwrap_or(Value::Null))
            .collect())
    }

    /// Read `key` as `T`. A nil or absent entry reads as `None`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> CacherResult<Option<T>> {
        typed_from_value(self.get(key)?)
    }

    /// Read `key` as `T`, computing and storing it on a miss.
    pub fn get_with_as<T, E, F>(
        &self,
        key: &str,
        options: &CallOptions,
        compute: F,
    ) -> Result<Option<T>, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<CacherError>,
        F: FnOnce() -> Result<T, E>,
    {
        let value = self.get_with(key, options, || {
            let typed = compute()?;
            serde_json::to_value(typed).map_err(|e| {
                E::from(CacherError::Serialization {
                    reason: e.to_string(),
                })
            })
        })?;
        typed_from_value(value).map_err(E::from)
    }

    fn produce_and_write<E>(
        &self,
        key: &str,
        settings: &Settings,
        options: &CallOptions,
        producer: Producer<'_, E>,
    ) -> Result<Value, E>
    where
        E: From<CacherError>,
    {
        let value = producer.produce()?;
        if !settings.enabled {
            return Ok(value);
        }

        let backend = self.config.backend()?;
        let physical = KeyPreparer::new(settings).prepare(key);
        self.write_value(backend.as_ref(), &physical, settings, options, &value)?;
        Ok(value)
    }

    fn write_value(
        &self,
        backend: &dyn CacheBackend,
        physical: &PhysicalKey,
        settings: &Settings,
        options: &CallOptions,
        value: &Value,
    ) -> CacherResult<()> {
        let registry = self.config.registry();
        let envelope = Codec::new(settings.serialize, &registry).encode(value)?;
        trace!(physical_key = %physical, kind = envelope.kind(), "Cache write");
        backend.write(physical.as_str(), envelope, &options.backend)
    }
}

// Flags other threads set with `bust` outlive the cacher. Their ids are
// never reused, so a stale flag cannot affect another instance.
impl Drop for Cacher {
    fn drop(&mut self) {
        bust::unbust(self.config.id());
    }
}

fn typed_from_value<T: DeserializeOwned>(value: Value) -> CacherResult<Option<T>> {
    if value.is_null() {
        return Ok(None);
    }
    serde_json::from_value(value).map(Some).map_err(|e| {
        DeserializationError::DecoderFailed {
            type_name: std::any::type_name::<T>().to_string(),
            reason: e.to_string(),
        }
        .into()
    })
}
