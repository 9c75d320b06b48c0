//! Layered configuration: per-instance overrides over a shared defaults
//! registry.
//!
//! # Lifecycle
//!
//! A [`Defaults`] handle is created once (the process-wide one lives behind
//! [`Defaults::global`]) and configured at startup. Each [`CacheConfig`]
//! receives a defaults handle explicitly and records only the attributes it
//! overrides. Every getter resolves the override first and otherwise reads
//! the defaults at call time, so later changes to the defaults reach every
//! instance that did not override the attribute.
//!
//! Mutating defaults while other threads are mid-call is not coordinated
//! beyond the lock itself: callers should configure at startup or in tests.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use cacher_core::{
    validate_max_key_size, CacherOptions, CacherResult, ConfigError, Namespace, Settings,
};
use once_cell::sync::Lazy;

use super::registry::TypeRegistry;
use super::traits::CacheBackend;

static GLOBAL_DEFAULTS: Lazy<Defaults> = Lazy::new(Defaults::new);

static NEXT_CONFIG_ID: AtomicU64 = AtomicU64::new(1);

/// Stable identity of one configuration instance.
///
/// Used to key per-thread bust flags. Identifiers are never reused within a
/// process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConfigId(u64);

impl ConfigId {
    fn next() -> Self {
        Self(NEXT_CONFIG_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

struct DefaultsInner {
    backend: Option<Arc<dyn CacheBackend>>,
    settings: Settings,
    registry: Arc<TypeRegistry>,
}

/// Shared default registry. Cloning yields another handle to the same
/// defaults.
#[derive(Clone)]
pub struct Defaults {
    inner: Arc<RwLock<DefaultsInner>>,
}

impl Default for Defaults {
    fn default() -> Self {
        Self::new()
    }
}

impl Defaults {
    /// Create a defaults registry holding factory values and an empty type
    /// registry.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(DefaultsInner {
                backend: None,
                settings: Settings::default(),
                registry: Arc::new(TypeRegistry::new()),
            })),
        }
    }

    /// The process-wide defaults.
    pub fn global() -> &'static Defaults {
        &GLOBAL_DEFAULTS
    }

    fn read(&self) -> RwLockReadGuard<'_, DefaultsInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, DefaultsInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Restore factory values: no backend, namespace disabled, 250-byte keys,
    /// no serialization, caching disabled. The type registry is kept.
    pub fn reset(&self) -> &Self {
        let mut inner = self.write();
        inner.backend = None;
        inner.settings = Settings::default();
        self
    }

    /// Run a configuration callback against these defaults.
    pub fn configure<F>(&self, configure: F) -> CacherResult<&Self>
    where
        F: FnOnce(&Self) -> CacherResult<()>,
    {
        configure(self)?;
        Ok(self)
    }

    /// Overlay a configuration map.
    pub fn apply(&self, options: &CacherOptions) -> CacherResult<&Self> {
        options.validate()?;
        options.apply_to(&mut self.write().settings);
        Ok(self)
    }

    /// The default backend.
    pub fn backend(&self) -> CacherResult<Arc<dyn CacheBackend>> {
        self.read()
            .backend
            .clone()
            .ok_or_else(|| ConfigError::NoBackend.into())
    }

    /// Returns true if a default backend is set.
    pub fn has_backend(&self) -> bool {
        self.read().backend.is_some()
    }

    /// Set the default backend.
    pub fn set_backend(&self, backend: Arc<dyn CacheBackend>) -> &Self {
        self.write().backend = Some(backend);
        self
    }

    /// Snapshot of the default settings.
    pub fn settings(&self) -> Settings {
        self.read().settings.clone()
    }

    /// Set the default namespace.
    pub fn set_namespace(&self, namespace: impl Into<Namespace>) -> &Self {
        self.write().settings.namespace = namespace.into();
        self
    }

    /// Disable the default namespace.
    pub fn disable_namespace(&self) -> &Self {
        self.write().settings.namespace = Namespace::Disabled;
        self
    }

    /// Set the default maximum key size.
    pub fn set_max_key_size(&self, max_key_size: usize) -> CacherResult<&Self> {
        validate_max_key_size(max_key_size)?;
        self.write().settings.max_key_size = max_key_size;
        Ok(self)
    }

    /// Set the default serialization mode.
    pub fn set_serialize(&self, serialize: bool) -> &Self {
        self.write().settings.serialize = serialize;
        self
    }

    /// Set whether caching is enabled by default.
    pub fn set_enabled(&self, enabled: bool) -> &Self {
        self.write().settings.enabled = enabled;
        self
    }

    /// The default type registry.
    pub fn registry(&self) -> Arc<TypeRegistry> {
        Arc::clone(&self.read().registry)
    }

    /// Replace the default type registry.
    pub fn set_registry(&self, registry: Arc<TypeRegistry>) -> &Self {
        self.write().registry = registry;
        self
    }
}

impl fmt::Debug for Defaults {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.read();
        f.debug_struct("Defaults")
            .field("has_backend", &inner.backend.is_some())
            .field("settings", &inner.settings)
            .finish()
    }
}

/// Per-instance configuration with late-bound fallback to [`Defaults`].
pub struct CacheConfig {
    id: ConfigId,
    defaults: Defaults,
    backend: Option<Arc<dyn CacheBackend>>,
    namespace: Option<Namespace>,
    max_key_size: Option<usize>,
    serialize: Option<bool>,
    enabled: Option<bool>,
    registry: Option<Arc<TypeRegistry>>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::new(Defaults::global().clone())
    }
}

impl CacheConfig {
    /// Create a config with no overrides over the given defaults.
    pub fn new(defaults: Defaults) -> Self {
        Self {
            id: ConfigId::next(),
            defaults,
            backend: None,
            namespace: None,
            max_key_size: None,
            serialize: None,
            enabled: None,
            registry: None,
        }
    }

    /// Create a config from a configuration map.
    pub fn from_options(defaults: Defaults, options: &CacherOptions) -> CacherResult<Self> {
        let mut config = Self::new(defaults);
        config.apply(options)?;
        Ok(config)
    }

    /// This instance's identity.
    pub fn id(&self) -> ConfigId {
        self.id
    }

    /// The defaults this instance falls back to.
    pub fn defaults(&self) -> &Defaults {
        &self.defaults
    }

    /// Set the backend override.
    pub fn with_backend(mut self, backend: Arc<dyn CacheBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Set the namespace override.
    pub fn with_namespace(mut self, namespace: impl Into<Namespace>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Set the serialization override.
    pub fn with_serialize(mut self, serialize: bool) -> Self {
        self.serialize = Some(serialize);
        self
    }

    /// Set the enabled override.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    /// Set the type registry override.
    pub fn with_registry(mut self, registry: Arc<TypeRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Overlay a configuration map onto this instance's overrides.
    pub fn apply(&mut self, options: &CacherOptions) -> CacherResult<()> {
        options.validate()?;
        if let Some(namespace) = &options.namespace {
            self.namespace = Some(namespace.clone());
        }
        if let Some(size) = options.max_key_size {
            self.max_key_size = Some(size);
        }
        if let Some(serialize) = options.serialize {
            self.serialize = Some(serialize);
        }
        if let Some(enabled) = options.enabled {
            self.enabled = Some(enabled);
        }
        Ok(())
    }

    /// The backend: the override if set, else the default.
    ///
    /// Fails with [`ConfigError::NoBackend`] when neither is set.
    pub fn backend(&self) -> CacherResult<Arc<dyn CacheBackend>> {
        match &self.backend {
            Some(backend) => Ok(Arc::clone(backend)),
            None => self.defaults.backend(),
        }
    }

    /// Set the backend override.
    pub fn set_backend(&mut self, backend: Arc<dyn CacheBackend>) {
        self.backend = Some(backend);
    }

    /// The namespace.
    pub fn namespace(&self) -> Namespace {
        match &self.namespace {
            Some(namespace) => namespace.clone(),
            None => self.defaults.read().settings.namespace.clone(),
        }
    }

    /// Returns true if keys are namespaced.
    pub fn namespaced(&self) -> bool {
        self.namespace().is_enabled()
    }

    /// Set the namespace override.
    pub fn set_namespace(&mut self, namespace: impl Into<Namespace>) {
        self.namespace = Some(namespace.into());
    }

    /// Override the namespace as disabled, regardless of the default.
    pub fn disable_namespace(&mut self) {
        self.namespace = Some(Namespace::Disabled);
    }

    /// The maximum physical key size in bytes.
    pub fn max_key_size(&self) -> usize {
        self.max_key_size
            .unwrap_or_else(|| self.defaults.read().settings.max_key_size)
    }

    /// Set the maximum key size override.
    pub fn set_max_key_size(&mut self, max_key_size: usize) -> CacherResult<()> {
        validate_max_key_size(max_key_size)?;
        self.max_key_size = Some(max_key_size);
        Ok(())
    }

    /// Whether values are serialized.
    pub fn serialize(&self) -> bool {
        self.serialize
            .unwrap_or_else(|| self.defaults.read().settings.serialize)
    }

    /// Set the serialization override.
    pub fn set_serialize(&mut self, serialize: bool) {
        self.serialize = Some(serialize);
    }

    /// Whether caching is enabled.
    pub fn enabled(&self) -> bool {
        self.enabled
            .unwrap_or_else(|| self.defaults.read().settings.enabled)
    }

    /// Override caching as enabled.
    pub fn enable(&mut self) {
        self.enabled = Some(true);
    }

    /// Override caching as disabled.
    pub fn disable(&mut self) {
        self.enabled = Some(false);
    }

    /// The type registry used for decoding.
    pub fn registry(&self) -> Arc<TypeRegistry> {
        match &self.registry {
            Some(registry) => Arc::clone(registry),
            None => self.defaults.registry(),
        }
    }

    /// Set the type registry override.
    pub fn set_registry(&mut self, registry: Arc<TypeRegistry>) {
        self.registry = Some(registry);
    }

    /// Drop every override so all attributes follow the defaults again.
    pub fn clear_overrides(&mut self) {
        self.backend = None;
        self.namespace = None;
        self.max_key_size = None;
        self.serialize = None;
        self.enabled = None;
        self.registry = None;
    }

    /// Resolve all settings at once.
    ///
    /// Reads the defaults under a single lock so one call sees a consistent
    /// snapshot.
    pub fn settings(&self) -> Settings {
        let defaults = self.defaults.read();
        Settings {
            namespace: self
                .namespace
                .clone()
                .unwrap_or_else(|| defaults.settings.namespace.clone()),
            max_key_size: self.max_key_size.unwrap_or(defaults.settings.max_key_size),
            serialize: self.serialize.unwrap_or(defaults.settings.serialize),
            enabled: self.enabled.unwrap_or(defaults.settings.enabled),
        }
    }
}

impl fmt::Debug for CacheConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheConfig")
            .field("id", &self.id)
            .field("has_backend_override", &self.backend.is_some())
            .field("namespace", &self.namespace)
            .field("max_key_size", &self.max_key_size)
            .field("serialize", &self.serialize)
            .field("enabled", &self.enabled)
            .finish()
    }
}
