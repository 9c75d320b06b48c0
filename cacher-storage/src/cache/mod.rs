//! Read-through caching decorator over pluggable key-value backends.
//!
//! A [`Cacher`] turns a logical key and an optional producer into a cached
//! value. Each call resolves its settings once through [`CacheConfig`],
//! prepares a physical key with [`KeyPreparer`], and moves values to and
//! from the backend through a [`Codec`].
//!
//! # Key Layout
//!
//! ```text
//! [namespace/]logical_key[/marshal]
//! [namespace/]sha1/<40 hex digits>[/marshal]    when the decorated key is too long
//! ```
//!
//! # Forced Writes
//!
//! A call forces a write-through when it passes `break_cache`, or when the
//! cacher is busting on the current thread (see [`Cacher::bust_scope`]).
//!
//! # Example
//!
//! ```ignore
//! let defaults = Defaults::new();
//! defaults
//!     .set_backend(Arc::new(MemoryCacheBackend::new()))
//!     .set_enabled(true);
//!
//! let cacher = Cacher::with_defaults(defaults);
//! let report = cacher.get_with("reports/daily", &CallOptions::new(), || {
//!     Ok::<_, CacherError>(build_report())
//! })?;
//! ```

pub mod bust;
pub mod codec;
pub mod config;
pub mod key;
pub mod lmdb_backend;
pub mod memory_backend;
pub mod read_through;
pub mod registry;
pub mod traits;

pub use bust::BustGuard;
pub use codec::Codec;
pub use config::{CacheConfig, ConfigId, Defaults};
pub use key::{hashed_key, KeyPreparer, PhysicalKey};
pub use lmdb_backend::{LmdbCacheBackend, LmdbCacheError};
pub use memory_backend::MemoryCacheBackend;
pub use read_through::{CallOptions, Cacher, Producer};
pub use registry::{
    contains_tags, from_tagged, is_tagged, to_tagged, CacheType, TagError, TypeDecoder,
    TypeRegistry, TypeResolver, TYPE_TAG_FIELD, TYPE_VALUE_FIELD,
};
pub use traits::{BackendOptions, CacheBackend, CacheStats, Envelope};
