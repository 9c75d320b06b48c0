//! Cacher Storage - Read-Through Decorator and Backends
//!
//! The caching engine lives in [`cache`]. Configuration and error types are
//! defined in `cacher-core` and re-exported here so most callers need only
//! this crate.

pub mod cache;

pub use cache::{
    from_tagged, hashed_key, is_tagged, to_tagged, BackendOptions, BustGuard, CacheBackend,
    CacheConfig, CacheStats, CacheType, Cacher, CallOptions, Codec, ConfigId, Defaults, Envelope,
    KeyPreparer, LmdbCacheBackend, LmdbCacheError, MemoryCacheBackend, PhysicalKey, Producer,
    TagError, TypeDecoder, TypeRegistry, TypeResolver,
};

pub use cacher_core::{
    BackendError, CacherError, CacherOptions, CacherResult, ConfigError, DeserializationError,
    Namespace, Settings,
};
