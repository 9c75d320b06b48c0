//! Cacher Core - Errors and Configuration Types
//!
//! Pure data structures shared by the read-through decorator and its
//! backends. This crate contains no caching behavior.

pub mod error;
pub mod options;

pub use error::{BackendError, CacherError, CacherResult, ConfigError, DeserializationError};
pub use options::{
    validate_max_key_size, CacherOptions, Namespace, NamespaceRepr, Settings,
    DEFAULT_MAX_KEY_SIZE, HASHED_KEY_PREFIX, MARSHAL_SUFFIX, NIL_SENTINEL,
};
