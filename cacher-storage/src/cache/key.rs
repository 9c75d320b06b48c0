//! Physical key derivation.
//!
//! A `PhysicalKey` can only be produced by [`KeyPreparer::prepare`], so every
//! key that reaches a backend has been namespaced, tagged, and length-checked
//! against the settings in force for that call.
//!
//! # Wire Format
//!
//! `[<namespace>/]<logical-or-hashed-key>[/marshal]`, where the hashed form is
//! `sha1/<40 lowercase hex chars>`. Existing cache entries depend on this
//! format byte-for-byte.

use std::fmt;

use cacher_core::{Settings, HASHED_KEY_PREFIX, MARSHAL_SUFFIX};
use sha1::{Digest, Sha1};
use tracing::debug;

/// A prepared key, ready to hand to a backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PhysicalKey {
    /// Private inner data - cannot be constructed externally
    inner: String,
    hashed: bool,
}

impl PhysicalKey {
    /// The key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.inner
    }

    /// Consume the key and return the owned string.
    pub fn into_string(self) -> String {
        self.inner
    }

    /// Returns true if the logical key was replaced by its SHA-1 form.
    pub fn is_hashed(&self) -> bool {
        self.hashed
    }

    /// Byte length of the key.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns true if the key is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl AsRef<str> for PhysicalKey {
    fn as_ref(&self) -> &str {
        &self.inner
    }
}

impl fmt::Display for PhysicalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inner)
    }
}

/// Derives physical keys from logical keys under one snapshot of settings.
#[derive(Debug, Clone, Copy)]
pub struct KeyPreparer<'a> {
    settings: &'a Settings,
}

impl<'a> KeyPreparer<'a> {
    /// Create a preparer bound to the given settings.
    pub fn new(settings: &'a Settings) -> Self {
        Self { settings }
    }

    /// Apply the namespace prefix and the serialization suffix.
    pub fn decorate(&self, key: &str) -> String {
        let namespace = self.settings.namespace.as_str();
        let mut decorated = String::with_capacity(
            key.len() + namespace.map_or(0, |ns| ns.len() + 1) + MARSHAL_SUFFIX.len(),
        );

        if let Some(namespace) = namespace {
            decorated.push_str(namespace);
            decorated.push('/');
        }

        decorated.push_str(key);

        if self.settings.serialize {
            decorated.push_str(MARSHAL_SUFFIX);
        }

        decorated
    }

    /// Derive the physical key for `logical_key`.
    ///
    /// The length check applies to the decorated form. When it exceeds
    /// `max_key_size`, the decorated hashed form is returned without a second
    /// check.
    pub fn prepare(&self, logical_key: &str) -> PhysicalKey {
        let decorated = self.decorate(logical_key);

        if decorated.len() <= self.settings.max_key_size {
            return PhysicalKey {
                inner: decorated,
                hashed: false,
            };
        }

        let hashed = self.decorate(&hashed_key(logical_key));
        debug!(
            decorated_len = decorated.len(),
            max_key_size = self.settings.max_key_size,
            physical_key = %hashed,
            "Key exceeds max size, using hashed form"
        );

        PhysicalKey {
            inner: hashed,
            hashed: true,
        }
    }
}

/// The fixed-form replacement for an overlong logical key:
/// `sha1/<hex digest of the logical key>`.
pub fn hashed_key(logical_key: &str) -> String {
    let digest = Sha1::digest(logical_key.as_bytes());
    format!("{}{}", HASHED_KEY_PREFIX, hex::encode(digest))
}
