//! Value encoding for storage.
//!
//! Two modes, chosen by the `serialize` setting:
//!
//! - Raw: values are stored as-is. A nil value (`Value::Null`) is stored as
//!   the [`NIL_SENTINEL`] string so the backend still reports the key as
//!   present. A real string equal to the sentinel reads back as nil.
//! - Marshalled: values are stored as JSON bytes. Tagged values inside the
//!   payload are checked against the [`TypeRegistry`] on the way in and on
//!   the way out, so a value that encodes also decodes as long as its types
//!   stay registered. Objects that are not in the exact tagged form are
//!   stored and returned untouched.

use std::collections::HashSet;

use cacher_core::{CacherError, CacherResult, DeserializationError, NIL_SENTINEL};
use serde_json::Value;
use tracing::debug;

use super::registry::{contains_tags, TagError, TypeRegistry};
use super::traits::Envelope;

/// Encoder/decoder bound to one mode and registry.
#[derive(Debug, Clone, Copy)]
pub struct Codec<'a> {
    serialize: bool,
    registry: &'a TypeRegistry,
}

impl<'a> Codec<'a> {
    /// Create a codec.
    pub fn new(serialize: bool, registry: &'a TypeRegistry) -> Self {
        Self {
            serialize,
            registry,
        }
    }

    /// Mode name, used in error messages.
    fn mode(&self) -> &'static str {
        if self.serialize {
            "marshalled"
        } else {
            "raw"
        }
    }

    /// Encode a value for storage.
    ///
    /// In marshalled mode, a tagged value whose type cannot be resolved is
    /// refused here rather than stored as an entry no read could decode.
    pub fn encode(&self, value: &Value) -> CacherResult<Envelope> {
        if self.serialize {
            if contains_tags(value) {
                self.resolve(value.clone())
                    .map_err(|e| CacherError::Serialization {
                        reason: e.to_string(),
                    })?;
            }
            let bytes = serde_json::to_vec(value).map_err(|e| CacherError::Serialization {
                reason: e.to_string(),
            })?;
            return Ok(Envelope::Marshalled(bytes));
        }

        match value {
            Value::Null => Ok(Envelope::Raw(Value::String(NIL_SENTINEL.to_string()))),
            other => Ok(Envelope::Raw(other.clone())),
        }
    }

    /// Decode a stored envelope.
    pub fn decode(&self, envelope: Envelope) -> CacherResult<Value> {
        match (self.serialize, envelope) {
            (false, Envelope::Raw(Value::String(s))) if s == NIL_SENTINEL => Ok(Value::Null),
            (false, Envelope::Raw(value)) => Ok(value),
            (true, Envelope::Marshalled(bytes)) => Ok(self.decode_marshalled(&bytes)?),
            (_, envelope) => Err(DeserializationError::EnvelopeMismatch {
                expected: self.mode(),
                found: envelope.kind(),
            }
            .into()),
        }
    }

    fn decode_marshalled(&self, bytes: &[u8]) -> Result<Value, DeserializationError> {
        let value: Value =
            serde_json::from_slice(bytes).map_err(|e| DeserializationError::Malformed {
                reason: e.to_string(),
            })?;

        if !contains_tags(&value) {
            return Ok(value);
        }
        self.resolve(value)
    }

    /// Run every tagged value through its decoder, resolving unknown tags.
    ///
    /// Each distinct unknown tag gets one resolution attempt and one retry.
    /// A tag that is still unknown after its attempt fails, which bounds the
    /// loop by the number of distinct tags in the payload.
    fn resolve(&self, value: Value) -> Result<Value, DeserializationError> {
        let mut attempted: HashSet<String> = HashSet::new();

        loop {
            match self.registry.resolve_tags(value.clone()) {
                Ok(value) => return Ok(value),
                Err(TagError::Unknown(type_name)) => {
                    if !attempted.insert(type_name.clone()) {
                        return Err(DeserializationError::UnresolvedType { type_name });
                    }
                    let resolved = self.registry.resolve_missing(&type_name);
                    debug!(type_name = %type_name, resolved, "Retrying after type resolution");
                }
                Err(other) => return Err(other.into()),
            }
        }
    }
}
