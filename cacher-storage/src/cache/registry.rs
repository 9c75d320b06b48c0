//! Type registry consulted while decoding serialized values.
//!
//! Serialized payloads may carry typed values in the tagged form
//! `{"$type": "<name>", "$value": <data>}`: an object with exactly those two
//! fields and a string `$type`. Any other object, including one with a
//! `$type` field next to other fields, is plain data.
//!
//! Every tag must have a registered [`TypeDecoder`] for the payload to
//! decode. A tag that is not registered yet can be supplied lazily by a
//! [`TypeResolver`], which the codec consults at most once per missing name
//! and call.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use cacher_core::{CacherError, CacherResult, DeserializationError};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};

/// Field holding the type name of a tagged value.
pub const TYPE_TAG_FIELD: &str = "$type";

/// Field holding the data of a tagged value.
pub const TYPE_VALUE_FIELD: &str = "$value";

/// A serde type with a stable name that survives in cached payloads.
///
/// The name is part of the stored data, so renaming it orphans existing
/// entries.
pub trait CacheType: Serialize + DeserializeOwned {
    /// Stable type tag.
    const TYPE_NAME: &'static str;
}

/// Decoder applied to the data of a tagged value.
///
/// A decoder may validate, normalize, or migrate the data. Returning an error
/// fails the whole decode with [`DeserializationError::DecoderFailed`].
#[derive(Clone)]
pub struct TypeDecoder(Arc<dyn Fn(Value) -> Result<Value, String> + Send + Sync>);

impl TypeDecoder {
    /// Wrap a decoding function.
    pub fn new<F>(decode: F) -> Self
    where
        F: Fn(Value) -> Result<Value, String> + Send + Sync + 'static,
    {
        Self(Arc::new(decode))
    }

    /// Decoder that checks the data deserializes as `T` and normalizes it
    /// through `T`'s serde representation.
    pub fn of<T: CacheType>() -> Self {
        Self::new(|data| {
            let typed: T = serde_json::from_value(data).map_err(|e| e.to_string())?;
            serde_json::to_value(typed).map_err(|e| e.to_string())
        })
    }

    /// Decoder that accepts any data unchanged.
    pub fn passthrough() -> Self {
        Self::new(Ok)
    }

    /// Run the decoder.
    pub fn decode(&self, data: Value) -> Result<Value, String> {
        (self.0)(data)
    }
}

impl fmt::Debug for TypeDecoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeDecoder").finish_non_exhaustive()
    }
}

/// Lazily supplies decoders for type names the registry does not know yet.
pub trait TypeResolver: Send + Sync {
    /// Return a decoder for `type_name`, or `None` if it cannot be resolved.
    fn resolve(&self, type_name: &str) -> Option<TypeDecoder>;
}

impl<F> TypeResolver for F
where
    F: Fn(&str) -> Option<TypeDecoder> + Send + Sync,
{
    fn resolve(&self, type_name: &str) -> Option<TypeDecoder> {
        self(type_name)
    }
}

/// Why a tag walk stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagError {
    /// A tag with no registered decoder.
    Unknown(String),
    /// A registered decoder refused the data.
    Rejected { type_name: String, reason: String },
}

impl From<TagError> for DeserializationError {
    fn from(err: TagError) -> Self {
        match err {
            TagError::Unknown(type_name) => Self::UnresolvedType { type_name },
            TagError::Rejected { type_name, reason } => Self::DecoderFailed { type_name, reason },
        }
    }
}

/// Registry of decoders keyed by type tag.
#[derive(Default)]
pub struct TypeRegistry {
    decoders: RwLock<HashMap<String, TypeDecoder>>,
    resolver: RwLock<Option<Arc<dyn TypeResolver>>>,
}

impl TypeRegistry {
    /// Create an empty registry with no resolver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `T` under its [`CacheType::TYPE_NAME`].
    pub fn register<T: CacheType>(&self) {
        self.register_decoder(T::TYPE_NAME, TypeDecoder::of::<T>());
    }

    /// Register a decoder under an explicit name, replacing any previous one.
    pub fn register_decoder(&self, type_name: impl Into<String>, decoder: TypeDecoder) {
        self.decoders
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(type_name.into(), decoder);
    }

    /// Remove a decoder. Returns true if one was registered.
    pub fn unregister(&self, type_name: &str) -> bool {
        self.decoders
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(type_name)
            .is_some()
    }

    /// Returns true if a decoder is registered for `type_name`.
    pub fn contains(&self, type_name: &str) -> bool {
        self.decoders
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(type_name)
    }

    /// Registered type names, sorted.
    pub fn type_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .decoders
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Install the resolver consulted for unknown tags.
    pub fn set_resolver<R: TypeResolver + 'static>(&self, resolver: R) {
        *self.resolver.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(resolver));
    }

    /// Remove the resolver.
    pub fn clear_resolver(&self) {
        *self.resolver.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Ask the resolver for `type_name` and register what it returns.
    ///
    /// Returns true if a decoder was registered.
    pub fn resolve_missing(&self, type_name: &str) -> bool {
        let resolver = self
            .resolver
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        match resolver.and_then(|resolver| resolver.resolve(type_name)) {
            Some(decoder) => {
                self.register_decoder(type_name, decoder);
                true
            }
            None => false,
        }
    }

    /// Walk `value` and run the registered decoder for every tagged value.
    ///
    /// Stops at the first tag without a decoder.
    pub fn resolve_tags(&self, value: Value) -> Result<Value, TagError> {
        match value {
            Value::Array(items) => items
                .into_iter()
                .map(|item| self.resolve_tags(item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Value::Object(map) => {
                if let Some(type_name) = tag_of(&map) {
                    let type_name = type_name.to_string();
                    return self.decode_tagged(type_name, map);
                }

                let mut resolved = Map::with_capacity(map.len());
                for (field, item) in map {
                    resolved.insert(field, self.resolve_tags(item)?);
                }
                Ok(Value::Object(resolved))
            }
            scalar => Ok(scalar),
        }
    }

    fn decoder(&self, type_name: &str) -> Option<TypeDecoder> {
        self.decoders
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(type_name)
            .cloned()
    }

    fn decode_tagged(&self, type_name: String, mut map: Map<String, Value>) -> Result<Value, TagError> {
        let decoder = self
            .decoder(&type_name)
            .ok_or_else(|| TagError::Unknown(type_name.clone()))?;

        let data = map.remove(TYPE_VALUE_FIELD).unwrap_or(Value::Null);
        let data = self.resolve_tags(data)?;
        let decoded = decoder.decode(data).map_err(|reason| TagError::Rejected {
            type_name: type_name.clone(),
            reason,
        })?;

        Ok(tagged_value(type_name, decoded))
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let has_resolver = self
            .resolver
            .read()
            .map(|resolver| resolver.is_some())
            .unwrap_or(false);
        f.debug_struct("TypeRegistry")
            .field("types", &self.type_names())
            .field("has_resolver", &has_resolver)
            .finish()
    }
}

fn tag_of(map: &Map<String, Value>) -> Option<&str> {
    if map.len() != 2 || !map.contains_key(TYPE_VALUE_FIELD) {
        return None;
    }
    map.get(TYPE_TAG_FIELD).and_then(Value::as_str)
}

/// Returns true if `value` itself is in the tagged form.
pub fn is_tagged(value: &Value) -> bool {
    value.as_object().and_then(tag_of).is_some()
}

/// Returns true if `value` is or contains a tagged value.
pub fn contains_tags(value: &Value) -> bool {
    match value {
        Value::Array(items) => items.iter().any(contains_tags),
        Value::Object(map) => tag_of(map).is_some() || map.values().any(contains_tags),
        _ => false,
    }
}

fn tagged_value(type_name: String, data: Value) -> Value {
    let mut map = Map::with_capacity(2);
    map.insert(TYPE_TAG_FIELD.to_string(), Value::String(type_name));
    map.insert(TYPE_VALUE_FIELD.to_string(), data);
    Value::Object(map)
}

/// Wrap a typed value in its tagged form.
pub fn to_tagged<T: CacheType>(value: &T) -> CacherResult<Value> {
    let data = serde_json::to_value(value).map_err(|e| CacherError::Serialization {
        reason: e.to_string(),
    })?;
    Ok(tagged_value(T::TYPE_NAME.to_string(), data))
}

/// Unwrap a tagged value back into `T`.
pub fn from_tagged<T: CacheType>(value: Value) -> CacherResult<T> {
    let Value::Object(mut map) = value else {
        return Err(DeserializationError::Malformed {
            reason: format!("expected a tagged {} object", T::TYPE_NAME),
        }
        .into());
    };

    match map.remove(TYPE_TAG_FIELD) {
        Some(Value::String(name)) if name == T::TYPE_NAME => {}
        other => {
            return Err(DeserializationError::Malformed {
                reason: format!("expected tag {}, got {:?}", T::TYPE_NAME, other),
            }
            .into())
        }
    }

    let data = map.remove(TYPE_VALUE_FIELD).unwrap_or(Value::Null);
    serde_json::from_value(data).map_err(|e| {
        DeserializationError::DecoderFailed {
            type_name: T::TYPE_NAME.to_string(),
            reason: e.to_string(),
        }
        .into()
    })
}
