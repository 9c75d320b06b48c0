//! Configuration types

use crate::{CacherResult, ConfigError};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Factory default for the maximum physical key length, in bytes.
pub const DEFAULT_MAX_KEY_SIZE: usize = 250;

/// Stored in place of a nil value when serialization is off.
pub const NIL_SENTINEL: &str = "cacher/nil";

/// Suffix appended to every physical key when serialization is on.
pub const MARSHAL_SUFFIX: &str = "/marshal";

/// Prefix of the fixed-form key used when a decorated key is too long.
pub const HASHED_KEY_PREFIX: &str = "sha1/";

/// Key namespace: either disabled or a non-empty name prefixed onto every key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "NamespaceRepr", into = "NamespaceRepr")]
pub enum Namespace {
    #[default]
    Disabled,
    Named(String),
}

impl Namespace {
    /// Create a named namespace.
    pub fn named(name: impl Into<String>) -> Self {
        Self::Named(name.into())
    }

    /// Returns true if keys are prefixed with this namespace.
    pub fn is_enabled(&self) -> bool {
        matches!(self, Self::Named(_))
    }

    /// The namespace name, if enabled.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Disabled => None,
            Self::Named(name) => Some(name),
        }
    }
}

impl From<&str> for Namespace {
    fn from(name: &str) -> Self {
        Self::named(name)
    }
}

impl From<String> for Namespace {
    fn from(name: String) -> Self {
        Self::Named(name)
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disabled => f.write_str("<disabled>"),
            Self::Named(name) => f.write_str(name),
        }
    }
}

/// Wire form of [`Namespace`] in configuration maps: `false` or a string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NamespaceRepr {
    Flag(bool),
    Name(String),
}

impl TryFrom<NamespaceRepr> for Namespace {
    type Error = ConfigError;

    fn try_from(repr: NamespaceRepr) -> Result<Self, Self::Error> {
        match repr {
            NamespaceRepr::Flag(false) => Ok(Self::Disabled),
            NamespaceRepr::Flag(true) => Err(ConfigError::InvalidValue {
                field: "namespace".to_string(),
                value: "true".to_string(),
                reason: "expected a name or false".to_string(),
            }),
            NamespaceRepr::Name(name) if name.is_empty() => Err(ConfigError::InvalidValue {
                field: "namespace".to_string(),
                value: String::new(),
                reason: "namespace name must not be empty".to_string(),
            }),
            NamespaceRepr::Name(name) => Ok(Self::Named(name)),
        }
    }
}

impl From<Namespace> for NamespaceRepr {
    fn from(namespace: Namespace) -> Self {
        match namespace {
            Namespace::Disabled => Self::Flag(false),
            Namespace::Named(name) => Self::Name(name),
        }
    }
}

/// Fully resolved settings, the values every cache operation reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub namespace: Namespace,
    pub max_key_size: usize,
    pub serialize: bool,
    pub enabled: bool,
}

impl Default for Settings {
    /// Factory defaults: namespace disabled, 250-byte keys, no serialization,
    /// caching disabled.
    fn default() -> Self {
        Self {
            namespace: Namespace::Disabled,
            max_key_size: DEFAULT_MAX_KEY_SIZE,
            serialize: false,
            enabled: false,
        }
    }
}

/// Configuration map accepted when building defaults or instances.
///
/// Every field is optional; an absent field leaves the corresponding setting
/// to fall back on the layer below it. The backend is not part of the map
/// because it is a live handle rather than data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacherOptions {
    /// `null` disables namespacing, like `false`. Only an absent field
    /// inherits.
    #[serde(
        deserialize_with = "explicit_null_disables",
        skip_serializing_if = "Option::is_none"
    )]
    pub namespace: Option<Namespace>,
    #[serde(alias = "maxKeySize")]
    pub max_key_size: Option<usize>,
    #[serde(alias = "marshal")]
    pub serialize: Option<bool>,
    pub enabled: Option<bool>,
}

fn explicit_null_disables<'de, D>(deserializer: D) -> Result<Option<Namespace>, D::Error>
where
    D: Deserializer<'de>,
{
    let namespace = Option::<Namespace>::deserialize(deserializer)?;
    Ok(Some(namespace.unwrap_or(Namespace::Disabled)))
}

impl CacherOptions {
    /// Create an empty options map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the namespace.
    pub fn with_namespace(mut self, namespace: impl Into<Namespace>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Set the maximum key size.
    pub fn with_max_key_size(mut self, max_key_size: usize) -> Self {
        self.max_key_size = Some(max_key_size);
        self
    }

    /// Enable or disable value serialization.
    pub fn with_serialize(mut self, serialize: bool) -> Self {
        self.serialize = Some(serialize);
        self
    }

    /// Enable or disable caching.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    /// Validate the options.
    ///
    /// Validates:
    /// - max_key_size > 0
    /// - a named namespace is non-empty
    pub fn validate(&self) -> CacherResult<()> {
        if let Some(size) = self.max_key_size {
            validate_max_key_size(size)?;
        }
        if let Some(Namespace::Named(name)) = &self.namespace {
            if name.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "namespace".to_string(),
                    value: String::new(),
                    reason: "namespace name must not be empty".to_string(),
                }
                .into());
            }
        }
        Ok(())
    }

    /// Overlay the fields present in this map onto `settings`.
    pub fn apply_to(&self, settings: &mut Settings) {
        if let Some(namespace) = &self.namespace {
            settings.namespace = namespace.clone();
        }
        if let Some(size) = self.max_key_size {
            settings.max_key_size = size;
        }
        if let Some(serialize) = self.serialize {
            settings.serialize = serialize;
        }
        if let Some(enabled) = self.enabled {
            settings.enabled = enabled;
        }
    }
}

/// Reject a zero maximum key size.
pub fn validate_max_key_size(size: usize) -> CacherResult<()> {
    if size == 0 {
        return Err(ConfigError::InvalidValue {
            field: "max_key_size".to_string(),
            value: size.to_string(),
            reason: "must be greater than zero".to_string(),
        }
        .into());
    }
    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Any non-empty name survives the configuration-map wire form.
        #[test]
        fn prop_named_namespace_wire_form(name in "[a-z0-9_:/-]{1,32}") {
            let namespace = Namespace::named(name.clone());
            let json = serde_json::to_string(&namespace).expect("serialize");
            let parsed: Namespace = serde_json::from_str(&json).expect("deserialize");
            prop_assert_eq!(parsed.as_str(), Some(name.as_str()));
        }

        /// Positive sizes always validate; the overlay always wins.
        #[test]
        fn prop_positive_max_key_size_valid(size in 1usize..10_000) {
            let options = CacherOptions::new().with_max_key_size(size);
            prop_assert!(options.validate().is_ok());
            let mut settings = Settings::default();
            options.apply_to(&mut settings);
            prop_assert_eq!(settings.max_key_size, size);
        }
    }
}
