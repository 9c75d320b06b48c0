//! Integration tests for the read-through decorator.
//!
//! Every test builds its own [`Defaults`] so tests can run in parallel
//! without sharing configuration.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use cacher_storage::{
    CacheBackend, CacheConfig, Cacher, CacherError, CacherOptions, CallOptions, Defaults,
    Envelope, Namespace,
};
use cacher_test_utils::assertions::{assert_config_error, assert_hashed_key};
use cacher_test_utils::fixtures::{enabled_cacher, enabled_defaults, marshalling_cacher};
use cacher_test_utils::{init_test_tracing, CallCounter, RecordingBackend};
use serde_json::{json, Value};

fn set(cacher: &Cacher, key: &str, value: Value) -> Value {
    cacher
        .set_with(key, &CallOptions::new(), || Ok::<_, CacherError>(value))
        .expect("set should succeed")
}

fn get_or(cacher: &Cacher, key: &str, value: Value) -> Value {
    cacher
        .get_with(key, &CallOptions::new(), || Ok::<_, CacherError>(value))
        .expect("get should succeed")
}

// ============================================================================
// CONFIGURING
// ============================================================================

#[test]
fn test_configure_callback_on_new_instance() {
    let cacher = Cacher::with_defaults(Defaults::new())
        .configure(|config| config.set_max_key_size(12))
        .expect("configure should succeed");

    assert_eq!(cacher.config().max_key_size(), 12);
}

#[test]
fn test_new_from_options_map() {
    let options: CacherOptions =
        serde_json::from_value(json!({"enabled": true})).expect("options should parse");
    let cacher = Cacher::from_options(Defaults::new(), &options).expect("valid options");

    assert!(cacher.config().enabled());
}

#[test]
fn test_options_map_accepts_aliases() {
    let options: CacherOptions =
        serde_json::from_value(json!({"marshal": true, "maxKeySize": 64, "namespace": "app"}))
            .expect("options should parse");
    let cacher = Cacher::from_options(Defaults::new(), &options).expect("valid options");

    assert!(cacher.config().serialize());
    assert_eq!(cacher.config().max_key_size(), 64);
    assert_eq!(cacher.config().namespace(), Namespace::named("app"));
}

#[test]
fn test_options_map_null_namespace_overrides_default() {
    let (defaults, backend) = enabled_defaults();
    defaults.set_namespace("global");
    let options: CacherOptions =
        serde_json::from_value(json!({"namespace": null})).expect("options should parse");
    let cacher = Cacher::from_options(defaults, &options).expect("valid options");

    assert!(!cacher.config().namespaced());
    set(&cacher, "foo", json!(1));
    assert_eq!(backend.last_accessed_key().as_deref(), Some("foo"));
}

#[test]
fn test_options_map_rejects_unknown_field() {
    let parsed = serde_json::from_value::<CacherOptions>(json!({"ttl": 5}));
    assert!(parsed.is_err());
}

#[test]
fn test_instance_backend_override() {
    let (defaults, default_backend) = enabled_defaults();
    let own_backend = Arc::new(RecordingBackend::new());
    let cacher = Cacher::from_config(CacheConfig::new(defaults).with_backend(own_backend.clone()));

    set(&cacher, "foo", json!(1));

    assert_eq!(own_backend.keys(), vec!["foo".to_string()]);
    assert!(default_backend.keys().is_empty());
}

#[test]
fn test_missing_backend_is_config_error() {
    let defaults = Defaults::new();
    defaults.set_enabled(true);
    let cacher = Cacher::with_defaults(defaults);

    assert_config_error(&cacher.get("foo"));
    assert_config_error(&cacher.exists("foo"));
    assert_config_error(&cacher.get_multi(&["foo"]));
}

// ============================================================================
// ENABLED
// ============================================================================

#[test]
fn test_sets_and_gets_key() {
    init_test_tracing();
    let (cacher, _) = enabled_cacher();

    assert_eq!(cacher.get("foo").unwrap(), Value::Null);
    assert_eq!(set(&cacher, "foo", json!("bar")), json!("bar"));
    assert_eq!(cacher.get("foo").unwrap(), json!("bar"));
}

#[test]
fn test_get_with_producer() {
    let (cacher, _) = enabled_cacher();

    assert_eq!(get_or(&cacher, "foo", json!(1)), json!(1));
    assert_eq!(get_or(&cacher, "foo", json!(2)), json!(1));
}

#[test]
fn test_producer_runs_once() {
    let (cacher, _) = enabled_cacher();
    let counter = CallCounter::new();

    for _ in 0..10 {
        cacher
            .get_with("foo", &CallOptions::new(), || {
                Ok::<_, CacherError>(json!(counter.hit()))
            })
            .unwrap();
    }

    assert_eq!(counter.count(), 1);
}

#[test]
fn test_exists() {
    let (cacher, _) = enabled_cacher();

    assert!(!cacher.exists("foo").unwrap());
    set(&cacher, "foo", json!("bar"));
    assert!(cacher.exists("foo").unwrap());
}

#[test]
fn test_nil_values_are_cached() {
    let (cacher, backend) = enabled_cacher();

    set(&cacher, "foo", Value::Null);

    assert!(cacher.exists("foo").unwrap());
    assert_eq!(cacher.get("foo").unwrap(), Value::Null);
    assert_eq!(get_or(&cacher, "foo", json!("not_nil")), Value::Null);
    assert_eq!(backend.raw("foo"), Some(Envelope::Raw(json!("cacher/nil"))));
}

#[test]
fn test_uses_namespace() {
    let (mut cacher, backend) = enabled_cacher();
    cacher.config_mut().set_namespace("my_cool_namespace");

    set(&cacher, "foo", json!(1));

    let keys = backend.keys();
    assert!(keys.contains(&"my_cool_namespace/foo".to_string()));
    assert!(!keys.contains(&"foo".to_string()));
}

#[test]
fn test_no_namespace_by_default() {
    let (cacher, backend) = enabled_cacher();
    assert!(!cacher.config().namespaced());

    set(&cacher, "foo", json!(1));

    assert!(backend.keys().contains(&"foo".to_string()));
}

#[test]
fn test_shortens_long_key() {
    let (mut cacher, backend) = enabled_cacher();
    let key = "a_really_long_key/".repeat(100);
    cacher.config_mut().set_max_key_size(100).unwrap();

    set(&cacher, &key, json!(3));

    let physical = backend.last_accessed_key().expect("key should be recorded");
    assert!(physical.starts_with("sha1/"));
    assert_hashed_key(&physical);
    assert_eq!(cacher.get(&key).unwrap(), json!(3));
}

#[test]
fn test_shortened_keys_fit_limited_backend() {
    let backend = Arc::new(RecordingBackend::with_max_key_length(100));
    let defaults = Defaults::new();
    defaults.set_backend(backend.clone()).set_enabled(true);
    defaults.set_max_key_size(100).unwrap();
    let cacher = Cacher::with_defaults(defaults);

    let key = "x".repeat(1900);
    set(&cacher, &key, json!("long"));

    assert_eq!(cacher.get(&key).unwrap(), json!("long"));
    assert!(backend.last_accessed_key().unwrap().len() <= 100);
}

#[test]
fn test_backend_rejects_key_over_its_own_limit() {
    let backend = Arc::new(RecordingBackend::with_max_key_length(10));
    let defaults = Defaults::new();
    defaults.set_backend(backend.clone()).set_enabled(true);
    let cacher = Cacher::with_defaults(defaults);

    let err = cacher.get("eleven_char").unwrap_err();
    assert!(matches!(err, CacherError::Backend(_)));
}

#[test]
fn test_builder_producer_stores_map() {
    let (cacher, _) = enabled_cacher();

    let built = cacher
        .set_building("report", &CallOptions::new(), |acc| {
            acc.insert("rows".to_string(), json!(3));
            Ok::<_, CacherError>(())
        })
        .unwrap();

    assert_eq!(built, json!({"rows": 3}));
    assert_eq!(cacher.get("report").unwrap(), json!({"rows": 3}));
}

#[test]
fn test_backend_options_forwarded() {
    let (cacher, backend) = enabled_cacher();
    let options = CallOptions::new().with_backend_option("expires_in", 300);

    cacher
        .get_with("foo", &options, || Ok::<_, CacherError>(json!(1)))
        .unwrap();

    let forwarded = backend.last_write_options().expect("write should be recorded");
    assert_eq!(forwarded.get("expires_in"), Some(&json!(300)));
    assert!(!forwarded.contains_key("break_cache"));
}

#[test]
fn test_break_cache_forces_write() {
    let (cacher, backend) = enabled_cacher();
    set(&cacher, "foo", json!(1));
    let reads_before = backend.reads();

    let value = cacher
        .get_with("foo", &CallOptions::forced(), || Ok::<_, CacherError>(json!(2)))
        .unwrap();

    assert_eq!(value, json!(2));
    assert_eq!(backend.reads(), reads_before);
    assert_eq!(cacher.get("foo").unwrap(), json!(2));
}

// ============================================================================
// MARSHALLING
// ============================================================================

#[test]
fn test_marshal_suffix() {
    let (cacher, backend) = marshalling_cacher();

    set(&cacher, "foo", json!(1));

    assert_eq!(backend.last_accessed_key().as_deref(), Some("foo/marshal"));
}

#[test]
fn test_marshals_value() {
    let (cacher, backend) = marshalling_cacher();

    set(&cacher, "foo", json!(1));

    let key = backend.last_accessed_key().unwrap();
    assert_eq!(backend.raw(&key), Some(Envelope::Marshalled(b"1".to_vec())));
}

#[test]
fn test_gets_marshalled_value_back() {
    let (cacher, _) = marshalling_cacher();

    set(&cacher, "foo", json!({"nested": [1, "two", null]}));

    assert_eq!(
        cacher.get("foo").unwrap(),
        json!({"nested": [1, "two", null]})
    );
}

#[test]
fn test_marshalled_nil_is_present() {
    let (cacher, _) = marshalling_cacher();

    set(&cacher, "foo", Value::Null);

    assert!(cacher.exists("foo").unwrap());
    assert_eq!(get_or(&cacher, "foo", json!("not_nil")), Value::Null);
}

#[test]
fn test_marshalled_hashed_key_keeps_suffix() {
    let (mut cacher, backend) = marshalling_cacher();
    cacher.config_mut().set_max_key_size(30).unwrap();

    set(&cacher, &"k".repeat(40), json!(true));

    let physical = backend.last_accessed_key().unwrap();
    assert!(physical.ends_with("/marshal"));
    assert_hashed_key(&physical);
}

#[test]
fn test_mode_switch_is_mismatch_not_garbage() {
    let (mut cacher, backend) = enabled_cacher();
    backend.insert_raw("foo/marshal", Envelope::Raw(json!(1)));
    cacher.config_mut().set_serialize(true);

    let err = cacher.get("foo").unwrap_err();
    assert!(err.is_deserialization());
}

// ============================================================================
// DISABLED
// ============================================================================

#[test]
fn test_disabled_nops_when_setting() {
    let (mut cacher, backend) = enabled_cacher();
    cacher.config_mut().disable();

    assert_eq!(cacher.get("foo").unwrap(), Value::Null);
    assert_eq!(set(&cacher, "foo", json!("bar")), json!("bar"));
    assert_eq!(cacher.get("foo").unwrap(), Value::Null);
    assert_eq!(backend.calls(), 0);
}

#[test]
fn test_disabled_runs_producer_every_time() {
    let (mut cacher, backend) = enabled_cacher();
    cacher.config_mut().disable();
    let counter = CallCounter::new();

    for _ in 0..3 {
        cacher
            .get_with("foo", &CallOptions::new(), || {
                Ok::<_, CacherError>(json!(counter.hit()))
            })
            .unwrap();
    }

    assert_eq!(counter.count(), 3);
    assert!(!cacher.exists("foo").unwrap());
    assert_eq!(backend.calls(), 0);
}

// ============================================================================
// BUSTING
// ============================================================================

#[test]
fn test_writes_through_when_busting() {
    let (cacher, _) = enabled_cacher();
    set(&cacher, "foo", json!(1));

    cacher.bust();
    get_or(&cacher, "foo", json!(2));
    cacher.unbust();

    assert_eq!(cacher.get("foo").unwrap(), json!(2));
}

#[test]
fn test_busts_within_scope() {
    let (cacher, _) = enabled_cacher();
    set(&cacher, "foo", json!(1));

    let inside = cacher.bust_scope(|| get_or(&cacher, "foo", json!(2)));

    assert_eq!(inside, json!(2));
    assert!(!cacher.is_busting());
    assert_eq!(cacher.get("foo").unwrap(), json!(2));
}

#[test]
fn test_bust_scope_clears_on_error() {
    let (cacher, _) = enabled_cacher();

    let result: Result<(), CacherError> = cacher.bust_scope(|| {
        assert!(cacher.is_busting());
        Err(CacherError::Serialization {
            reason: "boom".to_string(),
        })
    });

    assert!(result.is_err());
    assert!(!cacher.is_busting());
}

#[test]
fn test_bust_scope_clears_on_panic() {
    let (cacher, _) = enabled_cacher();

    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        cacher.bust_scope(|| panic!("producer failed"))
    }));

    assert!(result.is_err());
    assert!(!cacher.is_busting());
}

#[test]
fn test_busting_is_per_instance() {
    let (defaults, _) = enabled_defaults();
    let busted = Cacher::with_defaults(defaults.clone());
    let other = Cacher::with_defaults(defaults);

    busted.bust();

    assert!(busted.is_busting());
    assert!(!other.is_busting());
    busted.unbust();
}

#[test]
fn test_busting_is_thread_local() {
    let (cacher, _) = enabled_cacher();
    let cacher = Arc::new(cacher);
    set(&cacher, "foo", json!(1));

    cacher.bust();

    let shared = Arc::clone(&cacher);
    let seen = std::thread::spawn(move || {
        let busting = shared.is_busting();
        let value = shared
            .get_with("foo", &CallOptions::new(), || Ok::<_, CacherError>(json!(2)))
            .unwrap();
        (busting, value)
    })
    .join()
    .unwrap();

    assert_eq!(seen, (false, json!(1)));
    assert!(cacher.is_busting());
    cacher.unbust();
}

#[test]
fn test_worker_bust_guard_clears_before_thread_exits() {
    let (cacher, _) = enabled_cacher();
    let cacher = Arc::new(cacher);
    set(&cacher, "foo", json!(1));

    let shared = Arc::clone(&cacher);
    let seen = std::thread::spawn(move || {
        let forced = {
            let _guard = shared.bust_guard();
            get_or(&shared, "foo", json!(2))
        };
        (forced, shared.is_busting(), get_or(&shared, "foo", json!(3)))
    })
    .join()
    .unwrap();

    assert_eq!(seen, (json!(2), false, json!(2)));
    assert!(!cacher.is_busting());
}

#[test]
fn test_busting_without_producer_reads_nil() {
    let (cacher, backend) = enabled_cacher();
    set(&cacher, "foo", json!(1));
    let writes_before = backend.writes();

    let value = cacher.bust_scope(|| cacher.get("foo").unwrap());

    assert_eq!(value, Value::Null);
    assert_eq!(backend.writes(), writes_before);
    assert_eq!(cacher.get("foo").unwrap(), json!(1));
}

// ============================================================================
// BATCH READS
// ============================================================================

#[test]
fn test_get_multi_aligned_with_input() {
    let (cacher, backend) = enabled_cacher();
    set(&cacher, "b", json!("v"));

    let values = cacher.get_multi(&["a", "b", "c"]).unwrap();

    assert_eq!(values, vec![Value::Null, json!("v"), Value::Null]);
    assert_eq!(backend.batch_reads(), 1);
    assert_eq!(backend.reads(), 0);
}

#[test]
fn test_get_multi_duplicates_and_empty() {
    let (cacher, _) = enabled_cacher();
    set(&cacher, "b", json!(2));

    let values = cacher.get_multi(&["b", "a", "b"]).unwrap();
    assert_eq!(values, vec![json!(2), Value::Null, json!(2)]);

    let none: Vec<String> = Vec::new();
    assert!(cacher.get_multi(&none).unwrap().is_empty());
}

#[test]
fn test_get_multi_prepares_keys() {
    let (mut cacher, backend) = marshalling_cacher();
    cacher.config_mut().set_namespace("ns");
    set(&cacher, "one", json!(1));

    let values = cacher.get_multi(&["one", "two"]).unwrap();

    assert_eq!(values, vec![json!(1), Value::Null]);
    assert_eq!(
        backend.last_batch(),
        vec!["ns/one/marshal".to_string(), "ns/two/marshal".to_string()]
    );
}

#[test]
fn test_get_multi_decodes_nil_sentinel() {
    let (cacher, _) = enabled_cacher();
    set(&cacher, "nil", Value::Null);

    assert_eq!(cacher.get_multi(&["nil"]).unwrap(), vec![Value::Null]);
}

// ============================================================================
// CONCURRENCY
// ============================================================================

#[test]
fn test_concurrent_misses_all_return_a_value() {
    let (cacher, backend) = enabled_cacher();
    let cacher = Arc::new(cacher);

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let cacher = Arc::clone(&cacher);
            std::thread::spawn(move || {
                cacher
                    .get_with("shared", &CallOptions::new(), || Ok::<_, CacherError>(json!(i)))
                    .unwrap()
            })
        })
        .collect();

    for handle in handles {
        let value = handle.join().unwrap();
        assert!(value.is_i64());
    }

    assert_eq!(backend.keys(), vec!["shared".to_string()]);
    assert!(backend.writes() >= 1);
    assert!(backend.read("shared").unwrap().is_some());
}
