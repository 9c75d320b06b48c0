//! Process-wide defaults.
//!
//! Kept in its own test binary with a single test: the global defaults are
//! shared by every test in a binary.

use std::sync::Arc;

use cacher_storage::{Cacher, CacherError, CallOptions, Defaults, Namespace};
use cacher_test_utils::RecordingBackend;
use serde_json::json;

#[test]
fn test_global_defaults_are_late_bound() {
    let defaults = Defaults::global();
    defaults.reset();

    let cacher = Cacher::new();
    assert!(!cacher.config().namespaced());

    defaults.set_namespace("global");
    assert!(Cacher::new().config().namespaced());
    assert_eq!(Cacher::new().config().namespace(), Namespace::named("global"));
    assert!(cacher.config().namespaced());

    let backend = Arc::new(RecordingBackend::new());
    defaults
        .configure(|d| {
            d.set_backend(backend.clone()).set_enabled(true);
            Ok(())
        })
        .unwrap();
    assert!(defaults.has_backend());

    cacher
        .set_with("foo", &CallOptions::new(), || Ok::<_, CacherError>(json!(1)))
        .unwrap();
    assert_eq!(backend.keys(), vec!["global/foo".to_string()]);

    defaults.reset();
    assert!(!defaults.has_backend());
    assert!(!cacher.config().enabled());
    assert!(!cacher.config().namespaced());
}
