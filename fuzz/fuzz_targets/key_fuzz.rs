//! Fuzz test for key preparation
//!
//! Feeds arbitrary logical keys and limits through the key preparer and
//! checks the layout invariants hold for every input.
//!
//! Run with: cargo +nightly fuzz run key_fuzz -- -max_total_time=60

#![no_main]

use cacher_core::{Namespace, Settings, HASHED_KEY_PREFIX, MARSHAL_SUFFIX};
use cacher_storage::{hashed_key, KeyPreparer};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Some((&flags, rest)) = data.split_first() else {
        return;
    };
    let Ok(key) = std::str::from_utf8(rest) else {
        return;
    };

    let settings = Settings {
        namespace: if flags & 1 == 1 {
            Namespace::named("fuzz")
        } else {
            Namespace::Disabled
        },
        max_key_size: usize::from(flags >> 2) + 1,
        serialize: flags & 2 == 2,
        enabled: true,
    };
    let preparer = KeyPreparer::new(&settings);
    let physical = preparer.prepare(key);

    // Deterministic
    assert_eq!(physical, preparer.prepare(key));

    if settings.serialize {
        assert!(physical.as_str().ends_with(MARSHAL_SUFFIX));
    }

    if physical.is_hashed() {
        assert!(preparer.decorate(key).len() > settings.max_key_size);
        assert_eq!(physical.as_str(), preparer.decorate(&hashed_key(key)));
        assert!(physical.as_str().contains(HASHED_KEY_PREFIX));
    } else {
        assert!(physical.len() <= settings.max_key_size);
    }
});
