//! Per-thread bust flags.
//!
//! A busting configuration treats every read as a miss and writes through.
//! Flags live in thread-local storage keyed by [`ConfigId`], so a flag set on
//! one thread is never observed by another thread sharing the same instance.
//! Only the thread that set a flag can clear it; [`BustGuard`] ties the
//! clearing to a scope on that thread.

use std::cell::RefCell;
use std::collections::HashMap;

use tracing::trace;

use super::config::ConfigId;

thread_local! {
    static BUST_FLAGS: RefCell<HashMap<ConfigId, bool>> = RefCell::new(HashMap::new());
}

/// Mark `id` as busting on the current thread.
pub(crate) fn bust(id: ConfigId) {
    BUST_FLAGS.with(|flags| {
        flags.borrow_mut().insert(id, true);
    });
    trace!(config_id = id.as_u64(), "Busting enabled");
}

/// Clear the busting flag for `id` on the current thread.
pub(crate) fn unbust(id: ConfigId) {
    let removed = BUST_FLAGS.with(|flags| flags.borrow_mut().remove(&id).is_some());
    if removed {
        trace!(config_id = id.as_u64(), "Busting cleared");
    }
}

/// Whether `id` is busting on the current thread.
pub(crate) fn is_busting(id: ConfigId) -> bool {
    BUST_FLAGS.with(|flags| flags.borrow().get(&id).copied().unwrap_or(false))
}

/// Clears the bust flag for one configuration when dropped, including
/// during unwinding.
#[must_use = "the flag is cleared as soon as the guard is dropped"]
#[derive(Debug)]
pub struct BustGuard {
    id: ConfigId,
}

impl BustGuard {
    /// Set the flag and return the guard that clears it.
    pub(crate) fn new(id: ConfigId) -> Self {
        bust(id);
        Self { id }
    }
}

impl Drop for BustGuard {
    fn drop(&mut self) {
        unbust(self.id);
    }
}
