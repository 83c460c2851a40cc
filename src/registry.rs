//! Process-wide registry of live loops, keyed by [`Loop::id`]. Lets code
//! running on one thread hand another thread a bare `u32` (over a channel,
//! a thread-local, wherever) and have it look the loop back up rather than
//! having to thread an `Arc<Loop>`/`Weak<Loop>` through unrelated state.
//!
//! Same shape as [`crate::sip::registry`]: an explicit `OnceLock`-backed
//! table populated as loops are constructed, rather than the original's
//! single static `loop_context` instance -- this crate allows more than
//! one loop per process, so "the" loop has to become "a" loop, looked up
//! by id.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, Weak};

use crate::reactor::Loop;

static LOOPS: OnceLock<Mutex<HashMap<u32, Weak<Loop>>>> = OnceLock::new();

fn table() -> &'static Mutex<HashMap<u32, Weak<Loop>>> {
    LOOPS.get_or_init(|| Mutex::new(HashMap::new()))
}

pub(crate) fn register(loop_: &Arc<Loop>) {
    table().lock().unwrap().insert(loop_.id(), Arc::downgrade(loop_));
}

pub(crate) fn unregister(id: u32) {
    table().lock().unwrap().remove(&id);
}

/// Looks up a still-live loop by id. Returns `None` once every `Arc<Loop>`
/// for that id has been dropped, even if the entry hasn't been pruned yet.
pub fn try_get_loop(id: u32) -> Option<Arc<Loop>> {
    table().lock().unwrap().get(&id).and_then(Weak::upgrade)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn a_registered_loop_is_found_by_id_and_disappears_once_dropped() {
        let loop_ = Loop::new().unwrap();
        let id = loop_.id();
        assert!(try_get_loop(id).is_some());
        drop(loop_);
        // give any stray Arc a chance to actually drop before asserting.
        std::thread::sleep(Duration::from_millis(10));
        assert!(try_get_loop(id).is_none());
    }

    #[test]
    fn an_unknown_id_is_not_found() {
        assert!(try_get_loop(u32::MAX).is_none());
    }
}
