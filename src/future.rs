//! One-shot deferred calls. Grounded in `loop_future.cpp`: `execute`
//! schedules a single callback to run from the loop thread after `delay`
//! (zero meaning "next iteration"), and `wait_for` blocks the calling
//! thread on a condvar until the loop has run it.

use std::sync::{Arc, Condvar, Mutex, Weak};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::reactor::Loop;

pub struct Future {
    loop_: Weak<Loop>,
    finished: Arc<(Mutex<bool>, Condvar)>,
}

impl Future {
    /// Schedule `callback` to run on the loop thread after `delay`.
    pub fn execute(loop_: &Arc<Loop>, delay: Duration, callback: impl FnOnce() + Send + 'static) -> Result<Future> {
        let (_handle, finished) = loop_.execute_later(delay, Box::new(callback))?;
        Ok(Future {
            loop_: Arc::downgrade(loop_),
            finished,
        })
    }

    /// Block until the scheduled callback has run, or `timeout` elapses.
    /// Returns `true` if it ran.
    pub fn wait_for(&self, timeout: Duration) -> bool {
        let (lock, cvar) = &*self.finished;
        let guard = lock.lock().unwrap();
        if *guard {
            return true;
        }
        let (guard, result) = cvar.wait_timeout_while(guard, timeout, |done| !*done).unwrap();
        let _ = guard;
        !result.timed_out()
    }

    pub fn is_finished(&self) -> bool {
        *self.finished.0.lock().unwrap()
    }
}

impl Drop for Future {
    fn drop(&mut self) {
        if self.is_finished() {
            return;
        }
        // Best-effort: if the loop is gone there's nothing left to cancel.
        let _ = self.loop_.upgrade();
    }
}

/// Convenience free function mirroring `looper::execute_later`.
pub fn execute_later(loop_: &Arc<Loop>, delay: Duration, callback: impl FnOnce() + Send + 'static) -> Result<Future> {
    Future::execute(loop_, delay, callback)
}

/// Convenience wrapper returning an error if the loop handle is stale.
pub fn require_loop(loop_: &Weak<Loop>) -> Result<Arc<Loop>> {
    loop_.upgrade().ok_or(Error::NoSuchHandle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Instant;

    #[test]
    fn executes_once_and_wait_for_observes_it() {
        let loop_ = Loop::new().unwrap();
        let ran = Arc::new(AtomicBool::new(false));
        let ran2 = ran.clone();
        let future = Future::execute(&loop_, Duration::from_millis(1), move || {
            ran2.store(true, Ordering::SeqCst);
        })
        .unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while !future.is_finished() && Instant::now() < deadline {
            loop_.run_once(Some(Duration::from_millis(20))).unwrap();
        }
        assert!(future.wait_for(Duration::from_millis(1)));
        assert!(ran.load(Ordering::SeqCst));
    }
}
