//! One-shot, resettable timers. Grounded in `loop_timer.cpp`: `start`
//! rejects a timeout under the minimum or a timer that's already running,
//! and firing is one-shot per `start`/`reset` -- the loop does not
//! auto-repeat a timer, the callback has to call `reset` again itself.

use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::error::Result;
use crate::handle::Handle;
use crate::reactor::Loop;

pub struct Timer {
    loop_: Weak<Loop>,
    handle: Handle,
}

impl Timer {
    /// Register a timer that is not yet running; call `start` or `reset`
    /// to arm it.
    pub fn new(loop_: &Arc<Loop>) -> Result<Timer> {
        let weak = Arc::downgrade(loop_);
        let handle = loop_.add_timer(crate::reactor::MIN_TIMER_TIMEOUT, Box::new(|| {}))?;
        loop_.timer_stop(handle)?;
        Ok(Timer { loop_: weak, handle })
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    /// Arm the timer with `timeout` and `callback`, replacing whatever
    /// callback a previous `start` registered. Fails with
    /// `TimeoutTooSmall` if below the loop's minimum.
    pub fn start(&self, timeout: Duration, callback: impl FnMut() + Send + 'static) -> Result<()> {
        let loop_ = self.upgrade()?;
        loop_.timer_replace(self.handle, timeout, Box::new(callback))
    }

    pub fn reset(&self, timeout: Option<Duration>) -> Result<()> {
        let loop_ = self.upgrade()?;
        loop_.timer_reset(self.handle, timeout)
    }

    pub fn stop(&self) -> Result<()> {
        let loop_ = self.upgrade()?;
        loop_.timer_stop(self.handle)
    }

    fn upgrade(&self) -> Result<Arc<Loop>> {
        self.loop_.upgrade().ok_or(crate::error::Error::NoSuchHandle)
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        if let Some(loop_) = self.loop_.upgrade() {
            let _ = loop_.timer_remove(self.handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Instant;

    #[test]
    fn timer_fires_once() {
        let loop_ = Loop::new().unwrap();
        let timer = Timer::new(&loop_).unwrap();
        let fired = Arc::new(AtomicBool::new(false));
        let fired2 = fired.clone();
        timer
            .start(crate::reactor::MIN_TIMER_TIMEOUT, move || {
                fired2.store(true, Ordering::SeqCst);
            })
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while !fired.load(Ordering::SeqCst) && Instant::now() < deadline {
            loop_.run_once(Some(Duration::from_millis(50))).unwrap();
        }
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn timeout_below_minimum_is_rejected() {
        let loop_ = Loop::new().unwrap();
        let timer = Timer::new(&loop_).unwrap();
        let err = timer.start(Duration::from_millis(1), || {}).unwrap_err();
        assert!(matches!(err, crate::error::Error::TimeoutTooSmall));
    }

    #[test]
    fn starting_an_already_running_timer_is_rejected() {
        let loop_ = Loop::new().unwrap();
        let timer = Timer::new(&loop_).unwrap();
        timer.start(Duration::from_secs(10), || {}).unwrap();
        let err = timer.start(Duration::from_secs(10), || {}).unwrap_err();
        assert!(matches!(err, crate::error::Error::AlreadyRunning));
    }

    #[test]
    fn stopping_then_starting_again_succeeds() {
        let loop_ = Loop::new().unwrap();
        let timer = Timer::new(&loop_).unwrap();
        timer.start(Duration::from_secs(10), || {}).unwrap();
        timer.stop().unwrap();
        timer.start(crate::reactor::MIN_TIMER_TIMEOUT, || {}).unwrap();
    }
}
