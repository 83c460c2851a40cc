//! Cross-thread signaled events: a handle any thread can `set()` to wake
//! the loop and run a callback on the loop thread. Built on the same
//! eventfd primitive the loop uses for its own wake-up, registered as an
//! ordinary resource instead of the loop-private one.

use std::sync::{Arc, Weak};

use crate::error::{Error, Result};
use crate::handle::Handle;
use crate::reactor::Loop;
use crate::ready::Ready;
use crate::sys::eventfd::EventFd;

pub struct Signal {
    loop_: Weak<Loop>,
    handle: Handle,
    fd: Arc<EventFd>,
}

impl Signal {
    pub fn new(loop_: &Arc<Loop>, mut callback: impl FnMut() + Send + 'static) -> Result<Signal> {
        use std::os::unix::io::AsRawFd;

        let fd = Arc::new(EventFd::new()?);
        let raw_fd = fd.as_raw_fd();

        let handle = loop_.add_resource(
            raw_fd,
            Ready::READABLE,
            Box::new(move |_h, _r| {
                callback();
            }),
        )?;

        Ok(Signal {
            loop_: Arc::downgrade(loop_),
            handle,
            fd,
        })
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    /// Wake the loop and invoke this signal's callback, from any thread.
    pub fn set(&self) -> Result<()> {
        self.fd.write(1).map_err(Error::from)
    }

    /// Drain the counter. Idempotent -- calling `clear` with nothing
    /// pending is not an error. The callback is invoked once per poll
    /// iteration for as long as the counter stays nonzero, so a callback
    /// that wants one-shot delivery calls this itself.
    pub fn clear(&self) -> Result<()> {
        self.fd.drain().map_err(Error::from)
    }
}

impl Drop for Signal {
    fn drop(&mut self) {
        if let Some(loop_) = self.loop_.upgrade() {
            let _ = loop_.remove_resource(self.handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    #[test]
    fn set_from_another_thread_invokes_callback() {
        let loop_ = Loop::new().unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        let signal = Arc::new(
            Signal::new(&loop_, move || {
                count2.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap(),
        );
        let signal_for_clear = signal.clone();

        let signal2 = signal.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            signal2.set().unwrap();
        });

        let deadline = Instant::now() + Duration::from_secs(2);
        while count.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
            loop_.run_once(Some(Duration::from_millis(50))).unwrap();
        }
        signal_for_clear.clear().unwrap();
        handle.join().unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn clear_after_clear_is_a_no_op() {
        let loop_ = Loop::new().unwrap();
        let signal = Signal::new(&loop_, || {}).unwrap();
        signal.set().unwrap();
        signal.clear().unwrap();
        signal.clear().unwrap();
    }

    #[test]
    fn callback_keeps_firing_until_cleared() {
        let loop_ = Loop::new().unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        let signal = Signal::new(&loop_, move || {
            count2.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        signal.set().unwrap();
        loop_.run_once(Some(Duration::from_millis(50))).unwrap();
        loop_.run_once(Some(Duration::from_millis(50))).unwrap();
        assert!(count.load(Ordering::SeqCst) >= 2);

        signal.clear().unwrap();
        count.store(0, Ordering::SeqCst);
        loop_.run_once(Some(Duration::from_millis(50))).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
