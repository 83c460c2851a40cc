//! An epoll-based event loop: timers, one-shot futures, signal delivery,
//! non-blocking TCP/UNIX stream and UDP datagram sockets, file I/O, and a
//! small SIP (RFC 3261) session layer built on top of the same primitives.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use loopio::{Loop, Timer};
//!
//! let loop_ = Loop::new().unwrap();
//! let timer = Timer::new(&loop_).unwrap();
//! timer.start(Duration::from_millis(100), || println!("tick")).unwrap();
//!
//! loop_.run_once(Some(Duration::from_millis(200))).unwrap();
//! ```

mod sys;

pub mod error;
pub mod handle;
pub mod ready;
pub mod reactor;
pub mod timer;
pub mod future;
pub mod signal;
pub mod io;
pub mod net;
pub mod fs;
pub mod sip;
pub mod registry;

pub use error::{Error, Result};
pub use handle::Handle;
pub use ready::Ready;
pub use reactor::{EventsUpdate, Loop, ReactorConfig};
pub use timer::Timer;
pub use future::Future;
pub use signal::Signal;
pub use registry::try_get_loop;
