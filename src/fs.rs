//! File I/O. Grounded in `os_interface.h`'s `file` namespace
//! (`open_mode`/`file_attributes`/`seek_whence`, `create`/`seek`/`tell`/
//! `read`/`write`).
//!
//! Open Question resolved here: Linux `epoll` rejects regular files
//! (`EPERM`), so there is no readiness to wait for in the first place.
//! `start_read` issues its reads synchronously rather than waiting on the
//! poller, but still mirrors the stream/datagram contract: one persistent
//! callback fed chunk after chunk until `stop_read`, `Eof`, or an error,
//! each delivered through a zero-delay [`Future`] so every file completion
//! is dispatched from the loop thread, never from whatever thread happened
//! to call `start_read`/`write`.

use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::Path;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::future::Future;
use crate::reactor::Loop;

#[derive(Copy, Clone, Eq, PartialEq, Default)]
pub struct OpenMode(u8);

impl OpenMode {
    pub const READ: OpenMode = OpenMode(1);
    pub const WRITE: OpenMode = OpenMode(2);
    pub const APPEND: OpenMode = OpenMode(4);
    pub const CREATE: OpenMode = OpenMode(8);

    pub fn contains(self, other: OpenMode) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for OpenMode {
    type Output = OpenMode;
    fn bitor(self, rhs: OpenMode) -> OpenMode {
        OpenMode(self.0 | rhs.0)
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum FileAttributes {
    None,
    Directory,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum SeekWhence {
    Begin,
    Current,
    End,
}

struct Inner {
    file: std::fs::File,
    reading: bool,
    read_callback: Option<Box<dyn FnMut(Result<&[u8]>) + Send>>,
}

pub struct File {
    loop_: Weak<Loop>,
    inner: Arc<Mutex<Inner>>,
}

impl File {
    pub fn open(loop_: &Arc<Loop>, path: impl AsRef<Path>, mode: OpenMode, attributes: FileAttributes) -> Result<File> {
        let mut options = OpenOptions::new();
        options.read(mode.contains(OpenMode::READ));
        options.write(mode.contains(OpenMode::WRITE));
        options.append(mode.contains(OpenMode::APPEND));
        options.create(mode.contains(OpenMode::CREATE));

        if attributes == FileAttributes::Directory {
            options.custom_flags(libc::O_DIRECTORY);
        }

        let file = options.open(path).map_err(Error::from)?;
        Ok(File {
            loop_: Arc::downgrade(loop_),
            inner: Arc::new(Mutex::new(Inner {
                file,
                reading: false,
                read_callback: None,
            })),
        })
    }

    pub fn seek(&self, offset: u64, whence: SeekWhence) -> Result<u64> {
        let pos = match whence {
            SeekWhence::Begin => SeekFrom::Start(offset),
            SeekWhence::Current => SeekFrom::Current(offset as i64),
            SeekWhence::End => SeekFrom::End(offset as i64),
        };
        self.inner.lock().unwrap().file.seek(pos).map_err(Error::from)
    }

    pub fn tell(&self) -> Result<u64> {
        self.inner.lock().unwrap().file.stream_position().map_err(Error::from)
    }

    /// Feed `callback` chunks of up to `max_len` bytes, read synchronously
    /// one at a time and each delivered from a future loop iteration, until
    /// `stop_read` is called or the read hits `Eof`/an error.
    pub fn start_read(&self, max_len: usize, callback: impl FnMut(Result<&[u8]>) + Send + 'static) -> Result<()> {
        let loop_ = self.upgrade()?;
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.reading {
                return Err(Error::AlreadyReading);
            }
            inner.reading = true;
            inner.read_callback = Some(Box::new(callback));
        }
        schedule_read(&loop_, &self.inner, max_len)
    }

    pub fn stop_read(&self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.reading = false;
        inner.read_callback = None;
        Ok(())
    }

    /// Write `data` right now and deliver the result from a future loop
    /// iteration.
    pub fn write(&self, data: Vec<u8>, callback: impl FnOnce(Result<usize>) + Send + 'static) -> Result<()> {
        let loop_ = self.upgrade()?;
        let outcome = {
            let mut inner = self.inner.lock().unwrap();
            inner.file.write(&data).map_err(Error::from)
        };
        Future::execute(&loop_, Duration::from_millis(0), move || callback(outcome))?;
        Ok(())
    }

    pub fn set_permissions_mode(&self, mode: u32) -> Result<()> {
        let inner = self.inner.lock().unwrap();
        let mut perms = inner.file.metadata().map_err(Error::from)?.permissions();
        perms.set_mode(mode);
        inner.file.set_permissions(perms).map_err(Error::from)
    }

    fn upgrade(&self) -> Result<Arc<Loop>> {
        self.loop_.upgrade().ok_or(Error::NoSuchHandle)
    }
}

fn schedule_read(loop_: &Arc<Loop>, inner: &Arc<Mutex<Inner>>, max_len: usize) -> Result<()> {
    let weak_loop = loop_.downgrade();
    let inner = inner.clone();
    Future::execute(loop_, Duration::from_millis(0), move || {
        drive_read(&weak_loop, &inner, max_len);
    })?;
    Ok(())
}

/// One synchronous read, delivered with the `Inner` lock released --
/// mirrors the take/drop-lock/invoke discipline `io::do_read` uses, so a
/// callback that calls `stop_read` or `write` on this same file from
/// inside itself never deadlocks on its own mutex.
fn drive_read(loop_: &Weak<Loop>, inner: &Arc<Mutex<Inner>>, max_len: usize) {
    let mut guard = inner.lock().unwrap();
    if !guard.reading {
        return;
    }

    let mut buf = vec![0u8; max_len];
    let read_result = guard.file.read(&mut buf);

    match read_result {
        Ok(0) => {
            guard.reading = false;
            let callback = guard.read_callback.take();
            drop(guard);
            if let Some(mut cb) = callback {
                cb(Err(Error::Eof));
            }
        }
        Ok(n) => {
            let mut callback = guard.read_callback.take();
            drop(guard);
            if let Some(cb) = callback.as_mut() {
                cb(Ok(&buf[..n]));
            }

            let mut reschedule = false;
            if let Some(cb) = callback {
                let mut guard = inner.lock().unwrap();
                if guard.read_callback.is_none() && guard.reading {
                    guard.read_callback = Some(cb);
                    reschedule = true;
                }
            }
            if reschedule {
                if let Some(loop_arc) = loop_.upgrade() {
                    let _ = schedule_read(&loop_arc, inner, max_len);
                }
            }
        }
        Err(e) => {
            guard.reading = false;
            let callback = guard.read_callback.take();
            drop(guard);
            if let Some(mut cb) = callback {
                cb(Err(Error::from(e)));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Instant;

    #[test]
    fn write_then_read_back() {
        let loop_ = Loop::new().unwrap();
        let path = std::env::temp_dir().join(format!("loopio-fs-test-{}", std::process::id()));

        let file = File::open(
            &loop_,
            &path,
            OpenMode::READ | OpenMode::WRITE | OpenMode::CREATE,
            FileAttributes::None,
        )
        .unwrap();

        let wrote = Arc::new(AtomicBool::new(false));
        let wrote2 = wrote.clone();
        file.write(b"hello".to_vec(), move |r| {
            assert!(r.is_ok());
            wrote2.store(true, Ordering::SeqCst);
        })
        .unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while !wrote.load(Ordering::SeqCst) && Instant::now() < deadline {
            loop_.run_once(Some(Duration::from_millis(20))).unwrap();
        }
        assert!(wrote.load(Ordering::SeqCst));

        file.seek(0, SeekWhence::Begin).unwrap();
        let read_back: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
        let read_back2 = read_back.clone();
        let eof = Arc::new(AtomicBool::new(false));
        let eof2 = eof.clone();
        file.start_read(16, move |r| match r {
            Ok(bytes) => read_back2.lock().unwrap().extend_from_slice(bytes),
            Err(_) => eof2.store(true, Ordering::SeqCst),
        })
        .unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while !eof.load(Ordering::SeqCst) && Instant::now() < deadline {
            loop_.run_once(Some(Duration::from_millis(20))).unwrap();
        }
        assert_eq!(&*read_back.lock().unwrap(), b"hello");
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn starting_a_read_twice_is_rejected() {
        let loop_ = Loop::new().unwrap();
        let path = std::env::temp_dir().join(format!("loopio-fs-test-double-{}", std::process::id()));
        let file = File::open(&loop_, &path, OpenMode::READ | OpenMode::CREATE, FileAttributes::None).unwrap();

        file.start_read(16, |_| {}).unwrap();
        let err = file.start_read(16, |_| {}).unwrap_err();
        assert!(matches!(err, Error::AlreadyReading));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn stop_read_after_stop_read_is_a_no_op() {
        let loop_ = Loop::new().unwrap();
        let path = std::env::temp_dir().join(format!("loopio-fs-test-stop-{}", std::process::id()));
        let file = File::open(&loop_, &path, OpenMode::READ | OpenMode::CREATE, FileAttributes::None).unwrap();

        file.start_read(16, |_| {}).unwrap();
        file.stop_read().unwrap();
        file.stop_read().unwrap();
        let _ = std::fs::remove_file(&path);
    }
}
