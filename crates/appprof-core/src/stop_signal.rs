//! Cancellation of an in-progress collection.
//!
//! The orchestrator cancels a collection by writing to, or closing, the
//! write end of a descriptor whose read end the sandboxed process holds. A
//! detached thread blocks on that descriptor and terminates the process as
//! soon as it becomes readable.
//!
//! Blocking reads on files and pipes cannot be interrupted from another
//! thread with the standard library, so the collection loop does not poll a
//! token. Termination is abrupt: nothing is flushed and the data directory
//! is left in place. This is safe because the archive index is only written
//! after the last entry finishes; a killed collection leaves output without
//! an index, which no ZIP reader accepts.

use std::fs::File;
use std::io::{self, ErrorKind, Read};
use std::os::fd::OwnedFd;
use std::thread::{self, JoinHandle};

/// Exit status used when a collection is cancelled.
pub const CANCELLED_EXIT_CODE: i32 = 1;

/// Background watcher for the cancellation descriptor.
pub struct StopSignalWatcher;

impl StopSignalWatcher {
    /// Spawn a thread that runs `on_stop` once `source` yields data or EOF.
    ///
    /// Read errors other than interrupts also count as a stop request.
    pub fn watch<R, F>(mut source: R, on_stop: F) -> io::Result<JoinHandle<()>>
    where
        R: Read + Send + 'static,
        F: FnOnce() + Send + 'static,
    {
        thread::Builder::new()
            .name("stop-signal".into())
            .spawn(move || {
                let mut byte = [0u8; 1];
                loop {
                    match source.read(&mut byte) {
                        Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                        _ => break,
                    }
                }
                on_stop();
            })
    }

    /// Install the watcher on `fd`, exiting the process with
    /// [`CANCELLED_EXIT_CODE`] when it fires. The thread is detached.
    pub fn install(fd: OwnedFd) -> io::Result<()> {
        Self::watch(File::from(fd), || std::process::exit(CANCELLED_EXIT_CODE))?;
        Ok(())
    }
}
