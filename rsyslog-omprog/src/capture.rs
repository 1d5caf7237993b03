use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::os::fd::OwnedFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use rsyslog_core::{Error, Result};

/// Chunk size for draining the capture pipe.
const CAPTURE_BUFFER_SIZE: usize = 4096;

struct OutputFile {
    path: PathBuf,
    create_mode: u32,
    file: Option<File>,
    /// Error latches so a persistent failure is reported once, not per
    /// chunk.
    open_err: bool,
    write_err: bool,
}

impl OutputFile {
    /// Write a chunk, lazily (re)opening the file. Chunks are discarded
    /// while the file cannot be opened.
    fn write_chunk(&mut self, chunk: &[u8]) {
        if self.file.is_none() {
            if self.open_err {
                return;
            }
            match OpenOptions::new()
                .append(true)
                .create(true)
                .mode(self.create_mode)
                .open(&self.path)
            {
                Ok(file) => self.file = Some(file),
                Err(e) => {
                    warn!(
                        file = %self.path.display(),
                        error = %e,
                        "error opening output file, program output will be discarded"
                    );
                    self.open_err = true;
                    return;
                }
            }
        }

        let file = self.file.as_mut().expect("file just opened");
        match file.write_all(chunk) {
            Ok(()) => {
                if self.write_err {
                    warn!(file = %self.path.display(), "resumed writing to output file");
                    self.write_err = false;
                }
            }
            Err(e) => {
                if !self.write_err {
                    warn!(
                        file = %self.path.display(),
                        error = %e,
                        "error writing to output file (subsequent errors will not be reported)"
                    );
                    self.write_err = true;
                }
            }
        }
    }

    /// Close the fd so the next chunk reopens the (possibly rotated) file.
    fn reopen(&mut self) {
        debug!(file = %self.path.display(), "reopening output file");
        self.file = None;
        self.open_err = false;
    }
}

struct CaptureShared {
    output: Mutex<OutputFile>,
    running: Mutex<bool>,
    term: Condvar,
}

/// Captures the stdout/stderr of all child processes of one instance
/// through a shared pipe and appends it to a file.
///
/// Lines stay unmangled in the output as long as children emit them with
/// single `write` calls shorter than `PIPE_BUF`; longer or split writes may
/// interleave, and no correction is attempted.
pub(crate) struct OutputCapture {
    shared: Arc<CaptureShared>,
    /// Write end handed to children; closing it (end of capture) is what
    /// lets the reader thread see EOF once the last child exits.
    write_end: Mutex<Option<OwnedFd>>,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl OutputCapture {
    pub fn new(path: PathBuf, create_mode: u32) -> Self {
        OutputCapture {
            shared: Arc::new(CaptureShared {
                output: Mutex::new(OutputFile {
                    path,
                    create_mode,
                    file: None,
                    open_err: false,
                    write_err: false,
                }),
                running: Mutex::new(false),
                term: Condvar::new(),
            }),
            write_end: Mutex::new(None),
            thread: Mutex::new(None),
        }
    }

    /// Create the pipe and start the reader thread. Idempotent; the first
    /// worker to attach wins.
    pub fn start_once(&self) -> Result<()> {
        let mut thread_slot = self.thread.lock().unwrap();
        if thread_slot.is_some() {
            return Ok(());
        }

        let (read_end, write_end) = nix::unistd::pipe().map_err(std::io::Error::from)?;
        *self.write_end.lock().unwrap() = Some(write_end);
        *self.shared.running.lock().unwrap() = true;

        let shared = self.shared.clone();
        let handle = thread::Builder::new()
            .name("omprog-capture".to_string())
            .spawn(move || capture_main(shared, File::from(read_end)))
            .map_err(|e| Error::Internal(format!("cannot spawn capture thread: {e}")))?;
        *thread_slot = Some(handle);
        Ok(())
    }

    /// Clone of the pipe's write end, for wiring up a child's stdio.
    pub fn child_fd(&self) -> Result<OwnedFd> {
        let guard = self.write_end.lock().unwrap();
        let fd = guard
            .as_ref()
            .ok_or_else(|| Error::Internal("output capture is not running".to_string()))?;
        Ok(fd.try_clone().map_err(std::io::Error::from)?)
    }

    /// HUP support: the output file is closed so the next write reopens
    /// it, which follows an external rotation.
    pub fn reopen_file(&self) {
        self.shared.output.lock().unwrap().reopen();
    }

    /// Close our write end and wait for the reader to drain the pipe and
    /// exit. A child that neither exits nor closes its pipe end would stall
    /// this forever, so the wait is bounded; on timeout the thread is
    /// abandoned (it exits once the child finally goes away).
    pub fn end(&self, timeout_ms: u64) {
        let Some(handle) = self.thread.lock().unwrap().take() else {
            return;
        };
        drop(self.write_end.lock().unwrap().take());

        let deadline = Duration::from_millis(timeout_ms);
        let mut running = self.shared.running.lock().unwrap();
        let mut timed_out = false;
        while *running && !timed_out {
            let (guard, wait) = self
                .shared
                .term
                .wait_timeout(running, deadline)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            running = guard;
            timed_out = wait.timed_out();
        }
        let still_running = *running;
        drop(running);

        if still_running {
            warn!("abandoning output capture thread, a child process is unresponsive");
            drop(handle);
        } else {
            let _ = handle.join();
        }
    }
}

/// Reader loop: drain the pipe until every write end is closed, appending
/// each chunk to the output file.
fn capture_main(shared: Arc<CaptureShared>, mut pipe: File) {
    debug!("output capture thread started");
    let mut buf = [0u8; CAPTURE_BUFFER_SIZE];
    let mut read_err = false;
    loop {
        match pipe.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if read_err {
                    warn!("resumed capturing output from program");
                    read_err = false;
                }
                shared.output.lock().unwrap().write_chunk(&buf[..n]);
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                if !read_err {
                    warn!(
                        error = %e,
                        "error capturing output from program (subsequent errors will not be reported)"
                    );
                    read_err = true;
                }
            }
        }
    }
    debug!("all capture pipe ends closed, output capture thread exiting");

    let mut running = shared.running.lock().unwrap();
    *running = false;
    shared.term.notify_all();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::fd::AsFd;

    #[test]
    fn captures_writes_until_all_ends_close() {
        let dir = tempfile::tempdir().unwrap();
        let out_path = dir.path().join("capture.log");
        let capture = OutputCapture::new(out_path.clone(), 0o600);
        capture.start_once().unwrap();
        capture.start_once().unwrap(); // idempotent

        // two simulated children holding clones of the write end
        let fd1 = capture.child_fd().unwrap();
        let fd2 = capture.child_fd().unwrap();
        nix::unistd::write(fd1.as_fd(), b"child one\n").unwrap();
        nix::unistd::write(fd2.as_fd(), b"child two\n").unwrap();
        drop(fd1);
        drop(fd2);

        capture.end(2_000);

        let content = std::fs::read_to_string(&out_path).unwrap();
        assert!(content.contains("child one\n"));
        assert!(content.contains("child two\n"));
    }

    #[test]
    fn reopen_follows_rotation() {
        let dir = tempfile::tempdir().unwrap();
        let out_path = dir.path().join("capture.log");
        let capture = OutputCapture::new(out_path.clone(), 0o600);
        capture.start_once().unwrap();

        let fd = capture.child_fd().unwrap();
        nix::unistd::write(fd.as_fd(), b"before rotation\n").unwrap();

        // wait until the first chunk landed, then rotate the file away
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while !out_path.exists() && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        let rotated = dir.path().join("capture.log.1");
        std::fs::rename(&out_path, &rotated).unwrap();
        capture.reopen_file();

        nix::unistd::write(fd.as_fd(), b"after rotation\n").unwrap();
        drop(fd);
        capture.end(2_000);

        assert!(std::fs::read_to_string(&rotated)
            .unwrap()
            .contains("before rotation"));
        assert!(std::fs::read_to_string(&out_path)
            .unwrap()
            .contains("after rotation"));
    }
}
