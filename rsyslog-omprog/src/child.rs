use std::io::{ErrorKind, Read, Write};
use std::os::fd::{AsFd, OwnedFd};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::signal::{kill, SigSet, SigmaskHow, Signal};
use nix::unistd::Pid;
use tracing::{debug, warn};

use rsyslog_core::{Error, OutputStatus, Result};

use crate::config::ProgConfig;

/// Status lines longer than this force a child restart.
const RESPONSE_LINE_BUFFER_SIZE: usize = 4096;

/// A running child process with its pipes.
pub(crate) struct ChildHandle {
    child: Child,
}

impl ChildHandle {
    fn pid(&self) -> Pid {
        Pid::from_raw(self.child.id() as i32)
    }
}

/// Holder for one child slot. Workers either own a cell each or share one
/// (behind the instance mutex) when `force_single_instance` is set.
pub(crate) struct ChildCell {
    cfg: Arc<ProgConfig>,
    running: Option<ChildHandle>,
}

/// Outcome of reading one status line, before any lifecycle reaction.
enum ReadOutcome {
    Line(String),
    Timeout,
    Eof,
    Multiline,
    Overlong,
    IoError(std::io::Error),
}

impl ChildCell {
    pub fn new(cfg: Arc<ProgConfig>) -> Self {
        ChildCell { cfg, running: None }
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Start the child unless it is already running. `capture_fd` is the
    /// write end of the instance's output-capture pipe, if capturing is
    /// configured.
    pub fn ensure_started(&mut self, capture_fd: Option<&OwnedFd>) -> Result<()> {
        if self.running.is_some() {
            return Ok(());
        }

        debug!(
            binary = %self.cfg.binary.display(),
            args = self.cfg.args.len(),
            "starting child process"
        );

        let mut command = Command::new(&self.cfg.binary);
        command.args(&self.cfg.args);
        command.stdin(Stdio::piped());

        let output_stdio = |fd: Option<&OwnedFd>| -> std::io::Result<Stdio> {
            match fd {
                Some(fd) => Ok(Stdio::from(fd.try_clone()?)),
                None => Ok(Stdio::null()),
            }
        };

        if self.cfg.confirm_messages {
            command.stdout(Stdio::piped());
        } else {
            command.stdout(output_stdio(capture_fd)?);
        }
        command.stderr(output_stdio(capture_fd)?);

        // the child must start with an unblocked signal mask; exec resets
        // dispositions but inherits the mask
        unsafe {
            use std::os::unix::process::CommandExt;
            command.pre_exec(|| {
                let empty = SigSet::empty();
                sigprocmask(&empty)?;
                Ok(())
            });
        }

        let child = command.spawn().map_err(|e| {
            Error::Suspended(format!(
                "failed to execute program '{}': {e}",
                self.cfg.binary.display()
            ))
        })?;
        self.running = Some(ChildHandle { child });

        if self.cfg.confirm_messages {
            // the program confirms successful initialization before the
            // first record is sent
            if let Err(e) = self.read_status() {
                if self.running.is_some() {
                    self.terminate();
                }
                return Err(e);
            }
        }
        Ok(())
    }

    /// Write bytes to the child's stdin, retrying on EINTR. A broken pipe
    /// means the child died: it is reaped and the action suspended so the
    /// host retries after a resume.
    pub fn send(&mut self, bytes: &[u8]) -> Result<()> {
        let write_result = {
            let Some(handle) = self.running.as_mut() else {
                return Err(Error::Suspended("child process is not running".to_string()));
            };
            let Some(stdin) = handle.child.stdin.as_mut() else {
                return Err(Error::Internal("child has no stdin pipe".to_string()));
            };
            write_all_retry(stdin, bytes)
        };

        match write_result {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::BrokenPipe => {
                warn!(
                    binary = %self.cfg.binary.display(),
                    "program terminated, will be restarted"
                );
                self.cleanup();
                Err(Error::Suspended("child process terminated".to_string()))
            }
            Err(e) => {
                warn!(error = %e, "error sending message to program");
                Err(Error::Suspended(format!("cannot write to child stdin: {e}")))
            }
        }
    }

    /// Read and interpret one status line from the child's stdout.
    pub fn read_status(&mut self) -> Result<OutputStatus> {
        let cfg = self.cfg.clone();
        let Some(handle) = self.running.as_mut() else {
            return Err(Error::Suspended("child process is not running".to_string()));
        };

        match read_status_line(handle, cfg.confirm_timeout_ms) {
            ReadOutcome::Line(line) => line_to_status(&cfg, &line),
            ReadOutcome::Timeout => {
                warn!(
                    binary = %cfg.binary.display(),
                    timeout_ms = cfg.confirm_timeout_ms,
                    "program did not respond within timeout, will be restarted"
                );
                self.terminate();
                Err(Error::Suspended("child response timeout".to_string()))
            }
            ReadOutcome::Eof => {
                warn!(
                    binary = %cfg.binary.display(),
                    "program terminated, will be restarted"
                );
                self.cleanup();
                Err(Error::Suspended("child closed its stdout".to_string()))
            }
            ReadOutcome::Multiline => {
                warn!(
                    binary = %cfg.binary.display(),
                    "program returned a multiline response, will be restarted"
                );
                self.terminate();
                Err(Error::Suspended("multiline child response".to_string()))
            }
            ReadOutcome::Overlong => {
                warn!(
                    binary = %cfg.binary.display(),
                    "program returned a too long response, will be restarted"
                );
                self.terminate();
                Err(Error::Suspended("overlong child response".to_string()))
            }
            ReadOutcome::IoError(e) => {
                warn!(error = %e, "error reading response from program");
                Err(Error::Suspended(format!(
                    "cannot read child response: {e}"
                )))
            }
        }
    }

    /// Send the configured close signal (if any), close the pipes and wait
    /// for the child to go away.
    pub fn terminate(&mut self) {
        let Some(handle) = self.running.as_ref() else {
            return;
        };
        debug!(pid = handle.child.id(), "terminating child");
        if self.cfg.signal_on_close {
            let _ = kill(handle.pid(), Signal::SIGTERM);
        }
        self.cleanup();
    }

    /// Forward an arbitrary signal (HUP forwarding).
    pub fn forward_signal(&self, signal: Signal) {
        if let Some(handle) = self.running.as_ref() {
            debug!(pid = handle.child.id(), ?signal, "forwarding signal to child");
            let _ = kill(handle.pid(), signal);
        }
    }

    /// Close the pipes (so the child sees EOF) and reap it: poll every
    /// 10 ms up to `close_timeout_ms`, then either SIGKILL and wait, or
    /// give up on it.
    fn cleanup(&mut self) {
        let Some(mut handle) = self.running.take() else {
            return;
        };
        drop(handle.child.stdin.take());
        drop(handle.child.stdout.take());

        let mut waited = 0u64;
        loop {
            match handle.child.try_wait() {
                Ok(Some(status)) => {
                    debug!(?status, "child exited");
                    return;
                }
                Ok(None) => {}
                Err(_) => return,
            }
            if waited >= self.cfg.close_timeout_ms {
                break;
            }
            thread::sleep(Duration::from_millis(10));
            waited += 10;
        }

        if self.cfg.kill_unresponsive {
            warn!(
                binary = %self.cfg.binary.display(),
                pid = handle.child.id(),
                timeout_ms = self.cfg.close_timeout_ms,
                "program did not terminate within timeout, killing it"
            );
            let _ = kill(handle.pid(), Signal::SIGKILL);
            let _ = handle.child.wait();
        } else {
            warn!(
                binary = %self.cfg.binary.display(),
                pid = handle.child.id(),
                timeout_ms = self.cfg.close_timeout_ms,
                "program did not terminate within timeout, ignoring it"
            );
        }
    }
}

fn sigprocmask(set: &SigSet) -> std::io::Result<()> {
    nix::sys::signal::sigprocmask(SigmaskHow::SIG_SETMASK, Some(set), None)
        .map_err(std::io::Error::from)
}

fn write_all_retry(writer: &mut impl Write, bytes: &[u8]) -> std::io::Result<()> {
    let mut remaining = bytes;
    while !remaining.is_empty() {
        match writer.write(remaining) {
            Ok(0) => {
                return Err(std::io::Error::new(
                    ErrorKind::WriteZero,
                    "zero-length write to child stdin",
                ))
            }
            Ok(n) => remaining = &remaining[n..],
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Read one LF-terminated line from the child's stdout, enforcing the
/// response timeout and the single-line protocol.
fn read_status_line(handle: &mut ChildHandle, timeout_ms: u64) -> ReadOutcome {
    let Some(stdout) = handle.child.stdout.as_mut() else {
        return ReadOutcome::IoError(std::io::Error::other("child has no stdout pipe"));
    };

    let mut buf = [0u8; RESPONSE_LINE_BUFFER_SIZE];
    let mut offset = 0usize;

    loop {
        let timeout = PollTimeout::try_from(timeout_ms.min(i32::MAX as u64) as i32)
            .unwrap_or(PollTimeout::MAX);
        let mut fds = [PollFd::new(stdout.as_fd(), PollFlags::POLLIN)];
        match poll(&mut fds, timeout) {
            Ok(0) => return ReadOutcome::Timeout,
            Ok(_) => {}
            Err(nix::errno::Errno::EINTR) => continue,
            Err(e) => return ReadOutcome::IoError(std::io::Error::from(e)),
        }

        let n = match stdout.read(&mut buf[offset..RESPONSE_LINE_BUFFER_SIZE - 1]) {
            Ok(0) => return ReadOutcome::Eof,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return ReadOutcome::IoError(e),
        };
        let chunk_start = offset;
        offset += n;

        let line_ended = buf[offset - 1] == b'\n';
        if !line_ended {
            // an interior LF means the program wrote several lines at once;
            // we have lost synchronization with it
            if buf[chunk_start..offset].contains(&b'\n') {
                return ReadOutcome::Multiline;
            }
            if offset >= RESPONSE_LINE_BUFFER_SIZE - 1 {
                return ReadOutcome::Overlong;
            }
            continue;
        }

        // same check with the terminator stripped: several complete lines
        // can arrive in one read
        if buf[..offset - 1].contains(&b'\n') {
            return ReadOutcome::Multiline;
        }

        let line = String::from_utf8_lossy(&buf[..offset - 1]).into_owned();
        return ReadOutcome::Line(line);
    }
}

/// Map a status line to an outcome. Leading dots are stripped so programs
/// can use them as keep-alives.
fn line_to_status(cfg: &ProgConfig, line: &str) -> Result<OutputStatus> {
    let line = line.trim_start_matches('.');
    match line {
        "OK" => Ok(OutputStatus::Ok),
        "DEFER_COMMIT" => Ok(OutputStatus::DeferCommit),
        "PREVIOUS_COMMITTED" => Ok(OutputStatus::PreviousCommitted),
        other => {
            debug!(binary = %cfg.binary.display(), response = %other, "program reported failure");
            if cfg.report_failures {
                warn!(
                    binary = %cfg.binary.display(),
                    response = %other,
                    "program returned an error indication"
                );
            }
            Err(Error::Suspended(format!("program returned: {other}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProgConfigBuilder;

    fn cfg() -> ProgConfig {
        ProgConfigBuilder::new()
            .with_binary("/bin/cat")
            .build()
            .unwrap()
    }

    #[test]
    fn status_tokens_map_to_outcomes() {
        let cfg = cfg();
        assert_eq!(line_to_status(&cfg, "OK").unwrap(), OutputStatus::Ok);
        assert_eq!(
            line_to_status(&cfg, "DEFER_COMMIT").unwrap(),
            OutputStatus::DeferCommit
        );
        assert_eq!(
            line_to_status(&cfg, "PREVIOUS_COMMITTED").unwrap(),
            OutputStatus::PreviousCommitted
        );
    }

    #[test]
    fn keepalive_dots_are_stripped() {
        let cfg = cfg();
        assert_eq!(line_to_status(&cfg, "...OK").unwrap(), OutputStatus::Ok);
    }

    #[test]
    fn anything_else_is_a_recoverable_failure() {
        let cfg = cfg();
        assert!(matches!(
            line_to_status(&cfg, "message number 7 failed"),
            Err(Error::Suspended(_))
        ));
        // a record echoed back verbatim is not a valid status either
        assert!(matches!(
            line_to_status(&cfg, "msg"),
            Err(Error::Suspended(_))
        ));
    }
}
