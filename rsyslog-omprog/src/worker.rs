use std::os::fd::OwnedFd;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::warn;

use rsyslog_core::{Error, OutputStatus, Result};

use crate::capture::OutputCapture;
use crate::child::ChildCell;
use crate::config::{ProgConfig, ProgConfigBuilder};

/// Repeat interval for the missing-trailing-LF warning.
const LF_WARNING_SUPPRESS_SECS: u64 = 30;

/// One configured program action: the immutable configuration, the shared
/// child slot (when `force_single_instance`) and the output capture.
pub struct ProgInstance {
    cfg: Arc<ProgConfig>,
    single_child: Option<Arc<Mutex<ChildCell>>>,
    capture: Option<Arc<OutputCapture>>,
    /// Epoch second until which the missing-LF warning stays suppressed.
    lf_warning_until: Arc<AtomicU64>,
}

impl ProgInstance {
    /// Validate the configuration and create the instance. Children are
    /// not started here; the first worker attach starts them.
    pub fn build(builder: ProgConfigBuilder) -> Result<ProgInstance> {
        let cfg = Arc::new(builder.build()?);
        let single_child = cfg
            .force_single_instance
            .then(|| Arc::new(Mutex::new(ChildCell::new(cfg.clone()))));
        let capture = cfg
            .output_file
            .as_ref()
            .map(|path| Arc::new(OutputCapture::new(path.clone(), cfg.output_create_mode)));
        Ok(ProgInstance {
            cfg,
            single_child,
            capture,
            lf_warning_until: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn config(&self) -> &ProgConfig {
        &self.cfg
    }

    /// Attach a worker. Starts the output capture (first attach only) and
    /// the worker's child process (or the shared one).
    pub fn attach_worker(&self) -> Result<ProgWorker> {
        if let Some(capture) = &self.capture {
            capture.start_once()?;
        }

        let cell = match &self.single_child {
            Some(shared) => shared.clone(),
            None => Arc::new(Mutex::new(ChildCell::new(self.cfg.clone()))),
        };

        let worker = ProgWorker {
            cfg: self.cfg.clone(),
            cell,
            capture: self.capture.clone(),
            owns_child: self.single_child.is_none(),
            lf_warning_until: self.lf_warning_until.clone(),
        };
        {
            let mut cell = worker.lock_cell();
            worker.ensure_started(&mut cell)?;
        }
        Ok(worker)
    }

    /// Instance-scope HUP: forward the configured signal to the shared
    /// child and reopen the capture file for external rotation.
    pub fn on_hup(&self) {
        if let (Some(shared), Some(signal)) = (&self.single_child, self.cfg.hup_signal.as_signal())
        {
            shared
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .forward_signal(signal);
        }
        if let Some(capture) = &self.capture {
            capture.reopen_file();
        }
    }

    /// Terminate the shared child and stop the output capture.
    pub fn shutdown(&mut self) {
        if let Some(shared) = &self.single_child {
            shared
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .terminate();
        }
        if let Some(capture) = &self.capture {
            capture.end(self.cfg.close_timeout_ms);
        }
    }
}

impl Drop for ProgInstance {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// One worker of a program action. Without `force_single_instance` it owns
/// its child; with it, all workers funnel through the instance's shared
/// child, serialized by its mutex.
pub struct ProgWorker {
    cfg: Arc<ProgConfig>,
    cell: Arc<Mutex<ChildCell>>,
    capture: Option<Arc<OutputCapture>>,
    owns_child: bool,
    lf_warning_until: Arc<AtomicU64>,
}

impl ProgWorker {
    /// Send one rendered record to the child, appending the terminating LF
    /// when the template forgot it. With confirmation enabled the child's
    /// status line decides the outcome; in transactional mode without
    /// confirmation the commit is deferred so the commit marker gets
    /// written.
    pub fn on_record(&self, rendered: &[u8]) -> Result<OutputStatus> {
        let mut cell = self.lock_cell();
        if !cell.is_running() {
            // should not occur: resume restarts the child before retries
            return Err(Error::Suspended("child process is not running".to_string()));
        }

        cell.send(rendered)?;
        if rendered.last() != Some(&b'\n') {
            self.warn_missing_lf(rendered);
            cell.send(b"\n")?;
        }

        if self.cfg.confirm_messages {
            cell.read_status()
        } else if self.cfg.use_transactions {
            Ok(OutputStatus::DeferCommit)
        } else {
            Ok(OutputStatus::Ok)
        }
    }

    /// Write the begin-transaction marker (transactional mode only).
    pub fn on_begin_transaction(&self) -> Result<OutputStatus> {
        if !self.cfg.use_transactions {
            return Ok(OutputStatus::Ok);
        }
        let mark = format!("{}\n", self.cfg.begin_transaction_mark);
        self.send_marker(&mark)
    }

    /// Write the commit-transaction marker (transactional mode only).
    pub fn on_commit_transaction(&self) -> Result<OutputStatus> {
        if !self.cfg.use_transactions {
            return Ok(OutputStatus::Ok);
        }
        let mark = format!("{}\n", self.cfg.commit_transaction_mark);
        self.send_marker(&mark)
    }

    /// Restart the child if it died; called by the host before retrying a
    /// suspended action.
    pub fn try_resume(&self) -> Result<()> {
        let mut cell = self.lock_cell();
        self.ensure_started(&mut cell)
    }

    /// Worker-scope HUP: forward the configured signal to this worker's
    /// own child. Shared children are signalled at instance scope instead.
    pub fn on_hup(&self) {
        if !self.owns_child {
            return;
        }
        if let Some(signal) = self.cfg.hup_signal.as_signal() {
            self.lock_cell().forward_signal(signal);
        }
    }

    /// Terminate this worker's child. Shared children outlive workers and
    /// are terminated with the instance.
    pub fn detach(&mut self) {
        if self.owns_child {
            self.lock_cell().terminate();
        }
    }

    fn send_marker(&self, marker: &str) -> Result<OutputStatus> {
        let mut cell = self.lock_cell();
        cell.send(marker.as_bytes())?;
        if self.cfg.confirm_messages {
            cell.read_status()
        } else {
            Ok(OutputStatus::Ok)
        }
    }

    fn ensure_started(&self, cell: &mut ChildCell) -> Result<()> {
        let capture_fd: Option<OwnedFd> = match &self.capture {
            Some(capture) => Some(capture.child_fd()?),
            None => None,
        };
        cell.ensure_started(capture_fd.as_ref())
    }

    fn lock_cell(&self) -> MutexGuard<'_, ChildCell> {
        self.cell
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn warn_missing_lf(&self, rendered: &[u8]) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let until = self.lf_warning_until.load(Ordering::Relaxed);
        if now > until {
            warn!(
                record = %String::from_utf8_lossy(rendered),
                "messages must be terminated with \\n, appending one"
            );
            self.lf_warning_until
                .store(now + LF_WARNING_SUPPRESS_SECS, Ordering::Relaxed);
        }
    }
}

impl Drop for ProgWorker {
    fn drop(&mut self) {
        self.detach();
    }
}
