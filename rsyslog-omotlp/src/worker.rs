use std::io::Write;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use flate2::write::GzEncoder;
use flate2::Compression as GzLevel;
use tracing::{debug, warn};

use rsyslog_core::{
    current_time_millis, Counter, Error, Message, OutputStatus, Result, StatsBlock, StatsRegistry,
};

use crate::client::HttpPoster;
use crate::config::{Compression, OtlpConfig, OtlpConfigBuilder};
use crate::record::LogRecord;

/// Fixed JSON-framing overhead assumed for the envelope itself.
const BATCH_BASE_OVERHEAD: usize = 256;
/// Fixed JSON-framing overhead assumed per record on top of its body.
const BATCH_RECORD_OVERHEAD: usize = 256;
/// Flush-thread wakeup period.
const FLUSH_TICK: Duration = Duration::from_millis(100);
/// Batch age that triggers a flush when no batch timeout is configured.
const IDLE_FLUSH_INTERVAL_MS: u64 = 1_000;

/// One configured exporter action. Immutable after [`OtlpInstance::build`];
/// workers share it by reference count.
pub struct OtlpInstance {
    cfg: Arc<OtlpConfig>,
}

impl OtlpInstance {
    /// Validate the configuration and create the instance.
    pub fn build(builder: OtlpConfigBuilder) -> Result<OtlpInstance> {
        Ok(OtlpInstance {
            cfg: Arc::new(builder.build()?),
        })
    }

    pub fn config(&self) -> &OtlpConfig {
        &self.cfg
    }

    /// Attach a worker: create its HTTP client, register its statistics
    /// and start its flush thread.
    pub fn attach_worker(&self, stats: &Arc<StatsRegistry>) -> Result<OtlpWorker> {
        OtlpWorker::new(self.cfg.clone(), stats)
    }
}

#[derive(Clone)]
struct WorkerStats {
    batches_submitted: Counter,
    batches_success: Counter,
    batches_retried: Counter,
    batches_dropped: Counter,
    http_status_4xx: Counter,
    http_status_5xx: Counter,
    records_sent: Counter,
    request_latency_ms: Counter,
}

impl WorkerStats {
    fn register(cfg: &OtlpConfig, registry: &Arc<StatsRegistry>) -> (WorkerStats, Arc<StatsBlock>) {
        let mut builder = StatsBlock::builder(format!("omotlp-{}", cfg.url), "omotlp");
        let stats = WorkerStats {
            batches_submitted: builder.counter("batches.submitted"),
            batches_success: builder.counter("batches.success"),
            batches_retried: builder.counter("batches.retried"),
            batches_dropped: builder.counter("batches.dropped"),
            http_status_4xx: builder.counter("http.status.4xx"),
            http_status_5xx: builder.counter("http.status.5xx"),
            records_sent: builder.counter("records.sent"),
            request_latency_ms: builder.counter("http.request.latency.ms"),
        };
        (stats, registry.register(builder.build()))
    }
}

#[derive(Default)]
struct BatchState {
    entries: Vec<LogRecord>,
    estimated_bytes: usize,
    first_enqueue_ms: u64,
}

impl BatchState {
    fn clear(&mut self) {
        self.entries.clear();
        self.estimated_bytes = 0;
        self.first_enqueue_ms = 0;
    }
}

/// Everything the submit path and the flush thread share. The mutex around
/// [`Guarded`] is the only synchronization point between them; the stop
/// flag lives under it so the flush thread observes it exactly between
/// flushes, never mid-flush.
struct Shared {
    cfg: Arc<OtlpConfig>,
    poster: HttpPoster,
    state: Mutex<Guarded>,
    stats: WorkerStats,
}

struct Guarded {
    batch: BatchState,
    stop: bool,
}

/// One exporter worker: its own HTTP client, its own batch, its own flush
/// thread. Detach (or drop) joins the thread and performs a final flush.
pub struct OtlpWorker {
    shared: Arc<Shared>,
    flush_thread: Option<thread::JoinHandle<()>>,
    stats_block: Arc<StatsBlock>,
    registry: Arc<StatsRegistry>,
}

impl OtlpWorker {
    fn new(cfg: Arc<OtlpConfig>, registry: &Arc<StatsRegistry>) -> Result<OtlpWorker> {
        let poster = HttpPoster::new(&cfg)?;
        let (stats, stats_block) = WorkerStats::register(&cfg, registry);
        let shared = Arc::new(Shared {
            cfg,
            poster,
            state: Mutex::new(Guarded {
                batch: BatchState::default(),
                stop: false,
            }),
            stats,
        });

        let thread_shared = shared.clone();
        let flush_thread = thread::Builder::new()
            .name("omotlp-flush".to_string())
            .spawn(move || flush_thread_main(thread_shared))
            .map_err(|e| Error::Internal(format!("cannot spawn flush thread: {e}")))?;

        Ok(OtlpWorker {
            shared,
            flush_thread: Some(flush_thread),
            stats_block,
            registry: registry.clone(),
        })
    }

    /// Stage one record. Flushes inline when the batch limits are reached
    /// or when the pending batch has outlived its timeout.
    ///
    /// Returns [`OutputStatus::DeferCommit`] while records are pending in
    /// the batch, [`OutputStatus::Ok`] when the submit ended with an empty
    /// batch (an inline flush delivered everything).
    pub fn submit(&self, msg: &Message, rendered_body: &[u8]) -> Result<OutputStatus> {
        self.flush_if_due(current_time_millis())?;

        let record = LogRecord::populate(msg, rendered_body, &self.shared.cfg);
        self.add_record(record)?;

        let state = self.lock_state();
        Ok(if state.batch.entries.is_empty() {
            OutputStatus::Ok
        } else {
            OutputStatus::DeferCommit
        })
    }

    /// Force out whatever is currently batched.
    pub fn flush(&self) -> Result<()> {
        let mut state = self.lock_state();
        Self::flush_locked(&self.shared, &mut state)
    }

    /// Stop the flush thread, deliver the final batch, drop the statistics
    /// registration. Safe to call more than once.
    pub fn detach(&mut self) -> Result<()> {
        if let Some(handle) = self.flush_thread.take() {
            {
                let mut state = self.lock_state();
                state.stop = true;
            }
            let _ = handle.join();
            // the thread already did a best-effort final flush; pick up
            // anything a concurrent submit added since
            let flush_result = self.flush();
            self.registry.unregister(&self.stats_block);
            flush_result?;
        }
        Ok(())
    }

    fn lock_state(&self) -> MutexGuard<'_, Guarded> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn flush_if_due(&self, now_ms: u64) -> Result<()> {
        let mut state = self.lock_state();
        if self.shared.cfg.batch_timeout_ms == 0 || state.batch.entries.is_empty() {
            return Ok(());
        }
        if now_ms <= state.batch.first_enqueue_ms {
            return Ok(());
        }
        let age = now_ms - state.batch.first_enqueue_ms;
        if age >= self.shared.cfg.batch_timeout_ms {
            Self::flush_locked(&self.shared, &mut state)?;
        }
        Ok(())
    }

    fn add_record(&self, record: LogRecord) -> Result<()> {
        let cfg = &self.shared.cfg;
        let mut state = self.lock_state();

        if cfg.batch_max_items > 0 && state.batch.entries.len() >= cfg.batch_max_items {
            Self::flush_locked(&self.shared, &mut state)?;
        }

        let entry_bytes = BATCH_RECORD_OVERHEAD + record.body_len();
        if cfg.batch_max_bytes > 0
            && !state.batch.entries.is_empty()
            && state.batch.estimated_bytes + entry_bytes > cfg.batch_max_bytes
        {
            Self::flush_locked(&self.shared, &mut state)?;
        }
        if cfg.batch_max_bytes > 0 && entry_bytes > cfg.batch_max_bytes {
            warn!(
                estimated = entry_bytes,
                max_bytes = cfg.batch_max_bytes,
                "single record exceeds batch.max_bytes, sending individually"
            );
        }

        state.batch.entries.push(record);
        if state.batch.entries.len() == 1 {
            state.batch.estimated_bytes = BATCH_BASE_OVERHEAD + entry_bytes;
            state.batch.first_enqueue_ms = current_time_millis();
        } else {
            state.batch.estimated_bytes += entry_bytes;
        }

        let threshold_reached = (cfg.batch_max_items > 0
            && state.batch.entries.len() >= cfg.batch_max_items)
            || (cfg.batch_max_bytes > 0 && state.batch.estimated_bytes >= cfg.batch_max_bytes);
        if threshold_reached {
            if let Err(e) = Self::flush_locked(&self.shared, &mut state) {
                // the record was not delivered; withdraw it so the host's
                // retry redelivers exactly once
                state.batch.entries.pop();
                if state.batch.entries.is_empty() {
                    state.batch.clear();
                } else {
                    state.batch.estimated_bytes -= entry_bytes;
                }
                return Err(e);
            }
        }
        Ok(())
    }

    /// Serialize, compress and POST the batch. Must be called with the
    /// state lock held; the lock is intentionally kept across the POST so
    /// a batch being serialized cannot be modified concurrently.
    fn flush_locked(shared: &Shared, state: &mut Guarded) -> Result<()> {
        let batch = &mut state.batch;
        if batch.entries.is_empty() {
            return Ok(());
        }
        let record_count = batch.entries.len() as u64;
        let stats = &shared.stats;
        stats.batches_submitted.inc();

        let payload = crate::envelope::build_export(&batch.entries, &shared.cfg)?;
        let body = match shared.cfg.compression {
            Compression::Gzip => gzip_compress(payload.as_bytes())?,
            Compression::None => payload.into_bytes(),
        };

        debug!(records = record_count, bytes = body.len(), "flushing batch");
        let result = shared.poster.post(&body);
        let status = result.status;
        let outcome = result.outcome;
        if result.latency_ms > 0 {
            stats.request_latency_ms.add(result.latency_ms);
        }

        match status {
            // no response at all
            0 => outcome,
            200..=299 => {
                stats.batches_success.inc();
                stats.records_sent.add(record_count);
                debug!(status, "batch delivered");
                batch.clear();
                Ok(())
            }
            408 | 429 => {
                stats.http_status_4xx.inc();
                if matches!(outcome, Err(Error::Suspended(_))) {
                    // client exhausted its retries: keep the batch so the
                    // host-level retry delivers it again
                    stats.batches_retried.inc();
                    debug!(status, "retryable status, retaining batch");
                    outcome
                } else {
                    stats.batches_dropped.inc();
                    debug!(status, "retryable status resolved by client, clearing batch");
                    batch.clear();
                    Ok(())
                }
            }
            400..=499 => {
                stats.http_status_4xx.inc();
                stats.batches_dropped.inc();
                warn!(status, records = record_count, "batch permanently rejected");
                batch.clear();
                // the records are gone for good, but new ones must flow
                Ok(())
            }
            500..=599 => {
                stats.http_status_5xx.inc();
                stats.batches_retried.inc();
                debug!(status, "server error, retaining batch");
                outcome
            }
            _ => outcome,
        }
    }
}

impl Drop for OtlpWorker {
    fn drop(&mut self) {
        let _ = self.detach();
    }
}

/// Background thread servicing the batch timeout. Wakes every 100 ms,
/// checks the stop flag and the batch age under the mutex, and performs a
/// final best-effort flush before exiting.
fn flush_thread_main(shared: Arc<Shared>) {
    loop {
        thread::sleep(FLUSH_TICK);

        let mut state = shared
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if state.stop {
            break;
        }
        if !state.batch.entries.is_empty() {
            let timeout_ms = if shared.cfg.batch_timeout_ms > 0 {
                shared.cfg.batch_timeout_ms
            } else {
                IDLE_FLUSH_INTERVAL_MS
            };
            let now = current_time_millis();
            if state.batch.first_enqueue_ms != 0
                && now.saturating_sub(state.batch.first_enqueue_ms) >= timeout_ms
            {
                let _ = OtlpWorker::flush_locked(&shared, &mut state);
            }
        }
    }

    let mut state = shared
        .state
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    if !state.batch.entries.is_empty() {
        let _ = OtlpWorker::flush_locked(&shared, &mut state);
    }
}

fn gzip_compress(input: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), GzLevel::default());
    encoder
        .write_all(input)
        .map_err(|e| Error::Internal(format!("gzip compression failed: {e}")))?;
    encoder
        .finish()
        .map_err(|e| Error::Internal(format!("gzip compression failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gzip_round_trip() {
        let compressed = gzip_compress(b"payload payload payload").unwrap();
        assert_ne!(compressed, b"payload payload payload");
        let mut decoder = flate2::read::GzDecoder::new(&compressed[..]);
        let mut out = Vec::new();
        std::io::Read::read_to_end(&mut decoder, &mut out).unwrap();
        assert_eq!(out, b"payload payload payload");
    }

    #[test]
    fn batch_clear_resets_accounting() {
        let mut batch = BatchState {
            entries: vec![LogRecord::default()],
            estimated_bytes: 300,
            first_enqueue_ms: 17,
        };
        batch.clear();
        assert!(batch.entries.is_empty());
        assert_eq!(batch.estimated_bytes, 0);
        assert_eq!(batch.first_enqueue_ms, 0);
    }
}
