//! OTLP/HTTP JSON log export.
//!
//! Converts messages into OpenTelemetry log-export payloads and ships them
//! over HTTP POST, with batching, optional gzip compression, retry with
//! exponential backoff, TLS/mTLS and proxy support.
//!
//! Concurrency model: the [`OtlpInstance`] configuration is read-only after
//! [`OtlpInstance::build`]. Each attached [`OtlpWorker`] owns its HTTP
//! client and its batch; the batch mutex is the only structure shared
//! between the submit path and the worker's flush thread, so workers never
//! contend with each other. The flush thread wakes every 100 ms to service
//! the batch timeout and performs a final flush when the worker detaches.
//!
//! Delivery semantics: `2xx` clears the batch, non-retryable `4xx` drops it
//! (the collector rejected it for good), `5xx`/`408`/`429` exhaust the HTTP
//! client's own retry budget and then surface [`rsyslog_core::Error::Suspended`]
//! with the batch retained, so the host's action retry redelivers it.

mod client;
mod config;
mod envelope;
mod record;
mod worker;

pub use config::{Compression, OtlpConfig, OtlpConfigBuilder, RetryPolicy};
pub use record::LogRecord;
pub use worker::{OtlpInstance, OtlpWorker};
