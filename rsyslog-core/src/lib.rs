//! Shared runtime collaborators for the rsyslog core modules.
//!
//! The input and output modules in this workspace do not talk to each other
//! directly. They exchange [`Message`] values, render them through a
//! [`Template`], hand them to a [`MessageSubmitter`], report counters through
//! the [`StatsRegistry`] and classify failures with the common [`Error`]
//! type. This crate hosts exactly those seams and nothing else; module
//! loading, the rule engine and the configuration grammar live with the host.

mod error;
mod msg;
mod ratelimit;
mod stats;
mod submit;
mod template;

pub use error::{Error, OutputStatus, Result};
pub use msg::{FlowControl, Message};
pub use ratelimit::RateLimiter;
pub use stats::{Counter, StatsBlock, StatsBlockBuilder, StatsRegistry, StatsSnapshot};
pub use submit::{CollectingSubmitter, MessageSubmitter, MultiSubmit};
pub use template::{RawBody, Template};

use std::time::{SystemTime, UNIX_EPOCH};

/// Wall-clock milliseconds since the Unix epoch.
///
/// Batch age stamps use wall time so they stay meaningful across worker
/// restarts; timeout enforcement elsewhere uses `Instant`.
pub fn current_time_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
