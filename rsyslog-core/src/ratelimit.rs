use std::sync::Mutex;
use std::time::Instant;

use tracing::warn;

#[derive(Debug)]
struct Window {
    started: Instant,
    done: u64,
    missed: u64,
}

/// Linux-kernel-style message rate limiter: within each `interval`-second
/// window, up to `burst` messages pass; the rest are discarded and counted.
/// An `interval` of zero disables limiting entirely.
#[derive(Debug)]
pub struct RateLimiter {
    name: String,
    interval_secs: u64,
    burst: u64,
    window: Mutex<Window>,
}

impl RateLimiter {
    pub fn new(name: impl Into<String>, interval_secs: u64, burst: u64) -> Self {
        RateLimiter {
            name: name.into(),
            interval_secs,
            burst,
            window: Mutex::new(Window {
                started: Instant::now(),
                done: 0,
                missed: 0,
            }),
        }
    }

    /// Decide whether one message may pass right now.
    pub fn admit(&self) -> bool {
        if self.interval_secs == 0 {
            return true;
        }

        let mut w = self.window.lock().unwrap();
        if w.started.elapsed().as_secs() >= self.interval_secs {
            if w.missed > 0 {
                warn!(
                    limiter = %self.name,
                    discarded = w.missed,
                    "rate limiter resumed, messages were discarded in the last interval"
                );
            }
            w.started = Instant::now();
            w.done = 0;
            w.missed = 0;
        }

        if w.done < self.burst {
            w.done += 1;
            true
        } else {
            if w.missed == 0 {
                warn!(
                    limiter = %self.name,
                    burst = self.burst,
                    interval = self.interval_secs,
                    "begin to drop messages due to rate-limiting"
                );
            }
            w.missed += 1;
            false
        }
    }
}
