use std::str::FromStr;
use std::thread;
use std::time::{Duration, Instant};

use http::{HeaderMap, HeaderName, HeaderValue};
use rand::Rng;
use reqwest::blocking::Client;
use tracing::{debug, warn};

use rsyslog_core::{Error, Result};

use crate::config::{OtlpConfig, RetryPolicy};

const USER_AGENT: &str = concat!("rsyslog-omotlp/", env!("CARGO_PKG_VERSION"));

/// Result of one logical POST, after the client's internal retry loop.
pub(crate) struct PostResult {
    /// HTTP status of the last attempt, 0 when no response was received.
    pub status: u16,
    /// Latency of the last attempt in milliseconds.
    pub latency_ms: u64,
    /// `Ok` for delivered payloads, `Suspended` when retries were
    /// exhausted, `DiscardMsg` for permanent rejections.
    pub outcome: Result<()>,
}

/// Blocking HTTP client bound to the exporter's URL, carrying headers, TLS
/// and proxy settings from the instance configuration.
pub(crate) struct HttpPoster {
    client: Client,
    url: String,
    retry: RetryPolicy,
}

impl HttpPoster {
    pub fn new(cfg: &OtlpConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        for (key, value) in &cfg.headers {
            match (
                HeaderName::from_str(key),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.insert(name, value);
                }
                _ => warn!(header = %key, "skipping malformed header"),
            }
        }

        let mut builder = Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers);

        if cfg.request_timeout_ms > 0 {
            builder = builder.timeout(Duration::from_millis(cfg.request_timeout_ms));
        }

        if let Some(ca_file) = &cfg.tls.ca_cert_file {
            let pem = std::fs::read(ca_file)?;
            let cert = reqwest::Certificate::from_pem(&pem)
                .map_err(|e| Error::Param(format!("tls.cacert: {e}")))?;
            builder = builder.add_root_certificate(cert);
        }
        if let Some(ca_dir) = &cfg.tls.ca_cert_dir {
            for entry in std::fs::read_dir(ca_dir)? {
                let path = entry?.path();
                if !path.is_file() {
                    continue;
                }
                let pem = std::fs::read(&path)?;
                match reqwest::Certificate::from_pem(&pem) {
                    Ok(cert) => builder = builder.add_root_certificate(cert),
                    Err(e) => {
                        debug!(file = %path.display(), error = %e, "skipping non-certificate file")
                    }
                }
            }
        }
        if let (Some(cert_file), Some(key_file)) =
            (&cfg.tls.client_cert_file, &cfg.tls.client_key_file)
        {
            let cert_pem = std::fs::read(cert_file)?;
            let key_pem = std::fs::read(key_file)?;
            let identity = reqwest::Identity::from_pkcs8_pem(&cert_pem, &key_pem)
                .map_err(|e| Error::Param(format!("tls.cert/tls.key: {e}")))?;
            builder = builder.identity(identity);
        }
        if !cfg.tls.verify_peer {
            builder = builder.danger_accept_invalid_certs(true);
        }
        if !cfg.tls.verify_hostname {
            builder = builder.danger_accept_invalid_hostnames(true);
        }

        if let Some(proxy_url) = &cfg.proxy.url {
            let mut proxy = reqwest::Proxy::all(proxy_url)
                .map_err(|e| Error::Param(format!("proxy: {e}")))?;
            if let Some(user) = &cfg.proxy.user {
                proxy = proxy.basic_auth(user, cfg.proxy.password.as_deref().unwrap_or(""));
            }
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| Error::Param(format!("cannot build HTTP client: {e}")))?;

        Ok(HttpPoster {
            client,
            url: cfg.url.clone(),
            retry: cfg.retry.clone(),
        })
    }

    /// POST `body`, retrying on network errors and retryable statuses
    /// (408, 429, 5xx) with exponential backoff and jitter until the retry
    /// budget is spent.
    pub fn post(&self, body: &[u8]) -> PostResult {
        let mut attempt: u32 = 0;
        loop {
            let started = Instant::now();
            let response = self.client.post(&self.url).body(body.to_vec()).send();
            let latency_ms = started.elapsed().as_millis() as u64;

            let (status, retryable) = match &response {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    (status, matches!(status, 408 | 429 | 500..=599))
                }
                Err(e) => {
                    debug!(error = %e, attempt, "request failed without response");
                    (0, true)
                }
            };

            if !retryable {
                let outcome = if (200..300).contains(&status) {
                    Ok(())
                } else if (400..500).contains(&status) {
                    Err(Error::DiscardMsg(format!("collector returned {status}")))
                } else {
                    // informational/redirect statuses are not actionable
                    Ok(())
                };
                return PostResult {
                    status,
                    latency_ms,
                    outcome,
                };
            }

            if attempt >= self.retry.max_retries {
                warn!(
                    status,
                    attempts = attempt + 1,
                    "retry budget exhausted, suspending"
                );
                return PostResult {
                    status,
                    latency_ms,
                    outcome: Err(Error::Suspended(format!(
                        "delivery failed after {} attempts (last status {status})",
                        attempt + 1
                    ))),
                };
            }

            let delay = backoff_delay(&self.retry, attempt);
            debug!(status, attempt, delay_ms = delay.as_millis() as u64, "retrying POST");
            thread::sleep(delay);
            attempt += 1;
        }
    }
}

/// `min(max, initial * 2^attempt)`, jittered by a uniform ±jitter%.
fn backoff_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    let base = policy
        .initial_ms
        .saturating_mul(1u64 << attempt.min(32))
        .min(policy.max_ms);
    if policy.jitter_percent == 0 || base == 0 {
        return Duration::from_millis(base);
    }
    let spread = base * policy.jitter_percent as u64 / 100;
    let jittered = base - spread + rand::rng().random_range(0..=spread * 2);
    Duration::from_millis(jittered.min(policy.max_ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(jitter: u32) -> RetryPolicy {
        RetryPolicy {
            initial_ms: 100,
            max_ms: 1_000,
            max_retries: 5,
            jitter_percent: jitter,
        }
    }

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        let p = policy(0);
        assert_eq!(backoff_delay(&p, 0).as_millis(), 100);
        assert_eq!(backoff_delay(&p, 1).as_millis(), 200);
        assert_eq!(backoff_delay(&p, 2).as_millis(), 400);
        assert_eq!(backoff_delay(&p, 3).as_millis(), 800);
        assert_eq!(backoff_delay(&p, 4).as_millis(), 1_000);
        assert_eq!(backoff_delay(&p, 10).as_millis(), 1_000);
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let p = policy(20);
        for attempt in 0..4 {
            let base = 100u64 << attempt;
            for _ in 0..50 {
                let d = backoff_delay(&p, attempt).as_millis() as u64;
                assert!(d >= base - base / 5, "delay {d} below bound for base {base}");
                assert!(d <= (base + base / 5).min(1_000), "delay {d} above bound");
            }
        }
    }
}
