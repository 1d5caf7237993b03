use std::path::PathBuf;

/// Server-wide options: where to listen and how many pooled workers serve
/// connections.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address, e.g. `127.0.0.1:8080` (port 0 picks an ephemeral one).
    pub listen_addr: String,
    pub worker_threads: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            listen_addr: "0.0.0.0:8080".to_string(),
            worker_threads: 4,
        }
    }
}

/// One endpoint binding.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Request path this listener serves, e.g. `/postrequest`.
    pub endpoint: String,
    /// htpasswd-style file enabling basic authentication.
    pub basic_auth_file: Option<PathBuf>,
    /// Ruleset tag stamped onto submitted messages.
    pub ruleset: Option<String>,
    /// Input-name property; defaults to `imhttp`.
    pub input_name: Option<String>,
    /// Light-delay flow control (on) vs. no-delay (off).
    pub flow_control: bool,
    /// Rate limiter window in seconds, 0 disables.
    pub ratelimit_interval: u64,
    /// Messages admitted per window.
    pub ratelimit_burst: u64,
    /// Block-granular framing: submit whatever each read delivers.
    pub disable_lf_delim: bool,
    /// Accept octet-counted framing, with octet-stuffing fallback.
    pub support_octet_framing: bool,
    /// Attach `!metadata!httpheaders` / `!metadata!queryparams`.
    pub add_metadata: bool,
}

impl ListenerConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        ListenerConfig {
            endpoint: endpoint.into(),
            basic_auth_file: None,
            ruleset: None,
            input_name: None,
            flow_control: true,
            ratelimit_interval: 0,
            ratelimit_burst: 10_000,
            disable_lf_delim: false,
            support_octet_framing: false,
            add_metadata: false,
        }
    }
}
