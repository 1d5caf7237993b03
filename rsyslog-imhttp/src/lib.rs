//! HTTP input: receives log records via HTTP POST.
//!
//! Each configured listener binds an endpoint path to a ruleset and a
//! framing discipline: LF-delimited (the default), octet-counted framing
//! with an octet-stuffing fallback, or no framing at all (block-granular).
//! Request bodies may be gzip-compressed (`Content-Encoding: gzip`) and are
//! inflated streamingly. Listeners can require HTTP basic authentication
//! against an htpasswd-style file, attach request metadata (headers, query
//! parameters) to the submitted messages, and rate-limit submissions.
//!
//! The embedded server hands each connection to a pooled worker thread;
//! workers keep per-connection parse state and never share it. Submission
//! goes through a multi-submit buffer into the host's routing layer.

mod auth;
mod config;
mod framing;
mod metadata;
mod server;

pub use config::{ListenerConfig, ServerConfig};
pub use server::HttpInput;
