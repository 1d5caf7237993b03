//! External program output: executes a program and feeds it the message
//! stream as standard input.
//!
//! Each worker normally runs its own child process; with
//! `force_single_instance` all workers share one child behind a mutex.
//! When `confirm_messages` is on, the child acknowledges startup and every
//! record with a single LF-terminated status line on stdout (`OK`,
//! `DEFER_COMMIT`, `PREVIOUS_COMMITTED`; anything else is treated as a
//! recoverable failure). The child's stdout/stderr can instead be captured
//! to a file by a dedicated thread, with HUP-driven reopening for external
//! rotation.
//!
//! Known limitation: when the child responds with a multiline or overlong
//! status, the child is restarted and the action suspended, but records
//! already acknowledged within the current transaction are not re-sent.

mod capture;
mod child;
mod config;
mod worker;

pub use config::{HupSignal, ProgConfig, ProgConfigBuilder};
pub use worker::{ProgInstance, ProgWorker};
