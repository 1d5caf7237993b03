//! Symmetric log-file encryption with `.encinfo` sidecar metadata.
//!
//! Encrypted log files are accompanied by a side file named like the log
//! file with `.encinfo` appended. The sidecar holds one record pair per
//! cipher block run:
//!
//! ```text
//! FILETYPE:rsyslog-enrcyption-info
//! IV:<hex>        initial vector, also marks the start of a block
//! END:<decimal>   end offset of the block within the log file
//! ```
//!
//! An `END` record is written when a block is cleanly closed; a block that
//! is still being written has none, and readers treat its length as
//! unbounded. Record types are at most 31 bytes, values at most 1023 bytes,
//! each record is LF-terminated. The historic `rsyslog-enrcyption-info`
//! spelling is part of the on-disk format.
//!
//! A [`CryptoContext`] holds the cipher selection and key and is immutable
//! once the first file is opened. A [`CryptoFile`] binds the context to one
//! log file in either direction; the caller serializes access, there is no
//! internal locking. The caller also owns the log file itself: this crate
//! only transforms buffers in place and maintains the sidecar.

mod context;
mod encinfo;
mod file;

pub use context::CryptoContext;
pub use file::{delete_state, CryptoFile, OpenMode};
