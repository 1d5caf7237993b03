use thiserror::Error;

/// A specialized `Result` type used throughout the core modules.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors that can occur in the core modules.
///
/// The taxonomy is deliberately flat: the host decides on a recovery policy
/// purely from the variant, so the variants encode policy-relevant
/// distinctions (permanent rejection vs. transient failure vs. caller bug)
/// rather than the failing subsystem.
#[derive(Error, Debug)]
pub enum Error {
    /// Caller supplied an invalid configuration value or argument.
    #[error("invalid parameter: {0}")]
    Param(String),

    /// An OS-level I/O call failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A feature was requested that this build does not provide.
    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// Transient failure. The host should retry the operation later,
    /// typically after calling the module's resume entry point.
    #[error("action suspended: {0}")]
    Suspended(String),

    /// The record was permanently rejected by the peer. It must not be
    /// retried; the host should account for it and continue.
    #[error("message discarded: {0}")]
    DiscardMsg(String),

    /// An internal invariant was violated. The affected worker should be
    /// torn down and restarted.
    #[error("internal error: {0}")]
    Internal(String),

    /// The record was rejected by a rate limiter.
    #[error("rate limited")]
    RateLimited,

    /// Unknown cipher algorithm name.
    #[error("unknown cipher algorithm '{0}'")]
    CryInvldAlgo(String),

    /// Unknown cipher mode name.
    #[error("unknown cipher mode '{0}'")]
    CryInvldMode(String),

    /// The supplied key does not match the cipher's required key length.
    #[error("invalid key length, cipher requires {required} bytes")]
    CryInvldKey { required: usize },

    /// The `.encinfo` sidecar file is malformed or not an encryption info
    /// file at all.
    #[error("invalid encryption info file: {0}")]
    EiInvldFile(String),

    /// The `.encinfo` sidecar file could not be opened.
    #[error("cannot open encryption info file: {0}")]
    EiOpnErr(String),

    /// A write to the `.encinfo` sidecar file failed or was short.
    #[error("cannot write encryption info file: {0}")]
    EiWrErr(String),
}

impl Error {
    /// True if the host may retry the failed operation later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Suspended(_) | Error::Io(_))
    }
}

/// Success outcome of an output-module submit path.
///
/// `DeferCommit` and `PreviousCommitted` are not failures: they steer the
/// host's transaction machinery while the record itself was accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStatus {
    /// The record was processed; the host may commit.
    Ok,
    /// The record was accepted but the transactional commit must be held
    /// open until a later record (or flush) completes it.
    DeferCommit,
    /// The previous record in the transaction is now known to be committed.
    PreviousCommitted,
}
