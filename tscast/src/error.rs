//! Engine error types.

use thiserror::Error;

/// Errors raised by the casting engine.
#[derive(Error, Debug)]
pub enum Error {
    /// Transport stream parsing error (bad file, no sync, no PCRs).
    #[error(transparent)]
    Ts(#[from] tscast_ts::TsError),

    /// Network error (socket creation or send failure).
    #[error(transparent)]
    Net(#[from] tscast_net::NetError),

    /// The source was started twice.
    #[error("Source already started")]
    AlreadyStarted,

    /// The source was stopped without having been started.
    #[error("Source not started")]
    NotStarted,

    /// No stream with the given id exists.
    #[error("Stream {0} not found")]
    StreamNotFound(u32),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
