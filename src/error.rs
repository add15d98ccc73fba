use thiserror::Error;

/// Errors produced by the DHT engine.
///
/// All of these are handled locally: a malformed or hostile datagram from
/// one peer never affects another peer's in-flight state, and nothing here
/// escapes as a process-level fault.
#[derive(Debug, Error)]
pub enum DhtError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bencode error: {0}")]
    Bencode(#[from] crate::bencode::BencodeError),

    #[error("invalid message: {0}")]
    Protocol(String),

    #[error("invalid node id length")]
    InvalidNodeId,

    #[error("query timed out")]
    Timeout,

    #[error("response for unknown transaction")]
    UnknownTransaction,

    #[error("transaction id already in flight")]
    DuplicateTransaction,

    #[error("too many pending queries")]
    TooManyQueries,

    #[error("invalid announce token")]
    InvalidToken,

    #[error("unsupported query: {0}")]
    UnsupportedQuery(String),

    #[error("remote error {code}: {message}")]
    Remote { code: i64, message: String },

    #[error("engine is shutting down")]
    ShuttingDown,
}
