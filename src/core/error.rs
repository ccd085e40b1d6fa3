use thiserror::Error;

/// Ways a single completion exchange can fail.
///
/// `Decode` is an internal signal only: the streaming client downgrades it to
/// the whole-body fallback and the user never sees it. The other variants can
/// surface in the scrollback when the non-streaming retry also fails.
#[derive(Debug, Clone, Error)]
pub enum ChatError {
    /// No API credential available. Checked before any network I/O.
    #[error("missing API credential: {0}")]
    Config(String),

    /// The completion endpoint answered with a non-2xx status.
    #[error("HTTP error {status}")]
    Http { status: u16 },

    /// A response payload could not be decoded.
    #[error("malformed response payload: {0}")]
    Decode(String),

    /// Network-level failure, reported after the non-streaming retry is
    /// exhausted too.
    #[error("connection failed: {0}")]
    Connection(String),
}
