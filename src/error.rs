use std::io::Error as IoError;

/// Why a load did not produce a payload.
///
/// Errors are delivered to listeners behind an `Arc`, since one failure may need to reach both a listener and a
/// blocked [crate::Loader::load_blocking] caller.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// The request was malformed, for example an empty URI.  This is a caller bug and is reported synchronously.
    #[error("invalid request: {0}")]
    InvalidRequest(&'static str),
    #[error("transfer failed")]
    Transfer(#[from] TransferError),
    /// The bytes came back, but the decoder couldn't turn them into anything.
    #[error("could not decode {len} bytes")]
    Decode { len: usize },
    #[error("persistent storage failed")]
    Persistence(#[source] IoError),
    #[error("the request was cancelled")]
    Cancelled,
    /// A collaborator panicked while servicing the request.
    #[error("fault while loading: {0}")]
    Fault(String),
    /// The loader shut down before the request was serviced.
    #[error("the loader was shut down")]
    ShutDown,
}

#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("expected {expected} bytes but the stream ended after {received}")]
    Truncated { expected: u64, received: u64 },
    #[error("the fetch deadline passed")]
    TimedOut,
    #[error(transparent)]
    Io(#[from] IoError),
}
