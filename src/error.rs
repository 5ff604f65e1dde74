use thiserror::Error;

/// Tagged error kind for the whole crate.
///
/// Variants are deliberately flat rather than nested/boxed causes so that
/// `Error` stays `Clone`: the one-shot table initializer in
/// [`crate::store_descriptor::StoreDescriptor`] caches a build failure and
/// replays it to every caller that raced to build the tables.
#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("bad store block signature at offset {offset:#x}")]
    BadSignature { offset: u64 },

    #[error("bad store block header at offset {offset:#x}: {reason}")]
    BadHeader { offset: u64, reason: String },

    #[error("unexpected record type at offset {offset:#x}: expected {expected}, found {actual}")]
    UnexpectedRecordType {
        offset: u64,
        expected: u32,
        actual: u32,
    },

    #[error("truncated data: needed {needed} bytes, had {available}")]
    Truncated { needed: usize, available: usize },

    #[error("store block chain exceeded the safety cap of {cap} blocks")]
    ChainTooLong { cap: usize },

    #[error("forwarder resolution did not terminate after {hops} hops")]
    ForwarderCycle { hops: usize },

    #[error("offset out of bounds: {0}")]
    OutOfBounds(i64),

    #[error("internal invariant violation: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}
