/// Error taxonomy for the whole library.
///
/// I/O and format errors surface at the call site; structural errors found
/// deep in a traversal carry the genome name and segment index of the
/// offending records. The library never retries and never swallows
/// `CorruptAlignment`.
use thiserror::Error;

pub type Result<T> = std::result::Result<T, HalError>;

#[derive(Debug, Error)]
pub enum HalError {
    /// Unknown magic, unsupported version, or an unparseable file.
    #[error("bad format: {0}")]
    BadFormat(String),

    /// Write attempted through a read-only open.
    #[error("not writable: {0}")]
    NotWritable(String),

    /// Index outside `[0, size)`.
    #[error("index {index} out of range [0, {size}) in {what}")]
    OutOfRange {
        what: String,
        index: i64,
        size: u64,
    },

    /// Structural inconsistency between records (e.g. a child link without
    /// a reciprocating parent link).
    #[error("corrupt alignment: {0}")]
    CorruptAlignment(String),

    /// Arena growth past the configured maximum.
    #[error("out of space: {0}")]
    OutOfSpace(String),

    /// A named genome, sequence, dataset or file does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("I/O failure: {0}")]
    IoFailure(#[from] std::io::Error),

    /// Caller or file violated a documented precondition; a bug upstream.
    #[error("precondition violated: {0}")]
    PreconditionViolated(String),
}

impl HalError {
    pub(crate) fn out_of_range(what: impl Into<String>, index: i64, size: u64) -> HalError {
        HalError::OutOfRange {
            what: what.into(),
            index,
            size,
        }
    }
}
