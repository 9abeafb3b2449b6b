use thiserror::Error;

/// Errors surfaced by index and record file operations.
///
/// `ScanCompleted` and `EndOfFile` are expected terminal signals, not
/// anomalies: callers drive their scan loops until one of them comes back.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("storage error: {0}")]
    Storage(#[from] storage::BufferPoolError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("buffer pool has no free frames")]
    NoFreeFrames,
    #[error("bad index info: {0}")]
    BadIndexInfo(String),
    #[error("invalid scan operators")]
    BadOpcodes,
    #[error("invalid scan range: low is greater than high")]
    BadScanRange,
    #[error("no key in the requested range")]
    NoSuchKeyFound,
    #[error("scan not initialized")]
    ScanNotInitialized,
    #[error("index scan completed")]
    ScanCompleted,
    #[error("end of relation file")]
    EndOfFile,
    #[error("record id does not name a live record")]
    InvalidRecord,
    #[error("record does not fit in a page")]
    RecordTooLarge,
    #[error("page access out of bounds")]
    PageBounds,
}

pub type IndexResult<T> = Result<T, IndexError>;
