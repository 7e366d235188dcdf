use thiserror::Error;

use crate::types::{PageId, RowId, value::DataType};

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt database header: {reason}")]
    CorruptHeader { reason: String },

    #[error("Corrupt index at page {page_id}: {reason}")]
    CorruptIndex { page_id: PageId, reason: String },

    #[error("Corrupted page: page_id={page_id}, reason={reason}")]
    CorruptedPage { page_id: PageId, reason: String },

    #[error("Disk full while allocating page {page_id}")]
    DiskFull {
        page_id: PageId,
        #[source]
        source: std::io::Error,
    },

    #[error("Database is busy: {operation}")]
    Busy { operation: &'static str },

    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: DataType, actual: DataType },

    #[error("Malformed record: {details}")]
    MalformedRecord { details: String },

    #[error("A write transaction is already active")]
    TransactionAlreadyActive,

    #[error("Transaction aborted: {reason}")]
    TransactionAborted { reason: String },

    #[error("Commit was vetoed by the commit hook")]
    CommitVetoed,

    #[error("Database is opened read-only")]
    ReadOnly,

    #[error("Page {page_id} out of range (page_count: {page_count})")]
    PageOutOfRange { page_id: PageId, page_count: u64 },

    #[error("Page is full (page_id: {page_id})")]
    PageFull { page_id: PageId },

    #[error("Column index {index} out of bounds")]
    ColumnIndexOutOfBounds { index: usize },

    #[error("Parameter index {index} out of range (count: {count})")]
    ParameterIndexOutOfRange { index: usize, count: usize },

    #[error("Parameter {index} is not bound")]
    UnboundParameter { index: usize },

    #[error("Row {row_id} not found")]
    RowNotFound { row_id: RowId },

    #[error("Blob access out of range: offset {offset} + length {length} exceeds size {size}")]
    BlobOutOfRange {
        offset: usize,
        length: usize,
        size: usize,
    },

    #[error("Invalid page type: {0}")]
    InvalidPageType(u8),

    #[error("Arithmetic overflow: {details}")]
    ArithmeticOverflow { details: String },

    #[error("No such function: {name}")]
    FunctionNotFound { name: String },

    #[error("Function {name} takes {expected} arguments, got {actual}")]
    FunctionArgumentCount {
        name: String,
        expected: usize,
        actual: usize,
    },
}

impl DatabaseError {
    pub(crate) fn corrupt_index(page_id: PageId, reason: impl Into<String>) -> Self {
        DatabaseError::CorruptIndex {
            page_id,
            reason: reason.into(),
        }
    }

    /// Lock contention that a caller may retry after backing off.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DatabaseError::Busy { .. })
    }
}

pub type Result<T> = std::result::Result<T, DatabaseError>;
