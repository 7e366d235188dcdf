pub mod connection;
pub mod executor;
pub mod storage;
pub mod types;
pub mod utils;

pub use connection::{Connection, OpenOptions, Transaction, TransactionOutcome};
pub use storage::pager::{CheckpointMode, PagerConfig};
pub use types::{
    RowId,
    error::{DatabaseError, Result},
    record::Record,
    value::Value,
};
