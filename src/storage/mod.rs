pub mod btree;
pub mod cache;
pub mod header;
pub mod pager;
mod positional;
pub mod transaction;
pub mod wal;

const LUMBUNG_MAGIC: &[u8; 16] = b"LUMBUNG DB v0.1\0";
const FILE_FORMAT_VERSION: u8 = 1;
