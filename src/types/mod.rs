pub mod error;
pub mod page;
pub mod record;
pub mod value;

// Common type aliases
pub type PageId = u64;
pub type RowId = u64;

pub const PAGE_SIZE: usize = 4096;
pub const HEADER_SIZE: usize = 100; // Database header at the start of page 1
pub const PAGE_HEADER_SIZE: usize = 24; // Per-page header
pub const USABLE_SPACE: usize = PAGE_SIZE - PAGE_HEADER_SIZE;

pub const SLOT_DIRECTORY_ENTRY_SIZE: usize = 4; // offset (2 bytes) + length (2 bytes)
pub const OVERFLOW_POINTER_SIZE: usize = 8; // PageId for overflow page

// Node occupancy bounds, measured in bytes of cells plus slots.
pub const MAX_FILL: usize = USABLE_SPACE;
pub const MIN_FILL: usize = USABLE_SPACE / 4;

pub const LEAF_CELL_HEADER_SIZE: usize = 8 + 4 + OVERFLOW_POINTER_SIZE; // key + payload_len + overflow
pub const INTERIOR_CELL_SIZE: usize = 8 + 8; // child + key

/// Largest leaf cell (slot included) that may live on a page. Keeping it at a
/// quarter of the usable space guarantees splits leave both halves above
/// `MIN_FILL`.
pub const MAX_LEAF_CELL: usize = USABLE_SPACE / 4;
pub const MAX_INLINE_PAYLOAD: usize =
    MAX_LEAF_CELL - SLOT_DIRECTORY_ENTRY_SIZE - LEAF_CELL_HEADER_SIZE;
pub const OVERFLOW_CAPACITY: usize = PAGE_SIZE - PAGE_HEADER_SIZE;

pub const ROOT_PAGE_ID: PageId = 2; // Root of a freshly created tree
pub const HEADER_PAGE_ID: PageId = 1;
