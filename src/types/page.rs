use crate::types::{
    OVERFLOW_CAPACITY, PAGE_HEADER_SIZE, PAGE_SIZE, PageId, SLOT_DIRECTORY_ENTRY_SIZE,
    error::DatabaseError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageType {
    Free = 0,
    Interior = 5,
    Overflow = 7,
    Leaf = 13,
}

impl PageType {
    pub fn from_u8(value: u8) -> Result<Self, DatabaseError> {
        match value {
            0 => Ok(PageType::Free),
            5 => Ok(PageType::Interior),
            7 => Ok(PageType::Overflow),
            13 => Ok(PageType::Leaf),
            _ => Err(DatabaseError::InvalidPageType(value)),
        }
    }

    pub fn as_u8(&self) -> u8 {
        *self as u8
    }

    /// Reads the type byte of a raw page image without decoding the rest.
    pub fn of(bytes: &[u8]) -> Result<Self, DatabaseError> {
        Self::from_u8(bytes.first().copied().unwrap_or_default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotEntry {
    pub offset: u16, // Offset from beginning of page
    pub length: u16, // Length of the cell
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SlotDirectory {
    pub slots: Vec<SlotEntry>,
}

/*
 * Page Layout on Disk (Slotted Page Structure)
 * ┌─────────────────────────────────────────────────────────────────┐
 * │                    PAGE HEADER (24 bytes)                       │
 * │  page_type(1) | flags(1) | cell_count(2) | free_space_offset(2) │
 * │  reserved(2) | page_id(8) | right_child(8)                      │
 * ├─────────────────────────────────────────────────────────────────┤
 * │                  SLOT DIRECTORY (key order)                     │
 * │  [slot0: offset(2)|len(2)] [slot1: offset(2)|len(2)] ...        │
 * ├─────────────────────────────────────────────────────────────────┤
 * │                    FREE SPACE                                   │
 * ├─────────────────────────────────────────────────────────────────┤
 * │                   CELL DATA                                     │
 * │  [...cell N...] [...cell 2...] [...cell 1...] [...cell 0...]    │
 * └─────────────────────────────────────────────────────────────────┘
 */

const TYPE_OFFSET: usize = 0;
const CELL_COUNT_OFFSET: usize = 2;
const FREE_SPACE_OFFSET: usize = 4;
const PAGE_ID_OFFSET: usize = 8;
const RIGHT_CHILD_OFFSET: usize = 16;

#[derive(Debug, Clone)]
pub struct Page {
    pub page_id: PageId,
    pub page_type: PageType,
    pub right_child: Option<PageId>,

    // Slotted page structure
    pub slot_directory: SlotDirectory,
    pub free_space_offset: u16,
    pub cell_count: u16,

    // Data storage
    pub data: Vec<u8>,
}

impl Page {
    pub fn new(page_id: PageId, page_type: PageType) -> Self {
        Self {
            page_id,
            page_type,
            right_child: None,
            slot_directory: SlotDirectory::default(),
            free_space_offset: PAGE_SIZE as u16,
            cell_count: 0,
            data: vec![0; PAGE_SIZE],
        }
    }

    /// Serialize the page to bytes following the documented layout
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buffer = vec![0u8; PAGE_SIZE];

        buffer[TYPE_OFFSET] = self.page_type.as_u8();
        buffer[CELL_COUNT_OFFSET..CELL_COUNT_OFFSET + 2]
            .copy_from_slice(&self.cell_count.to_le_bytes());
        buffer[FREE_SPACE_OFFSET..FREE_SPACE_OFFSET + 2]
            .copy_from_slice(&self.free_space_offset.to_le_bytes());
        buffer[PAGE_ID_OFFSET..PAGE_ID_OFFSET + 8].copy_from_slice(&self.page_id.to_le_bytes());
        write_page_pointer(&mut buffer, RIGHT_CHILD_OFFSET, self.right_child);

        let mut offset = PAGE_HEADER_SIZE;
        for slot in &self.slot_directory.slots {
            buffer[offset..offset + 2].copy_from_slice(&slot.offset.to_le_bytes());
            buffer[offset + 2..offset + 4].copy_from_slice(&slot.length.to_le_bytes());
            offset += SLOT_DIRECTORY_ENTRY_SIZE;
        }

        // The cell data is already positioned in self.data
        let start = self.free_space_offset as usize;
        buffer[start..].copy_from_slice(&self.data[start..]);

        buffer
    }

    /// Deserialize a page from bytes following the documented layout
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DatabaseError> {
        if bytes.len() != PAGE_SIZE {
            return Err(DatabaseError::CorruptedPage {
                page_id: 0,
                reason: format!("expected {} bytes, got {}", PAGE_SIZE, bytes.len()),
            });
        }

        let page_type = PageType::from_u8(bytes[TYPE_OFFSET])?;
        let cell_count = read_u16(bytes, CELL_COUNT_OFFSET);
        let free_space_offset = read_u16(bytes, FREE_SPACE_OFFSET);
        let page_id = read_u64(bytes, PAGE_ID_OFFSET);
        let right_child = read_page_pointer(bytes, RIGHT_CHILD_OFFSET);

        let directory_end = PAGE_HEADER_SIZE + cell_count as usize * SLOT_DIRECTORY_ENTRY_SIZE;
        if directory_end > free_space_offset as usize || free_space_offset as usize > PAGE_SIZE {
            return Err(DatabaseError::CorruptedPage {
                page_id,
                reason: format!(
                    "slot directory for {} cells overlaps cell data at {}",
                    cell_count, free_space_offset
                ),
            });
        }

        let mut slots = Vec::with_capacity(cell_count as usize);
        let mut offset = PAGE_HEADER_SIZE;
        for _ in 0..cell_count {
            let slot_offset = read_u16(bytes, offset);
            let length = read_u16(bytes, offset + 2);
            offset += SLOT_DIRECTORY_ENTRY_SIZE;

            if (slot_offset as usize) < free_space_offset as usize
                || slot_offset as usize + length as usize > PAGE_SIZE
            {
                return Err(DatabaseError::CorruptedPage {
                    page_id,
                    reason: format!(
                        "slot at offset {} with length {} exceeds cell area",
                        slot_offset, length
                    ),
                });
            }
            slots.push(SlotEntry {
                offset: slot_offset,
                length,
            });
        }

        Ok(Page {
            page_id,
            page_type,
            right_child,
            slot_directory: SlotDirectory { slots },
            free_space_offset,
            cell_count,
            data: bytes.to_vec(),
        })
    }

    pub fn available_space(&self) -> usize {
        let slot_directory_size = self.slot_directory.slots.len() * SLOT_DIRECTORY_ENTRY_SIZE;
        let used_data_space = PAGE_SIZE - self.free_space_offset as usize;
        PAGE_SIZE - PAGE_HEADER_SIZE - slot_directory_size - used_data_space
    }

    pub fn can_fit(&self, data_size: usize) -> bool {
        self.available_space() >= data_size + SLOT_DIRECTORY_ENTRY_SIZE
    }

    /// Appends a cell; callers insert cells in key order.
    pub fn insert_cell(&mut self, data: &[u8]) -> Result<usize, DatabaseError> {
        if !self.can_fit(data.len()) {
            return Err(DatabaseError::PageFull {
                page_id: self.page_id,
            });
        }

        // Calculate new offset for the cell (grows downward)
        let new_offset = self.free_space_offset - data.len() as u16;
        let start = new_offset as usize;
        self.data[start..start + data.len()].copy_from_slice(data);

        let slot_index = self.slot_directory.slots.len();
        self.slot_directory.slots.push(SlotEntry {
            offset: new_offset,
            length: data.len() as u16,
        });

        self.free_space_offset = new_offset;
        self.cell_count += 1;

        Ok(slot_index)
    }

    pub fn get_cell(&self, slot_index: usize) -> Option<&[u8]> {
        self.slot_directory.slots.get(slot_index).map(|slot| {
            let start = slot.offset as usize;
            &self.data[start..start + slot.length as usize]
        })
    }

    pub fn cells(&self) -> impl Iterator<Item = &[u8]> {
        (0..self.slot_directory.slots.len()).filter_map(|i| self.get_cell(i))
    }
}

/*
 * Overflow page: the common 24-byte header where cell_count holds the number
 * of payload bytes and right_child links the next page of the chain.
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverflowPage {
    pub page_id: PageId,
    pub next: Option<PageId>,
    pub data: Vec<u8>,
}

impl OverflowPage {
    pub fn to_bytes(&self) -> Result<Vec<u8>, DatabaseError> {
        if self.data.len() > OVERFLOW_CAPACITY {
            return Err(DatabaseError::PageFull {
                page_id: self.page_id,
            });
        }
        let mut buffer = vec![0u8; PAGE_SIZE];
        buffer[TYPE_OFFSET] = PageType::Overflow.as_u8();
        buffer[CELL_COUNT_OFFSET..CELL_COUNT_OFFSET + 2]
            .copy_from_slice(&(self.data.len() as u16).to_le_bytes());
        buffer[PAGE_ID_OFFSET..PAGE_ID_OFFSET + 8].copy_from_slice(&self.page_id.to_le_bytes());
        write_page_pointer(&mut buffer, RIGHT_CHILD_OFFSET, self.next);
        buffer[PAGE_HEADER_SIZE..PAGE_HEADER_SIZE + self.data.len()].copy_from_slice(&self.data);
        Ok(buffer)
    }

    pub fn from_bytes(page_id: PageId, bytes: &[u8]) -> Result<Self, DatabaseError> {
        if bytes.len() != PAGE_SIZE || PageType::of(bytes)? != PageType::Overflow {
            return Err(DatabaseError::CorruptedPage {
                page_id,
                reason: "expected an overflow page".to_string(),
            });
        }
        let length = read_u16(bytes, CELL_COUNT_OFFSET) as usize;
        if length > OVERFLOW_CAPACITY {
            return Err(DatabaseError::CorruptedPage {
                page_id,
                reason: format!("overflow length {} exceeds page capacity", length),
            });
        }
        Ok(Self {
            page_id,
            next: read_page_pointer(bytes, RIGHT_CHILD_OFFSET),
            data: bytes[PAGE_HEADER_SIZE..PAGE_HEADER_SIZE + length].to_vec(),
        })
    }
}

/// A page parked on the free list. Only the header is rewritten when a page
/// is freed; the old content stays in place until the page is reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreePage {
    pub page_id: PageId,
    pub next: Option<PageId>,
}

impl FreePage {
    pub fn write_into(&self, bytes: &mut [u8]) {
        bytes[TYPE_OFFSET] = PageType::Free.as_u8();
        bytes[PAGE_ID_OFFSET..PAGE_ID_OFFSET + 8].copy_from_slice(&self.page_id.to_le_bytes());
        write_page_pointer(bytes, RIGHT_CHILD_OFFSET, self.next);
    }

    pub fn read(page_id: PageId, bytes: &[u8]) -> Result<Self, DatabaseError> {
        if bytes.len() != PAGE_SIZE || PageType::of(bytes)? != PageType::Free {
            return Err(DatabaseError::CorruptedPage {
                page_id,
                reason: "free list points at a page that is in use".to_string(),
            });
        }
        Ok(Self {
            page_id,
            next: read_page_pointer(bytes, RIGHT_CHILD_OFFSET),
        })
    }
}

fn read_u16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

fn read_u64(bytes: &[u8], offset: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[offset..offset + 8]);
    u64::from_le_bytes(raw)
}

// 0 represents None; page numbers are 1-based.
fn read_page_pointer(bytes: &[u8], offset: usize) -> Option<PageId> {
    match read_u64(bytes, offset) {
        0 => None,
        page_id => Some(page_id),
    }
}

fn write_page_pointer(bytes: &mut [u8], offset: usize, page_id: Option<PageId>) {
    bytes[offset..offset + 8].copy_from_slice(&page_id.unwrap_or(0).to_le_bytes());
}
