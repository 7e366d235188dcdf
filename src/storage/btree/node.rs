use crate::types::{
    INTERIOR_CELL_SIZE, LEAF_CELL_HEADER_SIZE, PageId, RowId, SLOT_DIRECTORY_ENTRY_SIZE,
    error::{DatabaseError, Result},
    page::{Page, PageType},
};

/*
 * Leaf cell:     key(8) | payload_len(4) | overflow_page(8, 0 = none) | inline payload
 * Interior cell: child(8) | key(8)
 *
 * Child i of an interior node holds keys in (key[i-1], key[i]]; the
 * right_child pointer holds keys greater than the last key.
 */

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafCell {
    pub key: RowId,
    pub payload_len: u32,
    pub overflow: Option<PageId>,
    pub inline: Vec<u8>,
}

impl LeafCell {
    pub fn encoded_len(&self) -> usize {
        LEAF_CELL_HEADER_SIZE + self.inline.len()
    }

    /// Bytes the cell occupies on a page, slot included.
    pub fn footprint(&self) -> usize {
        self.encoded_len() + SLOT_DIRECTORY_ENTRY_SIZE
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(self.encoded_len());
        buffer.extend_from_slice(&self.key.to_le_bytes());
        buffer.extend_from_slice(&self.payload_len.to_le_bytes());
        buffer.extend_from_slice(&self.overflow.unwrap_or(0).to_le_bytes());
        buffer.extend_from_slice(&self.inline);
        buffer
    }

    pub fn decode(page_id: PageId, bytes: &[u8]) -> Result<Self> {
        if bytes.len() < LEAF_CELL_HEADER_SIZE {
            return Err(DatabaseError::corrupt_index(
                page_id,
                format!("leaf cell of {} bytes is truncated", bytes.len()),
            ));
        }
        let key = u64_at(bytes, 0);
        let payload_len = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
        let overflow = match u64_at(bytes, 12) {
            0 => None,
            page => Some(page),
        };
        let inline = bytes[LEAF_CELL_HEADER_SIZE..].to_vec();

        let spills = (payload_len as usize) > inline.len();
        if spills != overflow.is_some() || inline.len() > payload_len as usize {
            return Err(DatabaseError::corrupt_index(
                page_id,
                format!(
                    "cell for key {} declares {} payload bytes with {} inline",
                    key,
                    payload_len,
                    inline.len()
                ),
            ));
        }

        Ok(Self {
            key,
            payload_len,
            overflow,
            inline,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InteriorCell {
    pub child: PageId,
    pub key: RowId,
}

impl InteriorCell {
    pub fn encode(&self) -> [u8; INTERIOR_CELL_SIZE] {
        let mut buffer = [0u8; INTERIOR_CELL_SIZE];
        buffer[..8].copy_from_slice(&self.child.to_le_bytes());
        buffer[8..].copy_from_slice(&self.key.to_le_bytes());
        buffer
    }

    pub fn decode(page_id: PageId, bytes: &[u8]) -> Result<Self> {
        if bytes.len() != INTERIOR_CELL_SIZE {
            return Err(DatabaseError::corrupt_index(
                page_id,
                format!("interior cell of {} bytes", bytes.len()),
            ));
        }
        Ok(Self {
            child: u64_at(bytes, 0),
            key: u64_at(bytes, 8),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafNode {
    pub page_id: PageId,
    pub cells: Vec<LeafCell>,
}

impl LeafNode {
    pub fn new(page_id: PageId) -> Self {
        Self {
            page_id,
            cells: Vec::new(),
        }
    }

    pub fn used_bytes(&self) -> usize {
        used_bytes(&self.cells)
    }

    /// `Ok(i)` if `key` is at slot `i`, otherwise `Err(i)` with the insertion slot.
    pub fn search(&self, key: RowId) -> std::result::Result<usize, usize> {
        self.cells.binary_search_by_key(&key, |cell| cell.key)
    }

    pub fn max_key(&self) -> Option<RowId> {
        self.cells.last().map(|cell| cell.key)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InteriorNode {
    pub page_id: PageId,
    pub cells: Vec<InteriorCell>,
    pub right_child: PageId,
}

impl InteriorNode {
    pub const CELL_FOOTPRINT: usize = INTERIOR_CELL_SIZE + SLOT_DIRECTORY_ENTRY_SIZE;

    pub fn used_bytes(&self) -> usize {
        self.cells.len() * Self::CELL_FOOTPRINT
    }

    /// Index of the child whose range contains `key`; `cells.len()` means the
    /// right child.
    pub fn child_index(&self, key: RowId) -> usize {
        self.cells.partition_point(|cell| cell.key < key)
    }

    pub fn child_at(&self, index: usize) -> PageId {
        self.cells
            .get(index)
            .map(|cell| cell.child)
            .unwrap_or(self.right_child)
    }

    pub fn set_child(&mut self, index: usize, page_id: PageId) {
        match self.cells.get_mut(index) {
            Some(cell) => cell.child = page_id,
            None => self.right_child = page_id,
        }
    }

    pub fn child_count(&self) -> usize {
        self.cells.len() + 1
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BTreeNode {
    Leaf(LeafNode),
    Interior(InteriorNode),
}

impl BTreeNode {
    pub fn page_id(&self) -> PageId {
        match self {
            BTreeNode::Leaf(leaf) => leaf.page_id,
            BTreeNode::Interior(interior) => interior.page_id,
        }
    }

    pub fn used_bytes(&self) -> usize {
        match self {
            BTreeNode::Leaf(leaf) => leaf.used_bytes(),
            BTreeNode::Interior(interior) => interior.used_bytes(),
        }
    }

    pub fn keys(&self) -> Vec<RowId> {
        match self {
            BTreeNode::Leaf(leaf) => leaf.cells.iter().map(|c| c.key).collect(),
            BTreeNode::Interior(interior) => interior.cells.iter().map(|c| c.key).collect(),
        }
    }

    /// Decodes a tree page, checking its type, its self-reference and that
    /// keys are strictly increasing.
    pub fn decode(page_id: PageId, image: &[u8]) -> Result<Self> {
        let page = Page::from_bytes(image).map_err(|e| match e {
            DatabaseError::InvalidPageType(t) => {
                DatabaseError::corrupt_index(page_id, format!("unknown page type {}", t))
            }
            DatabaseError::CorruptedPage { reason, .. } => {
                DatabaseError::CorruptedPage { page_id, reason }
            }
            other => other,
        })?;
        if page.page_id != page_id {
            return Err(DatabaseError::corrupt_index(
                page_id,
                format!("page claims to be page {}", page.page_id),
            ));
        }

        let node = match page.page_type {
            PageType::Leaf => {
                let cells = page
                    .cells()
                    .map(|bytes| LeafCell::decode(page_id, bytes))
                    .collect::<Result<Vec<_>>>()?;
                BTreeNode::Leaf(LeafNode { page_id, cells })
            }
            PageType::Interior => {
                let cells = page
                    .cells()
                    .map(|bytes| InteriorCell::decode(page_id, bytes))
                    .collect::<Result<Vec<_>>>()?;
                let right_child = page.right_child.ok_or_else(|| {
                    DatabaseError::corrupt_index(page_id, "interior page without right child")
                })?;
                BTreeNode::Interior(InteriorNode {
                    page_id,
                    cells,
                    right_child,
                })
            }
            other => {
                return Err(DatabaseError::corrupt_index(
                    page_id,
                    format!("expected a tree page, found {:?}", other),
                ));
            }
        };

        let keys = node.keys();
        if let Some(pair) = keys.windows(2).find(|pair| pair[0] >= pair[1]) {
            return Err(DatabaseError::corrupt_index(
                page_id,
                format!("keys out of order: {} before {}", pair[0], pair[1]),
            ));
        }
        Ok(node)
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut page = match self {
            BTreeNode::Leaf(leaf) => {
                let mut page = Page::new(leaf.page_id, PageType::Leaf);
                for cell in &leaf.cells {
                    page.insert_cell(&cell.encode())?;
                }
                page
            }
            BTreeNode::Interior(interior) => {
                let mut page = Page::new(interior.page_id, PageType::Interior);
                for cell in &interior.cells {
                    page.insert_cell(&cell.encode())?;
                }
                page
            }
        };
        if let BTreeNode::Interior(interior) = self {
            page.right_child = Some(interior.right_child);
        }
        Ok(page.to_bytes())
    }
}

fn used_bytes(cells: &[LeafCell]) -> usize {
    cells.iter().map(LeafCell::footprint).sum()
}

/// Index at which `cells` divides into two byte-balanced, non-empty halves.
pub fn balanced_split_point(cells: &[LeafCell]) -> usize {
    let total = used_bytes(cells);
    let mut running = 0;
    for (index, cell) in cells.iter().enumerate() {
        running += cell.footprint();
        if running * 2 >= total {
            return (index + 1).clamp(1, cells.len().saturating_sub(1).max(1));
        }
    }
    cells.len() / 2
}

fn u64_at(bytes: &[u8], offset: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[offset..offset + 8]);
    u64::from_le_bytes(raw)
}
