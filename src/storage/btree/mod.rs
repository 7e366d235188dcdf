pub mod node;

use std::collections::HashSet;

use tracing::{debug, trace};

use crate::{
    storage::{
        cache::PageImage,
        pager::{PageRead, PageWrite},
    },
    types::{
        MAX_FILL, MAX_INLINE_PAYLOAD, MIN_FILL, OVERFLOW_CAPACITY, PageId, RowId,
        error::{DatabaseError, Result},
        page::{FreePage, OverflowPage},
    },
};

use node::{BTreeNode, InteriorCell, InteriorNode, LeafCell, LeafNode, balanced_split_point};

/// Deeper than any tree a 64-bit key space can produce with these fan-outs.
const MAX_DEPTH: usize = 32;

/// Key range a subtree may hold: `(lower, upper]`, `None` meaning unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeyBounds {
    pub lower: Option<RowId>,
    pub upper: Option<RowId>,
}

impl KeyBounds {
    pub fn contains(&self, key: RowId) -> bool {
        self.lower.is_none_or(|lower| key > lower) && self.upper.is_none_or(|upper| key <= upper)
    }

    /// Bounds of the subtree behind child `index` of `node`.
    pub fn child(&self, node: &InteriorNode, index: usize) -> KeyBounds {
        KeyBounds {
            lower: match index {
                0 => self.lower,
                i => Some(node.cells[i - 1].key),
            },
            upper: node.cells.get(index).map(|cell| cell.key).or(self.upper),
        }
    }
}

#[derive(Debug)]
pub struct SplitResult {
    pub separator_key: RowId,
    pub right_page_id: PageId,
}

#[derive(Debug, Default)]
struct Change {
    split: Option<SplitResult>,
    underflow: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    Replaced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TreeStats {
    pub height: usize,
    pub leaf_pages: u64,
    pub interior_pages: u64,
    pub overflow_pages: u64,
    pub free_pages: u64,
    pub entries: u64,
}

/// B-tree keyed by row id over whatever page source it is given: a read
/// snapshot for lookups, a write handle inside a transaction for mutation.
pub struct BTree<P> {
    pager: P,
}

impl<P: PageRead> BTree<P> {
    pub fn new(pager: P) -> Self {
        Self { pager }
    }

    pub fn pager(&self) -> &P {
        &self.pager
    }

    pub fn root_page_id(&self) -> PageId {
        self.pager.header().root_page
    }

    /// Loads a node and checks that its keys fall inside `bounds`.
    pub fn load_node(&self, page_id: PageId, bounds: KeyBounds) -> Result<BTreeNode> {
        let image = self.pager.read_page(page_id)?;
        let node = BTreeNode::decode(page_id, &image)?;
        if let Some(key) = node.keys().into_iter().find(|&k| !bounds.contains(k)) {
            return Err(DatabaseError::corrupt_index(
                page_id,
                format!(
                    "key {} outside parent bounds ({:?}, {:?}]",
                    key, bounds.lower, bounds.upper
                ),
            ));
        }
        Ok(node)
    }

    pub fn find(&self, key: RowId) -> Result<Option<Vec<u8>>> {
        let mut page_id = self.root_page_id();
        let mut bounds = KeyBounds::default();

        for _ in 0..MAX_DEPTH {
            match self.load_node(page_id, bounds)? {
                BTreeNode::Interior(interior) => {
                    let index = interior.child_index(key);
                    bounds = bounds.child(&interior, index);
                    page_id = interior.child_at(index);
                }
                BTreeNode::Leaf(leaf) => {
                    return match leaf.search(key) {
                        Ok(slot) => self.payload(&leaf.cells[slot]).map(Some),
                        Err(_) => Ok(None),
                    };
                }
            }
        }
        Err(too_deep(page_id))
    }

    pub fn contains(&self, key: RowId) -> Result<bool> {
        Ok(self.find(key)?.is_some())
    }

    /// Reassembles a cell's payload, following its overflow chain.
    pub fn payload(&self, cell: &LeafCell) -> Result<Vec<u8>> {
        let total = cell.payload_len as usize;
        let mut payload = Vec::with_capacity(total);
        payload.extend_from_slice(&cell.inline);

        let mut next = cell.overflow;
        let mut hops = 0u64;
        while let Some(page_id) = next {
            hops += 1;
            if hops > self.pager.header().page_count {
                return Err(DatabaseError::corrupt_index(page_id, "overflow chain loops"));
            }
            let image = self.pager.read_page(page_id)?;
            let page = OverflowPage::from_bytes(page_id, &image)?;
            payload.extend_from_slice(&page.data);
            next = page.next;
        }

        if payload.len() != total {
            return Err(DatabaseError::corrupt_index(
                cell.overflow.unwrap_or_default(),
                format!(
                    "payload for key {} has {} bytes, expected {}",
                    cell.key,
                    payload.len(),
                    total
                ),
            ));
        }
        Ok(payload)
    }

    /// Walks the whole tree and free list, checking ordering, parent bounds,
    /// occupancy and uniform leaf depth.
    pub fn verify(&self) -> Result<TreeStats> {
        let mut stats = TreeStats::default();
        let mut seen = HashSet::new();
        let mut leaf_depth = None;
        let root = self.root_page_id();
        self.verify_node(
            root,
            KeyBounds::default(),
            1,
            true,
            &mut leaf_depth,
            &mut seen,
            &mut stats,
        )?;
        stats.height = leaf_depth.unwrap_or(1);
        stats.free_pages = self.verify_free_list(&mut seen)?;
        Ok(stats)
    }

    #[allow(clippy::too_many_arguments)]
    fn verify_node(
        &self,
        page_id: PageId,
        bounds: KeyBounds,
        depth: usize,
        is_root: bool,
        leaf_depth: &mut Option<usize>,
        seen: &mut HashSet<PageId>,
        stats: &mut TreeStats,
    ) -> Result<()> {
        if depth > MAX_DEPTH {
            return Err(too_deep(page_id));
        }
        if !seen.insert(page_id) {
            return Err(DatabaseError::corrupt_index(page_id, "page referenced twice"));
        }

        let node = self.load_node(page_id, bounds)?;
        if !is_root && node.used_bytes() < MIN_FILL {
            return Err(DatabaseError::corrupt_index(
                page_id,
                format!("node holds {} bytes, below minimum fill", node.used_bytes()),
            ));
        }

        match node {
            BTreeNode::Leaf(leaf) => {
                match *leaf_depth {
                    None => *leaf_depth = Some(depth),
                    Some(expected) if expected != depth => {
                        return Err(DatabaseError::corrupt_index(
                            page_id,
                            format!("leaf at depth {}, expected {}", depth, expected),
                        ));
                    }
                    Some(_) => {}
                }
                stats.leaf_pages += 1;
                stats.entries += leaf.cells.len() as u64;

                for cell in &leaf.cells {
                    let mut next = cell.overflow;
                    while let Some(overflow_id) = next {
                        if !seen.insert(overflow_id) {
                            return Err(DatabaseError::corrupt_index(
                                overflow_id,
                                "overflow page referenced twice",
                            ));
                        }
                        let image = self.pager.read_page(overflow_id)?;
                        next = OverflowPage::from_bytes(overflow_id, &image)?.next;
                        stats.overflow_pages += 1;
                    }
                    self.payload(cell)?;
                }
            }
            BTreeNode::Interior(interior) => {
                if interior.cells.is_empty() && !is_root {
                    return Err(DatabaseError::corrupt_index(page_id, "empty interior node"));
                }
                stats.interior_pages += 1;
                for index in 0..interior.child_count() {
                    self.verify_node(
                        interior.child_at(index),
                        bounds.child(&interior, index),
                        depth + 1,
                        false,
                        leaf_depth,
                        seen,
                        stats,
                    )?;
                }
            }
        }
        Ok(())
    }

    fn verify_free_list(&self, seen: &mut HashSet<PageId>) -> Result<u64> {
        let header = self.pager.header();
        let mut count = 0;
        let mut next = match header.freelist_head {
            0 => None,
            head => Some(head),
        };
        while let Some(page_id) = next {
            if !seen.insert(page_id) {
                return Err(DatabaseError::corrupt_index(
                    page_id,
                    "free page is also in use or listed twice",
                ));
            }
            let image = self.pager.read_page(page_id)?;
            next = FreePage::read(page_id, &image)?.next;
            count += 1;
        }
        if count != header.freelist_count {
            return Err(DatabaseError::CorruptHeader {
                reason: format!(
                    "free list holds {} pages, header records {}",
                    count, header.freelist_count
                ),
            });
        }
        Ok(count)
    }
}

impl<P: PageWrite> BTree<P> {
    /// Inserts or replaces the payload stored under `key`.
    pub fn insert(&mut self, key: RowId, payload: &[u8]) -> Result<InsertOutcome> {
        let root = self.root_page_id();
        let mut replaced = false;
        let change = self.insert_into(root, KeyBounds::default(), key, payload, 0, &mut replaced)?;

        if let Some(split) = change.split {
            let new_root = self.pager.allocate_page()?;
            let node = BTreeNode::Interior(InteriorNode {
                page_id: new_root,
                cells: vec![InteriorCell {
                    child: root,
                    key: split.separator_key,
                }],
                right_child: split.right_page_id,
            });
            self.store(&node)?;
            self.pager.header_mut().root_page = new_root;
            debug!(root = new_root, "tree grew a level");
        } else if change.underflow {
            self.collapse_root()?;
        }

        Ok(if replaced {
            InsertOutcome::Replaced
        } else {
            InsertOutcome::Inserted
        })
    }

    /// Removes `key`; returns whether it was present.
    pub fn delete(&mut self, key: RowId) -> Result<bool> {
        let root = self.root_page_id();
        let Some(change) = self.delete_from(root, KeyBounds::default(), key, 0)? else {
            return Ok(false);
        };
        if change.underflow {
            self.collapse_root()?;
        }
        Ok(true)
    }

    fn insert_into(
        &mut self,
        page_id: PageId,
        bounds: KeyBounds,
        key: RowId,
        payload: &[u8],
        depth: usize,
        replaced: &mut bool,
    ) -> Result<Change> {
        if depth >= MAX_DEPTH {
            return Err(too_deep(page_id));
        }

        match self.load_node(page_id, bounds)? {
            BTreeNode::Leaf(mut leaf) => {
                let cell = self.build_cell(key, payload)?;
                match leaf.search(key) {
                    Ok(slot) => {
                        let old = std::mem::replace(&mut leaf.cells[slot], cell);
                        self.free_overflow(old.overflow)?;
                        *replaced = true;
                    }
                    Err(slot) => leaf.cells.insert(slot, cell),
                }

                if leaf.used_bytes() > MAX_FILL {
                    return self.split_leaf(leaf).map(|split| Change {
                        split: Some(split),
                        underflow: false,
                    });
                }
                let underflow = leaf.used_bytes() < MIN_FILL;
                self.store(&BTreeNode::Leaf(leaf))?;
                Ok(Change {
                    split: None,
                    underflow,
                })
            }
            BTreeNode::Interior(mut interior) => {
                let index = interior.child_index(key);
                let child = interior.child_at(index);
                let child_bounds = bounds.child(&interior, index);
                let change =
                    self.insert_into(child, child_bounds, key, payload, depth + 1, replaced)?;

                if let Some(split) = change.split {
                    interior.cells.insert(
                        index,
                        InteriorCell {
                            child,
                            key: split.separator_key,
                        },
                    );
                    interior.set_child(index + 1, split.right_page_id);
                    if interior.used_bytes() > MAX_FILL {
                        return self.split_interior(interior).map(|split| Change {
                            split: Some(split),
                            underflow: false,
                        });
                    }
                    self.store(&BTreeNode::Interior(interior))?;
                    return Ok(Change::default());
                }

                if change.underflow {
                    return self.rebalance(interior, index);
                }
                Ok(Change::default())
            }
        }
    }

    fn delete_from(
        &mut self,
        page_id: PageId,
        bounds: KeyBounds,
        key: RowId,
        depth: usize,
    ) -> Result<Option<Change>> {
        if depth >= MAX_DEPTH {
            return Err(too_deep(page_id));
        }

        match self.load_node(page_id, bounds)? {
            BTreeNode::Leaf(mut leaf) => {
                let Ok(slot) = leaf.search(key) else {
                    return Ok(None);
                };
                let removed = leaf.cells.remove(slot);
                self.free_overflow(removed.overflow)?;
                let underflow = leaf.used_bytes() < MIN_FILL;
                self.store(&BTreeNode::Leaf(leaf))?;
                Ok(Some(Change {
                    split: None,
                    underflow,
                }))
            }
            BTreeNode::Interior(interior) => {
                let index = interior.child_index(key);
                let child = interior.child_at(index);
                let child_bounds = bounds.child(&interior, index);
                match self.delete_from(child, child_bounds, key, depth + 1)? {
                    None => Ok(None),
                    Some(change) if change.underflow => self.rebalance(interior, index).map(Some),
                    Some(_) => Ok(Some(Change::default())),
                }
            }
        }
    }

    /// Fixes an underflowing child by merging it with, or borrowing from, an
    /// adjacent sibling. Reports whether `parent` itself now underflows.
    fn rebalance(&mut self, mut parent: InteriorNode, index: usize) -> Result<Change> {
        if parent.cells.is_empty() {
            return Ok(Change::default());
        }
        let left_index = if index > 0 { index - 1 } else { 0 };
        let left_id = parent.child_at(left_index);
        let right_id = parent.child_at(left_index + 1);
        let separator = parent.cells[left_index].key;

        let left = self.pager.read_page(left_id)?;
        let right = self.pager.read_page(right_id)?;
        let left = BTreeNode::decode(left_id, &left)?;
        let right = BTreeNode::decode(right_id, &right)?;

        match (left, right) {
            (BTreeNode::Leaf(mut left), BTreeNode::Leaf(right)) => {
                let mut combined = left.cells;
                combined.extend(right.cells);
                let total: usize = combined.iter().map(LeafCell::footprint).sum();

                if total <= MAX_FILL {
                    left.cells = combined;
                    self.store(&BTreeNode::Leaf(left))?;
                    self.pager.free_page(right_id)?;
                    parent.cells.remove(left_index);
                    parent.set_child(left_index, left_id);
                    trace!(left = left_id, right = right_id, "merged leaves");
                } else {
                    let right_cells = combined.split_off(balanced_split_point(&combined));
                    left.cells = combined;
                    parent.cells[left_index].key = left.max_key().unwrap_or(separator);
                    self.store(&BTreeNode::Leaf(left))?;
                    self.store(&BTreeNode::Leaf(LeafNode {
                        page_id: right_id,
                        cells: right_cells,
                    }))?;
                    trace!(left = left_id, right = right_id, "redistributed leaves");
                }
            }
            (BTreeNode::Interior(mut left), BTreeNode::Interior(mut right)) => {
                let mut combined = left.cells;
                combined.push(InteriorCell {
                    child: left.right_child,
                    key: separator,
                });
                combined.extend(right.cells);

                if combined.len() * InteriorNode::CELL_FOOTPRINT <= MAX_FILL {
                    left.cells = combined;
                    left.right_child = right.right_child;
                    self.store(&BTreeNode::Interior(left))?;
                    self.pager.free_page(right_id)?;
                    parent.cells.remove(left_index);
                    parent.set_child(left_index, left_id);
                    trace!(left = left_id, right = right_id, "merged interior nodes");
                } else {
                    let middle = combined.len() / 2;
                    let right_cells = combined.split_off(middle + 1);
                    let promoted = combined.pop().ok_or_else(|| {
                        DatabaseError::corrupt_index(left_id, "redistribution without cells")
                    })?;
                    left.cells = combined;
                    left.right_child = promoted.child;
                    right.cells = right_cells;
                    parent.cells[left_index].key = promoted.key;
                    self.store(&BTreeNode::Interior(left))?;
                    self.store(&BTreeNode::Interior(right))?;
                    trace!(left = left_id, right = right_id, "redistributed interior nodes");
                }
            }
            _ => {
                return Err(DatabaseError::corrupt_index(
                    parent.page_id,
                    "siblings of different node types",
                ));
            }
        }

        let underflow = parent.used_bytes() < MIN_FILL;
        self.store(&BTreeNode::Interior(parent))?;
        Ok(Change {
            split: None,
            underflow,
        })
    }

    /// Replaces an interior root that lost its last separator by its only
    /// child.
    fn collapse_root(&mut self) -> Result<()> {
        let root = self.root_page_id();
        if let BTreeNode::Interior(interior) = self.load_node(root, KeyBounds::default())? {
            if interior.cells.is_empty() {
                self.pager.header_mut().root_page = interior.right_child;
                self.pager.free_page(root)?;
                debug!(root = interior.right_child, "tree lost a level");
            }
        }
        Ok(())
    }

    fn split_leaf(&mut self, mut leaf: LeafNode) -> Result<SplitResult> {
        let right_page_id = self.pager.allocate_page()?;
        let right_cells = leaf.cells.split_off(balanced_split_point(&leaf.cells));
        let separator_key = leaf.max_key().ok_or_else(|| {
            DatabaseError::corrupt_index(leaf.page_id, "split produced an empty leaf")
        })?;

        self.store(&BTreeNode::Leaf(leaf))?;
        self.store(&BTreeNode::Leaf(LeafNode {
            page_id: right_page_id,
            cells: right_cells,
        }))?;
        Ok(SplitResult {
            separator_key,
            right_page_id,
        })
    }

    fn split_interior(&mut self, mut interior: InteriorNode) -> Result<SplitResult> {
        let right_page_id = self.pager.allocate_page()?;
        let middle = interior.cells.len() / 2;
        let right_cells = interior.cells.split_off(middle + 1);
        let promoted = interior.cells.pop().ok_or_else(|| {
            DatabaseError::corrupt_index(interior.page_id, "split of an empty interior node")
        })?;

        let right = InteriorNode {
            page_id: right_page_id,
            cells: right_cells,
            right_child: interior.right_child,
        };
        interior.right_child = promoted.child;

        self.store(&BTreeNode::Interior(interior))?;
        self.store(&BTreeNode::Interior(right))?;
        Ok(SplitResult {
            separator_key: promoted.key,
            right_page_id,
        })
    }

    /// Builds a leaf cell, spilling the payload tail into overflow pages.
    fn build_cell(&mut self, key: RowId, payload: &[u8]) -> Result<LeafCell> {
        let payload_len = u32::try_from(payload.len()).map_err(|_| {
            DatabaseError::ArithmeticOverflow {
                details: format!("payload of {} bytes", payload.len()),
            }
        })?;
        if payload.len() <= MAX_INLINE_PAYLOAD {
            return Ok(LeafCell {
                key,
                payload_len,
                overflow: None,
                inline: payload.to_vec(),
            });
        }

        let (inline, tail) = payload.split_at(MAX_INLINE_PAYLOAD);
        let chunks: Vec<&[u8]> = tail.chunks(OVERFLOW_CAPACITY).collect();
        let mut pages = Vec::with_capacity(chunks.len());
        for _ in &chunks {
            pages.push(self.pager.allocate_page()?);
        }
        for (index, chunk) in chunks.iter().enumerate() {
            let page = OverflowPage {
                page_id: pages[index],
                next: pages.get(index + 1).copied(),
                data: chunk.to_vec(),
            };
            self.pager.write_page(page.page_id, page.to_bytes()?)?;
        }

        Ok(LeafCell {
            key,
            payload_len,
            overflow: pages.first().copied(),
            inline: inline.to_vec(),
        })
    }

    fn free_overflow(&mut self, head: Option<PageId>) -> Result<()> {
        let mut next = head;
        let mut hops = 0u64;
        while let Some(page_id) = next {
            hops += 1;
            if hops > self.pager.header().page_count {
                return Err(DatabaseError::corrupt_index(page_id, "overflow chain loops"));
            }
            let image: PageImage = self.pager.read_page(page_id)?;
            next = OverflowPage::from_bytes(page_id, &image)?.next;
            self.pager.free_page(page_id)?;
        }
        Ok(())
    }

    fn store(&mut self, node: &BTreeNode) -> Result<()> {
        self.pager.write_page(node.page_id(), node.encode()?)
    }
}

fn too_deep(page_id: PageId) -> DatabaseError {
    DatabaseError::corrupt_index(page_id, "tree exceeds maximum depth")
}
