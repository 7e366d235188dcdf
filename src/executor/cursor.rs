use tracing::trace;

use crate::{
    storage::{
        btree::{
            BTree, KeyBounds,
            node::{BTreeNode, LeafCell},
        },
        pager::PageRead,
    },
    types::{
        RowId,
        error::{DatabaseError, Result},
        record::Record,
    },
};

const MAX_DEPTH: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Seek {
    First,
    Last,
    /// First key greater than or equal to the target.
    Ge(RowId),
    /// Last key less than or equal to the target.
    Le(RowId),
}

impl Seek {
    fn forward(&self) -> bool {
        matches!(self, Seek::First | Seek::Ge(_))
    }
}

#[derive(Debug, Clone)]
struct Frame {
    node: BTreeNode,
    index: usize,
    bounds: KeyBounds,
}

/// Position inside the tree, kept as the descent path from the root.
///
/// The cursor does not own a page source; each call is handed one (a fresh
/// read snapshot or the live transaction). When the source's generation
/// differs from the one the path was built under, the cursor re-seeks just
/// past the last key it returned instead of trusting stale slot indices.
#[derive(Debug, Clone, Default)]
pub struct Cursor {
    stack: Vec<Frame>,
    generation: Option<u64>,
    last_key: Option<RowId>,
    target: Option<Seek>,
    fresh: bool,
    exhausted: bool,
}

impl Cursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_positioned(&self) -> bool {
        self.generation.is_some()
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn last_key(&self) -> Option<RowId> {
        self.last_key
    }

    /// Forgets the position; the next move starts from an edge.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn seek<P: PageRead + ?Sized>(&mut self, src: &P, seek: Seek) -> Result<()> {
        self.target = Some(seek);
        self.last_key = None;
        self.position(src, seek)
    }

    pub fn seek_first<P: PageRead + ?Sized>(&mut self, src: &P) -> Result<()> {
        self.seek(src, Seek::First)
    }

    pub fn seek_last<P: PageRead + ?Sized>(&mut self, src: &P) -> Result<()> {
        self.seek(src, Seek::Last)
    }

    pub fn seek_ge<P: PageRead + ?Sized>(&mut self, src: &P, key: RowId) -> Result<()> {
        self.seek(src, Seek::Ge(key))
    }

    pub fn seek_le<P: PageRead + ?Sized>(&mut self, src: &P, key: RowId) -> Result<()> {
        self.seek(src, Seek::Le(key))
    }

    /// Returns the entry under the cursor if it was just positioned,
    /// otherwise advances first.
    pub fn next<P: PageRead + ?Sized>(&mut self, src: &P) -> Result<Option<(RowId, Record)>> {
        self.revalidate(src, true)?;
        if self.exhausted {
            return Ok(None);
        }
        if !self.fresh && !self.step_forward(src)? {
            return Ok(None);
        }
        self.take_current(src)
    }

    pub fn previous<P: PageRead + ?Sized>(&mut self, src: &P) -> Result<Option<(RowId, Record)>> {
        self.revalidate(src, false)?;
        if self.exhausted {
            return Ok(None);
        }
        if !self.fresh && !self.step_backward(src)? {
            return Ok(None);
        }
        self.take_current(src)
    }

    fn revalidate<P: PageRead + ?Sized>(&mut self, src: &P, forward: bool) -> Result<()> {
        if self.generation == Some(src.generation()) {
            return Ok(());
        }

        let seek = match (self.last_key, self.target) {
            (Some(last), _) => {
                let resume = if forward {
                    last.checked_add(1).map(Seek::Ge)
                } else {
                    last.checked_sub(1).map(Seek::Le)
                };
                match resume {
                    Some(seek) => seek,
                    None => {
                        self.finish(src);
                        return Ok(());
                    }
                }
            }
            (None, Some(target)) => target,
            (None, None) if forward => Seek::First,
            (None, None) => Seek::Last,
        };
        if self.generation.is_some() {
            trace!(?seek, "cursor re-seeking after tree change");
        }
        self.position(src, seek)
    }

    fn finish<P: PageRead + ?Sized>(&mut self, src: &P) {
        self.stack.clear();
        self.generation = Some(src.generation());
        self.exhausted = true;
        self.fresh = false;
    }

    fn take_current<P: PageRead + ?Sized>(&mut self, src: &P) -> Result<Option<(RowId, Record)>> {
        let Some(cell) = self.current_cell() else {
            self.exhausted = true;
            return Ok(None);
        };
        let key = cell.key;
        let payload = BTree::new(src).payload(cell)?;
        let record = Record::decode(&payload)?;

        self.fresh = false;
        self.last_key = Some(key);
        self.target = None;
        Ok(Some((key, record)))
    }

    fn current_cell(&self) -> Option<&LeafCell> {
        match self.stack.last() {
            Some(Frame {
                node: BTreeNode::Leaf(leaf),
                index,
                ..
            }) => leaf.cells.get(*index),
            _ => None,
        }
    }

    fn position<P: PageRead + ?Sized>(&mut self, src: &P, seek: Seek) -> Result<()> {
        self.stack.clear();
        self.generation = Some(src.generation());
        self.exhausted = false;
        self.fresh = true;

        let tree = BTree::new(src);
        let mut page_id = tree.root_page_id();
        let mut bounds = KeyBounds::default();

        for _ in 0..MAX_DEPTH {
            let node = tree.load_node(page_id, bounds)?;
            match node {
                BTreeNode::Interior(ref interior) => {
                    let index = match seek {
                        Seek::First => 0,
                        Seek::Last => interior.cells.len(),
                        Seek::Ge(key) | Seek::Le(key) => interior.child_index(key),
                    };
                    page_id = interior.child_at(index);
                    let child_bounds = bounds.child(interior, index);
                    self.stack.push(Frame {
                        node,
                        index,
                        bounds,
                    });
                    bounds = child_bounds;
                }
                BTreeNode::Leaf(ref leaf) => {
                    let len = leaf.cells.len();
                    let index = match seek {
                        Seek::First => Some(0),
                        Seek::Ge(key) => Some(leaf.search(key).unwrap_or_else(|slot| slot)),
                        Seek::Last => len.checked_sub(1),
                        Seek::Le(key) => match leaf.search(key) {
                            Ok(slot) => Some(slot),
                            Err(slot) => slot.checked_sub(1),
                        },
                    };
                    self.stack.push(Frame {
                        node,
                        index: index.unwrap_or(0),
                        bounds,
                    });

                    let on_entry = index.is_some_and(|i| i < len);
                    if !on_entry {
                        let moved = if seek.forward() {
                            self.next_leaf(src)?
                        } else {
                            self.previous_leaf(src)?
                        };
                        if !moved {
                            self.exhausted = true;
                            self.fresh = false;
                        }
                    }
                    return Ok(());
                }
            }
        }
        Err(DatabaseError::corrupt_index(
            page_id,
            "tree exceeds maximum depth",
        ))
    }

    fn step_forward<P: PageRead + ?Sized>(&mut self, src: &P) -> Result<bool> {
        if let Some(Frame {
            node: BTreeNode::Leaf(leaf),
            index,
            ..
        }) = self.stack.last_mut()
        {
            if *index + 1 < leaf.cells.len() {
                *index += 1;
                return Ok(true);
            }
        }
        let moved = self.next_leaf(src)?;
        if !moved {
            self.exhausted = true;
        }
        Ok(moved)
    }

    fn step_backward<P: PageRead + ?Sized>(&mut self, src: &P) -> Result<bool> {
        if let Some(Frame {
            node: BTreeNode::Leaf(_),
            index,
            ..
        }) = self.stack.last_mut()
        {
            if *index > 0 {
                *index -= 1;
                return Ok(true);
            }
        }
        let moved = self.previous_leaf(src)?;
        if !moved {
            self.exhausted = true;
        }
        Ok(moved)
    }

    /// Pops to the nearest ancestor with a right sibling subtree and
    /// descends to that subtree's leftmost non-empty leaf.
    fn next_leaf<P: PageRead + ?Sized>(&mut self, src: &P) -> Result<bool> {
        loop {
            self.stack.pop();
            loop {
                let Some(frame) = self.stack.last_mut() else {
                    return Ok(false);
                };
                if let BTreeNode::Interior(interior) = &frame.node {
                    if frame.index < interior.cells.len() {
                        frame.index += 1;
                        break;
                    }
                }
                self.stack.pop();
            }
            if self.descend_edge(src, true)? {
                return Ok(true);
            }
        }
    }

    fn previous_leaf<P: PageRead + ?Sized>(&mut self, src: &P) -> Result<bool> {
        loop {
            self.stack.pop();
            loop {
                let Some(frame) = self.stack.last_mut() else {
                    return Ok(false);
                };
                if let BTreeNode::Interior(_) = &frame.node {
                    if frame.index > 0 {
                        frame.index -= 1;
                        break;
                    }
                }
                self.stack.pop();
            }
            if self.descend_edge(src, false)? {
                return Ok(true);
            }
        }
    }

    /// Descends from the child selected by the top frame to the leftmost
    /// (or rightmost) leaf. Returns false if that leaf is empty.
    fn descend_edge<P: PageRead + ?Sized>(&mut self, src: &P, leftmost: bool) -> Result<bool> {
        let tree = BTree::new(src);
        let (mut page_id, mut bounds) = match self.stack.last() {
            Some(Frame {
                node: BTreeNode::Interior(interior),
                index,
                bounds,
            }) => (interior.child_at(*index), bounds.child(interior, *index)),
            _ => return Ok(false),
        };

        for _ in 0..MAX_DEPTH {
            let node = tree.load_node(page_id, bounds)?;
            match node {
                BTreeNode::Interior(ref interior) => {
                    let index = if leftmost { 0 } else { interior.cells.len() };
                    page_id = interior.child_at(index);
                    let child_bounds = bounds.child(interior, index);
                    self.stack.push(Frame {
                        node,
                        index,
                        bounds,
                    });
                    bounds = child_bounds;
                }
                BTreeNode::Leaf(ref leaf) => {
                    let len = leaf.cells.len();
                    let index = if leftmost { 0 } else { len.saturating_sub(1) };
                    self.stack.push(Frame {
                        node,
                        index,
                        bounds,
                    });
                    return Ok(len > 0);
                }
            }
        }
        Err(DatabaseError::corrupt_index(
            page_id,
            "tree exceeds maximum depth",
        ))
    }
}
