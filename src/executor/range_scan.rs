use std::ops::{Bound, RangeBounds};

use crate::{
    executor::{ReadContext, cursor::Cursor, predicate::Predicate, scan::Scanner},
    storage::pager::PageRead,
    types::{RowId, error::Result, record::Record},
};

/// Key range of a scan. Both ends use `std::ops::Bound`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyRange {
    pub start: Bound<RowId>,
    pub end: Bound<RowId>,
}

impl KeyRange {
    pub fn all() -> Self {
        Self {
            start: Bound::Unbounded,
            end: Bound::Unbounded,
        }
    }

    /// Inclusive on both sides; `None` leaves that side open.
    pub fn inclusive(start: Option<RowId>, end: Option<RowId>) -> Self {
        Self {
            start: start.map_or(Bound::Unbounded, Bound::Included),
            end: end.map_or(Bound::Unbounded, Bound::Included),
        }
    }

    pub fn from_bounds(range: impl RangeBounds<RowId>) -> Self {
        Self {
            start: range.start_bound().cloned(),
            end: range.end_bound().cloned(),
        }
    }

    pub fn contains(&self, key: RowId) -> bool {
        (self.start, self.end).contains(&key)
    }

    fn past_end(&self, key: RowId, descending: bool) -> bool {
        let bound = if descending { self.start } else { self.end };
        match (bound, descending) {
            (Bound::Unbounded, _) => false,
            (Bound::Included(limit), false) => key > limit,
            (Bound::Excluded(limit), false) => key >= limit,
            (Bound::Included(limit), true) => key < limit,
            (Bound::Excluded(limit), true) => key <= limit,
        }
    }
}

impl Default for KeyRange {
    fn default() -> Self {
        Self::all()
    }
}

/// Cursor walking a key range in either direction, with an optional row
/// filter. Used by scanners and by range statements.
#[derive(Debug, Clone, Default)]
pub struct RangeCursor {
    cursor: Cursor,
    range: KeyRange,
    descending: bool,
    filter: Option<Predicate>,
    started: bool,
    done: bool,
}

impl RangeCursor {
    pub fn new(range: KeyRange, descending: bool) -> Self {
        Self {
            cursor: Cursor::new(),
            range,
            descending,
            filter: None,
            started: false,
            done: false,
        }
    }

    pub fn set_range(&mut self, range: KeyRange) {
        self.range = range;
        self.reset();
    }

    pub fn set_filter(&mut self, filter: Option<Predicate>) {
        self.filter = filter;
    }

    pub fn is_descending(&self) -> bool {
        self.descending
    }

    pub fn reset(&mut self) {
        self.cursor.reset();
        self.started = false;
        self.done = false;
    }

    fn start<P: PageRead + ?Sized>(&mut self, pages: &P) -> Result<()> {
        self.started = true;
        if self.descending {
            match self.range.end {
                Bound::Unbounded => self.cursor.seek_last(pages),
                Bound::Included(key) => self.cursor.seek_le(pages, key),
                Bound::Excluded(key) => match key.checked_sub(1) {
                    Some(key) => self.cursor.seek_le(pages, key),
                    None => {
                        self.done = true;
                        Ok(())
                    }
                },
            }
        } else {
            match self.range.start {
                Bound::Unbounded => self.cursor.seek_first(pages),
                Bound::Included(key) => self.cursor.seek_ge(pages, key),
                Bound::Excluded(key) => match key.checked_add(1) {
                    Some(key) => self.cursor.seek_ge(pages, key),
                    None => {
                        self.done = true;
                        Ok(())
                    }
                },
            }
        }
    }

    /// Next row inside the range that passes the filter.
    pub fn next_in<P: PageRead + ?Sized>(&mut self, pages: &P) -> Result<Option<(RowId, Record)>> {
        if !self.started {
            self.start(pages)?;
        }
        loop {
            if self.done {
                return Ok(None);
            }
            let row = if self.descending {
                self.cursor.previous(pages)?
            } else {
                self.cursor.next(pages)?
            };
            let Some((key, record)) = row else {
                self.done = true;
                return Ok(None);
            };
            if self.range.past_end(key, self.descending) {
                self.done = true;
                return Ok(None);
            }
            match &self.filter {
                Some(filter) if !filter.evaluate(&record)? => continue,
                _ => return Ok(Some((key, record))),
            }
        }
    }
}

/// Scanner over a key range. Every call takes a fresh page view from the
/// context, so a scan over a connection observes commits made between calls
/// without revisiting keys it already returned.
pub struct RangeScanner<'c, C: ReadContext + ?Sized> {
    ctx: &'c C,
    cursor: RangeCursor,
}

impl<'c, C: ReadContext + ?Sized> RangeScanner<'c, C> {
    pub fn new(ctx: &'c C, range: KeyRange, descending: bool) -> Self {
        Self {
            ctx,
            cursor: RangeCursor::new(range, descending),
        }
    }

    pub fn full(ctx: &'c C) -> Self {
        Self::new(ctx, KeyRange::all(), false)
    }

    pub fn with_filter(mut self, filter: Predicate) -> Self {
        self.cursor.set_filter(Some(filter));
        self
    }
}

impl<C: ReadContext + ?Sized> Scanner for RangeScanner<'_, C> {
    fn scan(&mut self) -> Result<Option<(RowId, Record)>> {
        let cursor = &mut self.cursor;
        self.ctx.with_pages(|pages| cursor.next_in(pages))
    }

    fn reset(&mut self) -> Result<()> {
        self.cursor.reset();
        Ok(())
    }
}

impl<'c, C: ReadContext + ?Sized> IntoIterator for RangeScanner<'c, C> {
    type Item = Result<(RowId, Record)>;
    type IntoIter = crate::executor::scan::ScanIterator<RangeScanner<'c, C>>;

    fn into_iter(self) -> Self::IntoIter {
        crate::executor::scan::ScanIterator::new(self)
    }
}
