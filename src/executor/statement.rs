use std::sync::Arc;

use tracing::trace;

use crate::{
    executor::{
        ReadContext,
        function::ScalarFunction,
        predicate::Predicate,
        range_scan::{KeyRange, RangeCursor},
    },
    storage::btree::BTree,
    types::{
        RowId,
        error::{DatabaseError, Result},
        record::Record,
        value::Value,
    },
};

#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Row(RowId, Record),
    Done,
}

/// One output column of a statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    Column(usize),
    Call {
        function: Arc<ScalarFunction>,
        args: Vec<usize>,
    },
}

impl Projection {
    pub fn call(function: Arc<ScalarFunction>, args: Vec<usize>) -> Self {
        Self::Call { function, args }
    }

    fn evaluate(&self, record: &Record) -> Result<Value> {
        match self {
            Projection::Column(column) => record.get(*column).cloned(),
            Projection::Call { function, args } => function.call_on(record, args),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Point,
    Range { descending: bool },
}

#[derive(Debug, Clone, Default)]
enum Progress {
    #[default]
    Ready,
    Scanning(RangeCursor),
    Done,
}

/// A prepared lookup with bound key parameters.
///
/// A point statement takes one parameter, the key. A range statement takes
/// two optional parameters, the inclusive start and end keys; an unbound
/// range parameter leaves that side open. Once stepping has begun, changing
/// bindings only takes effect after `reset`.
#[derive(Debug, Clone)]
pub struct Statement {
    kind: Kind,
    params: Vec<Option<RowId>>,
    filter: Option<Predicate>,
    projection: Option<Vec<Projection>>,
    progress: Progress,
}

impl Statement {
    pub fn point() -> Self {
        Self::with_kind(Kind::Point, 1)
    }

    pub fn range(descending: bool) -> Self {
        Self::with_kind(Kind::Range { descending }, 2)
    }

    fn with_kind(kind: Kind, parameters: usize) -> Self {
        Self {
            kind,
            params: vec![None; parameters],
            filter: None,
            projection: None,
            progress: Progress::Ready,
        }
    }

    pub fn parameter_count(&self) -> usize {
        self.params.len()
    }

    /// Binds a key to a 1-based parameter index.
    pub fn bind(&mut self, index: usize, key: RowId) -> Result<()> {
        let count = self.params.len();
        let slot = index
            .checked_sub(1)
            .and_then(|i| self.params.get_mut(i))
            .ok_or(DatabaseError::ParameterIndexOutOfRange { index, count })?;
        *slot = Some(key);
        Ok(())
    }

    pub fn clear_bindings(&mut self) {
        self.params.iter_mut().for_each(|p| *p = None);
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.filter = Some(predicate);
        self
    }

    pub fn set_filter(&mut self, predicate: Option<Predicate>) {
        self.filter = predicate;
    }

    /// Rows come out as the listed columns instead of the stored record.
    /// The filter still sees the stored record.
    pub fn project(mut self, columns: Vec<Projection>) -> Self {
        self.projection = Some(columns);
        self
    }

    pub fn set_projection(&mut self, columns: Option<Vec<Projection>>) {
        self.projection = columns;
    }

    fn output(&self, record: Record) -> Result<Record> {
        match &self.projection {
            None => Ok(record),
            Some(columns) => columns
                .iter()
                .map(|column| column.evaluate(&record))
                .collect::<Result<Vec<_>>>()
                .map(Record::new),
        }
    }

    /// Rewinds to before the first row. Bindings are kept.
    pub fn reset(&mut self) {
        self.progress = Progress::Ready;
    }

    pub fn step<C: ReadContext + ?Sized>(&mut self, ctx: &C) -> Result<Step> {
        match std::mem::take(&mut self.progress) {
            Progress::Done => {
                self.progress = Progress::Done;
                Ok(Step::Done)
            }
            Progress::Ready => match self.kind {
                Kind::Point => {
                    self.progress = Progress::Done;
                    self.step_point(ctx)
                }
                Kind::Range { descending } => {
                    let range = KeyRange::inclusive(self.params[0], self.params[1]);
                    let mut cursor = RangeCursor::new(range, descending);
                    cursor.set_filter(self.filter.clone());
                    trace!(?range, descending, "range statement started");
                    self.step_range(ctx, cursor)
                }
            },
            Progress::Scanning(cursor) => self.step_range(ctx, cursor),
        }
    }

    fn step_point<C: ReadContext + ?Sized>(&self, ctx: &C) -> Result<Step> {
        let key = self.params[0].ok_or(DatabaseError::UnboundParameter { index: 1 })?;
        let found = ctx.with_pages(|pages| BTree::new(pages).find(key))?;
        let Some(payload) = found else {
            return Ok(Step::Done);
        };

        let record = Record::decode(&payload)?;
        match &self.filter {
            Some(filter) if !filter.evaluate(&record)? => Ok(Step::Done),
            _ => Ok(Step::Row(key, self.output(record)?)),
        }
    }

    fn step_range<C: ReadContext + ?Sized>(
        &mut self,
        ctx: &C,
        mut cursor: RangeCursor,
    ) -> Result<Step> {
        let row = ctx.with_pages(|pages| cursor.next_in(pages))?;
        match row {
            Some((key, record)) => {
                self.progress = Progress::Scanning(cursor);
                Ok(Step::Row(key, self.output(record)?))
            }
            None => {
                self.progress = Progress::Done;
                Ok(Step::Done)
            }
        }
    }

    /// Resets the statement and iterates over every row it produces.
    pub fn rows<'s, C: ReadContext + ?Sized>(&'s mut self, ctx: &'s C) -> Rows<'s, C> {
        self.reset();
        Rows {
            statement: self,
            ctx,
            finished: false,
        }
    }
}

pub struct Rows<'s, C: ReadContext + ?Sized> {
    statement: &'s mut Statement,
    ctx: &'s C,
    finished: bool,
}

impl<C: ReadContext + ?Sized> Iterator for Rows<'_, C> {
    type Item = Result<(RowId, Record)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.statement.step(self.ctx) {
            Ok(Step::Row(key, record)) => Some(Ok((key, record))),
            Ok(Step::Done) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}
