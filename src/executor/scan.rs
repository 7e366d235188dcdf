use crate::types::{RowId, error::Result, record::Record};

pub trait Scanner {
    fn scan(&mut self) -> Result<Option<(RowId, Record)>>;

    fn scan_batch(&mut self, batch_size: usize) -> Result<Vec<(RowId, Record)>> {
        let mut rows = Vec::with_capacity(batch_size);
        for _ in 0..batch_size {
            match self.scan()? {
                Some(row) => rows.push(row),
                None => break,
            }
        }
        Ok(rows)
    }

    fn reset(&mut self) -> Result<()>;
}

pub struct ScanIterator<S: Scanner> {
    scanner: S,
}

impl<S: Scanner> ScanIterator<S> {
    pub fn new(scanner: S) -> Self {
        Self { scanner }
    }

    pub fn into_inner(self) -> S {
        self.scanner
    }
}

impl<S: Scanner> Iterator for ScanIterator<S> {
    type Item = Result<(RowId, Record)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.scanner.scan().transpose()
    }
}
