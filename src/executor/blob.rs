use crate::{
    executor::ReadContext,
    storage::btree::BTree,
    types::{
        RowId,
        error::{DatabaseError, Result},
        record::Record,
        value::{DataType, Value},
    },
};

/// Handle on one blob column of one row, read in pieces.
///
/// The bytes are copied out of the tree when the handle is opened, so later
/// commits do not change what it reads until `reopen`.
#[derive(Debug, Clone)]
pub struct Blob {
    key: RowId,
    column: usize,
    data: Vec<u8>,
}

impl Blob {
    pub fn open<C: ReadContext + ?Sized>(ctx: &C, key: RowId, column: usize) -> Result<Self> {
        let data = load(ctx, key, column)?;
        Ok(Self { key, column, data })
    }

    pub fn key(&self) -> RowId {
        self.key
    }

    pub fn column(&self) -> usize {
        self.column
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Reads `count` bytes starting at `offset`.
    pub fn read(&self, count: usize, offset: usize) -> Result<&[u8]> {
        let range = checked_range(offset, count, self.data.len())?;
        Ok(&self.data[range])
    }

    /// Points the handle at the same column of another row.
    pub fn reopen<C: ReadContext + ?Sized>(&mut self, ctx: &C, key: RowId) -> Result<()> {
        self.data = load(ctx, key, self.column)?;
        self.key = key;
        Ok(())
    }
}

fn load<C: ReadContext + ?Sized>(ctx: &C, key: RowId, column: usize) -> Result<Vec<u8>> {
    let payload = ctx
        .with_pages(|pages| BTree::new(pages).find(key))?
        .ok_or(DatabaseError::RowNotFound { row_id: key })?;
    let mut record = Record::decode(&payload)?;
    match record.values.get_mut(column) {
        Some(Value::Blob(bytes)) => Ok(std::mem::take(bytes)),
        Some(other) => Err(DatabaseError::TypeMismatch {
            expected: DataType::Blob,
            actual: other.data_type(),
        }),
        None => Err(DatabaseError::ColumnIndexOutOfBounds { index: column }),
    }
}

fn checked_range(offset: usize, length: usize, size: usize) -> Result<std::ops::Range<usize>> {
    offset
        .checked_add(length)
        .filter(|end| *end <= size)
        .map(|end| offset..end)
        .ok_or(DatabaseError::BlobOutOfRange {
            offset,
            length,
            size,
        })
}

/// Overwrites bytes of a blob column in place; the blob never changes size.
pub(crate) fn overwrite(
    record: &mut Record,
    column: usize,
    offset: usize,
    bytes: &[u8],
) -> Result<()> {
    match record.values.get_mut(column) {
        Some(Value::Blob(data)) => {
            let range = checked_range(offset, bytes.len(), data.len())?;
            data[range].copy_from_slice(bytes);
            Ok(())
        }
        Some(other) => Err(DatabaseError::TypeMismatch {
            expected: DataType::Blob,
            actual: other.data_type(),
        }),
        None => Err(DatabaseError::ColumnIndexOutOfBounds { index: column }),
    }
}
