pub mod aggregate;
pub mod blob;
pub mod cursor;
pub mod function;
pub mod predicate;
pub mod range_scan;
pub mod scan;
pub mod statement;

use crate::{storage::pager::PageRead, types::error::Result};

/// Anything that can lend a consistent page view for one read: a connection
/// hands out a fresh committed snapshot, a transaction its own working view.
pub trait ReadContext {
    fn with_pages<T>(&self, f: impl FnOnce(&dyn PageRead) -> Result<T>) -> Result<T>;
}

impl<C: ReadContext + ?Sized> ReadContext for &C {
    fn with_pages<T>(&self, f: impl FnOnce(&dyn PageRead) -> Result<T>) -> Result<T> {
        (**self).with_pages(f)
    }
}
