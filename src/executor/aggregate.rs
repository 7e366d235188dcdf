use std::cmp::Ordering;

use crate::{
    executor::scan::Scanner,
    types::{
        RowId,
        error::{DatabaseError, Result},
        record::Record,
        value::{DataType, Value},
    },
};

/// Accumulator fed one row at a time. The state lives in the value itself,
/// owned by whoever drives the scan.
pub trait Aggregate {
    fn step(&mut self, key: RowId, record: &Record) -> Result<()>;
    fn finalize(&self) -> Value;
    fn reset(&mut self);
}

/// `COUNT(*)` when built with `rows`, `COUNT(column)` (non-null values only)
/// when built with `column`.
#[derive(Debug, Clone, Default)]
pub struct Count {
    column: Option<usize>,
    count: i64,
}

impl Count {
    pub fn rows() -> Self {
        Self::default()
    }

    pub fn column(column: usize) -> Self {
        Self {
            column: Some(column),
            count: 0,
        }
    }
}

impl Aggregate for Count {
    fn step(&mut self, _key: RowId, record: &Record) -> Result<()> {
        let counted = match self.column {
            Some(column) => !record.get(column)?.is_null(),
            None => true,
        };
        if counted {
            self.count += 1;
        }
        Ok(())
    }

    fn finalize(&self) -> Value {
        Value::Integer(self.count)
    }

    fn reset(&mut self) {
        self.count = 0;
    }
}

/// Sum of an integer or real column. NULLs are skipped; mixing integers and
/// reals is a `TypeMismatch`; integer overflow is an `ArithmeticOverflow`.
/// The sum of no values is NULL.
#[derive(Debug, Clone)]
pub struct Sum {
    column: usize,
    total: Value,
}

impl Sum {
    pub fn new(column: usize) -> Self {
        Self {
            column,
            total: Value::Null,
        }
    }
}

impl Aggregate for Sum {
    fn step(&mut self, key: RowId, record: &Record) -> Result<()> {
        let value = record.get(self.column)?;
        self.total = match (&self.total, value) {
            (_, Value::Null) => return Ok(()),
            (Value::Null, Value::Integer(i)) => Value::Integer(*i),
            (Value::Null, Value::Real(r)) => Value::Real(*r),
            (Value::Integer(acc), Value::Integer(i)) => {
                Value::Integer(acc.checked_add(*i).ok_or_else(|| {
                    DatabaseError::ArithmeticOverflow {
                        details: format!("integer sum overflows at row {}", key),
                    }
                })?)
            }
            (Value::Real(acc), Value::Real(r)) => Value::Real(acc + r),
            (Value::Null, other) => {
                return Err(DatabaseError::TypeMismatch {
                    expected: DataType::Integer,
                    actual: other.data_type(),
                });
            }
            (acc, other) => {
                return Err(DatabaseError::TypeMismatch {
                    expected: acc.data_type(),
                    actual: other.data_type(),
                });
            }
        };
        Ok(())
    }

    fn finalize(&self) -> Value {
        self.total.clone()
    }

    fn reset(&mut self) {
        self.total = Value::Null;
    }
}

#[derive(Debug, Clone)]
struct Extreme {
    column: usize,
    best: Value,
    keep: Ordering,
}

impl Extreme {
    fn step(&mut self, record: &Record) -> Result<()> {
        let value = record.get(self.column)?;
        if value.is_null() {
            return Ok(());
        }
        if self.best.is_null() || value.compare(&self.best)? == Some(self.keep) {
            self.best = value.clone();
        }
        Ok(())
    }
}

/// Smallest non-null value of a column.
#[derive(Debug, Clone)]
pub struct Min(Extreme);

impl Min {
    pub fn new(column: usize) -> Self {
        Self(Extreme {
            column,
            best: Value::Null,
            keep: Ordering::Less,
        })
    }
}

impl Aggregate for Min {
    fn step(&mut self, _key: RowId, record: &Record) -> Result<()> {
        self.0.step(record)
    }

    fn finalize(&self) -> Value {
        self.0.best.clone()
    }

    fn reset(&mut self) {
        self.0.best = Value::Null;
    }
}

/// Largest non-null value of a column.
#[derive(Debug, Clone)]
pub struct Max(Extreme);

impl Max {
    pub fn new(column: usize) -> Self {
        Self(Extreme {
            column,
            best: Value::Null,
            keep: Ordering::Greater,
        })
    }
}

impl Aggregate for Max {
    fn step(&mut self, _key: RowId, record: &Record) -> Result<()> {
        self.0.step(record)
    }

    fn finalize(&self) -> Value {
        self.0.best.clone()
    }

    fn reset(&mut self) {
        self.0.best = Value::Null;
    }
}

/// Drains `scanner` into `aggregate` and returns the final value.
pub fn aggregate<S, A>(scanner: &mut S, aggregate: &mut A) -> Result<Value>
where
    S: Scanner + ?Sized,
    A: Aggregate + ?Sized,
{
    while let Some((key, record)) = scanner.scan()? {
        aggregate.step(key, &record)?;
    }
    Ok(aggregate.finalize())
}
