use std::{cmp::Ordering, sync::Arc};

use crate::{
    executor::function::ScalarFunction,
    types::{error::Result, record::Record, value::Value},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOp {
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    IsNull,
    IsNotNull,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
    Not,
}

/// Row filter over record columns, addressed by position.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Comparison {
        column: usize,
        op: ComparisonOp,
        value: Value,
    },
    InList {
        column: usize,
        values: Vec<Value>,
        negated: bool,
    },
    /// Compares the result of a function called on some columns.
    Function {
        function: Arc<ScalarFunction>,
        args: Vec<usize>,
        op: ComparisonOp,
        value: Value,
    },
    Logical {
        op: LogicalOp,
        left: Box<Predicate>,
        right: Option<Box<Predicate>>, // None for NOT
    },
    True,
    False,
}

impl Predicate {
    fn comparison(column: usize, op: ComparisonOp, value: impl Into<Value>) -> Self {
        Self::Comparison {
            column,
            op,
            value: value.into(),
        }
    }

    pub fn eq(column: usize, value: impl Into<Value>) -> Self {
        Self::comparison(column, ComparisonOp::Equal, value)
    }

    pub fn ne(column: usize, value: impl Into<Value>) -> Self {
        Self::comparison(column, ComparisonOp::NotEqual, value)
    }

    pub fn lt(column: usize, value: impl Into<Value>) -> Self {
        Self::comparison(column, ComparisonOp::LessThan, value)
    }

    pub fn le(column: usize, value: impl Into<Value>) -> Self {
        Self::comparison(column, ComparisonOp::LessThanOrEqual, value)
    }

    pub fn gt(column: usize, value: impl Into<Value>) -> Self {
        Self::comparison(column, ComparisonOp::GreaterThan, value)
    }

    pub fn ge(column: usize, value: impl Into<Value>) -> Self {
        Self::comparison(column, ComparisonOp::GreaterThanOrEqual, value)
    }

    pub fn is_null(column: usize) -> Self {
        Self::comparison(column, ComparisonOp::IsNull, Value::Null)
    }

    pub fn is_not_null(column: usize) -> Self {
        Self::comparison(column, ComparisonOp::IsNotNull, Value::Null)
    }

    pub fn in_list(column: usize, values: Vec<Value>) -> Self {
        Self::InList {
            column,
            values,
            negated: false,
        }
    }

    pub fn not_in_list(column: usize, values: Vec<Value>) -> Self {
        Self::InList {
            column,
            values,
            negated: true,
        }
    }

    pub fn function(
        function: Arc<ScalarFunction>,
        args: Vec<usize>,
        op: ComparisonOp,
        value: impl Into<Value>,
    ) -> Self {
        Self::Function {
            function,
            args,
            op,
            value: value.into(),
        }
    }

    pub fn and(left: Predicate, right: Predicate) -> Self {
        Self::Logical {
            op: LogicalOp::And,
            left: Box::new(left),
            right: Some(Box::new(right)),
        }
    }

    pub fn or(left: Predicate, right: Predicate) -> Self {
        Self::Logical {
            op: LogicalOp::Or,
            left: Box::new(left),
            right: Some(Box::new(right)),
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(predicate: Predicate) -> Self {
        Self::Logical {
            op: LogicalOp::Not,
            left: Box::new(predicate),
            right: None,
        }
    }

    /// Evaluates against a record. Comparisons involving NULL are false;
    /// comparing two different non-null types is a `TypeMismatch`.
    pub fn evaluate(&self, record: &Record) -> Result<bool> {
        match self {
            Predicate::Comparison { column, op, value } => {
                let stored = record.get(*column)?;
                compare(stored, *op, value)
            }
            Predicate::InList {
                column,
                values,
                negated,
            } => {
                let stored = record.get(*column)?;
                if stored.is_null() {
                    return Ok(false);
                }
                let mut found = false;
                for candidate in values {
                    if stored.compare(candidate)? == Some(Ordering::Equal) {
                        found = true;
                        break;
                    }
                }
                Ok(found != *negated)
            }
            Predicate::Function {
                function,
                args,
                op,
                value,
            } => {
                let result = function.call_on(record, args)?;
                compare(&result, *op, value)
            }
            Predicate::Logical { op, left, right } => match (op, right) {
                (LogicalOp::And, Some(right)) => Ok(left.evaluate(record)? && right.evaluate(record)?),
                (LogicalOp::Or, Some(right)) => Ok(left.evaluate(record)? || right.evaluate(record)?),
                (LogicalOp::Not, _) => Ok(!left.evaluate(record)?),
                // A binary operator built without its right side keeps only the left.
                (_, None) => left.evaluate(record),
            },
            Predicate::True => Ok(true),
            Predicate::False => Ok(false),
        }
    }

    /// Column indices referenced anywhere in the predicate, sorted.
    pub fn referenced_columns(&self) -> Vec<usize> {
        let mut columns = Vec::new();
        self.collect_columns(&mut columns);
        columns.sort_unstable();
        columns.dedup();
        columns
    }

    fn collect_columns(&self, columns: &mut Vec<usize>) {
        match self {
            Predicate::Comparison { column, .. } | Predicate::InList { column, .. } => {
                columns.push(*column)
            }
            Predicate::Function { args, .. } => columns.extend_from_slice(args),
            Predicate::Logical { left, right, .. } => {
                left.collect_columns(columns);
                if let Some(right) = right {
                    right.collect_columns(columns);
                }
            }
            Predicate::True | Predicate::False => {}
        }
    }
}

fn compare(stored: &Value, op: ComparisonOp, operand: &Value) -> Result<bool> {
    match op {
        ComparisonOp::IsNull => return Ok(stored.is_null()),
        ComparisonOp::IsNotNull => return Ok(!stored.is_null()),
        _ => {}
    }

    let Some(ordering) = stored.compare(operand)? else {
        return Ok(false);
    };
    Ok(match op {
        ComparisonOp::Equal => ordering == Ordering::Equal,
        ComparisonOp::NotEqual => ordering != Ordering::Equal,
        ComparisonOp::LessThan => ordering == Ordering::Less,
        ComparisonOp::LessThanOrEqual => ordering != Ordering::Greater,
        ComparisonOp::GreaterThan => ordering == Ordering::Greater,
        ComparisonOp::GreaterThanOrEqual => ordering != Ordering::Less,
        ComparisonOp::IsNull | ComparisonOp::IsNotNull => false,
    })
}

/// Builds a conjunction one condition at a time.
#[derive(Debug, Default)]
pub struct PredicateBuilder {
    predicate: Option<Predicate>,
}

impl PredicateBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(self, column: usize, value: impl Into<Value>) -> Self {
        self.and(Predicate::eq(column, value))
    }

    pub fn ne(self, column: usize, value: impl Into<Value>) -> Self {
        self.and(Predicate::ne(column, value))
    }

    pub fn lt(self, column: usize, value: impl Into<Value>) -> Self {
        self.and(Predicate::lt(column, value))
    }

    pub fn le(self, column: usize, value: impl Into<Value>) -> Self {
        self.and(Predicate::le(column, value))
    }

    pub fn gt(self, column: usize, value: impl Into<Value>) -> Self {
        self.and(Predicate::gt(column, value))
    }

    pub fn ge(self, column: usize, value: impl Into<Value>) -> Self {
        self.and(Predicate::ge(column, value))
    }

    pub fn is_null(self, column: usize) -> Self {
        self.and(Predicate::is_null(column))
    }

    pub fn is_not_null(self, column: usize) -> Self {
        self.and(Predicate::is_not_null(column))
    }

    pub fn in_list(self, column: usize, values: Vec<Value>) -> Self {
        self.and(Predicate::in_list(column, values))
    }

    pub fn and(mut self, predicate: Predicate) -> Self {
        self.predicate = Some(match self.predicate.take() {
            Some(existing) => Predicate::and(existing, predicate),
            None => predicate,
        });
        self
    }

    pub fn or(mut self, predicate: Predicate) -> Self {
        self.predicate = Some(match self.predicate.take() {
            Some(existing) => Predicate::or(existing, predicate),
            None => predicate,
        });
        self
    }

    pub fn build(self) -> Predicate {
        self.predicate.unwrap_or(Predicate::True)
    }
}
