use std::{collections::HashMap, fmt, sync::Arc};

use parking_lot::RwLock;
use tracing::debug;

use crate::types::{
    error::{DatabaseError, Result},
    record::Record,
    value::Value,
};

/// How many arguments a function takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgCount {
    Variadic,
    Exact(usize),
}

impl ArgCount {
    pub fn accepts(&self, count: usize) -> bool {
        match self {
            ArgCount::Variadic => true,
            ArgCount::Exact(n) => *n == count,
        }
    }
}

pub type ScalarFn = dyn Fn(&[Value]) -> Result<Value> + Send + Sync;

/// A user-defined function mapping argument values to one value.
pub struct ScalarFunction {
    name: String,
    args: ArgCount,
    func: Box<ScalarFn>,
}

impl ScalarFunction {
    pub fn new<F>(name: impl Into<String>, args: ArgCount, func: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            args,
            func: Box::new(func),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arg_count(&self) -> ArgCount {
        self.args
    }

    pub fn call(&self, args: &[Value]) -> Result<Value> {
        if let ArgCount::Exact(expected) = self.args {
            if args.len() != expected {
                return Err(DatabaseError::FunctionArgumentCount {
                    name: self.name.clone(),
                    expected,
                    actual: args.len(),
                });
            }
        }
        (self.func)(args)
    }

    /// Calls the function on the given columns of a record.
    pub fn call_on(&self, record: &Record, columns: &[usize]) -> Result<Value> {
        let args = columns
            .iter()
            .map(|&column| record.get(column).cloned())
            .collect::<Result<Vec<_>>>()?;
        self.call(&args)
    }
}

impl fmt::Debug for ScalarFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScalarFunction")
            .field("name", &self.name)
            .field("args", &self.args)
            .finish_non_exhaustive()
    }
}

/// Functions compare by identity: two registrations are never equal.
impl PartialEq for ScalarFunction {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self, other)
    }
}

/// Functions registered on a connection, looked up by case-insensitive name.
#[derive(Default)]
pub struct FunctionRegistry {
    functions: RwLock<HashMap<String, Arc<ScalarFunction>>>,
}

impl FunctionRegistry {
    /// Adds `function`, replacing any function of the same name.
    pub fn register(&self, function: ScalarFunction) -> Arc<ScalarFunction> {
        let function = Arc::new(function);
        let key = function.name.to_ascii_lowercase();
        let replaced = self
            .functions
            .write()
            .insert(key, Arc::clone(&function))
            .is_some();
        debug!(name = %function.name, args = ?function.args, replaced, "registered function");
        function
    }

    pub fn get(&self, name: &str) -> Result<Arc<ScalarFunction>> {
        self.functions
            .read()
            .get(&name.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| DatabaseError::FunctionNotFound {
                name: name.to_string(),
            })
    }

    /// Predicates and projections already holding the function keep it.
    pub fn remove(&self, name: &str) -> bool {
        self.functions
            .write()
            .remove(&name.to_ascii_lowercase())
            .is_some()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .functions
            .read()
            .values()
            .map(|f| f.name.clone())
            .collect();
        names.sort();
        names
    }
}
