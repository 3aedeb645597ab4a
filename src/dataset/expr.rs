//! Projection expressions and the function registry they resolve against

use super::value::{DataType, Value};
use crate::error::{FeatureStoreError, Result};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A scalar function callable from a projection expression
pub trait ScalarFunction: Send + Sync {
    /// Evaluate the function on one input value
    fn invoke(&self, value: &Value) -> Result<Value>;

    /// Declared output type of the function
    fn output_type(&self) -> DataType;
}

/// Named scalar functions available to `select_expr`
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, Arc<dyn ScalarFunction>>,
}

impl FunctionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a function under `name`, replacing any previous registration
    pub fn register(&mut self, name: impl Into<String>, function: Arc<dyn ScalarFunction>) {
        self.functions.insert(name.into(), function);
    }

    /// Look up a registered function
    pub fn get(&self, name: &str) -> Option<&Arc<dyn ScalarFunction>> {
        self.functions.get(name)
    }

    /// Number of registered functions
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    /// Returns true if nothing is registered
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.functions.keys().collect();
        names.sort();
        f.debug_struct("FunctionRegistry")
            .field("functions", &names)
            .finish()
    }
}

/// Projection source expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    /// Reference to an input column
    Column(String),
    /// A registered function applied to one input column
    Call { function: String, column: String },
}

/// `expr AS alias`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Projection {
    pub expr: Expr,
    pub alias: String,
}

impl Projection {
    /// `column AS column`
    pub fn passthrough(column: impl Into<String>) -> Self {
        let column = column.into();
        Self {
            expr: Expr::Column(column.clone()),
            alias: column,
        }
    }

    /// `function(column) AS column`
    pub fn call(function: impl Into<String>, column: impl Into<String>) -> Self {
        let column = column.into();
        Self {
            expr: Expr::Call {
                function: function.into(),
                column: column.clone(),
            },
            alias: column,
        }
    }

    /// Input column referenced by this projection
    pub fn source_column(&self) -> &str {
        match &self.expr {
            Expr::Column(c) => c,
            Expr::Call { column, .. } => column,
        }
    }

    pub(crate) fn resolve_function<'a>(
        &self,
        registry: &'a FunctionRegistry,
    ) -> Result<Option<&'a Arc<dyn ScalarFunction>>> {
        match &self.expr {
            Expr::Column(_) => Ok(None),
            Expr::Call { function, .. } => registry.get(function).map(Some).ok_or_else(|| {
                FeatureStoreError::Config(format!("Undefined function: {}", function))
            }),
        }
    }
}

impl fmt::Display for Projection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.expr {
            Expr::Column(c) => write!(f, "{} AS {}", c, self.alias),
            Expr::Call { function, column } => {
                write!(f, "{}({}) AS {}", function, column, self.alias)
            }
        }
    }
}
