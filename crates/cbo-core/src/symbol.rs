//! # Symbols and Types
//!
//! A [`Symbol`] names one column flowing between plan nodes. Symbols are opaque:
//! two nodes refer to the same column exactly when they use the same symbol.
//! The [`SymbolAllocator`] hands out fresh symbols for a query and remembers the
//! [`Type`] of every symbol it knows about, which the statistics layer needs to
//! turn row counts into byte sizes.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Opaque column identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Symbol(String);

impl Symbol {
    pub fn new(name: impl Into<String>) -> Self {
        Symbol(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }

    /// Wrap this symbol into a symbol-reference expression.
    pub fn to_expr(&self) -> crate::expr::Expr {
        crate::expr::Expr::Symbol(self.clone())
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Symbol {
    fn from(name: &str) -> Self {
        Symbol::new(name)
    }
}

/// Column types known to the optimizer. Only the width matters for costing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Type {
    Bigint,
    Double,
    Boolean,
    Varchar,
    Date,
}

impl Type {
    /// Width in bytes of one non-null value, if the type is fixed width.
    pub fn fixed_width(&self) -> Option<f64> {
        match self {
            Type::Bigint | Type::Double => Some(8.0),
            Type::Boolean => Some(1.0),
            Type::Date => Some(4.0),
            Type::Varchar => None,
        }
    }
}

/// Symbol → type mapping consulted while sizing plan outputs.
pub type TypeProvider = HashMap<Symbol, Type>;

/// Allocates unique symbols for one query.
#[derive(Debug, Default, Clone)]
pub struct SymbolAllocator {
    types: TypeProvider,
    next_id: u64,
}

impl SymbolAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a symbol named after `hint`, suffixed when the name is taken.
    pub fn new_symbol(&mut self, hint: &str, ty: Type) -> Symbol {
        let mut symbol = Symbol::new(hint);
        while self.types.contains_key(&symbol) {
            self.next_id += 1;
            symbol = Symbol::new(format!("{}_{}", hint, self.next_id));
        }
        self.types.insert(symbol.clone(), ty);
        symbol
    }

    /// Register an externally named symbol (e.g. one coming from the analyzer).
    pub fn register(&mut self, symbol: Symbol, ty: Type) {
        self.types.insert(symbol, ty);
    }

    pub fn types(&self) -> &TypeProvider {
        &self.types
    }
}
