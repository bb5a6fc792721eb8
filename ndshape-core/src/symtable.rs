#![forbid(unsafe_code)]

use std::collections::HashMap;

use ndshape_ast::{NdtError, Type, TypeKind};
use tracing::trace;

/// Three-valued match outcome: `Ok(true)` matches, `Ok(false)` does not, `Err` means the engine failed.
pub type MatchResult = Result<bool, NdtError>;

/// Reserved key under which an unnamed ellipsis records what it captured.
pub const UNNAMED_ELLIPSIS: &str = "...";

/// A binding for one pattern variable. Borrowed entries point into the concrete type.
#[derive(Clone, Debug, PartialEq)]
pub enum Entry<'a> {
    Unbound,
    Shape(i64),
    Symbol(&'a str),
    Type(&'a Type),
    DimList(Vec<&'a Type>),
}

static UNBOUND: Entry<'static> = Entry::Unbound;

impl Entry<'_> {
    fn describe(&self) -> String {
        match self {
            Entry::Unbound => "unbound".to_string(),
            Entry::Shape(n) => format!("shape {n}"),
            Entry::Symbol(s) => format!("symbol {s}"),
            Entry::Type(t) => format!("type {t}"),
            Entry::DimList(dims) => format!("{} dimensions", dims.len()),
        }
    }
}

/// Dimension nodes compare by their own header only, never by element type.
fn same_dim(a: &Type, b: &Type) -> bool {
    match (a.kind(), b.kind()) {
        (TypeKind::FixedDim { shape: x, .. }, TypeKind::FixedDim { shape: y, .. }) => x == y,
        (TypeKind::VarDim { .. }, TypeKind::VarDim { .. }) => true,
        (TypeKind::SymbolicDim { name: x, .. }, TypeKind::SymbolicDim { name: y, .. }) => x == y,
        (TypeKind::EllipsisDim { name: x, .. }, TypeKind::EllipsisDim { name: y, .. }) => x == y,
        _ => false,
    }
}

/// Per-call variable bindings. Created fresh for each match or typecheck call.
#[derive(Debug, Default)]
pub struct SymbolTable<'a> {
    entries: HashMap<String, Entry<'a>>,
}

impl<'a> SymbolTable<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn find(&self, name: &str) -> &Entry<'a> {
        self.entries.get(name).unwrap_or(&UNBOUND)
    }

    pub fn bind(&mut self, name: &str, entry: Entry<'a>) -> Result<(), NdtError> {
        self.entries
            .try_reserve(1)
            .map_err(|_| NdtError::memory("symbol table allocation failed"))?;
        trace!(name, binding = %entry.describe(), "bind");
        self.entries.insert(name.to_string(), entry);
        Ok(())
    }

    /// Bind `name` on first sight; afterwards require `candidate` to agree with the binding.
    pub fn resolve_or_bind(&mut self, name: &str, candidate: Entry<'a>) -> MatchResult {
        if matches!(self.find(name), Entry::Unbound) {
            self.bind(name, candidate)?;
            return Ok(true);
        }
        let agrees = match (self.find(name), &candidate) {
            (Entry::Shape(a), Entry::Shape(b)) => a == b,
            (Entry::Symbol(a), Entry::Symbol(b)) => a == b,
            (Entry::Type(a), Entry::Type(b)) => a == b,
            (Entry::DimList(a), Entry::DimList(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| same_dim(x, y))
            }
            _ => false,
        };
        if !agrees {
            trace!(name, "binding conflict");
        }
        Ok(agrees)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Entry<'a>)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}
