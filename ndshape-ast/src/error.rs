#![forbid(unsafe_code)]

use miette::Diagnostic;
use thiserror::Error;

/// Failure taxonomy shared by the matcher, the substitution pass and the buffer engine.
///
/// A structural mismatch is not an error: matchers report it as `Ok(false)`.
#[derive(Clone, Debug, Error, Diagnostic, PartialEq, Eq)]
pub enum NdtError {
    /// Malformed input: bad indices, bad flag combinations, invalid constructor arguments.
    #[error("value error: {0}")]
    #[diagnostic(code(ndshape::value))]
    Value(String),

    /// Pattern/argument mismatch surfaced by `typecheck`.
    #[error("type error: {0}")]
    #[diagnostic(code(ndshape::type_mismatch))]
    Type(String),

    #[error("not implemented: {0}")]
    #[diagnostic(code(ndshape::not_implemented))]
    NotImplemented(String),

    #[error("memory error: {0}")]
    #[diagnostic(code(ndshape::memory))]
    Memory(String),

    /// An internal invariant was violated.
    #[error("runtime error: {0}")]
    #[diagnostic(code(ndshape::runtime))]
    Runtime(String),
}

impl NdtError {
    pub fn value(message: impl Into<String>) -> Self {
        NdtError::Value(message.into())
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        NdtError::Runtime(message.into())
    }

    pub fn not_implemented(message: impl Into<String>) -> Self {
        NdtError::NotImplemented(message.into())
    }

    pub fn memory(message: impl Into<String>) -> Self {
        NdtError::Memory(message.into())
    }

    /// Short class name, as a host binding would surface it.
    pub fn class(&self) -> &'static str {
        match self {
            NdtError::Value(_) => "ValueError",
            NdtError::Type(_) => "TypeError",
            NdtError::NotImplemented(_) => "NotImplementedError",
            NdtError::Memory(_) => "MemoryError",
            NdtError::Runtime(_) => "RuntimeError",
        }
    }
}
