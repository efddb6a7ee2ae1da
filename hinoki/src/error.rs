//! Runtime errors and how the scheduler reacts to them.

use {
    crate::{heap::Handle, syntax},
    std::sync::Arc,
    thiserror::Error,
};

/// Result of a fallible runtime operation.
pub type Result<T> =
    std::result::Result<T, Error>;

/// Error returned by the heap, the compiler, and the fibers.
#[allow(missing_docs)]
#[derive(Clone, Debug, Error)]
pub enum Error
{
    #[error("Heap exhausted at {0} cells")]
    AllocationExhausted(usize),

    #[error("Expected {expected}, found {found}")]
    TypeMismatch{expected: &'static str, found: &'static str},

    #[error("Procedure takes {} {expected} arguments, got {found}",
            arity_quantifier(.variadic))]
    ArityMismatch{expected: usize, found: usize, variadic: bool},

    #[error("Unbound variable `{0}`")]
    UnboundVariable(Arc<str>),

    #[error("Malformed `{0}` form")]
    MalformedSpecialForm(&'static str),

    #[error("Index {index} is out of bounds for length {len}")]
    OutOfBounds{index: usize, len: usize},

    #[error("Too many constants in a single code unit")]
    TooManyConstants,

    #[error("Code unit is too large to address with jump offsets")]
    CodeTooLarge,

    #[error("{0}")]
    Syntax(#[from] syntax::Error),

    #[error("{0}")]
    Fault(#[from] Fault),
}

fn arity_quantifier(variadic: &bool) -> &'static str
{
    if *variadic { "at least" } else { "exactly" }
}

/// Violation of an internal structural invariant.
///
/// These never originate from guest programs that went through the compiler;
/// they indicate corrupted bytecode or a corrupted object graph.
#[allow(missing_docs)]
#[derive(Clone, Debug, Error)]
pub enum Fault
{
    #[error("Dangling handle {0:?}")]
    DanglingHandle(Handle),

    #[error("Value stack underflow at offset {0}")]
    StackUnderflow(usize),

    #[error("Undecodable instruction {word:#010x} at offset {offset}")]
    InvalidInstruction{word: u32, offset: usize},

    #[error("Jump to {target} at offset {offset} leaves the code unit")]
    JumpOutOfBounds{target: usize, offset: usize},

    #[error("Constant {index} at offset {offset} is not in the pool")]
    ConstantOutOfBounds{index: usize, offset: usize},

    #[error("Procedure returned without leaving a value")]
    MissingReturnValue,
}

/// What the scheduler does with a fiber whose tick failed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Disposition
{
    /// Collect garbage and retry the tick once.
    RetryAfterCollection,

    /// Abort the offending fiber; other fibers keep running.
    AbortFiber,

    /// Stop the scheduler and report the error to the host.
    Fatal,
}

impl Error
{
    /// Classify the error for the scheduler.
    pub fn disposition(&self) -> Disposition
    {
        match self {
            Self::AllocationExhausted(..) =>
                Disposition::RetryAfterCollection,

            Self::TypeMismatch{..}         |
            Self::ArityMismatch{..}        |
            Self::UnboundVariable(..)      |
            Self::MalformedSpecialForm(..) |
            Self::OutOfBounds{..}          |
            Self::TooManyConstants         |
            Self::CodeTooLarge             |
            Self::Syntax(..) =>
                Disposition::AbortFiber,

            Self::Fault(..) =>
                Disposition::Fatal,
        }
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn dispositions()
    {
        let e = Error::AllocationExhausted(1024);
        assert_eq!(e.disposition(), Disposition::RetryAfterCollection);

        let e = Error::UnboundVariable("x".into());
        assert_eq!(e.disposition(), Disposition::AbortFiber);

        let e = Error::Fault(Fault::MissingReturnValue);
        assert_eq!(e.disposition(), Disposition::Fatal);
    }

    #[test]
    fn arity_message()
    {
        let e = Error::ArityMismatch{expected: 2, found: 1, variadic: true};
        assert_eq!(e.to_string(), "Procedure takes at least 2 arguments, got 1");

        let e = Error::ArityMismatch{expected: 2, found: 3, variadic: false};
        assert_eq!(e.to_string(), "Procedure takes exactly 2 arguments, got 3");
    }
}
