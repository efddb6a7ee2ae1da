//! Reading source text into value graphs.
//!
//! The reader understands lists, dotted tails, `'` quote shorthand,
//! booleans, decimal integers, symbols, and `;` comments.
//! It builds pairs, symbols, and numbers directly in the heap,
//! ready to be compiled.

pub use self::read::*;

use {
    self::{lex::Token, location::Location},
    thiserror::Error,
};

pub mod lex;
pub mod location;

mod read;

/// Error returned during reading.
#[allow(missing_docs)]
#[derive(Clone, Debug, Error, PartialEq)]
pub enum Error
{
    #[error("{0}")]
    Lex(#[from] lex::Error),

    #[error("Unexpected {1} at {0}")]
    UnexpectedToken(Location, Token),

    #[error("Unexpected end of input in form starting at {0}")]
    UnexpectedEnd(Location),
}
