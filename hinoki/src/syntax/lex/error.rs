use {super::super::location::Location, thiserror::Error};

/// Result from the lexer.
pub type Result<T> =
    std::result::Result<T, Error>;

/// Error returned during lexing.
#[allow(missing_docs)]
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum Error
{
    #[error("Invalid character {1:?} at {0}")]
    InvalidToken(Location, char),

    #[error("Invalid `#` syntax at {0}")]
    InvalidHash(Location),

    #[error("Integer literal at {0} does not fit in 64 bits")]
    IntegerOverflow(Location),
}
