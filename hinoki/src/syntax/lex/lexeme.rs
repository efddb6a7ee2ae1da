use {super::super::location::Location, std::fmt};

/// Token along with its location.
#[allow(missing_docs)]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Lexeme
{
    pub location: Location,
    pub token: Token,
}

/// Structured information about a lexeme.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Token
{
    /** `(` */ LeftParenthesis,
    /** `)` */ RightParenthesis,
    /** `.` */ Dot,
    /** `'` */ Quote,

    /// `#t` or `#f`.
    Boolean(bool),

    /// Decimal integer, optionally signed.
    Integer(i64),

    /// Any other atom; interned as a symbol.
    Identifier(String),
}

impl fmt::Display for Token
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
    {
        match self {
            Self::LeftParenthesis  => write!(f, "`(`"),
            Self::RightParenthesis => write!(f, "`)`"),
            Self::Dot              => write!(f, "`.`"),
            Self::Quote            => write!(f, "`'`"),
            Self::Boolean(..)      => write!(f, "boolean"),
            Self::Integer(..)      => write!(f, "integer"),
            Self::Identifier(name) => write!(f, "identifier `{name}`"),
        }
    }
}
