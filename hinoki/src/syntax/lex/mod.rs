//! Splitting source code into sequences of tokens.

pub use self::{error::*, lexeme::*};

use {super::location::Location, std::{iter::Peekable, str::CharIndices}};

mod error;
mod lexeme;

/// Splits source code into a sequence of tokens.
pub struct Lexer<'a>
{
    chars: Peekable<CharIndices<'a>>,
}

impl<'a> Lexer<'a>
{
    /// Create a lexer for some source code.
    pub fn new(input: &'a str) -> Self
    {
        Self{chars: input.char_indices().peekable()}
    }

    fn read_lexeme(&mut self) -> Option<Result<Lexeme>>
    {
        self.read_whitespace();
        if let Some((i, c)) = self.chars.next() {
            let location = Location{offset: i};
            Some(self.read_token(location, c).map(|token| Lexeme{location, token}))
        } else {
            None
        }
    }

    /// Skip whitespace and comments.
    fn read_whitespace(&mut self)
    {
        loop {
            if self.chars.next_if(|&(_, c)| Self::is_whitespace(c)).is_some() {
                continue;
            }
            if self.chars.next_if(|&(_, c)| c == ';').is_some() {
                while self.chars.next_if(|&(_, c)| c != '\n').is_some() {
                }
                continue;
            }
            break;
        }
    }

    fn read_token(&mut self, location: Location, c: char) -> Result<Token>
    {
        match c {
            '('  => Ok(Token::LeftParenthesis),
            ')'  => Ok(Token::RightParenthesis),
            '\'' => Ok(Token::Quote),
            '#'  => self.read_hash(location),
            _ if Self::is_delimiter(c) => Err(Error::InvalidToken(location, c)),
            _    => self.read_atom(location, c),
        }
    }

    fn read_hash(&mut self, location: Location) -> Result<Token>
    {
        match &*self.read_atom_chars(String::new()) {
            "t" | "true"  => Ok(Token::Boolean(true)),
            "f" | "false" => Ok(Token::Boolean(false)),
            _ => Err(Error::InvalidHash(location)),
        }
    }

    fn read_atom(&mut self, location: Location, first: char) -> Result<Token>
    {
        let atom = self.read_atom_chars(String::from(first));

        if atom == "." {
            return Ok(Token::Dot);
        }

        let digits = atom.strip_prefix(['+', '-']).unwrap_or(&atom);
        if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
            return atom.parse().map(Token::Integer)
                .map_err(|_| Error::IntegerOverflow(location));
        }

        Ok(Token::Identifier(atom))
    }

    fn read_atom_chars(&mut self, mut atom: String) -> String
    {
        while let Some((_, c)) = self.chars.next_if(|&(_, c)| {
            !Self::is_whitespace(c) && !Self::is_delimiter(c)
        }) {
            atom.push(c);
        }
        atom
    }

    fn is_whitespace(c: char) -> bool
    {
        matches!(c, ' ' | '\t' | '\r' | '\n')
    }

    fn is_delimiter(c: char) -> bool
    {
        matches!(c, '(' | ')' | '\'' | ';' | '"')
    }
}

impl<'a> Iterator for Lexer<'a>
{
    type Item = Result<Lexeme>;

    fn next(&mut self) -> Option<Self::Item>
    {
        self.read_lexeme()
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    fn tokens(input: &str) -> Result<Vec<Token>>
    {
        Lexer::new(input).map(|lexeme| lexeme.map(|l| l.token)).collect()
    }

    #[test]
    fn punctuation_and_atoms()
    {
        let actual = tokens("(a . b) 'x #t #false -12 + ...").unwrap();
        assert_eq!(actual, [
            Token::LeftParenthesis,
            Token::Identifier("a".into()),
            Token::Dot,
            Token::Identifier("b".into()),
            Token::RightParenthesis,
            Token::Quote,
            Token::Identifier("x".into()),
            Token::Boolean(true),
            Token::Boolean(false),
            Token::Integer(-12),
            Token::Identifier("+".into()),
            Token::Identifier("...".into()),
        ]);
    }

    #[test]
    fn comments()
    {
        let actual = tokens("1 ; one\n;; two\n2;three").unwrap();
        assert_eq!(actual, [Token::Integer(1), Token::Integer(2)]);
    }

    #[test]
    fn locations()
    {
        let lexemes: Vec<_> = Lexer::new("  (foo)").map(Result::unwrap).collect();
        let offsets: Vec<_> = lexemes.iter().map(|l| l.location.offset).collect();
        assert_eq!(offsets, [2, 3, 6]);
    }

    #[test]
    fn errors()
    {
        let error = tokens("99999999999999999999").unwrap_err();
        assert_eq!(error, Error::IntegerOverflow(Location{offset: 0}));

        let error = tokens("(#x)").unwrap_err();
        assert_eq!(error, Error::InvalidHash(Location{offset: 1}));

        let error = tokens("a \"b\"").unwrap_err();
        assert_eq!(error, Error::InvalidToken(Location{offset: 2}, '"'));
    }
}
