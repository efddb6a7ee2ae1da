use {
    super::{
        Error as SyntaxError,
        lex::{Lexeme, Lexer, Token},
        location::Location,
    },
    crate::{
        Error,
        Result,
        heap::{Handle, Heap},
        value::SymbolTable,
    },
    smallvec::SmallVec,
    std::iter::Peekable,
};

/// Reads data one at a time from source text.
///
/// Every datum returned holds one reference owned by the caller,
/// who must release it when done. A reference does not survive
/// a collection; root the datum first if one may run.
pub struct Reader<'a>
{
    heap: &'a mut Heap,
    symbols: &'a mut SymbolTable,
    lexemes: Peekable<Lexer<'a>>,
}

impl<'a> Reader<'a>
{
    /// Create a reader for some source text.
    pub fn new(heap: &'a mut Heap, symbols: &'a mut SymbolTable, source: &'a str)
        -> Self
    {
        Self{heap, symbols, lexemes: Lexer::new(source).peekable()}
    }

    /// Read the next datum, or [`None`] at the end of the input.
    pub fn read(&mut self) -> Result<Option<Handle>>
    {
        match self.next_lexeme()? {
            Some(lexeme) => self.datum(lexeme).map(Some),
            None => Ok(None),
        }
    }

    fn next_lexeme(&mut self) -> Result<Option<Lexeme>>
    {
        self.lexemes.next().transpose()
            .map_err(|error| SyntaxError::Lex(error).into())
    }

    /// Read a datum that must be present,
    /// as part of the form starting at `opened`.
    fn required_datum(&mut self, opened: Location) -> Result<Handle>
    {
        match self.next_lexeme()? {
            Some(lexeme) => self.datum(lexeme),
            None => Err(SyntaxError::UnexpectedEnd(opened).into()),
        }
    }

    fn datum(&mut self, lexeme: Lexeme) -> Result<Handle>
    {
        let Lexeme{location, token} = lexeme;
        match token {
            Token::LeftParenthesis =>
                self.list(location),

            Token::Quote => {
                let datum = self.required_datum(location)?;
                let quoted = self.quote(datum);
                self.heap.release(datum);
                quoted
            },

            Token::Boolean(value) =>
                Ok(Handle::from_bool(value)),

            Token::Integer(value) => {
                let number = self.heap.new_number(value)?;
                self.heap.retain(number);
                Ok(number)
            },

            // Symbols are pinned, so they need not be retained.
            Token::Identifier(name) =>
                self.symbols.intern(self.heap, &name),

            Token::RightParenthesis | Token::Dot =>
                Err(SyntaxError::UnexpectedToken(location, token).into()),
        }
    }

    fn quote(&mut self, datum: Handle) -> Result<Handle>
    {
        let quote = self.symbols.intern(self.heap, "quote")?;
        self.build_list(&[quote, datum], Handle::EMPTY)
    }

    fn list(&mut self, opened: Location) -> Result<Handle>
    {
        let mut elements = SmallVec::<[Handle; 8]>::new();
        let list = self.list_elements(opened, &mut elements)
            .and_then(|tail| self.build_list(&elements, tail));
        for element in elements {
            self.heap.release(element);
        }
        list
    }

    /// Read elements up to the closing parenthesis.
    ///
    /// Returns the tail of the list: the datum after the dot,
    /// or the empty list.
    fn list_elements(
        &mut self,
        opened: Location,
        elements: &mut SmallVec<[Handle; 8]>,
    ) -> Result<Handle>
    {
        loop {
            let lexeme = self.next_lexeme()?
                .ok_or(SyntaxError::UnexpectedEnd(opened))?;
            match lexeme.token {
                Token::RightParenthesis =>
                    return Ok(Handle::EMPTY),
                Token::Dot if !elements.is_empty() =>
                    return self.dotted_tail(opened),
                _ =>
                    elements.push(self.datum(lexeme)?),
            }
        }
    }

    fn dotted_tail(&mut self, opened: Location) -> Result<Handle>
    {
        let tail = self.required_datum(opened)?;
        let error = match self.next_lexeme() {
            Ok(Some(Lexeme{token: Token::RightParenthesis, ..})) =>
                return Ok(tail),
            Ok(Some(Lexeme{location, token})) =>
                SyntaxError::UnexpectedToken(location, token).into(),
            Ok(None) =>
                SyntaxError::UnexpectedEnd(opened).into(),
            Err(error) =>
                error,
        };
        self.heap.release(tail);
        Err(error)
    }

    /// Cons the elements onto the tail, back to front.
    ///
    /// Takes over the reference to the tail; the elements are retained.
    fn build_list(&mut self, elements: &[Handle], tail: Handle)
        -> Result<Handle>
    {
        let mut list = tail;
        for &element in elements.iter().rev() {
            match self.heap.cons(element, list) {
                Ok(pair) => {
                    self.heap.retain(pair);
                    self.heap.release(list);
                    list = pair;
                },
                Err(error) => {
                    self.heap.release(list);
                    return Err(error);
                },
            }
        }
        Ok(list)
    }
}

/// Read every datum in the source text.
///
/// Each returned datum is owned by the caller.
/// On failure, the data read so far are released.
pub fn read_all(heap: &mut Heap, symbols: &mut SymbolTable, source: &str)
    -> Result<Vec<Handle>>
{
    let mut reader = Reader::new(heap, symbols, source);
    let mut data = Vec::new();
    loop {
        match reader.read() {
            Ok(Some(datum)) => data.push(datum),
            Ok(None) => return Ok(data),
            Err(error) => {
                for datum in data {
                    reader.heap.release(datum);
                }
                return Err(error);
            },
        }
    }
}

#[cfg(test)]
mod tests
{
    use {super::*, crate::{config::HeapPolicy, value::Pair}};

    struct Fixture
    {
        heap: Heap,
        symbols: SymbolTable,
    }

    impl Fixture
    {
        fn new() -> Self
        {
            let heap = Heap::new(HeapPolicy::default()).unwrap();
            Self{heap, symbols: SymbolTable::new()}
        }

        fn read(&mut self, source: &str) -> Result<Vec<Handle>>
        {
            read_all(&mut self.heap, &mut self.symbols, source)
        }

        fn symbol(&mut self, name: &str) -> Handle
        {
            self.symbols.intern(&mut self.heap, name).unwrap()
        }

        fn syntax_error(&mut self, source: &str) -> SyntaxError
        {
            match self.read(source) {
                Err(Error::Syntax(error)) => error,
                other => panic!("{source}: {other:?}"),
            }
        }
    }

    #[test]
    fn atoms()
    {
        let mut f = Fixture::new();
        let data = f.read("#t #f 42 foo '()").unwrap();
        assert_eq!(data.len(), 5);
        assert_eq!(data[0], Handle::TRUE);
        assert_eq!(data[1], Handle::FALSE);
        assert_eq!(f.heap.number_value(data[2]).unwrap(), 42);
        assert_eq!(data[3], f.symbol("foo"));

        let quote = f.symbol("quote");
        let elements = f.heap.list_elements(data[4]).unwrap();
        assert_eq!(elements, [quote, Handle::EMPTY]);
    }

    #[test]
    fn lists()
    {
        let mut f = Fixture::new();
        let data = f.read("(a (b) . c)").unwrap();
        let (a, b, c) = (f.symbol("a"), f.symbol("b"), f.symbol("c"));

        let list = data[0];
        assert_eq!(f.heap.car(list).unwrap(), a);
        let rest = f.heap.cdr(list).unwrap();
        let inner = f.heap.car(rest).unwrap();
        assert_eq!(f.heap.list_elements(inner).unwrap(), [b]);
        assert_eq!(f.heap.cdr(rest).unwrap(), c);

        let data = f.read("()").unwrap();
        assert_eq!(data, [Handle::EMPTY]);
    }

    #[test]
    fn data_are_owned_by_the_caller()
    {
        let mut f = Fixture::new();
        f.symbol("x");
        let baseline = f.heap.live_count();

        let data = f.read("(x 1 (2 . 3)) 'x 4").unwrap();
        assert!(f.heap.live_count() > baseline);
        for &datum in &data {
            assert_eq!(f.heap.refcount(datum).map(|c| c > 0), Some(true));
        }
        for datum in data {
            f.heap.release(datum);
        }
        assert_eq!(f.heap.live_count(), baseline + 1);
        assert_eq!(f.heap.type_stats::<Pair>().active, 0);
    }

    #[test]
    fn errors()
    {
        let mut f = Fixture::new();
        let baseline = f.heap.type_stats::<Pair>().active;

        let error = f.syntax_error("(a (b c)");
        assert_eq!(error, SyntaxError::UnexpectedEnd(Location{offset: 0}));

        let error = f.syntax_error("a)");
        assert_eq!(
            error,
            SyntaxError::UnexpectedToken(Location{offset: 1}, Token::RightParenthesis),
        );

        let error = f.syntax_error("( . a)");
        assert_eq!(error, SyntaxError::UnexpectedToken(Location{offset: 2}, Token::Dot));

        let error = f.syntax_error("(a . b c)");
        assert!(matches!(error, SyntaxError::UnexpectedToken(_, Token::Identifier(..))));

        let error = f.syntax_error("(1 2 '");
        assert_eq!(error, SyntaxError::UnexpectedEnd(Location{offset: 5}));

        let error = f.syntax_error("(1 #z)");
        assert!(matches!(error, SyntaxError::Lex(..)));

        // Nothing read before the error survives it.
        assert_eq!(f.heap.type_stats::<Pair>().active, baseline);
    }
}
