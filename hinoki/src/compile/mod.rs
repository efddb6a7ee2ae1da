//! Convert value graphs to bytecode.
//!
//! The compiler makes a single pass over an expression,
//! emitting into a [`Builder`]. Every expression is compiled in a [`Mode`]
//! that says whether its value is needed and whether it is the result
//! of the enclosing procedure, so that calls in tail position become
//! `TAILCALL`s and unused values are never pushed.

pub use self::special::SpecialForms;

use {
    crate::{
        Error,
        Result,
        bytecode::{Builder, Opcode},
        closure::ClosurePrototype,
        heap::{Handle, Heap},
        value::{Pair, Symbol},
    },
    smallvec::SmallVec,
    tracing::trace,
};

mod special;

/// Context an expression is compiled in.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Mode
{
    /// Whether the expression must leave exactly one value on the stack.
    ///
    /// Otherwise it leaves nothing.
    pub leave_value: bool,

    /// Whether the value is the result of the enclosing procedure.
    ///
    /// Only meaningful together with `leave_value`.
    pub tail: bool,
}

impl Mode
{
    /// The value is the result of the enclosing procedure.
    pub const TAIL: Self = Self{leave_value: true, tail: true};

    /// The value is consumed by a later instruction.
    pub const VALUE: Self = Self{leave_value: true, tail: false};

    /// The value is not needed.
    pub const DISCARD: Self = Self{leave_value: false, tail: false};
}

type Arguments = SmallVec<[Handle; 4]>;

/// Compiles expressions using the heap they live in.
pub struct Compiler<'a>
{
    heap: &'a mut Heap,
    forms: SpecialForms,
}

impl<'a> Compiler<'a>
{
    /// Create a compiler.
    pub fn new(heap: &'a mut Heap, forms: SpecialForms) -> Self
    {
        Self{heap, forms}
    }

    /// Compile an expression into a closure of no parameters.
    ///
    /// The closure captures the given environment,
    /// in which the expression is then evaluated.
    pub fn compile_thunk(&mut self, expression: Handle, environment: Handle)
        -> Result<Handle>
    {
        let mut builder = Builder::new();
        self.expression(&mut builder, expression, Mode::TAIL)?;
        let code = builder.link();
        trace!(instructions = code.instructions.len(), "compiled thunk");

        let prototype = ClosurePrototype::new(Vec::new(), None, code);
        let prototype = self.heap.allocate_with(prototype)?;
        self.heap.make_closure(prototype, environment)
    }

    /// Compile an expression.
    pub fn expression(&mut self, builder: &mut Builder, expression: Handle, mode: Mode)
        -> Result<()>
    {
        let mode = Mode{tail: mode.tail && mode.leave_value, ..mode};

        if self.heap.is::<Symbol>(expression) {
            if mode.leave_value {
                builder.build_constant(self.heap, Opcode::LookupConst, expression)?;
            }
            return Ok(());
        }

        let Some((head, tail)) = self.parts(expression) else {
            return self.literal(builder, expression, mode);
        };

        let forms = self.forms;
        if head == forms.quote {
            self.quote(builder, tail, mode)
        } else if head == forms.set {
            self.set(builder, tail, mode)
        } else if head == forms.define {
            self.define(builder, tail, mode)
        } else if head == forms.r#if {
            self.r#if(builder, tail, mode)
        } else if head == forms.begin {
            self.body(builder, tail, mode, "begin")
        } else if head == forms.lambda {
            self.lambda(builder, tail, mode)
        } else {
            self.application(builder, head, tail, mode)
        }
    }

    /// Self-evaluating value.
    fn literal(&mut self, builder: &mut Builder, value: Handle, mode: Mode)
        -> Result<()>
    {
        if mode.leave_value {
            builder.build_constant(self.heap, Opcode::PushConst, value)?;
        }
        Ok(())
    }

    /// Elements of a proper list; anything else is a malformed `form`.
    fn arguments(&self, mut list: Handle, form: &'static str)
        -> Result<Arguments>
    {
        let mut arguments = Arguments::new();
        while list != Handle::EMPTY {
            let pair = self.heap.get::<Pair>(list)
                .map_err(|_| Error::MalformedSpecialForm(form))?;
            arguments.push(pair.car());
            list = pair.cdr();
        }
        Ok(arguments)
    }

    /// Car and cdr, if the value is a pair.
    fn parts(&self, value: Handle) -> Option<(Handle, Handle)>
    {
        let pair = self.heap.get::<Pair>(value).ok()?;
        Some((pair.car(), pair.cdr()))
    }

    fn is_symbol(&self, value: Handle) -> bool
    {
        self.heap.is::<Symbol>(value)
    }

    /* ---------------------------------------------------------------------- */
    /*                              Special forms                             */
    /* ---------------------------------------------------------------------- */

    fn quote(&mut self, builder: &mut Builder, tail: Handle, mode: Mode)
        -> Result<()>
    {
        match self.arguments(tail, "quote")?[..] {
            [datum] => self.literal(builder, datum, mode),
            _ => Err(Error::MalformedSpecialForm("quote")),
        }
    }

    fn set(&mut self, builder: &mut Builder, tail: Handle, mode: Mode)
        -> Result<()>
    {
        let [name, value] = self.arguments(tail, "set!")?[..] else {
            return Err(Error::MalformedSpecialForm("set!"));
        };
        if !self.is_symbol(name) {
            return Err(Error::MalformedSpecialForm("set!"));
        }

        self.expression(builder, value, Mode::VALUE)?;
        self.bind_and_reload(builder, Opcode::SetConst, name, mode)
    }

    fn define(&mut self, builder: &mut Builder, tail: Handle, mode: Mode)
        -> Result<()>
    {
        let arguments = self.arguments(tail, "define")?;
        let Some(&target) = arguments.first() else {
            return Err(Error::MalformedSpecialForm("define"));
        };

        let name = if let Some((name, parameters)) = self.parts(target) {
            // (define (name . parameters) body ...)
            if !self.is_symbol(name) {
                return Err(Error::MalformedSpecialForm("define"));
            }
            let body = self.heap.cdr(tail)?;
            let prototype = self.prototype(parameters, body, "define")?;
            builder.build_constant(self.heap, Opcode::MakeClosure, prototype)?;
            name
        } else if self.is_symbol(target) && arguments.len() == 2 {
            self.expression(builder, arguments[1], Mode::VALUE)?;
            target
        } else {
            return Err(Error::MalformedSpecialForm("define"));
        };

        self.bind_and_reload(builder, Opcode::DefineConst, name, mode)
    }

    /// Emit the binding instruction, then push the bound value if needed.
    fn bind_and_reload(
        &mut self,
        builder: &mut Builder,
        opcode: Opcode,
        name: Handle,
        mode: Mode,
    ) -> Result<()>
    {
        let key = builder.define_constant(self.heap, name)?;
        builder.build(opcode, key)?;
        if mode.leave_value {
            builder.build(Opcode::LookupConst, key)?;
        }
        Ok(())
    }

    fn r#if(&mut self, builder: &mut Builder, tail: Handle, mode: Mode)
        -> Result<()>
    {
        let arguments = self.arguments(tail, "if")?;
        let (condition, consequent, alternative) = match arguments[..] {
            [c, t] => (c, t, None),
            [c, t, e] => (c, t, Some(e)),
            _ => return Err(Error::MalformedSpecialForm("if")),
        };

        self.expression(builder, condition, Mode::VALUE)?;
        let to_alternative = builder.build(Opcode::JmpIfNot, 0)?;

        self.expression(builder, consequent, mode)?;
        let to_end = builder.build(Opcode::Jmp, 0)?;

        let target = builder.location();
        builder.patch(to_alternative, target)?;
        match alternative {
            Some(alternative) =>
                self.expression(builder, alternative, mode)?,
            None =>
                self.literal(builder, Handle::FALSE, mode)?,
        }

        let target = builder.location();
        builder.patch(to_end, target)?;
        Ok(())
    }

    /// Sequence of expressions, of which only the last one is kept.
    fn body(
        &mut self,
        builder: &mut Builder,
        list: Handle,
        mode: Mode,
        form: &'static str,
    ) -> Result<()>
    {
        let expressions = self.arguments(list, form)?;
        let Some((&last, init)) = expressions.split_last() else {
            return Err(Error::MalformedSpecialForm(form));
        };
        for &expression in init {
            self.expression(builder, expression, Mode::DISCARD)?;
        }
        self.expression(builder, last, mode)
    }

    fn lambda(&mut self, builder: &mut Builder, tail: Handle, mode: Mode)
        -> Result<()>
    {
        let arguments = self.arguments(tail, "lambda")?;
        if arguments.len() < 2 {
            return Err(Error::MalformedSpecialForm("lambda"));
        }
        let body = self.heap.cdr(tail)?;
        let prototype = self.prototype(arguments[0], body, "lambda")?;
        if mode.leave_value {
            builder.build_constant(self.heap, Opcode::MakeClosure, prototype)?;
        } else {
            // Nothing refers to an unused prototype.
            self.heap.retain(prototype);
            self.heap.release(prototype);
        }
        Ok(())
    }

    /// Compile a procedure body into a new prototype.
    ///
    /// The prototype starts with a reference count of zero;
    /// the constant pool it is added to becomes its owner.
    fn prototype(&mut self, parameters: Handle, body: Handle, form: &'static str)
        -> Result<Handle>
    {
        let (named, rest) = self.parameters(parameters, form)?;

        let mut inner = Builder::new();
        self.body(&mut inner, body, Mode::TAIL, form)?;
        let code = inner.link();
        trace!(
            parameters = named.len(),
            variadic = rest.is_some(),
            instructions = code.instructions.len(),
            "compiled prototype",
        );

        self.heap.allocate_with(ClosurePrototype::new(named, rest, code))
    }

    /// Split a parameter list into named parameters and the rest parameter.
    ///
    /// Accepts proper lists, dotted lists, and a lone symbol.
    fn parameters(&self, mut list: Handle, form: &'static str)
        -> Result<(Vec<Handle>, Option<Handle>)>
    {
        let mut named = Vec::new();
        loop {
            if list == Handle::EMPTY {
                return Ok((named, None));
            }
            if self.is_symbol(list) {
                return Ok((named, Some(list)));
            }
            let pair = self.heap.get::<Pair>(list)
                .map_err(|_| Error::MalformedSpecialForm(form))?;
            if !self.is_symbol(pair.car()) {
                return Err(Error::MalformedSpecialForm(form));
            }
            named.push(pair.car());
            list = pair.cdr();
        }
    }

    /* ---------------------------------------------------------------------- */
    /*                               Application                              */
    /* ---------------------------------------------------------------------- */

    /// Arguments left to right, then the operator, then the call.
    fn application(
        &mut self,
        builder: &mut Builder,
        operator: Handle,
        tail: Handle,
        mode: Mode,
    ) -> Result<()>
    {
        let arguments = self.arguments(tail, "application")?;
        for &argument in &arguments {
            self.expression(builder, argument, Mode::VALUE)?;
        }
        self.expression(builder, operator, Mode::VALUE)?;

        let opcode = if mode.tail { Opcode::TailCall } else { Opcode::Call };
        builder.build(opcode, arguments.len())?;

        if !mode.leave_value {
            builder.build(Opcode::Pop, 1)?;
        }
        Ok(())
    }
}
