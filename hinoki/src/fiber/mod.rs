//! Execution of bytecode.
//!
//! A fiber is a resumable execution context: a value stack,
//! a current environment, a code pointer, and a chain of continuation
//! frames. Each [`tick`][`Fiber::tick`] executes exactly one instruction.
//! Nothing is kept on the host stack between ticks,
//! so fibers can be interleaved and suspended freely.
//!
//! A fiber holds one reference to every handle it stores.
//! Instructions check everything that can fail before changing
//! the fiber, so a failed tick leaves the fiber as it was
//! and can be retried.

pub use self::call_stack::*;

use {
    crate::{
        Error,
        Fault,
        Result,
        bytecode::Opcode,
        closure::{Closure, ClosurePrototype},
        heap::{Handle, Heap},
    },
    smallvec::SmallVec,
    std::mem::replace,
    tracing::{debug, trace},
};

mod call_stack;

/// Fiber state.
pub struct Fiber
{
    stack: Vec<Handle>,
    environment: Handle,

    /// [`None`] once the fiber has halted.
    code: Option<CodePointer>,

    continuation: Option<Handle>,
    depth: usize,
    ticks: u64,
}

impl Fiber
{
    /// Create a fiber that runs a closure of no parameters.
    ///
    /// The closure's code runs directly in its captured environment,
    /// so definitions it makes land there.
    pub fn new(heap: &mut Heap, thunk: Handle) -> Result<Self>
    {
        let closure = heap.get::<Closure>(thunk)?;
        let (prototype, environment) =
            (closure.prototype(), closure.environment());

        let signature = heap.get::<ClosurePrototype>(prototype)?;
        let variadic = signature.rest().is_some();
        if !signature.parameters().is_empty() || variadic {
            let expected = signature.parameters().len();
            return Err(Error::ArityMismatch{expected, found: 0, variadic});
        }

        heap.retain(prototype);
        heap.retain(environment);
        debug!(?thunk, "spawned fiber");

        Ok(Self{
            stack: Vec::new(),
            environment,
            code: Some(CodePointer{prototype, offset: 0}),
            continuation: None,
            depth: 0,
            ticks: 0,
        })
    }

    /// Whether the fiber has finished.
    pub fn is_halted(&self) -> bool
    {
        self.code.is_none()
    }

    /// The value the fiber halted with.
    ///
    /// [`None`] while running, or if the program left no value.
    pub fn result(&self) -> Option<Handle>
    {
        if self.is_halted() { self.stack.last().copied() } else { None }
    }

    /// The value stack of the current procedure.
    pub fn stack(&self) -> &[Handle]
    {
        &self.stack
    }

    /// The current environment.
    pub fn environment(&self) -> Handle
    {
        self.environment
    }

    /// Number of continuation frames waiting to be returned to.
    pub fn continuation_depth(&self) -> usize
    {
        self.depth
    }

    /// Number of instructions executed so far.
    pub fn ticks(&self) -> u64
    {
        self.ticks
    }

    /// Handles the fiber keeps alive, for the collector.
    ///
    /// Continuation frames are reachable through the head of the chain.
    pub fn roots(&self) -> impl Iterator<Item=Handle> + '_
    {
        self.stack.iter().copied()
            .chain([self.environment])
            .chain(self.code.map(|code| code.prototype))
            .chain(self.continuation)
    }

    /// Release every handle the fiber holds.
    pub fn terminate(mut self, heap: &mut Heap)
    {
        self.halt(heap);
        for value in self.stack.drain(..) {
            heap.release(value);
        }
        heap.release(self.environment);
    }

    /// Stop the fiber, dropping any pending continuation frames.
    ///
    /// The value stack is kept so that the result stays available.
    fn halt(&mut self, heap: &mut Heap)
    {
        if let Some(code) = self.code.take() {
            heap.release(code.prototype);
            debug!(ticks = self.ticks, depth = self.depth, "fiber halted");
        }
        if let Some(frame) = self.continuation.take() {
            heap.release(frame);
        }
        self.depth = 0;
    }
}

/* -------------------------------------------------------------------------- */
/*                               Instruction loop                             */
/* -------------------------------------------------------------------------- */

impl Fiber
{
    /// Execute one instruction.
    ///
    /// Returns from finished procedures first.
    /// Ticking a halted fiber does nothing.
    pub fn tick(&mut self, heap: &mut Heap) -> Result<()>
    {
        let Some(pointer) = self.unwind(heap)? else { return Ok(()) };

        let instruction = prototype(heap, pointer.prototype)?
            .code().instructions[pointer.offset];
        let (opcode, argument) = instruction.decode()
            .ok_or(Fault::InvalidInstruction{
                word: instruction.0,
                offset: pointer.offset,
            })?;

        trace!(offset = pointer.offset, %instruction, "dispatch");
        self.execute(heap, pointer, opcode, argument)?;
        self.ticks += 1;
        Ok(())
    }

    /// Return from every procedure whose code is exhausted.
    ///
    /// Returns the code pointer of the next instruction,
    /// or [`None`] if the fiber has halted.
    fn unwind(&mut self, heap: &mut Heap) -> Result<Option<CodePointer>>
    {
        loop {
            let Some(pointer) = self.code else { return Ok(None) };
            let len = prototype(heap, pointer.prototype)?
                .code().instructions.len();
            if pointer.offset < len {
                return Ok(Some(pointer));
            }
            match self.continuation {
                Some(frame) => self.restore(heap, frame)?,
                None => {
                    self.halt(heap);
                    return Ok(None);
                },
            }
        }
    }

    /// Return to the caller saved in the frame,
    /// pushing the callee's top value onto the caller's stack.
    fn restore(&mut self, heap: &mut Heap, frame: Handle) -> Result<()>
    {
        let saved = heap.get::<ContinuationFrame>(frame)
            .map_err(|_| Fault::DanglingHandle(frame))?;
        let (link, environment, code) =
            (saved.link, saved.environment, saved.code);
        let stack = saved.stack.clone();

        let result = self.stack.pop().ok_or(Fault::MissingReturnValue)?;

        for &value in &stack {
            heap.retain(value);
        }
        heap.retain(environment);
        heap.retain(code.prototype);
        if let Some(link) = link {
            heap.retain(link);
        }

        for value in replace(&mut self.stack, stack) {
            heap.release(value);
        }
        self.stack.push(result);

        let callee_environment = replace(&mut self.environment, environment);
        heap.release(callee_environment);
        if let Some(callee) = self.code.replace(code) {
            heap.release(callee.prototype);
        }

        self.continuation = link;
        self.depth -= 1;
        heap.release(frame);

        trace!(depth = self.depth, "returned");
        Ok(())
    }

    fn execute(
        &mut self,
        heap: &mut Heap,
        pointer: CodePointer,
        opcode: Opcode,
        argument: usize,
    ) -> Result<()>
    {
        let offset = pointer.offset;
        let mut next = offset + 1;

        match opcode {
            Opcode::Halt => {
                self.halt(heap);
                return Ok(());
            },

            Opcode::PushConst => {
                let value = constant(heap, pointer, argument)?;
                self.push(heap, value);
            },

            Opcode::LookupConst => {
                let key = constant(heap, pointer, argument)?;
                let value = heap.lookup(self.environment, key)?;
                self.push(heap, value);
            },

            Opcode::Jmp =>
                next = jump_target(heap, pointer, argument)?,

            Opcode::JmpIfNot => {
                let target = jump_target(heap, pointer, argument)?;
                let condition = self.pop(heap, offset)?;
                if condition == Handle::FALSE {
                    next = target;
                }
            },

            Opcode::Call =>
                return self.call(heap, pointer, argument, false),

            Opcode::TailCall =>
                return self.call(heap, pointer, argument, true),

            Opcode::SetConst => {
                let key = constant(heap, pointer, argument)?;
                let value = self.peek(offset)?;
                heap.assign(self.environment, key, value)?;
                self.pop(heap, offset)?;
            },

            Opcode::DefineConst => {
                let key = constant(heap, pointer, argument)?;
                let value = self.peek(offset)?;
                heap.bind(self.environment, key, value)?;
                self.pop(heap, offset)?;
            },

            Opcode::Pop => {
                let len = self.stack.len();
                if argument > len {
                    return Err(Fault::StackUnderflow(offset).into());
                }
                for value in self.stack.drain(len - argument ..) {
                    heap.release(value);
                }
            },

            Opcode::MakeClosure => {
                let prototype = constant(heap, pointer, argument)?;
                let closure = heap.make_closure(prototype, self.environment)?;
                self.push(heap, closure);
            },
        }

        self.code = Some(CodePointer{offset: next, ..pointer});
        Ok(())
    }

    fn push(&mut self, heap: &mut Heap, value: Handle)
    {
        heap.retain(value);
        self.stack.push(value);
    }

    /// Pop the top value and drop the fiber's reference to it.
    ///
    /// The returned handle may no longer be live;
    /// it is only good for comparison.
    fn pop(&mut self, heap: &mut Heap, offset: usize) -> Result<Handle>
    {
        let value = self.stack.pop().ok_or(Fault::StackUnderflow(offset))?;
        heap.release(value);
        Ok(value)
    }

    fn peek(&self, offset: usize) -> Result<Handle>
    {
        self.stack.last().copied()
            .ok_or_else(|| Fault::StackUnderflow(offset).into())
    }
}

/* -------------------------------------------------------------------------- */
/*                                   Calls                                    */
/* -------------------------------------------------------------------------- */

impl Fiber
{
    /// Call the closure on top of the stack with the `count` values below it.
    ///
    /// A non-tail call first saves the rest of the stack,
    /// the environment, and the return address in a new frame.
    fn call(&mut self, heap: &mut Heap, pointer: CodePointer, count: usize, tail: bool)
        -> Result<()>
    {
        let len = self.stack.len();
        if count >= len {
            return Err(Fault::StackUnderflow(pointer.offset).into());
        }
        let base = len - 1 - count;

        let closure = heap.get::<Closure>(self.stack[len - 1])?;
        let (prototype, captured) = (closure.prototype(), closure.environment());

        let arguments = &self.stack[base .. len - 1];
        let environment = bind_arguments(heap, prototype, captured, arguments)?;

        if !tail {
            let frame = ContinuationFrame{
                link: self.continuation,
                stack: self.stack[.. base].to_vec(),
                environment: self.environment,
                code: CodePointer{offset: pointer.offset + 1, ..pointer},
            };
            let frame = match heap.allocate_with(frame) {
                Ok(frame) => frame,
                Err(error) => {
                    heap.release(environment);
                    return Err(error);
                },
            };

            // The frame now owns the caller's state.
            heap.retain(frame);
            if let Some(link) = self.continuation.replace(frame) {
                heap.release(link);
            }
            for value in self.stack.drain(.. base) {
                heap.release(value);
            }
            self.depth += 1;
            trace!(depth = self.depth, "called");
        }

        // Retain the prototype before the callee can be freed.
        heap.retain(prototype);
        let callee = self.stack.len() - 1 - count;
        for value in self.stack.drain(callee ..) {
            heap.release(value);
        }

        let caller_environment = replace(&mut self.environment, environment);
        heap.release(caller_environment);
        if let Some(caller) = self.code.replace(CodePointer{prototype, offset: 0}) {
            heap.release(caller.prototype);
        }
        Ok(())
    }
}

/// Create the environment for a call and bind the parameters in it.
///
/// The environment is returned with one reference, owned by the caller.
fn bind_arguments(
    heap: &mut Heap,
    prototype: Handle,
    captured: Handle,
    arguments: &[Handle],
) -> Result<Handle>
{
    let signature = heap.get::<ClosurePrototype>(prototype)?;
    let parameters: SmallVec<[Handle; 8]> =
        signature.parameters().iter().copied().collect();
    let rest = signature.rest();

    let (expected, found) = (parameters.len(), arguments.len());
    if found < expected || (found > expected && rest.is_none()) {
        let variadic = rest.is_some();
        return Err(Error::ArityMismatch{expected, found, variadic});
    }

    let environment = heap.new_environment(Some(captured))?;
    heap.retain(environment);

    match bind_parameters(heap, environment, &parameters, rest, arguments) {
        Ok(()) => Ok(environment),
        Err(error) => {
            heap.release(environment);
            Err(error)
        },
    }
}

/// Bind named parameters in declaration order,
/// and the excess arguments as a list to the rest parameter.
fn bind_parameters(
    heap: &mut Heap,
    environment: Handle,
    parameters: &[Handle],
    rest: Option<Handle>,
    arguments: &[Handle],
) -> Result<()>
{
    let (named, excess) = arguments.split_at(parameters.len());
    for (&parameter, &argument) in parameters.iter().zip(named) {
        heap.bind(environment, parameter, argument)?;
    }

    if let Some(rest) = rest {
        let list = heap.list(excess)?;
        heap.retain(list);
        let bound = heap.bind(environment, rest, list);
        heap.release(list);
        bound?;
    }
    Ok(())
}

/* -------------------------------------------------------------------------- */
/*                                Code access                                 */
/* -------------------------------------------------------------------------- */

/// The prototype a code pointer refers to.
///
/// Code pointers are only ever made from checked prototypes,
/// so anything else is a corrupted fiber.
fn prototype(heap: &Heap, handle: Handle) -> Result<&ClosurePrototype>
{
    heap.get::<ClosurePrototype>(handle)
        .map_err(|_| Fault::DanglingHandle(handle).into())
}

fn constant(heap: &Heap, pointer: CodePointer, index: usize) -> Result<Handle>
{
    prototype(heap, pointer.prototype)?
        .code().constants.get(index).copied()
        .ok_or_else(|| {
            Fault::ConstantOutOfBounds{index, offset: pointer.offset}.into()
        })
}

/// Check a jump target; jumping to the very end returns.
fn jump_target(heap: &Heap, pointer: CodePointer, target: usize)
    -> Result<usize>
{
    let len = prototype(heap, pointer.prototype)?.code().instructions.len();
    if target > len {
        return Err(Fault::JumpOutOfBounds{target, offset: pointer.offset}.into());
    }
    Ok(target)
}

#[cfg(test)]
mod tests
{
    use {
        super::*,
        crate::{
            compile::{Compiler, SpecialForms},
            config::HeapPolicy,
            syntax::read_all,
            value::SymbolTable,
        },
    };

    struct Fixture
    {
        heap: Heap,
        symbols: SymbolTable,
        forms: SpecialForms,
        global: Handle,
    }

    impl Fixture
    {
        fn new() -> Self
        {
            let mut heap = Heap::new(HeapPolicy::default()).unwrap();
            let mut symbols = SymbolTable::new();
            let forms = SpecialForms::intern(&mut heap, &mut symbols).unwrap();
            let global = heap.new_environment(None).unwrap();
            heap.declare_root(global);
            Self{heap, symbols, forms, global}
        }

        fn spawn(&mut self, source: &str) -> Fiber
        {
            let mut forms =
                read_all(&mut self.heap, &mut self.symbols, source).unwrap();
            forms.insert(0, self.forms.begin);
            let program = self.heap.list(&forms).unwrap();
            self.heap.retain(program);
            for form in &forms[1 ..] {
                self.heap.release(*form);
            }

            let thunk = Compiler::new(&mut self.heap, self.forms)
                .compile_thunk(program, self.global)
                .unwrap();
            self.heap.release(program);
            self.heap.retain(thunk);
            let fiber = Fiber::new(&mut self.heap, thunk).unwrap();
            self.heap.release(thunk);
            fiber
        }

        fn run(&mut self, source: &str) -> Result<Handle>
        {
            let mut fiber = self.spawn(source);
            while !fiber.is_halted() {
                fiber.tick(&mut self.heap)?;
            }
            let result = fiber.result().unwrap();
            self.heap.retain(result);
            fiber.terminate(&mut self.heap);
            Ok(result)
        }

        fn number(&mut self, source: &str) -> i64
        {
            let result = self.run(source).unwrap();
            self.heap.number_value(result).unwrap()
        }
    }

    #[test]
    fn quote_single_step()
    {
        let mut f = Fixture::new();
        let mut fiber = f.spawn("(quote 5)");
        assert!(fiber.stack().is_empty());

        fiber.tick(&mut f.heap).unwrap();
        assert_eq!(fiber.stack().len(), 1);
        assert_eq!(f.heap.number_value(fiber.stack()[0]).unwrap(), 5);
        assert!(!fiber.is_halted());

        fiber.tick(&mut f.heap).unwrap();
        assert!(fiber.is_halted());
        assert_eq!(fiber.stack().len(), 1);
        assert_eq!(fiber.ticks(), 1);

        // Halted fibers ignore ticks.
        fiber.tick(&mut f.heap).unwrap();
        assert_eq!(fiber.ticks(), 1);
        fiber.terminate(&mut f.heap);
    }

    #[test]
    fn conditionals()
    {
        let mut f = Fixture::new();
        assert_eq!(f.number("(if #f 1 2)"), 2);
        assert_eq!(f.number("(if #t 1 2)"), 1);
        assert_eq!(f.number("(if '() 1 2)"), 1);
        assert_eq!(f.run("(if #f 1)").unwrap(), Handle::FALSE);
    }

    #[test]
    fn definitions_and_assignment()
    {
        let mut f = Fixture::new();
        assert_eq!(f.number("(define x 1) (set! x 2) x"), 2);
        assert_eq!(f.number("(define y 3)"), 3);
        assert_eq!(f.number("x"), 2);
    }

    #[test]
    fn unbound_variables()
    {
        let mut f = Fixture::new();
        let error = f.run("(f)").unwrap_err();
        assert!(matches!(error, Error::UnboundVariable(ref name) if &**name == "f"));
        let error = f.run("(set! z 1)").unwrap_err();
        assert!(matches!(error, Error::UnboundVariable(..)));
    }

    #[test]
    fn calling_non_closures()
    {
        let mut f = Fixture::new();
        let error = f.run("(5)").unwrap_err();
        assert!(matches!(
            error,
            Error::TypeMismatch{expected: "closure", found: "number"},
        ));
    }

    #[test]
    fn argument_order()
    {
        let mut f = Fixture::new();
        assert_eq!(f.number("((lambda (a b) a) 1 2)"), 1);
        assert_eq!(f.number("((lambda (a b) b) 1 2)"), 2);

        let rest = f.run("((lambda (a b . c) c) 1 2 3 4)").unwrap();
        let elements = f.heap.list_elements(rest).unwrap();
        let values: Vec<_> = elements.iter()
            .map(|&e| f.heap.number_value(e).unwrap())
            .collect();
        assert_eq!(values, [3, 4]);

        assert_eq!(f.run("((lambda args args))").unwrap(), Handle::EMPTY);
    }

    #[test]
    fn arity_mismatch_leaves_fiber_intact()
    {
        let mut f = Fixture::new();
        let mut fiber = f.spawn("((lambda (a b) a) 1)");
        fiber.tick(&mut f.heap).unwrap();
        fiber.tick(&mut f.heap).unwrap();
        let error = fiber.tick(&mut f.heap).unwrap_err();
        assert!(matches!(
            error,
            Error::ArityMismatch{expected: 2, found: 1, variadic: false},
        ));
        assert_eq!(fiber.stack().len(), 2);
        assert_eq!(fiber.environment(), f.global);

        let error = fiber.tick(&mut f.heap).unwrap_err();
        assert!(matches!(error, Error::ArityMismatch{..}));
        fiber.terminate(&mut f.heap);

        let error = f.run("((lambda (a) a) 1 2)").unwrap_err();
        assert!(matches!(
            error,
            Error::ArityMismatch{expected: 1, found: 2, variadic: false},
        ));
    }

    #[test]
    fn closures_capture_environments()
    {
        let mut f = Fixture::new();
        f.run("(define (make x) (lambda () x))").unwrap();
        f.run("(define a (make 1)) (define b (make 2))").unwrap();
        assert_eq!(f.number("(b)"), 2);
        assert_eq!(f.number("(a)"), 1);
    }

    #[test]
    fn non_tail_calls_return()
    {
        let mut f = Fixture::new();
        let source = "
            (define (id x) x)
            (define (second a b) b)
            (second (id 1) (id (id 2)))
        ";
        assert_eq!(f.number(source), 2);
    }

    #[test]
    fn tail_calls_run_in_constant_space()
    {
        let mut f = Fixture::new();
        let mut fiber = f.spawn("(define (loop) (loop)) (loop)");
        let baseline = f.heap.live_count();
        for _ in 0 .. 200_000 {
            fiber.tick(&mut f.heap).unwrap();
            assert_eq!(fiber.continuation_depth(), 0);
        }
        assert!(!fiber.is_halted());
        assert!(f.heap.live_count() <= baseline + 4);
        fiber.terminate(&mut f.heap);
    }

    #[test]
    fn non_tail_calls_grow_the_chain()
    {
        let mut f = Fixture::new();
        let mut fiber = f.spawn("(define (grow) (grow) 1) (grow)");
        let mut ticks = 0;
        while fiber.continuation_depth() < 100_000 {
            fiber.tick(&mut f.heap).unwrap();
            ticks += 1;
            assert!(ticks < 1_000_000);
        }

        let mut depth = 0;
        let mut frame = fiber.continuation;
        while let Some(handle) = frame {
            frame = f.heap.get::<ContinuationFrame>(handle).unwrap().link();
            depth += 1;
        }
        assert_eq!(depth, 100_000);

        let live = f.heap.live_count();
        fiber.terminate(&mut f.heap);
        assert!(f.heap.live_count() < live - 100_000);
    }

    #[test]
    fn fibers_require_thunks()
    {
        let mut f = Fixture::new();
        let result = f.run("(lambda (x) x)").unwrap();
        let error = Fiber::new(&mut f.heap, result).err().unwrap();
        assert!(matches!(error, Error::ArityMismatch{expected: 1, ..}));

        let error = Fiber::new(&mut f.heap, Handle::TRUE).err().unwrap();
        assert!(matches!(error, Error::TypeMismatch{..}));
    }

    #[test]
    fn roots_cover_fiber_state()
    {
        let mut f = Fixture::new();
        let mut fiber = f.spawn("(define (f x) x) (f '(1 2))");
        for _ in 0 .. 4 {
            fiber.tick(&mut f.heap).unwrap();
        }
        let roots: Vec<_> = fiber.roots().collect();
        assert!(roots.contains(&fiber.environment()));
        assert!(roots.iter().any(|&root| f.heap.is::<ClosurePrototype>(root)));

        // Nothing the fiber uses may be swept.
        f.heap.collect(fiber.roots().collect::<Vec<_>>());
        while !fiber.is_halted() {
            fiber.tick(&mut f.heap).unwrap();
        }
        let result = fiber.result().unwrap();
        assert_eq!(f.heap.list_elements(result).unwrap().len(), 2);
        fiber.terminate(&mut f.heap);
    }
}
