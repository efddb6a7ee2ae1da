//! Minimal Scheme-like language runtime.
//!
//! The runtime consists of a handle-indexed [heap] with hybrid
//! reference counting and mark-sweep collection, a single-pass
//! [compiler][compile] from value graphs to [bytecode],
//! and [fibers][fiber] that execute bytecode one instruction at a time
//! under a round-robin [scheduler].
//!
//! [`Runtime`] ties these together and is the usual entry point.

#![warn(missing_docs)]

pub use self::{
    config::Config,
    error::*,
    heap::{Handle, Heap},
    scheduler::{FiberId, Outcome},
};

use {
    self::{
        compile::{Compiler, SpecialForms},
        heap::CollectionStats,
        scheduler::Scheduler,
        value::SymbolTable,
    },
    tracing::debug,
};

pub mod bytecode;
pub mod closure;
pub mod compile;
pub mod config;
pub mod environment;
pub mod fiber;
pub mod heap;
pub mod scheduler;
pub mod syntax;
pub mod value;

mod error;

/// Runtime state.
///
/// Owns the heap together with everything that holds references into it:
/// the symbol table, the global environment, and the fibers.
/// Dropping the runtime releases all of them.
///
/// Values handed to the host (read data, thunks, and results)
/// are declared roots, so collections during [`run`][`Self::run`]
/// cannot reclaim them. The host gives each one back with
/// [`release`][`Self::release`].
pub struct Runtime
{
    config: Config,
    heap: Heap,
    symbols: SymbolTable,
    forms: SpecialForms,
    global: Handle,
    scheduler: Scheduler,
}

impl Runtime
{
    /// Create a runtime with the default configuration.
    pub fn new() -> Result<Self>
    {
        Self::with_config(Config::default())
    }

    /// Create a runtime.
    ///
    /// The runtime starts with an empty global environment and no fibers.
    pub fn with_config(config: Config) -> Result<Self>
    {
        let mut heap = Heap::new(config.heap.clone())?;
        let mut symbols = SymbolTable::new();
        let forms = SpecialForms::intern(&mut heap, &mut symbols)?;

        let global = heap.new_environment(None)?;
        heap.declare_root(global);

        let scheduler =
            Scheduler::new(config.scheduler.clone(), config.gc.clone());

        Ok(Self{config, heap, symbols, forms, global, scheduler})
    }

    /// The configuration the runtime was created with.
    pub fn config(&self) -> &Config
    {
        &self.config
    }

    /// The heap.
    pub fn heap(&self) -> &Heap
    {
        &self.heap
    }

    /// The heap, for hosts that build or inspect values directly.
    pub fn heap_mut(&mut self) -> &mut Heap
    {
        &mut self.heap
    }

    /// The environment top-level programs run in.
    pub fn global_environment(&self) -> Handle
    {
        self.global
    }

    /// The symbols recognized as special forms.
    pub fn special_forms(&self) -> SpecialForms
    {
        self.forms
    }

    /// The symbol with the given name.
    pub fn intern(&mut self, name: &str) -> Result<Handle>
    {
        self.symbols.intern(&mut self.heap, name)
    }

    /// Read every datum in the source text.
    ///
    /// Each returned datum is rooted for the caller.
    pub fn read(&mut self, source: &str) -> Result<Vec<Handle>>
    {
        let data = syntax::read_all(&mut self.heap, &mut self.symbols, source)?;
        for &datum in &data {
            self.heap.declare_root(datum);
            self.heap.release(datum);
        }
        Ok(data)
    }

    /// Compile an expression into a thunk over the global environment.
    ///
    /// The returned thunk is rooted for the caller.
    pub fn compile(&mut self, expression: Handle) -> Result<Handle>
    {
        let thunk = Compiler::new(&mut self.heap, self.forms)
            .compile_thunk(expression, self.global)?;
        self.heap.declare_root(thunk);
        Ok(thunk)
    }

    /// Give back a handle the runtime rooted for the caller.
    ///
    /// Returns whether the handle was rooted.
    pub fn release(&mut self, handle: Handle) -> bool
    {
        self.heap.remove_root(handle)
    }

    /// Read and compile a whole program.
    ///
    /// The top-level forms are evaluated in order, as if by `begin`;
    /// an empty program evaluates to the empty list.
    /// The returned thunk is rooted for the caller.
    pub fn load(&mut self, source: &str) -> Result<Handle>
    {
        let data = self.read(source)?;
        let program = self.wrap_in_begin(&data);
        for datum in data {
            self.release(datum);
        }

        let program = program?;
        let thunk = self.compile(program);
        self.heap.release(program);

        debug!(source_len = source.len(), "loaded program");
        thunk
    }

    /// `(begin data ...)`, owned by the caller.
    fn wrap_in_begin(&mut self, data: &[Handle]) -> Result<Handle>
    {
        if data.is_empty() {
            return Ok(Handle::EMPTY);
        }
        let mut elements = Vec::with_capacity(data.len() + 1);
        elements.push(self.forms.begin);
        elements.extend_from_slice(data);
        let program = self.heap.list(&elements)?;
        self.heap.retain(program);
        Ok(program)
    }

    /// Start a fiber running the thunk.
    ///
    /// The thunk is kept alive until the fiber finishes.
    pub fn spawn(&mut self, thunk: Handle) -> Result<FiberId>
    {
        self.scheduler.spawn(&mut self.heap, thunk)
    }

    /// Run every fiber until it halts or aborts.
    ///
    /// Fails only with fatal errors.
    pub fn run(&mut self) -> Result<()>
    {
        self.scheduler.run(&mut self.heap)
    }

    /// Remove the outcome of a finished fiber.
    ///
    /// A halted fiber's result is rooted for the caller.
    pub fn outcome(&mut self, id: FiberId) -> Option<Outcome>
    {
        self.scheduler.take_outcome(id)
    }

    /// Load a program, run it to completion, and return its result.
    ///
    /// The result is rooted for the caller.
    pub fn evaluate(&mut self, source: &str) -> Result<Handle>
    {
        let thunk = self.load(source)?;
        let spawned = self.spawn(thunk);
        self.release(thunk);
        let id = spawned?;

        self.run()?;
        match self.outcome(id) {
            Some(Outcome::Halted(Some(result))) => Ok(result),
            Some(Outcome::Aborted(error)) => Err(error),
            Some(Outcome::Halted(None)) | None =>
                Err(Fault::MissingReturnValue.into()),
        }
    }

    /// Run a full collection.
    ///
    /// Values only the host refers to must be rooted first,
    /// with [`Heap::declare_root`].
    pub fn collect(&mut self) -> CollectionStats
    {
        self.scheduler.collect(&mut self.heap)
    }
}

impl Drop for Runtime
{
    fn drop(&mut self)
    {
        self.scheduler.terminate(&mut self.heap);
        self.heap.remove_root(self.global);
        self.heap.release_buffers();
        debug!(live = self.heap.live_count(), "runtime torn down");
    }
}

#[cfg(test)]
mod tests
{
    use {
        super::*,
        crate::{closure::Closure, environment::Environment, value::Pair},
    };

    fn number(runtime: &mut Runtime, source: &str) -> i64
    {
        let result = runtime.evaluate(source).unwrap();
        let value = runtime.heap().number_value(result).unwrap();
        assert!(runtime.release(result));
        value
    }

    #[test]
    fn evaluate() -> anyhow::Result<()>
    {
        let mut runtime = Runtime::new()?;
        assert_eq!(number(&mut runtime, "(quote 5)"), 5);
        assert_eq!(number(&mut runtime, "(define x 3) ((lambda (y) y) x)"), 3);
        assert_eq!(number(&mut runtime, "x"), 3);
        let empty = runtime.evaluate("")?;
        assert_eq!(empty, Handle::EMPTY);
        assert!(runtime.release(empty));
        Ok(())
    }

    #[test]
    fn recursion()
    {
        let mut runtime = Runtime::new().unwrap();
        let source = "
            (define (count-down n next) (if n (count-down (next) next) 'done))
            (define flag #t)
            (define (next) (set! flag #f) flag)
            (count-down flag next)
        ";
        let result = runtime.evaluate(source).unwrap();
        let done = runtime.intern("done").unwrap();
        assert_eq!(result, done);
    }

    #[test]
    fn errors()
    {
        let mut runtime = Runtime::new().unwrap();
        assert!(matches!(runtime.evaluate("(a"), Err(Error::Syntax(..))));
        assert!(matches!(
            runtime.evaluate("(lambda)"),
            Err(Error::MalformedSpecialForm("lambda")),
        ));
        assert!(matches!(
            runtime.evaluate("(undefined)"),
            Err(Error::UnboundVariable(..)),
        ));

        // Failed programs leave the runtime usable.
        assert_eq!(number(&mut runtime, "1"), 1);
    }

    #[test]
    fn several_fibers()
    {
        let mut runtime = Runtime::new().unwrap();
        let first = runtime.load("(define shared 10) shared").unwrap();
        let second = runtime.load("(car)").unwrap();
        let a = runtime.spawn(first).unwrap();
        let b = runtime.spawn(second).unwrap();
        runtime.release(first);
        runtime.release(second);

        runtime.run().unwrap();
        assert!(matches!(runtime.outcome(a), Some(Outcome::Halted(Some(..)))));
        assert!(matches!(runtime.outcome(b), Some(Outcome::Aborted(..))));
        assert!(runtime.outcome(a).is_none());
    }

    #[test]
    fn collection_reclaims_garbage_cycles()
    {
        let mut runtime = Runtime::new().unwrap();
        let make = runtime.evaluate("(define (make) (define (inner) inner) inner)").unwrap();
        runtime.release(make);

        let inner = runtime.evaluate("(make)").unwrap();
        runtime.release(inner);

        let environments = runtime.heap().type_stats::<Environment>().active;
        let closures = runtime.heap().type_stats::<Closure>().active;
        runtime.collect();
        let heap = runtime.heap();
        assert_eq!(heap.type_stats::<Environment>().active, environments - 1);
        assert_eq!(heap.type_stats::<Closure>().active, closures - 1);
    }

    #[test]
    fn host_roots_survive_collection()
    {
        let mut runtime = Runtime::new().unwrap();
        let data = runtime.read("(1 2 3)").unwrap();
        let list = data[0];

        // Make a cycle only the host knows about.
        let heap = runtime.heap_mut();
        let tail = heap.cdr(list).unwrap();
        let tail = heap.cdr(tail).unwrap();
        heap.set_cdr(tail, list).unwrap();

        runtime.collect();
        assert_eq!(runtime.heap().type_stats::<Pair>().active, 3);

        assert!(runtime.release(list));
        runtime.collect();
        assert_eq!(runtime.heap().type_stats::<Pair>().active, 0);
    }

    #[test]
    fn handed_out_values_survive_collection()
    {
        let mut config = Config::default();
        config.gc.collect_every_ticks = Some(1);
        let mut runtime = Runtime::with_config(config).unwrap();

        let kept = runtime.evaluate("'(1 2)").unwrap();
        let thunk = runtime.load("42").unwrap();
        let data = runtime.read("(a b)").unwrap();

        let garbage = runtime.evaluate("(define (id x) x) (id '(7 8 9))").unwrap();
        assert!(runtime.release(garbage));

        let heap = runtime.heap();
        assert!(heap.is::<Pair>(kept));
        let elements = heap.list_elements(kept).unwrap();
        assert_eq!(heap.number_value(elements[0]).unwrap(), 1);
        assert_eq!(heap.number_value(elements[1]).unwrap(), 2);
        assert!(heap.is::<Pair>(data[0]));

        let id = runtime.spawn(thunk).unwrap();
        runtime.run().unwrap();
        let Some(Outcome::Halted(Some(result))) = runtime.outcome(id)
            else { panic!("thunk did not halt") };
        assert_eq!(runtime.heap().number_value(result).unwrap(), 42);

        for handle in [kept, thunk, data[0], result] {
            assert!(runtime.release(handle));
        }
        runtime.collect();
        assert_eq!(runtime.heap().type_stats::<Pair>().active, 0);
    }

    #[test]
    fn configuration_is_applied()
    {
        let mut config = Config::default();
        config.heap.initial_cells = 32;
        config.heap.max_cells = Some(32);
        let mut runtime = Runtime::with_config(config).unwrap();
        assert_eq!(runtime.config().heap.initial_cells, 32);

        // Deep non-tail recursion cannot fit in 32 cells.
        let source = "(define (grow) (grow) 1) (grow)";
        assert!(matches!(
            runtime.evaluate(source),
            Err(Error::AllocationExhausted(32)),
        ));
        assert!(runtime.heap().cell_count() <= 32);
    }
}
