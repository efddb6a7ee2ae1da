//! Round-robin scheduling of fibers.
//!
//! Each fiber gets a bounded number of ticks per turn.
//! Collections happen between ticks, never during one,
//! with every fiber's state passed to the collector as roots.

use {
    crate::{
        Disposition,
        Error,
        Result,
        config::{GcPolicy, SchedulerPolicy},
        fiber::Fiber,
        heap::{CollectionStats, Handle, Heap},
    },
    std::collections::{HashMap, VecDeque},
    tracing::{debug, warn},
};

/// Identifies a fiber.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct FiberId(u64);

/// How a fiber ended.
#[derive(Debug)]
pub enum Outcome
{
    /// The fiber ran to completion, leaving this value.
    ///
    /// The value is declared a root when the fiber finishes.
    /// Whoever takes the outcome takes over that root,
    /// and gives it back with [`Heap::remove_root`].
    Halted(Option<Handle>),

    /// The fiber failed with a guest error and was discarded.
    Aborted(Error),
}

struct Entry
{
    id: FiberId,
    fiber: Fiber,
    thunk: Handle,
}

/// Fibers waiting for their turn and outcomes waiting to be taken.
pub struct Scheduler
{
    policy: SchedulerPolicy,
    gc: GcPolicy,
    runnable: VecDeque<Entry>,
    outcomes: HashMap<FiberId, Outcome>,
    next_id: u64,
    ticks_since_collection: u64,
}

impl Scheduler
{
    /// Create a scheduler with no fibers.
    pub fn new(policy: SchedulerPolicy, gc: GcPolicy) -> Self
    {
        Self{
            policy,
            gc,
            runnable: VecDeque::new(),
            outcomes: HashMap::new(),
            next_id: 0,
            ticks_since_collection: 0,
        }
    }

    /// Start a fiber running the thunk.
    ///
    /// The thunk is declared a root until the fiber finishes.
    pub fn spawn(&mut self, heap: &mut Heap, thunk: Handle) -> Result<FiberId>
    {
        let fiber = Fiber::new(heap, thunk)?;
        heap.declare_root(thunk);

        let id = FiberId(self.next_id);
        self.next_id += 1;
        debug!(?id, "scheduled fiber");

        self.runnable.push_back(Entry{id, fiber, thunk});
        Ok(id)
    }

    /// Number of fibers that have not finished.
    pub fn runnable_count(&self) -> usize
    {
        self.runnable.len()
    }

    /// Whether every fiber has finished.
    pub fn is_idle(&self) -> bool
    {
        self.runnable.is_empty()
    }

    /// Remove the outcome of a finished fiber.
    ///
    /// Returns [`None`] if the fiber is still running
    /// or its outcome was already taken.
    /// A halted fiber's result stays rooted for the caller.
    pub fn take_outcome(&mut self, id: FiberId) -> Option<Outcome>
    {
        self.outcomes.remove(&id)
    }

    /// Run fibers until every one of them has finished.
    ///
    /// Fails only with fatal errors; guest errors abort
    /// the offending fiber and are reported as its outcome.
    pub fn run(&mut self, heap: &mut Heap) -> Result<()>
    {
        while self.turn(heap)? {
        }
        Ok(())
    }

    /// Give the next fiber its turn.
    ///
    /// Returns whether there was a fiber to run.
    pub fn turn(&mut self, heap: &mut Heap) -> Result<bool>
    {
        let Some(mut entry) = self.runnable.pop_front() else {
            return Ok(false);
        };

        for _ in 0 .. self.policy.ticks_per_turn {
            if entry.fiber.is_halted() {
                break;
            }

            if let Some(every) = self.gc.collect_every_ticks {
                if self.ticks_since_collection >= every {
                    self.collect_with(heap, Some(&entry));
                }
            }

            let Err(error) = self.tick(heap, &mut entry) else { continue };
            match error.disposition() {
                Disposition::RetryAfterCollection | Disposition::AbortFiber => {
                    warn!(id = ?entry.id, %error, "fiber aborted");
                    self.finish(heap, entry, Outcome::Aborted(error));
                    return Ok(true);
                },
                Disposition::Fatal => {
                    self.runnable.push_front(entry);
                    return Err(error);
                },
            }
        }

        if entry.fiber.is_halted() {
            let result = entry.fiber.result();
            debug!(id = ?entry.id, ticks = entry.fiber.ticks(), "fiber finished");
            self.finish(heap, entry, Outcome::Halted(result));
        } else {
            self.runnable.push_back(entry);
        }
        Ok(true)
    }

    /// Tick the fiber, retrying once after a collection
    /// if the heap is exhausted.
    fn tick(&mut self, heap: &mut Heap, entry: &mut Entry) -> Result<()>
    {
        self.ticks_since_collection += 1;
        match entry.fiber.tick(heap) {
            Err(error)
                if error.disposition() == Disposition::RetryAfterCollection
                && self.gc.collect_on_exhaustion =>
            {
                warn!(id = ?entry.id, %error, "collecting before retrying tick");
                self.collect_with(heap, Some(&*entry));
                entry.fiber.tick(heap)
            },
            result => result,
        }
    }

    /// Discard a finished fiber and record its outcome.
    fn finish(&mut self, heap: &mut Heap, entry: Entry, outcome: Outcome)
    {
        let Entry{id, fiber, thunk} = entry;
        if let Outcome::Halted(Some(result)) = outcome {
            heap.declare_root(result);
        }
        fiber.terminate(heap);
        heap.remove_root(thunk);
        self.outcomes.insert(id, outcome);
    }

    /// Run a collection with every fiber as a root.
    pub fn collect(&mut self, heap: &mut Heap) -> CollectionStats
    {
        self.collect_with(heap, None)
    }

    fn collect_with(&mut self, heap: &mut Heap, current: Option<&Entry>)
        -> CollectionStats
    {
        self.ticks_since_collection = 0;

        let fibers = self.runnable.iter().chain(current)
            .flat_map(|entry| entry.fiber.roots());
        heap.collect(fibers)
    }

    /// Discard every fiber and outcome, releasing what they hold.
    pub fn terminate(&mut self, heap: &mut Heap)
    {
        for Entry{fiber, thunk, ..} in self.runnable.drain(..) {
            fiber.terminate(heap);
            heap.remove_root(thunk);
        }
        for (_, outcome) in self.outcomes.drain() {
            if let Outcome::Halted(Some(result)) = outcome {
                heap.remove_root(result);
            }
        }
    }
}

#[cfg(test)]
mod tests
{
    use {
        super::*,
        crate::{
            compile::{Compiler, SpecialForms},
            config::HeapPolicy,
            environment::Environment,
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
        scheduler: Scheduler,
    }

    impl Fixture
    {
        fn new(policy: SchedulerPolicy, gc: GcPolicy) -> Self
        {
            Self::with_heap(HeapPolicy::default(), policy, gc)
        }

        fn with_heap(heap: HeapPolicy, policy: SchedulerPolicy, gc: GcPolicy)
            -> Self
        {
            let mut heap = Heap::new(heap).unwrap();
            let mut symbols = SymbolTable::new();
            let forms = SpecialForms::intern(&mut heap, &mut symbols).unwrap();
            let global = heap.new_environment(None).unwrap();
            heap.declare_root(global);
            let scheduler = Scheduler::new(policy, gc);
            Self{heap, symbols, forms, global, scheduler}
        }

        fn spawn(&mut self, source: &str) -> FiberId
        {
            let data = read_all(&mut self.heap, &mut self.symbols, source).unwrap();
            let mut program = vec![self.forms.begin];
            program.extend(&data);
            let program = self.heap.list(&program).unwrap();
            self.heap.retain(program);
            for datum in data {
                self.heap.release(datum);
            }

            let thunk = Compiler::new(&mut self.heap, self.forms)
                .compile_thunk(program, self.global)
                .unwrap();
            self.heap.release(program);
            self.scheduler.spawn(&mut self.heap, thunk).unwrap()
        }

        fn number(&mut self, id: FiberId) -> i64
        {
            match self.scheduler.take_outcome(id) {
                Some(Outcome::Halted(Some(value))) => {
                    let number = self.heap.number_value(value).unwrap();
                    assert!(self.heap.remove_root(value));
                    number
                },
                other => panic!("{other:?}"),
            }
        }
    }

    fn turns(ticks_per_turn: u64) -> SchedulerPolicy
    {
        SchedulerPolicy{ticks_per_turn}
    }

    #[test]
    fn run_to_completion()
    {
        let mut f = Fixture::new(turns(2), GcPolicy::default());
        let a = f.spawn("(define (id x) x) (id 1)");
        let b = f.spawn("((lambda (x y) y) 1 2)");
        assert_eq!(f.scheduler.runnable_count(), 2);

        f.scheduler.run(&mut f.heap).unwrap();
        assert!(f.scheduler.is_idle());
        assert_eq!(f.number(a), 1);
        assert_eq!(f.number(b), 2);
        assert!(f.scheduler.take_outcome(a).is_none());

        // Only the global environment remains rooted.
        assert_eq!(f.heap.roots(), [f.global]);
    }

    #[test]
    fn turns_are_bounded()
    {
        // The first fiber defines `a` in its third tick.
        let source = ["(define a 1) a", "a"];

        let mut f = Fixture::new(turns(1), GcPolicy::default());
        let first = f.spawn(source[0]);
        let second = f.spawn(source[1]);
        f.scheduler.run(&mut f.heap).unwrap();
        assert_eq!(f.number(first), 1);
        assert!(matches!(
            f.scheduler.take_outcome(second),
            Some(Outcome::Aborted(Error::UnboundVariable(..))),
        ));

        let mut f = Fixture::new(turns(64), GcPolicy::default());
        let first = f.spawn(source[0]);
        let second = f.spawn(source[1]);
        f.scheduler.run(&mut f.heap).unwrap();
        assert_eq!(f.number(first), 1);
        assert_eq!(f.number(second), 1);
    }

    #[test]
    fn aborted_fibers_do_not_stop_others()
    {
        let mut f = Fixture::new(turns(1), GcPolicy::default());
        let bad = f.spawn("(5 6)");
        let good = f.spawn("7");
        f.scheduler.run(&mut f.heap).unwrap();
        assert!(matches!(
            f.scheduler.take_outcome(bad),
            Some(Outcome::Aborted(Error::TypeMismatch{..})),
        ));
        assert_eq!(f.number(good), 7);
    }

    #[test]
    fn periodic_collection_reclaims_cycles()
    {
        let source = "
            (define (make) (define (inner) inner) inner)
            (make) (make) (make)
            0
        ";

        let gc = GcPolicy{collect_every_ticks: None, ..GcPolicy::default()};
        let mut f = Fixture::new(turns(64), gc);
        let id = f.spawn(source);
        f.scheduler.run(&mut f.heap).unwrap();
        assert_eq!(f.number(id), 0);
        assert_eq!(f.heap.type_stats::<Environment>().active, 4);

        let gc = GcPolicy{collect_every_ticks: Some(1), ..GcPolicy::default()};
        let mut f = Fixture::new(turns(64), gc);
        let id = f.spawn(source);
        f.scheduler.run(&mut f.heap).unwrap();
        assert_eq!(f.number(id), 0);
        assert_eq!(f.heap.type_stats::<Environment>().active, 1);
    }

    #[test]
    fn untaken_results_survive_collection()
    {
        let gc = GcPolicy{collect_every_ticks: Some(1), ..GcPolicy::default()};
        let mut f = Fixture::new(turns(64), gc);
        let first = f.spawn("'(1 2)");
        f.scheduler.run(&mut f.heap).unwrap();

        // Garbage from the second fiber would reuse freed cells.
        let second = f.spawn("(define (id x) x) (id '(7 8 9)) 3");
        f.scheduler.run(&mut f.heap).unwrap();
        assert_eq!(f.number(second), 3);

        let Some(Outcome::Halted(Some(list))) = f.scheduler.take_outcome(first)
            else { panic!("first fiber did not halt") };
        let elements = f.heap.list_elements(list).unwrap();
        let values: Vec<_> = elements.iter()
            .map(|&element| f.heap.number_value(element).unwrap())
            .collect();
        assert_eq!(values, [1, 2]);
    }

    #[test]
    fn exhaustion_is_retried_after_collection()
    {
        let heap = HeapPolicy{
            initial_cells: 64,
            max_cells: Some(64),
            ..HeapPolicy::default()
        };
        let gc = GcPolicy{collect_every_ticks: None, collect_on_exhaustion: true};
        let mut f = Fixture::with_heap(heap, turns(64), gc);

        // Every call leaves a cycle behind, which only collection reclaims.
        let source = "
            (define (make) (define (inner) inner) inner)
            (define (loop) (make) (loop))
            (loop)
        ";
        let id = f.spawn(source);
        for _ in 0 .. 100 {
            f.scheduler.turn(&mut f.heap).unwrap();
        }
        assert!(f.scheduler.take_outcome(id).is_none());
        assert_eq!(f.scheduler.runnable_count(), 1);

        f.scheduler.terminate(&mut f.heap);
        assert!(f.scheduler.is_idle());
    }
}
