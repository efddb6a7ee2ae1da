//! Capabilities every heap-resident type provides.

use {
    super::{Handle, Heap},
    serde::Serialize,
    std::{any::Any, mem::size_of},
};

/// How strictly [`Heap::eqv`] compares two objects.
///
/// Identical handles are always equivalent,
/// and numbers and characters always compare by value.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Strictness
{
    /// Distinct objects are never equivalent.
    Identity,

    /// Like [`Identity`][`Self::Identity`],
    /// but empty aggregates of the same type are equivalent.
    Canonical,

    /// Aggregates are equivalent when their members are.
    Structural,
}

/// Type of objects that live in the heap.
///
/// Every handle an object owns must be reported through [`slot`][`Self::slot`];
/// the tracer and the refcount cascade only see those.
pub trait Object: Any + Default
{
    /// Name of the type, as it appears in type errors.
    const NAME: &'static str;

    /// Reset a recycled instance to the state of a fresh one.
    fn initialize(&mut self)
    {
        *self = Self::default();
    }

    /// Release every handle the object owns.
    ///
    /// Afterwards the object must no longer refer to the released handles.
    fn terminate(&mut self, release: &mut dyn FnMut(Handle))
    {
        for index in 0 .. self.slot_count() {
            if let Some(handle) = self.slot(index) {
                release(handle);
            }
        }
        self.initialize();
    }

    /// Number of slots that may hold handles.
    fn slot_count(&self) -> usize
    {
        0
    }

    /// Handle stored in the given slot, if any.
    fn slot(&self, _index: usize) -> Option<Handle>
    {
        None
    }

    /// Compare two distinct objects of this type.
    fn eqv(&self, _other: &Self, _strictness: Strictness, _heap: &Heap) -> bool
    {
        false
    }
}

/// Object-safe view of an [`Object`].
///
/// The heap stores instances through this trait;
/// there is a blanket implementation for every object type.
pub trait Instance: Any
{
    /// Name of the type, as it appears in type errors.
    fn type_name(&self) -> &'static str;

    /// See [`Object::initialize`].
    fn initialize(&mut self);

    /// See [`Object::terminate`].
    fn terminate(&mut self, release: &mut dyn FnMut(Handle));

    /// See [`Object::slot_count`].
    fn slot_count(&self) -> usize;

    /// See [`Object::slot`].
    fn slot(&self, index: usize) -> Option<Handle>;

    /// Compare with an instance of possibly another type.
    fn eqv(&self, other: &dyn Instance, strictness: Strictness, heap: &Heap)
        -> bool;

    #[allow(missing_docs)]
    fn as_any(&self) -> &dyn Any;

    #[allow(missing_docs)]
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T> Instance for T
    where T: Object
{
    fn type_name(&self) -> &'static str
    {
        T::NAME
    }

    fn initialize(&mut self)
    {
        Object::initialize(self)
    }

    fn terminate(&mut self, release: &mut dyn FnMut(Handle))
    {
        Object::terminate(self, release)
    }

    fn slot_count(&self) -> usize
    {
        Object::slot_count(self)
    }

    fn slot(&self, index: usize) -> Option<Handle>
    {
        Object::slot(self, index)
    }

    fn eqv(&self, other: &dyn Instance, strictness: Strictness, heap: &Heap)
        -> bool
    {
        match other.as_any().downcast_ref::<T>() {
            Some(other) => Object::eqv(self, other, strictness, heap),
            None => false,
        }
    }

    fn as_any(&self) -> &dyn Any
    {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any
    {
        self
    }
}

/// Per-type allocation counters.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub struct TypeStats
{
    /// Instances currently stored in live cells.
    pub active: usize,

    /// Terminated instances kept for reuse.
    pub buffered: usize,

    /// Terminated instances whose memory was returned to the allocator.
    pub deleted: usize,
}

/// Registered heap type.
pub (super) struct TypeDescriptor
{
    pub name: &'static str,
    pub stats: TypeStats,
    size: usize,
    construct: fn() -> Box<dyn Instance>,
    buffer: Vec<Box<dyn Instance>>,
}

fn construct<T>() -> Box<dyn Instance>
    where T: Object
{
    Box::new(T::default())
}

impl TypeDescriptor
{
    pub fn of<T>() -> Self
        where T: Object
    {
        Self{
            name: T::NAME,
            stats: TypeStats::default(),
            size: size_of::<T>(),
            construct: construct::<T>,
            buffer: Vec::new(),
        }
    }

    /// Obtain a fresh instance, reusing a buffered one when possible.
    pub fn instantiate(&mut self) -> Box<dyn Instance>
    {
        let instance = match self.buffer.pop() {
            Some(mut instance) => {
                self.stats.buffered -= 1;
                instance.initialize();
                instance
            },
            None => (self.construct)(),
        };
        self.stats.active += 1;
        instance
    }

    /// Take back a terminated instance.
    ///
    /// The instance is buffered while fewer instances are buffered than
    /// were deleted and the buffer stays under `budget` bytes.
    pub fn recycle(&mut self, instance: Box<dyn Instance>, budget: usize)
    {
        self.stats.active -= 1;
        let footprint = self.stats.buffered.saturating_mul(self.size);
        if self.stats.buffered < self.stats.deleted && footprint < budget {
            self.buffer.push(instance);
            self.stats.buffered += 1;
        } else {
            drop(instance);
            self.stats.deleted += 1;
        }
    }

    /// Return all buffered instances to the allocator.
    pub fn release_buffer(&mut self)
    {
        self.stats.deleted += self.buffer.len();
        self.stats.buffered = 0;
        self.buffer.clear();
    }
}
