//! Handle-indexed object store.
//!
//! Objects live in a growable table of cells and are named by [`Handle`]s,
//! which are indices into that table. Memory is managed by reference counting
//! with a saturating counter, backed by a mark-sweep collector
//! (see [`Heap::collect`]) that reclaims cycles and objects whose
//! count overflowed into the pinned state.
//!
//! Handles stored in the value stack of a fiber, in the bindings of an
//! environment, or in the members of an aggregate each hold one reference.
//! Freshly allocated objects start with a count of zero; the first owner
//! is expected to [`retain`][`Heap::retain`] them.

pub use self::{
    collect::CollectionStats,
    object::{Instance, Object, Strictness, TypeStats},
};

use {
    self::{
        cell::{Bookkeeping, Cell, Live},
        object::TypeDescriptor,
    },
    crate::{Error, Result, config::HeapPolicy, error::Fault},
    smallvec::SmallVec,
    std::{any::TypeId, collections::HashMap, fmt, mem::replace},
    tracing::{debug, trace, warn},
};

mod cell;
mod collect;
mod object;

/// Upper bound on the number of cells, imposed by the width of handles.
pub const MAX_CELLS: usize = u32::MAX as usize;

/* -------------------------------------------------------------------------- */
/*                                   Handles                                  */
/* -------------------------------------------------------------------------- */

/// Reference to an object in a [`Heap`].
///
/// Handles are plain indices; they do not keep objects alive by themselves.
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Handle(u32);

impl Handle
{
    /// The empty list.
    pub const EMPTY: Self = Self(0);

    /// The true boolean.
    pub const TRUE: Self = Self(1);

    /// The false boolean.
    pub const FALSE: Self = Self(2);

    /// The boolean handle for the given value.
    pub fn from_bool(value: bool) -> Self
    {
        if value { Self::TRUE } else { Self::FALSE }
    }

    /// Whether this is one of the three singletons.
    ///
    /// Singletons are never allocated, freed, or counted.
    pub fn is_immortal(self) -> bool
    {
        self.0 <= Self::FALSE.0
    }

    /// Index of the cell this handle names.
    pub fn index(self) -> usize
    {
        self.0 as usize
    }

    fn from_index(index: usize) -> Self
    {
        debug_assert!(index <= MAX_CELLS);
        Self(index as u32)
    }
}

impl Default for Handle
{
    fn default() -> Self
    {
        Self::EMPTY
    }
}

impl fmt::Debug for Handle
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
    {
        // We explicitly *do not* want to use f.debug_tuple,
        // because it would spread the handle over multiple lines
        // in pretty-printed value stacks.
        match *self {
            Self::EMPTY => write!(f, "()"),
            Self::TRUE  => write!(f, "#t"),
            Self::FALSE => write!(f, "#f"),
            Self(index) => write!(f, "#{index}"),
        }
    }
}

/* -------------------------------------------------------------------------- */
/*                                    Heap                                    */
/* -------------------------------------------------------------------------- */

/// Index into [`Heap::types`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct TypeTag(u16);

/// Table of cells holding typed objects.
pub struct Heap
{
    cells: Vec<Cell>,

    /// Head of the list of free cells, threaded through [`Cell::Free`].
    free_list: Option<Handle>,

    /// Number of cells in the [`Cell::Live`] state.
    live: usize,

    types: Vec<TypeDescriptor>,
    type_tags: HashMap<TypeId, TypeTag>,

    /// Handles the collector treats as reachable, with multiplicity.
    roots: Vec<Handle>,

    /// While set, refcount changes are ignored.
    ///
    /// Set during sweeping, when freed objects may still
    /// refer to objects that have already been reclaimed.
    refcount_guard: bool,

    policy: HeapPolicy,
}

impl Heap
{
    /// Create a heap and its three singletons.
    ///
    /// This grows the cell table to its initial size.
    pub fn new(policy: HeapPolicy) -> Result<Self>
    {
        let mut this = Self{
            cells: Vec::new(),
            free_list: None,
            live: 0,
            types: Vec::new(),
            type_tags: HashMap::new(),
            roots: Vec::new(),
            refcount_guard: false,
            policy,
        };

        // Cell zero is reserved for the empty list by the first growth.
        // The free list is threaded in ascending order,
        // so the next two cells become the booleans.
        for expected in [Handle::TRUE, Handle::FALSE] {
            let handle = this.take_free_cell()?;
            debug_assert_eq!(handle, expected);
            this.cells[handle.index()] = Cell::Immortal;
        }

        Ok(this)
    }

    /// The policy the heap was created with.
    pub fn policy(&self) -> &HeapPolicy
    {
        &self.policy
    }

    /// Total number of cells, in any state.
    pub fn cell_count(&self) -> usize
    {
        self.cells.len()
    }

    /// Number of cells holding live objects.
    ///
    /// The singletons are not included.
    pub fn live_count(&self) -> usize
    {
        self.live
    }
}

/* -------------------------------------------------------------------------- */
/*                                 Allocation                                 */
/* -------------------------------------------------------------------------- */

impl Heap
{
    /// Grow the cell table according to the policy.
    ///
    /// On failure the heap is left exactly as it was.
    fn grow(&mut self) -> Result<()>
    {
        let len = self.cells.len();
        let limit = self.policy.max_cells.unwrap_or(MAX_CELLS).min(MAX_CELLS);

        let target =
            if len < self.policy.initial_cells {
                self.policy.initial_cells
            } else {
                len.saturating_add(len.saturating_mul(self.policy.growth_percent) / 100)
            };
        let target = target.max(len + 1).min(limit);

        if target <= len {
            warn!(cells = len, "heap exhausted");
            return Err(Error::AllocationExhausted(len));
        }

        if self.cells.try_reserve_exact(target - len).is_err() {
            warn!(cells = len, requested = target, "heap growth refused");
            return Err(Error::AllocationExhausted(len));
        }

        let first = if len == 0 {
            self.cells.push(Cell::Immortal);
            1
        } else {
            len
        };

        // Thread new cells in ascending order in front of the old free list.
        for index in first .. target {
            let next = if index + 1 < target {
                Some(Handle::from_index(index + 1))
            } else {
                self.free_list
            };
            self.cells.push(Cell::Free{next});
        }
        if first < target {
            self.free_list = Some(Handle::from_index(first));
        }

        debug!(from = len, to = target, "grew heap");
        Ok(())
    }

    /// Unlink a cell from the free list, growing the table if necessary.
    fn take_free_cell(&mut self) -> Result<Handle>
    {
        if self.free_list.is_none() {
            self.grow()?;
        }

        let handle = self.free_list
            .ok_or(Error::AllocationExhausted(self.cells.len()))?;

        match self.cells[handle.index()] {
            Cell::Free{next} => self.free_list = next,
            _ => return Err(Fault::DanglingHandle(handle).into()),
        }

        Ok(handle)
    }

    /// Type tag for `T`, registering the type on first use.
    fn type_tag<T>(&mut self) -> TypeTag
        where T: Object
    {
        let types = &mut self.types;
        *self.type_tags.entry(TypeId::of::<T>()).or_insert_with(|| {
            types.push(TypeDescriptor::of::<T>());
            TypeTag((types.len() - 1) as u16)
        })
    }

    /// Allocate a freshly initialized object.
    ///
    /// The object starts with a reference count of zero.
    pub fn allocate<T>(&mut self) -> Result<Handle>
        where T: Object
    {
        let tag = self.type_tag::<T>();
        let handle = self.take_free_cell()?;
        let instance = self.types[tag.0 as usize].instantiate();

        self.cells[handle.index()] = Cell::Live(Live{
            bookkeeping: Bookkeeping::empty(),
            tag,
            instance,
        });
        self.live += 1;

        trace!(?handle, r#type = T::NAME, "allocated");
        Ok(handle)
    }

    /// Allocate an object holding the given value.
    ///
    /// Every handle in the value's slots is retained on its behalf.
    /// The object itself starts with a reference count of zero.
    pub fn allocate_with<T>(&mut self, value: T) -> Result<Handle>
        where T: Object
    {
        let handle = self.allocate::<T>()?;

        for index in 0 .. value.slot_count() {
            if let Some(member) = value.slot(index) {
                self.retain(member);
            }
        }

        *self.get_mut::<T>(handle)? = value;
        Ok(handle)
    }

    /// Return the cell to the free list and recycle its instance.
    ///
    /// Handles released by the instance are passed to `release`.
    fn free_cell(&mut self, handle: Handle, release: &mut dyn FnMut(Handle))
    {
        if !matches!(self.cells.get(handle.index()), Some(Cell::Live(..))) {
            return;
        }

        let free = Cell::Free{next: self.free_list};
        let cell = replace(&mut self.cells[handle.index()], free);
        self.free_list = Some(handle);
        self.live -= 1;

        if let Cell::Live(Live{tag, mut instance, ..}) = cell {
            trace!(?handle, r#type = instance.type_name(), "freed");
            instance.terminate(release);
            let budget = self.policy.type_buffer_bytes;
            self.types[tag.0 as usize].recycle(instance, budget);
        }
    }

    /// Return every buffered instance of every type to the allocator.
    pub fn release_buffers(&mut self)
    {
        for descriptor in &mut self.types {
            descriptor.release_buffer();
        }
    }
}

/* -------------------------------------------------------------------------- */
/*                                   Access                                   */
/* -------------------------------------------------------------------------- */

impl Heap
{
    fn live(&self, handle: Handle) -> Option<&Live>
    {
        match self.cells.get(handle.index()) {
            Some(Cell::Live(live)) => Some(live),
            _ => None,
        }
    }

    fn live_mut(&mut self, handle: Handle) -> Option<&mut Live>
    {
        match self.cells.get_mut(handle.index()) {
            Some(Cell::Live(live)) => Some(live),
            _ => None,
        }
    }

    /// The object the handle names, if it names a live object.
    pub fn dereference(&self, handle: Handle) -> Option<&dyn Instance>
    {
        self.live(handle).map(|live| &*live.instance)
    }

    /// Whether the handle names a live object of type `T`.
    pub fn is<T>(&self, handle: Handle) -> bool
        where T: Object
    {
        self.dereference(handle)
            .map_or(false, |instance| instance.as_any().is::<T>())
    }

    /// Name of the type of whatever the handle names.
    pub fn type_name(&self, handle: Handle) -> &'static str
    {
        match handle {
            Handle::EMPTY => "empty list",
            Handle::TRUE | Handle::FALSE => "boolean",
            _ => match self.live(handle) {
                Some(live) => self.types[live.tag.0 as usize].name,
                None => "free cell",
            },
        }
    }

    /// Borrow the object, checking its type.
    pub fn get<T>(&self, handle: Handle) -> Result<&T>
        where T: Object
    {
        self.dereference(handle)
            .and_then(|instance| instance.as_any().downcast_ref::<T>())
            .ok_or_else(|| self.type_mismatch::<T>(handle))
    }

    /// Mutably borrow the object, checking its type.
    ///
    /// Handles written into the object through this borrow
    /// must be retained by the caller.
    pub fn get_mut<T>(&mut self, handle: Handle) -> Result<&mut T>
        where T: Object
    {
        let error = self.type_mismatch::<T>(handle);
        self.live_mut(handle)
            .and_then(|live| live.instance.as_any_mut().downcast_mut::<T>())
            .ok_or(error)
    }

    fn type_mismatch<T>(&self, handle: Handle) -> Error
        where T: Object
    {
        Error::TypeMismatch{expected: T::NAME, found: self.type_name(handle)}
    }
}

/* -------------------------------------------------------------------------- */
/*                             Reference counting                             */
/* -------------------------------------------------------------------------- */

impl Heap
{
    /// Current reference count, if the handle names a live object.
    pub fn refcount(&self, handle: Handle) -> Option<u16>
    {
        self.live(handle).map(|live| live.bookkeeping.refcount())
    }

    /// Record a new reference to the object.
    pub fn retain(&mut self, handle: Handle)
    {
        if self.refcount_guard || handle.is_immortal() {
            return;
        }
        if let Some(live) = self.live_mut(handle) {
            live.bookkeeping.increment();
        }
    }

    /// Drop a reference to the object, freeing it when none remain.
    ///
    /// Freeing cascades to the members of the object.
    pub fn release(&mut self, handle: Handle)
    {
        if self.refcount_guard || handle.is_immortal() {
            return;
        }
        let Some(live) = self.live_mut(handle) else { return };
        live.bookkeeping.decrement();
        if live.bookkeeping.refcount() == 0 {
            self.deallocate(handle);
        }
    }

    /// Free the object and every member whose count drops to zero.
    ///
    /// Uses an explicit worklist, so long chains do not exhaust the stack.
    fn deallocate(&mut self, handle: Handle)
    {
        let mut pending = SmallVec::<[Handle; 16]>::new();
        let mut released = SmallVec::<[Handle; 8]>::new();
        pending.push(handle);

        while let Some(handle) = pending.pop() {
            released.clear();
            self.free_cell(handle, &mut |member| released.push(member));

            for &member in &released {
                if member.is_immortal() {
                    continue;
                }
                if let Some(live) = self.live_mut(member) {
                    let before = live.bookkeeping.refcount();
                    live.bookkeeping.decrement();
                    if before == 1 {
                        pending.push(member);
                    }
                }
            }
        }
    }

    /// Run `f` with refcount changes suspended.
    fn with_refcount_guard<F, R>(&mut self, f: F) -> R
        where F: FnOnce(&mut Self) -> R
    {
        let previous = replace(&mut self.refcount_guard, true);
        let result = f(self);
        self.refcount_guard = previous;
        result
    }
}

/* -------------------------------------------------------------------------- */
/*                              Roots and pinning                             */
/* -------------------------------------------------------------------------- */

impl Heap
{
    /// Make the object reachable for the collector.
    ///
    /// A root holds a reference. Declaring a handle twice requires
    /// removing it twice.
    pub fn declare_root(&mut self, handle: Handle)
    {
        self.retain(handle);
        self.roots.push(handle);
    }

    /// Undo one [`declare_root`][`Self::declare_root`] of the handle.
    ///
    /// Returns whether the handle was a root.
    pub fn remove_root(&mut self, handle: Handle) -> bool
    {
        match self.roots.iter().rposition(|&root| root == handle) {
            Some(position) => {
                self.roots.swap_remove(position);
                self.release(handle);
                true
            },
            None => false,
        }
    }

    /// Handles declared as roots, with multiplicity.
    pub fn roots(&self) -> &[Handle]
    {
        &self.roots
    }

    /// Make the object immune to reference counting.
    ///
    /// Pinned objects are only ever reclaimed by the collector,
    /// which treats them as roots.
    pub fn pin(&mut self, handle: Handle)
    {
        if let Some(live) = self.live_mut(handle) {
            live.bookkeeping.saturate();
        }
    }

    /// Whether the object's count has saturated.
    pub fn is_pinned(&self, handle: Handle) -> bool
    {
        self.live(handle).map_or(false, |live| live.bookkeeping.is_saturated())
    }
}

/* -------------------------------------------------------------------------- */
/*                                 Equivalence                                */
/* -------------------------------------------------------------------------- */

impl Heap
{
    /// Compare two values at the given strictness.
    pub fn eqv(&self, a: Handle, b: Handle, strictness: Strictness) -> bool
    {
        if a == b {
            return true;
        }
        match (self.dereference(a), self.dereference(b)) {
            (Some(a), Some(b)) => a.eqv(b, strictness, self),
            _ => false,
        }
    }
}

/* -------------------------------------------------------------------------- */
/*                                 Statistics                                 */
/* -------------------------------------------------------------------------- */

impl Heap
{
    /// Allocation counters for `T`.
    ///
    /// Types that were never allocated report all zeroes.
    pub fn type_stats<T>(&self) -> TypeStats
        where T: Object
    {
        self.type_tags.get(&TypeId::of::<T>())
            .map(|tag| self.types[tag.0 as usize].stats)
            .unwrap_or_default()
    }

    /// Allocation counters for every registered type, by type name.
    pub fn all_type_stats(&self) -> impl Iterator<Item=(&'static str, TypeStats)> + '_
    {
        self.types.iter().map(|descriptor| (descriptor.name, descriptor.stats))
    }
}
