//! Mark-sweep collection.
//!
//! Reference counting cannot reclaim cycles or pinned objects.
//! The collector marks everything reachable from the declared roots,
//! from pinned objects, and from the extra roots passed in by the caller,
//! then frees every unmarked live cell.

use {
    super::{Bookkeeping, Cell, Handle, Heap},
    serde::Serialize,
    tracing::{info, info_span},
};

/// What a collection did.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub struct CollectionStats
{
    /// Live objects found reachable.
    pub marked: usize,

    /// Live objects freed.
    pub swept: usize,
}

impl Heap
{
    /// Run a full collection.
    ///
    /// `extra_roots` are treated as reachable for this collection only;
    /// the scheduler passes the value stacks, environments, and
    /// continuation frames of its fibers here.
    pub fn collect<I>(&mut self, extra_roots: I) -> CollectionStats
        where I: IntoIterator<Item=Handle>
    {
        let span = info_span!("collect", cells = self.cells.len());
        let _enter = span.enter();

        let marked = self.mark(extra_roots);
        let swept = self.sweep();

        info!(marked, swept, live = self.live, "collected garbage");
        CollectionStats{marked, swept}
    }

    /// Set the mark bit on everything reachable.
    ///
    /// Uses an explicit worklist, so deep structures do not
    /// exhaust the stack.
    fn mark<I>(&mut self, extra_roots: I) -> usize
        where I: IntoIterator<Item=Handle>
    {
        let mut pending = self.roots.clone();
        pending.extend(extra_roots);

        // Pinned objects are reachable by definition.
        pending.extend(
            self.cells.iter().enumerate()
                .filter(|(_, cell)| matches!(
                    cell,
                    Cell::Live(live) if live.bookkeeping.is_saturated(),
                ))
                .map(|(index, _)| Handle::from_index(index))
        );

        let mut marked = 0;
        while let Some(handle) = pending.pop() {
            let Some(live) = self.live_mut(handle) else { continue };
            if live.bookkeeping.is_marked() {
                continue;
            }
            live.bookkeeping.insert(Bookkeeping::MARKED);
            marked += 1;

            let instance = &live.instance;
            pending.extend(
                (0 .. instance.slot_count())
                    .filter_map(|index| instance.slot(index))
                    .filter(|member| !member.is_immortal())
            );
        }
        marked
    }

    /// Free every unmarked live cell and clear the marks.
    ///
    /// Refcount changes are suspended while sweeping:
    /// freed objects may refer to cells that were already reclaimed.
    fn sweep(&mut self) -> usize
    {
        self.with_refcount_guard(|this| {
            let mut swept = 0;
            for index in 0 .. this.cells.len() {
                let handle = Handle::from_index(index);
                let Some(live) = this.live_mut(handle) else { continue };
                if live.bookkeeping.is_marked() {
                    live.bookkeeping.remove(Bookkeeping::MARKED);
                } else {
                    this.free_cell(handle, &mut |_| ());
                    swept += 1;
                }
            }
            swept
        })
    }
}
