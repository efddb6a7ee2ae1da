use {
    super::{Handle, Instance, TypeTag},
    bitflags::bitflags,
};

/// Entry in the slot table.
pub (super) enum Cell
{
    /// Member of the free list.
    Free{next: Option<Handle>},

    /// One of the three singletons; never allocated or freed.
    Immortal,

    /// Live typed instance.
    Live(Live),
}

/// Live typed instance with its bookkeeping bits.
pub (super) struct Live
{
    pub bookkeeping: Bookkeeping,

    /// Indexes into the heap's type descriptors.
    pub tag: TypeTag,

    pub instance: Box<dyn Instance>,
}

bitflags!
{
    /// Reference count and trace mark of a live cell, packed in one word.
    pub struct Bookkeeping: u16
    {
        /// Saturating reference count.
        ///
        /// Once all bits are set the object is pinned:
        /// the count never changes again.
        const REFCOUNT = 0x7FFF;

        /// Set by the mark phase and cleared by the sweep phase.
        const MARKED = 0x8000;
    }
}

impl Bookkeeping
{
    /// The current reference count.
    pub fn refcount(self) -> u16
    {
        (self & Self::REFCOUNT).bits()
    }

    /// Whether the reference count has saturated.
    pub fn is_saturated(self) -> bool
    {
        self.contains(Self::REFCOUNT)
    }

    /// Whether the mark phase has reached this cell.
    pub fn is_marked(self) -> bool
    {
        self.contains(Self::MARKED)
    }

    pub fn increment(&mut self)
    {
        if !self.is_saturated() {
            self.set_refcount(self.refcount() + 1);
        }
    }

    pub fn decrement(&mut self)
    {
        let refcount = self.refcount();
        if refcount != 0 && !self.is_saturated() {
            self.set_refcount(refcount - 1);
        }
    }

    pub fn saturate(&mut self)
    {
        self.insert(Self::REFCOUNT);
    }

    fn set_refcount(&mut self, refcount: u16)
    {
        let refcount = Self::from_bits_truncate(refcount) & Self::REFCOUNT;
        *self = (*self - Self::REFCOUNT) | refcount;
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn refcount_saturates()
    {
        let mut bookkeeping = Bookkeeping::empty();
        for _ in 0 .. 0x7FFF {
            bookkeeping.increment();
        }
        assert!(bookkeeping.is_saturated());
        assert!(!bookkeeping.is_marked());

        // Saturated counts stick.
        bookkeeping.increment();
        bookkeeping.decrement();
        assert_eq!(bookkeeping.refcount(), 0x7FFF);
    }

    #[test]
    fn mark_bit_is_independent()
    {
        let mut bookkeeping = Bookkeeping::empty();
        bookkeeping.increment();
        bookkeeping.insert(Bookkeeping::MARKED);
        bookkeeping.increment();
        assert_eq!(bookkeeping.refcount(), 2);
        assert!(bookkeeping.is_marked());

        bookkeeping.remove(Bookkeeping::MARKED);
        bookkeeping.decrement();
        assert_eq!(bookkeeping.refcount(), 1);
        assert!(!bookkeeping.is_marked());
    }

    #[test]
    fn decrement_stops_at_zero()
    {
        let mut bookkeeping = Bookkeeping::empty();
        bookkeeping.decrement();
        assert_eq!(bookkeeping.refcount(), 0);
    }
}
