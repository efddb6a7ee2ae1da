use {
    crate::{
        Error,
        Result,
        heap::{Handle, Heap, Object, Strictness},
    },
    std::mem::replace,
};

/// Cons cell.
#[derive(Default)]
pub struct Pair
{
    car: Handle,
    cdr: Handle,
}

impl Pair
{
    /// The first member.
    pub fn car(&self) -> Handle
    {
        self.car
    }

    /// The second member.
    pub fn cdr(&self) -> Handle
    {
        self.cdr
    }
}

impl Object for Pair
{
    const NAME: &'static str = "pair";

    fn slot_count(&self) -> usize
    {
        2
    }

    fn slot(&self, index: usize) -> Option<Handle>
    {
        match index {
            0 => Some(self.car),
            1 => Some(self.cdr),
            _ => None,
        }
    }

    fn eqv(&self, other: &Self, strictness: Strictness, heap: &Heap) -> bool
    {
        strictness == Strictness::Structural
            && heap.eqv(self.car, other.car, strictness)
            && heap.eqv(self.cdr, other.cdr, strictness)
    }
}

impl Heap
{
    /// Allocate a pair.
    pub fn cons(&mut self, car: Handle, cdr: Handle) -> Result<Handle>
    {
        self.allocate_with(Pair{car, cdr})
    }

    /// The first member of a pair.
    pub fn car(&self, pair: Handle) -> Result<Handle>
    {
        Ok(self.get::<Pair>(pair)?.car)
    }

    /// The second member of a pair.
    pub fn cdr(&self, pair: Handle) -> Result<Handle>
    {
        Ok(self.get::<Pair>(pair)?.cdr)
    }

    /// Replace the first member of a pair.
    pub fn set_car(&mut self, pair: Handle, value: Handle) -> Result<()>
    {
        self.get::<Pair>(pair)?;
        self.retain(value);
        let old = replace(&mut self.get_mut::<Pair>(pair)?.car, value);
        self.release(old);
        Ok(())
    }

    /// Replace the second member of a pair.
    pub fn set_cdr(&mut self, pair: Handle, value: Handle) -> Result<()>
    {
        self.get::<Pair>(pair)?;
        self.retain(value);
        let old = replace(&mut self.get_mut::<Pair>(pair)?.cdr, value);
        self.release(old);
        Ok(())
    }

    /// Build a proper list of the given elements.
    ///
    /// On failure, the partially built list is released.
    pub fn list(&mut self, elements: &[Handle]) -> Result<Handle>
    {
        let mut list = Handle::EMPTY;
        for &element in elements.iter().rev() {
            match self.cons(element, list) {
                Ok(pair) => list = pair,
                Err(error) => {
                    self.retain(list);
                    self.release(list);
                    return Err(error);
                },
            }
        }
        Ok(list)
    }

    /// Collect the elements of a proper list.
    pub fn list_elements(&self, mut list: Handle) -> Result<Vec<Handle>>
    {
        let mut elements = Vec::new();
        while list != Handle::EMPTY {
            let pair = self.get::<Pair>(list).map_err(|_| Error::TypeMismatch{
                expected: "proper list",
                found: self.type_name(list),
            })?;
            elements.push(pair.car);
            list = pair.cdr;
        }
        Ok(elements)
    }
}
