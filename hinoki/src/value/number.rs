use crate::{
    Result,
    heap::{Handle, Heap, Object, Strictness},
};

/// Fixed-width integer.
#[derive(Default)]
pub struct Number
{
    value: i64,
}

impl Number
{
    /// The integer value.
    pub fn value(&self) -> i64
    {
        self.value
    }
}

impl Object for Number
{
    const NAME: &'static str = "number";

    fn eqv(&self, other: &Self, _strictness: Strictness, _heap: &Heap) -> bool
    {
        self.value == other.value
    }
}

impl Heap
{
    /// Allocate a number.
    pub fn new_number(&mut self, value: i64) -> Result<Handle>
    {
        self.allocate_with(Number{value})
    }

    /// The value of a number.
    pub fn number_value(&self, number: Handle) -> Result<i64>
    {
        Ok(self.get::<Number>(number)?.value)
    }
}
