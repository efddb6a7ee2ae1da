use crate::{
    Result,
    heap::{Handle, Heap, Object, Strictness},
};

/// Unicode scalar value.
#[derive(Default)]
pub struct Character
{
    code: char,
}

impl Character
{
    /// The scalar value.
    pub fn code(&self) -> char
    {
        self.code
    }
}

impl Object for Character
{
    const NAME: &'static str = "character";

    fn eqv(&self, other: &Self, _strictness: Strictness, _heap: &Heap) -> bool
    {
        self.code == other.code
    }
}

impl Heap
{
    /// Allocate a character.
    pub fn new_character(&mut self, code: char) -> Result<Handle>
    {
        self.allocate_with(Character{code})
    }

    /// The scalar value of a character.
    pub fn character_value(&self, character: Handle) -> Result<char>
    {
        Ok(self.get::<Character>(character)?.code)
    }
}

#[cfg(test)]
mod tests
{
    use {super::*, crate::config::HeapPolicy};

    #[test]
    fn compare_by_code()
    {
        let mut heap = Heap::new(HeapPolicy::default()).unwrap();
        let a = heap.new_character('λ').unwrap();
        let b = heap.new_character('λ').unwrap();
        let c = heap.new_character('x').unwrap();
        assert!(heap.eqv(a, b, Strictness::Identity));
        assert!(!heap.eqv(a, c, Strictness::Structural));
        assert_eq!(heap.character_value(c).unwrap(), 'x');

        let number = heap.new_number(120).unwrap();
        assert!(!heap.eqv(c, number, Strictness::Structural));
    }
}
