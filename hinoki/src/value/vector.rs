use {
    crate::{
        Error,
        Result,
        heap::{Handle, Heap, Object, Strictness},
    },
    std::mem::replace,
};

/// Growable sequence of values.
///
/// Strings are vectors of characters with the string flag set.
#[derive(Default)]
pub struct Vector
{
    is_string: bool,
    members: Vec<Handle>,
}

impl Vector
{
    /// Whether the vector represents a string.
    pub fn is_string(&self) -> bool
    {
        self.is_string
    }

    /// The members of the vector.
    pub fn members(&self) -> &[Handle]
    {
        &self.members
    }
}

impl Object for Vector
{
    const NAME: &'static str = "vector";

    fn slot_count(&self) -> usize
    {
        self.members.len()
    }

    fn slot(&self, index: usize) -> Option<Handle>
    {
        self.members.get(index).copied()
    }

    fn eqv(&self, other: &Self, strictness: Strictness, heap: &Heap) -> bool
    {
        if self.is_string != other.is_string {
            return false;
        }
        match strictness {
            Strictness::Identity =>
                false,
            Strictness::Canonical =>
                self.members.is_empty() && other.members.is_empty(),
            Strictness::Structural =>
                self.members.len() == other.members.len()
                    && self.members.iter().zip(&other.members)
                        .all(|(&a, &b)| heap.eqv(a, b, strictness)),
        }
    }
}

impl Heap
{
    /// Allocate a vector of `len` copies of `fill`.
    pub fn make_vector(&mut self, len: usize, fill: Handle) -> Result<Handle>
    {
        let cells = self.cell_count();
        let mut members = Vec::new();
        members.try_reserve_exact(len)
            .map_err(|_| Error::AllocationExhausted(cells))?;
        members.resize(len, fill);
        self.allocate_with(Vector{is_string: false, members})
    }

    /// Allocate a string holding the characters of `text`.
    ///
    /// On failure, the characters allocated so far are freed.
    pub fn make_string(&mut self, text: &str) -> Result<Handle>
    {
        let string = self.allocate_with(Vector{is_string: true, members: Vec::new()})?;
        for c in text.chars() {
            let pushed = self.new_character(c).and_then(|character| {
                self.vector_push(string, character).map_err(|error| {
                    self.retain(character);
                    self.release(character);
                    error
                })
            });
            if let Err(error) = pushed {
                self.retain(string);
                self.release(string);
                return Err(error);
            }
        }
        Ok(string)
    }

    /// Number of members.
    pub fn vector_len(&self, vector: Handle) -> Result<usize>
    {
        Ok(self.get::<Vector>(vector)?.members.len())
    }

    /// Member at the given index.
    pub fn vector_ref(&self, vector: Handle, index: usize) -> Result<Handle>
    {
        let members = &self.get::<Vector>(vector)?.members;
        members.get(index).copied()
            .ok_or(Error::OutOfBounds{index, len: members.len()})
    }

    /// Replace the member at the given index.
    pub fn vector_set(&mut self, vector: Handle, index: usize, value: Handle)
        -> Result<()>
    {
        let len = self.vector_len(vector)?;
        if index >= len {
            return Err(Error::OutOfBounds{index, len});
        }
        self.retain(value);
        let members = &mut self.get_mut::<Vector>(vector)?.members;
        let old = replace(&mut members[index], value);
        self.release(old);
        Ok(())
    }

    /// Append a member.
    pub fn vector_push(&mut self, vector: Handle, value: Handle) -> Result<()>
    {
        let cells = self.cell_count();
        let members = &mut self.get_mut::<Vector>(vector)?.members;
        members.try_reserve(1)
            .map_err(|_| Error::AllocationExhausted(cells))?;
        members.push(value);
        self.retain(value);
        Ok(())
    }

    /// Collect a string into Rust text.
    pub fn string_value(&self, string: Handle) -> Result<String>
    {
        let vector = self.get::<Vector>(string)?;
        if !vector.is_string {
            return Err(Error::TypeMismatch{expected: "string", found: "vector"});
        }
        vector.members.iter()
            .map(|&member| self.character_value(member))
            .collect()
    }
}
