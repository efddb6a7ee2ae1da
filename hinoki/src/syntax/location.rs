//! Locations within source code.

use std::fmt;

/// A source location within a source text.
#[derive(Clone, Copy, Eq, PartialEq)]
pub struct Location
{
    /// The byte offset in the source text.
    pub offset: usize,
}

impl fmt::Debug for Location
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
    {
        // Keep {:#?} output on one line.
        write!(f, "Location({:?})", self.offset)
    }
}

impl fmt::Display for Location
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
    {
        write!(f, "byte {}", self.offset)
    }
}
