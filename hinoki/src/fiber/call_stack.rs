// The call stack is a linked list of heap objects rather than a Vec,
// so that frames are ordinary values for the collector
// and a suspended fiber holds nothing but handles.

use crate::heap::{Handle, Object};

/// Position in the code of a closure prototype.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CodePointer
{
    /// The prototype whose code is executing.
    pub prototype: Handle,

    /// Offset of the next instruction.
    pub offset: usize,
}

impl Default for CodePointer
{
    fn default() -> Self
    {
        Self{prototype: Handle::EMPTY, offset: 0}
    }
}

/// Saved caller state, restored when the callee returns.
#[derive(Default)]
pub struct ContinuationFrame
{
    /// The frame to return to after this one.
    pub (super) link: Option<Handle>,

    /// Value stack of the caller, without the callee and its arguments.
    pub (super) stack: Vec<Handle>,

    /// Environment of the caller.
    pub (super) environment: Handle,

    /// Return address.
    pub (super) code: CodePointer,
}

impl ContinuationFrame
{
    /// The frame to return to after this one.
    pub fn link(&self) -> Option<Handle>
    {
        self.link
    }

    /// Number of values saved from the caller's stack.
    pub fn stack_depth(&self) -> usize
    {
        self.stack.len()
    }

    /// Where execution resumes.
    pub fn code(&self) -> CodePointer
    {
        self.code
    }
}

impl Object for ContinuationFrame
{
    const NAME: &'static str = "continuation frame";

    // Link, environment, prototype, then the saved stack.
    fn slot_count(&self) -> usize
    {
        3 + self.stack.len()
    }

    fn slot(&self, index: usize) -> Option<Handle>
    {
        match index {
            0 => self.link,
            1 => Some(self.environment),
            2 => Some(self.code.prototype),
            _ => self.stack.get(index - 3).copied(),
        }
    }
}
