//! Symbols the compiler treats specially.

use crate::{Result, heap::{Handle, Heap}, value::SymbolTable};

/// Interned symbols naming the special forms.
///
/// An application whose operator is one of these symbols
/// is compiled by the corresponding rule instead of as a call.
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug)]
pub struct SpecialForms
{
    pub quote:  Handle,
    pub set:    Handle,
    pub define: Handle,
    pub r#if:   Handle,
    pub begin:  Handle,
    pub lambda: Handle,
}

impl SpecialForms
{
    /// Intern the special form symbols.
    pub fn intern(heap: &mut Heap, symbols: &mut SymbolTable) -> Result<Self>
    {
        Ok(Self{
            quote:  symbols.intern(heap, "quote")?,
            set:    symbols.intern(heap, "set!")?,
            define: symbols.intern(heap, "define")?,
            r#if:   symbols.intern(heap, "if")?,
            begin:  symbols.intern(heap, "begin")?,
            lambda: symbols.intern(heap, "lambda")?,
        })
    }

}
