//! Symbols and the symbol table.

use {
    crate::{
        Result,
        heap::{Handle, Heap, Object},
    },
    std::{collections::HashMap, sync::Arc},
    tracing::trace,
};

/// Interned name.
///
/// Two symbols with the same name are the same object,
/// so symbols compare by identity.
pub struct Symbol
{
    name: Arc<str>,
}

impl Symbol
{
    /// The name of the symbol.
    pub fn name(&self) -> &Arc<str>
    {
        &self.name
    }
}

impl Default for Symbol
{
    fn default() -> Self
    {
        Self{name: Arc::from("")}
    }
}

impl Object for Symbol
{
    const NAME: &'static str = "symbol";
}

/// Associates names with interned symbols.
///
/// Interned symbols are pinned, so neither reference counting
/// nor the collector ever frees them.
pub struct SymbolTable
{
    symbols: HashMap<Arc<str>, Handle>,
}

impl SymbolTable
{
    /// Create an empty symbol table.
    pub fn new() -> Self
    {
        Self{symbols: HashMap::new()}
    }

    /// The symbol with the given name, creating it if necessary.
    pub fn intern(&mut self, heap: &mut Heap, name: &str) -> Result<Handle>
    {
        if let Some(&handle) = self.symbols.get(name) {
            return Ok(handle);
        }

        let name: Arc<str> = Arc::from(name);
        let handle = heap.allocate_with(Symbol{name: name.clone()})?;
        heap.pin(handle);
        trace!(?handle, %name, "interned symbol");

        self.symbols.insert(name, handle);
        Ok(handle)
    }

    /// The symbol with the given name, if it was interned.
    pub fn get(&self, name: &str) -> Option<Handle>
    {
        self.symbols.get(name).copied()
    }

    /// Number of interned symbols.
    pub fn len(&self) -> usize
    {
        self.symbols.len()
    }

    /// Whether no symbols were interned.
    pub fn is_empty(&self) -> bool
    {
        self.symbols.is_empty()
    }

    /// Every interned symbol.
    pub fn handles(&self) -> impl Iterator<Item=Handle> + '_
    {
        self.symbols.values().copied()
    }
}

impl Default for SymbolTable
{
    fn default() -> Self
    {
        Self::new()
    }
}

impl Heap
{
    /// The name of a symbol.
    pub fn symbol_name(&self, symbol: Handle) -> Result<Arc<str>>
    {
        Ok(self.get::<Symbol>(symbol)?.name.clone())
    }
}

#[cfg(test)]
mod tests
{
    use {super::*, crate::config::HeapPolicy};

    #[test]
    fn interning()
    {
        let mut heap = Heap::new(HeapPolicy::default()).unwrap();
        let mut symbols = SymbolTable::new();
        let a = symbols.intern(&mut heap, "lambda").unwrap();
        let b = symbols.intern(&mut heap, "lambda").unwrap();
        let c = symbols.intern(&mut heap, "define").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(symbols.len(), 2);
        assert_eq!(symbols.get("define"), Some(c));
        assert_eq!(&*heap.symbol_name(a).unwrap(), "lambda");
    }

    #[test]
    fn symbols_are_pinned()
    {
        let mut heap = Heap::new(HeapPolicy::default()).unwrap();
        let mut symbols = SymbolTable::new();
        let symbol = symbols.intern(&mut heap, "x").unwrap();
        heap.retain(symbol);
        heap.release(symbol);
        assert!(heap.is::<Symbol>(symbol));
        assert!(heap.is_pinned(symbol));

        heap.collect([]);
        assert!(heap.is::<Symbol>(symbol));
    }
}
