//! Lexical environments.
//!
//! An environment maps keys (symbols, compared by identity) to values
//! and links to a parent environment. Bindings are first stored in a
//! fixed number of inline slots; further bindings spill into an overflow
//! vector. Lookup walks the parent chain outward.

use {
    crate::{
        Error,
        Result,
        heap::{Handle, Heap, Object},
    },
    std::{mem::replace, sync::Arc},
};

/// Number of bindings stored inline in an environment.
pub const INLINE_BINDINGS: usize = 16;

#[derive(Clone, Copy)]
struct Binding
{
    key: Handle,
    value: Handle,
}

/// Scope in the chain of lexical environments.
#[derive(Default)]
pub struct Environment
{
    parent: Option<Handle>,
    inline: [Option<Binding>; INLINE_BINDINGS],
    overflow: Vec<Binding>,
}

impl Environment
{
    /// The enclosing environment, if any.
    pub fn parent(&self) -> Option<Handle>
    {
        self.parent
    }

    /// Number of bindings in this scope, not counting parents.
    pub fn binding_count(&self) -> usize
    {
        self.inline.iter().flatten().count() + self.overflow.len()
    }

    /// Bindings in this scope, in slot order.
    fn bindings(&self) -> impl Iterator<Item=&Binding>
    {
        self.inline.iter().flatten().chain(&self.overflow)
    }

    fn find(&self, key: Handle) -> Option<&Binding>
    {
        self.bindings().find(|binding| binding.key == key)
    }

    fn find_mut(&mut self, key: Handle) -> Option<&mut Binding>
    {
        self.inline.iter_mut().flatten()
            .chain(&mut self.overflow)
            .find(|binding| binding.key == key)
    }

    /// Binding stored in the given position,
    /// counting inline slots first, then the overflow.
    fn binding_at(&self, index: usize) -> Option<&Binding>
    {
        if index < INLINE_BINDINGS {
            self.inline[index].as_ref()
        } else {
            self.overflow.get(index - INLINE_BINDINGS)
        }
    }
}

impl Object for Environment
{
    const NAME: &'static str = "environment";

    // Slot zero is the parent.
    // Every binding position then takes two slots: key and value.
    fn slot_count(&self) -> usize
    {
        1 + 2 * (INLINE_BINDINGS + self.overflow.len())
    }

    fn slot(&self, index: usize) -> Option<Handle>
    {
        if index == 0 {
            return self.parent;
        }
        let binding = self.binding_at((index - 1) / 2)?;
        if index % 2 == 1 { Some(binding.key) } else { Some(binding.value) }
    }
}

impl Heap
{
    /// Allocate an empty environment.
    pub fn new_environment(&mut self, parent: Option<Handle>) -> Result<Handle>
    {
        if let Some(parent) = parent {
            self.get::<Environment>(parent)?;
        }
        self.allocate_with(Environment{parent, ..Environment::default()})
    }

    /// The enclosing environment, if any.
    pub fn environment_parent(&self, environment: Handle)
        -> Result<Option<Handle>>
    {
        Ok(self.get::<Environment>(environment)?.parent)
    }

    /// Bind a key in the given scope, replacing any existing binding there.
    ///
    /// Parent scopes are never modified, so this may shadow their bindings.
    pub fn bind(&mut self, environment: Handle, key: Handle, value: Handle)
        -> Result<()>
    {
        let cells = self.cell_count();
        let scope = self.get_mut::<Environment>(environment)?;

        if let Some(binding) = scope.find_mut(key) {
            let old = replace(&mut binding.value, value);
            self.retain(value);
            self.release(old);
            return Ok(());
        }

        let binding = Binding{key, value};
        let free_slot = scope.inline.iter_mut().find(|slot| slot.is_none());
        if let Some(slot) = free_slot {
            *slot = Some(binding);
        } else {
            scope.overflow.try_reserve(1)
                .map_err(|_| Error::AllocationExhausted(cells))?;
            scope.overflow.push(binding);
        }

        self.retain(key);
        self.retain(value);
        Ok(())
    }

    /// Replace the value of the nearest binding of the key.
    ///
    /// Fails if no scope in the chain binds the key.
    pub fn assign(&mut self, environment: Handle, key: Handle, value: Handle)
        -> Result<()>
    {
        let scope = self.binding_scope(environment, key)?;
        let old = self.get_mut::<Environment>(scope)?.find_mut(key)
            .map(|binding| replace(&mut binding.value, value));
        match old {
            Some(old) => {
                self.retain(value);
                self.release(old);
                Ok(())
            },
            None => Err(self.unbound(key)),
        }
    }

    /// The value of the nearest binding of the key.
    pub fn lookup(&self, environment: Handle, key: Handle) -> Result<Handle>
    {
        let mut current = environment;
        loop {
            let scope = self.get::<Environment>(current)?;
            if let Some(binding) = scope.find(key) {
                return Ok(binding.value);
            }
            current = scope.parent.ok_or_else(|| self.unbound(key))?;
        }
    }

    /// Whether any scope in the chain binds the key.
    pub fn is_bound(&self, environment: Handle, key: Handle) -> bool
    {
        self.binding_scope(environment, key).is_ok()
    }

    /// The nearest scope in the chain that binds the key.
    fn binding_scope(&self, environment: Handle, key: Handle) -> Result<Handle>
    {
        let mut current = environment;
        loop {
            let scope = self.get::<Environment>(current)?;
            if scope.find(key).is_some() {
                return Ok(current);
            }
            current = scope.parent.ok_or_else(|| self.unbound(key))?;
        }
    }

    fn unbound(&self, key: Handle) -> Error
    {
        let name = self.symbol_name(key)
            .unwrap_or_else(|_| Arc::from(format!("{key:?}")));
        Error::UnboundVariable(name)
    }
}
