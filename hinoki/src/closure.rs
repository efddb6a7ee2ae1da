//! Closure prototypes and closures.

use crate::{
    Result,
    bytecode::CodeUnit,
    environment::Environment,
    heap::{Handle, Heap, Object},
};

/// Compiled procedure body, shared by every closure created from it.
#[derive(Default)]
pub struct ClosurePrototype
{
    parameters: Vec<Handle>,
    rest: Option<Handle>,
    code: CodeUnit,
    is_macro: bool,
}

impl ClosurePrototype
{
    /// Create a prototype.
    pub fn new(parameters: Vec<Handle>, rest: Option<Handle>, code: CodeUnit)
        -> Self
    {
        Self{parameters, rest, code, is_macro: false}
    }

    /// Mark the prototype as a macro.
    pub fn with_macro(self, is_macro: bool) -> Self
    {
        Self{is_macro, ..self}
    }

    /// Named parameters, in declaration order.
    pub fn parameters(&self) -> &[Handle]
    {
        &self.parameters
    }

    /// Parameter that receives the excess arguments as a list.
    pub fn rest(&self) -> Option<Handle>
    {
        self.rest
    }

    /// The compiled body.
    pub fn code(&self) -> &CodeUnit
    {
        &self.code
    }

    /// Whether the prototype was declared as a macro.
    ///
    /// The compiler does not expand macros; the flag is carried for hosts.
    pub fn is_macro(&self) -> bool
    {
        self.is_macro
    }
}

impl Object for ClosurePrototype
{
    const NAME: &'static str = "closure prototype";

    // Parameters, then the rest parameter, then the constant pool.
    fn slot_count(&self) -> usize
    {
        self.parameters.len() + 1 + self.code.constants.len()
    }

    fn slot(&self, index: usize) -> Option<Handle>
    {
        let parameters = self.parameters.len();
        if index < parameters {
            Some(self.parameters[index])
        } else if index == parameters {
            self.rest
        } else {
            self.code.constants.get(index - parameters - 1).copied()
        }
    }
}

/// Prototype paired with the environment it was created in.
#[derive(Default)]
pub struct Closure
{
    prototype: Handle,
    environment: Handle,
}

impl Closure
{
    /// The prototype of the closure.
    pub fn prototype(&self) -> Handle
    {
        self.prototype
    }

    /// The captured environment.
    pub fn environment(&self) -> Handle
    {
        self.environment
    }
}

impl Object for Closure
{
    const NAME: &'static str = "closure";

    fn slot_count(&self) -> usize
    {
        2
    }

    fn slot(&self, index: usize) -> Option<Handle>
    {
        match index {
            0 => Some(self.prototype),
            1 => Some(self.environment),
            _ => None,
        }
    }
}

impl Heap
{
    /// Allocate a closure over the given environment.
    pub fn make_closure(&mut self, prototype: Handle, environment: Handle)
        -> Result<Handle>
    {
        self.get::<ClosurePrototype>(prototype)?;
        self.get::<Environment>(environment)?;
        self.allocate_with(Closure{prototype, environment})
    }
}

#[cfg(test)]
mod tests
{
    use {super::*, crate::config::HeapPolicy};

    #[test]
    fn closures_share_prototypes()
    {
        let mut heap = Heap::new(HeapPolicy::default()).unwrap();
        let constant = heap.new_number(3).unwrap();
        let code = CodeUnit{instructions: Vec::new(), constants: vec![constant]};
        let prototype = ClosurePrototype::new(Vec::new(), None, code);
        let prototype = heap.allocate_with(prototype).unwrap();
        assert_eq!(heap.refcount(constant), Some(1));

        let a = heap.new_environment(None).unwrap();
        let b = heap.new_environment(None).unwrap();
        let first = heap.make_closure(prototype, a).unwrap();
        let second = heap.make_closure(prototype, b).unwrap();
        heap.retain(first);
        heap.retain(second);
        assert_eq!(heap.refcount(prototype), Some(2));

        heap.release(first);
        assert!(heap.is::<ClosurePrototype>(prototype));
        assert!(heap.dereference(a).is_none());

        heap.release(second);
        assert!(heap.dereference(prototype).is_none());
        assert!(heap.dereference(constant).is_none());
    }

    #[test]
    fn macro_flag()
    {
        let prototype = ClosurePrototype::default();
        assert!(!prototype.is_macro());
        assert!(prototype.with_macro(true).is_macro());
    }

    #[test]
    fn closure_requires_prototype()
    {
        let mut heap = Heap::new(HeapPolicy::default()).unwrap();
        let env = heap.new_environment(None).unwrap();
        assert!(heap.make_closure(env, env).is_err());
    }
}
