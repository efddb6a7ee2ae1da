use {
    super::{CodeUnit, Instruction, MAX_ARGUMENT, Opcode},
    crate::{
        Error,
        Fault,
        Result,
        heap::{Handle, Heap, Strictness},
    },
};

/// Convenient utility for generating code units.
///
/// Keeps track of instructions and the constant pool,
/// with methods for emitting and back-patching jumps.
pub struct Builder
{
    instructions: Vec<Instruction>,
    constants: Vec<Handle>,
}

impl Builder
{
    /// Create a new builder.
    pub fn new() -> Self
    {
        Self{instructions: Vec::new(), constants: Vec::new()}
    }

    /// Link the code unit.
    ///
    /// The constants are not retained; whoever stores
    /// the code unit in the heap takes ownership of them.
    pub fn link(self) -> CodeUnit
    {
        let code = CodeUnit{
            instructions: self.instructions,
            constants: self.constants,
        };
        debug_assert!(
            super::verify(&code).is_ok(),
            "compiler produced unbalanced code:\n{code}",
        );
        code
    }

    /// Offset of the next instruction to be built.
    pub fn location(&self) -> usize
    {
        self.instructions.len()
    }

    /// Append an instruction and return its offset.
    pub fn build(&mut self, opcode: Opcode, argument: usize) -> Result<usize>
    {
        let offset = self.location();
        if offset >= MAX_ARGUMENT {
            return Err(Error::CodeTooLarge);
        }
        if argument > MAX_ARGUMENT {
            return Err(
                if opcode.takes_constant() { Error::TooManyConstants }
                else { Error::CodeTooLarge }
            );
        }
        self.instructions.push(Instruction::new(opcode, argument as u32));
        Ok(offset)
    }

    /// Replace the argument of an earlier instruction.
    ///
    /// Used for forward jumps, whose targets are unknown when built.
    /// Patching an offset that was never built is a fault.
    pub fn patch(&mut self, offset: usize, argument: usize) -> Result<()>
    {
        if argument > MAX_ARGUMENT {
            return Err(Error::CodeTooLarge);
        }
        let instruction = self.instructions.get_mut(offset)
            .ok_or(Fault::JumpOutOfBounds{target: offset, offset})?;
        let opcode = instruction.opcode()
            .ok_or(Fault::InvalidInstruction{word: instruction.0, offset})?;
        *instruction = Instruction::new(opcode, argument as u32);
        Ok(())
    }

    /// Index of a constant in the pool, adding it if necessary.
    ///
    /// Constants are deduplicated: numbers and characters by value,
    /// empty aggregates by type, everything else by identity.
    pub fn define_constant(&mut self, heap: &Heap, value: Handle)
        -> Result<usize>
    {
        let existing = self.constants.iter().position(|&constant| {
            heap.eqv(constant, value, Strictness::Canonical)
        });
        if let Some(index) = existing {
            return Ok(index);
        }

        let index = self.constants.len();
        if index > MAX_ARGUMENT {
            return Err(Error::TooManyConstants);
        }
        self.constants.push(value);
        Ok(index)
    }

    /// Emit an instruction referring to a constant.
    pub fn build_constant(&mut self, heap: &Heap, opcode: Opcode, value: Handle)
        -> Result<usize>
    {
        debug_assert!(opcode.takes_constant());
        let index = self.define_constant(heap, value)?;
        self.build(opcode, index)
    }
}

impl Default for Builder
{
    fn default() -> Self
    {
        Self::new()
    }
}
