//! Bytecode instructions and code units.
//!
//! Every instruction is a 32-bit word.
//! The top byte is the opcode and the low 24 bits are the argument:
//! a constant pool index, an absolute instruction offset,
//! or a count, depending on the opcode.

pub use self::{builder::*, verify::*};

use crate::heap::Handle;

mod builder;
mod display;
mod verify;

/* -------------------------------------------------------------------------- */
/*                          Bytecode data structures                          */
/* -------------------------------------------------------------------------- */

/// Mask selecting the argument of an instruction word.
pub const ARGUMENT_MASK: u32 = 0x00FF_FFFF;

/// Largest argument an instruction can carry.
pub const MAX_ARGUMENT: usize = ARGUMENT_MASK as usize;

/// Operation performed by an instruction.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum Opcode
{
    /// Stop the fiber.
    Halt = 0x00,

    /// Push a constant.
    PushConst = 0x01,

    /// Push the value bound to a constant key.
    LookupConst = 0x02,

    /// Continue at an absolute offset.
    Jmp = 0x03,

    /// Pop a value; continue at an absolute offset if it is false.
    JmpIfNot = 0x04,

    /// Pop a closure and its arguments; call it,
    /// returning to the next instruction.
    Call = 0x05,

    /// Pop a closure and its arguments; call it in place of this procedure.
    TailCall = 0x06,

    /// Pop a value into the nearest existing binding of a constant key.
    SetConst = 0x07,

    /// Pop and discard values.
    Pop = 0x08,

    /// Push a closure of a constant prototype over the current environment.
    MakeClosure = 0x09,

    /// Pop a value into a binding of a constant key in the current scope.
    DefineConst = 0x0A,
}

impl Opcode
{
    /// Decode an opcode byte.
    pub fn from_byte(byte: u8) -> Option<Self>
    {
        let opcode = match byte {
            0x00 => Self::Halt,
            0x01 => Self::PushConst,
            0x02 => Self::LookupConst,
            0x03 => Self::Jmp,
            0x04 => Self::JmpIfNot,
            0x05 => Self::Call,
            0x06 => Self::TailCall,
            0x07 => Self::SetConst,
            0x08 => Self::Pop,
            0x09 => Self::MakeClosure,
            0x0A => Self::DefineConst,
            _    => return None,
        };
        Some(opcode)
    }

    /// Name of the opcode in disassembly.
    pub fn mnemonic(self) -> &'static str
    {
        match self {
            Self::Halt        => "HALT",
            Self::PushConst   => "PUSH_CONST",
            Self::LookupConst => "LOOKUP_CONST",
            Self::Jmp         => "JMP",
            Self::JmpIfNot    => "JMP_IF_NOT",
            Self::Call        => "CALL",
            Self::TailCall    => "TAILCALL",
            Self::SetConst    => "SET_CONST",
            Self::DefineConst => "DEFINE_CONST",
            Self::Pop         => "POP",
            Self::MakeClosure => "MAKE_CLOSURE",
        }
    }

    /// Whether the argument indexes the constant pool.
    pub fn takes_constant(self) -> bool
    {
        matches!(
            self,
            Self::PushConst   |
            Self::LookupConst |
            Self::SetConst    |
            Self::DefineConst |
            Self::MakeClosure
        )
    }

    /// Whether the argument is an instruction offset.
    pub fn takes_offset(self) -> bool
    {
        matches!(self, Self::Jmp | Self::JmpIfNot)
    }
}

/// Encoded instruction.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Instruction(pub u32);

impl Instruction
{
    /// Encode an instruction.
    ///
    /// Arguments wider than 24 bits are truncated;
    /// [`Builder`] rejects them before encoding.
    pub fn new(opcode: Opcode, argument: u32) -> Self
    {
        Self((opcode as u32) << 24 | (argument & ARGUMENT_MASK))
    }

    /// The opcode, if the top byte encodes one.
    pub fn opcode(self) -> Option<Opcode>
    {
        Opcode::from_byte((self.0 >> 24) as u8)
    }

    /// The low 24 bits.
    pub fn argument(self) -> u32
    {
        self.0 & ARGUMENT_MASK
    }

    /// Opcode and argument, if the top byte encodes an opcode.
    pub fn decode(self) -> Option<(Opcode, usize)>
    {
        Some((self.opcode()?, self.argument() as usize))
    }
}

/// Instructions together with the constants they refer to.
///
/// The constant handles are owned by whichever object holds the code unit.
#[derive(Debug, Default)]
pub struct CodeUnit
{
    /// The instructions to execute, starting at offset zero.
    pub instructions: Vec<Instruction>,

    /// Constants referred to by instruction arguments.
    pub constants: Vec<Handle>,
}
