//! Verification of code units.
//!
//! The fiber checks every instruction as it executes it,
//! so unverified code cannot corrupt the heap.
//! Verification instead checks what the compiler promises:
//! every jump and constant index is in bounds, no instruction
//! pops more values than the stack holds, and every instruction
//! is reached with the same stack depth along every path.

use {
    super::{CodeUnit, Opcode},
    thiserror::Error,
};

/// Verification error.
#[allow(missing_docs)]
#[derive(Debug, Eq, Error, PartialEq)]
pub enum VerifyError
{
    #[error("Undecodable instruction at offset {0}")]
    InvalidInstruction(usize),

    #[error("Jump at offset {offset} targets {target}, past the end")]
    JumpOutOfBounds{offset: usize, target: usize},

    #[error("Instruction at offset {offset} refers to missing constant {index}")]
    ConstantOutOfBounds{offset: usize, index: usize},

    #[error("Instruction at offset {0} pops more values than the stack holds")]
    StackUnderflow(usize),

    #[error("Offset {offset} is reached with stack depths {first} and {second}")]
    InconsistentDepth{offset: usize, first: usize, second: usize},
}

/// Stack behavior of a verified code unit.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct StackEffect
{
    /// Depth when control runs off the end of the instructions,
    /// or [`None`] if every path ends in a halt.
    pub exit_depth: Option<usize>,

    /// Largest depth reached anywhere.
    pub max_depth: usize,
}

/// Simulate the stack effect of every reachable instruction.
///
/// Calls are modeled as replacing the callee and its arguments
/// with a single result, including tail calls.
pub fn verify(code: &CodeUnit) -> Result<StackEffect, VerifyError>
{
    let len = code.instructions.len();

    // Depth on entry to each offset; the extra entry is the exit.
    let mut depths: Vec<Option<usize>> = vec![None; len + 1];
    let mut pending = vec![0];
    depths[0] = Some(0);
    let mut max_depth = 0;

    while let Some(offset) = pending.pop() {
        if offset == len {
            continue;
        }
        let depth = depths[offset].unwrap_or_default();

        let (opcode, argument) = code.instructions[offset].decode()
            .ok_or(VerifyError::InvalidInstruction(offset))?;

        if opcode.takes_constant() && argument >= code.constants.len() {
            return Err(VerifyError::ConstantOutOfBounds{offset, index: argument});
        }
        if opcode.takes_offset() && argument > len {
            return Err(VerifyError::JumpOutOfBounds{offset, target: argument});
        }

        let (pops, pushes) = match opcode {
            Opcode::Halt        => (0, 0),
            Opcode::PushConst   => (0, 1),
            Opcode::LookupConst => (0, 1),
            Opcode::Jmp         => (0, 0),
            Opcode::JmpIfNot    => (1, 0),
            Opcode::Call        => (argument + 1, 1),
            Opcode::TailCall    => (argument + 1, 1),
            Opcode::SetConst    => (1, 0),
            Opcode::DefineConst => (1, 0),
            Opcode::Pop         => (argument, 0),
            Opcode::MakeClosure => (0, 1),
        };

        let after = depth.checked_sub(pops)
            .ok_or(VerifyError::StackUnderflow(offset))? + pushes;
        max_depth = max_depth.max(after);

        let successors = match opcode {
            Opcode::Halt     => [None, None],
            Opcode::Jmp      => [Some(argument), None],
            Opcode::JmpIfNot => [Some(offset + 1), Some(argument)],
            _                => [Some(offset + 1), None],
        };

        for successor in successors.into_iter().flatten() {
            match depths[successor] {
                None => {
                    depths[successor] = Some(after);
                    pending.push(successor);
                },
                Some(first) if first != after =>
                    return Err(VerifyError::InconsistentDepth{
                        offset: successor,
                        first,
                        second: after,
                    }),
                Some(_) => (),
            }
        }
    }

    Ok(StackEffect{exit_depth: depths[len], max_depth})
}
