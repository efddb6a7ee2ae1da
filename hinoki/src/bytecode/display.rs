use {super::{CodeUnit, Instruction}, std::fmt};

impl fmt::Display for CodeUnit
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
    {
        for (i, instruction) in self.instructions.iter().enumerate() {
            write!(f, "{i:>6} {instruction}\n")?;
        }
        if !self.constants.is_empty() {
            write!(f, "constants:\n")?;
            for (i, constant) in self.constants.iter().enumerate() {
                write!(f, "{i:>6} {constant:?}\n")?;
            }
        }
        Ok(())
    }
}

impl fmt::Display for Instruction
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
    {
        match self.decode() {
            Some((opcode, argument)) =>
                write!(f, "{:<12} {argument}", opcode.mnemonic()),
            None =>
                write!(f, ".word        {:#010x}", self.0),
        }
    }
}
