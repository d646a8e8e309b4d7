use super::Instruction;
use crate::jvm::{VerifyError, VerifyErrorKind};
use crate::util::{Offset, OffsetResult, OffsetVec};

/// Decoded method body
///
/// Instructions are stored in program order and addressed by their bytecode position (the sum of
/// the sizes of the instructions before them). The "next" instruction of the one at index `i` is
/// just the one at index `i + 1`, and branch targets are positions which can be resolved back to
/// indices with [`InstructionGraph::index_of`].
#[derive(Debug, Clone)]
pub struct InstructionGraph {
    instructions: OffsetVec<Instruction>,
}

impl InstructionGraph {
    /// Decode a full method body, checking that every branch target lands on the start of an
    /// instruction
    pub fn decode(code: &[u8]) -> Result<InstructionGraph, VerifyError> {
        let mut instructions = OffsetVec::new();
        let mut position = 0;
        while position < code.len() {
            let instruction = Instruction::decode(code, position)?;
            log::trace!(
                "decoded {} at {} ({} bytes)",
                super::opcodes::mnemonic(instruction.opcode),
                position,
                instruction.size
            );
            position += instruction.size;
            instructions.push(instruction);
        }

        let graph = InstructionGraph { instructions };
        for (_, _, instruction) in &graph.instructions {
            for target in instruction.targets() {
                if graph.index_of(target).is_none() {
                    return Err(VerifyError::at(
                        instruction.position,
                        VerifyErrorKind::InvalidTarget(target as i64),
                    ));
                }
            }
        }
        Ok(graph)
    }

    /// Number of instructions
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Length of the code in bytes
    pub fn code_len(&self) -> usize {
        self.instructions.offset_len().0
    }

    /// Index of the instruction starting exactly at a position
    pub fn index_of(&self, position: usize) -> Option<usize> {
        match self.instructions.get_offset(Offset(position)) {
            OffsetResult::Ok(index, _) => Some(index),
            _ => None,
        }
    }

    /// Instruction starting exactly at a position
    pub fn at(&self, position: usize) -> Option<&Instruction> {
        self.instructions.get_offset(Offset(position)).ok()
    }

    pub fn get(&self, index: usize) -> Option<&Instruction> {
        self.instructions.get_index(index).map(|(_, instruction)| instruction)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Instruction> {
        self.instructions.iter().map(|(_, _, instruction)| instruction)
    }

    /// Check that a position from outside the code (eg. an exception table) is valid
    ///
    /// When `allow_end` is set, the position just past the last instruction is also accepted
    /// (exception ranges are exclusive at their end).
    pub fn check_position(&self, position: usize, allow_end: bool) -> Result<(), VerifyError> {
        if self.index_of(position).is_some() || (allow_end && position == self.code_len()) {
            Ok(())
        } else {
            Err(VerifyError::from(VerifyErrorKind::InvalidTarget(
                position as i64,
            )))
        }
    }
}
