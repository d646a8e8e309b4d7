//! Decoded method bytecode
//!
//! The raw `code` array of a [`Code`](crate::jvm::class_file::Code) attribute gets decoded into
//! an [`InstructionGraph`]: a dense, position-addressed list of [`Instruction`]s. Instructions
//! that transfer control are tagged with their kind:
//!
//!   - [`InstructionKind::Branch`] for conditional branches and `goto`
//!   - [`InstructionKind::Select`] for `tableswitch` and `lookupswitch`
//!   - [`InstructionKind::Jsr`] and [`InstructionKind::Ret`] for subroutine calls and returns
//!
//! Everything else is an [`InstructionKind::Plain`] straight-line [`Op`].
//!
//! See the [list of bytecode instructions][0].
//!
//! [0]: https://docs.oracle.com/javase/specs/jvms/se18/html/jvms-6.html#jvms-6.5

mod graph;
mod instructions;
pub mod opcodes;

pub use graph::*;
pub use instructions::*;
pub use opcodes::OpcodeFlags;
