use super::SubroutineCall;
use crate::jvm::code::Instruction;

/// What becomes of one copy of an instruction in the rewritten code
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Disposition {
    /// Emitted as is (with branch and switch targets relocated)
    Keep,

    /// `jsr` which becomes a `goto` (or `goto_w`) to its copy of the subroutine body
    JsrGoto,

    /// `ret` which becomes a `goto` to the code following its `jsr`
    RetGoto,

    /// Left out of the rewritten code
    Skip,
}

/// One copy of an original instruction in the rewritten code
///
/// Instructions outside of subroutines get exactly one handle. Instructions inside subroutines get
/// one handle per call of the subroutine.
#[derive(Debug)]
pub struct InstructionHandle<'a> {
    /// Index of the original instruction
    pub index: usize,

    /// Position of the original instruction
    pub position: usize,

    pub call: &'a SubroutineCall<'a>,

    /// For `jsr`, the call of the subroutine it makes
    pub callee: Option<&'a SubroutineCall<'a>>,

    pub disposition: Disposition,

    /// Position in the rewritten code (skipped handles share the position of the next handle)
    pub new_position: usize,
}

impl<'a> InstructionHandle<'a> {
    pub fn new(index: usize, position: usize, call: &'a SubroutineCall<'a>) -> InstructionHandle<'a> {
        InstructionHandle {
            index,
            position,
            call,
            callee: None,
            disposition: Disposition::Keep,
            new_position: 0,
        }
    }

    pub fn is_emitted(&self) -> bool {
        self.disposition != Disposition::Skip
    }

    /// Number of bytes this handle takes up if placed at a position
    pub fn size_at(&self, instruction: &Instruction, new_position: usize) -> usize {
        match self.disposition {
            Disposition::Skip => 0,
            Disposition::RetGoto => 3,
            Disposition::JsrGoto => instruction.size,
            Disposition::Keep => instruction.relocated_size(new_position),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::code::opcodes;

    #[test]
    fn sizes() {
        let root = SubroutineCall::root();
        #[rustfmt::skip]
        let code = [
            opcodes::NOP,
            opcodes::TABLESWITCH, 0, 0,
            0, 0, 0, 19, // default
            0, 0, 0, 0, // low
            0, 0, 0, 0, // high
            0, 0, 0, 19,
            opcodes::NOP,
        ];
        let switch = Instruction::decode(&code, 1).unwrap();
        assert_eq!(switch.size, 19);

        let mut handle = InstructionHandle::new(1, 1, &root);
        assert_eq!(handle.size_at(&switch, 1), 19);
        assert_eq!(handle.size_at(&switch, 4), 20);
        assert_eq!(handle.size_at(&switch, 6), 18);

        handle.disposition = Disposition::Skip;
        assert!(!handle.is_emitted());
        assert_eq!(handle.size_at(&switch, 4), 0);

        let wide_ret = Instruction::decode(&[opcodes::WIDE, opcodes::RET, 1, 0], 0).unwrap();
        handle.disposition = Disposition::RetGoto;
        assert_eq!(handle.size_at(&wide_ret, 0), 3);
    }
}
