use std::fmt::{Display, Error as FmtError, Formatter};
use std::io;
use thiserror::Error;

/// Errors from reading, verifying, or rewriting class files
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    #[error("Malformed class file: {0}")]
    ClassFormat(#[from] ClassFormatError),

    #[error(transparent)]
    Verify(#[from] VerifyError),
}

/// Class file could not be decoded
#[derive(Debug, Error)]
pub enum ClassFormatError {
    #[error("Bad magic header {0:#010x}")]
    BadMagic(u32),

    #[error("Unexpected end of input")]
    Truncated,

    #[error("Unknown tag {tag} for constant at index {index}")]
    BadConstantTag { tag: u8, index: u16 },

    #[error("Constant pool index {index} is not a {expected} constant")]
    BadConstantIndex { index: u16, expected: &'static str },

    #[error("Invalid modified UTF-8 string")]
    BadUtf8,

    #[error("Unknown method handle kind {0}")]
    BadHandleKind(u8),

    #[error("Malformed descriptor or name '{0}'")]
    BadDescriptor(String),

    #[error("Attribute '{name}' has {extra} unexpected trailing bytes")]
    TrailingBytes { name: &'static str, extra: usize },

    #[error("I/O error: {0}")]
    Io(io::Error),
}

impl From<io::Error> for ClassFormatError {
    fn from(err: io::Error) -> ClassFormatError {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            ClassFormatError::Truncated
        } else {
            ClassFormatError::Io(err)
        }
    }
}

/// Verification (or subroutine inlining) failure for one method
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyError {
    /// Bytecode position of the offending instruction, when there is one
    pub position: Option<usize>,
    pub kind: VerifyErrorKind,
}

impl VerifyError {
    pub fn at(position: usize, kind: VerifyErrorKind) -> VerifyError {
        VerifyError {
            position: Some(position),
            kind,
        }
    }
}

impl From<VerifyErrorKind> for VerifyError {
    fn from(kind: VerifyErrorKind) -> VerifyError {
        VerifyError {
            position: None,
            kind,
        }
    }
}

impl Display for VerifyError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        match self.position {
            Some(position) => write!(f, "Verify error at position {}: {}", position, self.kind),
            None => write!(f, "Verify error: {}", self.kind),
        }
    }
}

impl std::error::Error for VerifyError {}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VerifyErrorKind {
    #[error("Invalid branch target or exception handler entry position ({0})")]
    InvalidTarget(i64),

    #[error("Execution falls off end of method")]
    FallsOffEnd,

    #[error("Multiple returns to single JSR")]
    MultipleReturns,

    #[error("RET instruction outside of a subroutine")]
    RetOutsideSubroutine,

    #[error("Illegal return from subroutine")]
    IllegalReturn,

    #[error("Recursive subroutine call")]
    RecursiveSubroutine,

    #[error("Two subroutines cannot merge to a single RET")]
    SubroutineMerge,

    #[error("Local {0} does not hold a return address")]
    NotReturnAddress(u16),

    #[error("RET returns from inconsistent numbers of nested subroutines")]
    InconsistentRetNesting,

    #[error("Unsupported opcode {0:#04x}")]
    UnsupportedOpcode(u8),

    #[error("Instruction operands extend past the end of the code")]
    TruncatedInstruction,

    #[error("Malformed switch instruction")]
    InvalidSwitch,

    #[error("WIDE applied to an instruction that cannot be widened")]
    InvalidWide,

    #[error("Pop from an empty operand stack")]
    EmptyStack,

    #[error("Operand stack exceeds max_stack")]
    StackOverflow,

    #[error("Local variable index {0} exceeds max_locals")]
    InvalidLocal(u16),

    #[error("Expected {expected} but found {found}")]
    IncompatibleType { expected: String, found: String },

    #[error("Operation splits a category 2 value")]
    InvalidWidth,

    #[error("Operand stack heights differ at merge point")]
    StackHeightMismatch,

    #[error("Incompatible operand stack types at merge point")]
    IncompatibleStackSlot,

    #[error("Bad constant reference: {0}")]
    BadConstant(String),

    #[error("Malformed method descriptor '{0}'")]
    BadDescriptor(String),

    #[error("Return instruction does not match the method return type")]
    BadReturn,

    #[error("Subroutine inlining expansion caused an offset to grow beyond what a branch instruction can encode")]
    OffsetOverflow,

    #[error("Cannot find new position for instruction that used to be at {0}")]
    MissingDuplicate(usize),

    #[error("Subroutine call has no continuation to return to")]
    MissingContinuation,

    #[error("Rewritten code is {0} bytes long, which exceeds the 65535 byte limit")]
    CodeTooLarge(usize),
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn messages() {
        let err = VerifyError::at(12, VerifyErrorKind::InvalidTarget(-3));
        assert_eq!(
            err.to_string(),
            "Verify error at position 12: Invalid branch target or exception handler entry position (-3)"
        );

        let err = VerifyError::from(VerifyErrorKind::MissingDuplicate(7));
        assert_eq!(
            err.to_string(),
            "Verify error: Cannot find new position for instruction that used to be at 7"
        );
    }

    #[test]
    fn eof_is_truncation() {
        let io_err = io::Error::new(io::ErrorKind::UnexpectedEof, "eof");
        assert!(matches!(
            ClassFormatError::from(io_err),
            ClassFormatError::Truncated
        ));
    }
}
