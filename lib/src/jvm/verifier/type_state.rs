use super::{Frame, VerificationType};
use crate::jvm::VerifyErrorKind;
use crate::util::OffsetVec;

/// Abstract frame at one position in the code
///
/// Only positions that can be reached from somewhere other than the instruction before them get a
/// type state: the method entry, branch and switch targets, exception handlers, subroutine entries,
/// and the instructions following `jsr` (where `ret` returns to).
#[derive(Debug, Clone)]
pub struct TypeState {
    pub position: usize,
    pub frame: Frame,

    /// Has the verifier interpreted the code starting at this position yet?
    pub visited: bool,
}

impl TypeState {
    pub fn new(position: usize, frame: Frame) -> TypeState {
        TypeState {
            position,
            frame,
            visited: false,
        }
    }

    /// Merge in a frame flowing into this position, returning whether anything changed
    ///
    /// Stacks must have the same height, and each stack slot must have a common supertype. Locals
    /// merge freely (slots with no common supertype become `Top`). The active subroutines merge to
    /// the shallower of the two.
    pub fn merge_from(&mut self, incoming: &Frame) -> Result<bool, VerifyErrorKind> {
        let frame = &mut self.frame;

        if frame.stack.len() != incoming.stack.len()
            || frame.stack.offset_len() != incoming.stack.offset_len()
        {
            return Err(VerifyErrorKind::StackHeightMismatch);
        }

        let mut changed = false;

        let mut stack = OffsetVec::new();
        for ((_, _, current), (_, _, other)) in frame.stack.iter().zip(incoming.stack.iter()) {
            let joined = current.join(other);
            if joined == VerificationType::Top {
                return Err(VerifyErrorKind::IncompatibleStackSlot);
            }
            changed |= joined != *current;
            stack.push(joined);
        }
        frame.stack = stack;

        for (current, other) in frame.locals.iter_mut().zip(incoming.locals.iter()) {
            let joined = current.join(other);
            if joined != *current {
                *current = joined;
                changed = true;
            }
        }
        let before_normalizing = frame.locals.clone();
        frame.normalize_locals();
        changed |= before_normalizing != frame.locals;

        changed |= frame.subroutines.merge(&incoming.subroutines);

        Ok(changed)
    }
}
