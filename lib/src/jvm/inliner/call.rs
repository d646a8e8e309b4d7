use crate::jvm::verifier::{SubroutineFrame, SubroutineId};
use crate::util::RefId;
use std::fmt::{Debug, Error as FmtError, Formatter};

/// Calling context of one copy of some code in the rewritten method
///
/// Calls form a tree: the root is the method body itself, and every inlined subroutine body is a
/// child of the call containing the `jsr` that called it. The subroutines on the path from the root
/// to a call are the same as the [`SubroutineFrame`] active in the copied code, but two calls of
/// the same subroutine from different `jsr`s are still distinct calls (compared by identity).
pub struct SubroutineCall<'a> {
    subroutine: Option<SubroutineId>,
    parent: Option<&'a SubroutineCall<'a>>,

    /// Position of the `jsr` making the call
    caller: Option<usize>,
    depth: usize,
}

impl<'a> SubroutineCall<'a> {
    /// The method body, outside of any subroutine
    pub fn root() -> SubroutineCall<'a> {
        SubroutineCall {
            subroutine: None,
            parent: None,
            caller: None,
            depth: 0,
        }
    }

    /// Call a subroutine from a `jsr` inside this call
    pub fn child(&'a self, subroutine: SubroutineId, caller: usize) -> SubroutineCall<'a> {
        SubroutineCall {
            subroutine: Some(subroutine),
            parent: Some(self),
            caller: Some(caller),
            depth: self.depth + 1,
        }
    }

    pub fn subroutine(&self) -> Option<SubroutineId> {
        self.subroutine
    }

    pub fn parent(&self) -> Option<&'a SubroutineCall<'a>> {
        self.parent
    }

    pub fn caller(&self) -> Option<usize> {
        self.caller
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Does code running with these active subroutines belong in this call?
    pub fn matches(&self, frame: &SubroutineFrame) -> bool {
        let active = frame.as_slice();
        if active.len() != self.depth {
            return false;
        }

        let mut call = self;
        while let (Some(subroutine), Some(parent)) = (call.subroutine, call.parent) {
            if active[call.depth - 1] != subroutine {
                return false;
            }
            call = parent;
        }
        true
    }

    /// Call which is `generations` levels up (`0` is the call itself)
    pub fn ancestor(&'a self, generations: usize) -> Option<&'a SubroutineCall<'a>> {
        let mut call = self;
        for _ in 0..generations {
            call = call.parent?;
        }
        Some(call)
    }

    /// Can code in this call jump to code in the target call?
    ///
    /// Control can stay in the same call or leave to any enclosing call, but it never enters a
    /// different call.
    pub fn can_goto(&'a self, target: &'a SubroutineCall<'a>) -> bool {
        let target = RefId(target);
        let mut call = Some(self);
        while let Some(current) = call {
            if RefId(current) == target {
                return true;
            }
            call = current.parent;
        }
        false
    }
}

impl<'a> Debug for SubroutineCall<'a> {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        let mut chain = vec![];
        let mut call = self;
        while let (Some(subroutine), Some(caller), Some(parent)) =
            (call.subroutine, call.caller, call.parent)
        {
            chain.push((subroutine.0, caller));
            call = parent;
        }
        chain.reverse();

        f.write_str("[")?;
        for (idx, (subroutine, caller)) in chain.iter().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{} from {}", subroutine, caller)?;
        }
        f.write_str("]")
    }
}
