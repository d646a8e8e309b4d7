use crate::jvm::VerifyErrorKind;
use fixedbitset::FixedBitSet;
use std::collections::BTreeMap;
use std::fmt::{Debug, Error as FmtError, Formatter};

/// Subroutines are identified by their entry position (the target of the `jsr`s that call them)
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct SubroutineId(pub usize);

/// Everything the verifier learns about one subroutine
///
/// The key piece of information is which local variables the subroutine reads or writes. When
/// returning from the subroutine with a `ret`, locals which the subroutine did _not_ touch keep
/// the type they had right before the `jsr` which called it. Without that rule, a `finally` block
/// called from both a normal exit and an exception handler would clobber the locals of each call
/// site with the merged types of all of them.
pub struct Subroutine {
    pub id: SubroutineId,

    /// Positions right after each `jsr` calling this subroutine (where `ret` returns to)
    ret_targets: Vec<usize>,

    /// Positions of the `ret` instructions which return from this subroutine
    ret_instructions: Vec<usize>,

    /// Locals read or written inside the subroutine
    accessed: FixedBitSet,
}

impl Subroutine {
    pub fn new(id: SubroutineId, max_locals: usize) -> Subroutine {
        Subroutine {
            id,
            ret_targets: vec![],
            ret_instructions: vec![],
            accessed: FixedBitSet::with_capacity(max_locals),
        }
    }

    pub fn entry(&self) -> usize {
        self.id.0
    }

    pub fn ret_targets(&self) -> &[usize] {
        &self.ret_targets
    }

    /// Record a call site, returning whether it was new
    pub fn add_ret_target(&mut self, position: usize) -> bool {
        if self.ret_targets.contains(&position) {
            false
        } else {
            self.ret_targets.push(position);
            true
        }
    }

    pub fn ret_instructions(&self) -> &[usize] {
        &self.ret_instructions
    }

    pub fn add_ret_instruction(&mut self, position: usize) {
        if !self.ret_instructions.contains(&position) {
            self.ret_instructions.push(position);
        }
    }

    /// Record that a local is read or written inside the subroutine
    pub fn access(&mut self, index: usize) {
        if index < self.accessed.len() {
            self.accessed.insert(index);
        }
    }

    pub fn is_accessed(&self, index: usize) -> bool {
        self.accessed.contains(index)
    }
}

impl Debug for Subroutine {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        f.debug_struct("Subroutine")
            .field("entry", &self.id.0)
            .field("ret_instructions", &self.ret_instructions)
            .field("ret_targets", &self.ret_targets)
            .field("accessed", &self.accessed.ones().collect::<Vec<_>>())
            .finish()
    }
}

/// All of the subroutines found while verifying one method
///
/// The registry is owned by a single verification session, so it never needs locking.
#[derive(Debug)]
pub struct SubroutineRegistry {
    max_locals: usize,
    subroutines: BTreeMap<SubroutineId, Subroutine>,
}

impl SubroutineRegistry {
    pub fn new(max_locals: usize) -> SubroutineRegistry {
        SubroutineRegistry {
            max_locals,
            subroutines: BTreeMap::new(),
        }
    }

    /// Get the subroutine entered at a position, registering it if it is new
    pub fn get_or_insert(&mut self, entry: usize) -> &mut Subroutine {
        let max_locals = self.max_locals;
        let id = SubroutineId(entry);
        self.subroutines
            .entry(id)
            .or_insert_with(|| Subroutine::new(id, max_locals))
    }

    pub fn get(&self, id: SubroutineId) -> Option<&Subroutine> {
        self.subroutines.get(&id)
    }

    pub fn get_mut(&mut self, id: SubroutineId) -> Option<&mut Subroutine> {
        self.subroutines.get_mut(&id)
    }

    pub fn is_empty(&self) -> bool {
        self.subroutines.is_empty()
    }

    pub fn len(&self) -> usize {
        self.subroutines.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Subroutine> {
        self.subroutines.values()
    }

    /// Mark a local as accessed in every one of the given (active) subroutines
    pub fn access(&mut self, active: &SubroutineFrame, index: usize, width: usize) {
        for id in active.iter() {
            if let Some(subroutine) = self.subroutines.get_mut(&id) {
                for slot in index..index + width {
                    subroutine.access(slot);
                }
            }
        }
    }
}

/// Stack of subroutines active at a point in the code
///
/// Stored outermost first, so the innermost subroutine is the last element. Most code runs
/// outside of any subroutine (the empty frame), `finally` bodies run one deep, and nested
/// `finally` bodies run deeper.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct SubroutineFrame(Vec<SubroutineId>);

impl SubroutineFrame {
    /// Frame outside of any subroutine
    pub fn top() -> SubroutineFrame {
        SubroutineFrame(vec![])
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    pub fn is_top(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, id: SubroutineId) -> bool {
        self.0.contains(&id)
    }

    pub fn innermost(&self) -> Option<SubroutineId> {
        self.0.last().copied()
    }

    /// Active subroutines, outermost first
    pub fn iter(&self) -> impl Iterator<Item = SubroutineId> + '_ {
        self.0.iter().copied()
    }

    pub fn as_slice(&self) -> &[SubroutineId] {
        &self.0
    }

    /// Enter a subroutine
    pub fn push(&mut self, id: SubroutineId) -> Result<(), VerifyErrorKind> {
        if self.contains(id) {
            return Err(VerifyErrorKind::RecursiveSubroutine);
        }
        self.0.push(id);
        Ok(())
    }

    /// Unwind up to and including the frame for `id`, returning how many frames were popped
    ///
    /// A `ret` can return from an outer subroutine while inside an inner one, in which case the
    /// inner frames are popped too.
    pub fn pop_through(&mut self, id: SubroutineId) -> Result<usize, VerifyErrorKind> {
        if self.is_top() {
            return Err(VerifyErrorKind::RetOutsideSubroutine);
        }
        match self.0.iter().rposition(|active| *active == id) {
            Some(idx) => {
                let popped = self.0.len() - idx;
                self.0.truncate(idx);
                Ok(popped)
            }
            None => Err(VerifyErrorKind::IllegalReturn),
        }
    }

    /// Merge the subroutine frame from another path into this one, returning whether this frame
    /// changed
    ///
    /// An exception handler can cover code at different subroutine depths, so the result is the
    /// shallower of the two frames. Frames of equal depth which disagree keep their common
    /// outermost part.
    pub fn merge(&mut self, other: &SubroutineFrame) -> bool {
        if other.depth() < self.depth() {
            *self = other.clone();
            true
        } else if other.depth() == self.depth() && self != other {
            let common = self
                .0
                .iter()
                .zip(other.0.iter())
                .take_while(|(a, b)| a == b)
                .count();
            self.0.truncate(common);
            true
        } else {
            false
        }
    }
}

impl Debug for SubroutineFrame {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        f.debug_list()
            .entries(self.0.iter().map(|id| id.0))
            .finish()
    }
}

impl<const N: usize> From<[SubroutineId; N]> for SubroutineFrame {
    fn from(ids: [SubroutineId; N]) -> Self {
        SubroutineFrame(Vec::from(ids))
    }
}
