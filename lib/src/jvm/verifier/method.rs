use super::{ConstantResolver, SubroutineFrame, SubroutineRegistry, TypeState};
use crate::jvm::class_file::{ClassFile, Code, Member};
use crate::jvm::code::InstructionGraph;
use crate::jvm::{
    BinaryName, ClassFormatError, Error, MethodAccessFlags, MethodDescriptor, Name,
    ParseDescriptor, RenderDescriptor, UnqualifiedName,
};
use fixedbitset::FixedBitSet;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Error as FmtError, Formatter};

/// Everything needed to verify one method body
pub struct VerifiableMethod<'a> {
    pub class_name: BinaryName,
    pub name: UnqualifiedName,
    pub descriptor: MethodDescriptor<BinaryName>,
    pub is_static: bool,
    pub code: &'a Code,
    pub constants: &'a dyn ConstantResolver,
}

impl<'a> VerifiableMethod<'a> {
    pub fn new(
        class: &'a ClassFile,
        method: &Member,
        code: &'a Code,
    ) -> Result<VerifiableMethod<'a>, Error> {
        let class_name = BinaryName::from_string(class.name()?.to_owned())
            .map_err(ClassFormatError::BadDescriptor)?;
        let name = UnqualifiedName::from_string(method.name(&class.constants)?.to_owned())
            .map_err(ClassFormatError::BadDescriptor)?;
        let descriptor = method.descriptor(&class.constants)?;
        let descriptor = MethodDescriptor::<BinaryName>::parse(descriptor)
            .map_err(|_| ClassFormatError::BadDescriptor(descriptor.to_owned()))?;
        let is_static = method
            .method_access_flags()
            .contains(MethodAccessFlags::STATIC);

        Ok(VerifiableMethod {
            class_name,
            name,
            descriptor,
            is_static,
            code,
            constants: &class.constants,
        })
    }

    /// Is this an instance initialization method?
    pub fn is_init(&self) -> bool {
        self.name == UnqualifiedName::INIT
    }
}

impl<'a> Display for VerifiableMethod<'a> {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        write!(
            f,
            "{}.{}{}",
            self.class_name.as_str(),
            self.name.as_str(),
            self.descriptor.render()
        )
    }
}

/// Outcome of a successful type-inferencing verification
///
/// This owns everything the analysis learned about the method, which is also what the subroutine
/// inliner needs to rewrite it.
#[derive(Debug)]
pub struct VerifiedMethod {
    pub(super) graph: InstructionGraph,

    /// Type states, keyed by position
    pub(super) type_states: BTreeMap<usize, TypeState>,

    pub(super) subroutines: SubroutineRegistry,

    /// Positions of `astore` instructions that store a return address
    pub(super) return_position_stores: BTreeSet<usize>,

    /// Position of the `ret` bound to each `jsr` (keyed by `jsr` position)
    pub(super) jsr_rets: BTreeMap<usize, usize>,

    /// Number of subroutine frames each `ret` pops (keyed by `ret` position)
    pub(super) frames_popped: BTreeMap<usize, usize>,

    /// Instructions interpreted at least once (by instruction index)
    pub(super) visited: FixedBitSet,

    /// Subroutines active at each visited instruction (by instruction index)
    pub(super) instruction_subroutines: Vec<Option<SubroutineFrame>>,
}

impl VerifiedMethod {
    pub(super) fn new(
        graph: InstructionGraph,
        type_states: BTreeMap<usize, TypeState>,
        subroutines: SubroutineRegistry,
        return_position_stores: BTreeSet<usize>,
        jsr_rets: BTreeMap<usize, usize>,
        frames_popped: BTreeMap<usize, usize>,
        visited: FixedBitSet,
    ) -> VerifiedMethod {
        // Interpretation always stops at an instruction with a type state, so every other visited
        // instruction runs with the subroutines of the closest type state before it.
        let mut instruction_subroutines = Vec::with_capacity(graph.len());
        let mut current: Option<SubroutineFrame> = None;
        for (index, instruction) in graph.iter().enumerate() {
            if let Some(state) = type_states.get(&instruction.position) {
                current = Some(state.frame.subroutines.clone());
            }
            if visited.contains(index) {
                instruction_subroutines.push(current.clone());
            } else {
                instruction_subroutines.push(None);
                current = None;
            }
        }

        VerifiedMethod {
            graph,
            type_states,
            subroutines,
            return_position_stores,
            jsr_rets,
            frames_popped,
            visited,
            instruction_subroutines,
        }
    }

    /// Does the method contain any reachable `jsr`?
    pub fn has_subroutines(&self) -> bool {
        !self.subroutines.is_empty()
    }

    /// Is any of the code unreachable?
    pub fn has_unvisited_code(&self) -> bool {
        self.visited.count_ones(..) < self.graph.len()
    }

    pub fn graph(&self) -> &InstructionGraph {
        &self.graph
    }

    pub fn subroutines(&self) -> &SubroutineRegistry {
        &self.subroutines
    }

    pub fn type_state_at(&self, position: usize) -> Option<&TypeState> {
        self.type_states.get(&position)
    }

    /// Type states, ordered by position
    pub fn type_states(&self) -> impl Iterator<Item = &TypeState> {
        self.type_states.values()
    }

    pub fn is_visited(&self, index: usize) -> bool {
        self.visited.contains(index)
    }

    /// Subroutines active when the instruction at an index runs (`None` if it never runs)
    pub fn subroutines_at(&self, index: usize) -> Option<&SubroutineFrame> {
        self.instruction_subroutines
            .get(index)
            .and_then(|frame| frame.as_ref())
    }

    /// Is the instruction at this position an `astore` of a return address?
    pub fn is_return_position_store(&self, position: usize) -> bool {
        self.return_position_stores.contains(&position)
    }

    /// Position of the `ret` which returns to the `jsr` at a position
    pub fn ret_for_jsr(&self, jsr_position: usize) -> Option<usize> {
        self.jsr_rets.get(&jsr_position).copied()
    }

    /// Number of subroutines the `ret` at a position returns from
    pub fn frames_popped(&self, ret_position: usize) -> Option<usize> {
        self.frames_popped.get(&ret_position).copied()
    }
}
