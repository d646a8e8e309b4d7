use super::{
    ExecutionContext, Frame, SubroutineId, SubroutineRegistry, TypeState, VerifiableMethod,
    VerificationType, VerifiedMethod,
};
use crate::jvm::code::{opcodes, Instruction, InstructionGraph, InstructionKind, LocalType, Op};
use crate::jvm::code::{BranchKind, OpcodeFlags};
use crate::jvm::{BinaryName, RefType, VerifyError, VerifyErrorKind};
use crate::util::OffsetVec;
use fixedbitset::FixedBitSet;
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

/// Verification by type inference
///
/// This is the verifier used for class files older than version 50, which have no stack map
/// tables. The types at every merge point get computed as a fixed point, starting from the
/// method entry and re-interpreting code whenever the state flowing into it gets more general.
///
/// Subroutines (`jsr`/`ret`) complicate this: the same subroutine body is reachable from several
/// call sites with different types in the locals. When returning, locals which the subroutine
/// never touches get the types they had at the call site being returned to (instead of the merge
/// of the types from all call sites).
pub struct TypeInferencingVerifier;

impl TypeInferencingVerifier {
    pub fn verify(method: &VerifiableMethod) -> Result<VerifiedMethod, VerifyError> {
        log::debug!("Verifying {} by type inference", method);

        let graph = InstructionGraph::decode(&method.code.code)?;
        if graph.is_empty() {
            return Err(VerifyError::at(0, VerifyErrorKind::FallsOffEnd));
        }

        let handlers = resolve_handlers(method, &graph)?;
        let entry = Frame::entry(
            &method.class_name,
            method.is_static,
            method.is_init(),
            &method.descriptor,
            method.code.max_locals as usize,
        )
        .map_err(|kind| VerifyError::at(0, kind))?;

        let mut session = Session::new(method, &graph, handlers);
        session.merge_into(0, &entry)?;
        session.run()?;

        let Session {
            type_states,
            registry,
            return_position_stores,
            jsr_rets,
            frames_popped,
            visited,
            ..
        } = session;
        log::debug!(
            "Verified {} ({} type states, {} subroutines)",
            method,
            type_states.len(),
            registry.len()
        );
        Ok(VerifiedMethod::new(
            graph,
            type_states,
            registry,
            return_position_stores,
            jsr_rets,
            frames_popped,
            visited,
        ))
    }
}

/// Exception handler with its positions checked and its catch type resolved
struct Handler {
    start: usize,
    end: usize,
    handler: usize,
    catch_type: VerificationType,
}

fn resolve_handlers(
    method: &VerifiableMethod,
    graph: &InstructionGraph,
) -> Result<Vec<Handler>, VerifyError> {
    let mut handlers = vec![];
    for entry in &method.code.exception_table {
        let start = entry.start_pc as usize;
        let end = entry.end_pc as usize;
        let handler = entry.handler_pc as usize;
        graph.check_position(start, false)?;
        graph.check_position(end, true)?;
        graph.check_position(handler, false)?;
        if start >= end {
            return Err(VerifyError::from(VerifyErrorKind::InvalidTarget(
                end as i64,
            )));
        }

        let catch_type = if entry.catch_type.0 == 0 {
            VerificationType::object(BinaryName::THROWABLE)
        } else {
            match method.constants.class(entry.catch_type.0) {
                Ok(class @ RefType::Object(_)) => VerificationType::Object(class),
                Ok(_) => {
                    return Err(VerifyError::at(
                        handler,
                        VerifyErrorKind::BadConstant(String::from("array class as catch type")),
                    ))
                }
                Err(kind) => return Err(VerifyError::at(handler, kind)),
            }
        };

        handlers.push(Handler {
            start,
            end,
            handler,
            catch_type,
        });
    }
    Ok(handlers)
}

/// Positions where control can arrive other than by falling through from the previous instruction
fn find_merge_points(graph: &InstructionGraph, handlers: &[Handler]) -> FixedBitSet {
    let mut merge_points = FixedBitSet::with_capacity(graph.code_len() + 1);
    for instruction in graph.iter() {
        for target in instruction.targets() {
            merge_points.insert(target);
        }
        if let InstructionKind::Jsr { .. } = instruction.kind {
            merge_points.insert(instruction.next_position());
        }
    }
    for handler in handlers {
        merge_points.insert(handler.handler);
    }
    merge_points
}

/// State of one verification run
///
/// None of this outlives the verification of the method, except what ends up in the
/// [`VerifiedMethod`].
struct Session<'m, 'g> {
    method: &'m VerifiableMethod<'m>,
    graph: &'g InstructionGraph,
    handlers: Vec<Handler>,
    max_stack: usize,

    type_states: BTreeMap<usize, TypeState>,

    /// Positions reachable other than by falling through: branch, switch and `jsr` targets,
    /// `jsr` continuations, and exception handlers
    merge_points: FixedBitSet,

    /// Positions to interpret from, and the same set for deduplication
    worklist: VecDeque<usize>,
    pending: FixedBitSet,

    registry: SubroutineRegistry,

    /// Subroutine called by every `jsr` reached so far (keyed by `jsr` position)
    jsr_sites: BTreeMap<usize, SubroutineId>,

    /// Frame right before each `jsr` (keyed by `jsr` position)
    jsr_frames: HashMap<usize, Frame>,

    /// Frame right before each `ret`, from the last time it was interpreted (keyed by `ret`
    /// position)
    ret_frames: HashMap<usize, Frame>,

    jsr_rets: BTreeMap<usize, usize>,
    frames_popped: BTreeMap<usize, usize>,
    return_position_stores: BTreeSet<usize>,
    visited: FixedBitSet,
}

impl<'m, 'g> Session<'m, 'g> {
    fn new(
        method: &'m VerifiableMethod<'m>,
        graph: &'g InstructionGraph,
        handlers: Vec<Handler>,
    ) -> Session<'m, 'g> {
        let merge_points = find_merge_points(graph, &handlers);
        Session {
            method,
            graph,
            handlers,
            max_stack: method.code.max_stack as usize,
            merge_points,
            type_states: BTreeMap::new(),
            worklist: VecDeque::new(),
            pending: FixedBitSet::with_capacity(graph.code_len()),
            registry: SubroutineRegistry::new(method.code.max_locals as usize),
            jsr_sites: BTreeMap::new(),
            jsr_frames: HashMap::new(),
            ret_frames: HashMap::new(),
            jsr_rets: BTreeMap::new(),
            frames_popped: BTreeMap::new(),
            return_position_stores: BTreeSet::new(),
            visited: FixedBitSet::with_capacity(graph.len()),
        }
    }

    fn enqueue(&mut self, position: usize) {
        if !self.pending.put(position) {
            self.worklist.push_back(position);
        }
    }

    /// Process the worklist until it is empty
    fn run(&mut self) -> Result<(), VerifyError> {
        while let Some(position) = self.worklist.pop_front() {
            self.pending.set(position, false);

            let frame = if let Some(state) = self.type_states.get_mut(&position) {
                state.visited = true;
                state.frame.clone()
            } else if let Some(frame) = self.ret_frames.get(&position) {
                frame.clone()
            } else {
                continue;
            };
            self.interpret_from(position, frame)?;
        }
        Ok(())
    }

    /// Merge a frame into the type state at a position, creating it if needed
    fn merge_into(&mut self, position: usize, frame: &Frame) -> Result<(), VerifyError> {
        match self.type_states.entry(position) {
            Entry::Vacant(vacant) => {
                log::trace!("new type state at {}: {:?}", position, frame);
                vacant.insert(TypeState::new(position, frame.clone()));
                self.enqueue(position);
            }
            Entry::Occupied(mut occupied) => {
                let changed = occupied
                    .get_mut()
                    .merge_from(frame)
                    .map_err(|kind| VerifyError::at(position, kind))?;
                if changed {
                    log::trace!(
                        "merged type state at {}: {:?}",
                        position,
                        occupied.get().frame
                    );
                    self.enqueue(position);
                }
            }
        }
        Ok(())
    }

    /// Merge a frame into every exception handler covering a position
    fn merge_handlers(&mut self, position: usize, frame: &Frame) -> Result<(), VerifyError> {
        let mut targets = vec![];
        for handler in &self.handlers {
            if handler.start <= position && position < handler.end {
                targets.push((handler.handler, handler.catch_type.clone()));
            }
        }
        for (handler, catch_type) in targets {
            let mut handler_frame = Frame {
                locals: frame.locals.clone(),
                stack: OffsetVec::new(),
                subroutines: frame.subroutines.clone(),
            };
            handler_frame
                .push(catch_type, self.max_stack)
                .map_err(|kind| VerifyError::at(handler, kind))?;
            self.merge_into(handler, &handler_frame)?;
        }
        Ok(())
    }

    /// Interpret straight-line code from a position until control leaves it
    fn interpret_from(&mut self, start: usize, mut frame: Frame) -> Result<(), VerifyError> {
        let graph = self.graph;
        let mut index = graph
            .index_of(start)
            .ok_or_else(|| VerifyError::from(VerifyErrorKind::InvalidTarget(start as i64)))?;

        loop {
            let instruction = graph
                .get(index)
                .ok_or_else(|| VerifyError::at(start, VerifyErrorKind::FallsOffEnd))?;
            let position = instruction.position;

            // Code reachable from elsewhere is interpreted from its own type state, which falling
            // through merges into like any other incoming edge
            let merges = self.merge_points.contains(position)
                || self.type_states.contains_key(&position);
            if position != start && merges {
                return self.merge_into(position, &frame);
            }

            self.visited.insert(index);
            log::trace!(
                "{}: {} {:?}",
                position,
                opcodes::mnemonic(instruction.opcode),
                frame
            );
            self.merge_handlers(position, &frame)?;

            let at = |kind: VerifyErrorKind| VerifyError::at(position, kind);
            match &instruction.kind {
                InstructionKind::Plain(op) => {
                    if let Op::Store(LocalType::Reference, _) = op {
                        if let Some(VerificationType::ReturnAddress(_)) = frame.stack.last() {
                            self.return_position_stores.insert(position);
                        }
                    }

                    let context = ExecutionContext {
                        position,
                        max_stack: self.max_stack,
                        this_class: &self.method.class_name,
                        return_type: &self.method.descriptor.return_type,
                        constants: self.method.constants,
                    };
                    frame
                        .execute(op, &context, &mut self.registry)
                        .map_err(at)?;

                    let flags = instruction.flags();
                    if flags.contains(OpcodeFlags::STORE) {
                        self.merge_handlers(position, &frame)?;
                    }
                    if flags.contains(OpcodeFlags::STOP) {
                        return Ok(());
                    }
                }
                InstructionKind::Branch { kind, target } => {
                    frame.execute_branch(*kind).map_err(at)?;
                    self.merge_into(*target, &frame)?;
                    if *kind == BranchKind::Goto {
                        return Ok(());
                    }
                }
                InstructionKind::Select { default, cases } => {
                    frame.execute_select().map_err(at)?;
                    self.merge_into(*default, &frame)?;
                    for target in cases.targets() {
                        self.merge_into(target, &frame)?;
                    }
                    return Ok(());
                }
                InstructionKind::Jsr { target } => {
                    return self.interpret_jsr(instruction, *target, frame);
                }
                InstructionKind::Ret { local } => {
                    self.ret_frames.insert(position, frame.clone());
                    return self.interpret_ret(instruction, *local, &frame);
                }
            }

            index += 1;
            if index >= graph.len() {
                return Err(VerifyError::at(position, VerifyErrorKind::FallsOffEnd));
            }
        }
    }

    fn interpret_jsr(
        &mut self,
        instruction: &Instruction,
        target: usize,
        frame: Frame,
    ) -> Result<(), VerifyError> {
        let position = instruction.position;
        let at = |kind: VerifyErrorKind| VerifyError::at(position, kind);
        let id = SubroutineId(target);

        let call_site_changed = match self.jsr_frames.get_mut(&position) {
            Some(existing) => {
                let before = existing.clone();
                for (current, other) in existing.locals.iter_mut().zip(frame.locals.iter()) {
                    *current = current.join(other);
                }
                existing.normalize_locals();
                existing.subroutines.merge(&frame.subroutines);
                *existing != before
            }
            None => {
                self.jsr_frames.insert(position, frame.clone());
                false
            }
        };
        self.jsr_sites.insert(position, id);

        let new_call_site = self
            .registry
            .get_or_insert(target)
            .add_ret_target(instruction.next_position());

        let mut entry = frame;
        entry
            .push(VerificationType::ReturnAddress(id), self.max_stack)
            .map_err(at)?;
        entry.subroutines.push(id).map_err(at)?;
        entry.kill_uninitialized(&mut self.registry);

        self.merge_into(target, &entry)?;
        if new_call_site || call_site_changed {
            // The merge might not have changed anything, but the subroutine still needs to
            // return to this call site with its current locals
            log::trace!("call site {} for subroutine {} is new or changed", position, target);
            if new_call_site {
                self.enqueue(target);
            }
            let rets = self
                .registry
                .get(id)
                .map(|subroutine| subroutine.ret_instructions().to_vec())
                .unwrap_or_default();
            for ret in rets {
                self.enqueue(ret);
            }
        }
        Ok(())
    }

    fn interpret_ret(
        &mut self,
        instruction: &Instruction,
        local: u16,
        frame: &Frame,
    ) -> Result<(), VerifyError> {
        let position = instruction.position;
        let at = |kind: VerifyErrorKind| VerifyError::at(position, kind);

        let id = match frame.locals.get(local as usize) {
            Some(VerificationType::ReturnAddress(id)) => *id,
            Some(_) => return Err(at(VerifyErrorKind::NotReturnAddress(local))),
            None => return Err(at(VerifyErrorKind::InvalidLocal(local))),
        };

        let mut remaining = frame.subroutines.clone();
        let popped = remaining.pop_through(id).map_err(at)?;
        match self.frames_popped.entry(position) {
            Entry::Occupied(occupied) if *occupied.get() != popped => {
                return Err(at(VerifyErrorKind::InconsistentRetNesting));
            }
            Entry::Occupied(_) => (),
            Entry::Vacant(vacant) => {
                vacant.insert(popped);
            }
        }

        let subroutine = self
            .registry
            .get_mut(id)
            .ok_or_else(|| at(VerifyErrorKind::IllegalReturn))?;
        subroutine.add_ret_instruction(position);
        let accessed: Vec<bool> = (0..frame.locals.len())
            .map(|idx| subroutine.is_accessed(idx))
            .collect();

        let call_sites: Vec<usize> = self
            .jsr_sites
            .iter()
            .filter(|(_, called)| **called == id)
            .map(|(jsr, _)| *jsr)
            .collect();
        for jsr in call_sites {
            match self.jsr_rets.entry(jsr) {
                Entry::Occupied(occupied) if *occupied.get() != position => {
                    return Err(at(VerifyErrorKind::MultipleReturns));
                }
                Entry::Occupied(_) => (),
                Entry::Vacant(vacant) => {
                    vacant.insert(position);
                }
            }

            let continuation = self
                .graph
                .at(jsr)
                .map(Instruction::next_position)
                .ok_or_else(|| VerifyError::at(jsr, VerifyErrorKind::MissingContinuation))?;
            if self.graph.index_of(continuation).is_none() {
                return Err(VerifyError::at(jsr, VerifyErrorKind::FallsOffEnd));
            }

            let jsr_frame = self
                .jsr_frames
                .get(&jsr)
                .ok_or_else(|| VerifyError::at(jsr, VerifyErrorKind::MissingContinuation))?;

            // Locals not touched by the subroutine keep their type from the call site
            let locals = (0..frame.locals.len())
                .map(|idx| {
                    if idx == local as usize || !accessed[idx] {
                        jsr_frame.locals[idx].clone()
                    } else {
                        frame.locals[idx].clone()
                    }
                })
                .collect();
            let mut returned = Frame {
                locals,
                stack: frame.stack.clone(),
                subroutines: jsr_frame.subroutines.clone(),
            };
            returned.normalize_locals();
            returned.kill_uninitialized(&mut self.registry);

            log::trace!(
                "ret at {} returns from subroutine {} to {}",
                position,
                id.0,
                continuation
            );
            self.merge_into(continuation, &returned)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::class_file::{Code, ConstantPool, ExceptionHandler};
    use crate::jvm::code::opcodes::*;
    use crate::jvm::class_file::ConstantIndex;
    use crate::jvm::{FieldType, MethodDescriptor, Name, UnqualifiedName};

    fn code(max_stack: u16, max_locals: u16, bytes: Vec<u8>) -> Code {
        Code {
            max_stack,
            max_locals,
            code: bytes,
            exception_table: vec![],
            attributes: vec![],
        }
    }

    fn verify(code: &Code, parameters: Vec<FieldType<BinaryName>>) -> Result<VerifiedMethod, VerifyError> {
        let constants = ConstantPool::new();
        let method = VerifiableMethod {
            class_name: BinaryName::from_string(String::from("Test")).unwrap(),
            name: UnqualifiedName::from_string(String::from("f")).unwrap(),
            descriptor: MethodDescriptor {
                parameters,
                return_type: None,
            },
            is_static: true,
            code,
            constants: &constants,
        };
        TypeInferencingVerifier::verify(&method)
    }

    #[test]
    fn straight_line_code() {
        let code = code(2, 1, vec![ICONST_1, ISTORE_0, ILOAD_0, POP, RETURN]);
        let verified = verify(&code, vec![]).unwrap();
        assert!(!verified.has_subroutines());
        assert!(!verified.has_unvisited_code());
        assert_eq!(verified.type_states().count(), 1);
    }

    #[test]
    fn loops_converge() {
        // 0: iconst_0, 1: istore_0, 2: iinc 0 1, 5: iload_0, 6: ifne -4, 9: return
        let code = code(1, 1, vec![ICONST_0, ISTORE_0, IINC, 0, 1, ILOAD_0, IFNE, 0xff, 0xfc, RETURN]);
        let verified = verify(&code, vec![]).unwrap();
        let state = verified.type_state_at(2).unwrap();
        assert_eq!(state.frame.locals, vec![VerificationType::Integer]);
        assert!(state.visited);
    }

    #[test]
    fn falls_off_end() {
        let code = code(1, 0, vec![ICONST_0, POP]);
        assert_eq!(
            verify(&code, vec![]).unwrap_err(),
            VerifyError::at(1, VerifyErrorKind::FallsOffEnd)
        );
    }

    #[test]
    fn dead_code() {
        let code = code(1, 0, vec![RETURN, NOP, RETURN]);
        let verified = verify(&code, vec![]).unwrap();
        assert!(verified.has_unvisited_code());
        assert!(verified.is_visited(0));
        assert!(!verified.is_visited(1));
        assert_eq!(verified.subroutines_at(1), None);
    }

    #[test]
    fn simple_subroutine() {
        // 0: jsr +4, 3: return, 4: astore_0, 5: ret 0
        let code = code(1, 1, vec![JSR, 0, 4, RETURN, ASTORE_0, RET, 0]);
        let verified = verify(&code, vec![]).unwrap();
        assert!(verified.has_subroutines());
        assert_eq!(verified.ret_for_jsr(0), Some(5));
        assert_eq!(verified.frames_popped(5), Some(1));
        assert!(verified.is_return_position_store(4));
        assert_eq!(
            verified.subroutines_at(2).map(|frame| frame.depth()),
            Some(1)
        );
        assert!(verified.subroutines_at(1).unwrap().is_top());
    }

    #[test]
    fn untouched_locals_survive_ret() {
        // Local 1 is an int at one call site and a float at the other. The subroutine never
        // touches it, so each continuation sees its own type.
        //
        //  0: iconst_0, 1: istore_1, 2: jsr +13, 5: iload_1, 6: pop
        //  7: fconst_0, 8: fstore_1, 9: jsr +6, 12: fload_1, 13: pop, 14: return
        //  15: astore_0, 16: ret 0
        let code = code(
            1,
            2,
            vec![
                ICONST_0, ISTORE_1, JSR, 0, 13, ILOAD_1, POP, FCONST_0, FSTORE_1, JSR, 0, 6,
                FLOAD_1, POP, RETURN, ASTORE_0, RET, 0,
            ],
        );
        let verified = verify(&code, vec![]).unwrap();
        assert_eq!(
            verified.type_state_at(5).unwrap().frame.locals[1],
            VerificationType::Integer
        );
        assert_eq!(
            verified.type_state_at(12).unwrap().frame.locals[1],
            VerificationType::Float
        );
        assert_eq!(
            verified.type_state_at(15).unwrap().frame.locals[1],
            VerificationType::Top
        );
    }

    #[test]
    fn ret_outside_subroutine() {
        // 0: aconst_null, 1: astore_0, 2: ret 0
        let code = code(1, 1, vec![ACONST_NULL, ASTORE_0, RET, 0]);
        assert_eq!(
            verify(&code, vec![]).unwrap_err(),
            VerifyError::at(2, VerifyErrorKind::NotReturnAddress(0))
        );
    }

    #[test]
    fn recursive_subroutine() {
        // 0: jsr +4, 3: return, 4: astore_0, 5: jsr -1
        let code = code(2, 1, vec![JSR, 0, 4, RETURN, ASTORE_0, JSR, 0xff, 0xff]);
        assert_eq!(
            verify(&code, vec![]).unwrap_err(),
            VerifyError::at(5, VerifyErrorKind::RecursiveSubroutine)
        );
    }

    #[test]
    fn handlers_get_catch_type() {
        // 0: iconst_0, 1: istore_0, 2: return, 3: astore_0, 4: return
        let mut code = code(1, 1, vec![ICONST_0, ISTORE_0, RETURN, ASTORE_0, RETURN]);
        code.exception_table.push(ExceptionHandler {
            start_pc: 0,
            end_pc: 3,
            handler_pc: 3,
            catch_type: ConstantIndex(0),
        });
        let verified = verify(&code, vec![]).unwrap();
        let handler = verified.type_state_at(3).unwrap();
        assert_eq!(
            handler.frame.stack,
            OffsetVec::from([VerificationType::object(BinaryName::THROWABLE)])
        );
        assert_eq!(handler.frame.locals, vec![VerificationType::Top]);

        // Handler range ending in the middle of an instruction
        code.exception_table[0].end_pc = 4;
        code.code = vec![ICONST_0, ISTORE_0, SIPUSH, 0, 0, RETURN];
        code.exception_table[0].handler_pc = 5;
        assert_eq!(
            verify(&code, vec![]).unwrap_err().kind,
            VerifyErrorKind::InvalidTarget(4)
        );
    }
}
