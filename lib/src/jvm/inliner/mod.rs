//! Rewrite methods so they no longer use subroutines
//!
//! Once a method has been verified by type inference, every instruction is known to run under
//! exactly one [`SubroutineFrame`](crate::jvm::verifier::SubroutineFrame). The inliner makes one
//! copy of each subroutine body per call (see [`SubroutineCall`]) right after the `jsr` making
//! the call, then lays out and emits the copies:
//!
//!   - a `jsr` followed by its copy of the subroutine body disappears (the `astore` of the return
//!     address at the start of the body disappears too)
//!   - a `ret` which would fall into the code after its `jsr` disappears, otherwise it becomes a
//!     `goto` to that code
//!   - branches and switches are pointed at the copy of their target reachable from their own
//!     call, and switch padding is recomputed for the new position
//!
//! The exception table, line number table, and local variable tables are rebuilt from the copies.
//! The `StackMapTable` attribute, if there is one, is dropped.

mod call;
mod handle;

pub use call::*;
pub use handle::*;

use crate::jvm::class_file::{
    Attribute, AttributeLike, Code, ConstantPool, ExceptionHandler, LineNumber, LineNumberTable,
    LocalVariable, LocalVariableTable, LocalVariableTypeTable, STACK_MAP_TABLE,
};
use crate::jvm::code::{opcodes, short_offset, wide_offset, Instruction, InstructionKind};
use crate::jvm::verifier::{SubroutineId, VerifiedMethod};
use crate::jvm::{Error, VerifyError, VerifyErrorKind};
use std::collections::HashMap;
use typed_arena::Arena;

/// Largest code array a method can have
const MAX_CODE_LENGTH: usize = u16::MAX as usize;

/// Rewrite the code of a verified method to have no `jsr` or `ret` instructions
///
/// Code that the verifier never reached is dropped. For a method without subroutines and without
/// unreachable code, the rewritten code is the same as the original.
pub fn inline_subroutines(
    verified: &VerifiedMethod,
    code: &Code,
    constants: &ConstantPool,
) -> Result<Code, Error> {
    let arena = Arena::new();
    let mut inliner = Inliner::new(verified, code);

    let root: &SubroutineCall = arena.alloc(SubroutineCall::root());
    inliner.duplicate(&arena, root)?;
    inliner.resolve_rets()?;
    inliner.layout()?;
    let bytes = inliner.emit()?;

    let exception_table = inliner.exception_table();
    let attributes = inliner.attributes(constants)?;

    Ok(Code {
        max_stack: code.max_stack,
        max_locals: code.max_locals,
        code: bytes,
        exception_table,
        attributes,
    })
}

struct Inliner<'v, 'a> {
    verified: &'v VerifiedMethod,
    code: &'v Code,

    /// Every copy, in the order they are laid out
    handles: Vec<InstructionHandle<'a>>,

    /// Handles for each original position (by handle index)
    duplicates: HashMap<usize, Vec<usize>>,

    /// Target handle of each `ret` copy (keyed by handle index)
    ret_targets: HashMap<usize, usize>,

    code_len: usize,
}

impl<'v, 'a> Inliner<'v, 'a> {
    fn new(verified: &'v VerifiedMethod, code: &'v Code) -> Inliner<'v, 'a> {
        Inliner {
            verified,
            code,
            handles: vec![],
            duplicates: HashMap::new(),
            ret_targets: HashMap::new(),
            code_len: 0,
        }
    }

    fn instruction(
        &self,
        handle: &InstructionHandle<'a>,
    ) -> Result<&'v Instruction, VerifyError> {
        self.verified.graph().get(handle.index).ok_or_else(|| {
            VerifyError::from(VerifyErrorKind::MissingDuplicate(handle.position))
        })
    }

    /// Copy every instruction running in a call, recursing into subroutine calls at each `jsr`
    fn duplicate(
        &mut self,
        arena: &'a Arena<SubroutineCall<'a>>,
        call: &'a SubroutineCall<'a>,
    ) -> Result<(), VerifyError> {
        let verified = self.verified;
        for (index, instruction) in verified.graph().iter().enumerate() {
            match verified.subroutines_at(index) {
                Some(frame) if call.matches(frame) => (),
                _ => continue,
            }

            let position = instruction.position;
            let handle_index = self.handles.len();
            self.handles
                .push(InstructionHandle::new(index, position, call));
            self.duplicates
                .entry(position)
                .or_insert_with(Vec::new)
                .push(handle_index);

            match instruction.kind {
                InstructionKind::Jsr { target } => {
                    let callee: &'a SubroutineCall<'a> =
                        arena.alloc(call.child(SubroutineId(target), position));
                    let body_start = self.handles.len();
                    self.duplicate(arena, callee)?;

                    let returns = verified.ret_for_jsr(position).is_some();
                    let falls_into_body = matches!(
                        self.handles.get(body_start),
                        Some(first) if first.position == target
                    );
                    let handle = &mut self.handles[handle_index];
                    handle.callee = Some(callee);
                    handle.disposition = if returns && falls_into_body {
                        Disposition::Skip
                    } else {
                        Disposition::JsrGoto
                    };
                }
                InstructionKind::Plain(_) if verified.is_return_position_store(position) => {
                    self.handles[handle_index].disposition = Disposition::Skip;
                }
                _ => (),
            }
        }
        Ok(())
    }

    /// Find the copy of the code after the `jsr` each `ret` copy returns to
    fn resolve_rets(&mut self) -> Result<(), VerifyError> {
        for handle_index in 0..self.handles.len() {
            let handle = &self.handles[handle_index];
            if !matches!(self.instruction(handle)?.kind, InstructionKind::Ret { .. }) {
                continue;
            }
            let position = handle.position;
            let missing = || VerifyError::at(position, VerifyErrorKind::MissingContinuation);

            // The `ret` returns from `popped` nested calls, so control resumes in the call
            // containing the `jsr` of the outermost one
            let popped = self.verified.frames_popped(position).ok_or_else(missing)?;
            let returning = handle
                .call
                .ancestor(popped.saturating_sub(1))
                .ok_or_else(missing)?;
            let (jsr, resumed) = match (returning.caller(), returning.parent()) {
                (Some(jsr), Some(resumed)) => (jsr, resumed),
                _ => return Err(missing()),
            };
            let continuation = self
                .verified
                .graph()
                .at(jsr)
                .map(|jsr| jsr.next_position())
                .ok_or_else(missing)?;

            let target = self.resolve(continuation, resumed)?;
            self.handles[handle_index].disposition = if target == handle_index + 1 {
                Disposition::Skip
            } else {
                Disposition::RetGoto
            };
            self.ret_targets.insert(handle_index, target);
        }
        Ok(())
    }

    /// Handle for the copy of the instruction at an original position which is reachable from
    /// a call
    fn resolve(&self, position: usize, from: &'a SubroutineCall<'a>) -> Result<usize, VerifyError> {
        self.duplicates
            .get(&position)
            .and_then(|copies| {
                copies
                    .iter()
                    .copied()
                    .find(|copy| from.can_goto(self.handles[*copy].call))
            })
            .ok_or_else(|| VerifyError::from(VerifyErrorKind::MissingDuplicate(position)))
    }

    fn layout(&mut self) -> Result<(), VerifyError> {
        let mut position = 0;
        for handle_index in 0..self.handles.len() {
            let instruction = self.instruction(&self.handles[handle_index])?;
            let handle = &mut self.handles[handle_index];
            handle.new_position = position;
            position += handle.size_at(instruction, position);
        }
        if position > MAX_CODE_LENGTH {
            return Err(VerifyError::from(VerifyErrorKind::CodeTooLarge(position)));
        }
        self.code_len = position;

        if log::log_enabled!(log::Level::Debug) {
            for handle in &self.handles {
                log::debug!(
                    "{:>5}: {:<14} was {:<5} in {:?} // {:?}",
                    handle.new_position,
                    self.instruction(handle)
                        .map(|instruction| opcodes::mnemonic(instruction.opcode))
                        .unwrap_or("?"),
                    handle.position,
                    handle.call,
                    handle.disposition
                );
            }
        }
        Ok(())
    }

    fn emit(&self) -> Result<Vec<u8>, VerifyError> {
        let mut bytes = Vec::with_capacity(self.code_len);
        for (handle_index, handle) in self.handles.iter().enumerate() {
            let instruction = self.instruction(handle)?;
            let position = handle.new_position;
            let inconsistent =
                || VerifyError::at(handle.position, VerifyErrorKind::MissingContinuation);
            debug_assert_eq!(position, bytes.len());

            match handle.disposition {
                Disposition::Skip => (),
                Disposition::Keep => match instruction.kind {
                    InstructionKind::Plain(_) => {
                        let start = instruction.position;
                        bytes.extend_from_slice(&self.code.code[start..start + instruction.size]);
                    }
                    InstructionKind::Branch { .. } | InstructionKind::Select { .. } => {
                        let relocate = |target| {
                            self.resolve(target, handle.call)
                                .map(|copy| self.handles[copy].new_position)
                                .map_err(|err| VerifyError::at(handle.position, err.kind))
                        };
                        instruction.encode_relocated(position, relocate, &mut bytes)?;
                    }
                    InstructionKind::Jsr { .. } | InstructionKind::Ret { .. } => {
                        return Err(inconsistent())
                    }
                },
                Disposition::JsrGoto => {
                    let (target, callee) = match (&instruction.kind, handle.callee) {
                        (InstructionKind::Jsr { target }, Some(callee)) => (*target, callee),
                        _ => return Err(inconsistent()),
                    };
                    let new_target = self.handles[self.resolve(target, callee)?].new_position;
                    if instruction.opcode == opcodes::JSR_W {
                        bytes.push(opcodes::GOTO_W);
                        bytes.extend_from_slice(&wide_offset(position, new_target)?.to_be_bytes());
                    } else {
                        bytes.push(opcodes::GOTO);
                        bytes.extend_from_slice(&short_offset(position, new_target)?.to_be_bytes());
                    }
                }
                Disposition::RetGoto => {
                    let target = *self
                        .ret_targets
                        .get(&handle_index)
                        .ok_or_else(inconsistent)?;
                    let new_target = self.handles[target].new_position;
                    bytes.push(opcodes::GOTO);
                    bytes.extend_from_slice(&short_offset(position, new_target)?.to_be_bytes());
                }
            }
        }
        Ok(bytes)
    }

    /// Expand each exception handler into one entry per copy of the handler, covering the copies
    /// of the protected code which can reach that copy of the handler
    ///
    /// The entries of each original handler stay where the original handler was, so the order in
    /// which handlers are tried does not change.
    fn exception_table(&self) -> Vec<ExceptionHandler> {
        let mut table = vec![];
        for entry in &self.code.exception_table {
            let protected = entry.start_pc as usize..entry.end_pc as usize;
            let copies = match self.duplicates.get(&(entry.handler_pc as usize)) {
                Some(copies) => copies,
                None => continue,
            };
            for copy in copies {
                let handler = &self.handles[*copy];
                let ranges = self.split_ranges(|handle| {
                    protected.contains(&handle.position) && handle.call.can_goto(handler.call)
                });
                for (start, end) in ranges {
                    table.push(ExceptionHandler {
                        start_pc: start as u16,
                        end_pc: end as u16,
                        handler_pc: handler.new_position as u16,
                        catch_type: entry.catch_type,
                    });
                }
            }
        }
        table
    }

    /// Maximal `[start, end)` ranges in the rewritten code covered only by emitted handles
    /// satisfying a predicate
    fn split_ranges(
        &self,
        covered: impl Fn(&InstructionHandle<'a>) -> bool,
    ) -> Vec<(usize, usize)> {
        let mut ranges = vec![];
        let mut start: Option<usize> = None;
        for handle in self.handles.iter().filter(|handle| handle.is_emitted()) {
            match (start, covered(handle)) {
                (None, true) => start = Some(handle.new_position),
                (Some(range_start), false) => {
                    ranges.push((range_start, handle.new_position));
                    start = None;
                }
                _ => (),
            }
        }
        if let Some(range_start) = start {
            ranges.push((range_start, self.code_len));
        }
        ranges.retain(|(start, end)| start < end);
        ranges
    }

    fn line_numbers(&self, table: &LineNumberTable) -> LineNumberTable {
        let mut original = table.0.clone();
        original.sort_by_key(|entry| entry.start_pc);
        let line_at = |position: usize| -> Option<u16> {
            let following = original.partition_point(|entry| entry.start_pc as usize <= position);
            following
                .checked_sub(1)
                .map(|preceding| original[preceding].line_number)
        };

        let mut entries = vec![];
        let mut current = None;
        for handle in self.handles.iter().filter(|handle| handle.is_emitted()) {
            let line = line_at(handle.position);
            if line != current {
                if let Some(line_number) = line {
                    entries.push(LineNumber {
                        start_pc: handle.new_position as u16,
                        line_number,
                    });
                }
                current = line;
            }
        }
        LineNumberTable(entries)
    }

    fn local_variables(&self, table: &[LocalVariable]) -> Vec<LocalVariable> {
        let mut entries = vec![];
        for variable in table {
            let start = variable.start_pc as usize;
            let live = start..start + variable.length as usize;
            for (start, end) in self.split_ranges(|handle| live.contains(&handle.position)) {
                entries.push(LocalVariable {
                    start_pc: start as u16,
                    length: (end - start) as u16,
                    ..*variable
                });
            }
        }
        entries
    }

    /// Attributes of the rewritten code
    ///
    /// Tables of code positions are rewritten under their original names, and the stack map table
    /// is dropped. Everything else is kept unchanged.
    fn attributes(&self, constants: &ConstantPool) -> Result<Vec<Attribute>, Error> {
        let mut attributes = vec![];
        for attribute in &self.code.attributes {
            let rewritten = if attribute.is::<LineNumberTable>(constants) {
                let table = self.line_numbers(&attribute.decode()?);
                reencode(attribute, &table)?
            } else if attribute.is::<LocalVariableTable>(constants) {
                let LocalVariableTable(table) = attribute.decode()?;
                reencode(attribute, &LocalVariableTable(self.local_variables(&table)))?
            } else if attribute.is::<LocalVariableTypeTable>(constants) {
                let LocalVariableTypeTable(table) = attribute.decode()?;
                reencode(attribute, &LocalVariableTypeTable(self.local_variables(&table)))?
            } else if matches!(attribute.name(constants), Ok(name) if name == STACK_MAP_TABLE) {
                continue;
            } else {
                attribute.clone()
            };
            attributes.push(rewritten);
        }
        Ok(attributes)
    }
}

/// Replace the contents of an attribute, keeping its name
fn reencode<A: AttributeLike>(original: &Attribute, attribute: &A) -> Result<Attribute, Error> {
    let mut info = vec![];
    attribute.serialize(&mut info)?;
    Ok(Attribute {
        name_index: original.name_index,
        info,
    })
}
