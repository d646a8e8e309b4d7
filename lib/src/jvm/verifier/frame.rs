use super::{ConstantResolver, SubroutineFrame, SubroutineRegistry, VerificationType};
use crate::jvm::code::{ArrayElem, BranchKind, InvokeKind, LocalType, NumericType, Op};
use crate::jvm::{
    BaseType, BinaryName, FieldType, MethodDescriptor, Name, RefType, RenderDescriptor,
    UnqualifiedName, VerifyErrorKind,
};
use crate::util::{OffsetVec, Width};

type VType = VerificationType;

/// Snapshot of the stack, local variables, and active subroutines at a point in the bytecode
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Frame {
    /// Local variables
    ///
    /// This always has `max_locals` slots. Category 2 values take up two slots: the value itself
    /// followed by `Top`.
    pub locals: Vec<VType>,

    /// Types of values on the stack
    pub stack: OffsetVec<VType>,

    /// Subroutines being executed
    pub subroutines: SubroutineFrame,
}

/// Method-level information needed to interpret an instruction
pub struct ExecutionContext<'a> {
    /// Position of the instruction being interpreted
    pub position: usize,

    pub max_stack: usize,
    pub this_class: &'a BinaryName,
    pub return_type: &'a Option<FieldType<BinaryName>>,
    pub constants: &'a dyn ConstantResolver,
}

impl Frame {
    /// Frame on entry to a method
    ///
    /// The receiver (if the method is not static) and the parameters are in the first locals.
    /// The receiver of a constructor is `UninitializedThis` until the super constructor is called.
    pub fn entry(
        this_class: &BinaryName,
        is_static: bool,
        is_init: bool,
        descriptor: &MethodDescriptor<BinaryName>,
        max_locals: usize,
    ) -> Result<Frame, VerifyErrorKind> {
        let mut locals = vec![VType::Top; max_locals];
        let mut next = 0;
        let mut set_next = |typ: VType| -> Result<(), VerifyErrorKind> {
            let width = typ.width();
            if next + width > max_locals {
                return Err(VerifyErrorKind::InvalidLocal(next as u16));
            }
            locals[next] = typ;
            next += width;
            Ok(())
        };

        if !is_static {
            if is_init && *this_class != BinaryName::OBJECT {
                set_next(VType::UninitializedThis)?;
            } else {
                set_next(VType::object(this_class.clone()))?;
            }
        }
        for parameter in &descriptor.parameters {
            set_next(VType::from(parameter.clone()))?;
        }

        Ok(Frame {
            locals,
            stack: OffsetVec::new(),
            subroutines: SubroutineFrame::top(),
        })
    }

    /// Update the frame to reflect the effects of a straight-line instruction
    pub fn execute(
        &mut self,
        op: &Op,
        context: &ExecutionContext,
        registry: &mut SubroutineRegistry,
    ) -> Result<(), VerifyErrorKind> {
        execute_op(self, op, context, registry)?;
        check_stack_size(&self.stack, context.max_stack)
    }

    /// Update the frame to reflect what a conditional branch or `goto` pops
    pub fn execute_branch(&mut self, kind: BranchKind) -> Result<(), VerifyErrorKind> {
        let stack = &mut self.stack;
        match kind {
            BranchKind::IfInt => pop_offset_vec_expecting_type(stack, VType::Integer)?,
            BranchKind::IfIntCompare => {
                pop_offset_vec_expecting_type(stack, VType::Integer)?;
                pop_offset_vec_expecting_type(stack, VType::Integer)?;
            }
            BranchKind::IfRefCompare => {
                pop_reference(stack)?;
                pop_reference(stack)?;
            }
            BranchKind::IfNull => {
                pop_reference(stack)?;
            }
            BranchKind::Goto => (),
        }
        Ok(())
    }

    /// Update the frame to reflect what `tableswitch` or `lookupswitch` pops
    pub fn execute_select(&mut self) -> Result<(), VerifyErrorKind> {
        pop_offset_vec_expecting_type(&mut self.stack, VType::Integer)
    }

    /// Push a value onto the stack, checking it still fits
    pub fn push(&mut self, typ: VType, max_stack: usize) -> Result<(), VerifyErrorKind> {
        self.stack.push(typ);
        check_stack_size(&self.stack, max_stack)
    }

    /// Read a local (and mark it as accessed by the active subroutines)
    pub fn load(
        &self,
        index: u16,
        registry: &mut SubroutineRegistry,
    ) -> Result<VType, VerifyErrorKind> {
        let typ = get_local(&self.locals, index)?;
        registry.access(&self.subroutines, index as usize, typ.width());
        Ok(typ)
    }

    /// Turn every uninitialized object in the locals into `Top`
    ///
    /// Uninitialized objects must not flow into or out of a subroutine.
    pub fn kill_uninitialized(&mut self, registry: &mut SubroutineRegistry) {
        for index in 0..self.locals.len() {
            if self.locals[index].is_uninitialized() {
                self.locals[index] = VType::Top;
                registry.access(&self.subroutines, index, 1);
            }
        }
    }

    /// Invalidate category 2 locals whose second slot is not `Top`
    pub fn normalize_locals(&mut self) {
        for index in 0..self.locals.len() {
            if self.locals[index].width() == 2 && self.locals.get(index + 1) != Some(&VType::Top)
            {
                self.locals[index] = VType::Top;
            }
        }
    }
}

fn execute_op(
    frame: &mut Frame,
    op: &Op,
    context: &ExecutionContext,
    registry: &mut SubroutineRegistry,
) -> Result<(), VerifyErrorKind> {
    use VerificationType::*;

    let Frame {
        ref mut stack,
        ref mut locals,
        ref subroutines,
    } = frame;

    match op {
        Op::Nop => (),
        Op::AConstNull => {
            stack.push(Null);
        }
        Op::Const(typ) => {
            stack.push(numeric(*typ));
        }
        Op::Ldc(index) => {
            let typ = context.constants.loadable(*index)?;
            if typ.width() != 1 {
                return Err(VerifyErrorKind::BadConstant(format!(
                    "ldc of category 2 constant {}",
                    index
                )));
            }
            stack.push(typ);
        }
        Op::Ldc2(index) => {
            let typ = context.constants.loadable(*index)?;
            if typ.width() != 2 {
                return Err(VerifyErrorKind::BadConstant(format!(
                    "ldc2_w of category 1 constant {}",
                    index
                )));
            }
            stack.push(typ);
        }

        Op::Load(LocalType::Reference, index) => {
            let typ = get_local(locals, *index)?;
            if !typ.is_reference() {
                return Err(incompatible("reference", &typ));
            }
            registry.access(subroutines, *index as usize, 1);
            stack.push(typ);
        }
        Op::Load(local_type, index) => {
            let expected = local(*local_type);
            get_local_expecting_type(locals, *index, &expected)?;
            registry.access(subroutines, *index as usize, expected.width());
            stack.push(expected);
        }

        // `astore` is the only way to put a return address in a local
        Op::Store(LocalType::Reference, index) => {
            let typ = pop_offset_vec(stack)?;
            if let ReturnAddress(new_subroutine) = typ {
                if let Some(ReturnAddress(old_subroutine)) = locals.get(*index as usize) {
                    if *old_subroutine != new_subroutine {
                        return Err(VerifyErrorKind::SubroutineMerge);
                    }
                }
            } else if !typ.is_reference() {
                return Err(incompatible("reference or returnAddress", &typ));
            }
            update_local_type(locals, *index, typ)?;
            registry.access(subroutines, *index as usize, 1);
        }
        Op::Store(local_type, index) => {
            let expected = local(*local_type);
            let width = expected.width();
            pop_offset_vec_expecting_type(stack, expected.clone())?;
            update_local_type(locals, *index, expected)?;
            registry.access(subroutines, *index as usize, width);
        }

        Op::ArrayLoad(elem) => {
            pop_offset_vec_expecting_type(stack, Integer)?;
            let array_type = pop_offset_vec(stack)?;
            let loaded = check_array(&array_type, *elem)?;
            stack.push(loaded);
        }
        Op::ArrayStore(elem) => {
            let value = pop_offset_vec(stack)?;
            pop_offset_vec_expecting_type(stack, Integer)?;
            let array_type = pop_offset_vec(stack)?;
            let element_type = check_array(&array_type, *elem)?;
            let compatible = match &element_type {
                Null | Object(_) => value.is_initialized_reference(),
                expected => *expected == value,
            };
            if !compatible {
                return Err(incompatible(&element_type.to_string(), &value));
            }
        }

        Op::Pop => {
            let _ = pop_offset_vec_expecting_width(stack, 1)?;
        }

        Op::Pop2 => {
            let arg1 = pop_offset_vec(stack)?;
            match arg1.width() {
                // Form 1
                1 => {
                    let _ = pop_offset_vec_expecting_width(stack, 1)?;
                }

                // Form 2
                _ => (),
            }
        }

        Op::Dup => {
            let arg1 = pop_offset_vec_expecting_width(stack, 1)?;
            stack.push(arg1.clone());
            stack.push(arg1);
        }

        Op::DupX1 => {
            let arg1 = pop_offset_vec_expecting_width(stack, 1)?;
            let arg2 = pop_offset_vec_expecting_width(stack, 1)?;
            stack.push(arg1.clone());
            stack.push(arg2);
            stack.push(arg1);
        }

        Op::DupX2 => {
            let arg1 = pop_offset_vec_expecting_width(stack, 1)?;
            let arg2 = pop_offset_vec(stack)?;
            match arg2.width() {
                // Form 1
                1 => {
                    let arg3 = pop_offset_vec_expecting_width(stack, 1)?;
                    stack.push(arg1.clone());
                    stack.push(arg3);
                    stack.push(arg2);
                    stack.push(arg1);
                }

                // Form 2
                _ => {
                    stack.push(arg1.clone());
                    stack.push(arg2);
                    stack.push(arg1);
                }
            }
        }

        Op::Dup2 => {
            let arg1 = pop_offset_vec(stack)?;
            match arg1.width() {
                // Form 1
                1 => {
                    let arg2 = pop_offset_vec_expecting_width(stack, 1)?;
                    stack.push(arg2.clone());
                    stack.push(arg1.clone());
                    stack.push(arg2);
                    stack.push(arg1);
                }

                // Form 2
                _ => {
                    stack.push(arg1.clone());
                    stack.push(arg1);
                }
            }
        }

        Op::Dup2X1 => {
            let arg1 = pop_offset_vec(stack)?;
            let arg2 = pop_offset_vec_expecting_width(stack, 1)?;
            match arg1.width() {
                // Form 1
                1 => {
                    let arg3 = pop_offset_vec_expecting_width(stack, 1)?;
                    stack.push(arg2.clone());
                    stack.push(arg1.clone());
                    stack.push(arg3);
                    stack.push(arg2);
                    stack.push(arg1);
                }

                // Form 2
                _ => {
                    stack.push(arg1.clone());
                    stack.push(arg2);
                    stack.push(arg1);
                }
            }
        }

        Op::Dup2X2 => {
            let arg1 = pop_offset_vec(stack)?;
            match arg1.width() {
                1 => {
                    let arg2 = pop_offset_vec_expecting_width(stack, 1)?;
                    let arg3 = pop_offset_vec(stack)?;
                    match arg3.width() {
                        // Form 1
                        1 => {
                            let arg4 = pop_offset_vec_expecting_width(stack, 1)?;
                            stack.push(arg2.clone());
                            stack.push(arg1.clone());
                            stack.push(arg4);
                            stack.push(arg3);
                            stack.push(arg2);
                            stack.push(arg1);
                        }

                        // Form 3
                        _ => {
                            stack.push(arg2.clone());
                            stack.push(arg1.clone());
                            stack.push(arg3);
                            stack.push(arg2);
                            stack.push(arg1);
                        }
                    }
                }

                _ => {
                    let arg2 = pop_offset_vec(stack)?;
                    match arg2.width() {
                        // Form 2
                        1 => {
                            let arg3 = pop_offset_vec_expecting_width(stack, 1)?;
                            stack.push(arg1.clone());
                            stack.push(arg3);
                            stack.push(arg2);
                            stack.push(arg1);
                        }

                        // Form 4
                        _ => {
                            stack.push(arg1.clone());
                            stack.push(arg2);
                            stack.push(arg1);
                        }
                    }
                }
            }
        }

        Op::Swap => {
            let arg1 = pop_offset_vec_expecting_width(stack, 1)?;
            let arg2 = pop_offset_vec_expecting_width(stack, 1)?;
            stack.push(arg1);
            stack.push(arg2);
        }

        Op::Arithmetic(typ) => {
            let typ = numeric(*typ);
            pop_offset_vec_expecting_type(stack, typ.clone())?;
            pop_offset_vec_expecting_type(stack, typ.clone())?;
            stack.push(typ);
        }
        Op::Neg(typ) => {
            let typ = numeric(*typ);
            pop_offset_vec_expecting_type(stack, typ.clone())?;
            stack.push(typ);
        }
        Op::Shift(typ) => {
            let typ = numeric(*typ);
            pop_offset_vec_expecting_type(stack, Integer)?;
            pop_offset_vec_expecting_type(stack, typ.clone())?;
            stack.push(typ);
        }
        Op::IInc(index, _) => {
            get_local_expecting_type(locals, *index, &Integer)?;
            registry.access(subroutines, *index as usize, 1);
        }
        Op::Convert(from, to) => {
            pop_offset_vec_expecting_type(stack, numeric(*from))?;
            stack.push(numeric(*to));
        }
        Op::Compare(typ) => {
            let typ = numeric(*typ);
            pop_offset_vec_expecting_type(stack, typ.clone())?;
            pop_offset_vec_expecting_type(stack, typ)?;
            stack.push(Integer);
        }

        Op::Return(None) => {
            if context.return_type.is_some() {
                return Err(VerifyErrorKind::BadReturn);
            }
        }
        Op::Return(Some(local_type)) => {
            let expected = match context.return_type {
                Some(return_type) => VType::from(return_type.clone()),
                None => return Err(VerifyErrorKind::BadReturn),
            };
            let found = pop_offset_vec(stack)?;
            let returns_reference = *local_type == LocalType::Reference;
            if returns_reference != expected.is_reference()
                || !VerificationType::is_assignable(&found, &expected)
            {
                return Err(VerifyErrorKind::BadReturn);
            }
        }
        Op::AThrow => {
            let exception = pop_offset_vec(stack)?;
            if !exception.is_initialized_reference() {
                return Err(incompatible("java/lang/Throwable", &exception));
            }
            stack.clear();
        }

        Op::GetStatic(index) => {
            let field_type = context.constants.field(*index)?;
            stack.push(field_type.into());
        }
        Op::PutStatic(index) => {
            let field_type = VType::from(context.constants.field(*index)?);
            let arg_type = pop_offset_vec(stack)?;
            check_assignable(&arg_type, &field_type)?;
        }
        Op::GetField(index) => {
            let field_type = context.constants.field(*index)?;
            let object_type = pop_offset_vec(stack)?;
            if !object_type.is_initialized_reference() {
                return Err(incompatible("object", &object_type));
            }
            stack.push(field_type.into());
        }
        Op::PutField(index) => {
            let field_type = VType::from(context.constants.field(*index)?);
            let arg_type = pop_offset_vec(stack)?;
            check_assignable(&arg_type, &field_type)?;

            // Constructors may set their own fields before calling the super constructor
            let object_type = pop_offset_vec(stack)?;
            if !object_type.is_initialized_reference() && object_type != UninitializedThis {
                return Err(incompatible("object", &object_type));
            }
        }

        Op::Invoke(invoke_kind, index) => {
            let method = context.constants.method(*index)?;
            pop_arguments(stack, &method.descriptor)?;

            if method.name == UnqualifiedName::INIT {
                if *invoke_kind != InvokeKind::Special || method.descriptor.return_type.is_some() {
                    return Err(VerifyErrorKind::BadConstant(format!(
                        "<init> must be called with invokespecial and return void (constant {})",
                        index
                    )));
                }

                // Initialize
                match pop_offset_vec(stack)? {
                    UninitializedThis => {
                        let initialized = VType::object(context.this_class.clone());
                        replace_all(stack, locals, &UninitializedThis, &initialized);
                    }
                    Uninitialized {
                        new_position,
                        class,
                    } => {
                        let initialized = VType::object(class.clone());
                        let uninitialized = Uninitialized {
                            new_position,
                            class,
                        };
                        replace_all(stack, locals, &uninitialized, &initialized);
                    }
                    other => return Err(incompatible("uninitialized object", &other)),
                }
            } else {
                // Pop off the receiver type
                if *invoke_kind != InvokeKind::Static {
                    let receiver = pop_offset_vec(stack)?;
                    if !receiver.is_initialized_reference() {
                        return Err(incompatible(&render_class(&method.class), &receiver));
                    }
                }

                // Push the return type
                if let Some(return_type) = method.descriptor.return_type {
                    stack.push(VType::from(return_type));
                }
            }
        }
        Op::InvokeDynamic(index) => {
            let descriptor = context.constants.invoke_dynamic(*index)?;
            pop_arguments(stack, &descriptor)?;
            if let Some(return_type) = descriptor.return_type {
                stack.push(VType::from(return_type));
            }
        }

        Op::New(index) => match context.constants.class(*index)? {
            RefType::Object(class) => {
                stack.push(Uninitialized {
                    new_position: context.position,
                    class,
                });
            }
            array => {
                return Err(VerifyErrorKind::BadConstant(format!(
                    "new of array class {}",
                    render_class(&array)
                )))
            }
        },
        Op::NewArray(base_type) => {
            pop_offset_vec_expecting_type(stack, Integer)?;
            stack.push(Object(RefType::array(FieldType::Base(*base_type))));
        }
        Op::ANewArray(index) => {
            let element_type = context.constants.class(*index)?;
            pop_offset_vec_expecting_type(stack, Integer)?;
            stack.push(Object(RefType::array(FieldType::Ref(element_type))));
        }
        Op::MultiANewArray(index, dimensions) => {
            let array_type = context.constants.class(*index)?;
            let array_dimensions = match &array_type {
                RefType::Object(_) => 0,
                RefType::ObjectArray(arr) => arr.dimensions(),
                RefType::PrimitiveArray(arr) => arr.dimensions(),
            };
            if *dimensions == 0 || *dimensions as usize > array_dimensions {
                return Err(VerifyErrorKind::BadConstant(format!(
                    "multianewarray with {} dimensions of {}",
                    dimensions,
                    render_class(&array_type)
                )));
            }
            for _ in 0..*dimensions {
                pop_offset_vec_expecting_type(stack, Integer)?;
            }
            stack.push(Object(array_type));
        }
        Op::ArrayLength => {
            match pop_offset_vec(stack)? {
                Null | Object(RefType::PrimitiveArray(_) | RefType::ObjectArray(_)) => (),
                other => return Err(incompatible("array", &other)),
            }
            stack.push(Integer);
        }
        Op::CheckCast(index) => {
            let class = context.constants.class(*index)?;
            let found = pop_offset_vec(stack)?;
            if !found.is_initialized_reference() {
                return Err(incompatible("object", &found));
            }
            stack.push(Object(class));
        }
        Op::InstanceOf(index) => {
            let _ = context.constants.class(*index)?;
            let found = pop_offset_vec(stack)?;
            if !found.is_initialized_reference() {
                return Err(incompatible("object", &found));
            }
            stack.push(Integer);
        }
        Op::MonitorEnter | Op::MonitorExit => {
            let found = pop_offset_vec(stack)?;
            if !found.is_initialized_reference() {
                return Err(incompatible("object", &found));
            }
        }
    }

    Ok(())
}

/// Render a class the way a `CONSTANT_Class_info` would name it
fn render_class(class: &RefType<BinaryName>) -> String {
    match class {
        RefType::Object(name) => name.as_str().to_owned(),
        array => array.render(),
    }
}

fn numeric(typ: NumericType) -> VType {
    match typ {
        NumericType::Int => VType::Integer,
        NumericType::Long => VType::Long,
        NumericType::Float => VType::Float,
        NumericType::Double => VType::Double,
    }
}

/// Type of a primitive local (references are checked by kind, not by exact type)
fn local(typ: LocalType) -> VType {
    match typ {
        LocalType::Int => VType::Integer,
        LocalType::Long => VType::Long,
        LocalType::Float => VType::Float,
        LocalType::Double => VType::Double,
        LocalType::Reference => unreachable!("reference locals have no single type"),
    }
}

/// Check an array operand against the kind of array instruction, returning the element type
///
/// `null` is accepted for every kind of array (and has `null` elements).
fn check_array(array_type: &VType, elem: ArrayElem) -> Result<VType, VerifyErrorKind> {
    if *array_type == VType::Null {
        return Ok(match elem {
            ArrayElem::Reference => VType::Null,
            ArrayElem::Long => VType::Long,
            ArrayElem::Float => VType::Float,
            ArrayElem::Double => VType::Double,
            ArrayElem::Int | ArrayElem::Byte | ArrayElem::Char | ArrayElem::Short => {
                VType::Integer
            }
        });
    }

    let element_type = match array_type {
        VType::Object(ref_type) => ref_type.element_type(),
        _ => None,
    };
    let compatible = matches!(
        (&element_type, elem),
        (Some(FieldType::Ref(_)), ArrayElem::Reference)
            | (Some(FieldType::Base(BaseType::Int)), ArrayElem::Int)
            | (Some(FieldType::Base(BaseType::Long)), ArrayElem::Long)
            | (Some(FieldType::Base(BaseType::Float)), ArrayElem::Float)
            | (Some(FieldType::Base(BaseType::Double)), ArrayElem::Double)
            | (
                Some(FieldType::Base(BaseType::Byte | BaseType::Boolean)),
                ArrayElem::Byte
            )
            | (Some(FieldType::Base(BaseType::Char)), ArrayElem::Char)
            | (Some(FieldType::Base(BaseType::Short)), ArrayElem::Short)
    );
    match element_type {
        Some(element_type) if compatible => Ok(VType::from(element_type)),
        _ => Err(incompatible(&format!("{:?} array", elem), array_type)),
    }
}

/// Pop the arguments of a method call (in reverse), checking each one
fn pop_arguments(
    stack: &mut OffsetVec<VType>,
    descriptor: &MethodDescriptor<BinaryName>,
) -> Result<(), VerifyErrorKind> {
    for expected_arg_type in descriptor.parameters.iter().rev() {
        let found_arg_type = pop_offset_vec(stack)?;
        let expected_arg_type = VType::from(expected_arg_type.clone());
        if !VerificationType::is_assignable(&found_arg_type, &expected_arg_type) {
            log::debug!(
                "Incompatible argument types: found {} but expected {}",
                found_arg_type,
                expected_arg_type,
            );
            return Err(incompatible(
                &expected_arg_type.to_string(),
                &found_arg_type,
            ));
        }
    }
    Ok(())
}

fn incompatible(expected: &str, found: &VType) -> VerifyErrorKind {
    VerifyErrorKind::IncompatibleType {
        expected: expected.to_owned(),
        found: found.to_string(),
    }
}

fn check_assignable(found: &VType, expected: &VType) -> Result<(), VerifyErrorKind> {
    if VerificationType::is_assignable(found, expected) {
        Ok(())
    } else {
        Err(incompatible(&expected.to_string(), found))
    }
}

fn check_stack_size(stack: &OffsetVec<VType>, max_stack: usize) -> Result<(), VerifyErrorKind> {
    if stack.offset_len().0 > max_stack {
        Err(VerifyErrorKind::StackOverflow)
    } else {
        Ok(())
    }
}

/// Replace every occurrence of an uninitialized type once its constructor has run
fn replace_all(
    stack: &mut OffsetVec<VType>,
    locals: &mut [VType],
    original: &VType,
    updated: &VType,
) {
    stack.map_in_place(|typ| {
        if typ == original {
            updated.clone()
        } else {
            typ.clone()
        }
    });
    for local in locals.iter_mut() {
        if local == original {
            *local = updated.clone();
        }
    }
}

fn get_local(locals: &[VType], index: u16) -> Result<VType, VerifyErrorKind> {
    locals
        .get(index as usize)
        .cloned()
        .ok_or(VerifyErrorKind::InvalidLocal(index))
}

fn get_local_expecting_type(
    locals: &[VType],
    index: u16,
    expected_type: &VType,
) -> Result<(), VerifyErrorKind> {
    let found = get_local(locals, index)?;
    if found == *expected_type {
        Ok(())
    } else {
        Err(incompatible(&expected_type.to_string(), &found))
    }
}

/// Overwrite a local, invalidating any category 2 value it overlaps with
fn update_local_type(
    locals: &mut [VType],
    index: u16,
    new_type: VType,
) -> Result<(), VerifyErrorKind> {
    let idx = index as usize;
    let width = new_type.width();
    if idx + width > locals.len() {
        return Err(VerifyErrorKind::InvalidLocal(index));
    }

    if locals[idx].width() == 2 && idx + 1 < locals.len() {
        locals[idx + 1] = VType::Top;
    }
    if idx > 0 && locals[idx - 1].width() == 2 {
        locals[idx - 1] = VType::Top;
    }
    if width == 2 {
        if idx + 2 < locals.len() && locals[idx + 1].width() == 2 {
            locals[idx + 2] = VType::Top;
        }
        locals[idx + 1] = VType::Top;
    }
    locals[idx] = new_type;
    Ok(())
}

fn pop_offset_vec(stack: &mut OffsetVec<VType>) -> Result<VType, VerifyErrorKind> {
    stack
        .pop()
        .map(|(_, _, typ)| typ)
        .ok_or(VerifyErrorKind::EmptyStack)
}

fn pop_offset_vec_expecting_width(
    stack: &mut OffsetVec<VType>,
    expected_width: usize,
) -> Result<VType, VerifyErrorKind> {
    let typ = pop_offset_vec(stack)?;
    if typ.width() == expected_width {
        Ok(typ)
    } else {
        Err(VerifyErrorKind::InvalidWidth)
    }
}

fn pop_offset_vec_expecting_type(
    stack: &mut OffsetVec<VType>,
    expected_type: VType,
) -> Result<(), VerifyErrorKind> {
    let typ = pop_offset_vec(stack)?;
    if typ == expected_type {
        Ok(())
    } else {
        Err(incompatible(&expected_type.to_string(), &typ))
    }
}

fn pop_reference(stack: &mut OffsetVec<VType>) -> Result<VType, VerifyErrorKind> {
    let typ = pop_offset_vec(stack)?;
    if typ.is_reference() {
        Ok(typ)
    } else {
        Err(incompatible("reference", &typ))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::verifier::{ResolvedMethod, SubroutineId};
    use VerificationType::*;

    /// Constants where every field is an `int` and method 1 is `String.<init>(I)V`
    struct Constants;

    impl ConstantResolver for Constants {
        fn loadable(&self, index: u16) -> Result<VType, VerifyErrorKind> {
            Ok(if index == 2 { Long } else { Integer })
        }

        fn class(&self, _index: u16) -> Result<RefType<BinaryName>, VerifyErrorKind> {
            Ok(RefType::Object(BinaryName::STRING))
        }

        fn field(&self, _index: u16) -> Result<FieldType<BinaryName>, VerifyErrorKind> {
            Ok(FieldType::int())
        }

        fn method(&self, index: u16) -> Result<ResolvedMethod, VerifyErrorKind> {
            let (name, return_type) = if index == 1 {
                (UnqualifiedName::INIT, None)
            } else {
                (
                    UnqualifiedName::from_string(String::from("substring")).unwrap(),
                    Some(FieldType::object(BinaryName::STRING)),
                )
            };
            Ok(ResolvedMethod {
                class: RefType::Object(BinaryName::STRING),
                name,
                descriptor: MethodDescriptor {
                    parameters: vec![FieldType::int()],
                    return_type,
                },
            })
        }

        fn invoke_dynamic(
            &self,
            _index: u16,
        ) -> Result<MethodDescriptor<BinaryName>, VerifyErrorKind> {
            Ok(MethodDescriptor {
                parameters: vec![],
                return_type: None,
            })
        }
    }

    fn new_frame<const N: usize, const M: usize>(locals: [VType; N], stack: [VType; M]) -> Frame {
        Frame {
            locals: Vec::from(locals),
            stack: OffsetVec::from(stack),
            subroutines: SubroutineFrame::top(),
        }
    }

    fn run(frame: &mut Frame, op: Op) -> Result<(), VerifyErrorKind> {
        let this_class = BinaryName::from_string(String::from("MyClass")).unwrap();
        let return_type = Some(FieldType::int());
        let context = ExecutionContext {
            position: 7,
            max_stack: 5,
            this_class: &this_class,
            return_type: &return_type,
            constants: &Constants,
        };
        let mut registry = SubroutineRegistry::new(frame.locals.len());
        frame.execute(&op, &context, &mut registry)
    }

    #[test]
    fn arithmetic() {
        let binops = [
            (Integer, NumericType::Int),
            (Long, NumericType::Long),
            (Float, NumericType::Float),
            (Double, NumericType::Double),
        ];

        for (good_typ, numeric_type) in binops {
            // Try a bunch of different types
            for typ in [Integer, Long, Float, Double, Null, UninitializedThis] {
                let mut frame_in = new_frame([], [typ.clone(), typ.clone()]);
                let result = run(&mut frame_in, Op::Arithmetic(numeric_type));
                if typ == good_typ {
                    assert_eq!(result, Ok(()), "Verification of {:?}", numeric_type);
                    assert_eq!(frame_in, new_frame([], [typ]));
                } else {
                    assert!(
                        matches!(result, Err(VerifyErrorKind::IncompatibleType { .. })),
                        "Verification of {:?} on {:?}",
                        numeric_type,
                        typ
                    );
                }
            }

            // Try with a stack that is too small
            let mut frame_in = new_frame([], [good_typ]);
            assert_eq!(
                run(&mut frame_in, Op::Arithmetic(numeric_type)),
                Err(VerifyErrorKind::EmptyStack)
            );
        }
    }

    #[test]
    fn category_2_locals() {
        let mut frame = new_frame([Integer, Integer, Integer], [Long]);
        run(&mut frame, Op::Store(LocalType::Long, 0)).unwrap();
        assert_eq!(frame.locals, vec![Long, Top, Integer]);

        // Overwriting the second half kills the first half
        let mut frame = new_frame([Long, Top, Integer], [Integer]);
        run(&mut frame, Op::Store(LocalType::Int, 1)).unwrap();
        assert_eq!(frame.locals, vec![Top, Integer, Integer]);

        let mut frame = new_frame([Integer, Integer], [Long]);
        assert_eq!(
            run(&mut frame, Op::Store(LocalType::Long, 1)),
            Err(VerifyErrorKind::InvalidLocal(1))
        );

        let mut frame = new_frame([Integer, Long, Integer], []);
        frame.normalize_locals();
        assert_eq!(frame.locals, vec![Integer, Top, Integer]);
    }

    #[test]
    fn dup_forms() {
        let mut frame = new_frame([], [Integer, Long]);
        run(&mut frame, Op::Dup2X1).unwrap();
        assert_eq!(frame, new_frame([], [Long, Integer, Long]));

        let mut frame = new_frame([], [Long]);
        assert_eq!(run(&mut frame, Op::Dup), Err(VerifyErrorKind::InvalidWidth));

        let mut frame = new_frame([], [Long, Long]);
        assert_eq!(run(&mut frame, Op::Dup2), Err(VerifyErrorKind::StackOverflow));
    }

    #[test]
    fn return_addresses() {
        let address = ReturnAddress(SubroutineId(12));
        let mut frame = new_frame([Top], [address.clone()]);
        run(&mut frame, Op::Store(LocalType::Reference, 0)).unwrap();
        assert_eq!(frame.locals, vec![address.clone()]);

        let mut frame = new_frame([address], [ReturnAddress(SubroutineId(30))]);
        assert_eq!(
            run(&mut frame, Op::Store(LocalType::Reference, 0)),
            Err(VerifyErrorKind::SubroutineMerge)
        );

        // `aload` cannot be used on a return address
        let mut frame = new_frame([ReturnAddress(SubroutineId(12))], []);
        assert!(run(&mut frame, Op::Load(LocalType::Reference, 0)).is_err());
    }

    #[test]
    fn constructors() {
        let uninitialized = Uninitialized {
            new_position: 7,
            class: BinaryName::STRING,
        };
        let mut frame = new_frame([Top], []);
        run(&mut frame, Op::New(0)).unwrap();
        assert_eq!(frame.stack, OffsetVec::from([uninitialized]));
        run(&mut frame, Op::Dup).unwrap();
        run(&mut frame, Op::Store(LocalType::Reference, 0)).unwrap();
        run(&mut frame, Op::Const(NumericType::Int)).unwrap();
        run(&mut frame, Op::Invoke(InvokeKind::Special, 1)).unwrap();
        assert!(frame.stack.is_empty());
        assert_eq!(frame.locals, vec![VType::object(BinaryName::STRING)]);

        // `<init>` on something already initialized
        let mut frame = new_frame([Top], [Null, Integer]);
        assert!(run(&mut frame, Op::Invoke(InvokeKind::Special, 1)).is_err());
    }

    #[test]
    fn kill_uninitialized_locals() {
        let mut registry = SubroutineRegistry::new(2);
        registry.get_or_insert(40);
        let mut frame = new_frame([Integer, UninitializedThis], []);
        frame.subroutines = SubroutineFrame::from([SubroutineId(40)]);
        frame.kill_uninitialized(&mut registry);
        assert_eq!(frame.locals, vec![Integer, Top]);

        let subroutine = registry.get(SubroutineId(40)).unwrap();
        assert!(!subroutine.is_accessed(0));
        assert!(subroutine.is_accessed(1));
    }

    #[test]
    fn returns() {
        let mut frame = new_frame([], [Integer]);
        assert_eq!(run(&mut frame, Op::Return(Some(LocalType::Int))), Ok(()));

        let mut frame = new_frame([], [Null]);
        assert_eq!(
            run(&mut frame, Op::Return(Some(LocalType::Reference))),
            Err(VerifyErrorKind::BadReturn)
        );

        let mut frame = new_frame([], []);
        assert_eq!(
            run(&mut frame, Op::Return(None)),
            Err(VerifyErrorKind::BadReturn)
        );
    }

    #[test]
    fn entry_frames() {
        let class = BinaryName::from_string(String::from("a/B")).unwrap();
        let descriptor = MethodDescriptor {
            parameters: vec![FieldType::long(), FieldType::object(BinaryName::STRING)],
            return_type: None,
        };
        let frame = Frame::entry(&class, false, true, &descriptor, 5).unwrap();
        assert_eq!(
            frame.locals,
            vec![
                UninitializedThis,
                Long,
                Top,
                VType::object(BinaryName::STRING),
                Top
            ]
        );
        assert!(frame.stack.is_empty());
        assert!(frame.subroutines.is_top());

        assert_eq!(
            Frame::entry(&class, true, false, &descriptor, 2),
            Err(VerifyErrorKind::InvalidLocal(2))
        );
    }
}
