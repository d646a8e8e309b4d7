use super::opcodes::{self, OpcodeFlags};
use crate::jvm::{BaseType, Serialize, VerifyError, VerifyErrorKind};
use crate::util::Width;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io;

/// Type of a local variable or of a value being returned
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum LocalType {
    Int,
    Long,
    Float,
    Double,
    Reference,
}

/// Numeric types on which arithmetic operates
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum NumericType {
    Int,
    Long,
    Float,
    Double,
}

/// Element type of array loads and stores
///
/// `Byte` covers both `byte[]` and `boolean[]` (they share `baload`/`bastore`).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ArrayElem {
    Int,
    Long,
    Float,
    Double,
    Reference,
    Byte,
    Char,
    Short,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum InvokeKind {
    Virtual,
    Special,
    Static,
    Interface,
}

/// Straight-line instructions, with their operands decoded
///
/// Instructions which differ only in the encoding of their operands (eg. `iload_1` and `iload 1`,
/// or `bipush` and `iconst_2`) are collapsed.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Op {
    Nop,
    AConstNull,
    Const(NumericType),
    Ldc(u16),
    Ldc2(u16),
    Load(LocalType, u16),
    Store(LocalType, u16),
    ArrayLoad(ArrayElem),
    ArrayStore(ArrayElem),
    Pop,
    Pop2,
    Dup,
    DupX1,
    DupX2,
    Dup2,
    Dup2X1,
    Dup2X2,
    Swap,

    /// Binary operators where operands and results all have the same type
    Arithmetic(NumericType),
    Neg(NumericType),

    /// Shifts take an `int` shift amount
    Shift(NumericType),
    IInc(u16, i16),
    Convert(NumericType, NumericType),

    /// `lcmp`, `fcmp<op>`, `dcmp<op>`
    Compare(NumericType),
    Return(Option<LocalType>),
    AThrow,
    GetStatic(u16),
    PutStatic(u16),
    GetField(u16),
    PutField(u16),
    Invoke(InvokeKind, u16),
    InvokeDynamic(u16),
    New(u16),
    NewArray(BaseType),
    ANewArray(u16),
    ArrayLength,
    CheckCast(u16),
    InstanceOf(u16),
    MonitorEnter,
    MonitorExit,
    MultiANewArray(u16, u8),
}

/// What a conditional or unconditional branch pops
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BranchKind {
    /// `if<cond>`: compare one `int` against zero
    IfInt,

    /// `if_icmp<cond>`
    IfIntCompare,

    /// `if_acmp<cond>`
    IfRefCompare,

    /// `ifnull` and `ifnonnull`
    IfNull,

    /// `goto` and `goto_w`
    Goto,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum SelectCases {
    /// `tableswitch`: consecutive keys starting at `low`
    Table { low: i32, targets: Vec<usize> },

    /// `lookupswitch`: sorted keys
    Lookup(Vec<(i32, usize)>),
}

impl SelectCases {
    pub fn targets(&self) -> Box<dyn Iterator<Item = usize> + '_> {
        match self {
            SelectCases::Table { targets, .. } => Box::new(targets.iter().copied()),
            SelectCases::Lookup(pairs) => Box::new(pairs.iter().map(|(_, target)| *target)),
        }
    }
}

/// Instruction variants, distinguished by how they transfer control
///
/// Targets are absolute bytecode positions.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum InstructionKind {
    Plain(Op),
    Branch { kind: BranchKind, target: usize },
    Select { default: usize, cases: SelectCases },
    Jsr { target: usize },
    Ret { local: u16 },
}

/// Decoded instruction, at a fixed position in the original code
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Instruction {
    pub position: usize,

    /// Number of bytes in the encoding (including `wide` prefix and switch padding)
    pub size: usize,

    /// Opcode (for `wide` instructions, this is the widened opcode)
    pub opcode: u8,
    pub wide: bool,
    pub kind: InstructionKind,
}

impl Width for Instruction {
    fn width(&self) -> usize {
        self.size
    }
}

impl Instruction {
    pub fn flags(&self) -> OpcodeFlags {
        opcodes::flags(self.opcode)
    }

    /// Position of the instruction that comes next in the code
    pub fn next_position(&self) -> usize {
        self.position + self.size
    }

    /// Explicit branch targets (not including fallthrough)
    pub fn targets(&self) -> Vec<usize> {
        match &self.kind {
            InstructionKind::Plain(_) | InstructionKind::Ret { .. } => vec![],
            InstructionKind::Branch { target, .. } | InstructionKind::Jsr { target } => {
                vec![*target]
            }
            InstructionKind::Select { default, cases } => {
                let mut targets = vec![*default];
                targets.extend(cases.targets());
                targets
            }
        }
    }

    /// Decode the instruction starting at `position`
    ///
    /// Branch targets are checked to be inside the code, but not to land on instruction
    /// boundaries (that requires the whole instruction graph).
    pub fn decode(code: &[u8], position: usize) -> Result<Instruction, VerifyError> {
        let truncated = |_: io::Error| VerifyError::at(position, VerifyErrorKind::TruncatedInstruction);
        let target = |offset: i64| -> Result<usize, VerifyError> {
            let target = position as i64 + offset;
            if target < 0 || target >= code.len() as i64 {
                Err(VerifyError::at(position, VerifyErrorKind::InvalidTarget(target)))
            } else {
                Ok(target as usize)
            }
        };

        let opcode = code[position];
        let mut operands: &[u8] = &code[position + 1..];

        if opcode == opcodes::WIDE {
            let widened = operands.read_u8().map_err(truncated)?;
            let index = operands.read_u16::<BigEndian>().map_err(truncated)?;
            let (size, kind) = match widened {
                opcodes::IINC => {
                    let constant = operands.read_i16::<BigEndian>().map_err(truncated)?;
                    (6, InstructionKind::Plain(Op::IInc(index, constant)))
                }
                opcodes::RET => (4, InstructionKind::Ret { local: index }),
                opcodes::ILOAD..=opcodes::ALOAD => {
                    let typ = local_type(widened - opcodes::ILOAD);
                    (4, InstructionKind::Plain(Op::Load(typ, index)))
                }
                opcodes::ISTORE..=opcodes::ASTORE => {
                    let typ = local_type(widened - opcodes::ISTORE);
                    (4, InstructionKind::Plain(Op::Store(typ, index)))
                }
                _ => return Err(VerifyError::at(position, VerifyErrorKind::InvalidWide)),
            };
            return Ok(Instruction {
                position,
                size,
                opcode: widened,
                wide: true,
                kind,
            });
        }

        if opcode == opcodes::TABLESWITCH || opcode == opcodes::LOOKUPSWITCH {
            let padding = opcodes::switch_padding(position);
            if operands.len() < padding {
                return Err(VerifyError::at(position, VerifyErrorKind::TruncatedInstruction));
            }
            operands = &operands[padding..];
            let default = target(operands.read_i32::<BigEndian>().map_err(truncated)? as i64)?;
            let (operand_len, cases) = if opcode == opcodes::TABLESWITCH {
                let low = operands.read_i32::<BigEndian>().map_err(truncated)?;
                let high = operands.read_i32::<BigEndian>().map_err(truncated)?;
                if low > high {
                    return Err(VerifyError::at(position, VerifyErrorKind::InvalidSwitch));
                }
                let count = (high as i64 - low as i64 + 1) as usize;
                if operands.len() < count * 4 {
                    return Err(VerifyError::at(position, VerifyErrorKind::TruncatedInstruction));
                }
                let mut targets = Vec::with_capacity(count);
                for _ in 0..count {
                    targets.push(target(operands.read_i32::<BigEndian>().map_err(truncated)? as i64)?);
                }
                (12 + 4 * count, SelectCases::Table { low, targets })
            } else {
                let npairs = operands.read_i32::<BigEndian>().map_err(truncated)?;
                if npairs < 0 {
                    return Err(VerifyError::at(position, VerifyErrorKind::InvalidSwitch));
                }
                let count = npairs as usize;
                if operands.len() < count * 8 {
                    return Err(VerifyError::at(position, VerifyErrorKind::TruncatedInstruction));
                }
                let mut pairs: Vec<(i32, usize)> = Vec::with_capacity(count);
                for _ in 0..count {
                    let key = operands.read_i32::<BigEndian>().map_err(truncated)?;
                    let offset = operands.read_i32::<BigEndian>().map_err(truncated)?;
                    if matches!(pairs.last(), Some((prev, _)) if *prev >= key) {
                        return Err(VerifyError::at(position, VerifyErrorKind::InvalidSwitch));
                    }
                    pairs.push((key, target(offset as i64)?));
                }
                (8 + 8 * count, SelectCases::Lookup(pairs))
            };
            return Ok(Instruction {
                position,
                size: 1 + padding + operand_len,
                opcode,
                wide: false,
                kind: InstructionKind::Select { default, cases },
            });
        }

        let size = opcodes::fixed_length(opcode)
            .ok_or_else(|| VerifyError::at(position, VerifyErrorKind::UnsupportedOpcode(opcode)))?;
        if code.len() < position + size {
            return Err(VerifyError::at(position, VerifyErrorKind::TruncatedInstruction));
        }

        let kind = match opcode {
            opcodes::IFEQ..=opcodes::JSR | opcodes::IFNULL | opcodes::IFNONNULL => {
                let offset = operands.read_i16::<BigEndian>().map_err(truncated)?;
                let target = target(offset as i64)?;
                match opcode {
                    opcodes::JSR => InstructionKind::Jsr { target },
                    _ => InstructionKind::Branch {
                        kind: branch_kind(opcode),
                        target,
                    },
                }
            }
            opcodes::GOTO_W | opcodes::JSR_W => {
                let offset = operands.read_i32::<BigEndian>().map_err(truncated)?;
                let target = target(offset as i64)?;
                if opcode == opcodes::JSR_W {
                    InstructionKind::Jsr { target }
                } else {
                    InstructionKind::Branch {
                        kind: BranchKind::Goto,
                        target,
                    }
                }
            }
            opcodes::RET => InstructionKind::Ret {
                local: operands.read_u8().map_err(truncated)? as u16,
            },
            _ => InstructionKind::Plain(
                decode_op(opcode, &mut operands).map_err(|kind| VerifyError::at(position, kind))?,
            ),
        };

        Ok(Instruction {
            position,
            size,
            opcode,
            wide: false,
            kind,
        })
    }

    /// Encode a branching instruction at a new position, mapping each old target position to the
    /// position of its new target
    ///
    /// Plain instructions, `jsr`, and `ret` are rejected here (plain instructions can be copied
    /// as-is, subroutine instructions get replaced).
    pub fn encode_relocated<W: WriteBytesExt>(
        &self,
        new_position: usize,
        mut relocate: impl FnMut(usize) -> Result<usize, VerifyError>,
        writer: &mut W,
    ) -> Result<(), VerifyError> {
        let io_error = |_: io::Error| VerifyError::at(new_position, VerifyErrorKind::OffsetOverflow);
        match &self.kind {
            InstructionKind::Branch { target, .. } => {
                let new_target = relocate(*target)?;
                if self.opcode == opcodes::GOTO_W {
                    let offset = wide_offset(new_position, new_target)?;
                    writer.write_u8(self.opcode).map_err(io_error)?;
                    offset.serialize(writer).map_err(io_error)?;
                } else {
                    let offset = short_offset(new_position, new_target)?;
                    writer.write_u8(self.opcode).map_err(io_error)?;
                    offset.serialize(writer).map_err(io_error)?;
                }
            }
            InstructionKind::Select { default, cases } => {
                writer.write_u8(self.opcode).map_err(io_error)?;
                for _ in 0..opcodes::switch_padding(new_position) {
                    writer.write_u8(0).map_err(io_error)?;
                }
                wide_offset(new_position, relocate(*default)?)?
                    .serialize(writer)
                    .map_err(io_error)?;
                match cases {
                    SelectCases::Table { low, targets } => {
                        low.serialize(writer).map_err(io_error)?;
                        (low + targets.len() as i32 - 1)
                            .serialize(writer)
                            .map_err(io_error)?;
                        for target in targets {
                            wide_offset(new_position, relocate(*target)?)?
                                .serialize(writer)
                                .map_err(io_error)?;
                        }
                    }
                    SelectCases::Lookup(pairs) => {
                        (pairs.len() as i32).serialize(writer).map_err(io_error)?;
                        for (key, target) in pairs {
                            key.serialize(writer).map_err(io_error)?;
                            wide_offset(new_position, relocate(*target)?)?
                                .serialize(writer)
                                .map_err(io_error)?;
                        }
                    }
                }
            }
            InstructionKind::Plain(_) | InstructionKind::Jsr { .. } | InstructionKind::Ret { .. } => {
                return Err(VerifyError::at(
                    self.position,
                    VerifyErrorKind::UnsupportedOpcode(self.opcode),
                ));
            }
        }
        Ok(())
    }

    /// Encoded size of a branching instruction if it were placed at a new position
    pub fn relocated_size(&self, new_position: usize) -> usize {
        match self.kind {
            InstructionKind::Select { .. } => {
                self.size - opcodes::switch_padding(self.position)
                    + opcodes::switch_padding(new_position)
            }
            _ => self.size,
        }
    }
}

/// Relative offset for a 16-bit branch
pub fn short_offset(from: usize, to: usize) -> Result<i16, VerifyError> {
    let offset = to as i64 - from as i64;
    i16::try_from(offset).map_err(|_| VerifyError::at(from, VerifyErrorKind::OffsetOverflow))
}

/// Relative offset for a 32-bit branch (or a switch target)
pub fn wide_offset(from: usize, to: usize) -> Result<i32, VerifyError> {
    let offset = to as i64 - from as i64;
    i32::try_from(offset).map_err(|_| VerifyError::at(from, VerifyErrorKind::OffsetOverflow))
}

fn local_type(relative: u8) -> LocalType {
    match relative {
        0 => LocalType::Int,
        1 => LocalType::Long,
        2 => LocalType::Float,
        3 => LocalType::Double,
        _ => LocalType::Reference,
    }
}

fn numeric_type(relative: u8) -> NumericType {
    match relative {
        0 => NumericType::Int,
        1 => NumericType::Long,
        2 => NumericType::Float,
        _ => NumericType::Double,
    }
}

fn array_elem(relative: u8) -> ArrayElem {
    match relative {
        0 => ArrayElem::Int,
        1 => ArrayElem::Long,
        2 => ArrayElem::Float,
        3 => ArrayElem::Double,
        4 => ArrayElem::Reference,
        5 => ArrayElem::Byte,
        6 => ArrayElem::Char,
        _ => ArrayElem::Short,
    }
}

fn branch_kind(opcode: u8) -> BranchKind {
    match opcode {
        opcodes::IFEQ..=opcodes::IFLE => BranchKind::IfInt,
        opcodes::IF_ICMPEQ..=opcodes::IF_ICMPLE => BranchKind::IfIntCompare,
        opcodes::IF_ACMPEQ | opcodes::IF_ACMPNE => BranchKind::IfRefCompare,
        opcodes::IFNULL | opcodes::IFNONNULL => BranchKind::IfNull,
        _ => BranchKind::Goto,
    }
}

/// Decode a straight-line instruction
fn decode_op(opcode: u8, operands: &mut &[u8]) -> Result<Op, VerifyErrorKind> {
    use opcodes::*;

    let truncated = |_: io::Error| VerifyErrorKind::TruncatedInstruction;

    let op = match opcode {
        NOP => Op::Nop,
        ACONST_NULL => Op::AConstNull,
        ICONST_M1..=ICONST_5 => Op::Const(NumericType::Int),
        LCONST_0 | LCONST_1 => Op::Const(NumericType::Long),
        FCONST_0..=FCONST_2 => Op::Const(NumericType::Float),
        DCONST_0 | DCONST_1 => Op::Const(NumericType::Double),
        BIPUSH | SIPUSH => Op::Const(NumericType::Int),
        LDC => Op::Ldc(operands.read_u8().map_err(truncated)? as u16),
        LDC_W | LDC2_W | GETSTATIC..=INVOKEDYNAMIC | NEW | ANEWARRAY | CHECKCAST | INSTANCEOF
        | MULTIANEWARRAY => {
            let index = operands.read_u16::<BigEndian>().map_err(truncated)?;
            match opcode {
                LDC_W => Op::Ldc(index),
                LDC2_W => Op::Ldc2(index),
                GETSTATIC => Op::GetStatic(index),
                PUTSTATIC => Op::PutStatic(index),
                GETFIELD => Op::GetField(index),
                PUTFIELD => Op::PutField(index),
                INVOKEVIRTUAL => Op::Invoke(InvokeKind::Virtual, index),
                INVOKESPECIAL => Op::Invoke(InvokeKind::Special, index),
                INVOKESTATIC => Op::Invoke(InvokeKind::Static, index),
                INVOKEINTERFACE => Op::Invoke(InvokeKind::Interface, index),
                INVOKEDYNAMIC => Op::InvokeDynamic(index),
                NEW => Op::New(index),
                ANEWARRAY => Op::ANewArray(index),
                CHECKCAST => Op::CheckCast(index),
                INSTANCEOF => Op::InstanceOf(index),
                _ => Op::MultiANewArray(index, operands.read_u8().map_err(truncated)?),
            }
        }
        ILOAD..=ALOAD => {
            let index = operands.read_u8().map_err(truncated)?;
            Op::Load(local_type(opcode - ILOAD), index as u16)
        }
        ILOAD_0..=ALOAD_3 => {
            let relative = opcode - ILOAD_0;
            Op::Load(local_type(relative / 4), (relative % 4) as u16)
        }
        IALOAD..=SALOAD => Op::ArrayLoad(array_elem(opcode - IALOAD)),
        ISTORE..=ASTORE => {
            let index = operands.read_u8().map_err(truncated)?;
            Op::Store(local_type(opcode - ISTORE), index as u16)
        }
        ISTORE_0..=ASTORE_3 => {
            let relative = opcode - ISTORE_0;
            Op::Store(local_type(relative / 4), (relative % 4) as u16)
        }
        IASTORE..=SASTORE => Op::ArrayStore(array_elem(opcode - IASTORE)),
        POP => Op::Pop,
        POP2 => Op::Pop2,
        DUP => Op::Dup,
        DUP_X1 => Op::DupX1,
        DUP_X2 => Op::DupX2,
        DUP2 => Op::Dup2,
        DUP2_X1 => Op::Dup2X1,
        DUP2_X2 => Op::Dup2X2,
        SWAP => Op::Swap,
        IADD..=DREM => Op::Arithmetic(numeric_type((opcode - IADD) % 4)),
        INEG..=DNEG => Op::Neg(numeric_type(opcode - INEG)),
        ISHL..=LUSHR => Op::Shift(numeric_type((opcode - ISHL) % 2)),
        IAND..=LXOR => Op::Arithmetic(numeric_type((opcode - IAND) % 2)),
        IINC => {
            let index = operands.read_u8().map_err(truncated)?;
            let constant = operands.read_i8().map_err(truncated)?;
            Op::IInc(index as u16, constant as i16)
        }
        I2L => Op::Convert(NumericType::Int, NumericType::Long),
        I2F => Op::Convert(NumericType::Int, NumericType::Float),
        I2D => Op::Convert(NumericType::Int, NumericType::Double),
        L2I => Op::Convert(NumericType::Long, NumericType::Int),
        L2F => Op::Convert(NumericType::Long, NumericType::Float),
        L2D => Op::Convert(NumericType::Long, NumericType::Double),
        F2I => Op::Convert(NumericType::Float, NumericType::Int),
        F2L => Op::Convert(NumericType::Float, NumericType::Long),
        F2D => Op::Convert(NumericType::Float, NumericType::Double),
        D2I => Op::Convert(NumericType::Double, NumericType::Int),
        D2L => Op::Convert(NumericType::Double, NumericType::Long),
        D2F => Op::Convert(NumericType::Double, NumericType::Float),
        I2B | I2C | I2S => Op::Convert(NumericType::Int, NumericType::Int),
        LCMP => Op::Compare(NumericType::Long),
        FCMPL | FCMPG => Op::Compare(NumericType::Float),
        DCMPL | DCMPG => Op::Compare(NumericType::Double),
        IRETURN..=ARETURN => Op::Return(Some(local_type(opcode - IRETURN))),
        RETURN => Op::Return(None),
        NEWARRAY => {
            let atype = operands.read_u8().map_err(truncated)?;
            let element = match atype {
                4 => BaseType::Boolean,
                5 => BaseType::Char,
                6 => BaseType::Float,
                7 => BaseType::Double,
                8 => BaseType::Byte,
                9 => BaseType::Short,
                10 => BaseType::Int,
                11 => BaseType::Long,
                _ => return Err(VerifyErrorKind::BadConstant(format!("newarray type {}", atype))),
            };
            Op::NewArray(element)
        }
        ARRAYLENGTH => Op::ArrayLength,
        ATHROW => Op::AThrow,
        MONITORENTER => Op::MonitorEnter,
        MONITOREXIT => Op::MonitorExit,
        _ => return Err(VerifyErrorKind::UnsupportedOpcode(opcode)),
    };
    Ok(op)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::code::opcodes::*;

    #[test]
    fn straight_line() {
        let code = [ILOAD_3, ALOAD, 7, IINC, 2, 0xff, LDC2_W, 0, 9, RETURN];
        let iload = Instruction::decode(&code, 0).unwrap();
        assert_eq!(iload.kind, InstructionKind::Plain(Op::Load(LocalType::Int, 3)));
        assert_eq!(iload.size, 1);

        let aload = Instruction::decode(&code, 1).unwrap();
        assert_eq!(aload.kind, InstructionKind::Plain(Op::Load(LocalType::Reference, 7)));

        let iinc = Instruction::decode(&code, 3).unwrap();
        assert_eq!(iinc.kind, InstructionKind::Plain(Op::IInc(2, -1)));
        assert!(iinc.flags().contains(OpcodeFlags::STORE));

        let ldc2 = Instruction::decode(&code, 6).unwrap();
        assert_eq!(ldc2.kind, InstructionKind::Plain(Op::Ldc2(9)));
        assert_eq!(ldc2.next_position(), 9);
    }

    #[test]
    fn wide_forms() {
        let code = [WIDE, ASTORE, 1, 0, WIDE, IINC, 0, 3, 0xff, 0xfe, WIDE, RET, 1, 0, WIDE, GOTO, 0, 0];
        let astore = Instruction::decode(&code, 0).unwrap();
        assert_eq!(astore.size, 4);
        assert_eq!(astore.opcode, ASTORE);
        assert_eq!(astore.kind, InstructionKind::Plain(Op::Store(LocalType::Reference, 256)));

        let iinc = Instruction::decode(&code, 4).unwrap();
        assert_eq!(iinc.size, 6);
        assert_eq!(iinc.kind, InstructionKind::Plain(Op::IInc(3, -2)));

        let ret = Instruction::decode(&code, 10).unwrap();
        assert_eq!(ret.kind, InstructionKind::Ret { local: 256 });

        assert_eq!(
            Instruction::decode(&code, 14).unwrap_err().kind,
            VerifyErrorKind::InvalidWide
        );
    }

    #[test]
    fn branches_and_subroutines() {
        // 0: ifeq +7, 3: jsr +5, 6: goto -6, 9: nop, 10: nop
        let code = [IFEQ, 0, 7, JSR, 0, 5, GOTO, 0xff, 0xfa, NOP, NOP];
        let ifeq = Instruction::decode(&code, 0).unwrap();
        assert_eq!(
            ifeq.kind,
            InstructionKind::Branch {
                kind: BranchKind::IfInt,
                target: 7
            }
        );
        assert_eq!(Instruction::decode(&code, 3).unwrap().kind, InstructionKind::Jsr { target: 8 });
        assert_eq!(Instruction::decode(&code, 6).unwrap().targets(), vec![0]);

        let backwards = [NOP, GOTO, 0xff, 0xfe];
        assert_eq!(
            Instruction::decode(&backwards, 1).unwrap_err().kind,
            VerifyErrorKind::InvalidTarget(-1)
        );
    }

    #[test]
    fn table_switch_padding() {
        // tableswitch at 1: two bytes of padding, default +23, cases 0..=1 -> +23, +24
        let mut code = vec![ILOAD_0, TABLESWITCH, 0, 0];
        code.extend_from_slice(&[0, 0, 0, 23, 0, 0, 0, 0, 0, 0, 0, 1, 0, 0, 0, 23, 0, 0, 0, 24]);
        code.extend_from_slice(&[RETURN, RETURN]);
        let switch = Instruction::decode(&code, 1).unwrap();
        assert_eq!(switch.size, 23);
        assert_eq!(switch.targets(), vec![24, 24, 25]);

        // At position 0 the same switch would need three bytes of padding
        assert_eq!(switch.relocated_size(0), 24);
        let mut encoded = vec![];
        switch
            .encode_relocated(0, |target| Ok(target + 10), &mut encoded)
            .unwrap();
        assert_eq!(&encoded[..4], &[TABLESWITCH, 0, 0, 0]);
        assert_eq!(&encoded[4..8], &[0, 0, 0, 34]);
        assert_eq!(&encoded[16..], &[0, 0, 0, 34, 0, 0, 0, 35]);
    }

    #[test]
    fn lookup_switch_keys_must_be_sorted() {
        let mut code = vec![LOOKUPSWITCH, 0, 0, 0];
        code.extend_from_slice(&[0, 0, 0, 20, 0, 0, 0, 2]);
        code.extend_from_slice(&[0, 0, 0, 5, 0, 0, 0, 20, 0, 0, 0, 5, 0, 0, 0, 20]);
        code.push(RETURN);
        assert_eq!(
            Instruction::decode(&code, 0).unwrap_err().kind,
            VerifyErrorKind::InvalidSwitch
        );
    }

    #[test]
    fn relocation_range_checks() {
        let goto = Instruction {
            position: 0,
            size: 3,
            opcode: GOTO,
            wide: false,
            kind: InstructionKind::Branch {
                kind: BranchKind::Goto,
                target: 10,
            },
        };
        let mut encoded = vec![];
        goto.encode_relocated(100, |_| Ok(20), &mut encoded).unwrap();
        assert_eq!(encoded, vec![GOTO, 0xff, 0xb0]);

        let err = goto
            .encode_relocated(0, |_| Ok(40000), &mut vec![])
            .unwrap_err();
        assert_eq!(err.kind, VerifyErrorKind::OffsetOverflow);

        // Subroutine instructions are replaced, never relocated
        let ret = Instruction::decode(&[RET, 0], 0).unwrap();
        let err = ret
            .encode_relocated(0, |target| Ok(target), &mut vec![])
            .unwrap_err();
        assert_eq!(err, VerifyError::at(0, VerifyErrorKind::UnsupportedOpcode(RET)));
    }

    #[test]
    fn unknown_and_truncated() {
        assert_eq!(
            Instruction::decode(&[0xca], 0).unwrap_err().kind,
            VerifyErrorKind::UnsupportedOpcode(0xca)
        );
        assert_eq!(
            Instruction::decode(&[SIPUSH, 1], 0).unwrap_err().kind,
            VerifyErrorKind::TruncatedInstruction
        );
    }
}
