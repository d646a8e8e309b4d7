//! Tiny bytecode assembler for building test methods and classes in memory

#![allow(dead_code)]

use std::collections::HashMap;
use unjsr::jvm::class_file::{
    Attribute, ClassFile, Code, ConstantIndex, ConstantPool, ExceptionHandler, Member, Version,
};
use unjsr::jvm::code::{opcodes, InstructionGraph};
use unjsr::jvm::inliner::inline_subroutines;
use unjsr::jvm::verifier::{TypeInferencingVerifier, VerifiableMethod, VerifiedMethod};
use unjsr::jvm::{Error, MethodAccessFlags, VerifyErrorKind};

/// Offset to patch once all labels are known
struct Fixup {
    /// Position of the instruction the offset is relative to
    from: usize,

    /// Position of the offset bytes
    at: usize,

    wide: bool,
    label: &'static str,
}

struct Catch {
    start: &'static str,
    end: &'static str,
    handler: &'static str,
}

#[derive(Default)]
pub struct Assembler {
    code: Vec<u8>,
    labels: HashMap<&'static str, usize>,
    fixups: Vec<Fixup>,
    catches: Vec<Catch>,
}

impl Assembler {
    pub fn new() -> Assembler {
        Assembler::default()
    }

    pub fn position(&self) -> usize {
        self.code.len()
    }

    pub fn label(&mut self, label: &'static str) -> &mut Self {
        let previous = self.labels.insert(label, self.code.len());
        assert!(previous.is_none(), "label {} defined twice", label);
        self
    }

    /// Instruction without operands
    pub fn op(&mut self, opcode: u8) -> &mut Self {
        self.code.push(opcode);
        self
    }

    /// Instruction with raw operand bytes
    pub fn op_with(&mut self, opcode: u8, operands: &[u8]) -> &mut Self {
        self.code.push(opcode);
        self.code.extend_from_slice(operands);
        self
    }

    pub fn repeat(&mut self, opcode: u8, count: usize) -> &mut Self {
        self.code.extend(std::iter::repeat(opcode).take(count));
        self
    }

    /// Branch (or `jsr`) with a 16-bit offset
    pub fn jump(&mut self, opcode: u8, label: &'static str) -> &mut Self {
        let from = self.code.len();
        self.code.push(opcode);
        self.offset(from, false, label);
        self
    }

    /// `goto_w` or `jsr_w`
    pub fn jump_wide(&mut self, opcode: u8, label: &'static str) -> &mut Self {
        let from = self.code.len();
        self.code.push(opcode);
        self.offset(from, true, label);
        self
    }

    pub fn tableswitch(
        &mut self,
        default: &'static str,
        low: i32,
        targets: &[&'static str],
    ) -> &mut Self {
        let from = self.switch_header(opcodes::TABLESWITCH);
        self.offset(from, true, default);
        self.code.extend_from_slice(&low.to_be_bytes());
        let high = low + targets.len() as i32 - 1;
        self.code.extend_from_slice(&high.to_be_bytes());
        for target in targets {
            self.offset(from, true, target);
        }
        self
    }

    pub fn lookupswitch(
        &mut self,
        default: &'static str,
        pairs: &[(i32, &'static str)],
    ) -> &mut Self {
        let from = self.switch_header(opcodes::LOOKUPSWITCH);
        self.offset(from, true, default);
        self.code
            .extend_from_slice(&(pairs.len() as i32).to_be_bytes());
        for (key, target) in pairs {
            self.code.extend_from_slice(&key.to_be_bytes());
            self.offset(from, true, target);
        }
        self
    }

    /// Catch-all handler for `[start, end)`
    pub fn catch(
        &mut self,
        start: &'static str,
        end: &'static str,
        handler: &'static str,
    ) -> &mut Self {
        self.catches.push(Catch {
            start,
            end,
            handler,
        });
        self
    }

    pub fn finish(&self, max_stack: u16, max_locals: u16) -> Code {
        let mut code = self.code.clone();
        for fixup in &self.fixups {
            let target = self.resolve(fixup.label) as i64;
            let offset = target - fixup.from as i64;
            if fixup.wide {
                code[fixup.at..fixup.at + 4].copy_from_slice(&(offset as i32).to_be_bytes());
            } else {
                let offset = i16::try_from(offset).expect("offset does not fit in 16 bits");
                code[fixup.at..fixup.at + 2].copy_from_slice(&offset.to_be_bytes());
            }
        }

        let exception_table = self
            .catches
            .iter()
            .map(|catch| ExceptionHandler {
                start_pc: self.resolve(catch.start) as u16,
                end_pc: self.resolve(catch.end) as u16,
                handler_pc: self.resolve(catch.handler) as u16,
                catch_type: ConstantIndex(0),
            })
            .collect();

        Code {
            max_stack,
            max_locals,
            code,
            exception_table,
            attributes: vec![],
        }
    }

    fn resolve(&self, label: &'static str) -> usize {
        match self.labels.get(label) {
            Some(position) => *position,
            None => panic!("undefined label {}", label),
        }
    }

    fn switch_header(&mut self, opcode: u8) -> usize {
        let from = self.code.len();
        self.code.push(opcode);
        while self.code.len() % 4 != 0 {
            self.code.push(0);
        }
        from
    }

    fn offset(&mut self, from: usize, wide: bool, label: &'static str) {
        let at = self.code.len();
        let width = if wide { 4 } else { 2 };
        self.code.extend(std::iter::repeat(0).take(width));
        self.fixups.push(Fixup {
            from,
            at,
            wide,
            label,
        });
    }
}

/// Static method to add to a test class
pub struct TestMethod {
    pub name: &'static str,
    pub descriptor: &'static str,
    pub code: Code,
}

impl TestMethod {
    pub fn new(name: &'static str, descriptor: &'static str, code: Code) -> TestMethod {
        TestMethod {
            name,
            descriptor,
            code,
        }
    }
}

/// Class `Test` (extending `java/lang/Object`) with the given static methods
pub fn class_with(version: Version, methods: Vec<TestMethod>) -> ClassFile {
    let mut constants = ConstantPool::new();
    let this_class = constants.get_class("Test");
    let super_class = constants.get_class("java/lang/Object");

    let members = methods
        .into_iter()
        .map(|method| Member {
            access_flags: (MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC).bits(),
            name_index: constants.get_utf8(method.name),
            descriptor_index: constants.get_utf8(method.descriptor),
            attributes: vec![Attribute::encode(&method.code, &mut constants).unwrap()],
        })
        .collect();

    ClassFile {
        version,
        constants,
        access_flags: 0x0021,
        this_class,
        super_class,
        interfaces: vec![],
        fields: vec![],
        methods: members,
        attributes: vec![],
    }
}

/// Class with a single static method `f` (old enough to always be verified by type inference)
pub fn class_of(descriptor: &'static str, code: Code) -> ClassFile {
    class_with(Version::JAVA1_4, vec![TestMethod::new("f", descriptor, code)])
}

pub fn verify(class: &ClassFile, index: usize) -> Result<VerifiedMethod, Error> {
    let code = class.methods[index].code(&class.constants)?.unwrap();
    let method = VerifiableMethod::new(class, &class.methods[index], &code)?;
    Ok(TypeInferencingVerifier::verify(&method)?)
}

/// Verify then inline a method
pub fn inline(class: &ClassFile, index: usize) -> Result<Code, Error> {
    let code = class.methods[index].code(&class.constants)?.unwrap();
    let method = VerifiableMethod::new(class, &class.methods[index], &code)?;
    let verified = TypeInferencingVerifier::verify(&method)?;
    inline_subroutines(&verified, &code, &class.constants)
}

/// Kind of a verification failure
pub fn kind_of(err: Error) -> VerifyErrorKind {
    match err {
        Error::Verify(err) => err.kind,
        other => panic!("expected a verify error, got {}", other),
    }
}

/// Decoded opcodes of some code, in order
pub fn opcodes_of(code: &[u8]) -> Vec<u8> {
    InstructionGraph::decode(code)
        .unwrap()
        .iter()
        .map(|instruction| instruction.opcode)
        .collect()
}
