mod common;

use common::*;
use std::cell::Cell;
use unjsr::jvm::class_file::{Attribute, ClassFile, Code, Version};
use unjsr::jvm::code::opcodes::*;
use unjsr::jvm::verifier::{MethodVerifier, VerifiableMethod, Verification};
use unjsr::jvm::{VerifyError, VerifyErrorKind};
use unjsr::rewrite::{ClassRewriter, Error, Settings};

fn with_subroutine() -> Code {
    let mut asm = Assembler::new();
    asm.jump(JSR, "sub")
        .op(RETURN)
        .label("sub")
        .op(ASTORE_0)
        .op_with(RET, &[0]);
    asm.finish(1, 1)
}

fn without_subroutine() -> Code {
    let mut asm = Assembler::new();
    asm.op(ICONST_0).op(POP).op(RETURN).op(NOP);
    asm.finish(1, 0)
}

fn with_two_rets() -> Code {
    let mut asm = Assembler::new();
    asm.jump(JSR, "sub")
        .op(RETURN)
        .label("sub")
        .op(ASTORE_0)
        .op(ICONST_0)
        .jump(IFEQ, "other")
        .op_with(RET, &[0])
        .label("other")
        .op_with(RET, &[0]);
    asm.finish(1, 1)
}

fn test_class(version: Version) -> ClassFile {
    class_with(
        version,
        vec![
            TestMethod::new("f", "()V", with_subroutine()),
            TestMethod::new("g", "()V", without_subroutine()),
            TestMethod::new("h", "()V", with_two_rets()),
        ],
    )
}

fn code_of(class: &ClassFile, index: usize) -> Code {
    class.methods[index]
        .code(&class.constants)
        .unwrap()
        .unwrap()
}

#[test]
fn stops_at_first_failure() {
    let mut class = test_class(Version::JAVA1_4);
    let rewriter = ClassRewriter::new(Settings::new());
    match rewriter.rewrite_class(&mut class) {
        Err(Error::Method { method, source }) => {
            assert_eq!(method, "Test.h()V");
            assert_eq!(kind_of(source), VerifyErrorKind::MultipleReturns);
        }
        other => panic!("unexpected outcome {:?}", other),
    }
}

#[test]
fn keep_going_reports_failures() {
    let mut class = test_class(Version::JAVA1_4);
    let original = class.clone();
    let rewriter = ClassRewriter::new(Settings {
        keep_going: true,
        ..Settings::new()
    });

    let report = rewriter.rewrite_class(&mut class).unwrap();
    assert_eq!(report.rewritten, vec![String::from("Test.f()V")]);
    assert_eq!(report.unchanged, 1);
    assert_eq!(report.failures.len(), 1);
    let message = report.failures[0].to_string();
    assert!(message.starts_with("Test.h()V: Verify error at position"));
    assert!(message.ends_with("Multiple returns to single JSR"));

    assert_eq!(code_of(&class, 0).code, vec![RETURN]);
    assert_eq!(class.methods[1], original.methods[1]);
    assert_eq!(class.methods[2], original.methods[2]);
}

#[test]
fn inline_all_drops_dead_code() {
    let mut class = class_with(
        Version::JAVA1_4,
        vec![TestMethod::new("g", "()V", without_subroutine())],
    );
    let rewriter = ClassRewriter::new(Settings {
        inline_all: true,
        ..Settings::new()
    });
    let report = rewriter.rewrite_class(&mut class).unwrap();
    assert_eq!(report.rewritten.len(), 1);
    assert_eq!(code_of(&class, 0).code, vec![ICONST_0, POP, RETURN]);
}

#[test]
fn stack_map_table_policy() {
    let make_class = || {
        let mut class = class_with(
            Version::JAVA1_4,
            vec![TestMethod::new("f", "()V", with_subroutine())],
        );
        let mut code = code_of(&class, 0);
        code.attributes.push(Attribute {
            name_index: class.constants.get_utf8("StackMapTable"),
            info: vec![0, 0],
        });
        class.methods[0]
            .replace_code(&code, &mut class.constants)
            .unwrap();
        class
    };

    let mut class = make_class();
    let report = ClassRewriter::new(Settings::new())
        .rewrite_class(&mut class)
        .unwrap();
    assert_eq!(report.rewritten.len(), 1);
    let code = code_of(&class, 0);
    assert_eq!(code.code, vec![RETURN]);
    assert!(code.attributes.is_empty());

    let mut class = make_class();
    let original = class.clone();
    let report = ClassRewriter::new(Settings {
        drop_stack_map_tables: false,
        ..Settings::new()
    })
    .rewrite_class(&mut class)
    .unwrap();
    assert_eq!(report.unchanged, 1);
    assert_eq!(class, original);
}

/// Type checker which accepts everything, counting how often it runs
struct Accepting(Cell<usize>);

impl MethodVerifier for Accepting {
    fn verify_method(&self, _method: &VerifiableMethod) -> Result<Verification, VerifyError> {
        self.0.set(self.0.get() + 1);
        Ok(Verification::TypeChecked)
    }
}

#[test]
fn type_checked_methods_are_left_alone() {
    let accepting = Accepting(Cell::new(0));
    let rewriter = ClassRewriter::new(Settings::new()).with_type_checker(&accepting);

    let mut class = class_with(
        Version::JAVA6,
        vec![TestMethod::new("f", "()V", with_subroutine())],
    );
    let original = class.clone();
    let report = rewriter.rewrite_class(&mut class).unwrap();
    assert_eq!(report.unchanged, 1);
    assert_eq!(class, original);
    assert_eq!(accepting.0.get(), 1);

    // Old classes never get type checked
    let mut class = class_with(
        Version::JAVA5,
        vec![TestMethod::new("f", "()V", with_subroutine())],
    );
    let report = rewriter.rewrite_class(&mut class).unwrap();
    assert_eq!(report.rewritten.len(), 1);
    assert_eq!(accepting.0.get(), 1);
}

#[test]
fn rewrite_file_round_trip() {
    let directory = std::env::temp_dir().join(format!("unjsr-test-{}", std::process::id()));
    let input = directory.join("in").join("Test.class");
    let output = directory.join("out").join("Test.class");

    let class = class_with(
        Version::JAVA1_4,
        vec![
            TestMethod::new("f", "()V", with_subroutine()),
            TestMethod::new("g", "()V", without_subroutine()),
        ],
    );
    class.save_to_path(&input, true).unwrap();

    let report = ClassRewriter::new(Settings::new())
        .rewrite_file(&input, &output)
        .unwrap();
    assert_eq!(report.rewritten.len(), 1);

    let rewritten = ClassFile::from_path(&output).unwrap();
    assert_eq!(code_of(&rewritten, 0).code, vec![RETURN]);
    assert_eq!(rewritten.methods[1], class.methods[1]);
    assert_eq!(ClassFile::from_path(&input).unwrap(), class);

    std::fs::remove_dir_all(&directory).unwrap();
}
