mod common;

use common::*;
use std::cell::Cell;
use unjsr::jvm::class_file::Version;
use unjsr::jvm::code::opcodes::*;
use unjsr::jvm::verifier::{
    ClassVerifier, MethodVerifier, SubroutineId, VerifiableMethod, Verification, VerificationType,
};
use unjsr::jvm::{VerifyError, VerifyErrorKind};

/// Two calls to one subroutine with different types in a local the subroutine never touches
fn two_call_sites() -> Assembler {
    let mut asm = Assembler::new();
    asm.op(ICONST_0)
        .op(ISTORE_1)
        .jump(JSR, "sub")
        .op(ILOAD_1)
        .op(POP)
        .op(FCONST_0)
        .op(FSTORE_1)
        .jump(JSR, "sub")
        .op(FLOAD_1)
        .op(POP)
        .op(RETURN)
        .label("sub")
        .op(ASTORE_0)
        .op(ICONST_2)
        .op(ISTORE_2)
        .op_with(RET, &[0]);
    asm
}

#[test]
fn untouched_locals_keep_call_site_types() {
    let class = class_of("()V", two_call_sites().finish(1, 3));
    let verified = verify(&class, 0).unwrap();

    let subroutine = verified.subroutines().get(SubroutineId(15)).unwrap();
    assert!(subroutine.is_accessed(0));
    assert!(!subroutine.is_accessed(1));
    assert!(subroutine.is_accessed(2));
    assert_eq!(subroutine.ret_instructions(), &[18]);

    let first_return = verified.type_state_at(5).unwrap();
    assert_eq!(first_return.frame.locals[1], VerificationType::Integer);
    assert_eq!(first_return.frame.locals[2], VerificationType::Integer);

    let second_return = verified.type_state_at(12).unwrap();
    assert_eq!(second_return.frame.locals[1], VerificationType::Float);
    assert_eq!(second_return.frame.locals[2], VerificationType::Integer);

    assert_eq!(verified.ret_for_jsr(2), Some(18));
    assert_eq!(verified.ret_for_jsr(9), Some(18));
    assert!(verified.is_return_position_store(15));
}

#[test]
fn mutual_recursion() {
    let mut asm = Assembler::new();
    asm.jump(JSR, "a")
        .op(RETURN)
        .label("a")
        .op(ASTORE_0)
        .jump(JSR, "b")
        .op_with(RET, &[0])
        .label("b")
        .op(ASTORE_1)
        .jump(JSR, "a")
        .op_with(RET, &[1]);
    let class = class_of("()V", asm.finish(1, 2));
    assert_eq!(
        kind_of(verify(&class, 0).unwrap_err()),
        VerifyErrorKind::RecursiveSubroutine
    );
}

#[test]
fn ret_outside_subroutine() {
    // The subroutine keeps a second copy of its return address, then the caller uses it
    let mut asm = Assembler::new();
    asm.jump(JSR, "sub")
        .op_with(RET, &[1])
        .label("sub")
        .op(DUP)
        .op(ASTORE_1)
        .op(ASTORE_0)
        .op_with(RET, &[0]);
    let class = class_of("()V", asm.finish(2, 2));
    match verify(&class, 0).unwrap_err() {
        unjsr::jvm::Error::Verify(err) => {
            assert_eq!(err, VerifyError::at(3, VerifyErrorKind::RetOutsideSubroutine))
        }
        other => panic!("unexpected error {}", other),
    }
}

#[test]
fn jsr_at_end_of_code() {
    let mut asm = Assembler::new();
    asm.jump(GOTO, "call")
        .label("sub")
        .op(ASTORE_0)
        .op_with(RET, &[0])
        .label("call")
        .jump(JSR, "sub");
    let class = class_of("()V", asm.finish(1, 1));
    assert_eq!(
        kind_of(verify(&class, 0).unwrap_err()),
        VerifyErrorKind::FallsOffEnd
    );
}

#[test]
fn branch_into_instruction() {
    let class = class_of("()V", {
        let mut asm = Assembler::new();
        asm.op(ICONST_0).op_with(IFEQ, &[0, 2]).op(RETURN);
        asm.finish(1, 0)
    });
    assert_eq!(
        kind_of(verify(&class, 0).unwrap_err()),
        VerifyErrorKind::InvalidTarget(3)
    );
}

#[test]
fn two_rets_for_one_subroutine() {
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
    let class = class_of("()V", asm.finish(1, 1));
    assert_eq!(
        kind_of(verify(&class, 0).unwrap_err()),
        VerifyErrorKind::MultipleReturns
    );
}

#[test]
fn nested_subroutines() {
    // The inner subroutine returns straight out of the outer one too
    let mut asm = Assembler::new();
    asm.jump(JSR, "outer")
        .op(RETURN)
        .label("outer")
        .op(ASTORE_0)
        .jump(JSR, "inner")
        .op(RETURN)
        .label("inner")
        .op(ASTORE_1)
        .op_with(RET, &[0]);
    let class = class_of("()V", asm.finish(1, 2));
    let verified = verify(&class, 0).unwrap();
    assert_eq!(verified.frames_popped(10), Some(2));
    assert_eq!(verified.ret_for_jsr(0), Some(10));
    assert_eq!(verified.subroutines().len(), 2);
}

/// Type checker which rejects everything, counting how often it runs
struct Rejecting(Cell<usize>);

impl MethodVerifier for Rejecting {
    fn verify_method(&self, _method: &VerifiableMethod) -> Result<Verification, VerifyError> {
        self.0.set(self.0.get() + 1);
        Err(VerifyError::from(VerifyErrorKind::BadReturn))
    }
}

#[test]
fn class_version_policy() {
    let rejecting = Rejecting(Cell::new(0));
    let verifier = ClassVerifier::new().with_type_checker(&rejecting);
    let methods = || {
        vec![
            TestMethod::new("f", "()V", two_call_sites().finish(1, 3)),
            TestMethod::new("g", "()V", Assembler::new().op(RETURN).finish(0, 0)),
        ]
    };

    let old = class_with(Version::JAVA5, methods());
    let outcomes = verifier.verify_class(&old);
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.iter().all(|outcome| outcome.outcome.is_ok()));
    assert_eq!(rejecting.0.get(), 0);

    let fallback = class_with(Version::JAVA6, methods());
    let outcomes = verifier.verify_class(&fallback);
    assert_eq!(outcomes[0].method, "Test.f()V");
    let inferred = outcomes[0].outcome.as_ref().unwrap().inferred().unwrap();
    assert!(inferred.has_subroutines());
    assert_eq!(rejecting.0.get(), 2);

    // Without fallback, the first failure stops verification unless asked to keep going
    let strict = class_with(Version::JAVA7, methods());
    assert_eq!(verifier.verify_class(&strict).len(), 1);
    let outcomes = ClassVerifier::new()
        .with_type_checker(&rejecting)
        .keep_going(true)
        .verify_class(&strict);
    assert_eq!(outcomes.len(), 2);
    assert_eq!(outcomes[1].index, 1);
    assert!(outcomes.iter().all(|outcome| outcome.outcome.is_err()));
}

#[test]
fn call_site_widened_after_return() {
    // Local 1 holds `null` by the second time around the loop, so it can't be loaded as an int
    // after the subroutine returns, even though it was an int the first time
    let mut asm = Assembler::new();
    asm.op(FCONST_0) // 0
        .op(FSTORE_1) // 1
        .jump(JSR, "sub") // 2
        .op(ICONST_0) // 5
        .op(ISTORE_1) // 6
        .label("loop")
        .jump(JSR, "sub") // 7
        .op(ILOAD_1) // 10
        .op(POP) // 11
        .op(ACONST_NULL) // 12
        .op(ASTORE_1) // 13
        .jump(GOTO, "loop") // 14
        .label("sub")
        .op(ASTORE_0) // 17
        .op_with(RET, &[0]); // 18
    let class = class_of("()V", asm.finish(1, 2));
    assert!(matches!(
        kind_of(verify(&class, 0).unwrap_err()),
        VerifyErrorKind::IncompatibleType { .. }
    ));
}

#[test]
fn fall_through_into_branch_target() {
    // `shared` is first reached by falling through, and only later by a `goto` from inside the
    // subroutine, so it runs outside of any subroutine
    let mut asm = Assembler::new();
    asm.op(ILOAD_0) // 0
        .jump(IFEQ, "call") // 1
        .label("shared")
        .op(ILOAD_0) // 4
        .op(IRETURN) // 5
        .label("call")
        .op_with(IINC, &[0, 5]) // 6
        .jump(JSR, "sub") // 9
        .op(ICONST_0) // 12
        .op(IRETURN) // 13
        .label("sub")
        .op(ASTORE_1) // 14
        .jump(GOTO, "shared"); // 15
    let class = class_of("(I)I", asm.finish(1, 2));
    let verified = verify(&class, 0).unwrap();

    let shared = verified.type_state_at(4).unwrap();
    assert!(shared.frame.subroutines.is_top());
    assert!(verified.subroutines_at(2).unwrap().is_top());
    assert_eq!(verified.subroutines_at(8).unwrap().depth(), 1);
    assert!(!verified.is_visited(6));
}
