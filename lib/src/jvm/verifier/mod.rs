//! Bytecode verification by type inference, with support for subroutines
//!
//! For any specific instruction inside a method body, the stack and locals should have the same
//! structure, regardless of which control flow was used to reach that instruction. This structure
//! is referred to as the _frame_ (represented using [`Frame`]). The "types" used in verification
//! (represented using [`VerificationType`]) are slightly augmented to take into account
//! initialization, null, and the return addresses pushed by `jsr`.
//!
//! Older class files don't come with stack map tables, so the frames at every jump target have to
//! be inferred. [`TypeInferencingVerifier`] does this with a fix-point algorithm: a worklist of
//! positions, each with a [`TypeState`] that only ever moves up the type lattice as more incoming
//! frames get merged in.
//!
//! `jsr` and `ret` make this harder. A subroutine can be called from many places, and each `ret`
//! has to return to the caller it was reached from. Every frame therefore also tracks which
//! subroutines are active (a [`SubroutineFrame`]) and the verifier records, for every subroutine
//! in the [`SubroutineRegistry`], the locals it touches and the places it can return to. Locals a
//! subroutine never touches come back from the caller unchanged when it returns.
//!
//! [`ClassVerifier`] decides which strategy applies to a method based on the class file version.
//!
//! [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.10.2

mod class_verifier;
mod frame;
mod inferencing;
mod method;
mod resolver;
mod subroutine;
mod type_state;
mod types;

pub use class_verifier::*;
pub use frame::*;
pub use inferencing::*;
pub use method::*;
pub use resolver::*;
pub use subroutine::*;
pub use type_state::*;
pub use types::*;
