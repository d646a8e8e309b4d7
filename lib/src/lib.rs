//! Verify JVM methods that use `jsr`/`ret` subroutines, and inline those subroutines away
//!
//! The [`jvm`] module has the class file model, the type-inferencing verifier (which understands
//! subroutines the way old JVMs did), and the subroutine inliner. The [`rewrite`] module strings
//! these together to rewrite whole class files.

pub mod jvm;
pub mod rewrite;
pub mod util;
