//! Read, verify, and rewrite JVM classes
//!
//! ### Example
//!
//! Consider an old-style `try`/`finally` compiled with `jsr`/`ret`:
//!
//! ```java,ignore,no_run
//! static int f(int x) {
//!     try {
//!         return x;
//!     } finally {
//!         x = 0;
//!     }
//! }
//! ```
//!
//! Verifying such a method and rewriting it so it no longer uses subroutines can be done as
//! follows:
//!
//! ```no_run
//! use unjsr::jvm::class_file::ClassFile;
//! use unjsr::jvm::verifier::{TypeInferencingVerifier, VerifiableMethod};
//! use unjsr::jvm::inliner::inline_subroutines;
//! use unjsr::jvm::*;
//!
//! # fn rewrite_class() -> Result<(), Error> {
//! let mut class = ClassFile::from_path("Old.class")?;
//! for index in 0..class.methods.len() {
//!     let method = &class.methods[index];
//!     let code = match method.code(&class.constants)? {
//!         Some(code) => code,
//!         None => continue,
//!     };
//!     let verifiable = VerifiableMethod::new(&class, method, &code)?;
//!     let verified = TypeInferencingVerifier::verify(&verifiable)?;
//!     if verified.has_subroutines() {
//!         let rewritten = inline_subroutines(&verified, &code, &class.constants)?;
//!         class.methods[index].replace_code(&rewritten, &mut class.constants)?;
//!     }
//! }
//! class.save_to_path("Old.class", false)?;
//! # Ok(())
//! # }
//! ```

mod access_flags;
mod binary_format;
pub mod class_file;
pub mod code;
mod descriptors;
mod errors;
pub mod inliner;
mod names;
pub mod verifier;

pub use access_flags::*;
pub use binary_format::*;
pub use descriptors::*;
pub use errors::*;
pub use names::*;
