//! Rewrite whole class files so none of their methods use subroutines
//!
//! Every method with code is verified (see [`ClassVerifier`] for how the strategy is chosen). The
//! ones verified by type inference that contain a `jsr` then have their subroutines inlined and
//! their `Code` attribute replaced. Everything else about the class is written back unchanged.

mod errors;
mod settings;

pub use errors::*;
pub use settings::*;

use crate::jvm;
use crate::jvm::class_file::{ClassFile, STACK_MAP_TABLE};
use crate::jvm::inliner::inline_subroutines;
use crate::jvm::verifier::{describe_method, ClassVerifier, MethodVerifier, VerifiableMethod};
use std::path::Path;

/// What happened to the methods of one class
#[derive(Debug, Default)]
pub struct RewriteReport {
    /// Methods whose code was replaced
    pub rewritten: Vec<String>,

    /// Number of methods left as they were (no code, no subroutines, or type checked)
    pub unchanged: usize,

    /// Methods which failed (only when `keep_going` is set, otherwise the first failure is
    /// returned as an error)
    pub failures: Vec<Error>,
}

pub struct ClassRewriter<'v> {
    settings: Settings,
    verifier: ClassVerifier<'v>,
}

impl<'v> ClassRewriter<'v> {
    pub fn new(settings: Settings) -> ClassRewriter<'v> {
        let verifier = ClassVerifier::new()
            .allow_fallback(settings.allow_fallback)
            .keep_going(settings.keep_going);
        ClassRewriter { settings, verifier }
    }

    /// Type check classes of version 50 and up with this strategy
    pub fn with_type_checker(mut self, type_checker: &'v dyn MethodVerifier) -> Self {
        self.verifier = self.verifier.with_type_checker(type_checker);
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Rewrite every method of a class in place
    pub fn rewrite_class(&self, class: &mut ClassFile) -> Result<RewriteReport, Error> {
        let mut report = RewriteReport::default();
        for index in 0..class.methods.len() {
            let method = describe_method(class, index);
            match self.rewrite_method(class, index, &method) {
                Ok(true) => report.rewritten.push(method),
                Ok(false) => report.unchanged += 1,
                Err(source) => {
                    log::error!("{}: {}", method, source);
                    let err = Error::Method { method, source };
                    if !self.settings.keep_going {
                        return Err(err);
                    }
                    report.failures.push(err);
                }
            }
        }
        Ok(report)
    }

    /// Read a class file, rewrite it, and save it (possibly to the same path)
    pub fn rewrite_file(
        &self,
        input: impl AsRef<Path>,
        output: impl AsRef<Path>,
    ) -> Result<RewriteReport, Error> {
        let input = input.as_ref();
        let output = output.as_ref();

        log::info!("Reading '{}'", input.display());
        let mut class = ClassFile::from_path(input)?;
        let report = self.rewrite_class(&mut class)?;

        log::info!(
            "Writing '{}' ({} rewritten, {} unchanged, {} failed)",
            output.display(),
            report.rewritten.len(),
            report.unchanged,
            report.failures.len()
        );
        class.save_to_path(output, true)?;
        Ok(report)
    }

    /// Rewrite one method, returning whether its code was replaced
    fn rewrite_method(
        &self,
        class: &mut ClassFile,
        index: usize,
        name: &str,
    ) -> Result<bool, jvm::Error> {
        let code = match class.methods[index].code(&class.constants)? {
            Some(code) => code,
            None => return Ok(false),
        };

        let verification = {
            let method = VerifiableMethod::new(class, &class.methods[index], &code)?;
            self.verifier.verify_method(class.version, &method)?
        };
        let verified = match verification.inferred() {
            Some(verified) => verified,
            None => return Ok(false),
        };
        if !verified.has_subroutines() && !self.settings.inline_all {
            return Ok(false);
        }

        let has_stack_map_table = code.attributes.iter().any(|attribute| {
            matches!(attribute.name(&class.constants), Ok(found) if found == STACK_MAP_TABLE)
        });
        if has_stack_map_table {
            if !self.settings.drop_stack_map_tables {
                log::warn!("Leaving {} unchanged since it has a StackMapTable", name);
                return Ok(false);
            }
            log::warn!("Dropping the StackMapTable of {}", name);
        }

        let rewritten = inline_subroutines(verified, &code, &class.constants)?;
        log::debug!(
            "Rewrote {} ({} bytes of code became {})",
            name,
            code.code.len(),
            rewritten.code.len()
        );
        class.methods[index].replace_code(&rewritten, &mut class.constants)?;
        Ok(true)
    }
}
