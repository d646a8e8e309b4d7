use super::{TypeInferencingVerifier, VerifiableMethod, VerifiedMethod};
use crate::jvm::class_file::{ClassFile, Version};
use crate::jvm::{Error, VerifyError};

/// Strategy for verifying one method
pub trait MethodVerifier {
    fn verify_method(&self, method: &VerifiableMethod) -> Result<Verification, VerifyError>;
}

/// How a method was accepted
#[derive(Debug)]
pub enum Verification {
    /// Accepted by checking against its stack map table
    TypeChecked,

    /// Accepted by inferring its types (the analysis is kept, for inlining subroutines)
    TypeInferred(VerifiedMethod),
}

impl Verification {
    /// Analysis from type inferencing (if that is how the method was verified)
    pub fn inferred(&self) -> Option<&VerifiedMethod> {
        match self {
            Verification::TypeChecked => None,
            Verification::TypeInferred(verified) => Some(verified),
        }
    }
}

impl MethodVerifier for TypeInferencingVerifier {
    fn verify_method(&self, method: &VerifiableMethod) -> Result<Verification, VerifyError> {
        TypeInferencingVerifier::verify(method).map(Verification::TypeInferred)
    }
}

/// Outcome of verifying one method of a class
#[derive(Debug)]
pub struct MethodVerification {
    /// Index of the method in the class file
    pub index: usize,

    /// Class, name, and descriptor (or whatever could be read of them)
    pub method: String,
    pub outcome: Result<Verification, Error>,
}

/// Verifies all of the methods in a class, choosing the strategy from the class file version
///
///   - before version 50, methods are always verified by type inference
///   - version 50 methods are type checked, falling back to type inference if that fails (when
///     fallback is allowed)
///   - after version 50, methods are only type checked
///
/// When there is no type checking strategy, every method is verified by type inference.
pub struct ClassVerifier<'v> {
    type_checker: Option<&'v dyn MethodVerifier>,
    allow_fallback: bool,
    keep_going: bool,
}

impl<'v> ClassVerifier<'v> {
    pub fn new() -> ClassVerifier<'v> {
        ClassVerifier {
            type_checker: None,
            allow_fallback: true,
            keep_going: false,
        }
    }

    pub fn with_type_checker(mut self, type_checker: &'v dyn MethodVerifier) -> Self {
        self.type_checker = Some(type_checker);
        self
    }

    pub fn allow_fallback(mut self, allow_fallback: bool) -> Self {
        self.allow_fallback = allow_fallback;
        self
    }

    pub fn keep_going(mut self, keep_going: bool) -> Self {
        self.keep_going = keep_going;
        self
    }

    /// Verify a method from a class with the given version
    pub fn verify_method(
        &self,
        version: Version,
        method: &VerifiableMethod,
    ) -> Result<Verification, VerifyError> {
        let type_checker = match self.type_checker {
            Some(type_checker) if version >= Version::JAVA6 => type_checker,
            _ => return TypeInferencingVerifier.verify_method(method),
        };

        match type_checker.verify_method(method) {
            Ok(verification) => Ok(verification),
            Err(err) if version.major == Version::JAVA6.major && self.allow_fallback => {
                log::info!(
                    "Type checking {} failed ({}), falling back to type inference",
                    method,
                    err
                );
                TypeInferencingVerifier.verify_method(method)
            }
            Err(err) => Err(err),
        }
    }

    /// Verify every method with code in a class
    ///
    /// Unless `keep_going` is set, this stops at the first method that fails.
    pub fn verify_class(&self, class: &ClassFile) -> Vec<MethodVerification> {
        let mut outcomes = vec![];
        for (index, member) in class.methods.iter().enumerate() {
            let method = describe_method(class, index);
            let outcome = match member.code(&class.constants) {
                Ok(None) => continue,
                Ok(Some(code)) => VerifiableMethod::new(class, member, &code).and_then(
                    |verifiable| {
                        self.verify_method(class.version, &verifiable)
                            .map_err(Error::from)
                    },
                ),
                Err(err) => Err(Error::from(err)),
            };

            let failed = outcome.is_err();
            if let Err(err) = &outcome {
                log::error!("{}: {}", method, err);
            }
            outcomes.push(MethodVerification {
                index,
                method,
                outcome,
            });
            if failed && !self.keep_going {
                break;
            }
        }
        outcomes
    }
}

impl<'v> Default for ClassVerifier<'v> {
    fn default() -> Self {
        ClassVerifier::new()
    }
}

/// Human readable `Class.name(descriptor)` for a method, for use in messages
pub fn describe_method(class: &ClassFile, index: usize) -> String {
    let class_name = class.name().unwrap_or("<unknown class>");
    match class.methods.get(index) {
        Some(member) => format!(
            "{}.{}{}",
            class_name,
            member.name(&class.constants).unwrap_or("<unknown method>"),
            member.descriptor(&class.constants).unwrap_or("")
        ),
        None => format!("{}.<method #{}>", class_name, index),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::class_file::Code;
    use crate::jvm::code::opcodes::*;
    use crate::jvm::verifier::ConstantResolver;
    use crate::jvm::class_file::ConstantPool;
    use crate::jvm::{BinaryName, MethodDescriptor, Name, UnqualifiedName, VerifyErrorKind};
    use std::cell::Cell;

    /// Type checker which fails every method, counting how often it is used
    struct Rejecting(Cell<usize>);

    impl MethodVerifier for Rejecting {
        fn verify_method(&self, _method: &VerifiableMethod) -> Result<Verification, VerifyError> {
            self.0.set(self.0.get() + 1);
            Err(VerifyError::from(VerifyErrorKind::BadReturn))
        }
    }

    fn with_method<T>(check: impl FnOnce(&VerifiableMethod) -> T) -> T {
        let constants = ConstantPool::new();
        let code = Code {
            max_stack: 0,
            max_locals: 0,
            code: vec![RETURN],
            exception_table: vec![],
            attributes: vec![],
        };
        let method = VerifiableMethod {
            class_name: BinaryName::from_string(String::from("Test")).unwrap(),
            name: UnqualifiedName::from_string(String::from("run")).unwrap(),
            descriptor: MethodDescriptor {
                parameters: vec![],
                return_type: None,
            },
            is_static: true,
            code: &code,
            constants: &constants as &dyn ConstantResolver,
        };
        check(&method)
    }

    #[test]
    fn version_policy() {
        let rejecting = Rejecting(Cell::new(0));
        let verifier = ClassVerifier::new().with_type_checker(&rejecting);

        with_method(|method| {
            // Old classes never get type checked
            let old = verifier.verify_method(Version::JAVA5, method).unwrap();
            assert!(old.inferred().is_some());
            assert_eq!(rejecting.0.get(), 0);

            // Version 50 falls back
            let fallback = verifier.verify_method(Version::JAVA6, method).unwrap();
            assert!(fallback.inferred().is_some());
            assert_eq!(rejecting.0.get(), 1);

            // Newer versions do not
            assert!(verifier.verify_method(Version::JAVA7, method).is_err());
            assert_eq!(rejecting.0.get(), 2);
        });

        let no_fallback = ClassVerifier::new()
            .with_type_checker(&rejecting)
            .allow_fallback(false);
        with_method(|method| {
            assert!(no_fallback.verify_method(Version::JAVA6, method).is_err());
        });
    }

    #[test]
    fn without_type_checker() {
        let verifier = ClassVerifier::default();
        with_method(|method| {
            let verification = verifier.verify_method(Version::JAVA7, method).unwrap();
            assert!(!verification.inferred().unwrap().has_subroutines());
        });
    }
}
