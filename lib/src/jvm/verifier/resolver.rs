use super::VerificationType;
use crate::jvm::class_file::{Constant, ConstantIndex, ConstantPool};
use crate::jvm::{
    BinaryName, ClassFormatError, FieldType, MethodDescriptor, Name, ParseDescriptor, RefType,
    UnqualifiedName, VerifyErrorKind,
};

/// Method referenced by an `invoke*` instruction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedMethod {
    pub class: RefType<BinaryName>,
    pub name: UnqualifiedName,
    pub descriptor: MethodDescriptor<BinaryName>,
}

/// Source of the types referenced by instruction operands
///
/// Every index is a constant pool index, and failures are reported as verification errors since
/// they are only discovered when interpreting the instruction using them.
pub trait ConstantResolver {
    /// Type of the value pushed by `ldc`, `ldc_w`, or `ldc2_w`
    fn loadable(&self, index: u16) -> Result<VerificationType, VerifyErrorKind>;

    /// Class referenced by `new`, `checkcast`, `anewarray`, etc.
    fn class(&self, index: u16) -> Result<RefType<BinaryName>, VerifyErrorKind>;

    /// Type of a field referenced by `getfield`, `putstatic`, etc.
    fn field(&self, index: u16) -> Result<FieldType<BinaryName>, VerifyErrorKind>;

    fn method(&self, index: u16) -> Result<ResolvedMethod, VerifyErrorKind>;

    /// Call site type of an `invokedynamic`
    fn invoke_dynamic(&self, index: u16) -> Result<MethodDescriptor<BinaryName>, VerifyErrorKind>;
}

impl ConstantResolver for ConstantPool {
    fn loadable(&self, index: u16) -> Result<VerificationType, VerifyErrorKind> {
        let typ = match self.get(ConstantIndex(index)) {
            Some(Constant::Integer(_)) => VerificationType::Integer,
            Some(Constant::Float(_)) => VerificationType::Float,
            Some(Constant::Long(_)) => VerificationType::Long,
            Some(Constant::Double(_)) => VerificationType::Double,
            Some(Constant::String(_)) => VerificationType::object(BinaryName::STRING),
            Some(Constant::Class(_)) => VerificationType::object(BinaryName::CLASS),
            Some(Constant::MethodHandle { .. }) => {
                VerificationType::object(BinaryName::METHODHANDLE)
            }
            Some(Constant::MethodType { .. }) => VerificationType::object(BinaryName::METHODTYPE),
            Some(Constant::Dynamic { name_and_type, .. }) => {
                let (_, descriptor) = self.name_and_type(*name_and_type).map_err(bad_constant)?;
                VerificationType::from(parse_descriptor::<FieldType<BinaryName>>(descriptor)?)
            }
            Some(other) => {
                return Err(VerifyErrorKind::BadConstant(format!(
                    "{} constant at index {} is not loadable",
                    other.kind_name(),
                    index
                )))
            }
            None => {
                return Err(VerifyErrorKind::BadConstant(format!(
                    "no constant at index {}",
                    index
                )))
            }
        };
        Ok(typ)
    }

    fn class(&self, index: u16) -> Result<RefType<BinaryName>, VerifyErrorKind> {
        let name = self.class_name(ConstantIndex(index)).map_err(bad_constant)?;
        parse_class_name(name)
    }

    fn field(&self, index: u16) -> Result<FieldType<BinaryName>, VerifyErrorKind> {
        let member = self.field_ref(ConstantIndex(index)).map_err(bad_constant)?;
        parse_descriptor(member.descriptor)
    }

    fn method(&self, index: u16) -> Result<ResolvedMethod, VerifyErrorKind> {
        let member = self.method_ref(ConstantIndex(index)).map_err(bad_constant)?;
        Ok(ResolvedMethod {
            class: parse_class_name(member.class)?,
            name: UnqualifiedName::from_string(member.name.to_owned())
                .map_err(VerifyErrorKind::BadDescriptor)?,
            descriptor: parse_descriptor(member.descriptor)?,
        })
    }

    fn invoke_dynamic(&self, index: u16) -> Result<MethodDescriptor<BinaryName>, VerifyErrorKind> {
        match self.get(ConstantIndex(index)) {
            Some(Constant::InvokeDynamic { name_and_type, .. }) => {
                let (_, descriptor) = self.name_and_type(*name_and_type).map_err(bad_constant)?;
                parse_descriptor(descriptor)
            }
            _ => Err(bad_constant(ClassFormatError::BadConstantIndex {
                index,
                expected: "InvokeDynamic",
            })),
        }
    }
}

fn bad_constant(err: ClassFormatError) -> VerifyErrorKind {
    VerifyErrorKind::BadConstant(err.to_string())
}

fn parse_descriptor<D: ParseDescriptor>(descriptor: &str) -> Result<D, VerifyErrorKind> {
    D::parse(descriptor).map_err(|_| VerifyErrorKind::BadDescriptor(descriptor.to_owned()))
}

fn parse_class_name(name: &str) -> Result<RefType<BinaryName>, VerifyErrorKind> {
    RefType::from_class_name(name).map_err(|_| VerifyErrorKind::BadDescriptor(name.to_owned()))
}
