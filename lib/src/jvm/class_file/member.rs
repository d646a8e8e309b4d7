use crate::jvm::class_file::{Attribute, AttributeLike, Code, ConstantIndex, ConstantPool};
use crate::jvm::{ClassFormatError, MethodAccessFlags, Parse, Serialize};
use byteorder::{ReadBytesExt, WriteBytesExt};

/// Field or method declared by a class or interface
///
/// Fields and methods share the same layout in class files.
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.6
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub access_flags: u16,
    pub name_index: ConstantIndex,
    pub descriptor_index: ConstantIndex,
    pub attributes: Vec<Attribute>,
}

impl Member {
    pub fn name<'a>(&self, constants: &'a ConstantPool) -> Result<&'a str, ClassFormatError> {
        constants.utf8(self.name_index)
    }

    pub fn descriptor<'a>(&self, constants: &'a ConstantPool) -> Result<&'a str, ClassFormatError> {
        constants.utf8(self.descriptor_index)
    }

    /// Interpret the access flags as method flags
    pub fn method_access_flags(&self) -> MethodAccessFlags {
        MethodAccessFlags::from_bits_truncate(self.access_flags)
    }

    /// Position of the first attribute of the given kind
    pub fn find_attribute<A: AttributeLike>(&self, constants: &ConstantPool) -> Option<usize> {
        self.attributes
            .iter()
            .position(|attribute| attribute.is::<A>(constants))
    }

    /// Decode the method body (if there is one)
    pub fn code(&self, constants: &ConstantPool) -> Result<Option<Code>, ClassFormatError> {
        match self.find_attribute::<Code>(constants) {
            None => Ok(None),
            Some(idx) => self.attributes[idx].decode().map(Some),
        }
    }

    /// Replace the method body, keeping the position of the existing `Code` attribute
    pub fn replace_code(
        &mut self,
        code: &Code,
        constants: &mut ConstantPool,
    ) -> std::io::Result<()> {
        let encoded = Attribute::encode(code, constants)?;
        match self.find_attribute::<Code>(constants) {
            Some(idx) => self.attributes[idx] = encoded,
            None => self.attributes.push(encoded),
        }
        Ok(())
    }
}

impl Serialize for Member {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.access_flags.serialize(writer)?;
        self.name_index.serialize(writer)?;
        self.descriptor_index.serialize(writer)?;
        self.attributes.serialize(writer)?;
        Ok(())
    }
}

impl Parse for Member {
    fn parse<R: ReadBytesExt>(reader: &mut R) -> Result<Self, ClassFormatError> {
        Ok(Member {
            access_flags: u16::parse(reader)?,
            name_index: ConstantIndex::parse(reader)?,
            descriptor_index: ConstantIndex::parse(reader)?,
            attributes: Vec::parse(reader)?,
        })
    }
}
