use crate::jvm::class_file::{ConstantIndex, ConstantPool};
use crate::jvm::{parse_bytes, ClassFormatError, Parse, Serialize};
use byteorder::{ReadBytesExt, WriteBytesExt};

/// Attributes (used in classes, fields, methods, and even on some attributes)
///
/// Every attribute is stored as its name and its raw bytes. The handful that matter for rewriting
/// method bodies can be decoded into one of the [`AttributeLike`] structures, the rest are carried
/// through unchanged.
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.7
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name_index: ConstantIndex,
    pub info: Vec<u8>,
}

impl Attribute {
    /// Name of the attribute, as found in the constant pool
    pub fn name<'a>(&self, constants: &'a ConstantPool) -> Result<&'a str, ClassFormatError> {
        constants.utf8(self.name_index)
    }

    /// Check if this attribute is a particular kind of attribute
    pub fn is<A: AttributeLike>(&self, constants: &ConstantPool) -> bool {
        matches!(self.name(constants), Ok(name) if name == A::NAME)
    }

    /// Decode the attribute contents
    pub fn decode<A: AttributeLike>(&self) -> Result<A, ClassFormatError> {
        let mut info: &[u8] = &self.info;
        let decoded = A::parse(&mut info)?;
        if !info.is_empty() {
            return Err(ClassFormatError::TrailingBytes {
                name: A::NAME,
                extra: info.len(),
            });
        }
        Ok(decoded)
    }

    /// Encode an attribute, adding its name to the constant pool if needed
    pub fn encode<A: AttributeLike>(
        attribute: &A,
        constants: &mut ConstantPool,
    ) -> Result<Attribute, std::io::Error> {
        let name_index = constants.get_utf8(A::NAME);
        let mut info = vec![];
        attribute.serialize(&mut info)?;
        Ok(Attribute { name_index, info })
    }
}

impl Serialize for Attribute {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.name_index.serialize(writer)?;

        // Attribute info length is 4 bytes
        (self.info.len() as u32).serialize(writer)?;
        writer.write_all(&self.info)?;

        Ok(())
    }
}

impl Parse for Attribute {
    fn parse<R: ReadBytesExt>(reader: &mut R) -> Result<Self, ClassFormatError> {
        let name_index = ConstantIndex::parse(reader)?;
        let len = u32::parse(reader)?;
        let info = parse_bytes(reader, len as usize)?;
        Ok(Attribute { name_index, info })
    }
}

/// Attributes are all stored in the same way (see `Attribute`), but internally
/// they represent very different things. This trait is implemented by things
/// which can be turned into attributes and back.
pub trait AttributeLike: Serialize + Parse {
    /// Name of the attribute
    const NAME: &'static str;
}

/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.7.3
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Code {
    pub max_stack: u16,
    pub max_locals: u16,
    pub code: Vec<u8>,
    pub exception_table: Vec<ExceptionHandler>,
    pub attributes: Vec<Attribute>,
}

impl Serialize for Code {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.max_stack.serialize(writer)?;
        self.max_locals.serialize(writer)?;
        (self.code.len() as u32).serialize(writer)?;
        writer.write_all(&self.code)?;
        self.exception_table.serialize(writer)?;
        self.attributes.serialize(writer)?;
        Ok(())
    }
}

impl Parse for Code {
    fn parse<R: ReadBytesExt>(reader: &mut R) -> Result<Self, ClassFormatError> {
        let max_stack = u16::parse(reader)?;
        let max_locals = u16::parse(reader)?;
        let code_len = u32::parse(reader)?;
        let code = parse_bytes(reader, code_len as usize)?;
        let exception_table = Vec::parse(reader)?;
        let attributes = Vec::parse(reader)?;
        Ok(Code {
            max_stack,
            max_locals,
            code,
            exception_table,
            attributes,
        })
    }
}

impl AttributeLike for Code {
    const NAME: &'static str = "Code";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionHandler {
    /// Start of exception handler range (inclusive)
    pub start_pc: u16,

    /// End of exception handler range (exclusive)
    pub end_pc: u16,

    /// Start of the exception handler
    pub handler_pc: u16,

    /// Class of exceptions caught (`0` catches everything)
    pub catch_type: ConstantIndex,
}

impl Serialize for ExceptionHandler {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.start_pc.serialize(writer)?;
        self.end_pc.serialize(writer)?;
        self.handler_pc.serialize(writer)?;
        self.catch_type.serialize(writer)?;
        Ok(())
    }
}

impl Parse for ExceptionHandler {
    fn parse<R: ReadBytesExt>(reader: &mut R) -> Result<Self, ClassFormatError> {
        Ok(ExceptionHandler {
            start_pc: u16::parse(reader)?,
            end_pc: u16::parse(reader)?,
            handler_pc: u16::parse(reader)?,
            catch_type: ConstantIndex::parse(reader)?,
        })
    }
}

/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.7.12
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineNumberTable(pub Vec<LineNumber>);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineNumber {
    pub start_pc: u16,
    pub line_number: u16,
}

impl AttributeLike for LineNumberTable {
    const NAME: &'static str = "LineNumberTable";
}

impl Serialize for LineNumberTable {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.0.serialize(writer)
    }
}

impl Parse for LineNumberTable {
    fn parse<R: ReadBytesExt>(reader: &mut R) -> Result<Self, ClassFormatError> {
        Ok(LineNumberTable(Vec::parse(reader)?))
    }
}

impl Serialize for LineNumber {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.start_pc.serialize(writer)?;
        self.line_number.serialize(writer)?;
        Ok(())
    }
}

impl Parse for LineNumber {
    fn parse<R: ReadBytesExt>(reader: &mut R) -> Result<Self, ClassFormatError> {
        Ok(LineNumber {
            start_pc: u16::parse(reader)?,
            line_number: u16::parse(reader)?,
        })
    }
}

/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.7.13
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalVariableTable(pub Vec<LocalVariable>);

/// Same layout as `LocalVariableTable`, except the descriptor is a generic signature
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.7.14
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalVariableTypeTable(pub Vec<LocalVariable>);

/// Local variable live in the code range `[start_pc, start_pc + length)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalVariable {
    pub start_pc: u16,
    pub length: u16,
    pub name_index: ConstantIndex,
    pub descriptor_index: ConstantIndex,
    pub index: u16,
}

impl AttributeLike for LocalVariableTable {
    const NAME: &'static str = "LocalVariableTable";
}

impl AttributeLike for LocalVariableTypeTable {
    const NAME: &'static str = "LocalVariableTypeTable";
}

impl Serialize for LocalVariableTable {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.0.serialize(writer)
    }
}

impl Parse for LocalVariableTable {
    fn parse<R: ReadBytesExt>(reader: &mut R) -> Result<Self, ClassFormatError> {
        Ok(LocalVariableTable(Vec::parse(reader)?))
    }
}

impl Serialize for LocalVariableTypeTable {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.0.serialize(writer)
    }
}

impl Parse for LocalVariableTypeTable {
    fn parse<R: ReadBytesExt>(reader: &mut R) -> Result<Self, ClassFormatError> {
        Ok(LocalVariableTypeTable(Vec::parse(reader)?))
    }
}

impl Serialize for LocalVariable {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.start_pc.serialize(writer)?;
        self.length.serialize(writer)?;
        self.name_index.serialize(writer)?;
        self.descriptor_index.serialize(writer)?;
        self.index.serialize(writer)?;
        Ok(())
    }
}

impl Parse for LocalVariable {
    fn parse<R: ReadBytesExt>(reader: &mut R) -> Result<Self, ClassFormatError> {
        Ok(LocalVariable {
            start_pc: u16::parse(reader)?,
            length: u16::parse(reader)?,
            name_index: ConstantIndex::parse(reader)?,
            descriptor_index: ConstantIndex::parse(reader)?,
            index: u16::parse(reader)?,
        })
    }
}

/// Only the name matters: a `StackMapTable` is dropped when its method is rewritten
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.7.4
pub const STACK_MAP_TABLE: &str = "StackMapTable";

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn code_attribute() {
        let mut constants = ConstantPool::new();
        let lines = LineNumberTable(vec![
            LineNumber {
                start_pc: 0,
                line_number: 3,
            },
            LineNumber {
                start_pc: 2,
                line_number: 4,
            },
        ]);
        let code = Code {
            max_stack: 1,
            max_locals: 1,
            code: vec![0x04, 0x3b, 0xb1],
            exception_table: vec![ExceptionHandler {
                start_pc: 0,
                end_pc: 2,
                handler_pc: 2,
                catch_type: ConstantIndex(0),
            }],
            attributes: vec![Attribute::encode(&lines, &mut constants).unwrap()],
        };
        let attribute = Attribute::encode(&code, &mut constants).unwrap();
        assert!(attribute.is::<Code>(&constants));
        assert!(!attribute.is::<LineNumberTable>(&constants));

        // Stack, locals, code, one handler, then one attribute holding two line entries
        assert_eq!(
            attribute.info.len(),
            2 + 2 + (4 + 3) + (2 + 8) + (2 + 6 + 2 + 2 * 4)
        );

        let decoded: Code = attribute.decode().unwrap();
        assert_eq!(decoded, code);
        let decoded_lines: LineNumberTable = decoded.attributes[0].decode().unwrap();
        assert_eq!(decoded_lines, lines);
    }

    #[test]
    fn trailing_bytes() {
        let attribute = Attribute {
            name_index: ConstantIndex(1),
            info: vec![0, 0, 0xff],
        };
        assert!(matches!(
            attribute.decode::<LineNumberTable>(),
            Err(ClassFormatError::TrailingBytes { extra: 1, .. })
        ));
    }
}
