use crate::jvm::{ClassFormatError, Parse, Serialize};
use crate::util::{Offset, OffsetResult, OffsetVec, Width};
use byteorder::{ReadBytesExt, WriteBytesExt};

/// Index into the constant pool
#[derive(Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Debug)]
pub struct ConstantIndex(pub u16);

impl Serialize for ConstantIndex {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.0.serialize(writer)
    }
}

impl Parse for ConstantIndex {
    fn parse<R: ReadBytesExt>(reader: &mut R) -> Result<Self, ClassFormatError> {
        Ok(ConstantIndex(u16::parse(reader)?))
    }
}

/// Constants as in the constant pool
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.4
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    /// Class or an interface
    Class(ConstantIndex),

    /// Field
    FieldRef {
        class: ConstantIndex,
        name_and_type: ConstantIndex,
    },

    /// Method (this combines `Methodref` and `InterfaceMethodref`)
    MethodRef {
        class: ConstantIndex,
        name_and_type: ConstantIndex,
        is_interface: bool,
    },

    /// Constant object of type `java.lang.String`
    String(ConstantIndex),

    /// Constant primitive of type `int`
    Integer(i32),

    /// Constant primitive of type `float`
    Float(f32),

    /// Constant primitive of type `long`
    Long(i64),

    /// Constant primitive of type `double`
    Double(f64),

    /// Name and a type (eg. for a field or a method)
    NameAndType {
        name: ConstantIndex,
        descriptor: ConstantIndex,
    },

    /// Constant UTF-8 encoded raw string value
    ///
    /// Despite the name, the encoding is not quite UTF-8 (the encoding of the
    /// null character `\u{0000}` and the encoding of supplementary characters
    /// is different).
    Utf8(String),

    /// Constant object of type `java.lang.invoke.MethodHandle`
    MethodHandle {
        handle_kind: HandleKind,
        member: ConstantIndex,
    },

    /// Constant object of type `java.lang.invoke.MethodType`
    MethodType { descriptor: ConstantIndex },

    /// Dynamically-computed constant
    Dynamic {
        /// Index into the `BootstrapMethods` attribute
        bootstrap_method: u16,
        name_and_type: ConstantIndex,
    },

    /// Dynamically-computed call site
    InvokeDynamic {
        /// Index into the `BootstrapMethods` attribute
        bootstrap_method: u16,
        name_and_type: ConstantIndex,
    },

    Module(ConstantIndex),

    Package(ConstantIndex),
}

impl Constant {
    /// Short name of the constant kind, used in error messages
    pub fn kind_name(&self) -> &'static str {
        match self {
            Constant::Class(_) => "Class",
            Constant::FieldRef { .. } => "Fieldref",
            Constant::MethodRef { .. } => "Methodref",
            Constant::String(_) => "String",
            Constant::Integer(_) => "Integer",
            Constant::Float(_) => "Float",
            Constant::Long(_) => "Long",
            Constant::Double(_) => "Double",
            Constant::NameAndType { .. } => "NameAndType",
            Constant::Utf8(_) => "Utf8",
            Constant::MethodHandle { .. } => "MethodHandle",
            Constant::MethodType { .. } => "MethodType",
            Constant::Dynamic { .. } => "Dynamic",
            Constant::InvokeDynamic { .. } => "InvokeDynamic",
            Constant::Module(_) => "Module",
            Constant::Package(_) => "Package",
        }
    }
}

impl Serialize for Constant {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        match self {
            Constant::Utf8(string) => {
                1u8.serialize(writer)?;
                let buffer: Vec<u8> = encode_modified_utf8(string);
                (buffer.len() as u16).serialize(writer)?;
                writer.write_all(&buffer)?;
            }
            Constant::Integer(integer) => {
                3u8.serialize(writer)?;
                integer.serialize(writer)?;
            }
            Constant::Float(float) => {
                4u8.serialize(writer)?;
                float.serialize(writer)?;
            }
            Constant::Long(long) => {
                5u8.serialize(writer)?;
                long.serialize(writer)?;
            }
            Constant::Double(double) => {
                6u8.serialize(writer)?;
                double.serialize(writer)?;
            }
            Constant::Class(name) => {
                7u8.serialize(writer)?;
                name.serialize(writer)?;
            }
            Constant::String(utf8) => {
                8u8.serialize(writer)?;
                utf8.serialize(writer)?;
            }
            Constant::FieldRef {
                class,
                name_and_type,
            } => {
                9u8.serialize(writer)?;
                class.serialize(writer)?;
                name_and_type.serialize(writer)?;
            }
            Constant::MethodRef {
                class,
                name_and_type,
                is_interface,
            } => {
                (if !is_interface { 10u8 } else { 11u8 }).serialize(writer)?;
                class.serialize(writer)?;
                name_and_type.serialize(writer)?;
            }
            Constant::NameAndType { name, descriptor } => {
                12u8.serialize(writer)?;
                name.serialize(writer)?;
                descriptor.serialize(writer)?;
            }
            Constant::MethodHandle {
                handle_kind,
                member,
            } => {
                15u8.serialize(writer)?;
                handle_kind.serialize(writer)?;
                member.serialize(writer)?;
            }
            Constant::MethodType { descriptor } => {
                16u8.serialize(writer)?;
                descriptor.serialize(writer)?;
            }
            Constant::Dynamic {
                bootstrap_method,
                name_and_type,
            } => {
                17u8.serialize(writer)?;
                bootstrap_method.serialize(writer)?;
                name_and_type.serialize(writer)?;
            }
            Constant::InvokeDynamic {
                bootstrap_method,
                name_and_type,
            } => {
                18u8.serialize(writer)?;
                bootstrap_method.serialize(writer)?;
                name_and_type.serialize(writer)?;
            }
            Constant::Module(name) => {
                19u8.serialize(writer)?;
                name.serialize(writer)?;
            }
            Constant::Package(name) => {
                20u8.serialize(writer)?;
                name.serialize(writer)?;
            }
        };
        Ok(())
    }
}

impl Constant {
    /// Parse one constant pool entry, given the index it will occupy (for error messages)
    fn parse_at<R: ReadBytesExt>(reader: &mut R, index: u16) -> Result<Self, ClassFormatError> {
        let tag = u8::parse(reader)?;
        let constant = match tag {
            1 => {
                let len = u16::parse(reader)?;
                let bytes = crate::jvm::parse_bytes(reader, len as usize)?;
                Constant::Utf8(decode_modified_utf8(&bytes)?)
            }
            3 => Constant::Integer(i32::parse(reader)?),
            4 => Constant::Float(f32::parse(reader)?),
            5 => Constant::Long(i64::parse(reader)?),
            6 => Constant::Double(f64::parse(reader)?),
            7 => Constant::Class(ConstantIndex::parse(reader)?),
            8 => Constant::String(ConstantIndex::parse(reader)?),
            9 => Constant::FieldRef {
                class: ConstantIndex::parse(reader)?,
                name_and_type: ConstantIndex::parse(reader)?,
            },
            10 | 11 => Constant::MethodRef {
                class: ConstantIndex::parse(reader)?,
                name_and_type: ConstantIndex::parse(reader)?,
                is_interface: tag == 11,
            },
            12 => Constant::NameAndType {
                name: ConstantIndex::parse(reader)?,
                descriptor: ConstantIndex::parse(reader)?,
            },
            15 => Constant::MethodHandle {
                handle_kind: HandleKind::parse(reader)?,
                member: ConstantIndex::parse(reader)?,
            },
            16 => Constant::MethodType {
                descriptor: ConstantIndex::parse(reader)?,
            },
            17 => Constant::Dynamic {
                bootstrap_method: u16::parse(reader)?,
                name_and_type: ConstantIndex::parse(reader)?,
            },
            18 => Constant::InvokeDynamic {
                bootstrap_method: u16::parse(reader)?,
                name_and_type: ConstantIndex::parse(reader)?,
            },
            19 => Constant::Module(ConstantIndex::parse(reader)?),
            20 => Constant::Package(ConstantIndex::parse(reader)?),
            _ => return Err(ClassFormatError::BadConstantTag { tag, index }),
        };
        Ok(constant)
    }
}

/// Modified UTF-8 format used in class files.
///
/// See [this `DataInput` section for details][0]. Quoting from that section:
///
/// > The differences between this format and the standard UTF-8 format are the following:
/// >
/// >  * The null byte `\u0000` is encoded in 2-byte format rather than 1-byte, so that the encoded
/// >    strings never have embedded nulls.
/// >  * Only the 1-byte, 2-byte, and 3-byte formats are used.
/// >  * Supplementary characters are represented in the form of surrogate pairs.
///
/// [0]: https://docs.oracle.com/en/java/javase/17/docs/api/java.base/java/io/DataInput.html#modified-utf-8
pub fn encode_modified_utf8(string: &str) -> Vec<u8> {
    let mut buffer: Vec<u8> = vec![];
    for unit in string.encode_utf16() {
        let code = unit as u32;
        if code != 0 && code < 0x80 {
            buffer.push(code as u8);
        } else if code < 0x800 {
            buffer.push((code >> 6 & 0x1F) as u8 | 0b1100_0000);
            buffer.push((code & 0x3F) as u8 | 0b1000_0000);
        } else {
            // Surrogate halves land here too, each one as its own 3-byte sequence
            buffer.push((code >> 12 & 0x0F) as u8 | 0b1110_0000);
            buffer.push((code >> 6 & 0x3F) as u8 | 0b1000_0000);
            buffer.push((code & 0x3F) as u8 | 0b1000_0000);
        }
    }
    buffer
}

/// Inverse of [`encode_modified_utf8`]
///
/// Unpaired surrogates cannot be represented in a Rust `String`, so they are rejected.
pub fn decode_modified_utf8(bytes: &[u8]) -> Result<String, ClassFormatError> {
    fn continuation(byte: Option<&u8>) -> Result<u16, ClassFormatError> {
        match byte {
            Some(b) if b & 0b1100_0000 == 0b1000_0000 => Ok((b & 0x3F) as u16),
            _ => Err(ClassFormatError::BadUtf8),
        }
    }

    let mut units: Vec<u16> = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let lead = bytes[i] as u16;
        if lead != 0 && lead & 0x80 == 0 {
            units.push(lead);
            i += 1;
        } else if lead & 0b1110_0000 == 0b1100_0000 {
            let b1 = continuation(bytes.get(i + 1))?;
            units.push((lead & 0x1F) << 6 | b1);
            i += 2;
        } else if lead & 0b1111_0000 == 0b1110_0000 {
            let b1 = continuation(bytes.get(i + 1))?;
            let b2 = continuation(bytes.get(i + 2))?;
            units.push((lead & 0x0F) << 12 | b1 << 6 | b2);
            i += 3;
        } else {
            return Err(ClassFormatError::BadUtf8);
        }
    }
    char::decode_utf16(units)
        .collect::<Result<String, _>>()
        .map_err(|_| ClassFormatError::BadUtf8)
}

/// Almost all constants have width 1, except for `Constant::Long` and `Constant::Double`. From
/// JVMS §4.4.5:
///
/// > All 8-byte constants take up two entries in the constant_pool table of the class file. If a
/// > CONSTANT_Long_info or CONSTANT_Double_info structure is the item in the constant_pool table
/// > at index n, then the next usable item in the pool is located at index n+2. The constant_pool
/// > index n+1 must be valid but is considered unusable.
/// >
/// > In retrospect, making 8-byte constants take two constant pool entries was a poor choice.
impl Width for Constant {
    fn width(&self) -> usize {
        match self {
            Constant::Long(_) | Constant::Double(_) => 2,
            _ => 1,
        }
    }
}

/// Type of method handle
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-5.html#jvms-5.4.3.5-220
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq)]
pub enum HandleKind {
    GetField,
    GetStatic,
    PutField,
    PutStatic,
    InvokeVirtual,
    InvokeStatic,
    InvokeSpecial,
    NewInvokeSpecial,
    InvokeInterface,
}

impl Serialize for HandleKind {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        let byte: u8 = match self {
            HandleKind::GetField => 1,
            HandleKind::GetStatic => 2,
            HandleKind::PutField => 3,
            HandleKind::PutStatic => 4,
            HandleKind::InvokeVirtual => 5,
            HandleKind::InvokeStatic => 6,
            HandleKind::InvokeSpecial => 7,
            HandleKind::NewInvokeSpecial => 8,
            HandleKind::InvokeInterface => 9,
        };
        byte.serialize(writer)
    }
}

impl Parse for HandleKind {
    fn parse<R: ReadBytesExt>(reader: &mut R) -> Result<Self, ClassFormatError> {
        let kind = match u8::parse(reader)? {
            1 => HandleKind::GetField,
            2 => HandleKind::GetStatic,
            3 => HandleKind::PutField,
            4 => HandleKind::PutStatic,
            5 => HandleKind::InvokeVirtual,
            6 => HandleKind::InvokeStatic,
            7 => HandleKind::InvokeSpecial,
            8 => HandleKind::NewInvokeSpecial,
            9 => HandleKind::InvokeInterface,
            other => return Err(ClassFormatError::BadHandleKind(other)),
        };
        Ok(kind)
    }
}

/// Class file constant pool
///
/// Indexing starts at 1 and 8-byte constants take two indices, so this is an [`OffsetVec`]
/// underneath. Besides lookups, there are "get or insert" methods for building up pools (eg. when
/// assembling test classes).
#[derive(Debug, Clone, PartialEq)]
pub struct ConstantPool {
    constants: OffsetVec<Constant>,
}

/// Resolved `Fieldref` or `Methodref` constant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemberRef<'a> {
    pub class: &'a str,
    pub name: &'a str,
    pub descriptor: &'a str,
}

impl ConstantPool {
    pub fn new() -> ConstantPool {
        ConstantPool {
            constants: OffsetVec::new_starting_at(Offset(1)),
        }
    }

    /// Look up the constant at an index
    pub fn get(&self, index: ConstantIndex) -> Option<&Constant> {
        match self.constants.get_offset(Offset(index.0 as usize)) {
            OffsetResult::Ok(_, constant) => Some(constant),
            _ => None,
        }
    }

    /// Iterate through the constants, along with their indices
    pub fn iter(&self) -> impl Iterator<Item = (ConstantIndex, &Constant)> {
        self.constants
            .iter()
            .map(|(offset, _, constant)| (ConstantIndex(offset.0 as u16), constant))
    }

    fn bad_index(index: ConstantIndex, expected: &'static str) -> ClassFormatError {
        ClassFormatError::BadConstantIndex {
            index: index.0,
            expected,
        }
    }

    pub fn utf8(&self, index: ConstantIndex) -> Result<&str, ClassFormatError> {
        match self.get(index) {
            Some(Constant::Utf8(string)) => Ok(string),
            _ => Err(Self::bad_index(index, "Utf8")),
        }
    }

    /// Name stored in a `Class` constant
    pub fn class_name(&self, index: ConstantIndex) -> Result<&str, ClassFormatError> {
        match self.get(index) {
            Some(Constant::Class(name)) => self.utf8(*name),
            _ => Err(Self::bad_index(index, "Class")),
        }
    }

    /// Name and descriptor stored in a `NameAndType` constant
    pub fn name_and_type(&self, index: ConstantIndex) -> Result<(&str, &str), ClassFormatError> {
        match self.get(index) {
            Some(Constant::NameAndType { name, descriptor }) => {
                Ok((self.utf8(*name)?, self.utf8(*descriptor)?))
            }
            _ => Err(Self::bad_index(index, "NameAndType")),
        }
    }

    /// Class, name, and descriptor of a `Fieldref`
    pub fn field_ref(&self, index: ConstantIndex) -> Result<MemberRef<'_>, ClassFormatError> {
        match self.get(index) {
            Some(Constant::FieldRef {
                class,
                name_and_type,
            }) => self.member_ref(*class, *name_and_type),
            _ => Err(Self::bad_index(index, "Fieldref")),
        }
    }

    /// Class, name, and descriptor of a `Methodref` or `InterfaceMethodref`
    pub fn method_ref(&self, index: ConstantIndex) -> Result<MemberRef<'_>, ClassFormatError> {
        match self.get(index) {
            Some(Constant::MethodRef {
                class,
                name_and_type,
                ..
            }) => self.member_ref(*class, *name_and_type),
            _ => Err(Self::bad_index(index, "Methodref")),
        }
    }

    fn member_ref(
        &self,
        class: ConstantIndex,
        name_and_type: ConstantIndex,
    ) -> Result<MemberRef<'_>, ClassFormatError> {
        let class = self.class_name(class)?;
        let (name, descriptor) = self.name_and_type(name_and_type)?;
        Ok(MemberRef {
            class,
            name,
            descriptor,
        })
    }

    /// Find a constant that is already in the pool, or add it
    pub fn get_or_insert(&mut self, constant: Constant) -> ConstantIndex {
        let existing = self
            .constants
            .iter()
            .find(|(_, _, other)| **other == constant)
            .map(|(offset, _, _)| offset);
        let offset = match existing {
            Some(offset) => offset,
            None => self.constants.push(constant),
        };
        ConstantIndex(offset.0 as u16)
    }

    pub fn get_utf8(&mut self, utf8: impl Into<String>) -> ConstantIndex {
        self.get_or_insert(Constant::Utf8(utf8.into()))
    }

    pub fn get_class(&mut self, name: impl Into<String>) -> ConstantIndex {
        let name = self.get_utf8(name);
        self.get_or_insert(Constant::Class(name))
    }

    pub fn get_string(&mut self, string: impl Into<String>) -> ConstantIndex {
        let utf8 = self.get_utf8(string);
        self.get_or_insert(Constant::String(utf8))
    }

    pub fn get_name_and_type(
        &mut self,
        name: impl Into<String>,
        descriptor: impl Into<String>,
    ) -> ConstantIndex {
        let name = self.get_utf8(name);
        let descriptor = self.get_utf8(descriptor);
        self.get_or_insert(Constant::NameAndType { name, descriptor })
    }

    pub fn get_field_ref(
        &mut self,
        class: impl Into<String>,
        name: impl Into<String>,
        descriptor: impl Into<String>,
    ) -> ConstantIndex {
        let class = self.get_class(class);
        let name_and_type = self.get_name_and_type(name, descriptor);
        self.get_or_insert(Constant::FieldRef {
            class,
            name_and_type,
        })
    }

    pub fn get_method_ref(
        &mut self,
        class: impl Into<String>,
        name: impl Into<String>,
        descriptor: impl Into<String>,
        is_interface: bool,
    ) -> ConstantIndex {
        let class = self.get_class(class);
        let name_and_type = self.get_name_and_type(name, descriptor);
        self.get_or_insert(Constant::MethodRef {
            class,
            name_and_type,
            is_interface,
        })
    }
}

impl Default for ConstantPool {
    fn default() -> Self {
        ConstantPool::new()
    }
}

/// Number of slots (plus one) is the first thing serialized
impl Serialize for ConstantPool {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        (self.constants.offset_len().0 as u16).serialize(writer)?;
        for (_, _, constant) in &self.constants {
            constant.serialize(writer)?;
        }
        Ok(())
    }
}

impl Parse for ConstantPool {
    fn parse<R: ReadBytesExt>(reader: &mut R) -> Result<Self, ClassFormatError> {
        let count = u16::parse(reader)? as usize;
        let mut constants = OffsetVec::new_starting_at(Offset(1));
        while constants.offset_len().0 < count {
            let index = constants.offset_len().0 as u16;
            constants.push(Constant::parse_at(reader, index)?);
        }
        Ok(ConstantPool { constants })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn containing_null_byte() {
        assert_eq!(encode_modified_utf8("a\x00a"), vec![97, 192, 128, 97]);
        assert_eq!(decode_modified_utf8(&[97, 192, 128, 97]).unwrap(), "a\x00a");
    }

    #[test]
    fn two_and_three_byte_encodings() {
        assert_eq!(encode_modified_utf8("Ą"), vec![196, 132]);
        assert_eq!(encode_modified_utf8("ऄ"), vec![224, 164, 132]);
        assert_eq!(decode_modified_utf8(&[196, 132, 224, 164, 132]).unwrap(), "Ąऄ");
    }

    #[test]
    fn supplementary_characters() {
        let encoded = vec![237, 160, 128, 237, 176, 128];
        assert_eq!(encode_modified_utf8("\u{10000}"), encoded);
        assert_eq!(decode_modified_utf8(&encoded).unwrap(), "\u{10000}");
    }

    #[test]
    fn malformed_modified_utf8() {
        // Raw null byte, 4-byte form, unpaired surrogate, missing continuation
        assert!(decode_modified_utf8(&[0]).is_err());
        assert!(decode_modified_utf8(&[240, 144, 128, 128]).is_err());
        assert!(decode_modified_utf8(&[237, 160, 128]).is_err());
        assert!(decode_modified_utf8(&[196]).is_err());
    }

    #[test]
    fn wide_constants_take_two_slots() {
        let mut pool = ConstantPool::new();
        let long = pool.get_or_insert(Constant::Long(1 << 40));
        let class = pool.get_class("java/lang/String");
        assert_eq!(long, ConstantIndex(1));
        assert_eq!(class, ConstantIndex(4));
        assert_eq!(pool.get(ConstantIndex(2)), None);
        assert_eq!(pool.class_name(class).unwrap(), "java/lang/String");

        let mut bytes = vec![];
        pool.serialize(&mut bytes).unwrap();
        assert_eq!(&bytes[..2], &[0, 5]);
        assert_eq!(ConstantPool::parse(&mut bytes.as_slice()).unwrap(), pool);
    }

    #[test]
    fn member_references() {
        let mut pool = ConstantPool::new();
        let println = pool.get_method_ref(
            "java/io/PrintStream",
            "println",
            "(Ljava/lang/String;)V",
            false,
        );
        let out = pool.get_field_ref("java/lang/System", "out", "Ljava/io/PrintStream;");
        assert_eq!(
            pool.method_ref(println).unwrap(),
            MemberRef {
                class: "java/io/PrintStream",
                name: "println",
                descriptor: "(Ljava/lang/String;)V",
            }
        );
        assert_eq!(pool.field_ref(out).unwrap().name, "out");
        assert!(pool.field_ref(println).is_err());

        // Inserting the same reference again reuses the entry
        let again = pool.get_field_ref("java/lang/System", "out", "Ljava/io/PrintStream;");
        assert_eq!(again, out);
    }

    #[test]
    fn unknown_tag() {
        let bytes: &[u8] = &[0, 2, 2, 0, 0];
        assert!(matches!(
            ConstantPool::parse(&mut &bytes[..]),
            Err(ClassFormatError::BadConstantTag { tag: 2, index: 1 })
        ));
    }
}
