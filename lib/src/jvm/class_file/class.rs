use crate::jvm::class_file::{Attribute, ConstantIndex, ConstantPool, Member};
use crate::jvm::{ClassFormatError, Parse, Serialize};
use byteorder::{ReadBytesExt, WriteBytesExt};
use std::fs;
use std::path::Path;

/// Class file format version
///
/// Ordering is by major version first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub major: u16,
    pub minor: u16,
}

impl Version {
    pub const JAVA1_4: Version = Version {
        major: 48,
        minor: 0,
    };
    pub const JAVA5: Version = Version {
        major: 49,
        minor: 0,
    };
    pub const JAVA6: Version = Version {
        major: 50,
        minor: 0,
    };
    pub const JAVA7: Version = Version {
        major: 51,
        minor: 0,
    };
}

/// Representation of the [`class` file format of the JVM][0]
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html
#[derive(Debug, Clone, PartialEq)]
pub struct ClassFile {
    pub version: Version,
    pub constants: ConstantPool,
    pub access_flags: u16,
    pub this_class: ConstantIndex,
    pub super_class: ConstantIndex,
    pub interfaces: Vec<ConstantIndex>,
    pub fields: Vec<Member>,
    pub methods: Vec<Member>,
    pub attributes: Vec<Attribute>,
}

impl ClassFile {
    /// Magic header bytes that go at the front of the serialized class file
    const MAGIC: u32 = 0xCAFEBABE;

    /// Binary name of the class
    pub fn name(&self) -> Result<&str, ClassFormatError> {
        self.constants.class_name(self.this_class)
    }

    /// Read and parse a class file from disk
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<ClassFile, ClassFormatError> {
        let bytes = fs::read(path).map_err(ClassFormatError::Io)?;
        ClassFile::parse(&mut bytes.as_slice())
    }

    /// Save the class file to disk
    pub fn save_to_path<P: AsRef<Path>>(
        &self,
        path: P,
        create_missing_directories: bool,
    ) -> std::io::Result<()> {
        let path = path.as_ref();
        if create_missing_directories {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut bytes = vec![];
        self.serialize(&mut bytes)?;
        fs::write(path, bytes)
    }
}

impl Serialize for ClassFile {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        ClassFile::MAGIC.serialize(writer)?;
        self.version.minor.serialize(writer)?;
        self.version.major.serialize(writer)?;
        self.constants.serialize(writer)?;
        self.access_flags.serialize(writer)?;
        self.this_class.serialize(writer)?;
        self.super_class.serialize(writer)?;
        self.interfaces.serialize(writer)?;
        self.fields.serialize(writer)?;
        self.methods.serialize(writer)?;
        self.attributes.serialize(writer)?;
        Ok(())
    }
}

impl Parse for ClassFile {
    fn parse<R: ReadBytesExt>(reader: &mut R) -> Result<Self, ClassFormatError> {
        let magic = u32::parse(reader)?;
        if magic != ClassFile::MAGIC {
            return Err(ClassFormatError::BadMagic(magic));
        }
        let minor = u16::parse(reader)?;
        let major = u16::parse(reader)?;
        Ok(ClassFile {
            version: Version { major, minor },
            constants: ConstantPool::parse(reader)?,
            access_flags: u16::parse(reader)?,
            this_class: ConstantIndex::parse(reader)?,
            super_class: ConstantIndex::parse(reader)?,
            interfaces: Vec::parse(reader)?,
            fields: Vec::parse(reader)?,
            methods: Vec::parse(reader)?,
            attributes: Vec::parse(reader)?,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn versions_order_by_major_first() {
        let java5_3 = Version {
            major: 49,
            minor: 3,
        };
        assert!(Version::JAVA1_4 < java5_3);
        assert!(java5_3 < Version::JAVA6);
        assert!(Version::JAVA6 < Version::JAVA7);
    }

    #[test]
    fn bad_magic() {
        let bytes: &[u8] = &[0xCA, 0xFE, 0xD0, 0x0D, 0, 0, 0, 50];
        assert!(matches!(
            ClassFile::parse(&mut &bytes[..]),
            Err(ClassFormatError::BadMagic(0xCAFED00D))
        ));
    }

    #[test]
    fn minimal_class() {
        let mut constants = ConstantPool::new();
        let this_class = constants.get_class("Empty");
        let super_class = constants.get_class("java/lang/Object");
        let class = ClassFile {
            version: Version::JAVA1_4,
            constants,
            access_flags: 0x0021,
            this_class,
            super_class,
            interfaces: vec![],
            fields: vec![],
            methods: vec![],
            attributes: vec![],
        };

        let mut bytes = vec![];
        class.serialize(&mut bytes).unwrap();
        assert_eq!(&bytes[..8], &[0xCA, 0xFE, 0xBA, 0xBE, 0, 0, 0, 48]);

        let parsed = ClassFile::parse(&mut bytes.as_slice()).unwrap();
        assert_eq!(parsed.name().unwrap(), "Empty");
        assert_eq!(parsed, class);
    }

    #[test]
    fn truncated_class() {
        let bytes: &[u8] = &[0xCA, 0xFE, 0xBA, 0xBE, 0, 0];
        assert!(matches!(
            ClassFile::parse(&mut &bytes[..]),
            Err(ClassFormatError::Truncated)
        ));
    }
}
