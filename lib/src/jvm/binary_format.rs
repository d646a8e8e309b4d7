use crate::jvm::ClassFormatError;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::Result;

/// Utility trait for serializing data inside class files
///
/// Java class files have some peculiarities that make it useful to define an extra trait (instead
/// of just using `serde`):
///
///   - tags are always `u8`
///   - when serializing a sequence, the length of the sequence is usually `u16`
///
pub trait Serialize: Sized {
    /// Serialize construct into a binary output stream
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()>;
}

/// Counterpart of [`Serialize`] for reading class files
pub trait Parse: Sized {
    /// Parse construct from a binary input stream
    fn parse<R: ReadBytesExt>(reader: &mut R) -> std::result::Result<Self, ClassFormatError>;
}

macro_rules! big_endian_primitive {
    ($typ:ty, $write:ident, $read:ident) => {
        impl Serialize for $typ {
            fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
                writer.$write::<BigEndian>(*self)
            }
        }

        impl Parse for $typ {
            fn parse<R: ReadBytesExt>(reader: &mut R) -> std::result::Result<Self, ClassFormatError> {
                Ok(reader.$read::<BigEndian>()?)
            }
        }
    };
}

big_endian_primitive!(u16, write_u16, read_u16);
big_endian_primitive!(u32, write_u32, read_u32);
big_endian_primitive!(u64, write_u64, read_u64);
big_endian_primitive!(i16, write_i16, read_i16);
big_endian_primitive!(i32, write_i32, read_i32);
big_endian_primitive!(i64, write_i64, read_i64);
big_endian_primitive!(f32, write_f32, read_f32);
big_endian_primitive!(f64, write_f64, read_f64);

impl Serialize for u8 {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        writer.write_u8(*self)
    }
}

impl Parse for u8 {
    fn parse<R: ReadBytesExt>(reader: &mut R) -> std::result::Result<Self, ClassFormatError> {
        Ok(reader.read_u8()?)
    }
}

/// Size in `u16` is the first thing serialized/deserialized
impl<A: Serialize> Serialize for Vec<A> {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        (self.len() as u16).serialize(writer)?;
        for elem in self {
            elem.serialize(writer)?;
        }
        Ok(())
    }
}

impl<A: Parse> Parse for Vec<A> {
    fn parse<R: ReadBytesExt>(reader: &mut R) -> std::result::Result<Self, ClassFormatError> {
        let len = u16::parse(reader)?;
        let mut elems = Vec::with_capacity(len as usize);
        for _ in 0..len {
            elems.push(A::parse(reader)?);
        }
        Ok(elems)
    }
}

/// Read exactly `len` raw bytes
pub fn parse_bytes<R: ReadBytesExt>(
    reader: &mut R,
    len: usize,
) -> std::result::Result<Vec<u8>, ClassFormatError> {
    let mut bytes = vec![0; len];
    reader.read_exact(&mut bytes)?;
    Ok(bytes)
}
