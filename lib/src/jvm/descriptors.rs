use super::{BinaryName, Name};
use crate::util::Width;
use std::fmt::{self, Display, Formatter};
use std::iter::Peekable;
use std::str::Chars;

/// Why a field or method descriptor could not be parsed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorError(pub String);

impl Display for DescriptorError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for DescriptorError {}

type Result<T> = std::result::Result<T, DescriptorError>;

fn unexpected(found: Option<char>, expected: &str) -> DescriptorError {
    match found {
        Some(c) => DescriptorError(format!("Expected {} but found '{}'", expected, c)),
        None => DescriptorError(format!("Expected {} but reached the end", expected)),
    }
}

/// Render descriptors in the format used in class files
pub trait RenderDescriptor {
    fn render(&self) -> String {
        let mut string = String::new();
        self.render_to(&mut string);
        string
    }

    fn render_to(&self, write_to: &mut String);
}

/// Parse descriptors in the format used in class files
pub trait ParseDescriptor: Sized {
    /// Parse a complete descriptor (trailing characters are an error)
    fn parse(source: &str) -> Result<Self> {
        let mut chars = source.chars().peekable();
        let parsed = Self::parse_from(&mut chars)?;
        match chars.next() {
            None => Ok(parsed),
            leftover => Err(unexpected(leftover, "end of descriptor")),
        }
    }

    fn parse_from(source: &mut Peekable<Chars>) -> Result<Self>;
}

/// Primitive value types
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum BaseType {
    Byte,
    Char,
    Double,
    Float,
    Int,
    Long,
    Short,
    Boolean,
}

impl BaseType {
    const ALL: [(char, BaseType); 8] = [
        ('B', BaseType::Byte),
        ('C', BaseType::Char),
        ('D', BaseType::Double),
        ('F', BaseType::Float),
        ('I', BaseType::Int),
        ('J', BaseType::Long),
        ('S', BaseType::Short),
        ('Z', BaseType::Boolean),
    ];

    fn from_char(c: char) -> Option<BaseType> {
        BaseType::ALL
            .iter()
            .find(|(code, _)| *code == c)
            .map(|(_, typ)| *typ)
    }
}

impl Width for BaseType {
    fn width(&self) -> usize {
        match self {
            BaseType::Double | BaseType::Long => 2,
            _ => 1,
        }
    }
}

impl RenderDescriptor for BaseType {
    fn render_to(&self, write_to: &mut String) {
        if let Some((code, _)) = BaseType::ALL.iter().find(|(_, typ)| typ == self) {
            write_to.push(*code);
        }
    }
}

impl ParseDescriptor for BaseType {
    fn parse_from(source: &mut Peekable<Chars>) -> Result<Self> {
        let c = source.next();
        c.and_then(BaseType::from_char)
            .ok_or_else(|| unexpected(c, "a primitive type"))
    }
}

/// Reference type
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum RefType<Class> {
    Object(Class),
    ObjectArray(ArrayType<Class>),
    PrimitiveArray(ArrayType<BaseType>),
}

/// Array type, split into its innermost element type and its nesting
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct ArrayType<T> {
    /// Dimensions beyond the first (`A[]` has 0, `A[][][][]` has 3)
    pub additional_dimensions: usize,

    /// Innermost element type (`A` for `A[][]`)
    pub element_type: T,
}

impl<T> ArrayType<T> {
    pub const fn dimensions(&self) -> usize {
        self.additional_dimensions + 1
    }
}

impl<T: RenderDescriptor> RenderDescriptor for ArrayType<T> {
    fn render_to(&self, write_to: &mut String) {
        for _ in 0..self.dimensions() {
            write_to.push('[');
        }
        self.element_type.render_to(write_to);
    }
}

impl RenderDescriptor for BinaryName {
    fn render_to(&self, write_to: &mut String) {
        write_to.push('L');
        write_to.push_str(self.as_str());
        write_to.push(';');
    }
}

impl ParseDescriptor for BinaryName {
    fn parse_from(source: &mut Peekable<Chars>) -> Result<Self> {
        match source.next() {
            Some('L') => (),
            other => return Err(unexpected(other, "'L'")),
        }
        let mut class_name = String::new();
        loop {
            match source.next() {
                Some(';') => break,
                Some(c) => class_name.push(c),
                None => return Err(unexpected(None, "';'")),
            }
        }
        BinaryName::from_string(class_name).map_err(DescriptorError)
    }
}

impl<C: RenderDescriptor> RenderDescriptor for RefType<C> {
    fn render_to(&self, write_to: &mut String) {
        match self {
            RefType::Object(class) => class.render_to(write_to),
            RefType::PrimitiveArray(array) => array.render_to(write_to),
            RefType::ObjectArray(array) => array.render_to(write_to),
        }
    }
}

impl<C: ParseDescriptor> ParseDescriptor for RefType<C> {
    fn parse_from(source: &mut Peekable<Chars>) -> Result<Self> {
        let mut dimensions = 0;
        while source.next_if_eq(&'[').is_some() {
            dimensions += 1;
        }
        let is_object = source.peek() == Some(&'L');
        Ok(match (dimensions, is_object) {
            (0, true) => RefType::Object(C::parse_from(source)?),
            (0, false) => return Err(unexpected(source.next(), "a reference type")),
            (_, true) => RefType::ObjectArray(ArrayType {
                additional_dimensions: dimensions - 1,
                element_type: C::parse_from(source)?,
            }),
            (_, false) => RefType::PrimitiveArray(ArrayType {
                additional_dimensions: dimensions - 1,
                element_type: BaseType::parse_from(source)?,
            }),
        })
    }
}

impl<C> RefType<C> {
    /// Array type whose elements have the given type
    pub fn array(element: FieldType<C>) -> RefType<C> {
        match element {
            FieldType::Base(element_type) => RefType::PrimitiveArray(ArrayType {
                additional_dimensions: 0,
                element_type,
            }),
            FieldType::Ref(RefType::Object(element_type)) => RefType::ObjectArray(ArrayType {
                additional_dimensions: 0,
                element_type,
            }),
            FieldType::Ref(RefType::PrimitiveArray(array)) => RefType::PrimitiveArray(ArrayType {
                additional_dimensions: array.dimensions(),
                element_type: array.element_type,
            }),
            FieldType::Ref(RefType::ObjectArray(array)) => RefType::ObjectArray(ArrayType {
                additional_dimensions: array.dimensions(),
                element_type: array.element_type,
            }),
        }
    }
}

impl<C: Clone> RefType<C> {
    /// Type of the elements of an array type (`None` for class types)
    pub fn element_type(&self) -> Option<FieldType<C>> {
        let element = match self {
            RefType::Object(_) => return None,
            RefType::PrimitiveArray(array) => match array.additional_dimensions {
                0 => FieldType::Base(array.element_type),
                more => FieldType::Ref(RefType::PrimitiveArray(ArrayType {
                    additional_dimensions: more - 1,
                    element_type: array.element_type,
                })),
            },
            RefType::ObjectArray(array) => match array.additional_dimensions {
                0 => FieldType::object(array.element_type.clone()),
                more => FieldType::Ref(RefType::ObjectArray(ArrayType {
                    additional_dimensions: more - 1,
                    element_type: array.element_type.clone(),
                })),
            },
        };
        Some(element)
    }
}

impl RefType<BinaryName> {
    /// Parse the name stored in a `Class` constant
    ///
    /// Classes and interfaces are stored by binary name, but array classes use their descriptor.
    pub fn from_class_name(name: &str) -> Result<Self> {
        if name.starts_with('[') {
            RefType::parse(name)
        } else {
            BinaryName::from_string(name.to_owned())
                .map(RefType::Object)
                .map_err(DescriptorError)
        }
    }
}

/// Type of a field, parameter, or return value
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum FieldType<Class> {
    Base(BaseType),
    Ref(RefType<Class>),
}

impl<C> Width for FieldType<C> {
    fn width(&self) -> usize {
        match self {
            FieldType::Base(base_type) => base_type.width(),
            FieldType::Ref(_) => 1,
        }
    }
}

impl<C> FieldType<C> {
    pub fn array(element: FieldType<C>) -> FieldType<C> {
        FieldType::Ref(RefType::array(element))
    }

    pub const fn object(class_name: C) -> FieldType<C> {
        FieldType::Ref(RefType::Object(class_name))
    }

    pub const fn int() -> FieldType<C> {
        FieldType::Base(BaseType::Int)
    }

    pub const fn long() -> FieldType<C> {
        FieldType::Base(BaseType::Long)
    }

    pub const fn float() -> FieldType<C> {
        FieldType::Base(BaseType::Float)
    }

    pub const fn double() -> FieldType<C> {
        FieldType::Base(BaseType::Double)
    }
}

impl<C: RenderDescriptor> RenderDescriptor for FieldType<C> {
    fn render_to(&self, write_to: &mut String) {
        match self {
            FieldType::Base(base_type) => base_type.render_to(write_to),
            FieldType::Ref(ref_type) => ref_type.render_to(write_to),
        }
    }
}

impl<C: ParseDescriptor> ParseDescriptor for FieldType<C> {
    fn parse_from(source: &mut Peekable<Chars>) -> Result<Self> {
        match source.peek().copied() {
            Some('L' | '[') => RefType::parse_from(source).map(FieldType::Ref),
            _ => BaseType::parse_from(source).map(FieldType::Base),
        }
    }
}

/// Signature of a method
#[derive(PartialEq, Eq, Hash, Debug, Clone)]
pub struct MethodDescriptor<Class> {
    pub parameters: Vec<FieldType<Class>>,

    /// `None` for `void`
    pub return_type: Option<FieldType<Class>>,
}

impl<C: RenderDescriptor> RenderDescriptor for MethodDescriptor<C> {
    fn render_to(&self, write_to: &mut String) {
        write_to.push('(');
        for parameter in &self.parameters {
            parameter.render_to(write_to);
        }
        write_to.push(')');
        match &self.return_type {
            None => write_to.push('V'),
            Some(typ) => typ.render_to(write_to),
        };
    }
}

impl<C: ParseDescriptor> ParseDescriptor for MethodDescriptor<C> {
    fn parse_from(source: &mut Peekable<Chars>) -> Result<Self> {
        match source.next() {
            Some('(') => (),
            other => return Err(unexpected(other, "'('")),
        }

        let mut parameters = vec![];
        while source.next_if_eq(&')').is_none() {
            if source.peek().is_none() {
                return Err(unexpected(None, "')'"));
            }
            parameters.push(FieldType::parse_from(source)?);
        }

        let return_type = match source.next_if_eq(&'V') {
            Some(_) => None,
            None => Some(FieldType::parse_from(source)?),
        };

        Ok(MethodDescriptor {
            parameters,
            return_type,
        })
    }
}
