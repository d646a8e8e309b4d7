use super::SubroutineId;
use crate::jvm::{BaseType, BinaryName, FieldType, RefType, RenderDescriptor};
use crate::util::Width;
use std::fmt::{Display, Error as FmtError, Formatter};

/// Abstract type of a local variable or stack slot
///
/// These mostly follow [this hierarchy][0], with two additions needed for old-style code: `Top`
/// (for unusable slots) and return addresses pushed by `jsr`.
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se7/html/jvms-4.html#jvms-4.10.1.2
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub enum VerificationType {
    /// Unusable value (uninitialized local, second half of a category 2 local, or the result of
    /// merging incompatible types)
    Top,

    Integer,
    Float,
    Long,
    Double,
    Null,

    /// In the constructor, the `this` parameter starts with this type then turns into an object
    /// type after `<init>` is called
    UninitializedThis,

    /// State of an object after `new` has been called but `<init>` has not been called
    Uninitialized {
        /// Position of the `new` instruction
        new_position: usize,

        /// Class being constructed
        class: BinaryName,
    },

    /// Object type
    Object(RefType<BinaryName>),

    /// Return address pushed by a `jsr` into the given subroutine
    ReturnAddress(SubroutineId),
}

impl VerificationType {
    pub fn object(class: BinaryName) -> VerificationType {
        VerificationType::Object(RefType::Object(class))
    }

    /// Is this type a reference type?
    pub fn is_reference(&self) -> bool {
        matches!(
            self,
            VerificationType::Null
                | VerificationType::UninitializedThis
                | VerificationType::Uninitialized { .. }
                | VerificationType::Object(_)
        )
    }

    /// Is this an object which has not had its constructor called yet?
    pub fn is_uninitialized(&self) -> bool {
        matches!(
            self,
            VerificationType::UninitializedThis | VerificationType::Uninitialized { .. }
        )
    }

    /// Is this an initialized object (or `null`)?
    pub fn is_initialized_reference(&self) -> bool {
        matches!(self, VerificationType::Null | VerificationType::Object(_))
    }

    /// Least upper bound of two types
    ///
    /// Class hierarchies are not known, so two distinct object types join to `java/lang/Object`.
    /// Anything without a common supertype (including distinct return addresses) joins to `Top`.
    pub fn join(&self, other: &VerificationType) -> VerificationType {
        use VerificationType::*;

        if self == other {
            return self.clone();
        }
        match (self, other) {
            (Null, Object(_)) => other.clone(),
            (Object(_), Null) => self.clone(),
            (Object(_), Object(_)) => VerificationType::object(BinaryName::OBJECT),
            _ => Top,
        }
    }

    /// Check if a value of type `found` can be used where `expected` is required
    ///
    /// Primitive types must match exactly. An object type accepts `null` and any other object
    /// type (class hierarchy checks are not performed). Uninitialized values and return addresses
    /// are only assignable to themselves.
    pub fn is_assignable(found: &VerificationType, expected: &VerificationType) -> bool {
        use VerificationType::*;

        match (found, expected) {
            (_, Top) => true,
            (Null | Object(_), Object(_)) => true,
            _ => found == expected,
        }
    }
}

impl Width for VerificationType {
    fn width(&self) -> usize {
        match self {
            VerificationType::Double | VerificationType::Long => 2,
            _ => 1,
        }
    }
}

impl From<FieldType<BinaryName>> for VerificationType {
    fn from(field_type: FieldType<BinaryName>) -> Self {
        match field_type {
            FieldType::Base(BaseType::Int)
            | FieldType::Base(BaseType::Char)
            | FieldType::Base(BaseType::Short)
            | FieldType::Base(BaseType::Byte)
            | FieldType::Base(BaseType::Boolean) => VerificationType::Integer,
            FieldType::Base(BaseType::Float) => VerificationType::Float,
            FieldType::Base(BaseType::Long) => VerificationType::Long,
            FieldType::Base(BaseType::Double) => VerificationType::Double,
            FieldType::Ref(ref_type) => VerificationType::Object(ref_type),
        }
    }
}

impl Display for VerificationType {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        match self {
            VerificationType::Top => f.write_str("top"),
            VerificationType::Integer => f.write_str("int"),
            VerificationType::Float => f.write_str("float"),
            VerificationType::Long => f.write_str("long"),
            VerificationType::Double => f.write_str("double"),
            VerificationType::Null => f.write_str("null"),
            VerificationType::UninitializedThis => f.write_str("uninitializedThis"),
            VerificationType::Uninitialized {
                new_position,
                class,
            } => write!(f, "uninitialized({}, {})", new_position, class),
            VerificationType::Object(ref_type) => f.write_str(&ref_type.render()),
            VerificationType::ReturnAddress(subroutine) => {
                write!(f, "returnAddress({})", subroutine.0)
            }
        }
    }
}
