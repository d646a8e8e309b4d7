use std::borrow::Cow;
use std::fmt::{Debug, Display, Error as FmtError, Formatter};

/// Validated names read out of the constant pool
pub trait Name: Sized {
    /// Reason a string is not a valid name (if it isn't)
    fn check_valid(name: impl AsRef<str>) -> Result<(), String>;

    /// Wrap a string that is already known to be valid
    fn from_cow_unchecked(name: Cow<'static, str>) -> Self;

    fn as_str(&self) -> &str;

    /// Try to construct a name from a string
    fn from_string(name: String) -> Result<Self, String> {
        Self::check_valid(&name)?;
        Ok(Self::from_cow_unchecked(Cow::Owned(name)))
    }
}

macro_rules! name_type {
    ($(#[$meta:meta])* $name:ident, $check:expr) => {
        $(#[$meta])*
        #[derive(Clone, Hash, Eq, PartialEq)]
        pub struct $name(Cow<'static, str>);

        impl $name {
            const fn borrowed(value: &'static str) -> $name {
                $name(Cow::Borrowed(value))
            }
        }

        impl Name for $name {
            fn check_valid(name: impl AsRef<str>) -> Result<(), String> {
                let check: fn(&str) -> Result<(), String> = $check;
                check(name.as_ref())
            }

            fn from_cow_unchecked(name: Cow<'static, str>) -> Self {
                $name(name)
            }

            fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl Debug for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
                f.write_str(&self.0)
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
                f.write_str(&self.0)
            }
        }
    };
}

name_type!(
    /// Method and field names (JVMS §4.2.2)
    UnqualifiedName,
    |name| match name.find(&['.', ';', '[', '/'][..]) {
        _ if name.is_empty() => Err(String::from("Empty method or field name")),
        Some(at) => Err(format!("Illegal character at {} in name '{}'", at, name)),
        None => Ok(()),
    }
);

name_type!(
    /// Class and interface names, slash separated (JVMS §4.2.1)
    BinaryName,
    |name| {
        if name.is_empty() {
            return Err(String::from("Empty class name"));
        }
        for segment in name.split('/') {
            UnqualifiedName::check_valid(segment)
                .map_err(|err| format!("Bad class name '{}': {}", name, err))?;
        }
        Ok(())
    }
);

impl UnqualifiedName {
    /// Instance initializer (the only method name allowed angle brackets, besides `<clinit>`)
    pub const INIT: Self = Self::borrowed("<init>");
    pub const CLINIT: Self = Self::borrowed("<clinit>");
}

impl BinaryName {
    pub const OBJECT: Self = Self::borrowed("java/lang/Object");
    pub const STRING: Self = Self::borrowed("java/lang/String");
    pub const CLASS: Self = Self::borrowed("java/lang/Class");
    pub const THROWABLE: Self = Self::borrowed("java/lang/Throwable");

    // Types of `ldc` on method handle and method type constants
    pub const METHODHANDLE: Self = Self::borrowed("java/lang/invoke/MethodHandle");
    pub const METHODTYPE: Self = Self::borrowed("java/lang/invoke/MethodType");
}
