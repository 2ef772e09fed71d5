//! Type signatures for parameters, locals, fields, and return values.

use std::fmt;

/// A type signature in the supported subset of the target type system.
///
/// Reference types flow through the object-typed hook surface unchanged; value
/// types require explicit box/unbox instructions, which is why
/// [`TypeSig::is_value_type`] drives the splice planner's forwarding code.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeSig {
    /// No value (return type only)
    Void,
    /// Boolean (stack slot is an i32; value type)
    Bool,
    /// 32-bit signed integer (value type)
    I4,
    /// 64-bit signed integer (value type)
    I8,
    /// 64-bit float (value type)
    R8,
    /// Immutable string (reference type)
    String,
    /// The root reference type
    Object,
    /// A named reference type
    Class(std::string::String),
    /// A named value type
    ValueType(std::string::String),
    /// Managed pointer to a value of the inner type (in/out parameter passing)
    ByRef(Box<TypeSig>),
}

impl TypeSig {
    /// Whether values of this type must be boxed to pass through an `Object` surface.
    #[must_use]
    pub fn is_value_type(&self) -> bool {
        matches!(
            self,
            TypeSig::Bool | TypeSig::I4 | TypeSig::I8 | TypeSig::R8 | TypeSig::ValueType(_)
        )
    }

    /// Whether this is the void return type.
    #[must_use]
    pub fn is_void(&self) -> bool {
        matches!(self, TypeSig::Void)
    }

    /// The full name of the type as the reference resolver sees it.
    ///
    /// Primitives map to their runtime-library type names so that box/unbox
    /// instructions reference a real importable symbol.
    #[must_use]
    pub fn full_name(&self) -> &str {
        match self {
            TypeSig::Void => "System.Void",
            TypeSig::Bool => "System.Boolean",
            TypeSig::I4 => "System.Int32",
            TypeSig::I8 => "System.Int64",
            TypeSig::R8 => "System.Double",
            TypeSig::String => "System.String",
            TypeSig::Object => "System.Object",
            TypeSig::Class(name) | TypeSig::ValueType(name) => name,
            TypeSig::ByRef(inner) => inner.full_name(),
        }
    }

    /// Whether the type is one of the built-in primitives (lives in the runtime library).
    #[must_use]
    pub fn is_primitive(&self) -> bool {
        matches!(
            self,
            TypeSig::Bool
                | TypeSig::I4
                | TypeSig::I8
                | TypeSig::R8
                | TypeSig::String
                | TypeSig::Object
        )
    }
}

impl fmt::Display for TypeSig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeSig::ByRef(inner) => write!(f, "{inner}&"),
            other => f.write_str(other.full_name()),
        }
    }
}
