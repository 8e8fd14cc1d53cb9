//! Type descriptors

use serde::{Deserialize, Serialize};

use super::ids::{ClassId, TypeParamId};

/// A type as seen by reflection, type tests and the code generator
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Type {
    /// The `dynamic` type
    Dynamic,
    /// The `void` type
    Void,
    /// A class type; `arguments == None` is the raw ("rare") type whose arguments are
    /// all implicitly `dynamic`
    Interface {
        /// Class of the type
        class: ClassId,
        /// Explicit type arguments
        arguments: Option<Vec<Type>>,
    },
    /// A reference to a class type parameter
    Parameter(TypeParamId),
}

impl Type {
    /// Raw type of a class
    pub fn rare(class: ClassId) -> Self {
        Type::Interface {
            class,
            arguments: None,
        }
    }

    /// Class type with explicit arguments
    pub fn generic(class: ClassId, arguments: Vec<Type>) -> Self {
        Type::Interface {
            class,
            arguments: Some(arguments),
        }
    }

    /// Class of an interface type
    pub fn class(&self) -> Option<ClassId> {
        match self {
            Type::Interface { class, .. } => Some(*class),
            _ => None,
        }
    }

    /// Explicit type arguments of an interface type
    pub fn arguments(&self) -> Option<&[Type]> {
        match self {
            Type::Interface {
                arguments: Some(args),
                ..
            } => Some(args),
            _ => None,
        }
    }

    /// `dynamic` or `void`
    pub fn is_top(&self) -> bool {
        matches!(self, Type::Dynamic | Type::Void)
    }

    /// True when the type mentions no type parameters
    pub fn is_instantiated(&self) -> bool {
        match self {
            Type::Dynamic | Type::Void => true,
            Type::Parameter(_) => false,
            Type::Interface { arguments, .. } => arguments
                .as_ref()
                .map_or(true, |args| args.iter().all(Type::is_instantiated)),
        }
    }

    /// True for a raw type or one whose arguments are all `dynamic`
    pub fn is_raw(&self) -> bool {
        match self {
            Type::Interface { arguments, .. } => arguments
                .as_ref()
                .map_or(true, |args| args.iter().all(|a| *a == Type::Dynamic)),
            _ => false,
        }
    }
}
