//! Mirror types
//!
//! Mirrors are plain snapshots: each carries the [`MirrorReference`] of the entity it
//! describes plus the handful of properties a caller needs without going back to the
//! program. Anything that needs a program walk (members, parameters, supertypes) is a
//! [`MirrorFactory`](super::MirrorFactory) operation taking the mirror's referent.

use crate::vm::program::{ClassId, FieldId, FunctionId, LibraryId, Type, TypeParamId};
use crate::vm::value::Value;

/// Opaque handle to exactly one program entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MirrorReference {
    /// A class (including signature and typedef classes)
    Class(ClassId),
    /// A function
    Function(FunctionId),
    /// A field
    Field(FieldId),
    /// A library
    Library(LibraryId),
    /// A class type parameter
    TypeParameter(TypeParamId),
}

/// The mirror system: every library plus the isolate
#[derive(Debug, Clone)]
pub struct MirrorSystemMirror {
    /// Library mirrors in load order
    pub libraries: Vec<Mirror>,
    /// Isolate mirror
    pub isolate: Box<Mirror>,
}

/// The current isolate
#[derive(Debug, Clone)]
pub struct IsolateMirror {
    /// Debug name
    pub debug_name: String,
    /// Root library
    pub root_library: Option<Box<Mirror>>,
}

/// A library
#[derive(Debug, Clone, PartialEq)]
pub struct LibraryMirror {
    /// Library id
    pub library: LibraryId,
    /// Library name
    pub simple_name: String,
    /// Library URL
    pub url: String,
}

/// A class, as seen through one of its types
#[derive(Debug, Clone, PartialEq)]
pub struct ClassMirror {
    /// Class id
    pub class: ClassId,
    /// Source name; `None` for anonymous mixin applications
    pub simple_name: Option<String>,
    /// Type the mirror reflects (rare or instantiated)
    pub reflected_type: Type,
    /// Declaring library
    pub library: LibraryId,
    /// Abstract class
    pub is_abstract: bool,
    /// Generic class
    pub is_generic: bool,
    /// Mixin application
    pub is_mixin_application: bool,
}

/// A function type (canonical signature class)
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionTypeMirror {
    /// Canonical signature class
    pub class: ClassId,
    /// Signature function
    pub signature: FunctionId,
}

/// A typedef
#[derive(Debug, Clone, PartialEq)]
pub struct TypedefMirror {
    /// Typedef class
    pub class: ClassId,
    /// Typedef name
    pub simple_name: String,
    /// Signature function shared with the referent
    pub signature: FunctionId,
}

/// Flags of a method mirror
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MethodFlags {
    /// Static method
    pub is_static: bool,
    /// Abstract method
    pub is_abstract: bool,
    /// Getter
    pub is_getter: bool,
    /// Setter
    pub is_setter: bool,
    /// Constructor of any kind
    pub is_constructor: bool,
    /// Const constructor
    pub is_const: bool,
    /// Generative constructor
    pub is_generative: bool,
    /// Redirecting constructor or factory
    pub is_redirecting: bool,
    /// Factory constructor
    pub is_factory: bool,
}

/// A method, getter, setter, constructor or closure function
#[derive(Debug, Clone, PartialEq)]
pub struct MethodMirror {
    /// Function id
    pub function: FunctionId,
    /// Source name (constructor name without the class prefix)
    pub simple_name: String,
    /// Kind flags
    pub flags: MethodFlags,
}

/// A field
#[derive(Debug, Clone, PartialEq)]
pub struct VariableMirror {
    /// Field id
    pub field: FieldId,
    /// Source name
    pub simple_name: String,
    /// Static or top-level field
    pub is_static: bool,
    /// `final`
    pub is_final: bool,
    /// `const`
    pub is_const: bool,
}

/// A parameter of a function
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterMirror {
    /// Function the parameter belongs to
    pub function: FunctionId,
    /// Parameter name
    pub simple_name: String,
    /// Index among the declared parameters
    pub position: usize,
    /// Optional (positional or named)
    pub is_optional: bool,
    /// Named
    pub is_named: bool,
    /// `final`
    pub is_final: bool,
    /// Default value, if any
    pub default_value: Option<Value>,
    /// Annotations
    pub metadata: Vec<Value>,
    /// Declared type
    pub ty: Type,
}

/// A class type parameter
#[derive(Debug, Clone, PartialEq)]
pub struct TypeVariableMirror {
    /// Type parameter id
    pub type_parameter: TypeParamId,
    /// Name
    pub simple_name: String,
}

/// `dynamic` or `void`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialType {
    /// `dynamic`
    Dynamic,
    /// `void`
    Void,
}

impl SpecialType {
    /// Source name
    pub fn name(self) -> &'static str {
        match self {
            SpecialType::Dynamic => "dynamic",
            SpecialType::Void => "void",
        }
    }
}

/// A reflected object
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceMirror {
    /// The object
    pub reflectee: Value,
    /// Its class
    pub class: ClassId,
}

/// A reflected closure
#[derive(Debug, Clone, PartialEq)]
pub struct ClosureMirror {
    /// The closure value
    pub reflectee: Value,
    /// Function the closure runs
    pub function: FunctionId,
}

/// A mirror of any kind
#[derive(Debug, Clone)]
pub enum Mirror {
    /// Mirror system
    MirrorSystem(MirrorSystemMirror),
    /// Isolate
    Isolate(IsolateMirror),
    /// Library
    Library(LibraryMirror),
    /// Class
    Class(ClassMirror),
    /// Function type
    FunctionType(FunctionTypeMirror),
    /// Typedef
    Typedef(TypedefMirror),
    /// Method
    Method(MethodMirror),
    /// Variable
    Variable(VariableMirror),
    /// Parameter
    Parameter(ParameterMirror),
    /// Type variable
    TypeVariable(TypeVariableMirror),
    /// `dynamic` or `void`
    Special(SpecialType),
    /// Instance
    Instance(InstanceMirror),
    /// Closure
    Closure(ClosureMirror),
}

impl Mirror {
    /// Entity this mirror describes; object, special and root mirrors have none
    pub fn referent(&self) -> Option<MirrorReference> {
        match self {
            Mirror::Library(m) => Some(MirrorReference::Library(m.library)),
            Mirror::Class(m) => Some(MirrorReference::Class(m.class)),
            Mirror::FunctionType(m) => Some(MirrorReference::Class(m.class)),
            Mirror::Typedef(m) => Some(MirrorReference::Class(m.class)),
            Mirror::Method(m) => Some(MirrorReference::Function(m.function)),
            Mirror::Variable(m) => Some(MirrorReference::Field(m.field)),
            Mirror::Parameter(m) => Some(MirrorReference::Function(m.function)),
            Mirror::TypeVariable(m) => Some(MirrorReference::TypeParameter(m.type_parameter)),
            Mirror::MirrorSystem(_)
            | Mirror::Isolate(_)
            | Mirror::Special(_)
            | Mirror::Instance(_)
            | Mirror::Closure(_) => None,
        }
    }

    /// Source-level simple name, when the mirror has one
    pub fn simple_name(&self) -> Option<&str> {
        match self {
            Mirror::Library(m) => Some(&m.simple_name),
            Mirror::Class(m) => m.simple_name.as_deref(),
            Mirror::Typedef(m) => Some(&m.simple_name),
            Mirror::Method(m) => Some(&m.simple_name),
            Mirror::Variable(m) => Some(&m.simple_name),
            Mirror::Parameter(m) => Some(&m.simple_name),
            Mirror::TypeVariable(m) => Some(&m.simple_name),
            Mirror::Special(s) => Some(s.name()),
            Mirror::Isolate(m) => Some(&m.debug_name),
            Mirror::MirrorSystem(_)
            | Mirror::FunctionType(_)
            | Mirror::Instance(_)
            | Mirror::Closure(_) => None,
        }
    }

    /// Short variant name for diagnostics
    pub fn kind_name(&self) -> &'static str {
        match self {
            Mirror::MirrorSystem(_) => "MirrorSystem",
            Mirror::Isolate(_) => "IsolateMirror",
            Mirror::Library(_) => "LibraryMirror",
            Mirror::Class(_) => "ClassMirror",
            Mirror::FunctionType(_) => "FunctionTypeMirror",
            Mirror::Typedef(_) => "TypedefMirror",
            Mirror::Method(_) => "MethodMirror",
            Mirror::Variable(_) => "VariableMirror",
            Mirror::Parameter(_) => "ParameterMirror",
            Mirror::TypeVariable(_) => "TypeVariableMirror",
            Mirror::Special(_) => "TypeMirror",
            Mirror::Instance(_) => "InstanceMirror",
            Mirror::Closure(_) => "ClosureMirror",
        }
    }

    /// Whether this is the `dynamic` type mirror
    pub fn is_dynamic(&self) -> bool {
        matches!(self, Mirror::Special(SpecialType::Dynamic))
    }
}
