//! Class, library and type-parameter entities

use once_cell::sync::OnceCell;

use super::ids::{ClassId, FieldId, FunctionId, LibraryId, ScriptId, TokenPos, TypeParamId};
use super::types::Type;
use crate::vm::value::Value;

/// Instance layout computed at finalization
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassLayout {
    /// Number of instance field slots including inherited ones
    pub instance_size: usize,
}

/// A class
#[derive(Debug)]
pub struct ClassEntity {
    /// Class id
    pub id: ClassId,
    /// Internal name
    pub name: String,
    /// Declaring library
    pub library: LibraryId,
    /// Supertype (`None` only for the root class)
    pub super_type: Option<Type>,
    /// Implemented interfaces
    pub interfaces: Vec<Type>,
    /// Mixin of a mixin application
    pub mixin: Option<Type>,
    /// Declared type parameters
    pub type_parameters: Vec<TypeParamId>,
    /// Fields in declaration order
    pub fields: Vec<FieldId>,
    /// Functions in declaration order (constructors included)
    pub functions: Vec<FunctionId>,
    /// Abstract class
    pub is_abstract: bool,
    /// VM implementation class, hidden from reflection
    pub is_implementation: bool,
    /// Mixin application class
    pub is_mixin_application: bool,
    /// Mixin application declared with a name (`class C = S with M;`)
    pub is_mixin_typedef: bool,
    /// Signature function of a function-type or typedef class
    pub signature_function: Option<FunctionId>,
    /// Script containing the declaration
    pub script: Option<ScriptId>,
    /// Declaration position
    pub token_pos: Option<TokenPos>,
    /// Metadata annotations
    pub metadata: Vec<Value>,
    pub(crate) layout: OnceCell<ClassLayout>,
}

impl ClassEntity {
    /// Finalization state
    pub fn is_finalized(&self) -> bool {
        self.layout.get().is_some()
    }

    /// Instance layout, if finalized
    pub fn layout(&self) -> Option<ClassLayout> {
        self.layout.get().copied()
    }

    /// Generic class
    pub fn is_generic(&self) -> bool {
        !self.type_parameters.is_empty()
    }

    /// Function-type or typedef class
    pub fn is_signature_class(&self) -> bool {
        self.signature_function.is_some()
    }

    /// Superclass id
    pub fn superclass(&self) -> Option<ClassId> {
        self.super_type.as_ref().and_then(Type::class)
    }
}

/// An import of a library into another
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Import {
    /// Imported library
    pub library: LibraryId,
    /// Import prefix (`import 'x' as p;`)
    pub prefix: Option<String>,
}

/// A library
#[derive(Debug)]
pub struct LibraryEntity {
    /// Library id
    pub id: LibraryId,
    /// Library name
    pub name: String,
    /// Library URL
    pub url: String,
    /// Imports in declaration order
    pub imports: Vec<Import>,
    /// Top-level classes
    pub classes: Vec<ClassId>,
    /// Top-level functions
    pub functions: Vec<FunctionId>,
    /// Top-level fields
    pub fields: Vec<FieldId>,
    /// Main script
    pub script: Option<ScriptId>,
    /// Metadata annotations
    pub metadata: Vec<Value>,
}

impl LibraryEntity {
    /// Suffix appended to private names declared in this library
    pub fn private_key(&self) -> String {
        format!("@{}", self.id.0)
    }
}

/// A class type parameter
#[derive(Debug)]
pub struct TypeParameterEntity {
    /// Type parameter id
    pub id: TypeParamId,
    /// Name
    pub name: String,
    /// Index within the owner's type parameter list
    pub index: usize,
    /// Declaring class
    pub owner: ClassId,
    /// Upper bound
    pub bound: Type,
}
