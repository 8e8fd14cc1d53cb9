//! Object model
//!
//! Read-only queries over the runtime's representation of a compiled program:
//! classes, functions, fields, libraries, type parameters and scripts.
//!
//! Everything here is a pure query with two exceptions, both lazy and idempotent:
//!
//! - [`Program::ensure_parameters_parsed`] runs the constructor parameter reparse that
//!   discovers default values, `final` modifiers and metadata.
//! - [`Program::redirection_target`] resolves a redirecting factory's target the first
//!   time it is needed.
//!
//! Member queries on classes require finalization ([`Program::finalize_class`]); an
//! unfinalized class yields [`ProgramError::NotFinalized`].

mod builder;
mod class;
mod field;
mod function;
mod ids;
mod script;
mod types;

pub use builder::{ClassDecl, FieldDecl, FunctionDecl, ProgramBuilder, CORE_LIBRARY_URL};
pub use class::{ClassEntity, ClassLayout, Import, LibraryEntity, TypeParameterEntity};
pub use field::{FieldEntity, StaticState};
pub use function::{
    FunctionCode, FunctionEntity, FunctionKind, NativeBody, NativeFn, Owner, ParameterDecl,
    ParameterDetails, ParameterKind, RedirectionDecl,
};
pub use ids::{ClassId, FieldId, FunctionId, LibraryId, ScriptId, TokenPos, TypeParamId};
pub use script::Script;
pub use types::Type;

use std::sync::Arc;

use rustc_hash::FxHashMap;

use function::DetailsSource;
use crate::vm::value::{Instance, Value};

/// Object model errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProgramError {
    /// A reflective query hit an unfinalized class
    #[error("Class '{0}' is not finalized")]
    NotFinalized(String),

    /// Superclass chain loops
    #[error("Cyclic class hierarchy involving '{0}'")]
    CyclicHierarchy(String),

    /// Supertype, interface or mixin is not a class type
    #[error("Invalid supertype for class '{0}'")]
    InvalidSupertype(String),

    /// Redirecting factory target could not be found
    #[error("Cannot resolve redirecting factory '{name}': {reason}")]
    UnresolvedRedirection {
        /// Factory name
        name: String,
        /// What went wrong
        reason: String,
    },

    /// Compile error discovered by a lazy reparse
    #[error("{0}")]
    DelayedCompilationError(String),

    /// Two libraries share a URL
    #[error("Duplicate library url '{0}'")]
    DuplicateLibrary(String),

    /// Abstract class instantiated
    #[error("Cannot instantiate abstract class '{0}'")]
    AbstractInstantiation(String),
}

/// Object model result type
pub type ProgramResult<T> = Result<T, ProgramError>;

/// Which accessor of a name a lookup wants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Accessor {
    /// Regular method
    Method,
    /// Getter
    Getter,
    /// Setter
    Setter,
}

impl Accessor {
    fn matches(self, kind: FunctionKind) -> bool {
        matches!(
            (self, kind),
            (Accessor::Method, FunctionKind::Regular)
                | (Accessor::Getter, FunctionKind::Getter)
                | (Accessor::Setter, FunctionKind::Setter)
        )
    }
}

/// A top-level declaration of a library
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LibraryMember {
    /// Class
    Class(ClassId),
    /// Function, getter or setter
    Function(FunctionId),
    /// Field
    Field(FieldId),
}

/// Well-known classes of the core library
#[derive(Debug, Clone, Copy)]
pub struct CoreClasses {
    /// Core library
    pub library: LibraryId,
    /// Root of the class hierarchy
    pub object: ClassId,
    /// Class of `null`
    pub null: ClassId,
    /// `bool`
    pub bool_: ClassId,
    /// `int`
    pub int: ClassId,
    /// `double`
    pub double: ClassId,
    /// `String`
    pub string: ClassId,
    /// `List`
    pub list: ClassId,
    /// `Function`
    pub function: ClassId,
    /// `Type`
    pub type_: ClassId,
    /// The `dynamic` class
    pub dynamic: ClassId,
}

/// The compiled program of one isolate
#[derive(Debug)]
pub struct Program {
    pub(crate) libraries: Vec<LibraryEntity>,
    pub(crate) classes: Vec<ClassEntity>,
    pub(crate) functions: Vec<FunctionEntity>,
    pub(crate) fields: Vec<FieldEntity>,
    pub(crate) type_params: Vec<TypeParameterEntity>,
    pub(crate) scripts: Vec<Script>,
    pub(crate) library_urls: FxHashMap<String, LibraryId>,
    pub(crate) core: CoreClasses,
    pub(crate) root_library: Option<LibraryId>,
}

/// Upper bound on supertype walks; a deeper chain means a cycle slipped through
const MAX_HIERARCHY_DEPTH: usize = 1024;

impl Program {
    // ========================================================================
    // Entity access
    // ========================================================================

    /// Class by id
    pub fn class(&self, id: ClassId) -> &ClassEntity {
        &self.classes[id.index()]
    }

    /// Function by id
    pub fn function(&self, id: FunctionId) -> &FunctionEntity {
        &self.functions[id.index()]
    }

    /// Field by id
    pub fn field(&self, id: FieldId) -> &FieldEntity {
        &self.fields[id.index()]
    }

    /// Library by id
    pub fn library(&self, id: LibraryId) -> &LibraryEntity {
        &self.libraries[id.index()]
    }

    /// Type parameter by id
    pub fn type_param(&self, id: TypeParamId) -> &TypeParameterEntity {
        &self.type_params[id.index()]
    }

    /// Script by id
    pub fn script(&self, id: ScriptId) -> &Script {
        &self.scripts[id.index()]
    }

    /// All libraries in load order
    pub fn libraries(&self) -> &[LibraryEntity] {
        &self.libraries
    }

    /// All classes
    pub fn classes(&self) -> &[ClassEntity] {
        &self.classes
    }

    /// All functions
    pub fn functions(&self) -> &[FunctionEntity] {
        &self.functions
    }

    /// All scripts
    pub fn scripts(&self) -> &[Script] {
        &self.scripts
    }

    /// Core classes
    pub fn core(&self) -> &CoreClasses {
        &self.core
    }

    /// Root library
    pub fn root_library(&self) -> Option<LibraryId> {
        self.root_library
    }

    /// Library by URL
    pub fn library_by_url(&self, url: &str) -> Option<LibraryId> {
        self.library_urls.get(url).copied()
    }

    /// Script by URL
    pub fn script_by_url(&self, url: &str) -> Option<&Script> {
        self.scripts.iter().find(|s| s.url == url)
    }

    // ========================================================================
    // Library lookups
    // ========================================================================

    /// Class declared in a library
    pub fn library_class(&self, lib: LibraryId, name: &str) -> Option<ClassId> {
        self.library(lib)
            .classes
            .iter()
            .copied()
            .find(|&c| self.class(c).name == name)
    }

    /// Top-level function of the given accessor kind
    pub fn library_function(
        &self,
        lib: LibraryId,
        name: &str,
        accessor: Accessor,
    ) -> Option<FunctionId> {
        self.library(lib).functions.iter().copied().find(|&f| {
            let func = self.function(f);
            func.name == name && accessor.matches(func.kind)
        })
    }

    /// Top-level field
    pub fn library_field(&self, lib: LibraryId, name: &str) -> Option<FieldId> {
        self.library(lib)
            .fields
            .iter()
            .copied()
            .find(|&f| self.field(f).name == name)
    }

    /// Any top-level declaration named `name`
    pub fn library_lookup_local(&self, lib: LibraryId, name: &str) -> Option<LibraryMember> {
        if let Some(f) = self.library_field(lib, name) {
            return Some(LibraryMember::Field(f));
        }
        for accessor in [Accessor::Getter, Accessor::Method, Accessor::Setter] {
            if let Some(f) = self.library_function(lib, name, accessor) {
                return Some(LibraryMember::Function(f));
            }
        }
        self.library_class(lib, name).map(LibraryMember::Class)
    }

    /// Unprefixed imports in declaration order
    pub fn imported_libraries(&self, lib: LibraryId) -> impl Iterator<Item = LibraryId> + '_ {
        self.library(lib)
            .imports
            .iter()
            .filter(|i| i.prefix.is_none())
            .map(|i| i.library)
    }

    /// Libraries imported under `prefix`
    pub fn prefixed_libraries(&self, lib: LibraryId, prefix: &str) -> Vec<LibraryId> {
        self.library(lib)
            .imports
            .iter()
            .filter(|i| i.prefix.as_deref() == Some(prefix))
            .map(|i| i.library)
            .collect()
    }

    /// Internal form of a name declared in `lib`; private names carry the library key
    pub fn mangle_name(&self, lib: LibraryId, name: &str) -> String {
        if name.starts_with('_') && !name.contains('@') {
            format!("{}{}", name, self.library(lib).private_key())
        } else {
            name.to_string()
        }
    }

    /// Source form of an internal name
    pub fn unmangle_name(name: &str) -> &str {
        match name.find('@') {
            Some(at) if name.starts_with('_') => &name[..at],
            _ => name,
        }
    }

    /// Resolve a class name in a library's scope (`Name` or `prefix.Name`)
    pub fn resolve_class_name(&self, lib: LibraryId, name: &str) -> Option<ClassId> {
        if let Some((prefix, rest)) = name.split_once('.') {
            return self
                .prefixed_libraries(lib, prefix)
                .into_iter()
                .find_map(|l| self.library_class(l, rest));
        }
        self.library_class(lib, name)
            .or_else(|| self.imported_libraries(lib).find_map(|l| self.library_class(l, name)))
    }

    // ========================================================================
    // Class lookups
    // ========================================================================

    /// Superclass chain starting at `class` itself
    pub fn super_chain(&self, class: ClassId) -> SuperChain<'_> {
        SuperChain {
            program: self,
            next: Some(class),
            steps: 0,
        }
    }

    /// Non-constructor function declared directly in a class
    pub fn class_function(
        &self,
        class: ClassId,
        name: &str,
        accessor: Accessor,
    ) -> Option<FunctionId> {
        self.class(class).functions.iter().copied().find(|&f| {
            let func = self.function(f);
            func.name == name && accessor.matches(func.kind)
        })
    }

    /// Static function declared in a class (statics are not inherited)
    pub fn class_static_function(
        &self,
        class: ClassId,
        name: &str,
        accessor: Accessor,
    ) -> Option<FunctionId> {
        self.class_function(class, name, accessor)
            .filter(|&f| self.function(f).is_static)
    }

    /// Static field declared in a class
    pub fn class_static_field(&self, class: ClassId, name: &str) -> Option<FieldId> {
        self.class(class).fields.iter().copied().find(|&f| {
            let field = self.field(f);
            field.is_static && field.name == name
        })
    }

    /// Instance function, searched up the superclass chain
    pub fn lookup_dynamic_function(
        &self,
        class: ClassId,
        name: &str,
        accessor: Accessor,
    ) -> Option<FunctionId> {
        self.super_chain(class).find_map(|c| {
            self.class_function(c, name, accessor)
                .filter(|&f| !self.function(f).is_static)
        })
    }

    /// Instance field, searched up the superclass chain
    pub fn lookup_instance_field(&self, class: ClassId, name: &str) -> Option<FieldId> {
        self.super_chain(class).find_map(|c| {
            self.class(c).fields.iter().copied().find(|&f| {
                let field = self.field(f);
                !field.is_static && field.name == name
            })
        })
    }

    /// Constructor or factory by constructor name (empty for the unnamed one)
    pub fn class_constructor(&self, class: ClassId, ctor_name: &str) -> Option<FunctionId> {
        let internal = format!("{}.{}", self.class(class).name, ctor_name);
        self.class(class).functions.iter().copied().find(|&f| {
            let func = self.function(f);
            func.kind.is_constructor() && func.name == internal
        })
    }

    /// Implicit closure function used when `method` is torn off
    pub fn implicit_closure(&self, method: FunctionId) -> Option<FunctionId> {
        self.function(method).implicit_closure
    }

    /// `call` method of a class, searched up the superclass chain
    pub fn lookup_call_method(&self, class: ClassId) -> Option<FunctionId> {
        self.lookup_dynamic_function(class, "call", Accessor::Method)
    }

    /// Direct subclasses
    pub fn direct_subclasses(&self, class: ClassId) -> Vec<ClassId> {
        self.classes
            .iter()
            .filter(|c| c.superclass() == Some(class))
            .map(|c| c.id)
            .collect()
    }

    /// Whether a signature class is the canonical class of its signature function
    pub fn is_canonical_signature_class(&self, class: ClassId) -> bool {
        match self.class(class).signature_function {
            Some(sig) => self.function(sig).signature_class == Some(class),
            None => false,
        }
    }

    /// Raw type of a class
    pub fn rare_type(&self, class: ClassId) -> Type {
        Type::rare(class)
    }

    /// Class of a runtime value
    pub fn class_of(&self, value: &Value) -> ClassId {
        match value {
            Value::Null => self.core.null,
            Value::Bool(_) => self.core.bool_,
            Value::Int(_) => self.core.int,
            Value::Double(_) => self.core.double,
            Value::Str(_) => self.core.string,
            Value::List(_) => self.core.list,
            Value::Type(_) => self.core.type_,
            Value::Instance(inst) => inst.class,
            Value::Closure(c) => self
                .function(c.function)
                .signature_class
                .unwrap_or(self.core.function),
        }
    }

    /// Runtime type of a value
    pub fn runtime_type(&self, value: &Value) -> Type {
        match value {
            Value::Instance(inst) => Type::Interface {
                class: inst.class,
                arguments: inst.type_arguments.clone(),
            },
            other => Type::rare(self.class_of(other)),
        }
    }

    // ========================================================================
    // Finalization
    // ========================================================================

    /// Finalize a class and its superclasses, assigning instance field slots
    pub fn finalize_class(&self, class: ClassId) -> ProgramResult<ClassLayout> {
        self.finalize_at_depth(class, 0)
    }

    fn finalize_at_depth(&self, class: ClassId, depth: usize) -> ProgramResult<ClassLayout> {
        let entity = self.class(class);
        if let Some(layout) = entity.layout.get() {
            return Ok(*layout);
        }
        if depth > MAX_HIERARCHY_DEPTH.min(self.classes.len()) {
            return Err(ProgramError::CyclicHierarchy(entity.name.clone()));
        }
        let base = match &entity.super_type {
            None => 0,
            Some(Type::Interface { class: sup, .. }) => {
                self.finalize_at_depth(*sup, depth + 1)?.instance_size
            }
            Some(_) => return Err(ProgramError::InvalidSupertype(entity.name.clone())),
        };
        let bad_interface = entity
            .interfaces
            .iter()
            .chain(entity.mixin.iter())
            .any(|t| t.class().is_none());
        if bad_interface {
            return Err(ProgramError::InvalidSupertype(entity.name.clone()));
        }

        let mut size = base;
        for &f in &entity.fields {
            let field = self.field(f);
            if field.is_static {
                continue;
            }
            let slot = *field.slot.get_or_init(|| size);
            size = slot + 1;
        }
        let layout = *entity.layout.get_or_init(|| ClassLayout {
            instance_size: size,
        });
        log::trace!("finalized class {} (instance size {})", entity.name, size);
        Ok(layout)
    }

    /// Finalize every class
    pub fn finalize_all(&self) -> ProgramResult<()> {
        for i in 0..self.classes.len() {
            self.finalize_class(ClassId(i as u32))?;
        }
        Ok(())
    }

    /// Fail with `NotFinalized` unless the class is finalized
    pub fn check_finalized(&self, class: ClassId) -> ProgramResult<()> {
        let entity = self.class(class);
        if entity.is_finalized() {
            Ok(())
        } else {
            Err(ProgramError::NotFinalized(entity.name.clone()))
        }
    }

    /// Allocate an instance with initial field values
    pub fn allocate(
        &self,
        class: ClassId,
        type_arguments: Option<Vec<Type>>,
    ) -> ProgramResult<Arc<Instance>> {
        let entity = self.class(class);
        let layout = entity
            .layout()
            .ok_or_else(|| ProgramError::NotFinalized(entity.name.clone()))?;
        if entity.is_abstract {
            return Err(ProgramError::AbstractInstantiation(entity.name.clone()));
        }
        let instance = Instance::new(class, type_arguments, layout.instance_size);
        for c in self.super_chain(class) {
            for &f in &self.class(c).fields {
                let field = self.field(f);
                if let (false, Some(slot), Some(init)) =
                    (field.is_static, field.slot(), field.initial_value.as_ref())
                {
                    instance.set_field(slot, init.clone());
                }
            }
        }
        Ok(Arc::new(instance))
    }

    // ========================================================================
    // Lazy fills
    // ========================================================================

    /// Parameter details, running the constructor reparse on first use
    pub fn ensure_parameters_parsed(&self, function: FunctionId) -> ProgramResult<&[ParameterDetails]> {
        let func = self.function(function);
        func.details
            .get_or_try_init(|| match &func.details_source {
                DetailsSource::Eager => Ok(vec![ParameterDetails::default(); func.parameters.len()]),
                DetailsSource::Deferred(Ok(details)) => {
                    log::debug!("reparsed parameters of {}", func.name);
                    Ok(details.clone())
                }
                DetailsSource::Deferred(Err(msg)) => {
                    Err(ProgramError::DelayedCompilationError(msg.clone()))
                }
            })
            .map(Vec::as_slice)
    }

    /// Final target of a redirecting factory; a non-redirecting function is its own
    /// target
    pub fn redirection_target(&self, function: FunctionId) -> ProgramResult<(ClassId, FunctionId)> {
        let func = self.function(function);
        if let Some(target) = func.redirection.get() {
            return Ok(*target);
        }
        let owner = match func.owner {
            Owner::Class(c) => c,
            Owner::Library(_) => {
                return Err(ProgramError::UnresolvedRedirection {
                    name: func.name.clone(),
                    reason: "not a constructor".to_string(),
                })
            }
        };
        if func.redirect.is_none() {
            return Ok((owner, function));
        }

        let mut current = function;
        for _ in 0..MAX_HIERARCHY_DEPTH {
            let cur = self.function(current);
            let decl = match &cur.redirect {
                Some(decl) => decl,
                None => {
                    let class = match cur.owner {
                        Owner::Class(c) => c,
                        Owner::Library(_) => owner,
                    };
                    let target = *func.redirection.get_or_init(|| (class, current));
                    log::debug!(
                        "resolved redirecting factory {} -> {}",
                        func.name,
                        self.function(target.1).name
                    );
                    return Ok(target);
                }
            };
            let lib = match cur.owner {
                Owner::Class(c) => self.class(c).library,
                Owner::Library(l) => l,
            };
            let class = self.resolve_class_name(lib, &decl.class_name).ok_or_else(|| {
                ProgramError::UnresolvedRedirection {
                    name: func.name.clone(),
                    reason: format!("no class '{}'", decl.class_name),
                }
            })?;
            current = self
                .class_constructor(class, &decl.constructor_name)
                .ok_or_else(|| ProgramError::UnresolvedRedirection {
                    name: func.name.clone(),
                    reason: format!(
                        "no constructor '{}.{}'",
                        decl.class_name, decl.constructor_name
                    ),
                })?;
        }
        Err(ProgramError::UnresolvedRedirection {
            name: func.name.clone(),
            reason: "redirection cycle".to_string(),
        })
    }

    // ========================================================================
    // Subtyping
    // ========================================================================

    /// Substitute class type arguments into a type; `None` arguments mean `dynamic`
    pub fn instantiate(&self, ty: &Type, arguments: Option<&[Type]>) -> Type {
        match ty {
            Type::Parameter(tp) => {
                let index = self.type_param(*tp).index;
                arguments
                    .and_then(|args| args.get(index))
                    .cloned()
                    .unwrap_or(Type::Dynamic)
            }
            Type::Interface {
                class,
                arguments: Some(inner),
            } => Type::Interface {
                class: *class,
                arguments: Some(inner.iter().map(|t| self.instantiate(t, arguments)).collect()),
            },
            other => other.clone(),
        }
    }

    /// Whether an instance of `class<arguments>` is a subtype of `other`, whose type
    /// parameters are bound by `instantiator`
    pub fn is_subtype_of(
        &self,
        class: ClassId,
        arguments: Option<&[Type]>,
        other: &Type,
        instantiator: Option<&[Type]>,
    ) -> bool {
        match other {
            Type::Dynamic | Type::Void => true,
            Type::Parameter(tp) => {
                let index = self.type_param(*tp).index;
                match instantiator.and_then(|args| args.get(index)) {
                    Some(bound) => self.is_subtype_of(class, arguments, bound, None),
                    None => true,
                }
            }
            Type::Interface {
                class: target,
                arguments: target_args,
            } => {
                if class == self.core.null || *target == self.core.object {
                    return true;
                }
                let found = match self.find_supertype(class, arguments, *target, 0) {
                    Some(found) => found,
                    None => return false,
                };
                let target_args = match target_args {
                    Some(args) => args,
                    None => return true,
                };
                target_args.iter().enumerate().all(|(i, t)| {
                    let actual = found
                        .as_ref()
                        .and_then(|args| args.get(i))
                        .cloned()
                        .unwrap_or(Type::Dynamic);
                    let expected = self.instantiate(t, instantiator);
                    self.type_is_subtype(&actual, &expected)
                })
            }
        }
    }

    /// Subtype relation between two fully instantiated types
    pub fn type_is_subtype(&self, sub: &Type, sup: &Type) -> bool {
        if sup.is_top() {
            return true;
        }
        match sub {
            Type::Dynamic => true,
            Type::Void => false,
            Type::Parameter(tp) => self.type_is_subtype(&self.type_param(*tp).bound, sup),
            Type::Interface { class, arguments } => {
                self.is_subtype_of(*class, arguments.as_deref(), sup, None)
            }
        }
    }

    /// Arguments of `target` as seen from `class<arguments>`, if `target` is a
    /// supertype
    fn find_supertype(
        &self,
        class: ClassId,
        arguments: Option<&[Type]>,
        target: ClassId,
        depth: usize,
    ) -> Option<Option<Vec<Type>>> {
        if class == target {
            return Some(arguments.map(<[Type]>::to_vec));
        }
        if depth > MAX_HIERARCHY_DEPTH {
            return None;
        }
        let entity = self.class(class);
        entity
            .super_type
            .iter()
            .chain(entity.mixin.iter())
            .chain(entity.interfaces.iter())
            .find_map(|sup| match sup {
                Type::Interface {
                    class: sup_class,
                    arguments: sup_args,
                } => {
                    let inst = sup_args.as_ref().map(|args| {
                        args.iter()
                            .map(|t| self.instantiate(t, arguments))
                            .collect::<Vec<_>>()
                    });
                    self.find_supertype(*sup_class, inst.as_deref(), target, depth + 1)
                }
                _ => None,
            })
    }

    // ========================================================================
    // Functions and scripts
    // ========================================================================

    /// Library a function is declared in
    pub fn function_library(&self, function: FunctionId) -> LibraryId {
        match self.function(function).owner {
            Owner::Class(c) => self.class(c).library,
            Owner::Library(l) => l,
        }
    }

    /// Class a function is declared in
    pub fn function_class(&self, function: FunctionId) -> Option<ClassId> {
        match self.function(function).owner {
            Owner::Class(c) => Some(c),
            Owner::Library(_) => None,
        }
    }

    /// Script of a function (its own or its library's)
    pub fn function_script(&self, function: FunctionId) -> Option<&Script> {
        let func = self.function(function);
        func.script
            .or_else(|| self.library(self.function_library(function)).script)
            .map(|s| self.script(s))
    }

    /// Whether the debugger may stop in or show a function
    pub fn is_debuggable(&self, function: FunctionId) -> bool {
        let func = self.function(function);
        if !func.is_visible || func.is_synthetic || func.token_pos.is_none() {
            return false;
        }
        if func.kind.is_implicit() || func.kind == FunctionKind::Signature {
            return false;
        }
        match func.owner {
            Owner::Class(c) => !self.class(c).is_implementation,
            Owner::Library(_) => true,
        }
    }

    /// `Class.name` or `name`
    pub fn qualified_function_name(&self, function: FunctionId) -> String {
        let func = self.function(function);
        if let (FunctionKind::ImplicitClosure, Some(method)) = (func.kind, func.parent) {
            return self.qualified_function_name(method);
        }
        let base = match (func.owner, func.kind.is_constructor()) {
            (_, true) => func.name.clone(),
            (Owner::Class(c), false) => format!("{}.{}", self.class(c).name, func.name),
            (Owner::Library(_), false) => func.name.clone(),
        };
        match func.parent {
            Some(parent) => format!("{}.{}", self.qualified_function_name(parent), base),
            None => base,
        }
    }

    /// Functions whose source lives in a script, in id order
    pub fn functions_in_script(&self, script: ScriptId) -> Vec<FunctionId> {
        self.functions
            .iter()
            .filter(|f| self.function_script(f.id).map(|s| s.id) == Some(script))
            .map(|f| f.id)
            .collect()
    }

    /// Innermost debuggable function of a script containing a token position
    pub fn innermost_function_at(&self, script: ScriptId, pos: TokenPos) -> Option<FunctionId> {
        self.functions_in_script(script)
            .into_iter()
            .filter(|&f| self.is_debuggable(f) && self.function(f).contains_token(pos))
            .min_by_key(|&f| {
                let func = self.function(f);
                match (func.token_pos, func.end_token_pos) {
                    (Some(s), Some(e)) => e.0 - s.0,
                    _ => u32::MAX,
                }
            })
    }
}

/// Iterator over a class and its superclasses
pub struct SuperChain<'a> {
    program: &'a Program,
    next: Option<ClassId>,
    steps: usize,
}

impl Iterator for SuperChain<'_> {
    type Item = ClassId;

    fn next(&mut self) -> Option<ClassId> {
        let current = self.next?;
        self.steps += 1;
        self.next = if self.steps > MAX_HIERARCHY_DEPTH {
            None
        } else {
            self.program.class(current).superclass()
        };
        Some(current)
    }
}
