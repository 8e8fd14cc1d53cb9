//! Mirror construction and reflective operations

use crate::vm::debugger::Debugger;
use crate::vm::invoke::{Arguments, InvokeError, InvokeResult, Invoker, Lookup};
use crate::vm::program::{
    ClassId, FieldId, FunctionId, FunctionKind, LibraryId, Owner, ParameterKind, Program, Type,
    TypeParamId,
};
use crate::vm::value::Value;

use super::mirror::{
    ClassMirror, ClosureMirror, FunctionTypeMirror, InstanceMirror, IsolateMirror, LibraryMirror,
    MethodFlags, MethodMirror, Mirror, MirrorReference, MirrorSystemMirror, ParameterMirror,
    SpecialType, TypeVariableMirror, TypedefMirror, VariableMirror,
};

/// Builds mirrors over one program
///
/// When attached to a debugger, every operation that may run user code does so with
/// breakpoints ignored.
pub struct MirrorFactory<'a> {
    program: &'a Program,
    isolate_name: String,
    debugger: Option<&'a Debugger>,
}

impl<'a> MirrorFactory<'a> {
    /// Create a factory
    pub fn new(program: &'a Program, isolate_name: impl Into<String>) -> Self {
        Self {
            program,
            isolate_name: isolate_name.into(),
            debugger: None,
        }
    }

    /// Run user code with this debugger's breakpoints ignored
    pub fn with_debugger(mut self, debugger: &'a Debugger) -> Self {
        self.debugger = Some(debugger);
        self
    }

    /// Program being reflected
    pub fn program(&self) -> &'a Program {
        self.program
    }

    // ========================================================================
    // Roots
    // ========================================================================

    /// All libraries plus the isolate
    pub fn mirror_system(&self) -> Mirror {
        let libraries = self
            .program
            .libraries()
            .iter()
            .map(|l| self.library_mirror(l.id))
            .collect();
        Mirror::MirrorSystem(MirrorSystemMirror {
            libraries,
            isolate: Box::new(self.isolate_mirror()),
        })
    }

    /// Debug name and root library of the isolate
    pub fn isolate_mirror(&self) -> Mirror {
        Mirror::Isolate(IsolateMirror {
            debug_name: self.isolate_name.clone(),
            root_library: self
                .program
                .root_library()
                .map(|l| Box::new(self.library_mirror(l))),
        })
    }

    /// Library mirror
    pub fn library_mirror(&self, lib: LibraryId) -> Mirror {
        let entity = self.program.library(lib);
        Mirror::Library(LibraryMirror {
            library: lib,
            simple_name: entity.name.clone(),
            url: entity.url.clone(),
        })
    }

    /// Mirror of a runtime value
    pub fn reflect(&self, value: &Value) -> Mirror {
        match value.as_closure() {
            Some(closure) => Mirror::Closure(ClosureMirror {
                reflectee: value.clone(),
                function: closure.function,
            }),
            None => Mirror::Instance(InstanceMirror {
                reflectee: value.clone(),
                class: self.program.class_of(value),
            }),
        }
    }

    /// Mirror of a type
    pub fn reflect_type(&self, ty: &Type) -> InvokeResult<Mirror> {
        match ty {
            Type::Dynamic => Ok(Mirror::Special(SpecialType::Dynamic)),
            Type::Void => Ok(Mirror::Special(SpecialType::Void)),
            Type::Parameter(tp) => Ok(self.type_variable_mirror(*tp)),
            Type::Interface { class, .. } => self.create_class_mirror(*class, ty),
        }
    }

    /// Class mirror for `class` as seen through `ty`
    ///
    /// Signature classes become function-type mirrors (canonical) or typedef mirrors.
    /// The `dynamic` class maps to the special `dynamic` mirror.
    pub fn create_class_mirror(&self, class: ClassId, ty: &Type) -> InvokeResult<Mirror> {
        let program = self.program;
        let entity = program.class(class);
        if class == program.core().dynamic {
            return Ok(Mirror::Special(SpecialType::Dynamic));
        }
        if let Some(signature) = entity.signature_function {
            if program.is_canonical_signature_class(class) {
                return Ok(Mirror::FunctionType(FunctionTypeMirror { class, signature }));
            }
            return Ok(Mirror::Typedef(TypedefMirror {
                class,
                simple_name: Program::unmangle_name(&entity.name).to_string(),
                signature,
            }));
        }
        let simple_name = if entity.is_mixin_application && !entity.is_mixin_typedef {
            None
        } else {
            Some(Program::unmangle_name(&entity.name).to_string())
        };
        Ok(Mirror::Class(ClassMirror {
            class,
            simple_name,
            reflected_type: ty.clone(),
            library: entity.library,
            is_abstract: entity.is_abstract,
            is_generic: entity.is_generic(),
            is_mixin_application: entity.is_mixin_application,
        }))
    }

    fn class_mirror(&self, class: ClassId) -> InvokeResult<Mirror> {
        self.create_class_mirror(class, &Type::rare(class))
    }

    /// Method mirror
    pub fn method_mirror(&self, function: FunctionId) -> Mirror {
        let func = self.program.function(function);
        let is_ctor = func.kind.is_constructor();
        let flags = MethodFlags {
            is_static: func.is_static && !is_ctor,
            is_abstract: func.is_abstract,
            is_getter: matches!(func.kind, FunctionKind::Getter | FunctionKind::ImplicitGetter),
            is_setter: matches!(func.kind, FunctionKind::Setter | FunctionKind::ImplicitSetter),
            is_constructor: is_ctor,
            is_const: func.is_const,
            is_generative: func.kind == FunctionKind::Constructor,
            is_redirecting: func.is_redirecting || func.redirect.is_some(),
            is_factory: func.kind == FunctionKind::Factory,
        };
        let name = if is_ctor {
            func.constructor_name()
        } else {
            Program::unmangle_name(&func.name)
        };
        Mirror::Method(MethodMirror {
            function,
            simple_name: name.to_string(),
            flags,
        })
    }

    /// Variable mirror
    pub fn variable_mirror(&self, field: FieldId) -> Mirror {
        let entity = self.program.field(field);
        Mirror::Variable(VariableMirror {
            field,
            simple_name: Program::unmangle_name(&entity.name).to_string(),
            is_static: entity.is_static,
            is_final: entity.is_final,
            is_const: entity.is_const,
        })
    }

    /// Type variable mirror
    pub fn type_variable_mirror(&self, tp: TypeParamId) -> Mirror {
        Mirror::TypeVariable(TypeVariableMirror {
            type_parameter: tp,
            simple_name: self.program.type_param(tp).name.clone(),
        })
    }

    /// Mirror for a reference
    pub fn mirror_for(&self, reference: MirrorReference) -> InvokeResult<Mirror> {
        Ok(match reference {
            MirrorReference::Class(c) => self.class_mirror(c)?,
            MirrorReference::Function(f) => self.method_mirror(f),
            MirrorReference::Field(f) => self.variable_mirror(f),
            MirrorReference::Library(l) => self.library_mirror(l),
            MirrorReference::TypeParameter(tp) => self.type_variable_mirror(tp),
        })
    }

    // ========================================================================
    // Classes
    // ========================================================================

    /// Fields in declaration order, then visible methods, getters and setters
    pub fn class_members(&self, class: ClassId) -> InvokeResult<Vec<Mirror>> {
        self.program.check_finalized(class)?;
        let entity = self.program.class(class);
        let fields = entity.fields.iter().map(|&f| self.variable_mirror(f));
        let methods = entity
            .functions
            .iter()
            .copied()
            .filter(|&f| {
                let func = self.program.function(f);
                func.is_visible
                    && matches!(
                        func.kind,
                        FunctionKind::Regular | FunctionKind::Getter | FunctionKind::Setter
                    )
            })
            .map(|f| self.method_mirror(f));
        Ok(fields.chain(methods).collect())
    }

    /// Visible constructors and factories in declaration order
    pub fn class_constructors(&self, class: ClassId) -> InvokeResult<Vec<Mirror>> {
        self.program.check_finalized(class)?;
        Ok(self
            .program
            .class(class)
            .functions
            .iter()
            .copied()
            .filter(|&f| {
                let func = self.program.function(f);
                func.is_visible && func.kind.is_constructor()
            })
            .map(|f| self.method_mirror(f))
            .collect())
    }

    /// Type arguments of a type; a type without explicit arguments yields one
    /// `dynamic` per declared type parameter
    pub fn type_arguments(&self, ty: &Type) -> InvokeResult<Vec<Mirror>> {
        let class = match ty.class() {
            Some(c) => c,
            None => return Ok(Vec::new()),
        };
        self.program.check_finalized(class)?;
        match ty.arguments() {
            Some(args) => args.iter().map(|t| self.reflect_type(t)).collect(),
            None => Ok(self
                .program
                .class(class)
                .type_parameters
                .iter()
                .map(|_| Mirror::Special(SpecialType::Dynamic))
                .collect()),
        }
    }

    /// Declared type parameters
    pub fn type_variables(&self, class: ClassId) -> Vec<Mirror> {
        self.program
            .class(class)
            .type_parameters
            .iter()
            .map(|&tp| self.type_variable_mirror(tp))
            .collect()
    }

    /// Declared supertype (uninstantiated)
    pub fn supertype(&self, class: ClassId) -> InvokeResult<Option<Mirror>> {
        self.program.check_finalized(class)?;
        self.program
            .class(class)
            .super_type
            .as_ref()
            .map(|t| self.reflect_type(t))
            .transpose()
    }

    /// Supertype with the type arguments of `ty` substituted
    pub fn supertype_instantiated(&self, ty: &Type) -> InvokeResult<Option<Mirror>> {
        let class = match ty.class() {
            Some(c) => c,
            None => return Ok(None),
        };
        self.program.check_finalized(class)?;
        match &self.program.class(class).super_type {
            Some(sup) => {
                let instantiated = self.program.instantiate(sup, ty.arguments());
                self.reflect_type(&instantiated).map(Some)
            }
            None => Ok(None),
        }
    }

    /// Implemented interfaces
    pub fn interfaces(&self, class: ClassId) -> InvokeResult<Vec<Mirror>> {
        self.program.check_finalized(class)?;
        self.program
            .class(class)
            .interfaces
            .iter()
            .map(|t| self.reflect_type(t))
            .collect()
    }

    /// Mixin of a mixin application
    pub fn mixin(&self, class: ClassId) -> InvokeResult<Option<Mirror>> {
        self.program.check_finalized(class)?;
        self.program
            .class(class)
            .mixin
            .as_ref()
            .map(|t| self.reflect_type(t))
            .transpose()
    }

    /// Declaring library of a class
    pub fn class_library(&self, class: ClassId) -> Mirror {
        self.library_mirror(self.program.class(class).library)
    }

    // ========================================================================
    // Libraries
    // ========================================================================

    /// Top-level classes, functions and fields; implementation classes, signature
    /// classes and `dynamic` are skipped
    pub fn library_members(&self, lib: LibraryId) -> InvokeResult<Vec<Mirror>> {
        let program = self.program;
        let entity = program.library(lib);
        let mut members = Vec::new();
        for &c in &entity.classes {
            let class = program.class(c);
            if class.is_implementation || class.is_signature_class() || c == program.core().dynamic {
                continue;
            }
            members.push(self.class_mirror(c)?);
        }
        for &f in &entity.functions {
            let func = program.function(f);
            if func.is_visible && !func.kind.is_implicit() {
                members.push(self.method_mirror(f));
            }
        }
        members.extend(entity.fields.iter().map(|&f| self.variable_mirror(f)));
        Ok(members)
    }

    // ========================================================================
    // Functions
    // ========================================================================

    /// Parameter mirrors; empty for getters and implicit functions
    ///
    /// Constructor parameters force the parameter reparse first.
    pub fn method_parameters(&self, function: FunctionId) -> InvokeResult<Vec<Mirror>> {
        let func = self.program.function(function);
        if func.kind == FunctionKind::Getter || func.kind.is_implicit() {
            return Ok(Vec::new());
        }
        let details = self.program.ensure_parameters_parsed(function)?;
        Ok(func
            .parameters
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let detail = details.get(i);
                Mirror::Parameter(ParameterMirror {
                    function,
                    simple_name: p.name.clone(),
                    position: i,
                    is_optional: p.kind != ParameterKind::Required,
                    is_named: p.kind == ParameterKind::Named,
                    is_final: detail.map_or(false, |d| d.is_final),
                    default_value: detail.and_then(|d| d.default_value.clone()),
                    metadata: detail.map(|d| d.metadata.clone()).unwrap_or_default(),
                    ty: p.ty.clone(),
                })
            })
            .collect())
    }

    /// Declared result type
    pub fn return_type(&self, function: FunctionId) -> InvokeResult<Mirror> {
        self.reflect_type(&self.program.function(function).result_type)
    }

    /// Owner of a function: the enclosing method for closures, else class or library
    pub fn method_owner(&self, function: FunctionId) -> InvokeResult<Mirror> {
        let func = self.program.function(function);
        if let (FunctionKind::Closure, Some(parent)) = (func.kind, func.parent) {
            return Ok(self.method_mirror(parent));
        }
        self.owner_mirror(func.owner)
    }

    /// Owner of a field
    pub fn variable_owner(&self, field: FieldId) -> InvokeResult<Mirror> {
        self.owner_mirror(self.program.field(field).owner)
    }

    fn owner_mirror(&self, owner: Owner) -> InvokeResult<Mirror> {
        match owner {
            Owner::Class(c) => self.class_mirror(c),
            Owner::Library(l) => Ok(self.library_mirror(l)),
        }
    }

    /// Source text of a function
    pub fn source(&self, function: FunctionId) -> Option<String> {
        let func = self.program.function(function);
        let script = self.program.function_script(function)?;
        let (start, end) = (func.token_pos?, func.end_token_pos?);
        script.source_slice(start, end).map(str::to_string)
    }

    /// Declared type of a field
    pub fn variable_type(&self, field: FieldId) -> InvokeResult<Mirror> {
        self.reflect_type(&self.program.field(field).ty)
    }

    /// Function a closure runs
    pub fn closure_function(&self, closure: &ClosureMirror) -> Mirror {
        self.method_mirror(closure.function)
    }

    // ========================================================================
    // Type variables, function types, typedefs
    // ========================================================================

    /// Class declaring a type parameter
    pub fn type_variable_owner(&self, tp: TypeParamId) -> InvokeResult<Mirror> {
        self.class_mirror(self.program.type_param(tp).owner)
    }

    /// Upper bound of a type parameter
    pub fn type_variable_upper_bound(&self, tp: TypeParamId) -> InvokeResult<Mirror> {
        self.reflect_type(&self.program.type_param(tp).bound)
    }

    /// The type argument bound to a type parameter by `arguments`
    pub fn type_variable_instantiate_from(
        &self,
        tp: TypeParamId,
        arguments: Option<&[Type]>,
    ) -> InvokeResult<Mirror> {
        let ty = self.program.instantiate(&Type::Parameter(tp), arguments);
        self.reflect_type(&ty)
    }

    /// Function type a typedef stands for
    pub fn typedef_referent(&self, typedef: &TypedefMirror) -> Mirror {
        let canonical = self
            .program
            .function(typedef.signature)
            .signature_class
            .unwrap_or(typedef.class);
        Mirror::FunctionType(FunctionTypeMirror {
            class: canonical,
            signature: typedef.signature,
        })
    }

    /// Parameters of a function type
    pub fn function_type_parameters(&self, ty: &FunctionTypeMirror) -> InvokeResult<Vec<Mirror>> {
        self.method_parameters(ty.signature)
    }

    /// Result type of a function type
    pub fn function_type_return_type(&self, ty: &FunctionTypeMirror) -> InvokeResult<Mirror> {
        self.return_type(ty.signature)
    }

    /// `call` method of a function type
    pub fn function_type_call_method(&self, ty: &FunctionTypeMirror) -> Mirror {
        match self.program.lookup_call_method(ty.class) {
            Some(call) => self.method_mirror(call),
            None => self.method_mirror(ty.signature),
        }
    }

    // ========================================================================
    // Metadata and names
    // ========================================================================

    /// Annotations on the referenced entity
    pub fn metadata(&self, reference: MirrorReference) -> Vec<Value> {
        let program = self.program;
        match reference {
            MirrorReference::Class(c) => program.class(c).metadata.clone(),
            MirrorReference::Function(f) => program.function(f).metadata.clone(),
            MirrorReference::Field(f) => program.field(f).metadata.clone(),
            MirrorReference::Library(l) => program.library(l).metadata.clone(),
            MirrorReference::TypeParameter(_) => Vec::new(),
        }
    }

    /// Internal name for `name` as declared in `lib`
    pub fn mangle_name(&self, name: &str, lib: LibraryId) -> String {
        self.program.mangle_name(lib, name)
    }

    /// Source name of an internal name
    pub fn unmangle_name<'n>(&self, name: &'n str) -> &'n str {
        Program::unmangle_name(name)
    }

    // ========================================================================
    // Invocation through mirrors
    // ========================================================================

    fn run<T>(&self, f: impl FnOnce(&Invoker<'_>) -> InvokeResult<T>) -> InvokeResult<T> {
        let _guard = self.debugger.map(Debugger::ignore_breakpoints);
        f(&Invoker::new(self.program))
    }

    /// Read a member through an instance, class or library mirror
    pub fn get_field(&self, mirror: &Mirror, name: &str) -> InvokeResult<Value> {
        match mirror {
            Mirror::Instance(m) => self.run(|inv| inv.get(&m.reflectee, name)),
            Mirror::Closure(m) => self.run(|inv| inv.get(&m.reflectee, name)),
            Mirror::Class(m) => self.run(|inv| inv.get_static(m.class, name)),
            Mirror::Library(m) => self.run(|inv| inv.get_top_level(m.library, name)),
            other => Err(unsupported(other, "get")),
        }
    }

    /// Write a member through an instance, class or library mirror
    pub fn set_field(&self, mirror: &Mirror, name: &str, value: Value) -> InvokeResult<Value> {
        match mirror {
            Mirror::Instance(m) => self.run(|inv| inv.set(&m.reflectee, name, value)),
            Mirror::Class(m) => self.run(|inv| inv.set_static(m.class, name, value)),
            Mirror::Library(m) => self.run(|inv| inv.set_top_level(m.library, name, value)),
            other => Err(unsupported(other, "set")),
        }
    }

    /// Invoke a member through an instance, closure, class or library mirror
    pub fn invoke(&self, mirror: &Mirror, name: &str, args: &Arguments) -> InvokeResult<Value> {
        match mirror {
            Mirror::Instance(m) => self.run(|inv| inv.invoke(&m.reflectee, name, args)),
            Mirror::Closure(m) => self.run(|inv| inv.invoke(&m.reflectee, name, args)),
            Mirror::Class(m) => self.run(|inv| inv.invoke_static(m.class, name, args)),
            Mirror::Library(m) => self.run(|inv| inv.invoke_top_level(m.library, name, args)),
            other => Err(unsupported(other, "invoke")),
        }
    }

    /// Construct through a class mirror; explicit type arguments of the mirror's
    /// type are passed along
    pub fn new_instance(
        &self,
        mirror: &Mirror,
        constructor_name: &str,
        args: &Arguments,
    ) -> InvokeResult<Value> {
        match mirror {
            Mirror::Class(m) => {
                let type_args = m.reflected_type.arguments().map(<[Type]>::to_vec);
                self.run(|inv| inv.new_instance(m.class, constructor_name, args, type_args))
            }
            other => Err(unsupported(other, "newInstance")),
        }
    }

    /// Call the reflected closure
    pub fn apply(&self, mirror: &Mirror, args: &Arguments) -> InvokeResult<Value> {
        match mirror {
            Mirror::Closure(m) => self.run(|inv| inv.apply(&m.reflectee, args)),
            Mirror::Instance(m) => self.run(|inv| inv.apply(&m.reflectee, args)),
            other => Err(unsupported(other, "apply")),
        }
    }

    /// Lexical lookup inside the reflected closure
    pub fn find_in_context(&self, mirror: &ClosureMirror, name: &str) -> InvokeResult<Lookup<Value>> {
        self.run(|inv| inv.find_in_context(&mirror.reflectee, name))
    }
}

fn unsupported(mirror: &Mirror, op: &str) -> InvokeError {
    InvokeError::MirroredCompilationError(format!("{} does not support {}", mirror.kind_name(), op))
}
