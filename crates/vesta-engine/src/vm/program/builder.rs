//! Program construction
//!
//! The frontend (or the image loader) declares libraries, classes, fields and
//! functions through [`ProgramBuilder`]; [`ProgramBuilder::build`] freezes the arenas
//! into a [`Program`].

use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use super::class::{ClassEntity, Import, LibraryEntity, TypeParameterEntity};
use super::field::{FieldEntity, StaticState};
use super::function::{
    DetailsSource, FunctionCode, FunctionEntity, FunctionKind, NativeBody, Owner, ParameterDecl,
    ParameterDetails, ParameterKind, RedirectionDecl,
};
use super::ids::{ClassId, FieldId, FunctionId, LibraryId, ScriptId, TokenPos, TypeParamId};
use super::script::Script;
use super::types::Type;
use super::{CoreClasses, Program, ProgramError, ProgramResult};
use crate::vm::invoke::{InvokeResult, Invoker};
use crate::vm::value::Value;

/// URL of the core library
pub const CORE_LIBRARY_URL: &str = "vesta:core";

// ============================================================================
// Declarations
// ============================================================================

/// Class declaration
#[derive(Debug, Clone)]
pub struct ClassDecl {
    /// Class name
    pub name: String,
    /// Supertype; `None` means `Object`
    pub super_type: Option<Type>,
    /// Abstract class
    pub is_abstract: bool,
    /// VM implementation class
    pub is_implementation: bool,
    /// Script containing the declaration
    pub script: Option<ScriptId>,
    /// Declaration position
    pub token_pos: Option<TokenPos>,
    /// Metadata annotations
    pub metadata: Vec<Value>,
}

impl ClassDecl {
    /// Plain class extending `Object`
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            super_type: None,
            is_abstract: false,
            is_implementation: false,
            script: None,
            token_pos: None,
            metadata: Vec::new(),
        }
    }

    /// Set the supertype
    pub fn extends(mut self, super_type: Type) -> Self {
        self.super_type = Some(super_type);
        self
    }

    /// Mark abstract
    pub fn abstract_(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    /// Mark as a VM implementation class
    pub fn implementation(mut self) -> Self {
        self.is_implementation = true;
        self
    }

    /// Declaration position
    pub fn at(mut self, script: ScriptId, pos: TokenPos) -> Self {
        self.script = Some(script);
        self.token_pos = Some(pos);
        self
    }

    /// Add an annotation
    pub fn metadata(mut self, value: Value) -> Self {
        self.metadata.push(value);
        self
    }
}

/// Field declaration
#[derive(Debug, Clone)]
pub struct FieldDecl {
    /// Field name
    pub name: String,
    /// Declared type
    pub ty: Type,
    /// Static field
    pub is_static: bool,
    /// `final`
    pub is_final: bool,
    /// `const`
    pub is_const: bool,
    /// Initial value (instance default or static value)
    pub value: Option<Value>,
    /// Lazy static initializer
    pub initializer: Option<NativeBody>,
    /// Declaration position
    pub token_pos: Option<TokenPos>,
    /// Metadata annotations
    pub metadata: Vec<Value>,
}

impl FieldDecl {
    /// Instance field
    pub fn instance(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty: Type::Dynamic,
            is_static: false,
            is_final: false,
            is_const: false,
            value: None,
            initializer: None,
            token_pos: None,
            metadata: Vec::new(),
        }
    }

    /// Static or top-level field
    pub fn static_(name: impl Into<String>) -> Self {
        Self {
            is_static: true,
            ..Self::instance(name)
        }
    }

    /// Mark final
    pub fn final_(mut self) -> Self {
        self.is_final = true;
        self
    }

    /// Mark const
    pub fn const_(mut self) -> Self {
        self.is_const = true;
        self
    }

    /// Declared type
    pub fn typed(mut self, ty: Type) -> Self {
        self.ty = ty;
        self
    }

    /// Initial value
    pub fn value(mut self, value: Value) -> Self {
        self.value = Some(value);
        self
    }

    /// Lazy static initializer
    pub fn initializer<F>(mut self, f: F) -> Self
    where
        F: Fn(&Invoker<'_>, &[Value]) -> InvokeResult<Value> + Send + Sync + 'static,
    {
        self.initializer = Some(NativeBody::new(f));
        self
    }

    /// Declaration position
    pub fn at(mut self, pos: TokenPos) -> Self {
        self.token_pos = Some(pos);
        self
    }

    /// Add an annotation
    pub fn metadata(mut self, value: Value) -> Self {
        self.metadata.push(value);
        self
    }
}

/// Function declaration
#[derive(Debug, Clone)]
pub struct FunctionDecl {
    /// Name (constructor name without the class prefix for constructors)
    pub name: String,
    /// Kind
    pub kind: FunctionKind,
    /// Static
    pub is_static: bool,
    /// Const constructor
    pub is_const: bool,
    /// Abstract
    pub is_abstract: bool,
    /// Visible to reflection
    pub is_visible: bool,
    /// Compiler-synthesized
    pub is_synthetic: bool,
    /// Redirecting generative constructor
    pub is_redirecting: bool,
    /// Parameters
    pub parameters: Vec<ParameterDecl>,
    /// Parameter details, parallel to `parameters`
    pub details: Vec<ParameterDetails>,
    /// Error the reparse will report
    pub delayed_error: Option<String>,
    /// Result type
    pub result_type: Type,
    /// Script
    pub script: Option<ScriptId>,
    /// Source range
    pub token_range: Option<(TokenPos, TokenPos)>,
    /// Body
    pub body: Option<NativeBody>,
    /// Redirecting factory target
    pub redirect: Option<RedirectionDecl>,
    /// Metadata annotations
    pub metadata: Vec<Value>,
}

impl FunctionDecl {
    fn with_kind(name: impl Into<String>, kind: FunctionKind) -> Self {
        Self {
            name: name.into(),
            kind,
            is_static: false,
            is_const: false,
            is_abstract: false,
            is_visible: true,
            is_synthetic: false,
            is_redirecting: false,
            parameters: Vec::new(),
            details: Vec::new(),
            delayed_error: None,
            result_type: Type::Dynamic,
            script: None,
            token_range: None,
            body: None,
            redirect: None,
            metadata: Vec::new(),
        }
    }

    /// Regular method or top-level function
    pub fn method(name: impl Into<String>) -> Self {
        Self::with_kind(name, FunctionKind::Regular)
    }

    /// Getter
    pub fn getter(name: impl Into<String>) -> Self {
        Self::with_kind(name, FunctionKind::Getter)
    }

    /// Setter
    pub fn setter(name: impl Into<String>) -> Self {
        Self::with_kind(name, FunctionKind::Setter)
    }

    /// Generative constructor; `name` is empty for the unnamed constructor
    pub fn constructor(name: impl Into<String>) -> Self {
        Self::with_kind(name, FunctionKind::Constructor)
    }

    /// Factory constructor
    pub fn factory(name: impl Into<String>) -> Self {
        Self::with_kind(name, FunctionKind::Factory)
    }

    /// Local function or function literal
    pub fn closure(name: impl Into<String>) -> Self {
        Self::with_kind(name, FunctionKind::Closure)
    }

    /// Signature function of a function type
    pub fn signature() -> Self {
        Self::with_kind("", FunctionKind::Signature)
    }

    /// Mark static
    pub fn static_(mut self) -> Self {
        self.is_static = true;
        self
    }

    /// Mark const
    pub fn const_(mut self) -> Self {
        self.is_const = true;
        self
    }

    /// Mark abstract
    pub fn abstract_(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    /// Hide from reflection
    pub fn invisible(mut self) -> Self {
        self.is_visible = false;
        self
    }

    /// Mark compiler-synthesized
    pub fn synthetic(mut self) -> Self {
        self.is_synthetic = true;
        self
    }

    /// Mark as a redirecting generative constructor
    pub fn redirecting(mut self) -> Self {
        self.is_redirecting = true;
        self
    }

    /// Result type
    pub fn returns(mut self, ty: Type) -> Self {
        self.result_type = ty;
        self
    }

    /// Source range
    pub fn at(mut self, script: ScriptId, start: TokenPos, end: TokenPos) -> Self {
        self.script = Some(script);
        self.token_range = Some((start, end));
        self
    }

    /// Required positional parameter of type `dynamic`
    pub fn param(self, name: impl Into<String>) -> Self {
        self.typed_param(name, Type::Dynamic)
    }

    /// Required positional parameter
    pub fn typed_param(self, name: impl Into<String>, ty: Type) -> Self {
        self.param_with(
            ParameterDecl {
                name: name.into(),
                ty,
                kind: ParameterKind::Required,
            },
            ParameterDetails::default(),
        )
    }

    /// Optional positional parameter
    pub fn optional(self, name: impl Into<String>, default_value: Option<Value>) -> Self {
        self.param_with(
            ParameterDecl {
                name: name.into(),
                ty: Type::Dynamic,
                kind: ParameterKind::OptionalPositional,
            },
            ParameterDetails {
                default_value,
                ..ParameterDetails::default()
            },
        )
    }

    /// Named parameter
    pub fn named(self, name: impl Into<String>, default_value: Option<Value>) -> Self {
        self.param_with(
            ParameterDecl {
                name: name.into(),
                ty: Type::Dynamic,
                kind: ParameterKind::Named,
            },
            ParameterDetails {
                default_value,
                ..ParameterDetails::default()
            },
        )
    }

    /// Parameter with explicit details
    pub fn param_with(mut self, decl: ParameterDecl, details: ParameterDetails) -> Self {
        self.parameters.push(decl);
        self.details.push(details);
        self
    }

    /// Native body
    pub fn body<F>(mut self, f: F) -> Self
    where
        F: Fn(&Invoker<'_>, &[Value]) -> InvokeResult<Value> + Send + Sync + 'static,
    {
        self.body = Some(NativeBody::new(f));
        self
    }

    /// Redirect this factory to `class_name.constructor_name`
    pub fn redirect_to(
        mut self,
        class_name: impl Into<String>,
        constructor_name: impl Into<String>,
    ) -> Self {
        self.redirect = Some(RedirectionDecl {
            class_name: class_name.into(),
            constructor_name: constructor_name.into(),
        });
        self
    }

    /// Add an annotation
    pub fn metadata(mut self, value: Value) -> Self {
        self.metadata.push(value);
        self
    }

    /// Error reported when the parameters are reparsed
    pub fn delayed_error(mut self, message: impl Into<String>) -> Self {
        self.delayed_error = Some(message.into());
        self
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Builds a [`Program`]
pub struct ProgramBuilder {
    program: Program,
    duplicate_url: Option<String>,
}

impl ProgramBuilder {
    /// Create a builder with the core library already declared
    pub fn new() -> Self {
        let placeholder = ClassId(0);
        let program = Program {
            libraries: Vec::new(),
            classes: Vec::new(),
            functions: Vec::new(),
            fields: Vec::new(),
            type_params: Vec::new(),
            scripts: Vec::new(),
            library_urls: FxHashMap::default(),
            core: CoreClasses {
                library: LibraryId(0),
                object: placeholder,
                null: placeholder,
                bool_: placeholder,
                int: placeholder,
                double: placeholder,
                string: placeholder,
                list: placeholder,
                function: placeholder,
                type_: placeholder,
                dynamic: placeholder,
            },
            root_library: None,
        };
        let mut builder = Self {
            program,
            duplicate_url: None,
        };
        builder.declare_core();
        builder
    }

    fn declare_core(&mut self) {
        let lib = self.add_library("core", CORE_LIBRARY_URL);
        let object = self.push_class(lib, ClassDecl::new("Object"), None);
        let sub = |b: &mut Self, name: &str| {
            b.push_class(lib, ClassDecl::new(name), Some(Type::rare(object)))
        };
        let null = sub(self, "Null");
        let bool_ = sub(self, "bool");
        let int = sub(self, "int");
        let double = sub(self, "double");
        let string = sub(self, "String");
        let list = sub(self, "List");
        let function = sub(self, "Function");
        let type_ = sub(self, "Type");
        let dynamic = self.push_class(lib, ClassDecl::new("dynamic"), None);
        self.add_type_parameter(list, "E", Type::Dynamic);
        self.program.core = CoreClasses {
            library: lib,
            object,
            null,
            bool_,
            int,
            double,
            string,
            list,
            function,
            type_,
            dynamic,
        };
    }

    /// Core classes
    pub fn core(&self) -> CoreClasses {
        self.program.core
    }

    /// Object type
    pub fn object_type(&self) -> Type {
        Type::rare(self.program.core.object)
    }

    fn mangle(&self, lib: LibraryId, name: &str) -> String {
        if name.starts_with('_') && !name.contains('@') {
            format!("{}{}", name, self.program.library(lib).private_key())
        } else {
            name.to_string()
        }
    }

    fn owner_library(&self, owner: Owner) -> LibraryId {
        match owner {
            Owner::Class(c) => self.program.class(c).library,
            Owner::Library(l) => l,
        }
    }

    /// Declare a library
    pub fn add_library(&mut self, name: impl Into<String>, url: impl Into<String>) -> LibraryId {
        let id = LibraryId(self.program.libraries.len() as u32);
        let url = url.into();
        if self.program.library_urls.insert(url.clone(), id).is_some() && self.duplicate_url.is_none() {
            self.duplicate_url = Some(url.clone());
        }
        self.program.libraries.push(LibraryEntity {
            id,
            name: name.into(),
            url,
            imports: Vec::new(),
            classes: Vec::new(),
            functions: Vec::new(),
            fields: Vec::new(),
            script: None,
            metadata: Vec::new(),
        });
        id
    }

    /// Register a script from its source text
    pub fn add_script(&mut self, url: impl Into<String>, source: &str) -> ScriptId {
        let id = ScriptId(self.program.scripts.len() as u32);
        self.program.scripts.push(Script::new(id, url, source));
        id
    }

    /// Register a script from a line-start table
    pub fn add_script_lines(
        &mut self,
        url: impl Into<String>,
        line_starts: Vec<u32>,
        length: u32,
    ) -> ScriptId {
        let id = ScriptId(self.program.scripts.len() as u32);
        self.program
            .scripts
            .push(Script::from_line_starts(id, url, line_starts, length));
        id
    }

    /// Set a library's main script
    pub fn set_library_script(&mut self, lib: LibraryId, script: ScriptId) {
        self.program.libraries[lib.index()].script = Some(script);
    }

    /// Import `target` into `lib`
    pub fn add_import(&mut self, lib: LibraryId, target: LibraryId, prefix: Option<&str>) {
        self.program.libraries[lib.index()].imports.push(Import {
            library: target,
            prefix: prefix.map(str::to_string),
        });
    }

    /// Annotate a library
    pub fn add_library_metadata(&mut self, lib: LibraryId, value: Value) {
        self.program.libraries[lib.index()].metadata.push(value);
    }

    /// Set the root library
    pub fn set_root_library(&mut self, lib: LibraryId) {
        self.program.root_library = Some(lib);
    }

    fn push_class(&mut self, lib: LibraryId, decl: ClassDecl, super_type: Option<Type>) -> ClassId {
        let id = ClassId(self.program.classes.len() as u32);
        let name = self.mangle(lib, &decl.name);
        self.program.classes.push(ClassEntity {
            id,
            name,
            library: lib,
            super_type,
            interfaces: Vec::new(),
            mixin: None,
            type_parameters: Vec::new(),
            fields: Vec::new(),
            functions: Vec::new(),
            is_abstract: decl.is_abstract,
            is_implementation: decl.is_implementation,
            is_mixin_application: false,
            is_mixin_typedef: false,
            signature_function: None,
            script: decl.script,
            token_pos: decl.token_pos,
            metadata: decl.metadata,
            layout: OnceCell::new(),
        });
        self.program.libraries[lib.index()].classes.push(id);
        id
    }

    /// Declare a class
    pub fn add_class(&mut self, lib: LibraryId, mut decl: ClassDecl) -> ClassId {
        let super_type = decl.super_type.take().unwrap_or_else(|| self.object_type());
        self.push_class(lib, decl, Some(super_type))
    }

    /// Declare a type parameter on a class
    pub fn add_type_parameter(
        &mut self,
        class: ClassId,
        name: impl Into<String>,
        bound: Type,
    ) -> TypeParamId {
        let id = TypeParamId(self.program.type_params.len() as u32);
        let index = self.program.classes[class.index()].type_parameters.len();
        self.program.type_params.push(TypeParameterEntity {
            id,
            name: name.into(),
            index,
            owner: class,
            bound,
        });
        self.program.classes[class.index()].type_parameters.push(id);
        id
    }

    /// Replace a class's supertype
    pub fn set_super_type(&mut self, class: ClassId, super_type: Type) {
        self.program.classes[class.index()].super_type = Some(super_type);
    }

    /// Add an implemented interface
    pub fn add_interface(&mut self, class: ClassId, interface: Type) {
        self.program.classes[class.index()].interfaces.push(interface);
    }

    /// Mutable access to a class under construction
    pub fn class_mut(&mut self, class: ClassId) -> &mut ClassEntity {
        &mut self.program.classes[class.index()]
    }

    /// Mutable access to a function under construction
    pub fn function_mut(&mut self, function: FunctionId) -> &mut FunctionEntity {
        &mut self.program.functions[function.index()]
    }

    /// Read access to the program under construction
    pub fn program(&self) -> &Program {
        &self.program
    }

    /// Declare a mixin application `super_type with mixin`
    ///
    /// Instance fields and instance methods of the mixin class are copied into the
    /// application class. Anonymous applications get a synthetic `S&M` name.
    pub fn add_mixin_application(
        &mut self,
        lib: LibraryId,
        name: Option<&str>,
        super_type: Type,
        mixin: Type,
    ) -> ClassId {
        let super_name = super_type
            .class()
            .map(|c| self.program.class(c).name.clone())
            .unwrap_or_default();
        let mixin_class = mixin.class();
        let mixin_name = mixin_class
            .map(|c| self.program.class(c).name.clone())
            .unwrap_or_default();
        let internal = match name {
            Some(n) => n.to_string(),
            None => format!("{}&{}", super_name, mixin_name),
        };
        let app = self.push_class(lib, ClassDecl::new(internal), Some(super_type));
        {
            let entity = &mut self.program.classes[app.index()];
            entity.mixin = Some(mixin);
            entity.is_mixin_application = true;
            entity.is_mixin_typedef = name.is_some();
        }
        if let Some(source) = mixin_class {
            let fields = self.program.class(source).fields.clone();
            for f in fields {
                let field = self.program.field(f);
                if field.is_static {
                    continue;
                }
                let decl = FieldDecl {
                    name: field.name.clone(),
                    ty: field.ty.clone(),
                    is_static: false,
                    is_final: field.is_final,
                    is_const: field.is_const,
                    value: field.initial_value.clone(),
                    initializer: None,
                    token_pos: field.token_pos,
                    metadata: field.metadata.clone(),
                };
                self.add_field(Owner::Class(app), decl);
            }
            let functions = self.program.class(source).functions.clone();
            for f in functions {
                let func = self.program.function(f);
                if func.is_static || func.kind.is_constructor() {
                    continue;
                }
                let mut decl = FunctionDecl::with_kind(func.name.clone(), func.kind);
                decl.is_abstract = func.is_abstract;
                decl.is_visible = func.is_visible;
                decl.is_synthetic = func.is_synthetic;
                decl.parameters = func.parameters.clone();
                decl.details = func
                    .parameter_details()
                    .map(<[ParameterDetails]>::to_vec)
                    .unwrap_or_default();
                decl.result_type = func.result_type.clone();
                decl.script = func.script;
                decl.token_range = func.token_pos.zip(func.end_token_pos);
                decl.body = func.body.clone();
                decl.metadata = func.metadata.clone();
                self.add_function(Owner::Class(app), decl);
            }
        }
        app
    }

    /// Declare a field (and its implicit accessors)
    pub fn add_field(&mut self, owner: Owner, decl: FieldDecl) -> FieldId {
        let id = FieldId(self.program.fields.len() as u32);
        let lib = self.owner_library(owner);
        let name = self.mangle(lib, &decl.name);
        let static_state = if !decl.is_static {
            StaticState::Initialized(Value::Null)
        } else if let Some(v) = &decl.value {
            StaticState::Initialized(v.clone())
        } else if decl.initializer.is_some() {
            StaticState::Uninitialized
        } else {
            StaticState::Initialized(Value::Null)
        };
        let read_only = decl.is_final || decl.is_const;

        let mut entity = self.blank_function(owner, name.clone(), FunctionKind::ImplicitGetter);
        entity.is_static = decl.is_static;
        entity.result_type = decl.ty.clone();
        entity.field = Some(id);
        let getter = self.push_function(entity);
        let setter = if read_only {
            None
        } else {
            let mut entity = self.blank_function(owner, name.clone(), FunctionKind::ImplicitSetter);
            entity.is_static = decl.is_static;
            entity.field = Some(id);
            entity.parameters = vec![ParameterDecl {
                name: "value".to_string(),
                ty: decl.ty.clone(),
                kind: ParameterKind::Required,
            }];
            entity.details = OnceCell::with_value(vec![ParameterDetails::default()]);
            Some(self.push_function(entity))
        };

        self.program.fields.push(FieldEntity {
            id,
            name,
            owner,
            ty: decl.ty,
            is_static: decl.is_static,
            is_final: decl.is_final,
            is_const: decl.is_const,
            token_pos: decl.token_pos,
            metadata: decl.metadata,
            initial_value: if decl.is_static { None } else { decl.value },
            getter: Some(getter),
            setter,
            initializer: decl.initializer,
            static_state: RwLock::new(static_state),
            slot: OnceCell::new(),
        });
        match owner {
            Owner::Class(c) => self.program.classes[c.index()].fields.push(id),
            Owner::Library(l) => self.program.libraries[l.index()].fields.push(id),
        }
        id
    }

    fn blank_function(&self, owner: Owner, name: String, kind: FunctionKind) -> FunctionEntity {
        FunctionEntity {
            id: FunctionId(0),
            name,
            owner,
            kind,
            is_static: false,
            is_const: false,
            is_abstract: false,
            is_visible: true,
            is_synthetic: kind.is_implicit(),
            is_redirecting: false,
            parameters: Vec::new(),
            result_type: Type::Dynamic,
            script: None,
            token_pos: None,
            end_token_pos: None,
            parent: None,
            implicit_closure: None,
            signature_class: None,
            field: None,
            redirect: None,
            metadata: Vec::new(),
            body: None,
            details_source: DetailsSource::Eager,
            details: OnceCell::with_value(Vec::new()),
            redirection: OnceCell::new(),
            code: RwLock::new(FunctionCode::default()),
        }
    }

    fn push_function(&mut self, mut entity: FunctionEntity) -> FunctionId {
        let id = FunctionId(self.program.functions.len() as u32);
        entity.id = id;
        self.program.functions.push(entity);
        id
    }

    fn entity_from_decl(&self, owner: Owner, name: String, decl: FunctionDecl) -> FunctionEntity {
        let mut details = decl.details;
        details.resize_with(decl.parameters.len(), ParameterDetails::default);
        let (details_source, details_cell) = if decl.kind.is_constructor() {
            let source = match decl.delayed_error {
                Some(err) => Err(err),
                None => Ok(details),
            };
            (DetailsSource::Deferred(source), OnceCell::new())
        } else {
            (DetailsSource::Eager, OnceCell::with_value(details))
        };
        FunctionEntity {
            is_static: decl.is_static,
            is_const: decl.is_const,
            is_abstract: decl.is_abstract,
            is_visible: decl.is_visible,
            is_synthetic: decl.is_synthetic,
            is_redirecting: decl.is_redirecting,
            parameters: decl.parameters,
            result_type: decl.result_type,
            script: decl.script,
            token_pos: decl.token_range.map(|r| r.0),
            end_token_pos: decl.token_range.map(|r| r.1),
            redirect: decl.redirect,
            metadata: decl.metadata,
            body: decl.body,
            details_source,
            details: details_cell,
            ..self.blank_function(owner, name, decl.kind)
        }
    }

    /// Declare a method, getter, setter or top-level function
    pub fn add_function(&mut self, owner: Owner, decl: FunctionDecl) -> FunctionId {
        let lib = self.owner_library(owner);
        let name = self.mangle(lib, &decl.name);
        let static_default = matches!(owner, Owner::Library(_));
        let mut entity = self.entity_from_decl(owner, name, decl);
        entity.is_static |= static_default;
        let id = self.push_function(entity);
        match owner {
            Owner::Class(c) => self.program.classes[c.index()].functions.push(id),
            Owner::Library(l) => self.program.libraries[l.index()].functions.push(id),
        }
        id
    }

    /// Declare a generative or factory constructor; its internal name is
    /// `Class.` + constructor name
    pub fn add_constructor(&mut self, class: ClassId, decl: FunctionDecl) -> FunctionId {
        let internal = format!("{}.{}", self.program.class(class).name, decl.name);
        let owner = Owner::Class(class);
        let mut entity = self.entity_from_decl(owner, internal, decl);
        entity.is_static = false;
        let id = self.push_function(entity);
        self.program.classes[class.index()].functions.push(id);
        id
    }

    /// Declare a closure function nested in `parent`
    pub fn add_closure(&mut self, parent: FunctionId, decl: FunctionDecl) -> FunctionId {
        let owner = self.program.function(parent).owner;
        let script = decl.script.or(self.program.function(parent).script);
        let name = decl.name.clone();
        let mut entity = self.entity_from_decl(owner, name, decl);
        entity.kind = FunctionKind::Closure;
        entity.parent = Some(parent);
        entity.script = script;
        entity.is_static = true;
        self.push_function(entity)
    }

    /// Declare a function type; returns its canonical signature class
    pub fn add_function_type(&mut self, lib: LibraryId, mut decl: FunctionDecl) -> ClassId {
        decl.kind = FunctionKind::Signature;
        let owner = Owner::Library(lib);
        let mut entity = self.entity_from_decl(owner, String::new(), decl);
        entity.is_static = true;
        entity.is_visible = false;
        let sig = self.push_function(entity);
        let object = self.object_type();
        let class = self.push_class(lib, ClassDecl::new("_FunctionType"), Some(object));
        let name = format!("_FunctionType{}", class.0);
        self.program.classes[class.index()].name = name.clone();
        self.program.classes[class.index()].signature_function = Some(sig);
        self.program.functions[sig.index()].signature_class = Some(class);
        self.program.functions[sig.index()].name = name;
        class
    }

    /// Declare a typedef; returns the (non-canonical) typedef class
    pub fn add_typedef(&mut self, lib: LibraryId, name: &str, decl: FunctionDecl) -> ClassId {
        let canonical = self.add_function_type(lib, decl);
        let sig = self.program.class(canonical).signature_function;
        let object = self.object_type();
        let typedef = self.push_class(lib, ClassDecl::new(name), Some(object));
        self.program.classes[typedef.index()].signature_function = sig;
        typedef
    }

    /// Set the signature class of a closure function
    pub fn set_signature_class(&mut self, function: FunctionId, class: ClassId) {
        self.program.functions[function.index()].signature_class = Some(class);
    }

    fn add_implicit_closures(&mut self) {
        let methods: Vec<FunctionId> = self
            .program
            .functions
            .iter()
            .filter(|f| {
                f.kind == FunctionKind::Regular && !f.is_abstract && f.implicit_closure.is_none()
            })
            .map(|f| f.id)
            .collect();
        for method in methods {
            let func = self.program.function(method);
            let mut entity = self.blank_function(func.owner, func.name.clone(), FunctionKind::ImplicitClosure);
            entity.is_static = true;
            entity.parameters = func.parameters.clone();
            entity.details = OnceCell::with_value(
                func.parameter_details()
                    .map(<[ParameterDetails]>::to_vec)
                    .unwrap_or_default(),
            );
            entity.result_type = func.result_type.clone();
            entity.script = func.script;
            entity.parent = Some(method);
            let id = self.push_function(entity);
            self.program.functions[method.index()].implicit_closure = Some(id);
        }
    }

    /// Freeze the program
    pub fn build(mut self) -> ProgramResult<Program> {
        if let Some(url) = self.duplicate_url.take() {
            return Err(ProgramError::DuplicateLibrary(url));
        }
        let core_lib = self.program.core.library;
        for lib in &mut self.program.libraries {
            if lib.id != core_lib && !lib.imports.iter().any(|i| i.library == core_lib) {
                lib.imports.push(Import {
                    library: core_lib,
                    prefix: None,
                });
            }
        }
        self.add_implicit_closures();
        let core_classes: Vec<ClassId> = self.program.library(core_lib).classes.clone();
        for class in core_classes {
            self.program.finalize_class(class)?;
        }
        log::debug!(
            "built program: {} libraries, {} classes, {} functions",
            self.program.libraries.len(),
            self.program.classes.len(),
            self.program.functions.len()
        );
        Ok(self.program)
    }
}

impl Default for ProgramBuilder {
    fn default() -> Self {
        Self::new()
    }
}
