//! Dynamic invocation
//!
//! [`Invoker`] resolves a (receiver, name, accessor) triple to a function, a field
//! access or nothing, and runs it. Every call, reflective or direct, goes through
//! [`Invoker::call`], which binds arguments with [`bind_arguments`] and reports a
//! mismatch as a [`NoSuchMethodError`] carrying the callee's parameter names.

use std::cell::Cell;
use std::sync::Arc;

use super::args::{bind_arguments, Arguments};
use super::error::{AccessKind, InvocationLevel, InvokeError, InvokeResult, NoSuchMethodError};
use crate::vm::program::{
    Accessor, ClassId, FieldId, FunctionId, FunctionKind, LibraryId, LibraryMember, Owner,
    Program, StaticState, Type,
};
use crate::vm::value::{Closure, Value};

/// Constructor phase passed to generative constructors: run initializers and body
pub const CTOR_PHASE_ALL: i64 = 3;

/// Nesting limit for invocations
const MAX_INVOCATION_DEPTH: usize = 256;

/// Result of a lookup that may legitimately find nothing
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<T> {
    /// A binding was found (its value may be `null`)
    Found(T),
    /// No binding with that name
    NotFound,
}

impl<T> Lookup<T> {
    /// Whether a binding was found
    pub fn is_found(&self) -> bool {
        matches!(self, Lookup::Found(_))
    }

    /// Found value, if any
    pub fn found(self) -> Option<T> {
        match self {
            Lookup::Found(v) => Some(v),
            Lookup::NotFound => None,
        }
    }

    /// Map the found value
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Lookup<U> {
        match self {
            Lookup::Found(v) => Lookup::Found(f(v)),
            Lookup::NotFound => Lookup::NotFound,
        }
    }
}

/// Resolves and runs members of a program
pub struct Invoker<'a> {
    program: &'a Program,
    depth: Cell<usize>,
}

impl<'a> Invoker<'a> {
    /// Create an invoker over a program
    pub fn new(program: &'a Program) -> Self {
        Self {
            program,
            depth: Cell::new(0),
        }
    }

    /// Program being invoked
    pub fn program(&self) -> &'a Program {
        self.program
    }

    // ========================================================================
    // Shared call path
    // ========================================================================

    /// Bind `args` to `function` and run it with the given implicit arguments
    pub fn call(&self, function: FunctionId, implicit: &[Value], args: &Arguments) -> InvokeResult<Value> {
        let func = self.program.function(function);
        let details = self.program.ensure_parameters_parsed(function)?;
        let bound = match bind_arguments(func, details, args) {
            Some(bound) => bound,
            None => {
                let receiver = self.call_site_receiver(function, implicit);
                return Err(self
                    .no_such_method(receiver, &func.name, InvocationLevel::of(func), AccessKind::of(func.kind), args)
                    .with_parameters(func.parameter_names())
                    .into());
            }
        };
        let mut frame = Vec::with_capacity(implicit.len() + bound.len());
        frame.extend_from_slice(implicit);
        frame.extend(bound);
        self.run(function, frame)
    }

    fn call_site_receiver(&self, function: FunctionId, implicit: &[Value]) -> Value {
        let func = self.program.function(function);
        match InvocationLevel::of(func) {
            InvocationLevel::Dynamic => implicit.first().cloned().unwrap_or(Value::Null),
            InvocationLevel::TopLevel => Value::Null,
            InvocationLevel::Static | InvocationLevel::Constructor => match func.owner {
                Owner::Class(c) => type_value(Type::rare(c)),
                Owner::Library(_) => Value::Null,
            },
        }
    }

    fn run(&self, function: FunctionId, frame: Vec<Value>) -> InvokeResult<Value> {
        let depth = self.depth.get();
        if depth >= MAX_INVOCATION_DEPTH {
            return Err(InvokeError::StackOverflow);
        }
        self.depth.set(depth + 1);
        let result = self.run_body(function, frame);
        self.depth.set(depth);
        result
    }

    fn run_body(&self, function: FunctionId, frame: Vec<Value>) -> InvokeResult<Value> {
        let func = self.program.function(function);
        match func.kind {
            FunctionKind::ImplicitGetter => {
                let field = self.accessor_field(function)?;
                if func.is_static {
                    self.read_static(field)
                } else {
                    self.read_instance_slot(field, frame.first())
                }
            }
            FunctionKind::ImplicitSetter => {
                let field = self.accessor_field(function)?;
                if func.is_static {
                    let value = frame.into_iter().next().unwrap_or(Value::Null);
                    self.program.field(field).store_static(value);
                } else {
                    let value = frame.get(1).cloned().unwrap_or(Value::Null);
                    self.write_instance_slot(field, frame.first(), value)?;
                }
                Ok(Value::Null)
            }
            FunctionKind::ImplicitClosure => {
                let target = func.parent.ok_or_else(|| {
                    InvokeError::MirroredCompilationError(format!("implicit closure '{}' has no target", func.name))
                })?;
                let receiver = frame
                    .first()
                    .and_then(Value::as_closure)
                    .and_then(|c| c.receiver.clone());
                let mut target_frame = Vec::with_capacity(frame.len());
                if self.program.function(target).num_implicit_parameters() > 0 {
                    target_frame.push(receiver.unwrap_or(Value::Null));
                }
                target_frame.extend(frame.into_iter().skip(1));
                self.run(target, target_frame)
            }
            _ if func.is_abstract => {
                let receiver = self.call_site_receiver(function, &frame);
                Err(self
                    .no_such_method(receiver, &func.name, InvocationLevel::of(func), AccessKind::of(func.kind), &Arguments::new())
                    .into())
            }
            _ => match func.body() {
                Some(body) => body.call(self, &frame),
                None => Ok(Value::Null),
            },
        }
    }

    fn accessor_field(&self, function: FunctionId) -> InvokeResult<FieldId> {
        let func = self.program.function(function);
        func.field.ok_or_else(|| {
            InvokeError::MirroredCompilationError(format!("accessor '{}' has no field", func.name))
        })
    }

    // ========================================================================
    // Field storage
    // ========================================================================

    /// Value of a static field, running its initializer on first read
    pub fn read_static(&self, field: FieldId) -> InvokeResult<Value> {
        let entity = self.program.field(field);
        {
            let mut state = entity.static_state.write();
            match &*state {
                StaticState::Initialized(v) => return Ok(v.clone()),
                StaticState::Initializing => {
                    return Err(InvokeError::CyclicInitialization(entity.name.clone()))
                }
                StaticState::Uninitialized => *state = StaticState::Initializing,
            }
        }
        let result = match &entity.initializer {
            Some(init) => init.call(self, &[]),
            None => Ok(Value::Null),
        };
        match &result {
            Ok(value) => {
                log::trace!("initialized static field {}", entity.name);
                entity.store_static(value.clone());
            }
            Err(_) => *entity.static_state.write() = StaticState::Uninitialized,
        }
        result
    }

    fn instance_slot(&self, field: FieldId) -> InvokeResult<usize> {
        let entity = self.program.field(field);
        entity.slot().ok_or_else(|| {
            let owner = match entity.owner {
                Owner::Class(c) => self.program.class(c).name.clone(),
                Owner::Library(l) => self.program.library(l).name.clone(),
            };
            InvokeError::NotFinalized(owner)
        })
    }

    fn read_instance_slot(&self, field: FieldId, receiver: Option<&Value>) -> InvokeResult<Value> {
        let slot = self.instance_slot(field)?;
        match receiver.and_then(Value::as_instance) {
            Some(inst) => Ok(inst.field(slot).unwrap_or(Value::Null)),
            None => Err(self
                .no_such_method(
                    receiver.cloned().unwrap_or(Value::Null),
                    &self.program.field(field).name,
                    InvocationLevel::Dynamic,
                    AccessKind::Getter,
                    &Arguments::new(),
                )
                .into()),
        }
    }

    fn write_instance_slot(&self, field: FieldId, receiver: Option<&Value>, value: Value) -> InvokeResult<()> {
        let slot = self.instance_slot(field)?;
        match receiver.and_then(Value::as_instance) {
            Some(inst) if inst.set_field(slot, value) => Ok(()),
            _ => Err(self
                .no_such_method(
                    receiver.cloned().unwrap_or(Value::Null),
                    &self.program.field(field).name,
                    InvocationLevel::Dynamic,
                    AccessKind::Setter,
                    &Arguments::positional(vec![Value::Null]),
                )
                .into()),
        }
    }

    fn final_field_error(&self, field: FieldId) -> InvokeError {
        let entity = self.program.field(field);
        let kind = if entity.is_const { "const" } else { "final" };
        InvokeError::MirroredCompilationError(format!(
            "cannot assign to {} field '{}'",
            kind,
            Program::unmangle_name(&entity.name)
        ))
    }

    // ========================================================================
    // Instance members
    // ========================================================================

    fn receiver_class(&self, receiver: &Value) -> InvokeResult<ClassId> {
        let class = self.program.class_of(receiver);
        self.program.check_finalized(class)?;
        Ok(class)
    }

    /// Read a property of a receiver: getter, then field, then method tear-off
    pub fn get(&self, receiver: &Value, name: &str) -> InvokeResult<Value> {
        if name == "call" && receiver.as_closure().is_some() {
            return Ok(receiver.clone());
        }
        let class = self.receiver_class(receiver)?;
        let recv = std::slice::from_ref(receiver);
        if let Some(getter) = self.program.lookup_dynamic_function(class, name, Accessor::Getter) {
            return self.call(getter, recv, &Arguments::new());
        }
        if let Some(field) = self.program.lookup_instance_field(class, name) {
            return self.read_instance_slot(field, Some(receiver));
        }
        if let Some(method) = self.program.lookup_dynamic_function(class, name, Accessor::Method) {
            return self.tear_off(method, Some(receiver.clone()));
        }
        Err(self
            .no_such_method(receiver.clone(), name, InvocationLevel::Dynamic, AccessKind::Getter, &Arguments::new())
            .into())
    }

    /// Write a property of a receiver: setter, then field
    pub fn set(&self, receiver: &Value, name: &str, value: Value) -> InvokeResult<Value> {
        let class = self.receiver_class(receiver)?;
        if let Some(setter) = self.program.lookup_dynamic_function(class, name, Accessor::Setter) {
            self.call(setter, std::slice::from_ref(receiver), &Arguments::positional(vec![value.clone()]))?;
            return Ok(value);
        }
        if let Some(field) = self.program.lookup_instance_field(class, name) {
            if self.program.field(field).is_read_only() {
                return Err(self.final_field_error(field));
            }
            self.write_instance_slot(field, Some(receiver), value.clone())?;
            return Ok(value);
        }
        Err(self
            .no_such_method(
                receiver.clone(),
                name,
                InvocationLevel::Dynamic,
                AccessKind::Setter,
                &Arguments::positional(vec![value]),
            )
            .into())
    }

    /// Call a method of a receiver; a getter or field holding a callable is called
    pub fn invoke(&self, receiver: &Value, name: &str, args: &Arguments) -> InvokeResult<Value> {
        if name == "call" && receiver.as_closure().is_some() {
            return self.apply(receiver, args);
        }
        let class = self.receiver_class(receiver)?;
        if let Some(method) = self.program.lookup_dynamic_function(class, name, Accessor::Method) {
            return self.call(method, std::slice::from_ref(receiver), args);
        }
        let has_property = self
            .program
            .lookup_dynamic_function(class, name, Accessor::Getter)
            .is_some()
            || self.program.lookup_instance_field(class, name).is_some();
        if has_property {
            let callee = self.get(receiver, name)?;
            return self.apply(&callee, args);
        }
        Err(self
            .no_such_method(receiver.clone(), name, InvocationLevel::Dynamic, AccessKind::Method, args)
            .into())
    }

    /// Closure for a method tear-off
    pub fn tear_off(&self, method: FunctionId, receiver: Option<Value>) -> InvokeResult<Value> {
        let closure = self.program.implicit_closure(method).ok_or_else(|| {
            InvokeError::MirroredCompilationError(format!(
                "cannot tear off '{}'",
                self.program.function(method).name
            ))
        })?;
        Ok(Value::Closure(Arc::new(Closure::tear_off(closure, receiver))))
    }

    // ========================================================================
    // Closures
    // ========================================================================

    /// Call a callable value: a closure, or an instance with a `call` method
    pub fn apply(&self, callee: &Value, args: &Arguments) -> InvokeResult<Value> {
        if let Some(closure) = callee.as_closure() {
            return self.call(closure.function, std::slice::from_ref(callee), args);
        }
        let class = self.receiver_class(callee)?;
        match self.program.lookup_call_method(class) {
            Some(call) => self.call(call, std::slice::from_ref(callee), args),
            None => Err(self
                .no_such_method(callee.clone(), "call", InvocationLevel::Dynamic, AccessKind::Method, args)
                .into()),
        }
    }

    // ========================================================================
    // Static members
    // ========================================================================

    /// Call a static method of a class (statics are not inherited)
    pub fn invoke_static(&self, class: ClassId, name: &str, args: &Arguments) -> InvokeResult<Value> {
        self.program.check_finalized(class)?;
        if let Some(method) = self.program.class_static_function(class, name, Accessor::Method) {
            return self.call(method, &[], args);
        }
        let has_property = self
            .program
            .class_static_function(class, name, Accessor::Getter)
            .is_some()
            || self.program.class_static_field(class, name).is_some();
        if has_property {
            let callee = self.get_static(class, name)?;
            return self.apply(&callee, args);
        }
        Err(self
            .no_such_method(type_value(Type::rare(class)), name, InvocationLevel::Static, AccessKind::Method, args)
            .into())
    }

    /// Read a static property of a class
    pub fn get_static(&self, class: ClassId, name: &str) -> InvokeResult<Value> {
        self.program.check_finalized(class)?;
        if let Some(getter) = self.program.class_static_function(class, name, Accessor::Getter) {
            return self.call(getter, &[], &Arguments::new());
        }
        if let Some(field) = self.program.class_static_field(class, name) {
            return self.get_static_field(field);
        }
        if let Some(method) = self.program.class_static_function(class, name, Accessor::Method) {
            return self.tear_off(method, None);
        }
        Err(self
            .no_such_method(type_value(Type::rare(class)), name, InvocationLevel::Static, AccessKind::Getter, &Arguments::new())
            .into())
    }

    /// Write a static property of a class
    pub fn set_static(&self, class: ClassId, name: &str, value: Value) -> InvokeResult<Value> {
        self.program.check_finalized(class)?;
        if let Some(setter) = self.program.class_static_function(class, name, Accessor::Setter) {
            self.call(setter, &[], &Arguments::positional(vec![value.clone()]))?;
            return Ok(value);
        }
        if let Some(field) = self.program.class_static_field(class, name) {
            return self.set_static_field(field, value);
        }
        Err(self
            .no_such_method(
                type_value(Type::rare(class)),
                name,
                InvocationLevel::Static,
                AccessKind::Setter,
                &Arguments::positional(vec![value]),
            )
            .into())
    }

    /// Read a static or top-level field; an uninitialized field goes through its
    /// implicit getter, which runs the initializer
    pub fn get_static_field(&self, field: FieldId) -> InvokeResult<Value> {
        let entity = self.program.field(field);
        if let Some(value) = entity.static_value() {
            return Ok(value);
        }
        match entity.getter {
            Some(getter) => self.call(getter, &[], &Arguments::new()),
            None => self.read_static(field),
        }
    }

    /// Write a static or top-level field
    pub fn set_static_field(&self, field: FieldId, value: Value) -> InvokeResult<Value> {
        let entity = self.program.field(field);
        if entity.is_read_only() {
            return Err(self.final_field_error(field));
        }
        match entity.setter {
            Some(setter) => {
                self.call(setter, &[], &Arguments::positional(vec![value.clone()]))?;
            }
            None => entity.store_static(value.clone()),
        }
        Ok(value)
    }

    // ========================================================================
    // Construction
    // ========================================================================

    /// Run a constructor of `class`; `constructor_name` is empty for the unnamed one
    pub fn new_instance(
        &self,
        class: ClassId,
        constructor_name: &str,
        args: &Arguments,
        type_arguments: Option<Vec<Type>>,
    ) -> InvokeResult<Value> {
        self.program.check_finalized(class)?;
        let ctor = match self.program.class_constructor(class, constructor_name) {
            Some(ctor) => ctor,
            None => {
                let internal = format!("{}.{}", self.program.class(class).name, constructor_name);
                return Err(self
                    .no_such_method(type_value(Type::rare(class)), &internal, InvocationLevel::Constructor, AccessKind::Method, args)
                    .into());
            }
        };
        let (target_class, target) = self.program.redirection_target(ctor)?;
        match self.program.function(target).kind {
            FunctionKind::Factory => {
                let type_args = type_arguments_value(type_arguments);
                self.call(target, &[type_args], args)
            }
            _ => {
                self.program.finalize_class(target_class)?;
                let instance = Value::Instance(self.program.allocate(target_class, type_arguments)?);
                self.call(target, &[instance.clone(), Value::Int(CTOR_PHASE_ALL)], args)?;
                Ok(instance)
            }
        }
    }

    // ========================================================================
    // Library members
    // ========================================================================

    /// Call a top-level function of a library
    pub fn invoke_top_level(&self, lib: LibraryId, name: &str, args: &Arguments) -> InvokeResult<Value> {
        if let Some(f) = self.program.library_function(lib, name, Accessor::Method) {
            return self.call(f, &[], args);
        }
        let has_property = self.program.library_function(lib, name, Accessor::Getter).is_some()
            || self.program.library_field(lib, name).is_some();
        if has_property {
            let callee = self.get_top_level(lib, name)?;
            return self.apply(&callee, args);
        }
        Err(self
            .no_such_method(Value::Null, name, InvocationLevel::TopLevel, AccessKind::Method, args)
            .into())
    }

    /// Read a top-level property of a library
    pub fn get_top_level(&self, lib: LibraryId, name: &str) -> InvokeResult<Value> {
        if let Some(getter) = self.program.library_function(lib, name, Accessor::Getter) {
            return self.call(getter, &[], &Arguments::new());
        }
        if let Some(field) = self.program.library_field(lib, name) {
            return self.get_static_field(field);
        }
        if let Some(f) = self.program.library_function(lib, name, Accessor::Method) {
            return self.tear_off(f, None);
        }
        Err(self
            .no_such_method(Value::Null, name, InvocationLevel::TopLevel, AccessKind::Getter, &Arguments::new())
            .into())
    }

    /// Write a top-level property of a library
    pub fn set_top_level(&self, lib: LibraryId, name: &str, value: Value) -> InvokeResult<Value> {
        if let Some(setter) = self.program.library_function(lib, name, Accessor::Setter) {
            self.call(setter, &[], &Arguments::positional(vec![value.clone()]))?;
            return Ok(value);
        }
        if let Some(field) = self.program.library_field(lib, name) {
            return self.set_static_field(field, value);
        }
        Err(self
            .no_such_method(
                Value::Null,
                name,
                InvocationLevel::TopLevel,
                AccessKind::Setter,
                &Arguments::positional(vec![value]),
            )
            .into())
    }

    /// Whether a library declares a readable top-level member named `name`
    pub(crate) fn has_top_level(&self, lib: LibraryId, name: &str) -> bool {
        matches!(
            self.program.library_lookup_local(lib, name),
            Some(LibraryMember::Field(_)) | Some(LibraryMember::Function(_))
        )
    }

    // ========================================================================
    // Diagnostics
    // ========================================================================

    fn no_such_method(
        &self,
        receiver: Value,
        name: &str,
        level: InvocationLevel,
        access: AccessKind,
        args: &Arguments,
    ) -> NoSuchMethodError {
        log::debug!("no such {} {} '{}' on {}", level, access, name, receiver.kind_name());
        NoSuchMethodError {
            receiver,
            name: name.to_string(),
            level,
            access,
            positional_count: args.positional.len(),
            named: args.names(),
            existing_parameters: None,
        }
    }
}

impl NoSuchMethodError {
    fn with_parameters(mut self, parameters: Vec<String>) -> Self {
        self.existing_parameters = Some(parameters);
        self
    }
}

/// Reified type value
pub fn type_value(ty: Type) -> Value {
    Value::Type(Arc::new(ty))
}

/// Implicit type-argument vector passed to factories
pub fn type_arguments_value(type_arguments: Option<Vec<Type>>) -> Value {
    match type_arguments {
        Some(args) => Value::list(args.into_iter().map(type_value).collect()),
        None => Value::Null,
    }
}
