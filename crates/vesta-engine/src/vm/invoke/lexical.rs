//! Unqualified name lookup from inside a closure
//!
//! A one-part name is resolved through, in order: the closure's context chain
//! (innermost outward), the captured receiver's instance members, static members of
//! the enclosing class and its superclasses, then the enclosing library and each of
//! its unprefixed imports. Two- and three-part names (`prefix.name`, `Class.name`,
//! `prefix.Class.name`) skip the context and receiver steps.

use super::error::InvokeResult;
use super::invoker::{type_value, Invoker, Lookup};
use crate::vm::program::{Accessor, ClassId, FunctionId, FunctionKind, LibraryId, LibraryMember, Program, Type};
use crate::vm::value::{Value, THIS_VARIABLE};

impl Invoker<'_> {
    /// Resolve a dotted name as seen from inside `closure`
    pub fn find_in_context(&self, closure: &Value, name: &str) -> InvokeResult<Lookup<Value>> {
        let closure = match closure.as_closure() {
            Some(c) => c,
            None => return Ok(Lookup::NotFound),
        };
        let function = self.enclosing_function(closure.function);
        let program = self.program();
        let lib = program.function_library(function);
        let class = program.function_class(function);
        let parts: Vec<String> = name.split('.').map(|p| program.mangle_name(lib, p)).collect();

        match parts.as_slice() {
            [single] => {
                let mut this = closure.receiver.clone();
                let mut ctx = closure.context.clone();
                while let Some(current) = ctx {
                    if let Some(value) = current.local(single) {
                        return Ok(Lookup::Found(value));
                    }
                    if this.is_none() {
                        this = current.local(THIS_VARIABLE);
                    }
                    ctx = current.parent().cloned();
                }
                if let Some(receiver) = this.filter(|r| !r.is_null()) {
                    if self.has_instance_member(&receiver, single) {
                        return self.get(&receiver, single).map(Lookup::Found);
                    }
                }
                if let Some(class) = class {
                    for c in program.super_chain(class) {
                        if has_static_member(program, c, single) {
                            return self.get_static(c, single).map(Lookup::Found);
                        }
                    }
                }
                self.lookup_in_scope(lib, single)
            }
            [first, second] => {
                let prefixed = program.prefixed_libraries(lib, first);
                if !prefixed.is_empty() {
                    for target in prefixed {
                        if let Some(found) = self.lookup_top_level(target, second)? {
                            return Ok(Lookup::Found(found));
                        }
                    }
                    return Ok(Lookup::NotFound);
                }
                match program.resolve_class_name(lib, first) {
                    Some(c) if has_static_member(program, c, second) => {
                        self.get_static(c, second).map(Lookup::Found)
                    }
                    _ => Ok(Lookup::NotFound),
                }
            }
            [prefix, class_name, member] => {
                for target in program.prefixed_libraries(lib, prefix) {
                    if let Some(c) = program.library_class(target, class_name) {
                        if has_static_member(program, c, member) {
                            return self.get_static(c, member).map(Lookup::Found);
                        }
                    }
                }
                Ok(Lookup::NotFound)
            }
            _ => Ok(Lookup::NotFound),
        }
    }

    /// Outermost function whose scope a closure sees; tear-offs see their method
    fn enclosing_function(&self, function: FunctionId) -> FunctionId {
        let program = self.program();
        let func = program.function(function);
        match (func.kind, func.parent) {
            (FunctionKind::ImplicitClosure, Some(method)) => method,
            _ => function,
        }
    }

    fn has_instance_member(&self, receiver: &Value, name: &str) -> bool {
        let program = self.program();
        let class = program.class_of(receiver);
        program.lookup_instance_field(class, name).is_some()
            || [Accessor::Getter, Accessor::Method]
                .into_iter()
                .any(|a| program.lookup_dynamic_function(class, name, a).is_some())
    }

    fn lookup_in_scope(&self, lib: LibraryId, name: &str) -> InvokeResult<Lookup<Value>> {
        let program = self.program();
        if let Some(found) = self.lookup_top_level(lib, name)? {
            return Ok(Lookup::Found(found));
        }
        if name.starts_with('_') {
            return Ok(Lookup::NotFound);
        }
        for import in program.imported_libraries(lib) {
            if let Some(found) = self.lookup_top_level(import, name)? {
                return Ok(Lookup::Found(found));
            }
        }
        Ok(Lookup::NotFound)
    }

    fn lookup_top_level(&self, lib: LibraryId, name: &str) -> InvokeResult<Option<Value>> {
        if self.has_top_level(lib, name) {
            return self.get_top_level(lib, name).map(Some);
        }
        match self.program().library_lookup_local(lib, name) {
            Some(LibraryMember::Class(c)) => Ok(Some(type_value(Type::rare(c)))),
            _ => Ok(None),
        }
    }
}

fn has_static_member(program: &Program, class: ClassId, name: &str) -> bool {
    program.class_static_field(class, name).is_some()
        || [Accessor::Getter, Accessor::Method]
            .into_iter()
            .any(|a| program.class_static_function(class, name, a).is_some())
}
