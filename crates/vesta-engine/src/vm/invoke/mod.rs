//! Dynamic invocation engine
//!
//! Get, set, invoke and construct against an instance, a class, a library or a
//! closure context. Lookups that legitimately find nothing return
//! [`Lookup::NotFound`]; everything else that fails is an [`InvokeError`].

mod args;
mod error;
mod invoker;
mod lexical;

pub use args::{bind_arguments, Arguments, ArgumentsDescriptor};
pub use error::{AccessKind, InvocationLevel, InvokeError, InvokeResult, NoSuchMethodError};
pub use invoker::{type_arguments_value, type_value, Invoker, Lookup, CTOR_PHASE_ALL};

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::vm::program::{
        ClassDecl, FieldDecl, FunctionDecl, Owner, Program, ProgramBuilder, Type,
    };
    use crate::vm::value::{Closure, Context, Value, THIS_VARIABLE};

    struct Fixture {
        program: Program,
        lib: crate::vm::program::LibraryId,
        point: crate::vm::program::ClassId,
    }

    fn fixture() -> Fixture {
        let mut b = ProgramBuilder::new();
        let lib = b.add_library("geo", "file:///geo.vs");
        let point = b.add_class(lib, ClassDecl::new("Point"));
        b.add_field(Owner::Class(point), FieldDecl::instance("x").value(Value::Int(0)));
        b.add_field(Owner::Class(point), FieldDecl::instance("id").final_());
        b.add_field(Owner::Class(point), FieldDecl::static_("origin").initializer(|_, _| Ok(Value::string("o"))));
        b.add_field(Owner::Class(point), FieldDecl::static_("unit").const_().value(Value::Int(1)));
        b.add_function(
            Owner::Class(point),
            FunctionDecl::method("shift").param("dx").body(|inv, args| {
                let x = inv.get(&args[0], "x")?.as_int().unwrap_or(0);
                Ok(Value::Int(x + args[1].as_int().unwrap_or(0)))
            }),
        );
        b.add_function(
            Owner::Class(point),
            FunctionDecl::getter("double").body(|inv, args| {
                let x = inv.get(&args[0], "x")?.as_int().unwrap_or(0);
                Ok(Value::Int(x * 2))
            }),
        );
        b.add_function(
            Owner::Class(point),
            FunctionDecl::method("make").static_().body(|_, _| Ok(Value::string("made"))),
        );
        b.add_constructor(
            point,
            FunctionDecl::constructor("at").param("x").body(|inv, args| {
                inv.set(&args[0], "x", args[2].clone())?;
                Ok(Value::Null)
            }),
        );
        b.add_constructor(point, FunctionDecl::factory("origin").redirect_to("Point", "at"));
        b.add_field(Owner::Library(lib), FieldDecl::static_("version").value(Value::Int(2)));
        b.add_field(Owner::Library(lib), FieldDecl::static_("frozen").final_().value(Value::Int(1)));
        b.add_function(
            Owner::Library(lib),
            FunctionDecl::method("greet").named("who", Some(Value::string("world"))).body(|_, args| {
                Ok(Value::string(format!("hello {}", args[0])))
            }),
        );
        let program = b.build().unwrap();
        program.finalize_all().unwrap();
        Fixture { program, lib, point }
    }

    fn new_point(inv: &Invoker<'_>, f: &Fixture, x: i64) -> Value {
        inv.new_instance(f.point, "at", &Arguments::positional(vec![Value::Int(x)]), None)
            .unwrap()
    }

    #[test]
    fn test_constructor_receives_instance() {
        let f = fixture();
        let inv = Invoker::new(&f.program);
        let p = new_point(&inv, &f, 5);
        assert_eq!(inv.get(&p, "x").unwrap(), Value::Int(5));
    }

    #[test]
    fn test_redirecting_factory_runs_target() {
        let f = fixture();
        let inv = Invoker::new(&f.program);
        let p = inv
            .new_instance(f.point, "origin", &Arguments::positional(vec![Value::Int(9)]), None)
            .unwrap();
        assert_eq!(inv.get(&p, "x").unwrap(), Value::Int(9));
    }

    #[test]
    fn test_missing_constructor_is_no_such_method() {
        let f = fixture();
        let inv = Invoker::new(&f.program);
        let err = inv.new_instance(f.point, "nope", &Arguments::new(), None).unwrap_err();
        let nsm = err.as_no_such_method().unwrap();
        assert_eq!(nsm.level, InvocationLevel::Constructor);
        assert_eq!(nsm.name, "Point.nope");
    }

    #[test]
    fn test_getter_field_and_tear_off() {
        let f = fixture();
        let inv = Invoker::new(&f.program);
        let p = new_point(&inv, &f, 3);
        assert_eq!(inv.get(&p, "double").unwrap(), Value::Int(6));
        let shift = inv.get(&p, "shift").unwrap();
        assert!(shift.as_closure().is_some());
        let result = inv.apply(&shift, &Arguments::positional(vec![Value::Int(4)])).unwrap();
        assert_eq!(result, Value::Int(7));
    }

    #[test]
    fn test_reflective_and_direct_arity_errors_agree() {
        let f = fixture();
        let inv = Invoker::new(&f.program);
        let p = new_point(&inv, &f, 1);
        let shift = f
            .program
            .lookup_dynamic_function(f.point, "shift", crate::vm::program::Accessor::Method)
            .unwrap();
        let reflective = inv.invoke(&p, "shift", &Arguments::new()).unwrap_err();
        let direct = inv.call(shift, std::slice::from_ref(&p), &Arguments::new()).unwrap_err();
        assert_eq!(reflective, direct);
        let nsm = reflective.as_no_such_method().unwrap();
        assert_eq!(nsm.existing_parameters, Some(vec!["dx".to_string()]));
        assert_eq!(nsm.level, InvocationLevel::Dynamic);
    }

    #[test]
    fn test_final_fields_reject_writes() {
        let f = fixture();
        let inv = Invoker::new(&f.program);
        let p = new_point(&inv, &f, 1);
        assert!(matches!(
            inv.set(&p, "id", Value::Int(1)),
            Err(InvokeError::MirroredCompilationError(_))
        ));
        assert!(matches!(
            inv.set_static(f.point, "unit", Value::Int(2)),
            Err(InvokeError::MirroredCompilationError(_))
        ));
        assert!(matches!(
            inv.set_top_level(f.lib, "frozen", Value::Int(2)),
            Err(InvokeError::MirroredCompilationError(_))
        ));
    }

    #[test]
    fn test_static_initializer_runs_once() {
        let f = fixture();
        let inv = Invoker::new(&f.program);
        let field = f.program.class_static_field(f.point, "origin").unwrap();
        assert!(f.program.field(field).is_uninitialized());
        assert_eq!(inv.get_static(f.point, "origin").unwrap(), Value::string("o"));
        assert!(!f.program.field(field).is_uninitialized());
        inv.set_static(f.point, "origin", Value::Int(3)).unwrap();
        assert_eq!(inv.get_static(f.point, "origin").unwrap(), Value::Int(3));
    }

    #[test]
    fn test_static_lookup_does_not_walk_superclasses() {
        let mut b = ProgramBuilder::new();
        let lib = b.add_library("l", "file:///l.vs");
        let base = b.add_class(lib, ClassDecl::new("Base"));
        b.add_function(Owner::Class(base), FunctionDecl::method("s").static_());
        let sub = b.add_class(lib, ClassDecl::new("Sub").extends(Type::rare(base)));
        let program = b.build().unwrap();
        program.finalize_all().unwrap();
        let inv = Invoker::new(&program);
        assert!(inv.invoke_static(base, "s", &Arguments::new()).is_ok());
        let err = inv.invoke_static(sub, "s", &Arguments::new()).unwrap_err();
        assert_eq!(err.as_no_such_method().unwrap().level, InvocationLevel::Static);
    }

    #[test]
    fn test_unfinalized_class_is_reported() {
        let mut b = ProgramBuilder::new();
        let lib = b.add_library("l", "file:///l.vs");
        let class = b.add_class(lib, ClassDecl::new("Lazy"));
        let program = b.build().unwrap();
        let inv = Invoker::new(&program);
        assert_eq!(
            inv.get_static(class, "x"),
            Err(InvokeError::NotFinalized("Lazy".to_string()))
        );
    }

    #[test]
    fn test_top_level_named_defaults() {
        let f = fixture();
        let inv = Invoker::new(&f.program);
        let hello = inv.invoke_top_level(f.lib, "greet", &Arguments::new()).unwrap();
        assert_eq!(hello, Value::string("hello world"));
        let named = Arguments::new().with_named("who", Value::string("vesta"));
        let hello = inv.invoke_top_level(f.lib, "greet", &named).unwrap();
        assert_eq!(hello, Value::string("hello vesta"));
        let err = inv.get_top_level(f.lib, "missing").unwrap_err();
        let nsm = err.as_no_such_method().unwrap();
        assert_eq!(nsm.receiver, Value::Null);
        assert_eq!(nsm.level, InvocationLevel::TopLevel);
    }

    #[test]
    fn test_context_binding_shadows_library() {
        let f = fixture();
        let inv = Invoker::new(&f.program);
        let greet = f
            .program
            .library_function(f.lib, "greet", crate::vm::program::Accessor::Method)
            .unwrap();
        let ctx = Arc::new(Context::with_variables(None, vec![("version".to_string(), Value::Int(99))]));
        let closure = Value::Closure(Arc::new(Closure::new(greet, Some(ctx))));
        assert_eq!(
            inv.find_in_context(&closure, "version").unwrap(),
            Lookup::Found(Value::Int(99))
        );
        let bare = Value::Closure(Arc::new(Closure::new(greet, None)));
        assert_eq!(
            inv.find_in_context(&bare, "version").unwrap(),
            Lookup::Found(Value::Int(2))
        );
        assert_eq!(inv.find_in_context(&bare, "nothing").unwrap(), Lookup::NotFound);
    }

    #[test]
    fn test_context_this_and_class_statics() {
        let f = fixture();
        let inv = Invoker::new(&f.program);
        let p = new_point(&inv, &f, 4);
        let shift = f
            .program
            .lookup_dynamic_function(f.point, "shift", crate::vm::program::Accessor::Method)
            .unwrap();
        let ctx = Arc::new(Context::with_variables(None, vec![(THIS_VARIABLE.to_string(), p)]));
        let closure = Value::Closure(Arc::new(Closure::new(shift, Some(ctx))));
        assert_eq!(inv.find_in_context(&closure, "x").unwrap(), Lookup::Found(Value::Int(4)));
        assert!(inv.find_in_context(&closure, "make").unwrap().is_found());
        assert_eq!(
            inv.find_in_context(&closure, "Point.unit").unwrap(),
            Lookup::Found(Value::Int(1))
        );
    }
}
