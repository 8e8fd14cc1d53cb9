//! Dynamic invocation through mirrors and the invoker

mod common;

use std::sync::Arc;

use common::geometry;
use vesta_engine::vm::invoke::InvocationLevel;
use vesta_engine::vm::value::{Closure, Context};
use vesta_engine::{Arguments, InvokeError, Lookup, Mirror, Type, Value};

fn new_point(g: &common::Geometry, x: i64) -> Value {
    let mirrors = g.isolate.mirrors();
    let class = mirrors.create_class_mirror(g.point, &Type::rare(g.point)).unwrap();
    mirrors
        .new_instance(&class, "at", &Arguments::positional(vec![Value::Int(x)]))
        .unwrap()
}

#[test]
fn test_reflective_invoke_matches_direct_call() {
    let g = geometry();
    let p = new_point(&g, 10);
    let mirrors = g.isolate.mirrors();
    let instance = mirrors.reflect(&p);

    for args in [
        Arguments::positional(vec![Value::Int(2)]),
        Arguments::positional(vec![Value::Int(2), Value::Int(5)]),
    ] {
        let reflective = mirrors.invoke(&instance, "shift", &args).unwrap();
        let direct = g.isolate.invoker().call(g.shift, std::slice::from_ref(&p), &args).unwrap();
        assert!(reflective.identical(&direct), "{:?} vs {:?}", reflective, direct);
    }
    assert_eq!(
        mirrors.invoke(&instance, "shift", &Arguments::positional(vec![Value::Int(1)])).unwrap().as_int(),
        Some(11)
    );
}

#[test]
fn test_argument_mismatch_reports_existing_parameters() {
    let g = geometry();
    let p = new_point(&g, 0);
    let mirrors = g.isolate.mirrors();
    let instance = mirrors.reflect(&p);

    let err = mirrors
        .invoke(
            &instance,
            "shift",
            &Arguments::positional(vec![Value::Int(1), Value::Int(2), Value::Int(3)]),
        )
        .unwrap_err();
    let nsm = err.as_no_such_method().expect("no such method");
    assert_eq!(nsm.name, "shift");
    assert_eq!(nsm.positional_count, 3);
    assert_eq!(
        nsm.existing_parameters.as_deref(),
        Some(&["dx".to_string(), "dy".to_string()][..])
    );

    let err = mirrors.invoke(&instance, "scale", &Arguments::new()).unwrap_err();
    let nsm = err.as_no_such_method().expect("no such method");
    assert_eq!(nsm.level, InvocationLevel::Dynamic);
    assert!(nsm.existing_parameters.is_none());
}

#[test]
fn test_fields_read_and_write_through_mirrors() {
    let g = geometry();
    let p = new_point(&g, 4);
    let mirrors = g.isolate.mirrors();
    let instance = mirrors.reflect(&p);
    let class = mirrors.create_class_mirror(g.point, &Type::rare(g.point)).unwrap();
    let library = mirrors.library_mirror(g.lib);

    assert_eq!(mirrors.get_field(&instance, "x").unwrap().as_int(), Some(4));
    mirrors.set_field(&instance, "x", Value::Int(9)).unwrap();
    assert_eq!(mirrors.get_field(&instance, "x").unwrap().as_int(), Some(9));

    mirrors.set_field(&class, "count", Value::Int(2)).unwrap();
    assert_eq!(mirrors.get_field(&class, "count").unwrap().as_int(), Some(2));

    assert_eq!(mirrors.get_field(&library, "label").unwrap().as_str(), Some("geo"));
    let doubled = mirrors
        .invoke(&library, "twice", &Arguments::positional(vec![Value::Int(21)]))
        .unwrap();
    assert_eq!(doubled.as_int(), Some(42));
}

#[test]
fn test_final_fields_reject_writes() {
    let g = geometry();
    let p = new_point(&g, 1);
    let mirrors = g.isolate.mirrors();
    let instance = mirrors.reflect(&p);
    let class = mirrors.create_class_mirror(g.point, &Type::rare(g.point)).unwrap();
    let library = mirrors.library_mirror(g.lib);

    let cases: [(&Mirror, &str); 3] = [(&instance, "id"), (&class, "unit"), (&library, "label")];
    for (mirror, name) in cases {
        match mirrors.set_field(mirror, name, Value::Int(0)) {
            Err(InvokeError::MirroredCompilationError(msg)) => assert!(msg.contains(name), "{}", msg),
            other => panic!("writing {} gave {:?}", name, other),
        }
    }
    assert_eq!(mirrors.get_field(&instance, "id").unwrap().as_int(), Some(7));
    assert_eq!(mirrors.get_field(&class, "unit").unwrap().as_int(), Some(1));
}

#[test]
fn test_context_binding_shadows_library_member() {
    let g = geometry();
    let mirrors = g.isolate.mirrors();
    let lookup = |closure: Value, name: &str| match mirrors.reflect(&closure) {
        Mirror::Closure(m) => mirrors.find_in_context(&m, name).unwrap(),
        other => panic!("expected a closure mirror, got {:?}", other),
    };

    let context = Context::with_variables(None, vec![("scale".to_string(), Value::Int(10))]);
    let shadowing = Value::Closure(Arc::new(Closure::new(g.inner, Some(Arc::new(context)))));
    assert!(matches!(lookup(shadowing, "scale"), Lookup::Found(Value::Int(10))));

    let bare = Value::Closure(Arc::new(Closure::new(g.inner, None)));
    assert!(matches!(lookup(bare.clone(), "scale"), Lookup::Found(Value::Int(3))));
    assert!(matches!(lookup(bare, "missing"), Lookup::NotFound));
}
