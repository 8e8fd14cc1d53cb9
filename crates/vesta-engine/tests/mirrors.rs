//! Mirror construction over a loaded program

mod common;

use common::geometry;
use vesta_engine::vm::reflect::SpecialType;
use vesta_engine::{Arguments, Mirror, MirrorReference, Type, Value};

#[test]
fn test_class_mirror_refers_to_its_class() {
    let g = geometry();
    let mirrors = g.isolate.mirrors();
    let mirror = mirrors.create_class_mirror(g.point, &Type::rare(g.point)).unwrap();
    assert_eq!(mirror.referent(), Some(MirrorReference::Class(g.point)));
    assert_eq!(mirror.simple_name(), Some("Point"));

    let again = mirrors.mirror_for(MirrorReference::Class(g.point)).unwrap();
    assert_eq!(again.referent(), mirror.referent());
}

#[test]
fn test_raw_generic_type_arguments_are_dynamic() {
    let g = geometry();
    let mirrors = g.isolate.mirrors();
    let args = mirrors.type_arguments(&Type::rare(g.pair)).unwrap();
    assert_eq!(args.len(), 2);
    for arg in &args {
        assert!(matches!(arg, Mirror::Special(SpecialType::Dynamic)), "got {:?}", arg);
    }
    assert!(mirrors.type_arguments(&Type::rare(g.point)).unwrap().is_empty());
}

#[test]
fn test_point_members_in_declaration_order() {
    let g = geometry();
    let mirrors = g.isolate.mirrors();
    let names: Vec<String> = mirrors
        .class_members(g.point)
        .unwrap()
        .iter()
        .filter_map(|m| m.simple_name().map(str::to_string))
        .collect();
    assert_eq!(&names[..4], &["x", "id", "unit", "count"]);
    assert!(names.iter().any(|n| n == "shift"));

    let ctors = mirrors.class_constructors(g.point).unwrap();
    assert_eq!(ctors.len(), 1);
    assert_eq!(ctors[0].simple_name(), Some("at"));
}

#[test]
fn test_reflect_instance_and_closure() {
    let g = geometry();
    let mirrors = g.isolate.mirrors();
    let class = mirrors.create_class_mirror(g.point, &Type::rare(g.point)).unwrap();
    let p = mirrors
        .new_instance(&class, "at", &Arguments::positional(vec![Value::Int(4)]))
        .unwrap();
    match mirrors.reflect(&p) {
        Mirror::Instance(m) => assert_eq!(m.class, g.point),
        other => panic!("expected an instance mirror, got {:?}", other),
    }

    let tear_off = g.isolate.invoker().tear_off(g.shift, Some(p)).unwrap();
    match mirrors.reflect(&tear_off) {
        Mirror::Closure(m) => assert_eq!(m.function, g.shift),
        other => panic!("expected a closure mirror, got {:?}", other),
    }
}

#[test]
fn test_mirror_system_lists_root_library() {
    let g = geometry();
    let mirrors = g.isolate.mirrors();
    match mirrors.mirror_system() {
        Mirror::MirrorSystem(system) => {
            assert!(system
                .libraries
                .iter()
                .any(|l| l.referent() == Some(MirrorReference::Library(g.lib))));
            match *system.isolate {
                Mirror::Isolate(ref iso) => {
                    let root = iso.root_library.as_ref().and_then(|r| r.referent());
                    assert_eq!(root, Some(MirrorReference::Library(g.lib)));
                }
                ref other => panic!("expected an isolate mirror, got {:?}", other),
            }
        }
        other => panic!("expected a mirror system, got {:?}", other),
    }
}
