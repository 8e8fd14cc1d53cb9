//! Mirrors
//!
//! The closed set of mirror variants over program entities and runtime values, and the
//! [`MirrorFactory`] that builds them on demand and invokes members through them.

mod factory;
mod mirror;

pub use factory::MirrorFactory;
pub use mirror::{
    ClassMirror, ClosureMirror, FunctionTypeMirror, InstanceMirror, IsolateMirror, LibraryMirror,
    MethodFlags, MethodMirror, Mirror, MirrorReference, MirrorSystemMirror, ParameterMirror,
    SpecialType, TypeVariableMirror, TypedefMirror, VariableMirror,
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::invoke::{Arguments, InvokeError};
    use crate::vm::program::{
        ClassDecl, ClassId, FieldDecl, FunctionDecl, LibraryId, Owner, ParameterDecl,
        ParameterDetails, ParameterKind, Program, ProgramBuilder, Type,
    };
    use crate::vm::value::Value;

    struct Fixture {
        program: Program,
        lib: LibraryId,
        pair: ClassId,
        anon: ClassId,
        named_app: ClassId,
        callback: ClassId,
    }

    fn fixture() -> Fixture {
        let mut b = ProgramBuilder::new();
        let lib = b.add_library("reflectee", "file:///reflectee.vs");
        let pair = b.add_class(lib, ClassDecl::new("Pair").metadata(Value::string("@immutable")));
        b.add_type_parameter(pair, "A", Type::Dynamic);
        b.add_type_parameter(pair, "B", Type::Dynamic);
        b.add_field(Owner::Class(pair), FieldDecl::instance("first"));
        b.add_field(Owner::Class(pair), FieldDecl::instance("_second"));
        b.add_function(Owner::Class(pair), FunctionDecl::getter("length"));
        b.add_function(Owner::Class(pair), FunctionDecl::method("swap"));
        b.add_function(Owner::Class(pair), FunctionDecl::method("hidden").invisible());
        b.add_constructor(
            pair,
            FunctionDecl::constructor("of")
                .param_with(
                    ParameterDecl {
                        name: "a".into(),
                        ty: Type::Dynamic,
                        kind: ParameterKind::Required,
                    },
                    ParameterDetails {
                        is_final: true,
                        ..ParameterDetails::default()
                    },
                )
                .optional("b", Some(Value::Int(0))),
        );
        let mixin = b.add_class(lib, ClassDecl::new("Mixin"));
        let object = b.object_type();
        let anon = b.add_mixin_application(lib, None, object.clone(), Type::rare(mixin));
        let named_app = b.add_mixin_application(lib, Some("Mixed"), object, Type::rare(mixin));
        let callback = b.add_typedef(lib, "Callback", FunctionDecl::signature().param("event"));
        b.add_class(lib, ClassDecl::new("Internal").implementation());
        b.add_function(Owner::Library(lib), FunctionDecl::method("main"));
        b.set_root_library(lib);
        let program = b.build().unwrap();
        program.finalize_all().unwrap();
        Fixture {
            program,
            lib,
            pair,
            anon,
            named_app,
            callback,
        }
    }

    #[test]
    fn test_class_mirror_round_trip() {
        let f = fixture();
        let mirrors = MirrorFactory::new(&f.program, "main");
        let mirror = mirrors.create_class_mirror(f.pair, &Type::rare(f.pair)).unwrap();
        assert_eq!(mirror.referent(), Some(MirrorReference::Class(f.pair)));
        assert_eq!(mirror.simple_name(), Some("Pair"));
        assert_eq!(mirrors.metadata(MirrorReference::Class(f.pair)), vec![Value::string("@immutable")]);
    }

    #[test]
    fn test_type_arguments_default_to_dynamic() {
        let f = fixture();
        let mirrors = MirrorFactory::new(&f.program, "main");
        let args = mirrors.type_arguments(&Type::rare(f.pair)).unwrap();
        assert_eq!(args.len(), 2);
        assert!(args.iter().all(Mirror::is_dynamic));

        let core = *f.program.core();
        let explicit = Type::generic(f.pair, vec![Type::rare(core.int), Type::Dynamic]);
        let args = mirrors.type_arguments(&explicit).unwrap();
        assert_eq!(args[0].simple_name(), Some("int"));
        assert!(args[1].is_dynamic());
    }

    #[test]
    fn test_member_order_fields_then_methods() {
        let f = fixture();
        let mirrors = MirrorFactory::new(&f.program, "main");
        let names: Vec<String> = mirrors
            .class_members(f.pair)
            .unwrap()
            .iter()
            .map(|m| m.simple_name().unwrap_or_default().to_string())
            .collect();
        assert_eq!(names, vec!["first", "_second", "length", "swap"]);
        let ctors = mirrors.class_constructors(f.pair).unwrap();
        assert_eq!(ctors.len(), 1);
        assert_eq!(ctors[0].simple_name(), Some("of"));
    }

    #[test]
    fn test_constructor_parameters_after_reparse() {
        let f = fixture();
        let mirrors = MirrorFactory::new(&f.program, "main");
        let ctor = f.program.class_constructor(f.pair, "of").unwrap();
        let params = mirrors.method_parameters(ctor).unwrap();
        match (&params[0], &params[1]) {
            (Mirror::Parameter(a), Mirror::Parameter(b)) => {
                assert!(a.is_final);
                assert!(!a.is_optional);
                assert!(b.is_optional);
                assert_eq!(b.default_value, Some(Value::Int(0)));
            }
            other => panic!("unexpected mirrors: {:?}", other),
        }
    }

    #[test]
    fn test_implicit_and_getter_parameters_are_empty() {
        let f = fixture();
        let mirrors = MirrorFactory::new(&f.program, "main");
        let first = f.program.lookup_instance_field(f.pair, "first").unwrap();
        let setter = f.program.field(first).setter.unwrap();
        assert!(mirrors.method_parameters(setter).unwrap().is_empty());
        let length = f
            .program
            .lookup_dynamic_function(f.pair, "length", crate::vm::program::Accessor::Getter)
            .unwrap();
        assert!(mirrors.method_parameters(length).unwrap().is_empty());
    }

    #[test]
    fn test_mixin_application_names() {
        let f = fixture();
        let mirrors = MirrorFactory::new(&f.program, "main");
        let anon = mirrors.create_class_mirror(f.anon, &Type::rare(f.anon)).unwrap();
        assert_eq!(anon.simple_name(), None);
        let named = mirrors.create_class_mirror(f.named_app, &Type::rare(f.named_app)).unwrap();
        assert_eq!(named.simple_name(), Some("Mixed"));
    }

    #[test]
    fn test_signature_classes_redirect() {
        let f = fixture();
        let mirrors = MirrorFactory::new(&f.program, "main");
        let typedef = mirrors.create_class_mirror(f.callback, &Type::rare(f.callback)).unwrap();
        let referent = match &typedef {
            Mirror::Typedef(t) => mirrors.typedef_referent(t),
            other => panic!("expected typedef, got {:?}", other),
        };
        let canonical = match referent.referent() {
            Some(MirrorReference::Class(c)) => c,
            other => panic!("unexpected referent {:?}", other),
        };
        let again = mirrors.create_class_mirror(canonical, &Type::rare(canonical)).unwrap();
        assert!(matches!(again, Mirror::FunctionType(_)));
        if let Mirror::FunctionType(ft) = again {
            let params = mirrors.function_type_parameters(&ft).unwrap();
            assert_eq!(params[0].simple_name(), Some("event"));
        }
    }

    #[test]
    fn test_library_members_skip_hidden_classes() {
        let f = fixture();
        let mirrors = MirrorFactory::new(&f.program, "main");
        let names: Vec<Option<String>> = mirrors
            .library_members(f.lib)
            .unwrap()
            .iter()
            .map(|m| m.simple_name().map(str::to_string))
            .collect();
        assert!(names.contains(&Some("Pair".to_string())));
        assert!(names.contains(&Some("main".to_string())));
        assert!(!names.contains(&Some("Internal".to_string())));
        assert!(!names.contains(&Some("Callback".to_string())));

        let core = f.program.core().library;
        let core_names: Vec<Option<String>> = mirrors
            .library_members(core)
            .unwrap()
            .iter()
            .map(|m| m.simple_name().map(str::to_string))
            .collect();
        assert!(!core_names.contains(&Some("dynamic".to_string())));
    }

    #[test]
    fn test_special_type_mirrors() {
        let f = fixture();
        let mirrors = MirrorFactory::new(&f.program, "main");
        assert_eq!(mirrors.reflect_type(&Type::Void).unwrap().simple_name(), Some("void"));
        let dynamic_class = f.program.core().dynamic;
        let m = mirrors.create_class_mirror(dynamic_class, &Type::rare(dynamic_class)).unwrap();
        assert!(m.is_dynamic());
    }

    #[test]
    fn test_mirror_system_and_isolate() {
        let f = fixture();
        let mirrors = MirrorFactory::new(&f.program, "worker");
        match mirrors.mirror_system() {
            Mirror::MirrorSystem(system) => {
                assert_eq!(system.libraries.len(), f.program.libraries().len());
                assert_eq!(system.isolate.simple_name(), Some("worker"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unfinalized_members_fail() {
        let mut b = ProgramBuilder::new();
        let lib = b.add_library("l", "file:///l.vs");
        let class = b.add_class(lib, ClassDecl::new("Late"));
        let program = b.build().unwrap();
        let mirrors = MirrorFactory::new(&program, "main");
        assert_eq!(
            mirrors.class_members(class).unwrap_err(),
            InvokeError::NotFinalized("Late".to_string())
        );
    }

    #[test]
    fn test_private_names_unmangled_in_mirrors() {
        let f = fixture();
        let mirrors = MirrorFactory::new(&f.program, "main");
        let internal = mirrors.mangle_name("_second", f.lib);
        assert_ne!(internal, "_second");
        let field = f.program.lookup_instance_field(f.pair, &internal).unwrap();
        assert_eq!(mirrors.variable_mirror(field).simple_name(), Some("_second"));
    }

    #[test]
    fn test_invoke_through_instance_mirror() {
        let f = fixture();
        let mirrors = MirrorFactory::new(&f.program, "main");
        let class_mirror = mirrors.create_class_mirror(f.pair, &Type::rare(f.pair)).unwrap();
        let pair = mirrors
            .new_instance(&class_mirror, "of", &Arguments::positional(vec![Value::Int(1)]))
            .unwrap();
        let instance = mirrors.reflect(&pair);
        mirrors.set_field(&instance, "first", Value::Int(8)).unwrap();
        assert_eq!(mirrors.get_field(&instance, "first").unwrap(), Value::Int(8));
        assert!(matches!(
            mirrors.get_field(&Mirror::Special(SpecialType::Void), "x"),
            Err(InvokeError::MirroredCompilationError(_))
        ));
    }
}
