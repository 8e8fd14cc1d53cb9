//! `vesta inspect`: walk a loaded image through the mirror system.

use std::path::PathBuf;

use serde_json::{json, Value as Json};
use vesta_engine::vm::program::CORE_LIBRARY_URL;
use vesta_engine::vm::reflect::{MethodMirror, Mirror, MirrorFactory};
use vesta_engine::ClassId;

pub struct InspectArgs {
    pub image: PathBuf,
    pub core: bool,
    pub json: bool,
}

pub fn execute(args: InspectArgs) -> anyhow::Result<()> {
    let isolate = super::load_isolate(&args.image, Default::default())?;
    let mirrors = isolate.mirrors();

    let libraries = match mirrors.mirror_system() {
        Mirror::MirrorSystem(system) => system.libraries,
        _ => Vec::new(),
    };
    let mut out = Vec::new();
    for library in libraries {
        let Mirror::Library(lib) = library else {
            continue;
        };
        if lib.url == CORE_LIBRARY_URL && !args.core {
            continue;
        }
        let mut members = Vec::new();
        for member in mirrors.library_members(lib.library)? {
            members.push(describe(&mirrors, &member)?);
        }
        out.push(json!({
            "name": lib.simple_name,
            "url": lib.url,
            "members": members,
        }));
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        for lib in &out {
            print_library(lib);
        }
    }
    Ok(())
}

fn describe(mirrors: &MirrorFactory<'_>, mirror: &Mirror) -> anyhow::Result<Json> {
    Ok(match mirror {
        Mirror::Class(class) => {
            describe_class(mirrors, class.class, class.simple_name.as_deref(), class.is_abstract)?
        }
        Mirror::Method(method) => describe_method(mirrors, method)?,
        Mirror::Variable(var) => json!({
            "kind": "field",
            "name": var.simple_name,
            "id": var.field.to_string(),
            "static": var.is_static,
            "final": var.is_final,
            "const": var.is_const,
        }),
        Mirror::Typedef(typedef) => json!({
            "kind": "typedef",
            "name": typedef.simple_name,
        }),
        other => json!({
            "kind": other.kind_name(),
            "name": other.simple_name(),
        }),
    })
}

fn describe_class(
    mirrors: &MirrorFactory<'_>,
    class: ClassId,
    name: Option<&str>,
    is_abstract: bool,
) -> anyhow::Result<Json> {
    let type_parameters: Vec<String> = mirrors
        .type_variables(class)
        .iter()
        .filter_map(|tp| tp.simple_name().map(str::to_string))
        .collect();
    let mut members = Vec::new();
    for member in mirrors.class_members(class)? {
        members.push(describe(mirrors, &member)?);
    }
    for ctor in mirrors.class_constructors(class)? {
        members.push(describe(mirrors, &ctor)?);
    }
    Ok(json!({
        "kind": "class",
        "name": name,
        "id": class.to_string(),
        "abstract": is_abstract,
        "type_parameters": type_parameters,
        "members": members,
    }))
}

fn describe_method(mirrors: &MirrorFactory<'_>, method: &MethodMirror) -> anyhow::Result<Json> {
    let flags = method.flags;
    let kind = if flags.is_constructor {
        "constructor"
    } else if flags.is_getter {
        "getter"
    } else if flags.is_setter {
        "setter"
    } else {
        "method"
    };
    let parameters: Vec<Json> = mirrors
        .method_parameters(method.function)?
        .iter()
        .filter_map(|p| match p {
            Mirror::Parameter(p) => Some(json!({
                "name": p.simple_name,
                "optional": p.is_optional,
                "named": p.is_named,
            })),
            _ => None,
        })
        .collect();
    Ok(json!({
        "kind": kind,
        "name": method.simple_name,
        "id": method.function.to_string(),
        "static": flags.is_static,
        "abstract": flags.is_abstract,
        "parameters": parameters,
    }))
}

fn print_library(lib: &Json) {
    println!("library {} ({})", text(&lib["name"]), text(&lib["url"]));
    for member in lib["members"].as_array().into_iter().flatten() {
        print_member(member, 1);
    }
}

fn print_member(member: &Json, indent: usize) {
    let pad = "  ".repeat(indent);
    let kind = text(&member["kind"]);
    let name = text(&member["name"]);
    match kind {
        "class" => {
            let params: Vec<&str> = member["type_parameters"]
                .as_array()
                .into_iter()
                .flatten()
                .filter_map(Json::as_str)
                .collect();
            let generics = if params.is_empty() {
                String::new()
            } else {
                format!("<{}>", params.join(", "))
            };
            let modifier = if member["abstract"].as_bool() == Some(true) { "abstract " } else { "" };
            println!("{}{}class {}{} [{}]", pad, modifier, name, generics, text(&member["id"]));
            for child in member["members"].as_array().into_iter().flatten() {
                print_member(child, indent + 1);
            }
        }
        "field" => {
            let mut modifiers = String::new();
            for flag in ["static", "const", "final"] {
                if member[flag].as_bool() == Some(true) {
                    modifiers.push_str(flag);
                    modifiers.push(' ');
                }
            }
            println!("{}{}field {} [{}]", pad, modifiers, name, text(&member["id"]));
        }
        "method" | "getter" | "setter" | "constructor" => {
            let static_ = if member["static"].as_bool() == Some(true) { "static " } else { "" };
            println!(
                "{}{}{} {}({}) [{}]",
                pad,
                static_,
                kind,
                name,
                signature(&member["parameters"]),
                text(&member["id"])
            );
        }
        _ => println!("{}{} {}", pad, kind, name),
    }
}

fn signature(parameters: &Json) -> String {
    let mut required = Vec::new();
    let mut optional = Vec::new();
    let mut named = Vec::new();
    for p in parameters.as_array().into_iter().flatten() {
        let name = text(&p["name"]).to_string();
        if p["named"].as_bool() == Some(true) {
            named.push(name);
        } else if p["optional"].as_bool() == Some(true) {
            optional.push(name);
        } else {
            required.push(name);
        }
    }
    if !optional.is_empty() {
        required.push(format!("[{}]", optional.join(", ")));
    }
    if !named.is_empty() {
        required.push(format!("{{{}}}", named.join(", ")));
    }
    required.join(", ")
}

fn text(value: &Json) -> &str {
    value.as_str().unwrap_or("")
}
