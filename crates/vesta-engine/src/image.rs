//! Program images
//!
//! A program image is a serde description of the libraries, classes, fields and
//! functions a frontend produced. Types are written as source-like strings
//! (`List<int>`, `prefix.Name`, `T`) and resolved against the library scope when the
//! image is loaded. Function bodies are not part of an image; code arrives later as
//! flow graphs.
//!
//! ```json
//! {
//!   "root": "file:///main.vs",
//!   "libraries": [{
//!     "name": "main",
//!     "url": "file:///main.vs",
//!     "source": "class Point {\n  int x;\n}\n",
//!     "classes": [{ "name": "Point", "fields": [{ "name": "x", "type": "int" }] }]
//!   }]
//! }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::vm::program::{
    ClassDecl, ClassId, FieldDecl, FunctionDecl, LibraryId, Owner, ParameterDecl, ParameterDetails,
    ParameterKind, Program, ProgramBuilder, ProgramError, ScriptId, TokenPos, Type,
};
use crate::vm::value::Value;

/// Errors from reading or loading an image
#[derive(Debug, Error)]
pub enum ImageError {
    /// The image file could not be read
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The image is not valid JSON for this format
    #[error("Invalid image: {0}")]
    Json(#[from] serde_json::Error),

    /// A type string could not be parsed
    #[error("Malformed type '{0}'")]
    MalformedType(String),

    /// A type names a class that is not in scope
    #[error("Unknown type '{name}' in library '{library}'")]
    UnknownType {
        /// Library whose scope was searched
        library: String,
        /// Type as written
        name: String,
    },

    /// An import or the root names a library the image does not declare
    #[error("Unknown library '{0}'")]
    UnknownLibrary(String),

    /// The object model rejected the image
    #[error(transparent)]
    Program(#[from] ProgramError),
}

/// Image result type
pub type ImageResult<T> = Result<T, ImageError>;

/// Whole-program image
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgramImage {
    /// URL of the root library
    #[serde(default)]
    pub root: Option<String>,
    /// Libraries in declaration order
    #[serde(default)]
    pub libraries: Vec<LibraryImage>,
}

/// Library
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryImage {
    /// Name
    pub name: String,
    /// URL, also the URL of its script
    pub url: String,
    /// Source text used for line and column mapping
    pub source: Option<String>,
    /// Imports
    pub imports: Vec<ImportImage>,
    /// Classes
    pub classes: Vec<ClassImage>,
    /// Top-level fields
    pub fields: Vec<FieldImage>,
    /// Top-level functions
    pub functions: Vec<FunctionImage>,
}

/// Import of another library
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportImage {
    /// Imported library URL
    pub url: String,
    /// Import prefix
    #[serde(default)]
    pub prefix: Option<String>,
}

/// Class
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassImage {
    /// Name
    pub name: String,
    /// Type parameter names
    pub type_parameters: Vec<String>,
    /// Supertype; `Object` when absent
    pub extends: Option<String>,
    /// Implemented interfaces
    pub implements: Vec<String>,
    /// Abstract class
    pub is_abstract: bool,
    /// Declaration position
    pub pos: Option<u32>,
    /// Fields
    pub fields: Vec<FieldImage>,
    /// Methods, getters, setters and constructors
    pub functions: Vec<FunctionImage>,
}

/// Field
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldImage {
    /// Name
    pub name: String,
    /// Declared type
    #[serde(rename = "type")]
    pub ty: Option<String>,
    /// Static (ignored for top-level fields)
    pub is_static: bool,
    /// `final`
    pub is_final: bool,
    /// `const`
    pub is_const: bool,
    /// Initial value
    pub value: Option<ConstValue>,
    /// Declaration position
    pub pos: Option<u32>,
}

/// Function kind in an image
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FunctionImageKind {
    /// Method or top-level function
    #[default]
    Method,
    /// Getter
    Getter,
    /// Setter
    Setter,
    /// Generative constructor
    Constructor,
    /// Factory constructor
    Factory,
}

/// Function
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FunctionImage {
    /// Name; constructor name without the class prefix
    pub name: String,
    /// Kind
    pub kind: FunctionImageKind,
    /// Static
    pub is_static: bool,
    /// Abstract
    pub is_abstract: bool,
    /// Parameters
    pub parameters: Vec<ParameterImage>,
    /// Result type
    pub returns: Option<String>,
    /// Source range start
    pub start: Option<u32>,
    /// Source range end
    pub end: Option<u32>,
}

/// How a parameter is passed, as written in an image
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterImageKind {
    /// Required positional
    #[default]
    Required,
    /// Optional positional
    Optional,
    /// Named
    Named,
}

/// Parameter
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParameterImage {
    /// Name
    pub name: String,
    /// Declared type
    #[serde(rename = "type")]
    pub ty: Option<String>,
    /// Passing convention
    pub kind: ParameterImageKind,
    /// Default value
    pub default: Option<ConstValue>,
    /// `final`
    pub is_final: bool,
}

/// Constant written in an image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConstValue {
    /// `null`
    Null,
    /// Boolean
    Bool(bool),
    /// Integer
    Int(i64),
    /// Double
    Double(f64),
    /// String
    Str(String),
}

impl ConstValue {
    /// Runtime value
    pub fn to_value(&self) -> Value {
        match self {
            ConstValue::Null => Value::Null,
            ConstValue::Bool(b) => Value::Bool(*b),
            ConstValue::Int(i) => Value::Int(*i),
            ConstValue::Double(d) => Value::Double(*d),
            ConstValue::Str(s) => Value::string(s),
        }
    }
}

impl ProgramImage {
    /// Parse an image from JSON text
    pub fn from_json(text: &str) -> ImageResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Read an image file
    pub fn from_file(path: impl AsRef<Path>) -> ImageResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&text)
    }

    /// Pretty JSON
    pub fn to_json(&self) -> ImageResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Build a finalized program from the image
    pub fn load(&self) -> ImageResult<Program> {
        let mut loader = Loader {
            builder: ProgramBuilder::new(),
            libraries: Vec::new(),
        };
        loader.declare(self)?;
        loader.define(self)?;
        if let Some(root) = &self.root {
            let lib = loader.library(root)?;
            loader.builder.set_root_library(lib);
        }
        let program = loader.builder.build()?;
        program.finalize_all()?;
        log::debug!(
            "loaded image: {} libraries, {} classes, {} functions",
            program.libraries().len(),
            program.classes().len(),
            program.functions().len()
        );
        Ok(program)
    }
}

struct LoadedLibrary {
    id: LibraryId,
    script: Option<ScriptId>,
    classes: Vec<ClassId>,
}

struct Loader {
    builder: ProgramBuilder,
    libraries: Vec<LoadedLibrary>,
}

impl Loader {
    fn library(&self, url: &str) -> ImageResult<LibraryId> {
        self.builder
            .program()
            .library_by_url(url)
            .ok_or_else(|| ImageError::UnknownLibrary(url.to_string()))
    }

    /// Libraries, scripts, classes and type parameters; everything a type can name
    fn declare(&mut self, image: &ProgramImage) -> ImageResult<()> {
        for lib in &image.libraries {
            let id = self.builder.add_library(&lib.name, &lib.url);
            let script = lib.source.as_deref().map(|source| {
                let script = self.builder.add_script(&lib.url, source);
                self.builder.set_library_script(id, script);
                script
            });
            let mut classes = Vec::with_capacity(lib.classes.len());
            for class in &lib.classes {
                let mut decl = ClassDecl::new(&class.name);
                if class.is_abstract {
                    decl = decl.abstract_();
                }
                if let (Some(script), Some(pos)) = (script, class.pos) {
                    decl = decl.at(script, TokenPos(pos));
                }
                let cid = self.builder.add_class(id, decl);
                for tp in &class.type_parameters {
                    self.builder.add_type_parameter(cid, tp, Type::Dynamic);
                }
                classes.push(cid);
            }
            self.libraries.push(LoadedLibrary { id, script, classes });
        }
        for lib in &image.libraries {
            let id = self.library(&lib.url)?;
            for import in &lib.imports {
                let target = self.library(&import.url)?;
                self.builder.add_import(id, target, import.prefix.as_deref());
            }
        }
        Ok(())
    }

    /// Supertypes, fields and functions
    fn define(&mut self, image: &ProgramImage) -> ImageResult<()> {
        for (lib, loaded) in image.libraries.iter().zip(std::mem::take(&mut self.libraries)) {
            for (class, &cid) in lib.classes.iter().zip(&loaded.classes) {
                let scope = Scope {
                    library: loaded.id,
                    class: Some(cid),
                };
                if let Some(extends) = &class.extends {
                    let ty = self.resolve(&scope, extends)?;
                    self.builder.set_super_type(cid, ty);
                }
                for interface in &class.implements {
                    let ty = self.resolve(&scope, interface)?;
                    self.builder.add_interface(cid, ty);
                }
                for field in &class.fields {
                    let decl = self.field(&scope, field, field.is_static)?;
                    self.builder.add_field(Owner::Class(cid), decl);
                }
                for function in &class.functions {
                    let decl = self.function(&scope, loaded.script, function)?;
                    match function.kind {
                        FunctionImageKind::Constructor | FunctionImageKind::Factory => {
                            self.builder.add_constructor(cid, decl);
                        }
                        _ => {
                            self.builder.add_function(Owner::Class(cid), decl);
                        }
                    }
                }
            }

            let scope = Scope {
                library: loaded.id,
                class: None,
            };
            for field in &lib.fields {
                let decl = self.field(&scope, field, true)?;
                self.builder.add_field(Owner::Library(loaded.id), decl);
            }
            for function in &lib.functions {
                let decl = self.function(&scope, loaded.script, function)?;
                self.builder.add_function(Owner::Library(loaded.id), decl);
            }
        }
        Ok(())
    }

    fn field(&self, scope: &Scope, image: &FieldImage, is_static: bool) -> ImageResult<FieldDecl> {
        let mut decl = if is_static {
            FieldDecl::static_(&image.name)
        } else {
            FieldDecl::instance(&image.name)
        };
        if let Some(ty) = &image.ty {
            decl = decl.typed(self.resolve(scope, ty)?);
        }
        if image.is_final {
            decl = decl.final_();
        }
        if image.is_const {
            decl = decl.const_();
        }
        if let Some(value) = &image.value {
            decl = decl.value(value.to_value());
        }
        if let Some(pos) = image.pos {
            decl = decl.at(TokenPos(pos));
        }
        Ok(decl)
    }

    fn function(
        &self,
        scope: &Scope,
        script: Option<ScriptId>,
        image: &FunctionImage,
    ) -> ImageResult<FunctionDecl> {
        let mut decl = match image.kind {
            FunctionImageKind::Method => FunctionDecl::method(&image.name),
            FunctionImageKind::Getter => FunctionDecl::getter(&image.name),
            FunctionImageKind::Setter => FunctionDecl::setter(&image.name),
            FunctionImageKind::Constructor => FunctionDecl::constructor(&image.name),
            FunctionImageKind::Factory => FunctionDecl::factory(&image.name),
        };
        if image.is_static {
            decl = decl.static_();
        }
        if image.is_abstract {
            decl = decl.abstract_();
        }
        if let Some(returns) = &image.returns {
            decl = decl.returns(self.resolve(scope, returns)?);
        }
        if let (Some(script), Some(start)) = (script, image.start) {
            decl = decl.at(script, TokenPos(start), TokenPos(image.end.unwrap_or(start)));
        }
        for param in &image.parameters {
            let ty = match &param.ty {
                Some(ty) => self.resolve(scope, ty)?,
                None => Type::Dynamic,
            };
            let kind = match param.kind {
                ParameterImageKind::Required => ParameterKind::Required,
                ParameterImageKind::Optional => ParameterKind::OptionalPositional,
                ParameterImageKind::Named => ParameterKind::Named,
            };
            decl = decl.param_with(
                ParameterDecl {
                    name: param.name.clone(),
                    ty,
                    kind,
                },
                ParameterDetails {
                    default_value: param.default.as_ref().map(ConstValue::to_value),
                    is_final: param.is_final,
                    ..ParameterDetails::default()
                },
            );
        }
        Ok(decl)
    }

    fn resolve(&self, scope: &Scope, text: &str) -> ImageResult<Type> {
        let mut parser = TypeParser {
            text,
            rest: text.trim(),
        };
        let parsed = parser.parse()?;
        if !parser.rest.is_empty() {
            return Err(ImageError::MalformedType(text.to_string()));
        }
        self.lower(scope, &parsed)
    }

    fn lower(&self, scope: &Scope, parsed: &ParsedType) -> ImageResult<Type> {
        let program = self.builder.program();
        match parsed.name.as_str() {
            "dynamic" if parsed.arguments.is_empty() => return Ok(Type::Dynamic),
            "void" if parsed.arguments.is_empty() => return Ok(Type::Void),
            _ => {}
        }
        if let Some(class) = scope.class {
            let param = program
                .class(class)
                .type_parameters
                .iter()
                .copied()
                .find(|&tp| program.type_param(tp).name == parsed.name);
            if let Some(tp) = param {
                return Ok(Type::Parameter(tp));
            }
        }
        let class = program
            .resolve_class_name(scope.library, &parsed.name)
            .or_else(|| program.library_class(program.core().library, &parsed.name))
            .ok_or_else(|| ImageError::UnknownType {
                library: program.library(scope.library).url.clone(),
                name: parsed.name.clone(),
            })?;
        if parsed.arguments.is_empty() {
            return Ok(Type::rare(class));
        }
        let arguments = parsed
            .arguments
            .iter()
            .map(|a| self.lower(scope, a))
            .collect::<ImageResult<Vec<_>>>()?;
        Ok(Type::generic(class, arguments))
    }
}

struct Scope {
    library: LibraryId,
    class: Option<ClassId>,
}

#[derive(Debug, PartialEq)]
struct ParsedType {
    name: String,
    arguments: Vec<ParsedType>,
}

/// `Name`, `prefix.Name` or `Name<Arg, ...>`
struct TypeParser<'a> {
    text: &'a str,
    rest: &'a str,
}

impl TypeParser<'_> {
    fn malformed(&self) -> ImageError {
        ImageError::MalformedType(self.text.to_string())
    }

    fn parse(&mut self) -> ImageResult<ParsedType> {
        let end = self
            .rest
            .find(|c: char| !(c.is_alphanumeric() || c == '_' || c == '$' || c == '.'))
            .unwrap_or(self.rest.len());
        if end == 0 {
            return Err(self.malformed());
        }
        let name = self.rest[..end].to_string();
        self.rest = self.rest[end..].trim_start();

        let mut arguments = Vec::new();
        if let Some(rest) = self.rest.strip_prefix('<') {
            self.rest = rest.trim_start();
            loop {
                arguments.push(self.parse()?);
                if let Some(rest) = self.rest.strip_prefix(',') {
                    self.rest = rest.trim_start();
                } else if let Some(rest) = self.rest.strip_prefix('>') {
                    self.rest = rest.trim_start();
                    break;
                } else {
                    return Err(self.malformed());
                }
            }
        }
        Ok(ParsedType { name, arguments })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::program::Accessor;

    const IMAGE: &str = r#"{
        "root": "file:///main.vs",
        "libraries": [
            {
                "name": "shapes",
                "url": "file:///shapes.vs",
                "classes": [
                    { "name": "Shape", "is_abstract": true },
                    { "name": "Box", "type_parameters": ["T"], "extends": "Shape",
                      "fields": [{ "name": "item", "type": "T" }] }
                ]
            },
            {
                "name": "main",
                "url": "file:///main.vs",
                "source": "main() {\n  return 1;\n}\n",
                "imports": [{ "url": "file:///shapes.vs" }, { "url": "file:///shapes.vs", "prefix": "s" }],
                "fields": [{ "name": "limit", "type": "int", "is_final": true, "value": 10 }],
                "functions": [
                    { "name": "main", "start": 0, "end": 22, "returns": "s.Box<List<int>>",
                      "parameters": [{ "name": "verbose", "kind": "named", "default": false }] }
                ]
            }
        ]
    }"#;

    #[test]
    fn test_load_resolves_types_across_imports() {
        let program = ProgramImage::from_json(IMAGE).unwrap().load().unwrap();
        let main_lib = program.library_by_url("file:///main.vs").unwrap();
        assert_eq!(program.root_library(), Some(main_lib));

        let shapes = program.library_by_url("file:///shapes.vs").unwrap();
        let shape = program.library_class(shapes, "Shape").unwrap();
        let boxed = program.library_class(shapes, "Box").unwrap();
        assert_eq!(program.class(boxed).super_type, Some(Type::rare(shape)));
        assert!(program.class(shape).is_abstract);

        let main = program.library_function(main_lib, "main", Accessor::Method).unwrap();
        let func = program.function(main);
        let list_of_int = Type::generic(program.core().list, vec![Type::rare(program.core().int)]);
        assert_eq!(func.result_type, Type::generic(boxed, vec![list_of_int]));
        assert_eq!(func.num_named_parameters(), 1);
        assert_eq!(program.function_script(main).map(|s| s.line_count()), Some(4));

        let item = program.class(boxed).fields[0];
        assert!(matches!(program.field(item).ty, Type::Parameter(_)));
    }

    #[test]
    fn test_unknown_type_is_reported() {
        let image = ProgramImage {
            root: None,
            libraries: vec![LibraryImage {
                name: "a".to_string(),
                url: "file:///a.vs".to_string(),
                fields: vec![FieldImage {
                    name: "x".to_string(),
                    ty: Some("Missing".to_string()),
                    ..FieldImage::default()
                }],
                ..LibraryImage::default()
            }],
        };
        match image.load() {
            Err(ImageError::UnknownType { name, .. }) => assert_eq!(name, "Missing"),
            other => panic!("expected UnknownType, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_type_parser() {
        let mut parser = TypeParser {
            text: "Map<String, List<int>>",
            rest: "Map<String, List<int>>",
        };
        let parsed = parser.parse().unwrap();
        assert_eq!(parsed.name, "Map");
        assert_eq!(parsed.arguments.len(), 2);
        assert_eq!(parsed.arguments[1].arguments[0].name, "int");

        let mut bad = TypeParser {
            text: "List<int",
            rest: "List<int",
        };
        assert!(matches!(bad.parse(), Err(ImageError::MalformedType(_))));
    }
}
