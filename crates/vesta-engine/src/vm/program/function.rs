//! Function entities

use std::fmt;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::RwLock;

use super::ids::{ClassId, FieldId, FunctionId, LibraryId, ScriptId, TokenPos};
use super::types::Type;
use crate::jit::CodeId;
use crate::vm::invoke::{InvokeResult, Invoker};
use crate::vm::value::Value;

/// Kind of a function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionKind {
    /// Ordinary method or top-level function
    Regular,
    /// Explicit getter
    Getter,
    /// Explicit setter
    Setter,
    /// Generative constructor
    Constructor,
    /// Factory constructor
    Factory,
    /// Signature function of a function type or typedef
    Signature,
    /// Compiler-generated field getter
    ImplicitGetter,
    /// Compiler-generated field setter
    ImplicitSetter,
    /// Compiler-generated closure wrapping a method tear-off
    ImplicitClosure,
    /// Local function or function literal
    Closure,
}

impl FunctionKind {
    /// Generative constructor or factory
    pub fn is_constructor(self) -> bool {
        matches!(self, FunctionKind::Constructor | FunctionKind::Factory)
    }

    /// Implicit accessors are never shown as members
    pub fn is_implicit(self) -> bool {
        matches!(
            self,
            FunctionKind::ImplicitGetter
                | FunctionKind::ImplicitSetter
                | FunctionKind::ImplicitClosure
        )
    }
}

/// Owner of a function or field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Owner {
    /// Class member
    Class(ClassId),
    /// Top-level member
    Library(LibraryId),
}

/// How a parameter is passed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParameterKind {
    /// Required positional
    Required,
    /// Optional positional
    OptionalPositional,
    /// Optional named
    Named,
}

/// Declared parameter (always known)
#[derive(Debug, Clone)]
pub struct ParameterDecl {
    /// Parameter name
    pub name: String,
    /// Declared type
    pub ty: Type,
    /// Passing convention
    pub kind: ParameterKind,
}

/// Parameter details that may only be known after a reparse (constructors)
#[derive(Debug, Clone, Default)]
pub struct ParameterDetails {
    /// Default value of an optional parameter
    pub default_value: Option<Value>,
    /// `final` modifier
    pub is_final: bool,
    /// Metadata annotations
    pub metadata: Vec<Value>,
}

/// Target of a redirecting factory, resolved lazily by name
#[derive(Debug, Clone)]
pub struct RedirectionDecl {
    /// Target class name, looked up in the owner's library scope
    pub class_name: String,
    /// Target constructor name (empty for the unnamed constructor)
    pub constructor_name: String,
}

/// Native body signature
pub type NativeFn = dyn Fn(&Invoker<'_>, &[Value]) -> InvokeResult<Value> + Send + Sync;

/// Executable body of a function
///
/// The body receives the fully laid-out argument vector: implicit arguments first,
/// then every declared parameter in declaration order with defaults filled in.
#[derive(Clone)]
pub struct NativeBody(pub Arc<NativeFn>);

impl NativeBody {
    /// Wrap a closure
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Invoker<'_>, &[Value]) -> InvokeResult<Value> + Send + Sync + 'static,
    {
        NativeBody(Arc::new(f))
    }

    /// Run the body
    pub fn call(&self, invoker: &Invoker<'_>, args: &[Value]) -> InvokeResult<Value> {
        (self.0)(invoker, args)
    }
}

impl fmt::Debug for NativeBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeBody")
    }
}

/// Compiled code attached to a function
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FunctionCode {
    /// Unoptimized (debuggable) code
    pub unoptimized: Option<CodeId>,
    /// Optimized code, if any
    pub optimized: Option<CodeId>,
}

impl FunctionCode {
    /// Code the function currently runs
    pub fn current(&self) -> Option<CodeId> {
        self.optimized.or(self.unoptimized)
    }
}

/// Source of a function's parameter details
#[derive(Debug, Clone)]
pub(crate) enum DetailsSource {
    /// Known at load time
    Eager,
    /// Known only after the constructor reparse; an error is a delayed compile error
    Deferred(Result<Vec<ParameterDetails>, String>),
}

/// A function
#[derive(Debug)]
pub struct FunctionEntity {
    /// Function id
    pub id: FunctionId,
    /// Internal name (constructors are named `Class.` + constructor name)
    pub name: String,
    /// Owning class or library
    pub owner: Owner,
    /// Function kind
    pub kind: FunctionKind,
    /// Static (or top-level) function
    pub is_static: bool,
    /// `const` constructor
    pub is_const: bool,
    /// Abstract method
    pub is_abstract: bool,
    /// Visible to reflection
    pub is_visible: bool,
    /// Compiler-synthesized (never debuggable)
    pub is_synthetic: bool,
    /// Redirecting generative constructor
    pub is_redirecting: bool,
    /// Declared parameters
    pub parameters: Vec<ParameterDecl>,
    /// Declared result type
    pub result_type: Type,
    /// Script containing the function
    pub script: Option<ScriptId>,
    /// First token of the function
    pub token_pos: Option<TokenPos>,
    /// Last token of the function
    pub end_token_pos: Option<TokenPos>,
    /// Enclosing function of a closure, or the torn-off method of an implicit closure
    pub parent: Option<FunctionId>,
    /// Implicit closure created for tear-offs of this method
    pub implicit_closure: Option<FunctionId>,
    /// Signature class of a signature function
    pub signature_class: Option<ClassId>,
    /// Field accessed by an implicit getter or setter
    pub field: Option<FieldId>,
    /// Redirecting factory target
    pub redirect: Option<RedirectionDecl>,
    /// Metadata annotations
    pub metadata: Vec<Value>,
    pub(crate) body: Option<NativeBody>,
    pub(crate) details_source: DetailsSource,
    pub(crate) details: OnceCell<Vec<ParameterDetails>>,
    pub(crate) redirection: OnceCell<(ClassId, FunctionId)>,
    pub(crate) code: RwLock<FunctionCode>,
}

impl FunctionEntity {
    /// Number of implicit leading arguments (receiver, constructor phase, type
    /// arguments, closure object)
    pub fn num_implicit_parameters(&self) -> usize {
        match self.kind {
            FunctionKind::Constructor => 2,
            FunctionKind::Factory => 1,
            FunctionKind::Closure | FunctionKind::ImplicitClosure => 1,
            FunctionKind::Signature => 0,
            _ if self.is_static => 0,
            _ => match self.owner {
                Owner::Class(_) => 1,
                Owner::Library(_) => 0,
            },
        }
    }

    /// Required positional parameters
    pub fn num_fixed_parameters(&self) -> usize {
        self.count(ParameterKind::Required)
    }

    /// Optional positional parameters
    pub fn num_optional_positional_parameters(&self) -> usize {
        self.count(ParameterKind::OptionalPositional)
    }

    /// Named parameters
    pub fn num_named_parameters(&self) -> usize {
        self.count(ParameterKind::Named)
    }

    fn count(&self, kind: ParameterKind) -> usize {
        self.parameters.iter().filter(|p| p.kind == kind).count()
    }

    /// Parameter names in declaration order
    pub fn parameter_names(&self) -> Vec<String> {
        self.parameters.iter().map(|p| p.name.clone()).collect()
    }

    /// Executable body
    pub fn body(&self) -> Option<&NativeBody> {
        self.body.as_ref()
    }

    /// Snapshot of attached code
    pub fn code(&self) -> FunctionCode {
        *self.code.read()
    }

    /// True when any code is attached
    pub fn has_code(&self) -> bool {
        self.code.read().current().is_some()
    }

    pub(crate) fn set_code(&self, code: CodeId, optimized: bool) {
        let mut slot = self.code.write();
        if optimized {
            slot.optimized = Some(code);
        } else {
            slot.unoptimized = Some(code);
        }
    }

    pub(crate) fn detach_code(&self, code: CodeId) {
        let mut slot = self.code.write();
        if slot.optimized == Some(code) {
            slot.optimized = None;
        }
        if slot.unoptimized == Some(code) {
            slot.unoptimized = None;
        }
    }

    /// Parameter details if already known
    pub fn parameter_details(&self) -> Option<&[ParameterDetails]> {
        self.details.get().map(Vec::as_slice)
    }

    /// Whether a reparse is still pending
    pub fn needs_reparse(&self) -> bool {
        self.details.get().is_none()
    }

    /// Token position contained in this function's source range
    pub fn contains_token(&self, pos: TokenPos) -> bool {
        match (self.token_pos, self.end_token_pos) {
            (Some(start), Some(end)) => start <= pos && pos <= end,
            _ => false,
        }
    }

    /// Constructor name without the class prefix
    pub fn constructor_name(&self) -> &str {
        match self.name.split_once('.') {
            Some((_, ctor)) if self.kind.is_constructor() => ctor,
            _ => &self.name,
        }
    }
}
