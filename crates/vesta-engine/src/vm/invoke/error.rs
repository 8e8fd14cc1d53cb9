//! Invocation errors

use std::fmt;

use crate::vm::program::{FunctionEntity, FunctionKind, Owner, ProgramError};
use crate::vm::value::Value;

/// Where a failed lookup was performed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvocationLevel {
    /// Instance member of a receiver
    Dynamic,
    /// Static member of a class
    Static,
    /// Top-level member of a library
    TopLevel,
    /// Constructor of a class
    Constructor,
}

impl InvocationLevel {
    /// Level at which a function is invoked
    pub fn of(func: &FunctionEntity) -> Self {
        if func.kind.is_constructor() {
            InvocationLevel::Constructor
        } else if !func.is_static || matches!(func.kind, FunctionKind::Closure | FunctionKind::ImplicitClosure) {
            InvocationLevel::Dynamic
        } else {
            match func.owner {
                Owner::Class(_) => InvocationLevel::Static,
                Owner::Library(_) => InvocationLevel::TopLevel,
            }
        }
    }
}

impl fmt::Display for InvocationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InvocationLevel::Dynamic => "instance",
            InvocationLevel::Static => "static",
            InvocationLevel::TopLevel => "top-level",
            InvocationLevel::Constructor => "constructor",
        };
        f.write_str(s)
    }
}

/// Which accessor the failed call used
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessKind {
    /// Property read
    Getter,
    /// Property write
    Setter,
    /// Method call
    Method,
}

impl AccessKind {
    /// Access kind of a function
    pub fn of(kind: FunctionKind) -> Self {
        match kind {
            FunctionKind::Getter | FunctionKind::ImplicitGetter => AccessKind::Getter,
            FunctionKind::Setter | FunctionKind::ImplicitSetter => AccessKind::Setter,
            _ => AccessKind::Method,
        }
    }
}

impl fmt::Display for AccessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AccessKind::Getter => "getter",
            AccessKind::Setter => "setter",
            AccessKind::Method => "method",
        };
        f.write_str(s)
    }
}

/// A failed member lookup or argument binding
#[derive(Debug, Clone, PartialEq)]
pub struct NoSuchMethodError {
    /// Receiver; `null` for library targets, a type for static and constructor calls
    pub receiver: Value,
    /// Member name as it was looked up
    pub name: String,
    /// Lookup level
    pub level: InvocationLevel,
    /// Accessor kind
    pub access: AccessKind,
    /// Positional arguments passed
    pub positional_count: usize,
    /// Named arguments passed
    pub named: Vec<String>,
    /// Parameter names of a member that was found but rejected the arguments
    pub existing_parameters: Option<Vec<String>>,
}

impl fmt::Display for NoSuchMethodError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "NoSuchMethodError: no {} {} '{}' with matching arguments (receiver: {}, {} positional",
            self.level, self.access, self.name, self.receiver, self.positional_count
        )?;
        if !self.named.is_empty() {
            write!(f, ", named: {}", self.named.join(", "))?;
        }
        write!(f, ")")?;
        if let Some(params) = &self.existing_parameters {
            write!(f, "; found '{}({})'", self.name, params.join(", "))?;
        }
        Ok(())
    }
}

/// Invocation errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InvokeError {
    /// Lookup or binding failed
    #[error("{0}")]
    NoSuchMethod(Box<NoSuchMethodError>),

    /// Compile-time error reported through reflection
    #[error("Compilation error: {0}")]
    MirroredCompilationError(String),

    /// Class is not finalized
    #[error("Class '{0}' is not finalized")]
    NotFinalized(String),

    /// Language exception raised by user code
    #[error("Uncaught exception: {0}")]
    Thrown(Value),

    /// Static initializer re-entered itself
    #[error("Cyclic initialization of '{0}'")]
    CyclicInitialization(String),

    /// Nested invocations exceeded the depth limit
    #[error("Stack overflow")]
    StackOverflow,
}

impl InvokeError {
    /// The no-such-method payload, if this is one
    pub fn as_no_such_method(&self) -> Option<&NoSuchMethodError> {
        match self {
            InvokeError::NoSuchMethod(nsm) => Some(nsm),
            _ => None,
        }
    }
}

impl From<NoSuchMethodError> for InvokeError {
    fn from(err: NoSuchMethodError) -> Self {
        InvokeError::NoSuchMethod(Box::new(err))
    }
}

impl From<ProgramError> for InvokeError {
    fn from(err: ProgramError) -> Self {
        match err {
            ProgramError::NotFinalized(name) => InvokeError::NotFinalized(name),
            ProgramError::DelayedCompilationError(msg) => InvokeError::MirroredCompilationError(msg),
            other => InvokeError::MirroredCompilationError(other.to_string()),
        }
    }
}

/// Invocation result type
pub type InvokeResult<T> = Result<T, InvokeError>;
