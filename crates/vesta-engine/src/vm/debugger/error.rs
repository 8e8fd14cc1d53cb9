//! Debugger errors

use crate::jit::code_space::CodeSpaceError;
use crate::vm::invoke::InvokeError;

use super::breakpoint::BreakpointId;

/// Errors reported by debugger requests; the debugger stays usable after any of them
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DebuggerError {
    /// No code position at or after the requested one
    #[error("Cannot resolve breakpoint location: {0}")]
    UnresolvedLocation(String),

    /// No breakpoint with this id
    #[error("Unknown breakpoint {0}")]
    UnknownBreakpoint(BreakpointId),

    /// No script with this URL
    #[error("Unknown script '{0}'")]
    UnknownScript(String),

    /// No function by this id or name
    #[error("Unknown function '{0}'")]
    UnknownFunction(String),

    /// The function is synthetic, implicit or otherwise hidden from the debugger
    #[error("Function '{0}' is not debuggable")]
    NotDebuggable(String),

    /// Patching installed code failed
    #[error("Code patch failed: {0}")]
    Patch(#[from] CodeSpaceError),

    /// Reading a value ran user code that failed
    #[error("Evaluation failed: {0}")]
    Evaluation(#[from] InvokeError),
}

/// Result type for debugger requests
pub type DebuggerResult<T> = Result<T, DebuggerError>;
