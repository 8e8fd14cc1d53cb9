//! Debugger events

use super::breakpoint::BreakpointId;
use super::stack::DebuggerStackTrace;
use super::Debugger;
use crate::vm::program::{FunctionId, TokenPos};
use crate::vm::value::Value;

/// Something the debugger front-end is told about
#[derive(Debug, Clone)]
pub enum DebuggerEvent {
    /// Execution paused at a breakpoint or after a step; `breakpoint` is `None` for
    /// stepping pauses
    BreakpointReached {
        /// User breakpoint that was hit
        breakpoint: Option<BreakpointId>,
        /// Stack at the pause
        stack: DebuggerStackTrace,
    },
    /// A pending breakpoint was resolved against compiled code
    BreakpointResolved {
        /// Breakpoint
        breakpoint: BreakpointId,
        /// Function
        function: FunctionId,
        /// Resolved position
        token_pos: TokenPos,
        /// Script URL
        url: String,
        /// Resolved line
        line: usize,
    },
    /// Execution paused on a thrown exception
    ExceptionThrown {
        /// The exception
        exception: Value,
        /// Stack at the throw
        stack: DebuggerStackTrace,
    },
    /// The isolate started
    IsolateCreated {
        /// Isolate name
        isolate: String,
    },
    /// The isolate is shutting down
    IsolateShutdown {
        /// Isolate name
        isolate: String,
    },
    /// Execution paused on an interrupt request
    IsolateInterrupted {
        /// Stack at the pause
        stack: DebuggerStackTrace,
    },
}

impl DebuggerEvent {
    /// Whether the event is delivered while execution is paused
    pub fn is_pause(&self) -> bool {
        matches!(
            self,
            DebuggerEvent::BreakpointReached { .. }
                | DebuggerEvent::ExceptionThrown { .. }
                | DebuggerEvent::IsolateInterrupted { .. }
        )
    }

    /// Stack of a pause event
    pub fn stack(&self) -> Option<&DebuggerStackTrace> {
        match self {
            DebuggerEvent::BreakpointReached { stack, .. }
            | DebuggerEvent::ExceptionThrown { stack, .. }
            | DebuggerEvent::IsolateInterrupted { stack } => Some(stack),
            _ => None,
        }
    }

    /// Short event name for logs
    pub fn name(&self) -> &'static str {
        match self {
            DebuggerEvent::BreakpointReached { .. } => "BreakpointReached",
            DebuggerEvent::BreakpointResolved { .. } => "BreakpointResolved",
            DebuggerEvent::ExceptionThrown { .. } => "ExceptionThrown",
            DebuggerEvent::IsolateCreated { .. } => "IsolateCreated",
            DebuggerEvent::IsolateShutdown { .. } => "IsolateShutdown",
            DebuggerEvent::IsolateInterrupted { .. } => "IsolateInterrupted",
        }
    }
}

/// Callback receiving debugger events; it may issue debugger requests, such as
/// choosing how to resume, through the `&Debugger` it is given
pub type EventHandler = dyn Fn(&Debugger, &DebuggerEvent) + Send + Sync;
