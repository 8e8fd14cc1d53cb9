//! Source-level debugging
//!
//! Breakpoints by function entry or script line, stepping, exception pauses and
//! inspection of paused frames.

mod breakpoint;
#[allow(clippy::module_inception)]
mod debugger;
mod error;
mod event;
mod object_cache;
mod stack;
mod stepping;

pub use breakpoint::{BreakpointId, CodeBreakpoint, SourceBreakpoint};
pub use debugger::{Debugger, IgnoreBreakpoints};
pub use error::{DebuggerError, DebuggerResult};
pub use event::{DebuggerEvent, EventHandler};
pub use object_cache::{ObjectCache, ObjectId};
pub use stack::{ActivationFrame, DebuggerStackTrace, FrameSummary, RawFrame};
pub use stepping::{ExceptionPauseInfo, ResumeAction};
