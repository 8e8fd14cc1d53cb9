//! Virtual machine runtime core
//!
//! - `program`: the object model (classes, functions, fields, libraries, scripts)
//! - `value`: runtime values, instances, closures and contexts
//! - `reflect`: mirrors over program entities
//! - `invoke`: dynamic invocation through mirrors and lexical lookup
//! - `debugger`: breakpoints, stepping and stack reconstruction
//! - `isolate`: one program, one code space, one debugger

pub mod debugger;
pub mod invoke;
pub mod isolate;
pub mod program;
pub mod reflect;
pub mod value;

pub use isolate::{Isolate, IsolateError};
pub use value::{Closure, Context, Instance, Value};
