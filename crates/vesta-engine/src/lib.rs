//! Vesta VM runtime core
//!
//! This crate provides the parts of the Vesta virtual machine that turn compiled
//! functions into executing, debuggable and introspectable programs:
//! - **Object model**: classes, functions, fields, libraries and scripts (`vm::program`)
//! - **Reflection**: mirrors over live program entities (`vm::reflect`)
//! - **Invocation**: dynamic get/set/invoke/construct through mirrors (`vm::invoke`)
//! - **Debugger**: breakpoints, stepping and stack reconstruction (`vm::debugger`)
//! - **JIT**: flow graph to x86-64 code generation (`jit`)
//!
//! # Example
//!
//! ```rust,ignore
//! use vesta_engine::{Isolate, IsolateOptions, ProgramBuilder};
//!
//! let mut builder = ProgramBuilder::new();
//! let lib = builder.add_library("main", "file:///main.vs");
//! builder.set_root_library(lib);
//! let program = builder.build()?;
//!
//! let isolate = Isolate::new(program, IsolateOptions::default());
//! let mirrors = isolate.mirrors();
//! let system = mirrors.mirror_system();
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![cfg_attr(test, allow(clippy::identity_op))]
#![allow(clippy::derivable_impls)]
#![allow(clippy::new_without_default)]
#![allow(clippy::too_many_arguments)]

// ============================================================================
// Core Modules
// ============================================================================

/// VM module: object model, reflection, invocation, debugger and isolates
pub mod vm;

/// JIT module: flow graph IR, x86-64 backend and the code space
pub mod jit;

/// Program images: serde descriptions of a program loaded into the object model
pub mod image;

/// Engine configuration
pub mod config;

// ============================================================================
// Re-exports
// ============================================================================

pub use config::{CompilerOptions, DebuggerOptions, IsolateOptions};
pub use jit::{CodeId, CodeSpace, CodegenBackend, CodegenError, CompiledCode, FlowGraph, X64Backend};
pub use vm::debugger::{Debugger, DebuggerError, DebuggerEvent, ResumeAction};
pub use vm::invoke::{Arguments, InvokeError, InvokeResult, Invoker, Lookup};
pub use vm::isolate::{Isolate, IsolateError};
pub use vm::program::{
    ClassId, FieldId, FunctionId, LibraryId, Program, ProgramBuilder, ProgramError, Type,
};
pub use vm::reflect::{Mirror, MirrorFactory, MirrorReference};
pub use vm::value::Value;
