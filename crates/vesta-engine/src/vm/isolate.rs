//! Isolates
//!
//! An isolate owns one loaded program together with the code compiled for it and a
//! debugger watching that code. Mirrors and invokers are created on demand and
//! borrow from the isolate.

use std::sync::Arc;

use thiserror::Error;

use crate::config::IsolateOptions;
use crate::jit::backend::traits::{CodegenBackend, CodegenError};
use crate::jit::backend::x64::X64Backend;
use crate::jit::code_space::{CodeId, CodeSpace, CodeSpaceError};
use crate::jit::ir::FlowGraph;
use crate::vm::debugger::{Debugger, DebuggerError};
use crate::vm::invoke::Invoker;
use crate::vm::program::Program;
use crate::vm::reflect::MirrorFactory;

/// Errors from isolate-level operations
#[derive(Debug, Error)]
pub enum IsolateError {
    /// Code generation failed
    #[error("codegen: {0}")]
    Codegen(#[from] CodegenError),

    /// Installing or invalidating code failed
    #[error("code space: {0}")]
    CodeSpace(#[from] CodeSpaceError),

    /// The debugger could not update its breakpoints
    #[error("debugger: {0}")]
    Debugger(#[from] DebuggerError),
}

/// One program, its code and its debugger
pub struct Isolate {
    name: String,
    program: Arc<Program>,
    code_space: Arc<CodeSpace>,
    backend: X64Backend,
    debugger: Debugger,
    options: IsolateOptions,
}

impl std::fmt::Debug for Isolate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Isolate")
            .field("name", &self.name)
            .field("code_objects", &self.code_space.len())
            .finish()
    }
}

impl Isolate {
    /// Create an isolate for a built program
    pub fn new(program: impl Into<Arc<Program>>, options: IsolateOptions) -> Self {
        let program = program.into();
        let code_space = Arc::new(CodeSpace::new(program.clone()));
        let debugger = Debugger::new(program.clone(), code_space.clone(), options.debugger.clone());
        let isolate = Isolate {
            name: options.name.clone(),
            program,
            code_space,
            backend: X64Backend::new(options.compiler.clone()),
            debugger,
            options,
        };
        log::info!("isolate '{}' created", isolate.name);
        isolate.debugger.notify_isolate_created(&isolate.name);
        isolate
    }

    /// Debug name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Options the isolate was created with
    pub fn options(&self) -> &IsolateOptions {
        &self.options
    }

    /// The program
    pub fn program(&self) -> &Arc<Program> {
        &self.program
    }

    /// Code compiled for the program
    pub fn code_space(&self) -> &Arc<CodeSpace> {
        &self.code_space
    }

    /// The debugger
    pub fn debugger(&self) -> &Debugger {
        &self.debugger
    }

    /// Dynamic invocation without mirrors
    pub fn invoker(&self) -> Invoker<'_> {
        Invoker::new(&self.program)
    }

    /// Mirror factory for this isolate; invocations through it ignore breakpoints
    pub fn mirrors(&self) -> MirrorFactory<'_> {
        MirrorFactory::new(&self.program, self.name.clone()).with_debugger(&self.debugger)
    }

    /// Compile a flow graph, install the code as its function's current code and
    /// let the debugger instrument it
    pub fn compile(&self, graph: &FlowGraph) -> Result<CodeId, IsolateError> {
        let compiled = self.backend.compile(&self.program, graph)?;
        let optimized = compiled.is_optimized;
        let function = graph.function;
        let id = self.code_space.install(compiled)?;
        self.program.function(function).set_code(id, optimized);
        log::debug!(
            "installed {} for {} ({})",
            id,
            self.program.qualified_function_name(function),
            if optimized { "optimized" } else { "unoptimized" }
        );
        self.debugger.notify_compilation(function)?;
        Ok(id)
    }

    /// Make code unreachable, lifting any breakpoints in it first
    pub fn invalidate(&self, code: CodeId) -> Result<(), IsolateError> {
        self.debugger.notify_code_invalidated(code);
        self.code_space.invalidate(code)?;
        Ok(())
    }

    /// Tell the debugger the isolate is going away
    pub fn shutdown(&self) {
        self.debugger.notify_isolate_shutdown(&self.name);
        log::info!("isolate '{}' shut down", self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jit::ir::{Constant, FlowGraphBuilder};
    use crate::vm::program::{FunctionDecl, Owner, ProgramBuilder, TokenPos};

    #[test]
    fn test_compile_installs_current_code() {
        let mut b = ProgramBuilder::new();
        let lib = b.add_library("app", "file:///app.vs");
        let script = b.add_script("file:///app.vs", "main() {\n  return;\n}\n");
        b.set_library_script(lib, script);
        let main = b.add_function(
            Owner::Library(lib),
            FunctionDecl::method("main").at(script, TokenPos(0), TokenPos(19)),
        );
        let isolate = Isolate::new(b.build().unwrap(), IsolateOptions::default());

        let mut g = FlowGraphBuilder::new(main, 0);
        let x = g.constant(Constant::Null);
        g.at(11).ret(x);
        let id = isolate.compile(&g.build()).unwrap();
        assert_eq!(isolate.program().function(main).code().current(), Some(id));
        assert_eq!(isolate.code_space().code_for(main).map(|e| e.id()), Some(id));

        isolate.invalidate(id).unwrap();
        assert!(!isolate.program().function(main).has_code());
    }
}
