//! Stack reconstruction
//!
//! The runtime hands the debugger its physical frames innermost-first as
//! [`RawFrame`]s. Each return address is mapped to a code object and pc descriptor;
//! frames of functions the debugger may not show are dropped from the trace but
//! still counted in the physical depth.

use std::sync::Arc;

use serde::Serialize;

use crate::jit::code_space::{CodeId, CodeSpace};
use crate::jit::ir::LocalVariable;
use crate::vm::program::{FunctionId, Program, TokenPos};
use crate::vm::value::{Context, Value};

/// A physical frame as seen by the runtime
#[derive(Debug, Clone, Default)]
pub struct RawFrame {
    /// Return address into the frame's code (for the top frame, the address after
    /// the breakpoint or stub call that stopped it)
    pub pc: u64,
    /// Frame pointer
    pub fp: u64,
    /// Stack pointer
    pub sp: u64,
    /// Frame slots, as stored on the stack
    pub slots: Vec<Value>,
    /// Materialized slot values of a deoptimized frame
    pub deopt: Option<Vec<Value>>,
    /// Current closure context
    pub context: Option<Arc<Context>>,
}

impl RawFrame {
    /// A frame stopped at `pc` with no slots
    pub fn at(pc: u64) -> Self {
        RawFrame {
            pc,
            ..Default::default()
        }
    }

    /// Replace the slots
    pub fn with_slots(mut self, slots: Vec<Value>) -> Self {
        self.slots = slots;
        self
    }

    /// Attach materialized values; reads prefer them over the stack slots
    pub fn with_deopt(mut self, values: Vec<Value>) -> Self {
        self.deopt = Some(values);
        self
    }

    /// Attach a closure context
    pub fn with_context(mut self, context: Arc<Context>) -> Self {
        self.context = Some(context);
        self
    }

    /// Set the frame pointer
    pub fn with_fp(mut self, fp: u64) -> Self {
        self.fp = fp;
        self
    }
}

/// A debuggable frame
#[derive(Debug, Clone)]
pub struct ActivationFrame {
    pc: u64,
    fp: u64,
    sp: u64,
    function: FunctionId,
    code: CodeId,
    pc_offset: u32,
    token_pos: Option<TokenPos>,
    try_index: Option<u32>,
    depth: usize,
    function_name: String,
    source_url: Option<String>,
    line: Option<usize>,
    column: Option<usize>,
    variables: Vec<LocalVariable>,
    slots: Vec<Value>,
    deopt: Option<Vec<Value>>,
    context: Option<Arc<Context>>,
}

impl ActivationFrame {
    /// Return address
    pub fn pc(&self) -> u64 {
        self.pc
    }

    /// Frame pointer
    pub fn fp(&self) -> u64 {
        self.fp
    }

    /// Stack pointer
    pub fn sp(&self) -> u64 {
        self.sp
    }

    /// Function
    pub fn function(&self) -> FunctionId {
        self.function
    }

    /// Code object the frame runs
    pub fn code(&self) -> CodeId {
        self.code
    }

    /// Offset of the pc within the code
    pub fn pc_offset(&self) -> u32 {
        self.pc_offset
    }

    /// Index of the physical frame, counting hidden frames
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Try block covering the pc
    pub fn try_index(&self) -> Option<u32> {
        self.try_index
    }

    /// Qualified function name
    pub fn function_name(&self) -> &str {
        &self.function_name
    }

    /// URL of the function's script
    pub fn source_url(&self) -> Option<&str> {
        self.source_url.as_deref()
    }

    /// Token position of the pc
    pub fn token_pos(&self) -> Option<TokenPos> {
        self.token_pos
    }

    /// 1-based line of the pc
    pub fn line_number(&self) -> Option<usize> {
        self.line
    }

    /// 1-based column of the pc
    pub fn column_number(&self) -> Option<usize> {
        self.column
    }

    /// Nesting level of the frame's closure context (0 for the outermost)
    pub fn context_level(&self) -> usize {
        self.context.as_ref().map_or(0, |c| c.depth())
    }

    /// The frame's closure context
    pub fn context(&self) -> Option<&Arc<Context>> {
        self.context.as_ref()
    }

    /// Was deoptimized
    pub fn is_deoptimized(&self) -> bool {
        self.deopt.is_some()
    }

    fn visible(&self) -> impl Iterator<Item = &LocalVariable> + '_ {
        let pos = self.token_pos;
        self.variables.iter().filter(move |v| match pos {
            Some(pos) => v.begin_pos.map_or(true, |b| b <= pos) && v.end_pos.map_or(true, |e| pos <= e),
            None => true,
        })
    }

    fn read_slot(&self, index: usize) -> Value {
        let source = self.deopt.as_ref().unwrap_or(&self.slots);
        source.get(index).cloned().unwrap_or(Value::Null)
    }

    /// Number of local variables in scope at the pc
    pub fn num_local_variables(&self) -> usize {
        self.visible().count()
    }

    /// Name and value of the `index`-th variable in scope
    pub fn variable_at(&self, index: usize) -> Option<(String, Value)> {
        let var = self.visible().nth(index)?;
        Some((var.name.clone(), self.read_slot(var.slot.0 as usize)))
    }

    /// All variables in scope at the pc
    pub fn local_variables(&self) -> Vec<(String, Value)> {
        self.visible()
            .map(|v| (v.name.clone(), self.read_slot(v.slot.0 as usize)))
            .collect()
    }

    /// Summary for listings and events
    pub fn summary(&self) -> FrameSummary {
        FrameSummary {
            function: self.function_name.clone(),
            url: self.source_url.clone(),
            line: self.line,
            column: self.column,
            depth: self.depth,
        }
    }
}

/// Serializable description of a frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FrameSummary {
    /// Qualified function name
    pub function: String,
    /// Script URL
    pub url: Option<String>,
    /// Line
    pub line: Option<usize>,
    /// Column
    pub column: Option<usize>,
    /// Physical depth
    pub depth: usize,
}

/// Debuggable frames, innermost first
#[derive(Debug, Clone, Default)]
pub struct DebuggerStackTrace {
    frames: Vec<ActivationFrame>,
    physical_len: usize,
}

impl DebuggerStackTrace {
    /// Rebuild a trace from raw frames
    pub fn build(program: &Program, code_space: &CodeSpace, stack: &[RawFrame]) -> Self {
        let frames = stack
            .iter()
            .enumerate()
            .filter_map(|(depth, raw)| {
                let (entry, pc_offset) = code_space.lookup_pc(raw.pc)?;
                let function = entry.function();
                if !program.is_debuggable(function) {
                    return None;
                }
                let descriptor = entry.descriptor_at(pc_offset);
                let token_pos = descriptor.and_then(|d| d.token_pos);
                let script = program.function_script(function);
                Some(ActivationFrame {
                    pc: raw.pc,
                    fp: raw.fp,
                    sp: raw.sp,
                    function,
                    code: entry.id(),
                    pc_offset,
                    token_pos,
                    try_index: descriptor.and_then(|d| d.try_index),
                    depth,
                    function_name: program.qualified_function_name(function),
                    source_url: script.map(|s| s.url.clone()),
                    line: script.zip(token_pos).map(|(s, p)| s.line_number(p)),
                    column: script.zip(token_pos).map(|(s, p)| s.column_number(p)),
                    variables: entry.compiled().var_descriptors.clone(),
                    slots: raw.slots.clone(),
                    deopt: raw.deopt.clone(),
                    context: raw.context.clone(),
                })
            })
            .collect();
        DebuggerStackTrace {
            frames,
            physical_len: stack.len(),
        }
    }

    /// Number of debuggable frames
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// No debuggable frames
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Frame `index`, innermost first
    pub fn frame(&self, index: usize) -> Option<&ActivationFrame> {
        self.frames.get(index)
    }

    /// All frames, innermost first
    pub fn frames(&self) -> &[ActivationFrame] {
        &self.frames
    }

    /// Innermost frame
    pub fn top(&self) -> Option<&ActivationFrame> {
        self.frames.first()
    }

    /// Number of physical frames the trace was built from
    pub fn physical_len(&self) -> usize {
        self.physical_len
    }

    /// Physical frames at and below `frame`
    pub(crate) fn height_of(&self, frame: &ActivationFrame) -> usize {
        self.physical_len - frame.depth
    }

    /// Innermost frame inside a try block, i.e. the frame that will catch an
    /// exception thrown now
    ///
    /// Try blocks carry no catch clause types, so `_exception` is not matched
    /// against anything: a frame in any try block is taken to catch every
    /// exception.
    pub fn handler_frame(&self, _exception: &Value) -> Option<&ActivationFrame> {
        self.frames.iter().find(|f| f.try_index.is_some())
    }

    /// Summaries of every frame
    pub fn summaries(&self) -> Vec<FrameSummary> {
        self.frames.iter().map(ActivationFrame::summary).collect()
    }
}
