//! Backend-agnostic code generation traits
//!
//! Defines the `CodegenBackend` trait the x86-64 backend implements, along with
//! compiled code, relocations and the stubs generated code calls into.

use std::fmt::{self, Write as _};
use std::sync::Arc;

use crate::jit::descriptors::{CodeComment, DeoptInfo, ICData, ObjectPool, PcDescriptor};
use crate::jit::ir::{BlockId, FlowGraph, LocalVariable, RuntimeEntry, Slot};
use crate::jit::subtype_cache::SubtypeTestCache;
use crate::vm::program::{FunctionId, Program};

/// Target architecture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetArch {
    /// x86-64
    X86_64,
}

/// Target information
#[derive(Debug, Clone)]
pub struct TargetInfo {
    /// Architecture
    pub arch: TargetArch,
    /// Pointer size in bytes
    pub pointer_size: usize,
}

/// Error during code generation; nothing is installed when one occurs
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodegenError {
    /// An instruction names a slot outside the frame
    #[error("Invalid slot {slot} (frame has {num_slots} slots)")]
    InvalidSlot {
        /// Offending slot
        slot: Slot,
        /// Frame size
        num_slots: u32,
    },

    /// A jump targets a block that does not exist
    #[error("Unknown block {0}")]
    UnknownBlock(BlockId),

    /// A static call names a function the program does not have
    #[error("Unknown function {0}")]
    UnknownFunction(FunctionId),

    /// Instruction combination the backend cannot lower
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Too many pc descriptors for one function
    #[error("Descriptor overflow: {count} pc descriptors exceeds the limit of {limit}")]
    DescriptorOverflow {
        /// Descriptors emitted
        count: usize,
        /// Configured limit
        limit: usize,
    },

    /// Internal assembler failure
    #[error("Backend error: {0}")]
    Backend(String),
}

/// Result type for code generation
pub type CodegenResult<T> = Result<T, CodegenError>;

/// Shared stubs generated code calls into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StubKind {
    /// Transition into a runtime entry (`IC_DATA_REG` = entry, `ARGS_DESC_REG` = argc)
    CallToRuntime,
    /// Inline cache lookup checking the receiver class
    OneArgCheckInlineCache,
    /// Inline cache lookup checking the classes of the first two arguments
    TwoArgsCheckInlineCache,
    /// Type test through a subtype test cache
    SubtypeTestCache,
    /// Arguments do not match the callee's parameters
    CallClosureNoSuchMethod,
    /// Single-step poll
    DebugStepCheck,
    /// Breakpoint handler; patched over call sites
    Breakpoint,
    /// Exit from optimized code
    Deoptimize,
    /// Compile the callee on first call
    LazyCompile,
}

impl StubKind {
    /// Every stub, in address order
    pub const ALL: [StubKind; 9] = [
        StubKind::CallToRuntime,
        StubKind::OneArgCheckInlineCache,
        StubKind::TwoArgsCheckInlineCache,
        StubKind::SubtypeTestCache,
        StubKind::CallClosureNoSuchMethod,
        StubKind::DebugStepCheck,
        StubKind::Breakpoint,
        StubKind::Deoptimize,
        StubKind::LazyCompile,
    ];

    /// Index into the stub table
    pub fn index(self) -> usize {
        Self::ALL.iter().position(|s| *s == self).unwrap_or(0)
    }
}

impl fmt::Display for StubKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}Stub", self)
    }
}

/// What a relocated immediate points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelocationTarget {
    /// A shared stub
    Stub(StubKind),
    /// A runtime entry
    Runtime(RuntimeEntry),
    /// Entry point of a function's current code
    Function(FunctionId),
}

impl fmt::Display for RelocationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelocationTarget::Stub(s) => write!(f, "{}", s),
            RelocationTarget::Runtime(e) => write!(f, "runtime {:?}", e),
            RelocationTarget::Function(id) => write!(f, "{}", id),
        }
    }
}

/// A 64-bit immediate to fill in once the code is placed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Relocation {
    /// Offset of the immediate in the code
    pub code_offset: usize,
    /// Target
    pub target: RelocationTarget,
}

/// Machine code plus everything the runtime and debugger need to run it
#[derive(Debug, Clone)]
pub struct CompiledCode {
    /// Function the code belongs to
    pub function: FunctionId,
    /// Optimizing compilation
    pub is_optimized: bool,
    /// Machine code, relocations unresolved
    pub instructions: Vec<u8>,
    /// Offset of the entry point
    pub entry_offset: usize,
    /// Frame slots
    pub frame_size: u32,
    /// Pc descriptors in code order
    pub pc_descriptors: Vec<PcDescriptor>,
    /// Inline caches, indexed by `PoolEntry::ICData`
    pub ic_data: Vec<Arc<ICData>>,
    /// Subtype test caches, indexed by `PoolEntry::SubtypeTestCache`
    pub subtype_caches: Vec<Arc<SubtypeTestCache>>,
    /// Deoptimization points
    pub deopt_info: Vec<DeoptInfo>,
    /// Constants addressed through `PP`
    pub object_pool: ObjectPool,
    /// Immediates to resolve at install time
    pub relocations: Vec<Relocation>,
    /// Source comments
    pub comments: Vec<CodeComment>,
    /// Named slots, parameters first
    pub var_descriptors: Vec<LocalVariable>,
}

impl CompiledCode {
    /// Size of the machine code
    pub fn size(&self) -> usize {
        self.instructions.len()
    }

    /// Descriptor whose return address is `pc_offset`
    pub fn descriptor_at(&self, pc_offset: u32) -> Option<&PcDescriptor> {
        self.pc_descriptors.iter().find(|d| d.pc_offset == pc_offset)
    }

    /// Deopt info whose exit call returns to `pc_offset`
    pub fn deopt_info_at(&self, pc_offset: u32) -> Option<&DeoptInfo> {
        self.deopt_info.iter().find(|d| d.pc_offset == pc_offset)
    }

    /// Human-readable listing: comments, hex bytes split at descriptor boundaries,
    /// then the descriptor, pool and deopt tables
    pub fn listing(&self, program: Option<&Program>) -> String {
        let mut out = String::new();
        let name = match program {
            Some(p) => p.qualified_function_name(self.function),
            None => self.function.to_string(),
        };
        let _ = writeln!(
            out,
            "Code for {}{} ({} bytes, {} slots)",
            name,
            if self.is_optimized { " [optimized]" } else { "" },
            self.size(),
            self.frame_size
        );

        let mut cuts: Vec<usize> = self
            .comments
            .iter()
            .map(|c| c.pc_offset as usize)
            .chain(self.pc_descriptors.iter().map(|d| d.pc_offset as usize))
            .chain([0, self.size()])
            .filter(|o| *o <= self.size())
            .collect();
        cuts.sort_unstable();
        cuts.dedup();

        for pair in cuts.windows(2) {
            let (start, end) = (pair[0], pair[1]);
            for comment in self.comments.iter().filter(|c| c.pc_offset as usize == start) {
                let _ = writeln!(out, "        ;; {}", comment.text);
            }
            for chunk_start in (start..end).step_by(16) {
                let chunk_end = (chunk_start + 16).min(end);
                let hex: Vec<String> = self.instructions[chunk_start..chunk_end]
                    .iter()
                    .map(|b| format!("{:02x}", b))
                    .collect();
                let _ = writeln!(out, "  {:#06x}  {}", chunk_start, hex.join(" "));
            }
        }

        let _ = writeln!(out, "PC descriptors:");
        for d in &self.pc_descriptors {
            let _ = writeln!(
                out,
                "  {:#06x}  {:<13} deopt={} pos={} try={}",
                d.pc_offset,
                d.kind.to_string(),
                opt(d.deopt_id),
                opt(d.token_pos),
                opt(d.try_index)
            );
        }
        if !self.object_pool.is_empty() {
            let _ = writeln!(out, "Object pool:");
            for (i, entry) in self.object_pool.entries().iter().enumerate() {
                let _ = writeln!(out, "  [{}] {}", i, entry);
            }
        }
        if !self.deopt_info.is_empty() {
            let _ = writeln!(out, "Deopt info:");
            for d in &self.deopt_info {
                let slots: Vec<String> = d.frame.iter().map(Slot::to_string).collect();
                let _ = writeln!(
                    out,
                    "  {:#06x}  id={} {:?} frame=[{}]",
                    d.pc_offset,
                    d.deopt_id,
                    d.reason,
                    slots.join(", ")
                );
            }
        }
        out
    }
}

fn opt<T: fmt::Display>(value: Option<T>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

/// The backend-agnostic code generation trait
///
/// Backends lower a validated flow graph for one function into [`CompiledCode`];
/// installing that code is the code space's job.
pub trait CodegenBackend: Send + Sync {
    /// Backend name (for diagnostics)
    fn name(&self) -> &str;

    /// Compile a flow graph to machine code
    fn compile(&self, program: &Program, graph: &FlowGraph) -> CodegenResult<CompiledCode>;

    /// Return target architecture information
    fn target_info(&self) -> TargetInfo;
}
