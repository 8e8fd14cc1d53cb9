//! Metadata emitted alongside machine code
//!
//! Pc descriptors map return addresses back to source positions and try regions,
//! inline cache data describes instance call sites, deopt info tells the runtime how
//! to rebuild an unoptimized frame, and the object pool holds every constant the code
//! loads through `PP`.

use std::fmt;

use parking_lot::RwLock;
use serde::Serialize;

use super::ir::{DeoptReason, Slot};
use crate::vm::invoke::ArgumentsDescriptor;
use crate::vm::program::{ClassId, FunctionId, TokenPos, Type};
use crate::vm::value::Value;

/// Length of a patchable call sequence (`mov r11, imm64; call r11`)
pub const PATCHABLE_CALL_LEN: u32 = 13;

/// Kind of a pc descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PcKind {
    /// Call to a statically known function
    StaticCall,
    /// Inline-cached instance call
    InstanceCall,
    /// Call through the call-to-runtime stub
    RuntimeCall,
    /// Function return
    Return,
    /// Single-step poll
    DebugStepCheck,
    /// Exit to unoptimized code
    Deopt,
    /// Any other stub call (type tests, argument mismatch)
    Other,
}

impl PcKind {
    /// Where the debugger may stop
    pub fn is_safe_point(self) -> bool {
        matches!(
            self,
            PcKind::StaticCall
                | PcKind::InstanceCall
                | PcKind::RuntimeCall
                | PcKind::Return
                | PcKind::DebugStepCheck
        )
    }
}

impl fmt::Display for PcKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PcKind::StaticCall => "static-call",
            PcKind::InstanceCall => "ic-call",
            PcKind::RuntimeCall => "runtime-call",
            PcKind::Return => "return",
            PcKind::DebugStepCheck => "step-check",
            PcKind::Deopt => "deopt",
            PcKind::Other => "other",
        };
        f.write_str(name)
    }
}

/// One entry of the pc -> source mapping
///
/// `pc_offset` is the return address of the descriptor's call sequence; the
/// [`PATCHABLE_CALL_LEN`] bytes before it are the region a breakpoint overwrites.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PcDescriptor {
    /// Kind
    pub kind: PcKind,
    /// Offset just past the call
    pub pc_offset: u32,
    /// Deoptimization id
    pub deopt_id: Option<u32>,
    /// Source position
    pub token_pos: Option<TokenPos>,
    /// Enclosing try block
    pub try_index: Option<u32>,
}

impl PcDescriptor {
    /// Offset of the patchable call sequence ending at `pc_offset`
    pub fn patch_offset(&self) -> u32 {
        self.pc_offset.saturating_sub(PATCHABLE_CALL_LEN)
    }

    /// Safe point with a known source position
    pub fn is_debugger_stop(&self) -> bool {
        self.kind.is_safe_point() && self.token_pos.is_some()
    }
}

/// Arguments descriptor as laid out in memory for the callee's prologue
///
/// Words: `[count, positional_count, (name, position)*, 0]`. Counts include the
/// implicit arguments; named entries are sorted by name so the prologue can match
/// them against its own sorted parameter names in one pass.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ArgumentsDescriptorLayout {
    /// Total argument count
    pub count: usize,
    /// Positional argument count
    pub positional_count: usize,
    /// `(name, argument position)` sorted by name
    pub named: Vec<(String, usize)>,
}

impl ArgumentsDescriptorLayout {
    /// Offset of the count word
    pub const COUNT_OFFSET: i32 = 0;
    /// Offset of the positional count word
    pub const POSITIONAL_COUNT_OFFSET: i32 = 8;
    /// Offset of the first named entry
    pub const FIRST_NAMED_OFFSET: i32 = 16;
    /// Size of a named entry
    pub const NAMED_ENTRY_SIZE: i32 = 16;
    /// Offset of the position word within a named entry
    pub const POSITION_OFFSET: i32 = 8;

    /// Lay out `desc` for a callee taking `implicit` extra leading arguments
    pub fn new(desc: &ArgumentsDescriptor, implicit: usize) -> Self {
        let positional_count = desc.positional_count + implicit;
        let mut named: Vec<(String, usize)> = desc
            .names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), positional_count + i))
            .collect();
        named.sort_by(|a, b| a.0.cmp(&b.0));
        Self {
            count: desc.count + implicit,
            positional_count,
            named,
        }
    }

    /// Size in words, terminator included
    pub fn word_count(&self) -> usize {
        2 + 2 * self.named.len() + 1
    }
}

impl fmt::Display for ArgumentsDescriptorLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "args({}, positional {}", self.count, self.positional_count)?;
        for (name, pos) in &self.named {
            write!(f, ", {}: {}", name, pos)?;
        }
        f.write_str(")")
    }
}

/// One observed receiver shape of an inline cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ICCheck {
    /// Classes of the checked arguments
    pub classes: Vec<ClassId>,
    /// Resolved target
    pub target: FunctionId,
    /// Hits
    pub count: u64,
}

/// Inline cache data of one instance call site
#[derive(Debug)]
pub struct ICData {
    /// Selector
    pub target_name: String,
    /// Number of leading arguments whose classes are checked
    pub num_args_tested: usize,
    /// Call shape, without the receiver
    pub arguments_descriptor: ArgumentsDescriptor,
    /// Deoptimization id of the call
    pub deopt_id: Option<u32>,
    checks: RwLock<Vec<ICCheck>>,
}

impl ICData {
    /// Empty cache for a call site
    pub fn new(
        target_name: impl Into<String>,
        num_args_tested: usize,
        arguments_descriptor: ArgumentsDescriptor,
        deopt_id: Option<u32>,
    ) -> Self {
        ICData {
            target_name: target_name.into(),
            num_args_tested,
            arguments_descriptor,
            deopt_id,
            checks: RwLock::new(Vec::new()),
        }
    }

    /// Record a resolved target for `classes`, or count a hit on an existing entry
    pub fn add_check(&self, classes: Vec<ClassId>, target: FunctionId) {
        let mut checks = self.checks.write();
        match checks.iter_mut().find(|c| c.classes == classes) {
            Some(existing) => {
                existing.target = target;
                existing.count += 1;
            }
            None => checks.push(ICCheck {
                classes,
                target,
                count: 1,
            }),
        }
    }

    /// Cached target for the given argument classes
    pub fn lookup(&self, classes: &[ClassId]) -> Option<FunctionId> {
        self.checks
            .read()
            .iter()
            .find(|c| c.classes == classes)
            .map(|c| c.target)
    }

    /// Number of distinct receiver shapes seen
    pub fn num_checks(&self) -> usize {
        self.checks.read().len()
    }

    /// Snapshot of the checks
    pub fn checks(&self) -> Vec<ICCheck> {
        self.checks.read().clone()
    }
}

/// How to rebuild the unoptimized frame at one deoptimization point
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeoptInfo {
    /// Deoptimization id to resume at
    pub deopt_id: u32,
    /// Offset just past the deoptimization call
    pub pc_offset: u32,
    /// Why
    pub reason: DeoptReason,
    /// Source position
    pub token_pos: Option<TokenPos>,
    /// Slots whose values are materialized, in frame order
    pub frame: Vec<Slot>,
}

/// A source-position comment attached to a code offset
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CodeComment {
    /// Offset the comment precedes
    pub pc_offset: u32,
    /// Text
    pub text: String,
}

/// An object pool entry
#[derive(Debug, Clone)]
pub enum PoolEntry {
    /// A constant object
    Object(Value),
    /// A canonical symbol (selectors, argument names)
    Symbol(String),
    /// An arguments descriptor
    ArgumentsDescriptor(ArgumentsDescriptorLayout),
    /// Index into the code's IC data
    ICData(usize),
    /// Index into the code's subtype test caches
    SubtypeTestCache(usize),
    /// A type
    Type(Type),
}

impl PoolEntry {
    fn same(&self, other: &PoolEntry) -> bool {
        match (self, other) {
            (PoolEntry::Object(a), PoolEntry::Object(b)) => a.identical(b),
            (PoolEntry::Symbol(a), PoolEntry::Symbol(b)) => a == b,
            (PoolEntry::ArgumentsDescriptor(a), PoolEntry::ArgumentsDescriptor(b)) => a == b,
            (PoolEntry::Type(a), PoolEntry::Type(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for PoolEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolEntry::Object(v) => write!(f, "{:?}", v),
            PoolEntry::Symbol(s) => write!(f, "#{}", s),
            PoolEntry::ArgumentsDescriptor(d) => write!(f, "{}", d),
            PoolEntry::ICData(i) => write!(f, "ic-data[{}]", i),
            PoolEntry::SubtypeTestCache(i) => write!(f, "subtype-cache[{}]", i),
            PoolEntry::Type(t) => write!(f, "type {:?}", t),
        }
    }
}

/// Constants addressed as `[PP + 8 * index]`
#[derive(Debug, Clone, Default)]
pub struct ObjectPool {
    entries: Vec<PoolEntry>,
}

impl ObjectPool {
    /// Empty pool
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of `entry`, adding it if no equal entry exists
    pub fn add(&mut self, entry: PoolEntry) -> usize {
        if let Some(index) = self.entries.iter().position(|e| e.same(&entry)) {
            return index;
        }
        self.entries.push(entry);
        self.entries.len() - 1
    }

    /// Displacement of entry `index` from `PP`
    pub fn offset(index: usize) -> i32 {
        (index * 8) as i32
    }

    /// Entry at `index`
    pub fn get(&self, index: usize) -> Option<&PoolEntry> {
        self.entries.get(index)
    }

    /// All entries
    pub fn entries(&self) -> &[PoolEntry] {
        &self.entries
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// No entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
