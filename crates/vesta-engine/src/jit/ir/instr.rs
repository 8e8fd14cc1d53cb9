//! Flow graph instructions
//!
//! A flow graph is the code generator's input: an ordered list of blocks, each a
//! straight-line instruction sequence ending in a terminator. Values live in frame
//! slots; slot `i` is the word at `[rbp - 8 * (i + 1)]`. Parameter slots come first
//! (implicit parameters, then the declared ones in declaration order).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::vm::program::{FunctionId, TokenPos, Type};
use crate::vm::value::Value;

/// Frame slot index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Slot(pub u32);

impl Slot {
    /// Displacement of the slot from the frame pointer
    pub fn frame_offset(self) -> i32 {
        -8 * (self.0 as i32 + 1)
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// Block identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockId(pub u32);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "B{}", self.0)
    }
}

/// A compile-time constant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Constant {
    /// `null`
    Null,
    /// Boolean
    Bool(bool),
    /// Integer
    Int(i64),
    /// Double
    Double(f64),
    /// String literal
    Str(String),
}

impl Constant {
    /// Runtime value of the constant
    pub fn to_value(&self) -> Value {
        match self {
            Constant::Null => Value::Null,
            Constant::Bool(b) => Value::Bool(*b),
            Constant::Int(i) => Value::Int(*i),
            Constant::Double(d) => Value::Double(*d),
            Constant::Str(s) => Value::string(s),
        }
    }
}

/// Runtime entries reachable through the call-to-runtime stub
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuntimeEntry {
    /// Allocate an instance of a class
    AllocateObject,
    /// Allocate a closure over the current context
    AllocateClosure,
    /// Allocate a context
    AllocateContext,
    /// Instantiate a type with the current instantiator
    InstantiateType,
    /// Throw the argument
    Throw,
    /// Rethrow the argument with its original stack trace
    ReThrow,
    /// Report a failed `as` check or assignment check
    TypeCheck,
    /// Report a stack overflow or service an interrupt
    StackOverflow,
    /// Resolve and compile a static call target
    PatchStaticCall,
}

impl RuntimeEntry {
    /// Every entry, in address order
    pub const ALL: [RuntimeEntry; 9] = [
        RuntimeEntry::AllocateObject,
        RuntimeEntry::AllocateClosure,
        RuntimeEntry::AllocateContext,
        RuntimeEntry::InstantiateType,
        RuntimeEntry::Throw,
        RuntimeEntry::ReThrow,
        RuntimeEntry::TypeCheck,
        RuntimeEntry::StackOverflow,
        RuntimeEntry::PatchStaticCall,
    ];

    /// Index into the runtime entry table
    pub fn index(self) -> usize {
        Self::ALL.iter().position(|e| *e == self).unwrap_or(0)
    }
}

/// Why optimized code gives up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeoptReason {
    /// A class check failed
    CheckClass,
    /// A smi check failed
    CheckSmi,
    /// Integer overflow
    Overflow,
    /// An inline cache saw a new receiver class
    PolymorphicCall,
    /// The debugger requested unoptimized code
    Debugger,
    /// Anything else
    Unknown,
}

/// Instruction kinds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum InstrKind {
    /// `dst = constant`
    Constant {
        /// Destination
        dst: Slot,
        /// Value
        value: Constant,
    },
    /// `dst = src`
    Move {
        /// Destination
        dst: Slot,
        /// Source
        src: Slot,
    },
    /// Call a statically known function
    StaticCall {
        /// Result slot
        dst: Slot,
        /// Callee
        function: FunctionId,
        /// Arguments, implicit ones first
        args: Vec<Slot>,
        /// Names of the trailing named arguments
        #[serde(default)]
        argument_names: Vec<String>,
    },
    /// Dynamically dispatched call on `args[0]`
    InstanceCall {
        /// Result slot
        dst: Slot,
        /// Selector
        name: String,
        /// Arguments, receiver first
        args: Vec<Slot>,
        /// Names of the trailing named arguments
        #[serde(default)]
        argument_names: Vec<String>,
        /// Number of arguments whose classes the inline cache checks
        #[serde(default = "one")]
        checked_args: usize,
    },
    /// `dst = value is ty` (or `is!` when negated)
    InstanceOf {
        /// Result slot
        dst: Slot,
        /// Tested value
        value: Slot,
        /// Tested type
        ty: Type,
        /// `is!`
        #[serde(default)]
        negate: bool,
        /// Slot holding the instantiator type arguments, for generic types
        #[serde(default)]
        instantiator: Option<Slot>,
    },
    /// Check that `value` is assignable to `ty`; throws otherwise
    AssertAssignable {
        /// Checked value
        value: Slot,
        /// Destination type
        ty: Type,
        /// Name of the variable being assigned, for the error
        name: String,
        /// Slot holding the instantiator type arguments, for generic types
        #[serde(default)]
        instantiator: Option<Slot>,
    },
    /// Inlined field read
    LoadField {
        /// Destination
        dst: Slot,
        /// Object
        object: Slot,
        /// Byte offset of the field in the object
        offset: u32,
    },
    /// Inlined field write
    StoreField {
        /// Object
        object: Slot,
        /// Byte offset of the field in the object
        offset: u32,
        /// Stored value
        value: Slot,
    },
    /// Call into the runtime
    CallRuntime {
        /// Result slot, if the result is used
        #[serde(default)]
        dst: Option<Slot>,
        /// Entry
        entry: RuntimeEntry,
        /// Arguments
        #[serde(default)]
        args: Vec<Slot>,
    },
    /// Poll for single stepping
    DebugStepCheck,
}

fn one() -> usize {
    1
}

impl InstrKind {
    /// Short name used in listings and comments
    pub fn mnemonic(&self) -> &'static str {
        match self {
            InstrKind::Constant { .. } => "Constant",
            InstrKind::Move { .. } => "Move",
            InstrKind::StaticCall { .. } => "StaticCall",
            InstrKind::InstanceCall { .. } => "InstanceCall",
            InstrKind::InstanceOf { .. } => "InstanceOf",
            InstrKind::AssertAssignable { .. } => "AssertAssignable",
            InstrKind::LoadField { .. } => "LoadField",
            InstrKind::StoreField { .. } => "StoreField",
            InstrKind::CallRuntime { .. } => "CallRuntime",
            InstrKind::DebugStepCheck => "DebugStepCheck",
        }
    }

    /// Every slot the instruction reads or writes
    pub fn slots(&self) -> Vec<Slot> {
        match self {
            InstrKind::Constant { dst, .. } => vec![*dst],
            InstrKind::Move { dst, src } => vec![*dst, *src],
            InstrKind::StaticCall { dst, args, .. } | InstrKind::InstanceCall { dst, args, .. } => {
                std::iter::once(*dst).chain(args.iter().copied()).collect()
            }
            InstrKind::InstanceOf {
                dst,
                value,
                instantiator,
                ..
            } => [Some(*dst), Some(*value), *instantiator].into_iter().flatten().collect(),
            InstrKind::AssertAssignable {
                value, instantiator, ..
            } => [Some(*value), *instantiator].into_iter().flatten().collect(),
            InstrKind::LoadField { dst, object, .. } => vec![*dst, *object],
            InstrKind::StoreField { object, value, .. } => vec![*object, *value],
            InstrKind::CallRuntime { dst, args, .. } => {
                dst.iter().copied().chain(args.iter().copied()).collect()
            }
            InstrKind::DebugStepCheck => Vec::new(),
        }
    }
}

/// An instruction with its source position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    /// Source position
    #[serde(default)]
    pub token_pos: Option<TokenPos>,
    /// Deoptimization id, for instructions optimized code can deoptimize at
    #[serde(default)]
    pub deopt_id: Option<u32>,
    /// The instruction
    #[serde(flatten)]
    pub kind: InstrKind,
}

/// Block terminators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum Terminator {
    /// Unconditional jump
    Goto {
        /// Target
        target: BlockId,
    },
    /// Jump on `condition == true`
    Branch {
        /// Boolean slot
        condition: Slot,
        /// Target when true
        if_true: BlockId,
        /// Target otherwise
        if_false: BlockId,
    },
    /// Return from the function
    Return {
        /// Returned value
        value: Slot,
        /// Source position of the return
        #[serde(default)]
        token_pos: Option<TokenPos>,
    },
    /// Throw an exception
    Throw {
        /// Exception
        exception: Slot,
        /// Source position of the throw
        #[serde(default)]
        token_pos: Option<TokenPos>,
    },
    /// Leave optimized code and continue in unoptimized code
    Deoptimize {
        /// Why
        reason: DeoptReason,
        /// Deoptimization id to resume at
        deopt_id: u32,
        /// Source position
        #[serde(default)]
        token_pos: Option<TokenPos>,
    },
}

impl Terminator {
    /// Successor blocks
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Terminator::Goto { target } => vec![*target],
            Terminator::Branch {
                if_true, if_false, ..
            } => vec![*if_true, *if_false],
            _ => Vec::new(),
        }
    }

    /// Slots the terminator reads
    pub fn slots(&self) -> Vec<Slot> {
        match self {
            Terminator::Branch { condition, .. } => vec![*condition],
            Terminator::Return { value, .. } => vec![*value],
            Terminator::Throw { exception, .. } => vec![*exception],
            Terminator::Goto { .. } | Terminator::Deoptimize { .. } => Vec::new(),
        }
    }
}

/// A basic block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    /// Block id
    pub id: BlockId,
    /// Enclosing try block, if any
    #[serde(default)]
    pub try_index: Option<u32>,
    /// Instructions
    #[serde(default)]
    pub instructions: Vec<Instruction>,
    /// Terminator
    pub terminator: Terminator,
}

/// A named local variable and the slot holding it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalVariable {
    /// Source name
    pub name: String,
    /// Frame slot
    pub slot: Slot,
    /// First token position where the variable is in scope
    #[serde(default)]
    pub begin_pos: Option<TokenPos>,
    /// Last token position where the variable is in scope
    #[serde(default)]
    pub end_pos: Option<TokenPos>,
}

/// A function's flow graph in block order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowGraph {
    /// Function being compiled
    pub function: FunctionId,
    /// Number of frame slots, parameters included
    pub num_slots: u32,
    /// Whether this is an optimizing compilation
    #[serde(default)]
    pub optimized: bool,
    /// Blocks; the first one is the entry
    pub blocks: Vec<Block>,
    /// Named locals other than parameters
    #[serde(default)]
    pub locals: Vec<LocalVariable>,
}

impl FlowGraph {
    /// Entry block
    pub fn entry(&self) -> Option<&Block> {
        self.blocks.first()
    }

    /// Block by id
    pub fn block(&self, id: BlockId) -> Option<&Block> {
        self.blocks.iter().find(|b| b.id == id)
    }

    /// Every instruction with its block, in block order
    pub fn instructions(&self) -> impl Iterator<Item = (&Block, &Instruction)> {
        self.blocks
            .iter()
            .flat_map(|b| b.instructions.iter().map(move |i| (b, i)))
    }
}
