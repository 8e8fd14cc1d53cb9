//! Code generation for the Vesta VM
//!
//! Frontends hand the code generator a [`FlowGraph`] per function. The x86-64
//! backend lowers it to machine code plus the metadata the runtime and debugger
//! rely on: pc descriptors, inline caches, subtype test caches, deoptimization
//! points and the object pool. Installed code lives in a [`CodeSpace`], where the
//! debugger patches call sites in place.

pub mod backend;
pub mod code_space;
pub mod descriptors;
pub mod ir;
pub mod subtype_cache;

pub use backend::{
    CodegenBackend, CodegenError, CodegenResult, CompiledCode, Relocation, RelocationTarget,
    StubKind, TargetArch, TargetInfo, X64Backend,
};
pub use code_space::{CodeEntry, CodeId, CodeSpace, CodeSpaceError, CodeSpaceResult};
pub use descriptors::{
    ArgumentsDescriptorLayout, DeoptInfo, ICData, ObjectPool, PcDescriptor, PcKind, PoolEntry,
    PATCHABLE_CALL_LEN,
};
pub use ir::{FlowGraph, FlowGraphBuilder};
pub use subtype_cache::SubtypeTestCache;
