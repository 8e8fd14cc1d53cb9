//! Backend-agnostic code generation traits and the x86-64 implementation

pub mod traits;
pub mod x64;

pub use traits::{
    CodegenBackend, CodegenError, CodegenResult, CompiledCode, Relocation, RelocationTarget,
    StubKind, TargetArch, TargetInfo,
};
pub use x64::X64Backend;
