//! x86-64 code generation
//!
//! `registers` and `encoder` know the instruction set, `assembler` adds a code
//! buffer with labels, and `codegen` lowers flow graphs on top of it.

pub mod assembler;
pub mod codegen;
pub mod encoder;
pub mod registers;

pub use codegen::X64Backend;
