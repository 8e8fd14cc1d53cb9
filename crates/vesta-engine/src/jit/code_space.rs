//! Installed code
//!
//! Compiled code is placed at a virtual base address, its relocations are resolved
//! against the stub and runtime tables, and the function is pointed at it. The
//! debugger patches installed instructions in place and maps return addresses back
//! to code objects.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::jit::backend::traits::{CompiledCode, RelocationTarget, StubKind};
use crate::jit::backend::x64::encoder;
use crate::jit::backend::x64::registers::TMP;
use crate::jit::descriptors::{PcDescriptor, PATCHABLE_CALL_LEN};
use crate::jit::ir::RuntimeEntry;
use crate::vm::program::{FunctionId, Program};

/// Base address of the stub table
pub const STUB_BASE: u64 = 0x0010_0000;
/// Distance between stub entry points
pub const STUB_SIZE: u64 = 0x100;
/// Base address of the runtime entry table
pub const RUNTIME_BASE: u64 = 0x0020_0000;
/// Distance between runtime entries
pub const RUNTIME_ENTRY_SIZE: u64 = 0x10;
/// Address of the first installed code object
pub const CODE_BASE: u64 = 0x1000_0000;
/// Code objects start on this boundary
pub const CODE_ALIGNMENT: u64 = 16;

/// Handle of an installed code object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CodeId(pub u32);

impl fmt::Display for CodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "code#{}", self.0)
    }
}

/// Errors from installing or patching code
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodeSpaceError {
    /// No code object with this id
    #[error("Unknown code object {0}")]
    UnknownCode(CodeId),

    /// The patched range leaves the instructions
    #[error("Patch of {len} bytes at offset {offset} is outside {code} ({size} bytes)")]
    OutOfBounds {
        /// Code object
        code: CodeId,
        /// Start of the range
        offset: usize,
        /// Length of the range
        len: usize,
        /// Size of the instructions
        size: usize,
    },

    /// The bytes in place are not the ones the caller expected
    #[error("Unexpected bytes at offset {offset} of {code}")]
    Mismatch {
        /// Code object
        code: CodeId,
        /// Start of the range
        offset: usize,
    },

    /// The code object was invalidated
    #[error("{0} has been invalidated")]
    Invalidated(CodeId),

    /// A relocation does not fit in the instructions
    #[error("Relocation at offset {offset} is outside the code ({size} bytes)")]
    BadRelocation {
        /// Offset of the immediate
        offset: usize,
        /// Size of the instructions
        size: usize,
    },
}

/// Result type for code space operations
pub type CodeSpaceResult<T> = Result<T, CodeSpaceError>;

/// An installed code object
#[derive(Debug)]
pub struct CodeEntry {
    id: CodeId,
    base: u64,
    compiled: CompiledCode,
    bytes: RwLock<Vec<u8>>,
    valid: AtomicBool,
}

impl CodeEntry {
    /// Handle
    pub fn id(&self) -> CodeId {
        self.id
    }

    /// Address of the first instruction byte
    pub fn base(&self) -> u64 {
        self.base
    }

    /// Entry point address
    pub fn entry_point(&self) -> u64 {
        self.base + self.compiled.entry_offset as u64
    }

    /// Function the code belongs to
    pub fn function(&self) -> FunctionId {
        self.compiled.function
    }

    /// Metadata produced by the code generator
    pub fn compiled(&self) -> &CompiledCode {
        &self.compiled
    }

    /// Size of the instructions
    pub fn size(&self) -> usize {
        self.compiled.size()
    }

    /// Still reachable from its function
    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    /// Whether `pc` falls inside the instructions (the end address counts, since a
    /// call in the last bytes returns there)
    pub fn contains_pc(&self, pc: u64) -> bool {
        pc >= self.base && pc <= self.base + self.size() as u64
    }

    /// Descriptor whose return address is `pc_offset`
    pub fn descriptor_at(&self, pc_offset: u32) -> Option<&PcDescriptor> {
        self.compiled.descriptor_at(pc_offset)
    }

    /// Snapshot of the current instruction bytes, patches included
    pub fn instructions(&self) -> Vec<u8> {
        self.bytes.read().clone()
    }

    /// `len` bytes starting at `offset`
    pub fn read(&self, offset: usize, len: usize) -> CodeSpaceResult<Vec<u8>> {
        let bytes = self.bytes.read();
        self.check_range(offset, len, bytes.len())?;
        Ok(bytes[offset..offset + len].to_vec())
    }

    fn check_range(&self, offset: usize, len: usize, size: usize) -> CodeSpaceResult<()> {
        match offset.checked_add(len) {
            Some(end) if end <= size => Ok(()),
            _ => Err(CodeSpaceError::OutOfBounds {
                code: self.id,
                offset,
                len,
                size,
            }),
        }
    }
}

/// All code installed in one isolate
#[derive(Debug)]
pub struct CodeSpace {
    program: Arc<Program>,
    entries: RwLock<Vec<Arc<CodeEntry>>>,
    next_base: AtomicU64,
    total_size: AtomicUsize,
}

impl CodeSpace {
    /// Create an empty code space for `program`
    pub fn new(program: Arc<Program>) -> Self {
        CodeSpace {
            program,
            entries: RwLock::new(Vec::new()),
            next_base: AtomicU64::new(CODE_BASE),
            total_size: AtomicUsize::new(0),
        }
    }

    /// Entry point of a stub
    pub fn stub_address(stub: StubKind) -> u64 {
        STUB_BASE + stub.index() as u64 * STUB_SIZE
    }

    /// Stub whose entry point is `address`
    pub fn stub_at(address: u64) -> Option<StubKind> {
        StubKind::ALL
            .iter()
            .copied()
            .find(|s| Self::stub_address(*s) == address)
    }

    /// Address of a runtime entry
    pub fn runtime_address(entry: RuntimeEntry) -> u64 {
        RUNTIME_BASE + entry.index() as u64 * RUNTIME_ENTRY_SIZE
    }

    /// The `mov TMP, imm64; call TMP` sequence calling `target`
    pub fn call_sequence(target: u64) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(PATCHABLE_CALL_LEN as usize);
        bytes.extend_from_slice(encoder::encode_mov_ri64(TMP, target as i64).as_slice());
        bytes.extend_from_slice(encoder::encode_call_r(TMP).as_slice());
        bytes
    }

    /// Resolve the address a relocation points at
    pub fn resolve(&self, target: RelocationTarget) -> u64 {
        match target {
            RelocationTarget::Stub(stub) => Self::stub_address(stub),
            RelocationTarget::Runtime(entry) => Self::runtime_address(entry),
            RelocationTarget::Function(function) => self
                .code_for(function)
                .map_or_else(|| Self::stub_address(StubKind::LazyCompile), |e| e.entry_point()),
        }
    }

    /// Place `compiled`, resolve its relocations and return its handle
    ///
    /// The function is not pointed at the code; the caller does that once the
    /// code is fully registered.
    pub fn install(&self, compiled: CompiledCode) -> CodeSpaceResult<CodeId> {
        let mut bytes = compiled.instructions.clone();
        for reloc in &compiled.relocations {
            let end = reloc.code_offset + 8;
            if end > bytes.len() {
                return Err(CodeSpaceError::BadRelocation {
                    offset: reloc.code_offset,
                    size: bytes.len(),
                });
            }
            let address = self.resolve(reloc.target);
            bytes[reloc.code_offset..end].copy_from_slice(&address.to_le_bytes());
        }

        let size = bytes.len() as u64;
        // Leave a gap so the end address of one object is never the base of the next
        let span = (size + 1).div_ceil(CODE_ALIGNMENT) * CODE_ALIGNMENT;
        let base = self.next_base.fetch_add(span, Ordering::Relaxed);

        let mut entries = self.entries.write();
        let id = CodeId(entries.len() as u32);
        log::debug!(
            "installed {} for {} at {:#x} ({} bytes{})",
            id,
            self.program.qualified_function_name(compiled.function),
            base,
            size,
            if compiled.is_optimized { ", optimized" } else { "" }
        );
        self.total_size.fetch_add(bytes.len(), Ordering::Relaxed);
        entries.push(Arc::new(CodeEntry {
            id,
            base,
            compiled,
            bytes: RwLock::new(bytes),
            valid: AtomicBool::new(true),
        }));
        Ok(id)
    }

    /// Code object by handle
    pub fn entry(&self, id: CodeId) -> Option<Arc<CodeEntry>> {
        self.entries.read().get(id.0 as usize).cloned()
    }

    fn require(&self, id: CodeId) -> CodeSpaceResult<Arc<CodeEntry>> {
        self.entry(id).ok_or(CodeSpaceError::UnknownCode(id))
    }

    /// Snapshot of every code object, invalidated ones included
    pub fn entries(&self) -> Vec<Arc<CodeEntry>> {
        self.entries.read().clone()
    }

    /// Number of installed code objects
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Nothing installed
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Total instruction bytes installed
    pub fn total_size(&self) -> usize {
        self.total_size.load(Ordering::Relaxed)
    }

    /// Code the function currently runs, optimized code first
    pub fn code_for(&self, function: FunctionId) -> Option<Arc<CodeEntry>> {
        let current = self.program.function(function).code().current()?;
        self.entry(current).filter(|e| e.is_valid())
    }

    /// Code object containing `pc` and the offset of `pc` within it
    pub fn lookup_pc(&self, pc: u64) -> Option<(Arc<CodeEntry>, u32)> {
        let entries = self.entries.read();
        // Bases increase with ids
        let index = entries.partition_point(|e| e.base <= pc);
        let entry = entries.get(index.checked_sub(1)?)?;
        if entry.contains_pc(pc) {
            Some((entry.clone(), (pc - entry.base) as u32))
        } else {
            None
        }
    }

    /// Overwrite `bytes.len()` bytes at `offset` and return the bytes replaced
    pub fn patch(&self, id: CodeId, offset: usize, bytes: &[u8]) -> CodeSpaceResult<Vec<u8>> {
        let entry = self.require(id)?;
        if !entry.is_valid() {
            return Err(CodeSpaceError::Invalidated(id));
        }
        let mut code = entry.bytes.write();
        entry.check_range(offset, bytes.len(), code.len())?;
        let saved = code[offset..offset + bytes.len()].to_vec();
        code[offset..offset + bytes.len()].copy_from_slice(bytes);
        log::trace!("patched {} bytes at {}+{:#x}", bytes.len(), id, offset);
        Ok(saved)
    }

    /// Put `saved` back at `offset`
    ///
    /// With `expected` given, the bytes in place must equal it; a mismatch means
    /// someone else rewrote the range and nothing is changed. Invalidated code can
    /// still be restored.
    pub fn restore(
        &self,
        id: CodeId,
        offset: usize,
        saved: &[u8],
        expected: Option<&[u8]>,
    ) -> CodeSpaceResult<()> {
        let entry = self.require(id)?;
        let mut code = entry.bytes.write();
        entry.check_range(offset, saved.len(), code.len())?;
        let current = &code[offset..offset + saved.len()];
        if expected.is_some_and(|e| e != current) {
            return Err(CodeSpaceError::Mismatch { code: id, offset });
        }
        code[offset..offset + saved.len()].copy_from_slice(saved);
        log::trace!("restored {} bytes at {}+{:#x}", saved.len(), id, offset);
        Ok(())
    }

    /// Make code unreachable and detach it from its function
    pub fn invalidate(&self, id: CodeId) -> CodeSpaceResult<FunctionId> {
        let entry = self.require(id)?;
        if entry.valid.swap(false, Ordering::AcqRel) {
            log::debug!("invalidated {}", id);
        }
        self.program.function(entry.function()).detach_code(id);
        Ok(entry.function())
    }

    /// Invalidate every valid optimized code object
    pub fn invalidate_optimized(&self) -> Vec<CodeId> {
        let optimized: Vec<CodeId> = self
            .entries
            .read()
            .iter()
            .filter(|e| e.compiled.is_optimized && e.is_valid())
            .map(|e| e.id)
            .collect();
        for id in &optimized {
            // ids come from the table itself
            let _ = self.invalidate(*id);
        }
        optimized
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompilerOptions;
    use crate::jit::backend::traits::CodegenBackend;
    use crate::jit::backend::x64::X64Backend;
    use crate::jit::descriptors::PcKind;
    use crate::jit::ir::{Constant, FlowGraphBuilder};
    use crate::vm::program::{FunctionDecl, Owner, ProgramBuilder};

    fn setup() -> (Arc<Program>, FunctionId, FunctionId) {
        let mut b = ProgramBuilder::new();
        let lib = b.add_library("app", "file:///app.vs");
        let caller = b.add_function(Owner::Library(lib), FunctionDecl::method("caller"));
        let callee = b.add_function(Owner::Library(lib), FunctionDecl::method("callee"));
        (Arc::new(b.build().unwrap()), caller, callee)
    }

    fn compile_call(program: &Program, caller: FunctionId, callee: FunctionId) -> CompiledCode {
        let mut b = FlowGraphBuilder::new(caller, 0);
        let r = b.at(3).static_call(callee, vec![]);
        b.at(4).ret(r);
        X64Backend::new(CompilerOptions::default())
            .compile(program, &b.build())
            .unwrap()
    }

    fn compile_leaf(program: &Program, function: FunctionId, optimized: bool) -> CompiledCode {
        let mut b = FlowGraphBuilder::new(function, 0);
        if optimized {
            b = b.optimized();
        }
        let r = b.constant(Constant::Int(1));
        b.ret(r);
        X64Backend::default().compile(program, &b.build()).unwrap()
    }

    #[test]
    fn test_relocations_resolve_to_lazy_compile_then_code() {
        let (program, caller, callee) = setup();
        let space = CodeSpace::new(program.clone());
        let lazy = CodeSpace::stub_address(StubKind::LazyCompile).to_le_bytes();

        let first = space.install(compile_call(&program, caller, callee)).unwrap();
        let entry = space.entry(first).unwrap();
        let reloc = entry.compiled().relocations[0];
        assert_eq!(entry.read(reloc.code_offset, 8).unwrap(), lazy);

        let leaf = space.install(compile_leaf(&program, callee, false)).unwrap();
        program.function(callee).set_code(leaf, false);
        let second = space.install(compile_call(&program, caller, callee)).unwrap();
        let entry = space.entry(second).unwrap();
        let target = space.entry(leaf).unwrap().entry_point();
        assert_eq!(entry.read(reloc.code_offset, 8).unwrap(), target.to_le_bytes());
    }

    #[test]
    fn test_lookup_pc_maps_return_addresses() {
        let (program, caller, callee) = setup();
        let space = CodeSpace::new(program.clone());
        let a = space.install(compile_call(&program, caller, callee)).unwrap();
        let b = space.install(compile_leaf(&program, callee, false)).unwrap();
        let entry = space.entry(a).unwrap();
        let call = entry
            .compiled()
            .pc_descriptors
            .iter()
            .find(|d| d.kind == PcKind::StaticCall)
            .unwrap();
        let (found, offset) = space.lookup_pc(entry.base() + call.pc_offset as u64).unwrap();
        assert_eq!(found.id(), a);
        assert_eq!(offset, call.pc_offset);
        let leaf = space.entry(b).unwrap();
        assert_eq!(space.lookup_pc(leaf.base()).unwrap().0.id(), b);
        assert!(space.lookup_pc(CODE_BASE - 1).is_none());
    }

    #[test]
    fn test_patch_and_verified_restore() {
        let (program, caller, callee) = setup();
        let space = CodeSpace::new(program.clone());
        let id = space.install(compile_call(&program, caller, callee)).unwrap();
        let entry = space.entry(id).unwrap();
        let offset = entry.compiled().pc_descriptors[0].patch_offset() as usize;
        let original = entry.read(offset, PATCHABLE_CALL_LEN as usize).unwrap();

        let bp = CodeSpace::call_sequence(CodeSpace::stub_address(StubKind::Breakpoint));
        assert_eq!(bp.len(), PATCHABLE_CALL_LEN as usize);
        let saved = space.patch(id, offset, &bp).unwrap();
        assert_eq!(saved, original);
        assert_eq!(entry.read(offset, bp.len()).unwrap(), bp);

        let wrong = vec![0x90; bp.len()];
        assert_eq!(
            space.restore(id, offset, &saved, Some(&wrong)),
            Err(CodeSpaceError::Mismatch { code: id, offset })
        );
        space.restore(id, offset, &saved, Some(&bp)).unwrap();
        assert_eq!(entry.read(offset, bp.len()).unwrap(), original);

        assert!(matches!(
            space.patch(id, entry.size() - 2, &bp),
            Err(CodeSpaceError::OutOfBounds { .. })
        ));
        assert_eq!(space.patch(CodeId(99), 0, &bp), Err(CodeSpaceError::UnknownCode(CodeId(99))));
    }

    #[test]
    fn test_invalidate_detaches_code() {
        let (program, _, callee) = setup();
        let space = CodeSpace::new(program.clone());
        let id = space.install(compile_leaf(&program, callee, true)).unwrap();
        program.function(callee).set_code(id, true);
        assert_eq!(space.code_for(callee).map(|e| e.id()), Some(id));

        assert_eq!(space.invalidate_optimized(), vec![id]);
        assert!(space.code_for(callee).is_none());
        assert!(!program.function(callee).has_code());
        assert_eq!(space.patch(id, 0, &[0xCC]), Err(CodeSpaceError::Invalidated(id)));
        assert_eq!(CodeSpace::stub_at(CodeSpace::stub_address(StubKind::Deoptimize)), Some(StubKind::Deoptimize));
    }
}
