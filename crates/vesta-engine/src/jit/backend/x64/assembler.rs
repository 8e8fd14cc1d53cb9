//! x64 assembler for code emission
//!
//! A growable code buffer with labels. Forward jumps are emitted with a zero rel32
//! and fixed up when the buffer is finished.

use super::encoder::{self, EncodedInst, INT3, NOP, RET};
use super::registers::{Address, Condition, Register, TMP};
use crate::jit::backend::traits::{CodegenError, CodegenResult};
use crate::jit::descriptors::CodeComment;

/// A jump target inside the buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(u32);

/// Code buffer for emitting x64 instructions
#[derive(Debug, Default)]
pub struct Assembler {
    code: Vec<u8>,
    labels: Vec<Option<usize>>,
    // (offset of the rel32 field, label)
    fixups: Vec<(usize, Label)>,
    comments: Vec<CodeComment>,
}

impl Assembler {
    /// Create a new assembler
    pub fn new() -> Self {
        Self::default()
    }

    /// Current emission offset
    pub fn offset(&self) -> usize {
        self.code.len()
    }

    /// Emit one encoded instruction
    pub fn emit(&mut self, inst: EncodedInst) {
        self.code.extend_from_slice(inst.as_slice());
    }

    /// Emit raw bytes
    pub fn emit_bytes(&mut self, bytes: &[u8]) {
        self.code.extend_from_slice(bytes);
    }

    /// Attach a comment to the current offset
    pub fn comment(&mut self, text: impl Into<String>) {
        self.comments.push(CodeComment {
            pc_offset: self.code.len() as u32,
            text: text.into(),
        });
    }

    // -------------------------------------------------------------------------
    // Labels
    // -------------------------------------------------------------------------

    /// Create an unbound label
    pub fn new_label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() as u32 - 1)
    }

    /// Bind `label` to the current offset
    pub fn bind(&mut self, label: Label) {
        self.labels[label.0 as usize] = Some(self.code.len());
    }

    /// Whether `label` is bound at exactly the current offset
    pub fn is_bound_here(&self, label: Label) -> bool {
        self.labels[label.0 as usize] == Some(self.code.len())
    }

    /// `jmp label`
    pub fn jmp(&mut self, label: Label) {
        self.emit(encoder::encode_jmp_rel32(0));
        self.fixups.push((self.code.len() - 4, label));
    }

    /// `jcc label`
    pub fn jcc(&mut self, cond: Condition, label: Label) {
        self.emit(encoder::encode_jcc_rel32(cond, 0));
        self.fixups.push((self.code.len() - 4, label));
    }

    // -------------------------------------------------------------------------
    // Instructions
    // -------------------------------------------------------------------------

    /// `mov dst, src`
    pub fn mov(&mut self, dst: Register, src: Register) {
        self.emit(encoder::encode_mov_rr(dst, src));
    }

    /// `mov dst, [addr]`
    pub fn load(&mut self, dst: Register, addr: Address) {
        self.emit(encoder::encode_load(dst, &addr));
    }

    /// `mov [addr], src`
    pub fn store(&mut self, addr: Address, src: Register) {
        self.emit(encoder::encode_store(&addr, src));
    }

    /// `lea dst, [addr]`
    pub fn lea(&mut self, dst: Register, addr: Address) {
        self.emit(encoder::encode_lea(dst, &addr));
    }

    /// Load an immediate using the shortest form
    pub fn load_immediate(&mut self, dst: Register, imm: i64) {
        match i32::try_from(imm) {
            Ok(imm32) => self.emit(encoder::encode_mov_ri32(dst, imm32)),
            Err(_) => self.emit(encoder::encode_mov_ri64(dst, imm)),
        }
    }

    /// `mov dst, imm64` with a zero immediate; returns the immediate's offset
    pub fn load_relocated(&mut self, dst: Register) -> usize {
        self.emit(encoder::encode_mov_ri64(dst, 0));
        self.code.len() - 8
    }

    /// `push reg`
    pub fn push(&mut self, reg: Register) {
        self.emit(encoder::encode_push(reg));
    }

    /// `push qword [addr]`
    pub fn push_mem(&mut self, addr: Address) {
        self.emit(encoder::encode_push_mem(&addr));
    }

    /// `pop reg`
    pub fn pop(&mut self, reg: Register) {
        self.emit(encoder::encode_pop(reg));
    }

    /// `add reg, imm`
    pub fn add_imm(&mut self, reg: Register, imm: i32) {
        self.emit(encoder::encode_add_ri(reg, imm));
    }

    /// `sub reg, imm`
    pub fn sub_imm(&mut self, reg: Register, imm: i32) {
        self.emit(encoder::encode_sub_ri(reg, imm));
    }

    /// `cmp lhs, rhs`
    pub fn cmp(&mut self, lhs: Register, rhs: Register) {
        self.emit(encoder::encode_cmp_rr(lhs, rhs));
    }

    /// `cmp reg, imm`
    pub fn cmp_imm(&mut self, reg: Register, imm: i32) {
        self.emit(encoder::encode_cmp_ri(reg, imm));
    }

    /// `cmp qword [addr], imm8`
    pub fn cmp_mem_imm8(&mut self, addr: Address, imm: i8) {
        self.emit(encoder::encode_cmp_mi8(&addr, imm));
    }

    /// `test reg, imm`
    pub fn test_imm(&mut self, reg: Register, imm: i32) {
        self.emit(encoder::encode_test_ri(reg, imm));
    }

    /// `neg reg`
    pub fn neg(&mut self, reg: Register) {
        self.emit(encoder::encode_neg(reg));
    }

    /// `jmp reg`
    pub fn jmp_reg(&mut self, reg: Register) {
        self.emit(encoder::encode_jmp_r(reg));
    }

    /// `ret`
    pub fn ret(&mut self) {
        self.code.push(RET);
    }

    /// `int3`
    pub fn int3(&mut self) {
        self.code.push(INT3);
    }

    /// `count` single-byte nops
    pub fn nops(&mut self, count: usize) {
        self.code.extend(std::iter::repeat(NOP).take(count));
    }

    /// Patchable `mov TMP, imm64; call TMP`
    ///
    /// Returns the offset of the immediate (for a relocation) and the return address.
    pub fn call_patchable(&mut self) -> (usize, usize) {
        let imm = self.load_relocated(TMP);
        self.emit(encoder::encode_call_r(TMP));
        (imm, self.code.len())
    }

    /// Patchable `mov TMP, imm64; jmp TMP`; returns the offset of the immediate
    pub fn jmp_patchable(&mut self) -> usize {
        let imm = self.load_relocated(TMP);
        self.emit(encoder::encode_jmp_r(TMP));
        imm
    }

    /// Resolve label fixups and return the code and comments
    pub fn finish(mut self) -> CodegenResult<(Vec<u8>, Vec<CodeComment>)> {
        for (at, label) in std::mem::take(&mut self.fixups) {
            let target = self.labels[label.0 as usize]
                .ok_or_else(|| CodegenError::Backend(format!("unbound label {}", label.0)))?;
            let rel = target as i64 - (at as i64 + 4);
            let rel = i32::try_from(rel)
                .map_err(|_| CodegenError::Backend(format!("jump displacement {} out of range", rel)))?;
            self.code[at..at + 4].copy_from_slice(&rel.to_le_bytes());
        }
        Ok((self.code, self.comments))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jit::backend::x64::registers::Register::*;

    #[test]
    fn test_forward_and_backward_jumps() {
        let mut asm = Assembler::new();
        let top = asm.new_label();
        let done = asm.new_label();
        asm.bind(top);
        asm.cmp_imm(Rax, 0);
        asm.jcc(Condition::Equal, done);
        asm.jmp(top);
        asm.bind(done);
        asm.ret();
        let (code, _) = asm.finish().unwrap();
        // cmp (4) + je (6) + jmp (5) + ret (1)
        assert_eq!(code.len(), 16);
        assert_eq!(&code[6..10], &5i32.to_le_bytes());
        assert_eq!(&code[11..15], &(-15i32).to_le_bytes());
    }

    #[test]
    fn test_unbound_label_is_an_error() {
        let mut asm = Assembler::new();
        let nowhere = asm.new_label();
        asm.jmp(nowhere);
        assert!(matches!(asm.finish(), Err(CodegenError::Backend(_))));
    }

    #[test]
    fn test_patchable_call_shape() {
        let mut asm = Assembler::new();
        asm.push(Rbp);
        let (imm, ret) = asm.call_patchable();
        assert_eq!(imm, 3);
        assert_eq!(ret, 14);
    }
}
