//! x86-64 instruction encoding
//!
//! Each function encodes exactly one instruction into a fixed-size buffer:
//!
//! ```text
//! [REX] [Opcode] [ModR/M] [SIB] [Disp] [Imm]
//! ```
//!
//! Only the forms the code generator emits are covered.

use super::registers::{Address, Condition, Register, Scale};

// =============================================================================
// Prefix and addressing bytes
// =============================================================================

/// REX prefix: `0100WRXB`
#[derive(Debug, Clone, Copy, Default)]
pub struct Rex {
    /// 64-bit operand size
    pub w: bool,
    /// Extends ModR/M.reg
    pub r: bool,
    /// Extends SIB.index
    pub x: bool,
    /// Extends ModR/M.rm or SIB.base
    pub b: bool,
}

impl Rex {
    /// Prefix for a register-direct form
    #[inline]
    pub const fn rr(w: bool, reg: Register, rm: Register) -> Self {
        Rex {
            w,
            r: reg.high_bit(),
            x: false,
            b: rm.high_bit(),
        }
    }

    /// Prefix for a memory form; `reg_ext` is bit 3 of the ModR/M.reg operand
    #[inline]
    pub const fn mem(w: bool, reg_ext: bool, addr: &Address) -> Self {
        Rex {
            w,
            r: reg_ext,
            x: match addr.index {
                Some((index, _)) => index.high_bit(),
                None => false,
            },
            b: addr.base.high_bit(),
        }
    }

    /// Whether any bit is set
    #[inline]
    pub const fn is_needed(&self) -> bool {
        self.w || self.r || self.x || self.b
    }

    /// Prefix byte
    #[inline]
    pub const fn encode(&self) -> u8 {
        0x40 | ((self.w as u8) << 3) | ((self.r as u8) << 2) | ((self.x as u8) << 1) | (self.b as u8)
    }
}

/// ModR/M `mod` field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Mod {
    /// `[reg]`
    Indirect = 0b00,
    /// `[reg + disp8]`
    Disp8 = 0b01,
    /// `[reg + disp32]`
    Disp32 = 0b10,
    /// Register direct
    Direct = 0b11,
}

/// ModR/M byte
#[inline]
pub const fn modrm(mode: Mod, reg: u8, rm: u8) -> u8 {
    ((mode as u8) << 6) | ((reg & 0x7) << 3) | (rm & 0x7)
}

/// SIB byte
#[inline]
pub const fn sib(scale: Scale, index: u8, base: u8) -> u8 {
    ((scale as u8) << 6) | ((index & 0x7) << 3) | (base & 0x7)
}

// =============================================================================
// Encoding buffer
// =============================================================================

/// Longest legal x86-64 instruction
pub const MAX_INST_LEN: usize = 15;

/// One encoded instruction
#[derive(Debug, Clone, Copy)]
pub struct EncodedInst {
    bytes: [u8; MAX_INST_LEN],
    len: u8,
}

impl EncodedInst {
    /// Empty buffer
    #[inline]
    pub const fn new() -> Self {
        EncodedInst {
            bytes: [0; MAX_INST_LEN],
            len: 0,
        }
    }

    /// Encoded bytes
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    /// Encoded length
    #[inline]
    pub const fn len(&self) -> usize {
        self.len as usize
    }

    /// Nothing encoded
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    fn push(&mut self, byte: u8) {
        debug_assert!((self.len as usize) < MAX_INST_LEN);
        self.bytes[self.len as usize] = byte;
        self.len += 1;
    }

    #[inline]
    fn push_i32(&mut self, val: i32) {
        for b in val.to_le_bytes() {
            self.push(b);
        }
    }

    #[inline]
    fn push_i64(&mut self, val: i64) {
        for b in val.to_le_bytes() {
            self.push(b);
        }
    }

    #[inline]
    fn push_rex(&mut self, rex: Rex) {
        if rex.is_needed() {
            self.push(rex.encode());
        }
    }
}

impl Default for EncodedInst {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Generic forms
// =============================================================================

/// `OP r/m, reg` with both operands registers
#[inline]
pub fn encode_rr(opcode: u8, rm: Register, reg: Register, w: bool) -> EncodedInst {
    let mut enc = EncodedInst::new();
    enc.push_rex(Rex::rr(w, reg, rm));
    enc.push(opcode);
    enc.push(modrm(Mod::Direct, reg.low_bits(), rm.low_bits()));
    enc
}

/// `OP r/m, imm8` in the `/digit` form
#[inline]
pub fn encode_ri8(opcode: u8, digit: u8, dst: Register, imm: i8, w: bool) -> EncodedInst {
    let mut enc = EncodedInst::new();
    enc.push_rex(Rex {
        w,
        b: dst.high_bit(),
        ..Rex::default()
    });
    enc.push(opcode);
    enc.push(modrm(Mod::Direct, digit, dst.low_bits()));
    enc.push(imm as u8);
    enc
}

/// `OP r/m, imm32` in the `/digit` form
#[inline]
pub fn encode_ri32(opcode: u8, digit: u8, dst: Register, imm: i32, w: bool) -> EncodedInst {
    let mut enc = EncodedInst::new();
    enc.push_rex(Rex {
        w,
        b: dst.high_bit(),
        ..Rex::default()
    });
    enc.push(opcode);
    enc.push(modrm(Mod::Direct, digit, dst.low_bits()));
    enc.push_i32(imm);
    enc
}

/// `OP reg, [mem]` (or `OP [mem], reg`; the direction is in the opcode)
#[inline]
pub fn encode_rm(opcode: u8, reg: Register, addr: &Address, w: bool) -> EncodedInst {
    let mut enc = EncodedInst::new();
    enc.push_rex(Rex::mem(w, reg.high_bit(), addr));
    enc.push(opcode);
    encode_modrm_sib_disp(&mut enc, reg.low_bits(), addr);
    enc
}

/// `OP [mem]` in the `/digit` form, with an optional trailing imm8
#[inline]
pub fn encode_m_digit(opcode: u8, digit: u8, addr: &Address, imm8: Option<i8>, w: bool) -> EncodedInst {
    let mut enc = EncodedInst::new();
    enc.push_rex(Rex::mem(w, false, addr));
    enc.push(opcode);
    encode_modrm_sib_disp(&mut enc, digit, addr);
    if let Some(imm) = imm8 {
        enc.push(imm as u8);
    }
    enc
}

fn encode_modrm_sib_disp(enc: &mut EncodedInst, reg: u8, addr: &Address) {
    let base = addr.base;
    let mode = if addr.disp == 0 && !base.needs_displacement() {
        Mod::Indirect
    } else if addr.disp_fits_i8() {
        Mod::Disp8
    } else {
        Mod::Disp32
    };

    match addr.index {
        None if !base.needs_sib_as_base() => enc.push(modrm(mode, reg, base.low_bits())),
        None => {
            enc.push(modrm(mode, reg, 0b100));
            // index = 100 means "no index"
            enc.push(sib(Scale::Times1, 0b100, base.low_bits()));
        }
        Some((index, scale)) => {
            debug_assert!(index != Register::Rsp, "rsp cannot be an index register");
            enc.push(modrm(mode, reg, 0b100));
            enc.push(sib(scale, index.low_bits(), base.low_bits()));
        }
    }

    match mode {
        Mod::Disp8 => enc.push(addr.disp as i8 as u8),
        Mod::Disp32 => enc.push_i32(addr.disp),
        Mod::Indirect | Mod::Direct => {}
    }
}

// =============================================================================
// Data movement
// =============================================================================

/// `mov dst, src`
#[inline]
pub fn encode_mov_rr(dst: Register, src: Register) -> EncodedInst {
    encode_rr(0x89, dst, src, true)
}

/// `mov dst, [addr]`
#[inline]
pub fn encode_load(dst: Register, addr: &Address) -> EncodedInst {
    encode_rm(0x8B, dst, addr, true)
}

/// `mov [addr], src`
#[inline]
pub fn encode_store(addr: &Address, src: Register) -> EncodedInst {
    encode_rm(0x89, src, addr, true)
}

/// `lea dst, [addr]`
#[inline]
pub fn encode_lea(dst: Register, addr: &Address) -> EncodedInst {
    encode_rm(0x8D, dst, addr, true)
}

/// `mov dst, imm64` (REX.W B8+rd); always ten bytes so the immediate is patchable
#[inline]
pub fn encode_mov_ri64(dst: Register, imm: i64) -> EncodedInst {
    let mut enc = EncodedInst::new();
    enc.push(
        Rex {
            w: true,
            b: dst.high_bit(),
            ..Rex::default()
        }
        .encode(),
    );
    enc.push(0xB8 + dst.low_bits());
    enc.push_i64(imm);
    enc
}

/// `mov dst, imm32` sign-extended to 64 bits (REX.W C7 /0)
#[inline]
pub fn encode_mov_ri32(dst: Register, imm: i32) -> EncodedInst {
    encode_ri32(0xC7, 0, dst, imm, true)
}

/// `push reg`
#[inline]
pub fn encode_push(reg: Register) -> EncodedInst {
    let mut enc = EncodedInst::new();
    enc.push_rex(Rex {
        b: reg.high_bit(),
        ..Rex::default()
    });
    enc.push(0x50 + reg.low_bits());
    enc
}

/// `push qword [addr]`
#[inline]
pub fn encode_push_mem(addr: &Address) -> EncodedInst {
    encode_m_digit(0xFF, 6, addr, None, false)
}

/// `pop reg`
#[inline]
pub fn encode_pop(reg: Register) -> EncodedInst {
    let mut enc = EncodedInst::new();
    enc.push_rex(Rex {
        b: reg.high_bit(),
        ..Rex::default()
    });
    enc.push(0x58 + reg.low_bits());
    enc
}

// =============================================================================
// Arithmetic and comparison
// =============================================================================

/// `add dst, imm` using the short form when it fits
#[inline]
pub fn encode_add_ri(dst: Register, imm: i32) -> EncodedInst {
    match i8::try_from(imm) {
        Ok(imm8) => encode_ri8(0x83, 0, dst, imm8, true),
        Err(_) => encode_ri32(0x81, 0, dst, imm, true),
    }
}

/// `sub dst, imm` using the short form when it fits
#[inline]
pub fn encode_sub_ri(dst: Register, imm: i32) -> EncodedInst {
    match i8::try_from(imm) {
        Ok(imm8) => encode_ri8(0x83, 5, dst, imm8, true),
        Err(_) => encode_ri32(0x81, 5, dst, imm, true),
    }
}

/// `cmp lhs, rhs`
#[inline]
pub fn encode_cmp_rr(lhs: Register, rhs: Register) -> EncodedInst {
    encode_rr(0x39, lhs, rhs, true)
}

/// `cmp lhs, imm` using the short form when it fits
#[inline]
pub fn encode_cmp_ri(lhs: Register, imm: i32) -> EncodedInst {
    match i8::try_from(imm) {
        Ok(imm8) => encode_ri8(0x83, 7, lhs, imm8, true),
        Err(_) => encode_ri32(0x81, 7, lhs, imm, true),
    }
}

/// `cmp qword [addr], imm8`
#[inline]
pub fn encode_cmp_mi8(addr: &Address, imm: i8) -> EncodedInst {
    encode_m_digit(0x83, 7, addr, Some(imm), true)
}

/// `test reg, imm32`
#[inline]
pub fn encode_test_ri(reg: Register, imm: i32) -> EncodedInst {
    encode_ri32(0xF7, 0, reg, imm, true)
}

/// `neg reg`
#[inline]
pub fn encode_neg(reg: Register) -> EncodedInst {
    let mut enc = EncodedInst::new();
    enc.push_rex(Rex {
        w: true,
        b: reg.high_bit(),
        ..Rex::default()
    });
    enc.push(0xF7);
    enc.push(modrm(Mod::Direct, 3, reg.low_bits()));
    enc
}

// =============================================================================
// Control flow
// =============================================================================

/// `call reg`
#[inline]
pub fn encode_call_r(target: Register) -> EncodedInst {
    let mut enc = EncodedInst::new();
    enc.push_rex(Rex {
        b: target.high_bit(),
        ..Rex::default()
    });
    enc.push(0xFF);
    enc.push(modrm(Mod::Direct, 2, target.low_bits()));
    enc
}

/// `jmp reg`
#[inline]
pub fn encode_jmp_r(target: Register) -> EncodedInst {
    let mut enc = EncodedInst::new();
    enc.push_rex(Rex {
        b: target.high_bit(),
        ..Rex::default()
    });
    enc.push(0xFF);
    enc.push(modrm(Mod::Direct, 4, target.low_bits()));
    enc
}

/// `jmp rel32`
#[inline]
pub fn encode_jmp_rel32(rel: i32) -> EncodedInst {
    let mut enc = EncodedInst::new();
    enc.push(0xE9);
    enc.push_i32(rel);
    enc
}

/// `jcc rel32`
#[inline]
pub fn encode_jcc_rel32(cond: Condition, rel: i32) -> EncodedInst {
    let mut enc = EncodedInst::new();
    enc.push(0x0F);
    enc.push(0x80 | cond.code());
    enc.push_i32(rel);
    enc
}

/// `ret`
pub const RET: u8 = 0xC3;
/// `int3`
pub const INT3: u8 = 0xCC;
/// `nop`
pub const NOP: u8 = 0x90;

#[cfg(test)]
mod tests {
    use super::*;
    use Register::*;

    #[test]
    fn test_rex_only_when_needed() {
        assert_eq!(encode_push(Rbp).as_slice(), &[0x55]);
        assert_eq!(encode_push(R15).as_slice(), &[0x41, 0x57]);
        assert_eq!(encode_pop(Rbp).as_slice(), &[0x5D]);
    }

    #[test]
    fn test_mov_forms() {
        // mov rbp, rsp
        assert_eq!(encode_mov_rr(Rbp, Rsp).as_slice(), &[0x48, 0x89, 0xE5]);
        // mov r11, imm64
        let enc = encode_mov_ri64(R11, 0x1122_3344_5566_7788);
        assert_eq!(enc.len(), 10);
        assert_eq!(&enc.as_slice()[..2], &[0x49, 0xBB]);
        assert_eq!(enc.as_slice()[2], 0x88);
    }

    #[test]
    fn test_frame_slot_addressing() {
        // mov rax, [rbp - 8]
        assert_eq!(encode_load(Rax, &Address::new(Rbp, -8)).as_slice(), &[0x48, 0x8B, 0x45, 0xF8]);
        // mov rax, [rbp]: rbp base always carries a displacement
        assert_eq!(encode_load(Rax, &Address::new(Rbp, 0)).as_slice(), &[0x48, 0x8B, 0x45, 0x00]);
        // mov [rbp - 0x100], rcx needs disp32
        assert_eq!(
            encode_store(&Address::new(Rbp, -0x100), Rcx).as_slice(),
            &[0x48, 0x89, 0x8D, 0x00, 0xFF, 0xFF, 0xFF]
        );
    }

    #[test]
    fn test_sib_bases() {
        // mov rax, [rsp]
        assert_eq!(encode_load(Rax, &Address::new(Rsp, 0)).as_slice(), &[0x48, 0x8B, 0x04, 0x24]);
        // mov r11, [r12 + 8]
        assert_eq!(encode_load(R11, &Address::new(R12, 8)).as_slice(), &[0x4D, 0x8B, 0x5C, 0x24, 0x08]);
        // mov rax, [rcx + rsi*8]
        assert_eq!(
            encode_load(Rax, &Address::indexed(Rcx, Rsi, Scale::Times8, 0)).as_slice(),
            &[0x48, 0x8B, 0x04, 0xF1]
        );
    }

    #[test]
    fn test_pool_load_through_r15() {
        // mov r11, [r15 + 16]
        assert_eq!(encode_load(R11, &Address::new(R15, 16)).as_slice(), &[0x4D, 0x8B, 0x5F, 0x10]);
    }

    #[test]
    fn test_call_sequence_is_thirteen_bytes() {
        let mov = encode_mov_ri64(R11, 0);
        let call = encode_call_r(R11);
        assert_eq!(call.as_slice(), &[0x41, 0xFF, 0xD3]);
        assert_eq!(mov.len() + call.len(), 13);
    }

    #[test]
    fn test_immediate_forms() {
        assert_eq!(encode_sub_ri(Rsp, 16).as_slice(), &[0x48, 0x83, 0xEC, 0x10]);
        assert_eq!(encode_add_ri(Rsp, 0x200).as_slice(), &[0x48, 0x81, 0xC4, 0x00, 0x02, 0x00, 0x00]);
        assert_eq!(encode_cmp_ri(Rax, 3).as_slice(), &[0x48, 0x83, 0xF8, 0x03]);
        assert_eq!(encode_jcc_rel32(Condition::NotEqual, 0).as_slice(), &[0x0F, 0x85, 0, 0, 0, 0]);
    }
}
