//! x86-64 registers, addressing and the VM's register roles

use std::fmt;

/// General-purpose register, numbered by hardware encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Register {
    /// Accumulator; return values
    Rax = 0,
    /// Counter
    Rcx = 1,
    /// Data
    Rdx = 2,
    /// Base
    Rbx = 3,
    /// Stack pointer
    Rsp = 4,
    /// Frame pointer
    Rbp = 5,
    /// Source index
    Rsi = 6,
    /// Destination index
    Rdi = 7,
    /// Extended register 8
    R8 = 8,
    /// Extended register 9
    R9 = 9,
    /// Extended register 10
    R10 = 10,
    /// Extended register 11
    R11 = 11,
    /// Extended register 12
    R12 = 12,
    /// Extended register 13
    R13 = 13,
    /// Extended register 14
    R14 = 14,
    /// Extended register 15
    R15 = 15,
}

impl Register {
    /// Hardware encoding (0-15)
    #[inline(always)]
    pub const fn encoding(self) -> u8 {
        self as u8
    }

    /// Bits 0-2, stored in ModR/M, SIB or the opcode
    #[inline(always)]
    pub const fn low_bits(self) -> u8 {
        self.encoding() & 0x7
    }

    /// Bit 3, stored in a REX prefix
    #[inline(always)]
    pub const fn high_bit(self) -> bool {
        self.encoding() >= 8
    }

    /// RSP and R12 as a base require a SIB byte
    #[inline(always)]
    pub const fn needs_sib_as_base(self) -> bool {
        self.low_bits() == 4
    }

    /// RBP and R13 as a base require an explicit displacement
    #[inline(always)]
    pub const fn needs_displacement(self) -> bool {
        self.low_bits() == 5
    }

    /// Assembly name
    pub const fn name(self) -> &'static str {
        match self {
            Register::Rax => "rax",
            Register::Rcx => "rcx",
            Register::Rdx => "rdx",
            Register::Rbx => "rbx",
            Register::Rsp => "rsp",
            Register::Rbp => "rbp",
            Register::Rsi => "rsi",
            Register::Rdi => "rdi",
            Register::R8 => "r8",
            Register::R9 => "r9",
            Register::R10 => "r10",
            Register::R11 => "r11",
            Register::R12 => "r12",
            Register::R13 => "r13",
            Register::R14 => "r14",
            Register::R15 => "r15",
        }
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// Register roles of the VM calling convention.

/// Result register
pub const RESULT_REG: Register = Register::Rax;
/// Object pool of the running code
pub const PP: Register = Register::R15;
/// Arguments descriptor on entry to a function
pub const ARGS_DESC_REG: Register = Register::R10;
/// IC data for instance calls; runtime entry for runtime calls
pub const IC_DATA_REG: Register = Register::Rbx;
/// Scratch register for call targets; clobbered freely
pub const TMP: Register = Register::R11;
/// Frame pointer
pub const FP: Register = Register::Rbp;
/// Stack pointer
pub const SP: Register = Register::Rsp;

/// Index scale of a SIB byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Scale {
    /// ×1
    Times1 = 0,
    /// ×2
    Times2 = 1,
    /// ×4
    Times4 = 2,
    /// ×8
    Times8 = 3,
}

impl Scale {
    /// Multiplier
    pub const fn factor(self) -> i32 {
        1 << (self as u8)
    }
}

/// A memory operand `[base + index * scale + disp]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Address {
    /// Base register
    pub base: Register,
    /// Optional scaled index; RSP cannot be an index
    pub index: Option<(Register, Scale)>,
    /// Displacement
    pub disp: i32,
}

impl Address {
    /// `[base + disp]`
    pub const fn new(base: Register, disp: i32) -> Self {
        Address {
            base,
            index: None,
            disp,
        }
    }

    /// `[base + index * scale + disp]`
    pub const fn indexed(base: Register, index: Register, scale: Scale, disp: i32) -> Self {
        Address {
            base,
            index: Some((index, scale)),
            disp,
        }
    }

    /// Displacement fits a sign-extended byte
    pub const fn disp_fits_i8(&self) -> bool {
        self.disp >= i8::MIN as i32 && self.disp <= i8::MAX as i32
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}", self.base)?;
        if let Some((index, scale)) = self.index {
            write!(f, " + {}*{}", index, scale.factor())?;
        }
        match self.disp {
            0 => f.write_str("]"),
            d if d < 0 => write!(f, " - {}]", -(d as i64)),
            d => write!(f, " + {}]", d),
        }
    }
}

/// Jump condition codes (low nibble of `Jcc`); `Equal` doubles as "zero"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Condition {
    /// `je`/`jz`
    Equal = 0x4,
    /// `jne`/`jnz`
    NotEqual = 0x5,
    /// `jl`
    Less = 0xC,
    /// `jge`
    GreaterEqual = 0xD,
    /// `jle`
    LessEqual = 0xE,
    /// `jg`
    Greater = 0xF,
}

impl Condition {
    /// Condition nibble
    pub const fn code(self) -> u8 {
        self as u8
    }
}
