//! x86-64 register encodings.
//!
//! Registers are identified by their hardware encoding, 0 through 15 for
//! the general purpose registers and 0 through 7 for the SSE registers.
//! Encodings above 7 require a REX prefix extension bit.

/// A general purpose x64 register, by hardware encoding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Gpr {
    Rax = 0,
    Rcx = 1,
    Rdx = 2,
    Rbx = 3,
    Rsp = 4,
    Rbp = 5,
    Rsi = 6,
    Rdi = 7,
    R8 = 8,
    R9 = 9,
    R10 = 10,
    R11 = 11,
    R12 = 12,
    R13 = 13,
    R14 = 14,
    R15 = 15,
}

impl Gpr {
    /// The hardware encoding; bit 3 goes into a REX extension.
    pub fn enc(self) -> u8 {
        self as u8
    }

    /// True for r8..r15, which need a REX extension bit to address.
    pub fn is_extended(self) -> bool {
        self.enc() > 7
    }

    /// Register name at the given access size.
    pub fn name(self, size: Size) -> &'static str {
        use Size::{Byte, Doubleword, Quadword, Word};
        match self {
            Gpr::Rax => match size {
                Byte => "al",
                Word => "ax",
                Doubleword => "eax",
                Quadword => "rax",
            },
            Gpr::Rcx => match size {
                Byte => "cl",
                Word => "cx",
                Doubleword => "ecx",
                Quadword => "rcx",
            },
            Gpr::Rdx => match size {
                Byte => "dl",
                Word => "dx",
                Doubleword => "edx",
                Quadword => "rdx",
            },
            Gpr::Rbx => match size {
                Byte => "bl",
                Word => "bx",
                Doubleword => "ebx",
                Quadword => "rbx",
            },
            Gpr::Rsp => match size {
                Byte => "spl",
                Word => "sp",
                Doubleword => "esp",
                Quadword => "rsp",
            },
            Gpr::Rbp => match size {
                Byte => "bpl",
                Word => "bp",
                Doubleword => "ebp",
                Quadword => "rbp",
            },
            Gpr::Rsi => match size {
                Byte => "sil",
                Word => "si",
                Doubleword => "esi",
                Quadword => "rsi",
            },
            Gpr::Rdi => match size {
                Byte => "dil",
                Word => "di",
                Doubleword => "edi",
                Quadword => "rdi",
            },
            Gpr::R8 => match size {
                Byte => "r8b",
                Word => "r8w",
                Doubleword => "r8d",
                Quadword => "r8",
            },
            Gpr::R9 => match size {
                Byte => "r9b",
                Word => "r9w",
                Doubleword => "r9d",
                Quadword => "r9",
            },
            Gpr::R10 => match size {
                Byte => "r10b",
                Word => "r10w",
                Doubleword => "r10d",
                Quadword => "r10",
            },
            Gpr::R11 => match size {
                Byte => "r11b",
                Word => "r11w",
                Doubleword => "r11d",
                Quadword => "r11",
            },
            Gpr::R12 => match size {
                Byte => "r12b",
                Word => "r12w",
                Doubleword => "r12d",
                Quadword => "r12",
            },
            Gpr::R13 => match size {
                Byte => "r13b",
                Word => "r13w",
                Doubleword => "r13d",
                Quadword => "r13",
            },
            Gpr::R14 => match size {
                Byte => "r14b",
                Word => "r14w",
                Doubleword => "r14d",
                Quadword => "r14",
            },
            Gpr::R15 => match size {
                Byte => "r15b",
                Word => "r15w",
                Doubleword => "r15d",
                Quadword => "r15",
            },
        }
    }
}

/// An SSE register, `xmm0` through `xmm7`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Xmm(u8);

impl Xmm {
    pub fn new(enc: u8) -> Xmm {
        assert!(enc < 8, "invalid xmm register: {enc}");
        Xmm(enc)
    }

    pub fn enc(self) -> u8 {
        self.0
    }
}

/// A single register encoding can access a different number of bits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Size {
    /// An 8-bit access.
    Byte,
    /// A 16-bit access.
    Word,
    /// A 32-bit access.
    Doubleword,
    /// A 64-bit access.
    Quadword,
}

impl Size {
    pub fn bytes(self) -> u32 {
        match self {
            Size::Byte => 1,
            Size::Word => 2,
            Size::Doubleword => 4,
            Size::Quadword => 8,
        }
    }

    pub fn from_bytes(bytes: u32) -> Size {
        match bytes {
            1 => Size::Byte,
            2 => Size::Word,
            4 => Size::Doubleword,
            8 => Size::Quadword,
            _ => panic!("invalid operand width: {bytes}"),
        }
    }

    /// The operand-size bit: 0 selects the 8-bit form of an opcode, 1 the
    /// default 32/64-bit form.
    pub fn w_bit(self) -> u8 {
        match self {
            Size::Byte => 0,
            _ => 1,
        }
    }
}
