//! The abstract instruction record consumed by the encoder.
//!
//! Instruction selection builds `Inst` values; the encoder turns each one
//! into opcode bytes. Operands carry their access width so the encoder can
//! pick prefixes and opcode forms.

use std::fmt;

use crate::symtab::SymId;

use super::regs::{Gpr, Size, Xmm};

/// Condition codes, by their `tttn` encoding field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Cond {
    /// Above or equal (unsigned >=).
    Ae = 0x3,
    /// Zero / equal.
    Z = 0x4,
    /// Above (unsigned >).
    A = 0x7,
    /// Greater or equal (signed >=).
    Ge = 0xD,
    /// Greater (signed >).
    G = 0xF,
}

impl Cond {
    pub fn tttn(self) -> u8 {
        self as u8
    }
}

/// Opcodes understood by the encoder.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Opcode {
    Mov,
    /// Sign-extending load.
    Movsx,
    /// Zero-extending load or move.
    Movzx,
    /// Aligned 128-bit SSE store.
    Movaps,
    Push,
    Add,
    Sub,
    Mul,
    Div,
    Xor,
    And,
    Or,
    Not,
    /// Shift left by CL.
    Shl,
    /// Logical shift right by CL.
    Shr,
    /// Arithmetic shift right by CL.
    Sar,
    Cmp,
    Test,
    Setcc(Cond),
    Lea,
    Call,
    Jmp,
    Jcc(Cond),
    Leave,
    Ret,
    RepMovsq,
}

/// A register operand with its access width.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Register {
    pub reg: Gpr,
    pub size: Size,
}

impl Register {
    pub fn new(reg: Gpr, size: Size) -> Register {
        Register { reg, size }
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "%{}", self.reg.name(self.size))
    }
}

/// A memory operand: `disp(base)`, or `sym(%rip)` when a symbol is
/// present.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Address {
    pub base: Gpr,
    pub disp: i32,
    /// RIP-relative target; when set, `base` is ignored and a relocation
    /// is recorded.
    pub sym: Option<SymId>,
}

impl Address {
    pub fn base(base: Gpr, disp: i32) -> Address {
        Address {
            base,
            disp,
            sym: None,
        }
    }

    pub fn rip(sym: SymId, disp: i32) -> Address {
        Address {
            base: Gpr::Rax,
            disp,
            sym: Some(sym),
        }
    }
}

/// A memory operand with access width.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Memory {
    pub addr: Address,
    pub size: Size,
}

/// An immediate operand: either an integer value or the address of a
/// symbol (which encodes as a 4-byte placeholder plus relocation).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImmKind {
    Int(i64),
    Addr { sym: SymId, disp: i64 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Immediate {
    pub kind: ImmKind,
    pub size: Size,
}

impl Immediate {
    pub fn int(value: i64, size: Size) -> Immediate {
        Immediate {
            kind: ImmKind::Int(value),
            size,
        }
    }

    pub fn addr(sym: SymId, disp: i64) -> Immediate {
        Immediate {
            kind: ImmKind::Addr { sym, disp },
            size: Size::Quadword,
        }
    }

    pub fn is_int(&self) -> bool {
        matches!(self.kind, ImmKind::Int(_))
    }

    /// True if the integer value sign-extends from 8 bits.
    pub fn fits_byte(&self) -> bool {
        match self.kind {
            ImmKind::Int(v) => i8::try_from(v).is_ok(),
            ImmKind::Addr { .. } => false,
        }
    }

    /// True if the integer value sign-extends from 32 bits.
    pub fn fits_32bit(&self) -> bool {
        match self.kind {
            ImmKind::Int(v) => i32::try_from(v).is_ok(),
            ImmKind::Addr { .. } => false,
        }
    }
}

/// An instruction operand.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operand {
    None,
    Reg(Register),
    XmmReg(Xmm),
    Mem(Memory),
    Imm(Immediate),
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Operand::None => write!(f, "-"),
            Operand::Reg(r) => write!(f, "{r}"),
            Operand::XmmReg(x) => write!(f, "%xmm{}", x.enc()),
            Operand::Mem(m) => match m.addr.sym {
                Some(sym) => write!(f, "sym{}(%rip)", sym.index()),
                None => write!(f, "{}(%{})", m.addr.disp, m.addr.base.name(Size::Quadword)),
            },
            Operand::Imm(imm) => match imm.kind {
                ImmKind::Int(v) => write!(f, "${v:#x}"),
                ImmKind::Addr { sym, disp } => write!(f, "$sym{}+{}", sym.index(), disp),
            },
        }
    }
}

/// An abstract instruction: opcode plus source and destination operands.
/// Which operand combinations are valid depends on the opcode; the encoder
/// enumerates the supported pairs and rejects anything else.
#[derive(Clone, Copy, Debug)]
pub struct Inst {
    pub opcode: Opcode,
    pub src: Operand,
    pub dst: Operand,
}

impl Inst {
    pub fn nullary(opcode: Opcode) -> Inst {
        Inst {
            opcode,
            src: Operand::None,
            dst: Operand::None,
        }
    }

    pub fn unary(opcode: Opcode, src: Operand) -> Inst {
        Inst {
            opcode,
            src,
            dst: Operand::None,
        }
    }

    pub fn binary(opcode: Opcode, src: Operand, dst: Operand) -> Inst {
        Inst { opcode, src, dst }
    }

    pub fn rr(opcode: Opcode, src: Register, dst: Register) -> Inst {
        Inst::binary(opcode, Operand::Reg(src), Operand::Reg(dst))
    }

    pub fn ir(opcode: Opcode, src: Immediate, dst: Register) -> Inst {
        Inst::binary(opcode, Operand::Imm(src), Operand::Reg(dst))
    }

    pub fn mr(opcode: Opcode, src: Memory, dst: Register) -> Inst {
        Inst::binary(opcode, Operand::Mem(src), Operand::Reg(dst))
    }

    pub fn rm(opcode: Opcode, src: Register, dst: Memory) -> Inst {
        Inst::binary(opcode, Operand::Reg(src), Operand::Mem(dst))
    }
}
