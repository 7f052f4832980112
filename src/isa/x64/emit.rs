//! Binary encoding of x86-64 instructions.
//!
//! Each instruction becomes at most 15 bytes: legacy prefixes, an optional
//! REX prefix, the opcode, ModR/M and SIB bytes, displacement, and an
//! immediate. RIP-relative operands and address immediates emit a 4-byte
//! placeholder and record a relocation through the [`RelocSink`].
//!
//! The supported (opcode, operand) combinations are enumerated exhaustively
//! in [`encode`]; instruction selection is the only producer of `Inst`
//! values, so an unsupported combination is an invariant violation and
//! panics.

use crate::binemit::{CodeBytes, Reloc, RelocSink};

use super::inst::{Address, Cond, ImmKind, Immediate, Inst, Memory, Opcode, Operand, Register};
use super::regs::{Gpr, Size, Xmm};

/// Encode the ModR/M byte.
#[inline]
fn encode_modrm(m0d: u8, reg: u8, rm: u8) -> u8 {
    debug_assert!(m0d < 4);
    ((m0d & 3) << 6) | ((reg & 7) << 3) | (rm & 7)
}

/// Emit a REX prefix if any extension bit is set, W is requested, or the
/// caller forces one (byte access to spl/bpl/sil/dil).
#[inline]
fn put_rex(c: &mut CodeBytes, w: bool, reg: u8, index: u8, base: u8, force: bool) {
    let rex = 0x40
        | (u8::from(w) << 3)
        | (((reg >> 3) & 1) << 2)
        | (((index >> 3) & 1) << 1)
        | ((base >> 3) & 1);
    if rex != 0x40 || force {
        c.put1(rex);
    }
}

/// Byte accesses to spl, bpl, sil and dil encode as ah..bh unless a REX
/// prefix is present.
fn forces_rex(reg: Register) -> bool {
    reg.size == Size::Byte && (4..=7).contains(&reg.reg.enc())
}

/// Emit ModR/M, optional SIB, and displacement for a memory operand, with
/// `reg` in the ModR/M reg field. RIP-relative operands emit a 4-byte zero
/// placeholder and record a `R_X86_64_PC32` relocation.
fn put_addr(c: &mut CodeBytes, sink: &mut dyn RelocSink, reg: u8, addr: &Address) {
    if let Some(sym) = addr.sym {
        // 2.2.1.6 RIP-relative addressing: mod=00, rm=101.
        c.put1(encode_modrm(0b00, reg, 0b101));
        sink.reloc_text(sym, Reloc::X86PC32, c.len() as u32, addr.disp as i64);
        c.put4(0);
        return;
    }

    let base = addr.base.enc();
    let (m0d, disp): (u8, Option<i32>) = if addr.disp == 0 && base & 7 != Gpr::Rbp.enc() {
        (0b00, None)
    } else if i8::try_from(addr.disp).is_ok() {
        (0b01, Some(addr.disp))
    } else {
        (0b10, Some(addr.disp))
    };

    if base & 7 == Gpr::Rsp.enc() {
        // rsp/r12 as base requires a SIB byte with index=100 (none).
        c.put1(encode_modrm(m0d, reg, 0b100));
        c.put1(0b00_100_100);
    } else {
        c.put1(encode_modrm(m0d, reg, base));
    }

    match (m0d, disp) {
        (0b01, Some(d)) => c.put1(d as u8),
        (0b10, Some(d)) => c.put4(d as u32),
        _ => {}
    }
}

/// REX bits required to refer to a memory operand's base register.
fn addr_base(addr: &Address) -> u8 {
    if addr.sym.is_some() {
        0
    } else {
        addr.base.enc()
    }
}

fn put_int(c: &mut CodeBytes, imm: Immediate, max: Size) {
    let value = match imm.kind {
        ImmKind::Int(v) => v,
        ImmKind::Addr { .. } => panic!("address immediate in integer context"),
    };
    let size = if imm.size.bytes() > max.bytes() {
        max
    } else {
        imm.size
    };
    match size {
        Size::Byte => c.put1(value as u8),
        Size::Word => c.put2(value as u16),
        Size::Doubleword => c.put4(value as u32),
        Size::Quadword => c.put8(value as u64),
    }
}

fn mov(sink: &mut dyn RelocSink, src: &Operand, dst: &Operand) -> CodeBytes {
    let mut c = CodeBytes::new();
    match (src, dst) {
        (Operand::Imm(imm), Operand::Reg(r)) => match r.size {
            Size::Byte => {
                put_rex(&mut c, false, 0, 0, r.reg.enc(), forces_rex(*r));
                c.put1(0xB0 | (r.reg.enc() & 7));
                put_int(&mut c, *imm, Size::Byte);
            }
            Size::Word => {
                c.put1(0x66);
                put_rex(&mut c, false, 0, 0, r.reg.enc(), false);
                c.put1(0xB8 | (r.reg.enc() & 7));
                put_int(&mut c, *imm, Size::Word);
            }
            Size::Doubleword => {
                put_rex(&mut c, false, 0, 0, r.reg.enc(), false);
                c.put1(0xB8 | (r.reg.enc() & 7));
                match imm.kind {
                    ImmKind::Int(_) => put_int(&mut c, *imm, Size::Doubleword),
                    ImmKind::Addr { sym, disp } => {
                        sink.reloc_text(sym, Reloc::X86Abs32S, c.len() as u32, disp);
                        c.put4(0);
                    }
                }
            }
            Size::Quadword => match imm.kind {
                // Canonical form for a 32-bit-range immediate into a
                // 64-bit register; sign extended by the CPU.
                ImmKind::Int(_) if imm.fits_32bit() => {
                    put_rex(&mut c, true, 0, 0, r.reg.enc(), false);
                    c.put1(0xC7);
                    c.put1(encode_modrm(0b11, 0, r.reg.enc()));
                    put_int(&mut c, *imm, Size::Doubleword);
                }
                ImmKind::Int(_) => {
                    put_rex(&mut c, true, 0, 0, r.reg.enc(), false);
                    c.put1(0xB8 | (r.reg.enc() & 7));
                    put_int(&mut c, *imm, Size::Quadword);
                }
                ImmKind::Addr { sym, disp } => {
                    put_rex(&mut c, true, 0, 0, r.reg.enc(), false);
                    c.put1(0xC7);
                    c.put1(encode_modrm(0b11, 0, r.reg.enc()));
                    sink.reloc_text(sym, Reloc::X86Abs32S, c.len() as u32, disp);
                    c.put4(0);
                }
            },
        },
        (Operand::Reg(a), Operand::Reg(b)) => {
            assert_eq!(a.size, b.size);
            if a.size == Size::Word {
                c.put1(0x66);
            }
            put_rex(
                &mut c,
                a.size == Size::Quadword,
                a.reg.enc(),
                0,
                b.reg.enc(),
                forces_rex(*a) || forces_rex(*b),
            );
            c.put1(0x88 + a.size.w_bit());
            c.put1(encode_modrm(0b11, a.reg.enc(), b.reg.enc()));
        }
        (Operand::Reg(a), Operand::Mem(m)) => {
            if a.size == Size::Word {
                c.put1(0x66);
            }
            put_rex(
                &mut c,
                a.size == Size::Quadword,
                a.reg.enc(),
                0,
                addr_base(&m.addr),
                forces_rex(*a),
            );
            c.put1(0x88 + a.size.w_bit());
            put_addr(&mut c, sink, a.reg.enc(), &m.addr);
        }
        (Operand::Mem(m), Operand::Reg(b)) => {
            if b.size == Size::Word {
                c.put1(0x66);
            }
            put_rex(
                &mut c,
                b.size == Size::Quadword,
                b.reg.enc(),
                0,
                addr_base(&m.addr),
                forces_rex(*b),
            );
            c.put1(0x8A + b.size.w_bit());
            put_addr(&mut c, sink, b.reg.enc(), &m.addr);
        }
        _ => panic!("unsupported mov operands: {src:?} -> {dst:?}"),
    }
    c
}

fn movsx(sink: &mut dyn RelocSink, m: &Memory, dst: &Register) -> CodeBytes {
    let mut c = CodeBytes::new();
    put_rex(
        &mut c,
        dst.size == Size::Quadword,
        dst.reg.enc(),
        0,
        addr_base(&m.addr),
        false,
    );
    if m.size == Size::Doubleword && dst.size == Size::Quadword {
        c.put1(0x63); // movsxd
    } else {
        c.put1(0x0F);
        c.put1(0xBE + m.size.w_bit());
    }
    put_addr(&mut c, sink, dst.reg.enc(), &m.addr);
    c
}

fn movzx(sink: &mut dyn RelocSink, src: &Operand, dst: &Register) -> CodeBytes {
    let mut c = CodeBytes::new();
    match src {
        Operand::Reg(a) => {
            assert!(a.size.bytes() < 4);
            put_rex(
                &mut c,
                dst.size == Size::Quadword,
                dst.reg.enc(),
                0,
                a.reg.enc(),
                forces_rex(*a),
            );
            c.put1(0x0F);
            c.put1(0xB6 + a.size.w_bit());
            c.put1(encode_modrm(0b11, dst.reg.enc(), a.reg.enc()));
        }
        Operand::Mem(m) => {
            assert!(m.size.bytes() < 4);
            put_rex(
                &mut c,
                dst.size == Size::Quadword,
                dst.reg.enc(),
                0,
                addr_base(&m.addr),
                false,
            );
            c.put1(0x0F);
            c.put1(0xB6 + m.size.w_bit());
            put_addr(&mut c, sink, dst.reg.enc(), &m.addr);
        }
        _ => panic!("unsupported movzx source: {src:?}"),
    }
    c
}

fn movaps(sink: &mut dyn RelocSink, src: &Xmm, dst: &Memory) -> CodeBytes {
    let mut c = CodeBytes::new();
    c.put1(0x0F);
    c.put1(0x29);
    put_addr(&mut c, sink, src.enc(), &dst.addr);
    c
}

fn push(r: &Register) -> CodeBytes {
    let mut c = CodeBytes::new();
    put_rex(&mut c, false, 0, 0, r.reg.enc(), false);
    c.put1(0x50 + (r.reg.enc() & 7));
    c
}

/// The `00 /r`-style ALU forms with register operands: opcode computed as
/// `base + w`.
fn alu_rr(base: u8, a: &Register, b: &Register) -> CodeBytes {
    assert_eq!(a.size, b.size);
    let mut c = CodeBytes::new();
    if a.size == Size::Word {
        c.put1(0x66);
    }
    put_rex(
        &mut c,
        a.size == Size::Quadword,
        a.reg.enc(),
        0,
        b.reg.enc(),
        forces_rex(*a) || forces_rex(*b),
    );
    c.put1(base + a.size.w_bit());
    c.put1(encode_modrm(0b11, a.reg.enc(), b.reg.enc()));
    c
}

/// The `80/81/83 /ext` ALU forms with an immediate source and register
/// destination.
fn alu_ir(ext: u8, imm: &Immediate, dst: &Register) -> CodeBytes {
    assert!(imm.is_int());
    let mut c = CodeBytes::new();
    if dst.size == Size::Word {
        c.put1(0x66);
    }
    put_rex(
        &mut c,
        dst.size == Size::Quadword,
        0,
        0,
        dst.reg.enc(),
        forces_rex(*dst),
    );
    if dst.size == Size::Byte {
        c.put1(0x80);
        c.put1(encode_modrm(0b11, ext, dst.reg.enc()));
        put_int(&mut c, *imm, Size::Byte);
    } else if imm.fits_byte() {
        c.put1(0x83);
        c.put1(encode_modrm(0b11, ext, dst.reg.enc()));
        put_int(&mut c, *imm, Size::Byte);
    } else {
        assert!(imm.fits_32bit());
        c.put1(0x81);
        c.put1(encode_modrm(0b11, ext, dst.reg.enc()));
        put_int(&mut c, *imm, if dst.size == Size::Word { Size::Word } else { Size::Doubleword });
    }
    c
}

/// Same family, memory destination.
fn alu_im(sink: &mut dyn RelocSink, ext: u8, imm: &Immediate, dst: &Memory) -> CodeBytes {
    assert!(imm.is_int());
    // Trailing immediate bytes would skew a RIP-relative displacement.
    assert!(dst.addr.sym.is_none());
    let mut c = CodeBytes::new();
    if dst.size == Size::Word {
        c.put1(0x66);
    }
    put_rex(
        &mut c,
        dst.size == Size::Quadword,
        0,
        0,
        addr_base(&dst.addr),
        false,
    );
    if dst.size == Size::Byte {
        c.put1(0x80);
        put_addr(&mut c, sink, ext, &dst.addr);
        put_int(&mut c, *imm, Size::Byte);
    } else if imm.fits_byte() {
        c.put1(0x83);
        put_addr(&mut c, sink, ext, &dst.addr);
        put_int(&mut c, *imm, Size::Byte);
    } else {
        assert!(imm.fits_32bit());
        c.put1(0x81);
        put_addr(&mut c, sink, ext, &dst.addr);
        put_int(&mut c, *imm, if dst.size == Size::Word { Size::Word } else { Size::Doubleword });
    }
    c
}

/// The `F6/F7 /ext` unary group (not, mul, div).
fn unary_group(sink: &mut dyn RelocSink, ext: u8, op: &Operand) -> CodeBytes {
    let mut c = CodeBytes::new();
    match op {
        Operand::Reg(r) => {
            if r.size == Size::Word {
                c.put1(0x66);
            }
            put_rex(
                &mut c,
                r.size == Size::Quadword,
                0,
                0,
                r.reg.enc(),
                forces_rex(*r),
            );
            c.put1(0xF6 + r.size.w_bit());
            c.put1(encode_modrm(0b11, ext, r.reg.enc()));
        }
        Operand::Mem(m) => {
            if m.size == Size::Word {
                c.put1(0x66);
            }
            put_rex(
                &mut c,
                m.size == Size::Quadword,
                0,
                0,
                addr_base(&m.addr),
                false,
            );
            c.put1(0xF6 + m.size.w_bit());
            put_addr(&mut c, sink, ext, &m.addr);
        }
        _ => panic!("unsupported unary operand: {op:?}"),
    }
    c
}

/// The CL-implicit shift family, `D2/D3 /ext`. The source operand must be
/// CL; the shift count is implicit.
fn shift(ext: u8, src: &Register, dst: &Register) -> CodeBytes {
    assert!(src.reg == Gpr::Rcx && src.size == Size::Byte);
    let mut c = CodeBytes::new();
    if dst.size == Size::Word {
        c.put1(0x66);
    }
    put_rex(
        &mut c,
        dst.size == Size::Quadword,
        0,
        0,
        dst.reg.enc(),
        forces_rex(*dst),
    );
    c.put1(0xD2 + dst.size.w_bit());
    c.put1(encode_modrm(0b11, ext, dst.reg.enc()));
    c
}

fn setcc(cond: Cond, r: &Register) -> CodeBytes {
    assert_eq!(r.size, Size::Byte);
    let mut c = CodeBytes::new();
    put_rex(&mut c, false, 0, 0, r.reg.enc(), forces_rex(*r));
    c.put1(0x0F);
    c.put1(0x90 | cond.tttn());
    c.put1(encode_modrm(0b11, 0, r.reg.enc()));
    c
}

fn lea(sink: &mut dyn RelocSink, m: &Memory, dst: &Register) -> CodeBytes {
    assert_eq!(dst.size, Size::Quadword);
    let mut c = CodeBytes::new();
    put_rex(&mut c, true, dst.reg.enc(), 0, addr_base(&m.addr), false);
    c.put1(0x8D);
    put_addr(&mut c, sink, dst.reg.enc(), &m.addr);
    c
}

fn call(sink: &mut dyn RelocSink, op: &Operand) -> CodeBytes {
    let mut c = CodeBytes::new();
    match op {
        Operand::Imm(imm) => {
            let (sym, disp) = match imm.kind {
                ImmKind::Addr { sym, disp } => (sym, disp),
                ImmKind::Int(_) => panic!("call requires an address immediate"),
            };
            c.put1(0xE8);
            sink.reloc_text(sym, Reloc::X86PC32, c.len() as u32, disp);
            c.put4(0);
        }
        Operand::Reg(r) => {
            put_rex(&mut c, false, 0, 0, r.reg.enc(), false);
            c.put1(0xFF);
            c.put1(encode_modrm(0b11, 2, r.reg.enc()));
        }
        _ => panic!("unsupported call operand: {op:?}"),
    }
    c
}

/// PC-relative branch displacement: the target's resolved distance plus the
/// source-level addend, minus 4 because the displacement is counted from
/// the end of the 4-byte field.
fn branch_disp(sink: &mut dyn RelocSink, imm: &Immediate, field_offset: u32) -> i32 {
    let (sym, disp) = match imm.kind {
        ImmKind::Addr { sym, disp } => (sym, disp),
        ImmKind::Int(_) => panic!("branch requires an address immediate"),
    };
    sink.text_displacement(sym, field_offset) + disp as i32 - 4
}

fn jmp(sink: &mut dyn RelocSink, imm: &Immediate) -> CodeBytes {
    let mut c = CodeBytes::new();
    c.put1(0xE9);
    let disp = branch_disp(sink, imm, c.len() as u32);
    c.put4(disp as u32);
    c
}

fn jcc(sink: &mut dyn RelocSink, cond: Cond, imm: &Immediate) -> CodeBytes {
    let mut c = CodeBytes::new();
    c.put1(0x0F);
    c.put1(0x80 | cond.tttn());
    let disp = branch_disp(sink, imm, c.len() as u32);
    c.put4(disp as u32);
    c
}

/// Encode one instruction, recording relocations against the current text
/// position through `sink`. The caller appends the returned bytes to the
/// text section immediately afterwards.
pub fn encode(inst: &Inst, sink: &mut dyn RelocSink) -> CodeBytes {
    use Opcode::*;
    match (inst.opcode, &inst.src, &inst.dst) {
        (Mov, src, dst) => mov(sink, src, dst),
        (Movsx, Operand::Mem(m), Operand::Reg(r)) => movsx(sink, m, r),
        (Movzx, src, Operand::Reg(r)) => movzx(sink, src, r),
        (Movaps, Operand::XmmReg(x), Operand::Mem(m)) => movaps(sink, x, m),
        (Push, Operand::Reg(r), Operand::None) => push(r),

        (Add, Operand::Reg(a), Operand::Reg(b)) => alu_rr(0x00, a, b),
        (Add, Operand::Imm(i), Operand::Reg(r)) => alu_ir(0, i, r),
        (Add, Operand::Imm(i), Operand::Mem(m)) => alu_im(sink, 0, i, m),
        (Sub, Operand::Reg(a), Operand::Reg(b)) => alu_rr(0x28, a, b),
        (Sub, Operand::Imm(i), Operand::Reg(r)) => alu_ir(5, i, r),
        (Cmp, Operand::Reg(a), Operand::Reg(b)) => alu_rr(0x38, a, b),
        (Cmp, Operand::Imm(i), Operand::Reg(r)) => alu_ir(7, i, r),
        (And, Operand::Reg(a), Operand::Reg(b)) => alu_rr(0x20, a, b),
        (Or, Operand::Reg(a), Operand::Reg(b)) => alu_rr(0x08, a, b),
        (Xor, Operand::Reg(a), Operand::Reg(b)) => alu_rr(0x30, a, b),
        (Test, Operand::Reg(a), Operand::Reg(b)) => alu_rr(0x84, a, b),

        (Not, op, Operand::None) => unary_group(sink, 2, op),
        (Mul, op, Operand::None) => unary_group(sink, 4, op),
        (Div, op, Operand::None) => unary_group(sink, 6, op),

        (Shl, Operand::Reg(a), Operand::Reg(b)) => shift(4, a, b),
        (Shr, Operand::Reg(a), Operand::Reg(b)) => shift(5, a, b),
        (Sar, Operand::Reg(a), Operand::Reg(b)) => shift(7, a, b),

        (Setcc(cond), Operand::Reg(r), Operand::None) => setcc(cond, r),
        (Lea, Operand::Mem(m), Operand::Reg(r)) => lea(sink, m, r),
        (Call, op, Operand::None) => call(sink, op),
        (Jmp, Operand::Imm(i), Operand::None) => jmp(sink, i),
        (Jcc(cond), Operand::Imm(i), Operand::None) => jcc(sink, cond, i),

        (Leave, Operand::None, Operand::None) => {
            let mut c = CodeBytes::new();
            c.put1(0xC9);
            c
        }
        (Ret, Operand::None, Operand::None) => {
            // Near return only; same segment, no stack adjustment.
            let mut c = CodeBytes::new();
            c.put1(0xC3);
            c
        }
        (RepMovsq, Operand::None, Operand::None) => {
            let mut c = CodeBytes::new();
            c.put1(0xF3);
            c.put1(0x48);
            c.put1(0xA5);
            c
        }

        (opcode, src, dst) => {
            panic!("unsupported instruction: {opcode:?} {src}, {dst}")
        }
    }
}
