use crate::binemit::{NullRelocSink, Reloc};
use crate::symtab::SymbolTable;
use crate::types::TypePool;

use super::emit::encode;
use super::inst::*;
use super::regs::{Gpr, Size, Xmm};

fn reg(r: Gpr, size: Size) -> Register {
    Register::new(r, size)
}

fn frame(disp: i32, size: Size) -> Memory {
    Memory {
        addr: Address::base(Gpr::Rbp, disp),
        size,
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02X}")).collect()
}

#[test]
fn test_x64_binemit() {
    use Gpr::*;
    use Size::*;

    let mut insns: Vec<(Inst, &str, &str)> = Vec::new();

    // N.B.: expected bytes are little-endian, as they appear in the
    // object file. A quick way to double-check an entry:
    //
    //      echo "movl \$0x01020304, %eax" | as -o /tmp/t.o -- \
    //          && objdump -d /tmp/t.o

    insns.push((
        Inst::ir(Opcode::Mov, Immediate::int(0x0102_0304, Doubleword), reg(Rax, Doubleword)),
        "B804030201",
        "movl $0x1020304, %eax",
    ));
    insns.push((
        Inst::ir(Opcode::Mov, Immediate::int(0x0102_0304, Doubleword), reg(Rax, Quadword)),
        "48C7C004030201",
        "movq $0x1020304, %rax",
    ));
    insns.push((
        Inst::ir(Opcode::Mov, Immediate::int(5, Size::Byte), reg(Rcx, Size::Byte)),
        "B105",
        "movb $0x5, %cl",
    ));
    insns.push((
        Inst::ir(Opcode::Mov, Immediate::int(0x1234, Word), reg(Rax, Word)),
        "66B83412",
        "movw $0x1234, %ax",
    ));
    insns.push((
        Inst::ir(Opcode::Mov, Immediate::int(0x0012_3456_789A, Quadword), reg(Rax, Quadword)),
        "48B89A78563412000000",
        "movabsq $0x123456789a, %rax",
    ));
    insns.push((
        Inst::rr(Opcode::Mov, reg(Rax, Quadword), reg(Rcx, Quadword)),
        "4889C1",
        "movq %rax, %rcx",
    ));
    insns.push((
        Inst::rr(Opcode::Mov, reg(R8, Doubleword), reg(Rax, Doubleword)),
        "4489C0",
        "movl %r8d, %eax",
    ));
    insns.push((
        Inst::rr(Opcode::Mov, reg(Rsi, Size::Byte), reg(Rax, Size::Byte)),
        "4088F0",
        "movb %sil, %al",
    ));
    insns.push((
        Inst::rm(Opcode::Mov, reg(Rax, Doubleword), frame(-8, Doubleword)),
        "8945F8",
        "movl %eax, -8(%rbp)",
    ));
    insns.push((
        Inst::mr(Opcode::Mov, frame(-8, Quadword), reg(Rax, Quadword)),
        "488B45F8",
        "movq -8(%rbp), %rax",
    ));
    insns.push((
        Inst::rm(
            Opcode::Mov,
            reg(Rax, Doubleword),
            Memory { addr: Address::base(Rsp, 0), size: Doubleword },
        ),
        "890424",
        "movl %eax, (%rsp)",
    ));
    insns.push((
        Inst::rm(
            Opcode::Mov,
            reg(Rax, Doubleword),
            Memory { addr: Address::base(Rsp, 8), size: Doubleword },
        ),
        "89442408",
        "movl %eax, 8(%rsp)",
    ));
    insns.push((
        Inst::rm(
            Opcode::Mov,
            reg(Rax, Doubleword),
            Memory { addr: Address::base(Rbp, 0), size: Doubleword },
        ),
        "894500",
        "movl %eax, (%rbp)",
    ));
    insns.push((
        Inst::mr(Opcode::Movsx, frame(-1, Size::Byte), reg(Rax, Quadword)),
        "480FBE45FF",
        "movsbq -1(%rbp), %rax",
    ));
    insns.push((
        Inst::mr(Opcode::Movsx, frame(-4, Doubleword), reg(Rax, Quadword)),
        "486345FC",
        "movslq -4(%rbp), %rax",
    ));
    insns.push((
        Inst::mr(Opcode::Movzx, frame(-1, Size::Byte), reg(Rax, Doubleword)),
        "0FB645FF",
        "movzbl -1(%rbp), %eax",
    ));
    insns.push((
        Inst::rr(Opcode::Movzx, reg(Rax, Size::Byte), reg(Rax, Doubleword)),
        "0FB6C0",
        "movzbl %al, %eax",
    ));
    insns.push((
        Inst::unary(Opcode::Push, Operand::Reg(reg(Rbp, Quadword))),
        "55",
        "pushq %rbp",
    ));
    insns.push((
        Inst::unary(Opcode::Push, Operand::Reg(reg(R12, Quadword))),
        "4154",
        "pushq %r12",
    ));
    insns.push((
        Inst::rr(Opcode::Add, reg(Rcx, Doubleword), reg(Rax, Doubleword)),
        "01C8",
        "addl %ecx, %eax",
    ));
    insns.push((
        Inst::ir(Opcode::Add, Immediate::int(8, Size::Byte), reg(Rsp, Quadword)),
        "4883C408",
        "addq $8, %rsp",
    ));
    insns.push((
        Inst::ir(Opcode::Sub, Immediate::int(16, Size::Byte), reg(Rsp, Quadword)),
        "4883EC10",
        "subq $16, %rsp",
    ));
    insns.push((
        Inst::ir(Opcode::Sub, Immediate::int(0x0001_2345, Doubleword), reg(Rsp, Quadword)),
        "4881EC45230100",
        "subq $0x12345, %rsp",
    ));
    insns.push((
        Inst::rr(Opcode::Sub, reg(Rcx, Quadword), reg(Rax, Quadword)),
        "4829C8",
        "subq %rcx, %rax",
    ));
    insns.push((
        Inst::ir(Opcode::Cmp, Immediate::int(0, Size::Byte), reg(Rax, Doubleword)),
        "83F800",
        "cmpl $0, %eax",
    ));
    insns.push((
        Inst::ir(Opcode::Cmp, Immediate::int(1, Size::Byte), reg(Rax, Quadword)),
        "4883F801",
        "cmpq $1, %rax",
    ));
    insns.push((
        Inst::ir(Opcode::Cmp, Immediate::int(0x1234_5678, Doubleword), reg(Rax, Quadword)),
        "4881F878563412",
        "cmpq $0x12345678, %rax",
    ));
    insns.push((
        Inst::rr(Opcode::Cmp, reg(Rcx, Doubleword), reg(Rax, Doubleword)),
        "39C8",
        "cmpl %ecx, %eax",
    ));
    insns.push((
        Inst::rr(Opcode::Xor, reg(Rax, Doubleword), reg(Rax, Doubleword)),
        "31C0",
        "xorl %eax, %eax",
    ));
    insns.push((
        Inst::rr(Opcode::Xor, reg(Rdx, Quadword), reg(Rdx, Quadword)),
        "4831D2",
        "xorq %rdx, %rdx",
    ));
    insns.push((
        Inst::rr(Opcode::And, reg(Rcx, Doubleword), reg(Rax, Doubleword)),
        "21C8",
        "andl %ecx, %eax",
    ));
    insns.push((
        Inst::rr(Opcode::Or, reg(Rcx, Doubleword), reg(Rax, Doubleword)),
        "09C8",
        "orl %ecx, %eax",
    ));
    insns.push((
        Inst::rr(Opcode::Test, reg(Rax, Size::Byte), reg(Rax, Size::Byte)),
        "84C0",
        "testb %al, %al",
    ));
    insns.push((
        Inst::unary(Opcode::Not, Operand::Reg(reg(Rax, Doubleword))),
        "F7D0",
        "notl %eax",
    ));
    insns.push((
        Inst::unary(Opcode::Mul, Operand::Reg(reg(Rcx, Quadword))),
        "48F7E1",
        "mulq %rcx",
    ));
    insns.push((
        Inst::unary(Opcode::Div, Operand::Reg(reg(Rcx, Doubleword))),
        "F7F1",
        "divl %ecx",
    ));
    insns.push((
        Inst::rr(Opcode::Shl, reg(Rcx, Size::Byte), reg(Rax, Doubleword)),
        "D3E0",
        "shll %cl, %eax",
    ));
    insns.push((
        Inst::rr(Opcode::Shr, reg(Rcx, Size::Byte), reg(Rax, Quadword)),
        "48D3E8",
        "shrq %cl, %rax",
    ));
    insns.push((
        Inst::rr(Opcode::Sar, reg(Rcx, Size::Byte), reg(Rax, Doubleword)),
        "D3F8",
        "sarl %cl, %eax",
    ));
    insns.push((
        Inst::unary(Opcode::Setcc(Cond::Z), Operand::Reg(reg(Rax, Size::Byte))),
        "0F94C0",
        "sete %al",
    ));
    insns.push((
        Inst::unary(Opcode::Setcc(Cond::G), Operand::Reg(reg(Rax, Size::Byte))),
        "0F9FC0",
        "setg %al",
    ));
    insns.push((
        Inst::unary(Opcode::Setcc(Cond::Ae), Operand::Reg(reg(Rax, Size::Byte))),
        "0F93C0",
        "setae %al",
    ));
    insns.push((
        Inst::mr(Opcode::Lea, frame(-8, Quadword), reg(Rax, Quadword)),
        "488D45F8",
        "leaq -8(%rbp), %rax",
    ));
    insns.push((
        Inst::unary(Opcode::Call, Operand::Reg(reg(Rax, Quadword))),
        "FFD0",
        "callq *%rax",
    ));
    insns.push((Inst::nullary(Opcode::Leave), "C9", "leave"));
    insns.push((Inst::nullary(Opcode::Ret), "C3", "retq"));
    insns.push((Inst::nullary(Opcode::RepMovsq), "F348A5", "rep movsq"));

    for (inst, expected, asm) in insns {
        let mut sink = NullRelocSink::default();
        let code = encode(&inst, &mut sink);
        assert!(code.len() <= 15);
        assert_eq!(hex(code.as_slice()), expected, "wrong encoding for: {asm}");
    }
}

#[test]
fn rip_relative_load_records_reloc() {
    let mut pool = TypePool::new();
    let mut table = SymbolTable::new();
    let sym = table.create_string(&mut pool, "x");

    let inst = Inst::mr(
        Opcode::Mov,
        Memory {
            addr: Address::rip(sym, 0),
            size: Size::Doubleword,
        },
        Register::new(Gpr::Rax, Size::Doubleword),
    );
    let mut sink = NullRelocSink::default();
    let code = encode(&inst, &mut sink);
    assert_eq!(hex(code.as_slice()), "8B0500000000");
    assert_eq!(sink.relocs, vec![(sym, Reloc::X86PC32, 2, 0)]);
}

#[test]
fn address_immediate_records_abs32s() {
    let mut pool = TypePool::new();
    let mut table = SymbolTable::new();
    let sym = table.create_string(&mut pool, "x");

    let inst = Inst::ir(
        Opcode::Mov,
        Immediate::addr(sym, 0),
        Register::new(Gpr::Rax, Size::Quadword),
    );
    let mut sink = NullRelocSink::default();
    let code = encode(&inst, &mut sink);
    assert_eq!(hex(code.as_slice()), "48C7C000000000");
    assert_eq!(sink.relocs, vec![(sym, Reloc::X86Abs32S, 3, 0)]);
}

#[test]
fn call_direct_records_pc32() {
    let pool = TypePool::new();
    let mut table = SymbolTable::new();
    let sym = table.create_label(&pool);

    let inst = Inst::unary(Opcode::Call, Operand::Imm(Immediate::addr(sym, 0)));
    let mut sink = NullRelocSink::default();
    let code = encode(&inst, &mut sink);
    assert_eq!(hex(code.as_slice()), "E800000000");
    assert_eq!(sink.relocs, vec![(sym, Reloc::X86PC32, 1, 0)]);
}

#[test]
fn branch_displacement_bias() {
    let pool = TypePool::new();
    let mut table = SymbolTable::new();
    let label = table.create_label(&pool);

    // With an unresolved target the sink reports displacement 0 and the
    // encoder's own -4 bias is all that lands in the field.
    let mut sink = NullRelocSink::default();
    let code = encode(
        &Inst::unary(Opcode::Jmp, Operand::Imm(Immediate::addr(label, 0))),
        &mut sink,
    );
    assert_eq!(hex(code.as_slice()), "E9FCFFFFFF");

    let code = encode(
        &Inst::unary(Opcode::Jcc(Cond::Z), Operand::Imm(Immediate::addr(label, 0))),
        &mut sink,
    );
    assert_eq!(hex(code.as_slice()), "0F84FCFFFFFF");
}

#[test]
fn sse_register_store() {
    let inst = Inst::binary(
        Opcode::Movaps,
        Operand::XmmReg(Xmm::new(0)),
        Operand::Mem(frame(-16, Size::Quadword)),
    );
    let mut sink = NullRelocSink::default();
    let code = encode(&inst, &mut sink);
    assert_eq!(hex(code.as_slice()), "0F2945F0");
}
