//! Instruction selection from the CFG-IR.
//!
//! A deliberately simple, non-optimizing lowering: every IR value lives in
//! memory (locals and temporaries in the RBP frame, globals and strings
//! RIP-relative), operations pass through RAX/RCX, and control flow turns
//! into `CMP` + `Jcc` against block labels. Calls follow the System V
//! classification computed by [`super::abi`].

use log::trace;

use crate::ir::{Block, BlockId, Definition, Op, Statement, Terminator, Var, VarKind};
use crate::obj::elf::ElfObject;
use crate::symtab::{Linkage, SymId, SymKind, SymbolTable};
use crate::types::{TypeId, TypePool};

use super::abi::{self, ParamClass, PARAM_INT_REGS, RET_INT_REGS};
use super::inst::{Address, Cond, Immediate, Inst, Memory, Opcode, Operand, Register};
use super::regs::{Gpr, Size};

pub struct Lower<'a> {
    pool: &'a TypePool,
    syms: &'a mut SymbolTable,
    elf: &'a mut ElfObject,
    /// Arguments staged by `Param` statements for the next `Call`.
    pending_args: Vec<Var>,
    /// Frame slot holding the hidden result pointer, when the return
    /// value is classified as Memory.
    ret_ptr_slot: Option<i32>,
    frame_size: i32,
}

fn width_of(pool: &TypePool, ty: TypeId) -> Size {
    let size = pool.size_of(ty);
    if size >= 8 || pool.is_pointer(ty) {
        Size::Quadword
    } else {
        Size::from_bytes(size)
    }
}

fn align_to(value: i32, alignment: i32) -> i32 {
    (value + alignment - 1) / alignment * alignment
}

impl<'a> Lower<'a> {
    pub fn new(pool: &'a TypePool, syms: &'a mut SymbolTable, elf: &'a mut ElfObject) -> Lower<'a> {
        Lower {
            pool,
            syms,
            elf,
            pending_args: Vec::new(),
            ret_ptr_slot: None,
            frame_size: 0,
        }
    }

    /// Lower one function definition into the text section.
    pub fn function(&mut self, def: &Definition) {
        let func_sym = def.sym;
        let func_ty = self.syms.get(func_sym).ty;
        assert!(self.pool.is_function(func_ty));
        trace!("lowering function '{}'", self.syms.get(func_sym).name);

        self.elf.begin_function(func_sym);
        let sig = abi::classify_signature(self.pool, func_ty);

        // Frame layout: saved register parameters and locals below RBP,
        // memory-class parameters above the return address.
        let mut disp: i32 = 0;
        let mut mem_offset: i32 = 16;
        if sig.ret[0] == ParamClass::Memory {
            disp -= 8;
            self.ret_ptr_slot = Some(disp);
        } else {
            self.ret_ptr_slot = None;
        }
        for (i, &param) in def.params.iter().enumerate() {
            let ty = self.syms.get(param).ty;
            let size = self.pool.size_of(ty) as i32;
            if sig.params[i][0] == ParamClass::Memory {
                self.syms.get_mut(param).stack_offset = mem_offset;
                mem_offset += align_to(size, 8);
            } else {
                // Register-passed aggregates are spilled one whole
                // eightbyte at a time; round the slot up accordingly.
                let size = if self.pool.is_scalar(ty) {
                    size
                } else {
                    align_to(size, 8)
                };
                let align = abi::sym_alignment(self.pool, self.syms, param) as i32;
                disp = -align_to(-disp + size, align);
                self.syms.get_mut(param).stack_offset = disp;
            }
        }
        for &local in &def.locals {
            let ty = self.syms.get(local).ty;
            let mut size = (self.pool.size_of(ty) as i32).max(1);
            if self.pool.is_struct_or_union(ty) {
                // Aggregates are read and written whole eightbytes at a
                // time when they travel through registers.
                size = align_to(size, 8);
            }
            let align = abi::sym_alignment(self.pool, self.syms, local) as i32;
            disp = -align_to(-disp + size, align);
            self.syms.get_mut(local).stack_offset = disp;
        }
        self.frame_size = align_to(-disp, 16);

        // Prologue.
        self.emit(Inst::unary(
            Opcode::Push,
            Operand::Reg(Register::new(Gpr::Rbp, Size::Quadword)),
        ));
        self.emit(Inst::rr(
            Opcode::Mov,
            Register::new(Gpr::Rsp, Size::Quadword),
            Register::new(Gpr::Rbp, Size::Quadword),
        ));
        if self.frame_size > 0 {
            self.emit(Inst::ir(
                Opcode::Sub,
                Immediate::int(self.frame_size as i64, Size::Doubleword),
                Register::new(Gpr::Rsp, Size::Quadword),
            ));
        }

        // Spill register parameters into their frame slots.
        let mut reg_idx = 0;
        if let Some(slot) = self.ret_ptr_slot {
            self.emit(Inst::rm(
                Opcode::Mov,
                Register::new(PARAM_INT_REGS[0], Size::Quadword),
                Memory {
                    addr: Address::base(Gpr::Rbp, slot),
                    size: Size::Quadword,
                },
            ));
            reg_idx = 1;
        }
        for (i, &param) in def.params.iter().enumerate() {
            if sig.params[i][0] == ParamClass::Memory {
                continue;
            }
            let ty = self.syms.get(param).ty;
            let slot = self.syms.get(param).stack_offset;
            let chunks = sig.params[i].len();
            if self.pool.is_scalar(ty) {
                let w = width_of(self.pool, ty);
                self.emit(Inst::rm(
                    Opcode::Mov,
                    Register::new(PARAM_INT_REGS[reg_idx], w),
                    Memory {
                        addr: Address::base(Gpr::Rbp, slot),
                        size: w,
                    },
                ));
            } else {
                for k in 0..chunks {
                    self.emit(Inst::rm(
                        Opcode::Mov,
                        Register::new(PARAM_INT_REGS[reg_idx + k], Size::Quadword),
                        Memory {
                            addr: Address::base(Gpr::Rbp, slot + 8 * k as i32),
                            size: Size::Quadword,
                        },
                    ));
                }
            }
            reg_idx += chunks;
        }

        // Emit reachable blocks in depth-first order; scratch blocks that
        // were never linked into the graph are skipped.
        let order = reachable_order(def);
        for (i, &block_id) in order.iter().enumerate() {
            let block = def.block(block_id);
            let next = order.get(i + 1).copied();
            self.lower_block(def, block, next);
        }
        self.elf.end_function(func_sym);
    }

    fn emit(&mut self, inst: Inst) {
        self.elf.emit_inst(&inst);
    }

    fn lower_block(&mut self, def: &Definition, block: &Block, next: Option<BlockId>) {
        self.elf.define_text_label(block.label);
        for stmt in &block.code {
            self.lower_stmt(stmt);
        }
        match &block.term {
            Terminator::Fall(dest) => {
                if next != Some(*dest) {
                    let label = def.block(*dest).label;
                    self.emit(Inst::unary(
                        Opcode::Jmp,
                        Operand::Imm(Immediate::addr(label, 0)),
                    ));
                }
            }
            Terminator::Branch {
                cond,
                then_dest,
                else_dest,
            } => {
                let w = width_of(self.pool, cond.ty);
                self.load(cond, Gpr::Rax, w);
                self.emit(Inst::ir(
                    Opcode::Cmp,
                    Immediate::int(0, Size::Byte),
                    Register::new(Gpr::Rax, w),
                ));
                let else_label = def.block(*else_dest).label;
                self.emit(Inst::unary(
                    Opcode::Jcc(Cond::Z),
                    Operand::Imm(Immediate::addr(else_label, 0)),
                ));
                if next != Some(*then_dest) {
                    let then_label = def.block(*then_dest).label;
                    self.emit(Inst::unary(
                        Opcode::Jmp,
                        Operand::Imm(Immediate::addr(then_label, 0)),
                    ));
                }
            }
            Terminator::Return(v) => {
                if self.ret_ptr_slot.is_some() {
                    self.copy_to_hidden_result(v);
                } else if self.pool.is_scalar(v.ty) {
                    let w = width_of(self.pool, v.ty);
                    self.load(v, Gpr::Rax, w);
                } else {
                    // Small aggregate returned in RAX:RDX.
                    let size = self.pool.size_of(v.ty);
                    self.addr_into(v, Gpr::Rsi);
                    for (k, &r) in RET_INT_REGS.iter().enumerate() {
                        if (k as u32) * 8 >= size {
                            break;
                        }
                        self.emit(Inst::mr(
                            Opcode::Mov,
                            Memory {
                                addr: Address::base(Gpr::Rsi, 8 * k as i32),
                                size: Size::Quadword,
                            },
                            Register::new(r, Size::Quadword),
                        ));
                    }
                }
                self.epilogue();
            }
            Terminator::Ret => {
                self.epilogue();
            }
        }
    }

    fn epilogue(&mut self) {
        self.emit(Inst::nullary(Opcode::Leave));
        self.emit(Inst::nullary(Opcode::Ret));
    }

    fn copy_to_hidden_result(&mut self, v: &Var) {
        let slot = self.ret_ptr_slot.unwrap();
        self.emit(Inst::mr(
            Opcode::Mov,
            Memory {
                addr: Address::base(Gpr::Rbp, slot),
                size: Size::Quadword,
            },
            Register::new(Gpr::Rdi, Size::Quadword),
        ));
        self.addr_into(v, Gpr::Rsi);
        self.copy_bytes(self.pool.size_of(v.ty));
        // The ABI requires the hidden pointer back in RAX.
        self.emit(Inst::mr(
            Opcode::Mov,
            Memory {
                addr: Address::base(Gpr::Rbp, slot),
                size: Size::Quadword,
            },
            Register::new(Gpr::Rax, Size::Quadword),
        ));
    }

    /// Storage address for a symbol: frame slot for locals, RIP-relative
    /// for everything placed in an object-file section.
    fn sym_address(&self, sym: SymId, offset: i32) -> Address {
        let s = self.syms.get(sym);
        let is_local_storage = s.linkage == Linkage::None
            && s.depth > 0
            && matches!(s.kind, SymKind::Definition | SymKind::Tentative);
        if is_local_storage {
            Address::base(Gpr::Rbp, s.stack_offset + offset)
        } else {
            Address::rip(sym, offset)
        }
    }

    /// Load the scalar value of `v` into register `r`, widening to `want`
    /// according to the signedness of `v`'s type.
    fn load(&mut self, v: &Var, r: Gpr, want: Size) {
        match v.kind {
            VarKind::Immediate => {
                let imm = match v.sym {
                    // The address of a string literal.
                    Some(sym) => Immediate::addr(sym, 0),
                    None => Immediate::int(v.imm, want),
                };
                self.emit(Inst::ir(Opcode::Mov, imm, Register::new(r, want)));
            }
            VarKind::Address => {
                let sym = v.sym.expect("address var without symbol");
                self.emit(Inst::mr(
                    Opcode::Lea,
                    Memory {
                        addr: self.sym_address(sym, v.offset),
                        size: Size::Quadword,
                    },
                    Register::new(r, Size::Quadword),
                ));
            }
            VarKind::Direct => {
                let sym = v.sym.expect("direct var without symbol");
                let addr = self.sym_address(sym, v.offset);
                self.load_mem(addr, self.pool.size_of(v.ty), !self.pool.is_unsigned(v.ty), r, want);
            }
            VarKind::Deref => {
                let sym = v.sym.expect("deref var without symbol");
                let addr = self.sym_address(sym, 0);
                self.emit(Inst::mr(
                    Opcode::Mov,
                    Memory {
                        addr,
                        size: Size::Quadword,
                    },
                    Register::new(r, Size::Quadword),
                ));
                self.load_mem(
                    Address::base(r, v.offset),
                    self.pool.size_of(v.ty),
                    !self.pool.is_unsigned(v.ty),
                    r,
                    want,
                );
            }
        }
    }

    /// Load `size` bytes at `addr` into `r`, extended to `want`.
    fn load_mem(&mut self, addr: Address, size: u32, signed: bool, r: Gpr, want: Size) {
        let have = Size::from_bytes(size.min(8));
        let mem = |s| Memory { addr, size: s };
        if have.bytes() >= want.bytes() {
            self.emit(Inst::mr(Opcode::Mov, mem(want), Register::new(r, want)));
        } else if signed {
            self.emit(Inst::mr(Opcode::Movsx, mem(have), Register::new(r, want)));
        } else if have == Size::Doubleword {
            // A 32-bit load implicitly zero-extends to 64 bits.
            self.emit(Inst::mr(
                Opcode::Mov,
                mem(Size::Doubleword),
                Register::new(r, Size::Doubleword),
            ));
        } else {
            self.emit(Inst::mr(Opcode::Movzx, mem(have), Register::new(r, want)));
        }
    }

    /// Store register `r` into the storage denoted by `v`.
    fn store(&mut self, v: &Var, r: Gpr) {
        let w = width_of(self.pool, v.ty);
        match v.kind {
            VarKind::Direct => {
                let sym = v.sym.expect("direct var without symbol");
                let addr = self.sym_address(sym, v.offset);
                self.emit(Inst::rm(
                    Opcode::Mov,
                    Register::new(r, w),
                    Memory { addr, size: w },
                ));
            }
            VarKind::Deref => {
                let sym = v.sym.expect("deref var without symbol");
                assert!(r != Gpr::R11);
                let addr = self.sym_address(sym, 0);
                self.emit(Inst::mr(
                    Opcode::Mov,
                    Memory {
                        addr,
                        size: Size::Quadword,
                    },
                    Register::new(Gpr::R11, Size::Quadword),
                ));
                self.emit(Inst::rm(
                    Opcode::Mov,
                    Register::new(r, w),
                    Memory {
                        addr: Address::base(Gpr::R11, v.offset),
                        size: w,
                    },
                ));
            }
            _ => panic!("store to non-lvalue operand: {v:?}"),
        }
    }

    /// Materialize the address of the storage denoted by `v` into `r`.
    fn addr_into(&mut self, v: &Var, r: Gpr) {
        match v.kind {
            VarKind::Direct => {
                let sym = v.sym.expect("direct var without symbol");
                self.emit(Inst::mr(
                    Opcode::Lea,
                    Memory {
                        addr: self.sym_address(sym, v.offset),
                        size: Size::Quadword,
                    },
                    Register::new(r, Size::Quadword),
                ));
            }
            VarKind::Deref => {
                let sym = v.sym.expect("deref var without symbol");
                self.emit(Inst::mr(
                    Opcode::Mov,
                    Memory {
                        addr: self.sym_address(sym, 0),
                        size: Size::Quadword,
                    },
                    Register::new(r, Size::Quadword),
                ));
                if v.offset != 0 {
                    self.emit(Inst::ir(
                        Opcode::Add,
                        Immediate::int(v.offset as i64, Size::Doubleword),
                        Register::new(r, Size::Quadword),
                    ));
                }
            }
            VarKind::Immediate if v.sym.is_some() => {
                // String literal storage.
                self.emit(Inst::mr(
                    Opcode::Lea,
                    Memory {
                        addr: Address::rip(v.sym.unwrap(), 0),
                        size: Size::Quadword,
                    },
                    Register::new(r, Size::Quadword),
                ));
            }
            _ => panic!("cannot take the address of {v:?}"),
        }
    }

    /// Copy `size` bytes from (RSI) to (RDI), clobbering RCX and RAX.
    fn copy_bytes(&mut self, size: u32) {
        let quads = size / 8;
        if quads > 0 {
            self.emit(Inst::ir(
                Opcode::Mov,
                Immediate::int(quads as i64, Size::Doubleword),
                Register::new(Gpr::Rcx, Size::Quadword),
            ));
            self.emit(Inst::nullary(Opcode::RepMovsq));
        }
        // rep movsq leaves RSI/RDI at the tail; mop up the remainder with
        // the widest loads that fit.
        let mut rem = size % 8;
        let mut off = 0i32;
        while rem > 0 {
            let step = if rem >= 4 {
                Size::Doubleword
            } else if rem >= 2 {
                Size::Word
            } else {
                Size::Byte
            };
            self.emit(Inst::mr(
                Opcode::Mov,
                Memory {
                    addr: Address::base(Gpr::Rsi, off),
                    size: step,
                },
                Register::new(Gpr::Rax, step),
            ));
            self.emit(Inst::rm(
                Opcode::Mov,
                Register::new(Gpr::Rax, step),
                Memory {
                    addr: Address::base(Gpr::Rdi, off),
                    size: step,
                },
            ));
            off += step.bytes() as i32;
            rem -= step.bytes();
        }
    }

    fn lower_stmt(&mut self, stmt: &Statement) {
        match stmt.op {
            Op::Assign => self.lower_assign(&stmt.target, &stmt.a),
            Op::Param => self.pending_args.push(stmt.a),
            Op::Call => self.lower_call(stmt),
            Op::Cast => {
                let w = width_of(self.pool, stmt.target.ty);
                self.load(&stmt.a, Gpr::Rax, w);
                self.store(&stmt.target, Gpr::Rax);
            }
            Op::Not => {
                let w = width_of(self.pool, stmt.target.ty);
                self.load(&stmt.a, Gpr::Rax, w);
                self.emit(Inst::unary(
                    Opcode::Not,
                    Operand::Reg(Register::new(Gpr::Rax, w)),
                ));
                self.store(&stmt.target, Gpr::Rax);
            }
            Op::Add | Op::Sub | Op::Mul | Op::And | Op::Or | Op::Xor => {
                let b = stmt.b.as_ref().expect("binary operation");
                let w = width_of(self.pool, stmt.target.ty);
                self.load(&stmt.a, Gpr::Rax, w);
                self.load(b, Gpr::Rcx, w);
                match stmt.op {
                    Op::Mul => self.emit(Inst::unary(
                        Opcode::Mul,
                        Operand::Reg(Register::new(Gpr::Rcx, w)),
                    )),
                    op => {
                        let opcode = match op {
                            Op::Add => Opcode::Add,
                            Op::Sub => Opcode::Sub,
                            Op::And => Opcode::And,
                            Op::Or => Opcode::Or,
                            Op::Xor => Opcode::Xor,
                            _ => unreachable!(),
                        };
                        self.emit(Inst::rr(
                            opcode,
                            Register::new(Gpr::Rcx, w),
                            Register::new(Gpr::Rax, w),
                        ));
                    }
                }
                self.store(&stmt.target, Gpr::Rax);
            }
            Op::Div | Op::Mod => {
                let b = stmt.b.as_ref().expect("binary operation");
                let w = width_of(self.pool, stmt.target.ty);
                self.load(&stmt.a, Gpr::Rax, w);
                self.load(b, Gpr::Rcx, w);
                self.emit(Inst::rr(
                    Opcode::Xor,
                    Register::new(Gpr::Rdx, Size::Quadword),
                    Register::new(Gpr::Rdx, Size::Quadword),
                ));
                self.emit(Inst::unary(
                    Opcode::Div,
                    Operand::Reg(Register::new(Gpr::Rcx, w)),
                ));
                let result = if stmt.op == Op::Div { Gpr::Rax } else { Gpr::Rdx };
                self.store(&stmt.target, result);
            }
            Op::Shl | Op::Shr => {
                let b = stmt.b.as_ref().expect("binary operation");
                let w = width_of(self.pool, stmt.target.ty);
                self.load(&stmt.a, Gpr::Rax, w);
                self.load(b, Gpr::Rcx, Size::Doubleword);
                let opcode = if stmt.op == Op::Shl {
                    Opcode::Shl
                } else if self.pool.is_unsigned(stmt.a.ty) {
                    Opcode::Shr
                } else {
                    Opcode::Sar
                };
                self.emit(Inst::rr(
                    opcode,
                    Register::new(Gpr::Rcx, Size::Byte),
                    Register::new(Gpr::Rax, w),
                ));
                self.store(&stmt.target, Gpr::Rax);
            }
            Op::Eq | Op::Ge | Op::Gt => {
                let b = stmt.b.as_ref().expect("binary operation");
                let w = width_of(self.pool, stmt.a.ty).bytes().max(
                    width_of(self.pool, b.ty).bytes(),
                );
                let w = Size::from_bytes(w);
                self.load(&stmt.a, Gpr::Rax, w);
                self.load(b, Gpr::Rcx, w);
                // Flags reflect a - b.
                self.emit(Inst::rr(
                    Opcode::Cmp,
                    Register::new(Gpr::Rcx, w),
                    Register::new(Gpr::Rax, w),
                ));
                let unsigned = self.pool.is_unsigned(stmt.a.ty)
                    || self.pool.is_unsigned(b.ty)
                    || self.pool.is_pointer(stmt.a.ty);
                let cond = match (stmt.op, unsigned) {
                    (Op::Eq, _) => Cond::Z,
                    (Op::Ge, false) => Cond::Ge,
                    (Op::Ge, true) => Cond::Ae,
                    (Op::Gt, false) => Cond::G,
                    (Op::Gt, true) => Cond::A,
                    _ => unreachable!(),
                };
                self.emit(Inst::unary(
                    Opcode::Setcc(cond),
                    Operand::Reg(Register::new(Gpr::Rax, Size::Byte)),
                ));
                self.emit(Inst::binary(
                    Opcode::Movzx,
                    Operand::Reg(Register::new(Gpr::Rax, Size::Byte)),
                    Operand::Reg(Register::new(Gpr::Rax, Size::Doubleword)),
                ));
                self.store(&stmt.target, Gpr::Rax);
            }
        }
    }

    fn lower_assign(&mut self, target: &Var, a: &Var) {
        let size = self.pool.size_of(target.ty);
        let scalar = self.pool.is_scalar(target.ty);
        if scalar {
            let w = width_of(self.pool, target.ty);
            self.load(a, Gpr::Rax, w);
            self.store(target, Gpr::Rax);
            return;
        }
        // Aggregate (or string-into-array) copy through RSI/RDI. A source
        // shorter than the target (string literal into a larger array)
        // zero-fills the whole object first.
        let copy = size.min(self.pool.size_of(a.ty));
        if copy < size {
            self.addr_into(target, Gpr::Rdi);
            self.emit(Inst::rr(
                Opcode::Xor,
                Register::new(Gpr::Rax, Size::Quadword),
                Register::new(Gpr::Rax, Size::Quadword),
            ));
            let mut off = 0u32;
            while off < size {
                let step = match size - off {
                    rem if rem >= 8 => Size::Quadword,
                    rem if rem >= 4 => Size::Doubleword,
                    rem if rem >= 2 => Size::Word,
                    _ => Size::Byte,
                };
                self.emit(Inst::rm(
                    Opcode::Mov,
                    Register::new(Gpr::Rax, step),
                    Memory {
                        addr: Address::base(Gpr::Rdi, off as i32),
                        size: step,
                    },
                ));
                off += step.bytes();
            }
        }
        self.addr_into(a, Gpr::Rsi);
        self.addr_into(target, Gpr::Rdi);
        self.copy_bytes(copy);
    }

    fn lower_call(&mut self, stmt: &Statement) {
        let args = std::mem::take(&mut self.pending_args);
        let callee = &stmt.a;
        let func_ty = if self.pool.is_function(callee.ty) {
            callee.ty
        } else {
            self.pool.deref(callee.ty)
        };
        let ret_ty = self.pool.base(func_ty).unwrap();
        let arg_tys: Vec<TypeId> = args.iter().map(|a| a.ty).collect();
        let call = abi::classify_call(self.pool, &arg_tys, ret_ty);

        // Memory-class arguments go on the stack, pushed right to left so
        // the leftmost lands at the lowest address.
        let mut pushed: i32 = 0;
        for (i, arg) in args.iter().enumerate().rev() {
            if call.params[i][0] != ParamClass::Memory {
                continue;
            }
            let size = align_to(self.pool.size_of(arg.ty) as i32, 8);
            if self.pool.is_scalar(arg.ty) {
                self.load(arg, Gpr::Rax, Size::Quadword);
                self.emit(Inst::unary(
                    Opcode::Push,
                    Operand::Reg(Register::new(Gpr::Rax, Size::Quadword)),
                ));
            } else {
                self.emit(Inst::ir(
                    Opcode::Sub,
                    Immediate::int(size as i64, Size::Doubleword),
                    Register::new(Gpr::Rsp, Size::Quadword),
                ));
                self.addr_into(arg, Gpr::Rsi);
                self.emit(Inst::rr(
                    Opcode::Mov,
                    Register::new(Gpr::Rsp, Size::Quadword),
                    Register::new(Gpr::Rdi, Size::Quadword),
                ));
                self.copy_bytes(self.pool.size_of(arg.ty));
            }
            pushed += size;
        }

        // Hidden pointer to the result slot.
        let mut reg_idx = 0;
        if call.ret[0] == ParamClass::Memory {
            self.addr_into(&stmt.target, PARAM_INT_REGS[0]);
            reg_idx = 1;
        }

        // Register arguments, left to right.
        for (i, arg) in args.iter().enumerate() {
            if call.params[i][0] == ParamClass::Memory {
                continue;
            }
            let chunks = call.params[i].len();
            if self.pool.is_scalar(arg.ty) {
                let w = width_of(self.pool, arg.ty);
                self.load(arg, PARAM_INT_REGS[reg_idx], w);
            } else {
                // The aggregate's eightbytes ride in consecutive
                // registers; stage the address in R11 first so loads
                // cannot clobber previously assigned argument registers.
                self.addr_into(arg, Gpr::R11);
                for k in 0..chunks {
                    self.emit(Inst::mr(
                        Opcode::Mov,
                        Memory {
                            addr: Address::base(Gpr::R11, 8 * k as i32),
                            size: Size::Quadword,
                        },
                        Register::new(PARAM_INT_REGS[reg_idx + k], Size::Quadword),
                    ));
                }
            }
            reg_idx += chunks;
        }

        if self.pool.is_vararg(func_ty) {
            // AL counts the vector registers used; none are.
            self.emit(Inst::rr(
                Opcode::Xor,
                Register::new(Gpr::Rax, Size::Doubleword),
                Register::new(Gpr::Rax, Size::Doubleword),
            ));
        }

        if self.pool.is_function(callee.ty) {
            let sym = callee.sym.expect("direct call without symbol");
            self.emit(Inst::unary(
                Opcode::Call,
                Operand::Imm(Immediate::addr(sym, 0)),
            ));
        } else {
            self.load(callee, Gpr::R10, Size::Quadword);
            self.emit(Inst::unary(
                Opcode::Call,
                Operand::Reg(Register::new(Gpr::R10, Size::Quadword)),
            ));
        }

        if pushed > 0 {
            self.emit(Inst::ir(
                Opcode::Add,
                Immediate::int(pushed as i64, Size::Doubleword),
                Register::new(Gpr::Rsp, Size::Quadword),
            ));
        }

        // Fetch the return value.
        if self.pool.is_void(ret_ty) || call.ret[0] == ParamClass::Memory {
            return;
        }
        if self.pool.is_scalar(ret_ty) {
            self.store(&stmt.target, Gpr::Rax);
        } else {
            self.addr_into(&stmt.target, Gpr::Rsi);
            let size = self.pool.size_of(ret_ty);
            for (k, &r) in RET_INT_REGS.iter().enumerate() {
                if (k as u32) * 8 >= size {
                    break;
                }
                self.emit(Inst::rm(
                    Opcode::Mov,
                    Register::new(r, Size::Quadword),
                    Memory {
                        addr: Address::base(Gpr::Rsi, 8 * k as i32),
                        size: Size::Quadword,
                    },
                ));
            }
        }
    }
}

/// Depth-first order over the blocks reachable from the entry; fall
/// targets are visited last so they tend to follow their predecessor.
fn reachable_order(def: &Definition) -> Vec<BlockId> {
    let mut order = Vec::new();
    let mut seen = vec![false; def.blocks.len()];
    let mut stack = vec![def.body];
    while let Some(id) = stack.pop() {
        if seen[id.index()] {
            continue;
        }
        seen[id.index()] = true;
        order.push(id);
        match &def.block(id).term {
            Terminator::Fall(next) => stack.push(*next),
            Terminator::Branch {
                then_dest,
                else_dest,
                ..
            } => {
                stack.push(*else_dest);
                stack.push(*then_dest);
            }
            Terminator::Return(_) | Terminator::Ret => {}
        }
    }
    order
}
