//! Expressions and statements, lowered to three-address IR.
//!
//! Expression routines take the current insertion block and return the
//! (possibly advanced) block plus the value computed; short-circuit
//! operators and conditionals advance the block by building CFG edges.
//! Operations on immediate operands fold at parse time, which is what
//! makes file-scope initializers and array dimensions work without any
//! backend involvement.

use crate::error::{CompileResult, Location};
use crate::ir::{BlockId, Op, Terminator, Var, VarKind};
use crate::symtab::SymKind;
use crate::types::TypeId;

use super::lexer::TokKind;
use super::Parser;

impl Parser {
    /// Evaluate a constant integer expression, e.g. an array dimension or
    /// enumerator value. Scratch blocks created along the way stay
    /// unreachable and are never emitted.
    pub(crate) fn constant_expression(&mut self) -> CompileResult<i64> {
        let loc = self.toks.loc();
        let block = self.new_block();
        let (_, value) = self.conditional_expression(block)?;
        if !value.is_constant() {
            return err!(loc, "expression is not a constant expression");
        }
        Ok(value.imm)
    }

    pub(crate) fn expression(&mut self, block: BlockId) -> CompileResult<(BlockId, Var)> {
        self.assignment_expression(block)
    }

    // -----------------------------------------------------------------
    // Value plumbing.

    /// Array values decay to a pointer to their first element.
    fn decay(&mut self, v: Var) -> Var {
        if !self.types.is_array(v.ty) {
            return v;
        }
        let elem = {
            let ty = self.types.unwrapped(v.ty);
            self.types.base(ty).unwrap()
        };
        let pty = self.types.pointer_to(elem);
        match v.kind {
            VarKind::Direct => Var {
                kind: VarKind::Address,
                sym: v.sym,
                ty: pty,
                offset: v.offset,
                lvalue: false,
                imm: 0,
            },
            // A string literal is already the address of its storage.
            VarKind::Immediate => Var { ty: pty, ..v },
            _ => Var { ty: pty, ..v },
        }
    }

    /// Convert `v` to type `to`, emitting a width cast when needed.
    pub(crate) fn convert(
        &mut self,
        loc: Location,
        block: BlockId,
        v: Var,
        to: TypeId,
    ) -> CompileResult<Var> {
        if self.types.type_equal(v.ty, to) {
            return Ok(v);
        }
        // String literal into a char array target; the assignment copies
        // the contents.
        if self.types.is_array(to) && self.is_string(&v) {
            if self.types.size_of(v.ty) > self.types.size_of(to) {
                return err!(loc, "initializer string is too long");
            }
            return Ok(v);
        }
        let v = self.decay(v);
        if self.types.is_real(v.ty) || self.types.is_real(to) {
            return err!(loc, "floating-point conversion is not supported");
        }
        // A function designator decays to a pointer to the function.
        if self.types.is_function(v.ty)
            && self.types.is_pointer(to)
            && self.types.type_equal(self.types.deref(to), v.ty)
        {
            return Ok(Var {
                kind: VarKind::Address,
                ty: to,
                lvalue: false,
                ..v
            });
        }

        let from_scalar = self.types.is_scalar(v.ty);
        let to_scalar = self.types.is_scalar(to);
        if !from_scalar || !to_scalar {
            if self.types.type_equal(v.ty, to) {
                return Ok(v);
            }
            return err!(
                loc,
                "cannot convert '{}' to '{}'",
                self.types.display(v.ty),
                self.types.display(to)
            );
        }

        if v.is_constant() {
            // Re-type the constant, truncating to the target width.
            let width = self.types.size_of(to);
            let value = if width < 8 {
                let bits = width * 8;
                let mask = (1i64 << bits) - 1;
                let t = v.imm & mask;
                if !self.types.is_unsigned(to) && t >> (bits - 1) != 0 {
                    t | !mask
                } else {
                    t
                }
            } else {
                v.imm
            };
            return Ok(Var::immediate(to, value));
        }

        if self.types.is_pointer(v.ty) && self.types.is_pointer(to) {
            return Ok(Var { ty: to, ..v });
        }
        if self.types.size_of(v.ty) == self.types.size_of(to)
            && self.types.is_integer(v.ty) == self.types.is_integer(to)
        {
            return Ok(Var { ty: to, ..v });
        }

        let target = self.create_temp_var(loc, to)?;
        self.emit(block, target, Op::Cast, v, None);
        Ok(target)
    }

    /// `&v`.
    fn eval_addr(&mut self, loc: Location, block: BlockId, v: Var) -> CompileResult<Var> {
        let pty = self.types.pointer_to(v.ty);
        match v.kind {
            VarKind::Direct => Ok(Var {
                kind: VarKind::Address,
                sym: v.sym,
                ty: pty,
                offset: v.offset,
                lvalue: false,
                imm: 0,
            }),
            VarKind::Deref => {
                let sym = v.sym.expect("deref carries a pointer symbol");
                let ptr = Var::direct(sym, pty);
                if v.offset == 0 {
                    Ok(Var { lvalue: false, ..ptr })
                } else {
                    let off = Var::immediate(self.types.long_, v.offset as i64);
                    let target = self.create_temp_var(loc, pty)?;
                    self.emit(block, target, Op::Add, ptr, Some(off));
                    Ok(target)
                }
            }
            _ => err!(loc, "lvalue required as unary '&' operand"),
        }
    }

    /// `*v` for a pointer-typed value.
    fn eval_deref(&mut self, loc: Location, block: BlockId, v: Var) -> CompileResult<Var> {
        let v = self.decay(v);
        if !self.types.is_pointer(v.ty) {
            return err!(
                loc,
                "invalid operand of unary '*', was '{}'",
                self.types.display(v.ty)
            );
        }
        let pointee = self.types.deref(v.ty);
        match v.kind {
            // Dereferencing the address of an object lands back on the
            // object.
            VarKind::Address => Ok(Var {
                kind: VarKind::Direct,
                sym: v.sym,
                ty: pointee,
                offset: v.offset,
                lvalue: true,
                imm: 0,
            }),
            VarKind::Direct if v.offset == 0 => Ok(Var {
                kind: VarKind::Deref,
                sym: v.sym,
                ty: pointee,
                offset: 0,
                lvalue: true,
                imm: 0,
            }),
            _ => {
                // Load the pointer into a temporary first.
                let tmp = self.create_temp_var(loc, v.ty)?;
                self.emit(block, tmp, Op::Assign, v, None);
                Ok(Var {
                    kind: VarKind::Deref,
                    sym: tmp.sym,
                    ty: pointee,
                    offset: 0,
                    lvalue: true,
                    imm: 0,
                })
            }
        }
    }

    fn fold(&self, loc: Location, op: Op, ty: TypeId, a: i64, b: i64) -> CompileResult<Var> {
        let unsigned = self.types.is_unsigned(ty);
        let value = match op {
            Op::Add => a.wrapping_add(b),
            Op::Sub => a.wrapping_sub(b),
            Op::Mul => a.wrapping_mul(b),
            Op::Div | Op::Mod => {
                if b == 0 {
                    return err!(loc, "division by zero in constant expression");
                }
                if op == Op::Div {
                    a.wrapping_div(b)
                } else {
                    a.wrapping_rem(b)
                }
            }
            Op::And => a & b,
            Op::Or => a | b,
            Op::Xor => a ^ b,
            Op::Shl => a.wrapping_shl(b as u32),
            Op::Shr => {
                if unsigned {
                    ((a as u64).wrapping_shr(b as u32)) as i64
                } else {
                    a.wrapping_shr(b as u32)
                }
            }
            Op::Eq => return Ok(Var::immediate(self.types.int_, (a == b) as i64)),
            Op::Ge => {
                let r = if unsigned { (a as u64) >= (b as u64) } else { a >= b };
                return Ok(Var::immediate(self.types.int_, r as i64));
            }
            Op::Gt => {
                let r = if unsigned { (a as u64) > (b as u64) } else { a > b };
                return Ok(Var::immediate(self.types.int_, r as i64));
            }
            _ => unreachable!("fold of non-binary operation"),
        };
        Ok(Var::immediate(ty, value))
    }

    /// Evaluate `a <op> b`: type-check, fold immediates, or emit a
    /// statement assigning a fresh temporary.
    fn eval_binop(
        &mut self,
        loc: Location,
        block: BlockId,
        op: Op,
        lhs: Var,
        rhs: Var,
    ) -> CompileResult<Var> {
        let mut lhs = self.decay(lhs);
        let mut rhs = self.decay(rhs);

        if self.types.is_real(lhs.ty) || self.types.is_real(rhs.ty) {
            return err!(loc, "floating-point arithmetic is not supported");
        }

        let lptr = self.types.is_pointer(lhs.ty);
        let rptr = self.types.is_pointer(rhs.ty);

        // Pointer arithmetic: scale the integer operand by the element
        // size.
        if (lptr || rptr) && matches!(op, Op::Add | Op::Sub) {
            if lptr && rptr {
                if op != Op::Sub {
                    return err!(loc, "invalid operands to pointer arithmetic");
                }
                let elem = self.types.deref(lhs.ty);
                let elem_size = self.types.size_of(elem) as i64;
                let long_ = self.types.long_;
                let diff = self.eval_arith(loc, block, Op::Sub, long_, lhs, rhs)?;
                let size = Var::immediate(long_, elem_size);
                return self.eval_arith(loc, block, Op::Div, long_, diff, size);
            }
            let (ptr, int) = if lptr { (lhs, rhs) } else { (rhs, lhs) };
            if !self.types.is_integer(int.ty) {
                return err!(loc, "invalid operands to pointer arithmetic");
            }
            let elem = self.types.deref(ptr.ty);
            let elem_size = self.types.size_of(elem) as i64;
            let long_ = self.types.long_;
            let size = Var::immediate(long_, elem_size);
            let scaled = self.eval_arith(loc, block, Op::Mul, long_, int, size)?;
            return self.eval_arith(loc, block, op, ptr.ty, ptr, scaled);
        }

        match op {
            Op::Eq | Op::Ge | Op::Gt => {
                if lptr || rptr {
                    // Pointers compare directly; null constants adapt.
                    let int_ = self.types.int_;
                    return self.eval_arith(loc, block, op, int_, lhs, rhs);
                }
                if !self.types.is_integer(lhs.ty) || !self.types.is_integer(rhs.ty) {
                    return err!(loc, "invalid operands to comparison");
                }
                let common = self.types.usual_arithmetic_conversion(lhs.ty, rhs.ty);
                lhs = self.convert(loc, block, lhs, common)?;
                rhs = self.convert(loc, block, rhs, common)?;
                let int_ = self.types.int_;
                self.eval_arith(loc, block, op, int_, lhs, rhs)
            }
            Op::Shl | Op::Shr => {
                if !self.types.is_integer(lhs.ty) || !self.types.is_integer(rhs.ty) {
                    return err!(loc, "invalid operands to shift");
                }
                let result = self.types.promote_integer(lhs.ty);
                lhs = self.convert(loc, block, lhs, result)?;
                self.eval_arith(loc, block, op, result, lhs, rhs)
            }
            _ => {
                if !self.types.is_integer(lhs.ty) || !self.types.is_integer(rhs.ty) {
                    return err!(
                        loc,
                        "invalid operands '{}' and '{}'",
                        self.types.display(lhs.ty),
                        self.types.display(rhs.ty)
                    );
                }
                let common = self.types.usual_arithmetic_conversion(lhs.ty, rhs.ty);
                lhs = self.convert(loc, block, lhs, common)?;
                rhs = self.convert(loc, block, rhs, common)?;
                self.eval_arith(loc, block, op, common, lhs, rhs)
            }
        }
    }

    /// Emit (or fold) a single arithmetic statement with a known result
    /// type.
    fn eval_arith(
        &mut self,
        loc: Location,
        block: BlockId,
        op: Op,
        result_ty: TypeId,
        a: Var,
        b: Var,
    ) -> CompileResult<Var> {
        if a.is_constant() && b.is_constant() {
            return self.fold(loc, op, result_ty, a.imm, b.imm);
        }
        let target = self.create_temp_var(loc, result_ty)?;
        self.emit(block, target, op, a, Some(b));
        Ok(target)
    }

    /// Normalize a value to 0 or 1.
    fn bool_value(&mut self, loc: Location, block: BlockId, v: Var) -> CompileResult<Var> {
        if v.is_constant() {
            let int_ = self.types.int_;
            return Ok(Var::immediate(int_, (v.imm != 0) as i64));
        }
        let zero = Var::immediate(self.types.int_, 0);
        let is_zero = self.eval_binop(loc, block, Op::Eq, v, zero)?;
        let zero = Var::immediate(self.types.int_, 0);
        self.eval_binop(loc, block, Op::Eq, is_zero, zero)
    }

    // -----------------------------------------------------------------
    // Expression grammar, lowest precedence first.

    pub(crate) fn assignment_expression(
        &mut self,
        block: BlockId,
    ) -> CompileResult<(BlockId, Var)> {
        let loc = self.toks.loc();
        let (block, lhs) = self.conditional_expression(block)?;
        if !self.toks.at(TokKind::Assign) {
            return Ok((block, lhs));
        }
        self.toks.consume(TokKind::Assign)?;
        if !lhs.lvalue || !matches!(lhs.kind, VarKind::Direct | VarKind::Deref) {
            return err!(loc, "lvalue required as left operand of assignment");
        }
        if self.types.qualifiers(lhs.ty).is_const() {
            return err!(loc, "assignment of read-only location");
        }
        let (block, rhs) = self.assignment_expression(block)?;
        let rhs = self.convert(loc, block, rhs, lhs.ty)?;
        self.emit(block, lhs, Op::Assign, rhs, None);
        Ok((block, Var { lvalue: false, ..lhs }))
    }

    fn conditional_expression(&mut self, block: BlockId) -> CompileResult<(BlockId, Var)> {
        let loc = self.toks.loc();
        let (block, cond) = self.logical_or_expression(block)?;
        if !self.toks.at(TokKind::Question) {
            return Ok((block, cond));
        }
        self.toks.consume(TokKind::Question)?;

        let then_block = self.new_block();
        let (then_end, then_val) = self.expression(then_block)?;
        self.toks.consume(TokKind::Colon)?;
        let else_block = self.new_block();
        let (else_end, else_val) = self.conditional_expression(else_block)?;

        if cond.is_constant() && then_val.is_constant() && else_val.is_constant() {
            let v = if cond.imm != 0 { then_val } else { else_val };
            return Ok((block, v));
        }

        let result_ty = if self.types.is_integer(then_val.ty)
            && self.types.is_integer(else_val.ty)
        {
            self.types
                .usual_arithmetic_conversion(then_val.ty, else_val.ty)
        } else {
            then_val.ty
        };
        let target = self.create_temp_var(loc, result_ty)?;
        let join = self.new_block();

        let v = self.convert(loc, then_end, then_val, result_ty)?;
        self.emit(then_end, target, Op::Assign, v, None);
        let v = self.convert(loc, else_end, else_val, result_ty)?;
        self.emit(else_end, target, Op::Assign, v, None);

        let owner = self.owner_mut();
        owner.block_mut(block).term = Terminator::Branch {
            cond,
            then_dest: then_block,
            else_dest: else_block,
        };
        owner.block_mut(then_end).term = Terminator::Fall(join);
        owner.block_mut(else_end).term = Terminator::Fall(join);
        Ok((join, Var { lvalue: false, ..target }))
    }

    fn logical_or_expression(&mut self, block: BlockId) -> CompileResult<(BlockId, Var)> {
        let (mut block, mut lhs) = self.logical_and_expression(block)?;
        while self.toks.at(TokKind::PipePipe) {
            let loc = self.toks.loc();
            self.toks.consume(TokKind::PipePipe)?;
            let rhs_block = self.new_block();
            let (rhs_end, rhs) = self.logical_and_expression(rhs_block)?;

            if lhs.is_constant() && rhs.is_constant() {
                let int_ = self.types.int_;
                lhs = Var::immediate(int_, (lhs.imm != 0 || rhs.imm != 0) as i64);
                continue;
            }

            let int_ = self.types.int_;
            let target = self.create_temp_var(loc, int_)?;
            let true_block = self.new_block();
            let one = Var::immediate(int_, 1);
            self.emit(true_block, target, Op::Assign, one, None);
            let truth = self.bool_value(loc, rhs_end, rhs)?;
            self.emit(rhs_end, target, Op::Assign, truth, None);

            let join = self.new_block();
            let owner = self.owner_mut();
            owner.block_mut(block).term = Terminator::Branch {
                cond: lhs,
                then_dest: true_block,
                else_dest: rhs_block,
            };
            owner.block_mut(true_block).term = Terminator::Fall(join);
            owner.block_mut(rhs_end).term = Terminator::Fall(join);
            block = join;
            lhs = Var { lvalue: false, ..target };
        }
        Ok((block, lhs))
    }

    fn logical_and_expression(&mut self, block: BlockId) -> CompileResult<(BlockId, Var)> {
        let (mut block, mut lhs) = self.inclusive_or_expression(block)?;
        while self.toks.at(TokKind::AmpAmp) {
            let loc = self.toks.loc();
            self.toks.consume(TokKind::AmpAmp)?;
            let rhs_block = self.new_block();
            let (rhs_end, rhs) = self.inclusive_or_expression(rhs_block)?;

            if lhs.is_constant() && rhs.is_constant() {
                let int_ = self.types.int_;
                lhs = Var::immediate(int_, (lhs.imm != 0 && rhs.imm != 0) as i64);
                continue;
            }

            let int_ = self.types.int_;
            let target = self.create_temp_var(loc, int_)?;
            let false_block = self.new_block();
            let zero = Var::immediate(int_, 0);
            self.emit(false_block, target, Op::Assign, zero, None);
            let truth = self.bool_value(loc, rhs_end, rhs)?;
            self.emit(rhs_end, target, Op::Assign, truth, None);

            let join = self.new_block();
            let owner = self.owner_mut();
            owner.block_mut(block).term = Terminator::Branch {
                cond: lhs,
                then_dest: rhs_block,
                else_dest: false_block,
            };
            owner.block_mut(false_block).term = Terminator::Fall(join);
            owner.block_mut(rhs_end).term = Terminator::Fall(join);
            block = join;
            lhs = Var { lvalue: false, ..target };
        }
        Ok((block, lhs))
    }

    fn inclusive_or_expression(&mut self, block: BlockId) -> CompileResult<(BlockId, Var)> {
        let (mut block, mut lhs) = self.exclusive_or_expression(block)?;
        while self.toks.at(TokKind::Pipe) {
            let loc = self.toks.loc();
            self.toks.consume(TokKind::Pipe)?;
            let (b, rhs) = self.exclusive_or_expression(block)?;
            block = b;
            lhs = self.eval_binop(loc, block, Op::Or, lhs, rhs)?;
        }
        Ok((block, lhs))
    }

    fn exclusive_or_expression(&mut self, block: BlockId) -> CompileResult<(BlockId, Var)> {
        let (mut block, mut lhs) = self.and_expression(block)?;
        while self.toks.at(TokKind::Caret) {
            let loc = self.toks.loc();
            self.toks.consume(TokKind::Caret)?;
            let (b, rhs) = self.and_expression(block)?;
            block = b;
            lhs = self.eval_binop(loc, block, Op::Xor, lhs, rhs)?;
        }
        Ok((block, lhs))
    }

    fn and_expression(&mut self, block: BlockId) -> CompileResult<(BlockId, Var)> {
        let (mut block, mut lhs) = self.equality_expression(block)?;
        while self.toks.at(TokKind::Amp) {
            let loc = self.toks.loc();
            self.toks.consume(TokKind::Amp)?;
            let (b, rhs) = self.equality_expression(block)?;
            block = b;
            lhs = self.eval_binop(loc, block, Op::And, lhs, rhs)?;
        }
        Ok((block, lhs))
    }

    fn equality_expression(&mut self, block: BlockId) -> CompileResult<(BlockId, Var)> {
        let (mut block, mut lhs) = self.relational_expression(block)?;
        loop {
            let negate = match self.toks.peek().kind {
                TokKind::EqEq => false,
                TokKind::Ne => true,
                _ => return Ok((block, lhs)),
            };
            let loc = self.toks.loc();
            self.toks.next();
            let (b, rhs) = self.relational_expression(block)?;
            block = b;
            lhs = self.eval_binop(loc, block, Op::Eq, lhs, rhs)?;
            if negate {
                // a != b is !(a == b).
                let zero = Var::immediate(self.types.int_, 0);
                lhs = self.eval_binop(loc, block, Op::Eq, lhs, zero)?;
            }
        }
    }

    fn relational_expression(&mut self, block: BlockId) -> CompileResult<(BlockId, Var)> {
        let (mut block, mut lhs) = self.shift_expression(block)?;
        loop {
            // a < b is b > a, and a <= b is b >= a.
            let (op, swap) = match self.toks.peek().kind {
                TokKind::Lt => (Op::Gt, true),
                TokKind::Gt => (Op::Gt, false),
                TokKind::Le => (Op::Ge, true),
                TokKind::Ge => (Op::Ge, false),
                _ => return Ok((block, lhs)),
            };
            let loc = self.toks.loc();
            self.toks.next();
            let (b, rhs) = self.shift_expression(block)?;
            block = b;
            lhs = if swap {
                self.eval_binop(loc, block, op, rhs, lhs)?
            } else {
                self.eval_binop(loc, block, op, lhs, rhs)?
            };
        }
    }

    fn shift_expression(&mut self, block: BlockId) -> CompileResult<(BlockId, Var)> {
        let (mut block, mut lhs) = self.additive_expression(block)?;
        loop {
            let op = match self.toks.peek().kind {
                TokKind::Shl => Op::Shl,
                TokKind::Shr => Op::Shr,
                _ => return Ok((block, lhs)),
            };
            let loc = self.toks.loc();
            self.toks.next();
            let (b, rhs) = self.additive_expression(block)?;
            block = b;
            lhs = self.eval_binop(loc, block, op, lhs, rhs)?;
        }
    }

    fn additive_expression(&mut self, block: BlockId) -> CompileResult<(BlockId, Var)> {
        let (mut block, mut lhs) = self.multiplicative_expression(block)?;
        loop {
            let op = match self.toks.peek().kind {
                TokKind::Plus => Op::Add,
                TokKind::Minus => Op::Sub,
                _ => return Ok((block, lhs)),
            };
            let loc = self.toks.loc();
            self.toks.next();
            let (b, rhs) = self.multiplicative_expression(block)?;
            block = b;
            lhs = self.eval_binop(loc, block, op, lhs, rhs)?;
        }
    }

    fn multiplicative_expression(&mut self, block: BlockId) -> CompileResult<(BlockId, Var)> {
        let (mut block, mut lhs) = self.unary_expression(block)?;
        loop {
            let op = match self.toks.peek().kind {
                TokKind::Star => Op::Mul,
                TokKind::Slash => Op::Div,
                TokKind::Percent => Op::Mod,
                _ => return Ok((block, lhs)),
            };
            let loc = self.toks.loc();
            self.toks.next();
            let (b, rhs) = self.unary_expression(block)?;
            block = b;
            lhs = self.eval_binop(loc, block, op, lhs, rhs)?;
        }
    }

    /// Distinguish `sizeof ( type-name )` from `sizeof ( expression )`
    /// with one extra token of lookahead.
    fn sizeof_type_ahead(&mut self) -> bool {
        if !self.toks.at(TokKind::LParen) {
            return false;
        }
        let save = self.toks.clone_pos();
        self.toks.next();
        let is_type = self.starts_type_name();
        self.toks.restore_pos(save);
        is_type
    }

    /// True if the upcoming tokens begin a type name; used by `sizeof` and
    /// to recognize declarations in statement position.
    pub(crate) fn starts_type_name(&self) -> bool {
        use TokKind::*;
        match self.toks.peek().kind {
            Void | Char | Short | Int | Long | Signed | Unsigned | Float | Double | Const
            | Volatile | Struct | Union | Enum => true,
            Ident => match self.ns_ident.lookup(&self.toks.peek().text) {
                Some(sym) => self.syms.get(sym).kind == SymKind::Typedef,
                None => false,
            },
            _ => false,
        }
    }

    fn unary_expression(&mut self, block: BlockId) -> CompileResult<(BlockId, Var)> {
        let loc = self.toks.loc();
        match self.toks.peek().kind {
            TokKind::Minus => {
                self.toks.next();
                let (block, v) = self.unary_expression(block)?;
                let zero = Var::immediate(self.types.int_, 0);
                let v = self.eval_binop(loc, block, Op::Sub, zero, v)?;
                Ok((block, v))
            }
            TokKind::Tilde => {
                self.toks.next();
                let (block, v) = self.unary_expression(block)?;
                if !self.types.is_integer(v.ty) {
                    return err!(loc, "invalid operand of unary '~'");
                }
                if v.is_constant() {
                    let ty = self.types.promote_integer(v.ty);
                    return Ok((block, Var::immediate(ty, !v.imm)));
                }
                let ty = self.types.promote_integer(v.ty);
                let v = self.convert(loc, block, v, ty)?;
                let target = self.create_temp_var(loc, ty)?;
                self.emit(block, target, Op::Not, v, None);
                Ok((block, target))
            }
            TokKind::Bang => {
                self.toks.next();
                let (block, v) = self.unary_expression(block)?;
                let zero = Var::immediate(self.types.int_, 0);
                let v = self.eval_binop(loc, block, Op::Eq, v, zero)?;
                Ok((block, v))
            }
            TokKind::Amp => {
                self.toks.next();
                let (block, v) = self.unary_expression(block)?;
                let v = self.eval_addr(loc, block, v)?;
                Ok((block, v))
            }
            TokKind::Star => {
                self.toks.next();
                let (block, v) = self.unary_expression(block)?;
                let v = self.eval_deref(loc, block, v)?;
                Ok((block, v))
            }
            TokKind::Sizeof => {
                self.toks.next();
                let size = if self.sizeof_type_ahead() {
                    self.toks.consume(TokKind::LParen)?;
                    let (spec, _) = self.declaration_specifiers(false)?;
                    let (ty, _) = self.declarator(spec)?;
                    self.toks.consume(TokKind::RParen)?;
                    self.types.size_of(ty)
                } else {
                    // The operand is parsed into a scratch block and never
                    // evaluated.
                    let scratch = self.new_block();
                    let (_, v) = self.unary_expression(scratch)?;
                    self.types.size_of(v.ty)
                };
                let ulong = self.types.ulong;
                Ok((block, Var::immediate(ulong, size as i64)))
            }
            _ => self.postfix_expression(block),
        }
    }

    fn member_access(&mut self, loc: Location, v: Var, name: &str) -> CompileResult<Var> {
        if !self.types.is_struct_or_union(v.ty) {
            return err!(
                loc,
                "member access on non-aggregate type '{}'",
                self.types.display(v.ty)
            );
        }
        let member = match self.types.find_member(v.ty, name) {
            Some(m) => (m.ty, m.offset),
            None => {
                return err!(
                    loc,
                    "no member named '{}' in '{}'",
                    name,
                    self.types.display(v.ty)
                )
            }
        };
        match v.kind {
            VarKind::Direct | VarKind::Deref => Ok(Var {
                ty: member.0,
                offset: v.offset + member.1 as i32,
                ..v
            }),
            _ => err!(loc, "member access requires an lvalue"),
        }
    }

    fn call_expression(
        &mut self,
        loc: Location,
        block: BlockId,
        designator: Var,
    ) -> CompileResult<(BlockId, Var)> {
        // Calling through a function pointer dereferences it first.
        let (func_ty, callee) = if self.types.is_function(designator.ty) {
            (designator.ty, designator)
        } else if self.types.is_pointer(designator.ty)
            && self.types.is_function(self.types.deref(designator.ty))
        {
            (self.types.deref(designator.ty), designator)
        } else {
            return err!(
                loc,
                "called object is not a function, was '{}'",
                self.types.display(designator.ty)
            );
        };

        let n_params = self.types.nmembers(func_ty);
        let vararg = self.types.is_vararg(func_ty);

        self.toks.consume(TokKind::LParen)?;
        let mut block = block;
        let mut args = Vec::new();
        while !self.toks.at(TokKind::RParen) {
            let arg_loc = self.toks.loc();
            let (b, arg) = self.assignment_expression(block)?;
            block = b;
            let arg = if args.len() < n_params {
                let pty = self.types.member(func_ty, args.len()).ty;
                self.convert(arg_loc, block, arg, pty)?
            } else if vararg {
                // Default argument promotions for the variable part.
                let arg = self.decay(arg);
                if self.types.is_integer(arg.ty) && self.types.size_of(arg.ty) < 4 {
                    let ty = self.types.promote_integer(arg.ty);
                    self.convert(arg_loc, block, arg, ty)?
                } else {
                    arg
                }
            } else {
                return err!(arg_loc, "too many arguments in function call");
            };
            args.push(arg);
            if !self.toks.at(TokKind::Comma) {
                break;
            }
            self.toks.consume(TokKind::Comma)?;
        }
        self.toks.consume(TokKind::RParen)?;
        if args.len() < n_params {
            return err!(loc, "too few arguments in function call");
        }

        for &arg in &args {
            self.emit(block, arg, Op::Param, arg, None);
        }

        let ret = self.types.base(func_ty).unwrap();
        let target = if self.types.is_void(ret) {
            let void_ = self.types.void_;
            Var::immediate(void_, 0)
        } else {
            self.create_temp_var(loc, ret)?
        };
        self.emit(block, target, Op::Call, callee, None);
        Ok((block, Var { lvalue: false, ..target }))
    }

    fn postfix_expression(&mut self, block: BlockId) -> CompileResult<(BlockId, Var)> {
        let (mut block, mut v) = self.primary_expression(block)?;
        loop {
            let loc = self.toks.loc();
            match self.toks.peek().kind {
                TokKind::LParen => {
                    let (b, r) = self.call_expression(loc, block, v)?;
                    block = b;
                    v = r;
                }
                TokKind::LBracket => {
                    self.toks.consume(TokKind::LBracket)?;
                    let (b, index) = self.expression(block)?;
                    block = b;
                    self.toks.consume(TokKind::RBracket)?;
                    let ptr = self.eval_binop(loc, block, Op::Add, v, index)?;
                    v = self.eval_deref(loc, block, ptr)?;
                }
                TokKind::Dot => {
                    self.toks.consume(TokKind::Dot)?;
                    let name = self.toks.consume(TokKind::Ident)?.text;
                    v = self.member_access(loc, v, &name)?;
                }
                TokKind::Arrow => {
                    self.toks.consume(TokKind::Arrow)?;
                    let name = self.toks.consume(TokKind::Ident)?.text;
                    let obj = self.eval_deref(loc, block, v)?;
                    v = self.member_access(loc, obj, &name)?;
                }
                _ => return Ok((block, v)),
            }
        }
    }

    fn primary_expression(&mut self, block: BlockId) -> CompileResult<(BlockId, Var)> {
        let tok = self.toks.next();
        match tok.kind {
            TokKind::Ident => {
                let Some(sym) = self.ns_ident.lookup(&tok.text) else {
                    return err!(tok.loc, "undeclared identifier '{}'", tok.text);
                };
                let s = self.syms.get(sym);
                match s.kind {
                    SymKind::EnumValue => {
                        let int_ = self.types.int_;
                        Ok((block, Var::immediate(int_, s.enum_value)))
                    }
                    SymKind::StringValue => Ok((block, Var::string(sym, s.ty))),
                    SymKind::Typedef => {
                        err!(tok.loc, "unexpected type name '{}' in expression", tok.text)
                    }
                    _ => Ok((block, Var::direct(sym, s.ty))),
                }
            }
            TokKind::IntLit => {
                let ty = if i32::try_from(tok.int_value).is_ok() {
                    self.types.int_
                } else {
                    self.types.long_
                };
                Ok((block, Var::immediate(ty, tok.int_value)))
            }
            TokKind::StrLit => {
                let sym = self.syms.create_string(&mut self.types, &tok.text);
                let ty = self.syms.get(sym).ty;
                Ok((block, Var::string(sym, ty)))
            }
            TokKind::LParen => {
                let (block, v) = self.expression(block)?;
                self.toks.consume(TokKind::RParen)?;
                Ok((block, v))
            }
            kind => err!(tok.loc, "unexpected {} in expression", kind.describe()),
        }
    }

    // -----------------------------------------------------------------
    // Statements.

    /// Parse a function body (`{ ... }`) into the definition whose entry
    /// block is `entry`.
    pub(crate) fn function_body(&mut self, entry: BlockId) -> CompileResult<()> {
        self.toks.consume(TokKind::LBrace)?;
        let mut block = entry;
        while !self.toks.at(TokKind::RBrace) {
            block = self.block_item(block)?;
        }
        self.toks.consume(TokKind::RBrace)?;
        Ok(())
    }

    fn block_item(&mut self, block: BlockId) -> CompileResult<BlockId> {
        if self.starts_type_name() || matches!(
            self.toks.peek().kind,
            TokKind::Typedef | TokKind::Static | TokKind::Extern | TokKind::Auto | TokKind::Register
        ) {
            let next = self.declaration(Some(block))?;
            Ok(next.unwrap_or(block))
        } else {
            self.statement(block)
        }
    }

    fn statement(&mut self, block: BlockId) -> CompileResult<BlockId> {
        match self.toks.peek().kind {
            TokKind::LBrace => {
                self.toks.consume(TokKind::LBrace)?;
                self.ns_ident.push_scope();
                self.ns_tag.push_scope();
                let mut block = block;
                while !self.toks.at(TokKind::RBrace) {
                    block = self.block_item(block)?;
                }
                self.toks.consume(TokKind::RBrace)?;
                self.ns_tag.pop_scope();
                self.ns_ident.pop_scope();
                Ok(block)
            }
            TokKind::If => self.if_statement(block),
            TokKind::While => self.while_statement(block),
            TokKind::Do => self.do_statement(block),
            TokKind::For => self.for_statement(block),
            TokKind::Return => self.return_statement(block),
            TokKind::Break | TokKind::Continue => {
                let tok = self.toks.next();
                let Some(&(continue_to, break_to)) = self.loops.last() else {
                    return err!(tok.loc, "{} outside of a loop", tok.kind.describe());
                };
                let dest = if tok.kind == TokKind::Break {
                    break_to
                } else {
                    continue_to
                };
                self.toks.consume(TokKind::Semi)?;
                self.owner_mut().block_mut(block).term = Terminator::Fall(dest);
                // Anything that follows is unreachable but still parsed.
                Ok(self.new_block())
            }
            TokKind::Semi => {
                self.toks.consume(TokKind::Semi)?;
                Ok(block)
            }
            _ => {
                let (block, _) = self.expression(block)?;
                self.toks.consume(TokKind::Semi)?;
                Ok(block)
            }
        }
    }

    fn if_statement(&mut self, block: BlockId) -> CompileResult<BlockId> {
        self.toks.consume(TokKind::If)?;
        self.toks.consume(TokKind::LParen)?;
        let (cond_end, cond) = self.expression(block)?;
        self.toks.consume(TokKind::RParen)?;

        let then_block = self.new_block();
        let then_end = self.statement(then_block)?;
        let join;
        if self.toks.at(TokKind::Else) {
            self.toks.consume(TokKind::Else)?;
            let else_block = self.new_block();
            let else_end = self.statement(else_block)?;
            join = self.new_block();
            let owner = self.owner_mut();
            owner.block_mut(cond_end).term = Terminator::Branch {
                cond,
                then_dest: then_block,
                else_dest: else_block,
            };
            owner.block_mut(else_end).term = Terminator::Fall(join);
            owner.block_mut(then_end).term = Terminator::Fall(join);
        } else {
            join = self.new_block();
            let owner = self.owner_mut();
            owner.block_mut(cond_end).term = Terminator::Branch {
                cond,
                then_dest: then_block,
                else_dest: join,
            };
            owner.block_mut(then_end).term = Terminator::Fall(join);
        }
        Ok(join)
    }

    fn while_statement(&mut self, block: BlockId) -> CompileResult<BlockId> {
        self.toks.consume(TokKind::While)?;
        let head = self.new_block();
        self.owner_mut().block_mut(block).term = Terminator::Fall(head);

        self.toks.consume(TokKind::LParen)?;
        let (cond_end, cond) = self.expression(head)?;
        self.toks.consume(TokKind::RParen)?;

        let body = self.new_block();
        let join = self.new_block();
        self.owner_mut().block_mut(cond_end).term = Terminator::Branch {
            cond,
            then_dest: body,
            else_dest: join,
        };

        self.loops.push((head, join));
        let body_end = self.statement(body)?;
        self.loops.pop();
        self.owner_mut().block_mut(body_end).term = Terminator::Fall(head);
        Ok(join)
    }

    fn do_statement(&mut self, block: BlockId) -> CompileResult<BlockId> {
        self.toks.consume(TokKind::Do)?;
        let body = self.new_block();
        let cond_block = self.new_block();
        let join = self.new_block();
        self.owner_mut().block_mut(block).term = Terminator::Fall(body);

        self.loops.push((cond_block, join));
        let body_end = self.statement(body)?;
        self.loops.pop();
        self.owner_mut().block_mut(body_end).term = Terminator::Fall(cond_block);

        self.toks.consume(TokKind::While)?;
        self.toks.consume(TokKind::LParen)?;
        let (cond_end, cond) = self.expression(cond_block)?;
        self.toks.consume(TokKind::RParen)?;
        self.toks.consume(TokKind::Semi)?;
        self.owner_mut().block_mut(cond_end).term = Terminator::Branch {
            cond,
            then_dest: body,
            else_dest: join,
        };
        Ok(join)
    }

    fn for_statement(&mut self, block: BlockId) -> CompileResult<BlockId> {
        self.toks.consume(TokKind::For)?;
        self.toks.consume(TokKind::LParen)?;

        let mut block = block;
        if !self.toks.at(TokKind::Semi) {
            let (b, _) = self.expression(block)?;
            block = b;
        }
        self.toks.consume(TokKind::Semi)?;

        let head = self.new_block();
        self.owner_mut().block_mut(block).term = Terminator::Fall(head);
        let (cond_end, cond) = if self.toks.at(TokKind::Semi) {
            let int_ = self.types.int_;
            (head, Var::immediate(int_, 1))
        } else {
            self.expression(head)?
        };
        self.toks.consume(TokKind::Semi)?;

        let step = self.new_block();
        let step_end = if self.toks.at(TokKind::RParen) {
            step
        } else {
            let (b, _) = self.expression(step)?;
            b
        };
        self.toks.consume(TokKind::RParen)?;
        self.owner_mut().block_mut(step_end).term = Terminator::Fall(head);

        let body = self.new_block();
        let join = self.new_block();
        self.owner_mut().block_mut(cond_end).term = Terminator::Branch {
            cond,
            then_dest: body,
            else_dest: join,
        };

        self.loops.push((step, join));
        let body_end = self.statement(body)?;
        self.loops.pop();
        self.owner_mut().block_mut(body_end).term = Terminator::Fall(step);
        Ok(join)
    }

    fn return_statement(&mut self, block: BlockId) -> CompileResult<BlockId> {
        let loc = self.toks.loc();
        self.toks.consume(TokKind::Return)?;
        let idx = self
            .current_func_idx()
            .expect("return outside of function");
        let func_ty = self.syms.get(self.pending[idx].sym).ty;
        let ret_ty = self.types.base(func_ty).unwrap();

        if self.toks.at(TokKind::Semi) {
            self.toks.consume(TokKind::Semi)?;
            if !self.types.is_void(ret_ty) {
                return err!(loc, "return with no value in non-void function");
            }
            self.owner_mut().block_mut(block).term = Terminator::Ret;
        } else {
            if self.types.is_void(ret_ty) {
                return err!(loc, "return with a value in void function");
            }
            let (b, v) = self.expression(block)?;
            let v = self.convert(loc, b, v, ret_ty)?;
            self.toks.consume(TokKind::Semi)?;
            self.owner_mut().block_mut(b).term = Terminator::Return(v);
        }
        Ok(self.new_block())
    }
}
