//! The control-flow-graph intermediate representation.
//!
//! Each translation-unit definition owns a graph of basic blocks holding
//! three-address statements. Values are carried by `Var`, which is either a
//! direct reference to a symbol's storage (with a byte offset for aggregate
//! members), an indirection through a pointer-valued symbol, the address of
//! a symbol, or an immediate.

use crate::symtab::SymId;
use crate::types::TypeId;

/// An opaque reference to a basic block within one `Definition`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockId(u32);

impl BlockId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// The four forms a value reference may take.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VarKind {
    /// The storage of `sym`, plus `offset` bytes.
    Direct,
    /// The storage `sym` points at, plus `offset` bytes.
    Deref,
    /// The address of `sym`'s storage.
    Address,
    /// A constant; `imm` holds the value, or `sym` refers to a string
    /// literal.
    Immediate,
}

/// A value reference in three-address code.
#[derive(Clone, Copy, Debug)]
pub struct Var {
    pub kind: VarKind,
    pub sym: Option<SymId>,
    pub ty: TypeId,
    pub offset: i32,
    pub lvalue: bool,
    pub imm: i64,
}

impl Var {
    pub fn direct(sym: SymId, ty: TypeId) -> Var {
        Var {
            kind: VarKind::Direct,
            sym: Some(sym),
            ty,
            offset: 0,
            lvalue: true,
            imm: 0,
        }
    }

    pub fn immediate(ty: TypeId, value: i64) -> Var {
        Var {
            kind: VarKind::Immediate,
            sym: None,
            ty,
            offset: 0,
            lvalue: false,
            imm: value,
        }
    }

    /// A string literal; an immediate referring to its `StringValue`
    /// symbol.
    pub fn string(sym: SymId, ty: TypeId) -> Var {
        Var {
            kind: VarKind::Immediate,
            sym: Some(sym),
            ty,
            offset: 0,
            lvalue: false,
            imm: 0,
        }
    }

    pub fn is_immediate(&self) -> bool {
        self.kind == VarKind::Immediate
    }

    /// True for immediate integer constants (not string literals).
    pub fn is_constant(&self) -> bool {
        self.kind == VarKind::Immediate && self.sym.is_none()
    }
}

/// Three-address operations. Dereference and address-of need no operation
/// of their own: they are carried by the operand forms `VarKind::Deref`
/// and `VarKind::Address` and can appear on either side of any statement.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Op {
    /// `target = a`.
    Assign,
    /// `target = ~a`.
    Not,
    /// `target = a(...)`, with arguments pushed by preceding `Param`
    /// statements in left-to-right order.
    Call,
    /// Stage `a` as the next call argument.
    Param,
    /// `target = (T) a`, where `T` is the type of `target`.
    Cast,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    /// `target = a == b`.
    Eq,
    /// `target = a >= b`.
    Ge,
    /// `target = a > b`.
    Gt,
}

/// A single three-address statement: `target = a <op> b`, with `b` present
/// only for binary operations.
#[derive(Clone, Debug)]
pub struct Statement {
    pub target: Var,
    pub op: Op,
    pub a: Var,
    pub b: Option<Var>,
}

/// How control leaves a basic block.
#[derive(Clone, Debug)]
pub enum Terminator {
    /// Unconditional transfer to another block.
    Fall(BlockId),
    /// Two-way branch on `cond != 0`.
    Branch {
        cond: Var,
        then_dest: BlockId,
        else_dest: BlockId,
    },
    /// Return with a value.
    Return(Var),
    /// Return with no value, also the default for blocks still under
    /// construction.
    Ret,
}

/// A basic block. The label symbol names the block in emitted code and is
/// the target of branch fixups.
#[derive(Debug)]
pub struct Block {
    pub label: SymId,
    pub code: Vec<Statement>,
    pub term: Terminator,
}

/// A completed translation-unit definition: a function with parameters,
/// locals and a CFG body, or an object whose body holds initializer
/// stores.
#[derive(Debug)]
pub struct Definition {
    pub sym: SymId,
    pub params: Vec<SymId>,
    pub locals: Vec<SymId>,
    pub blocks: Vec<Block>,
    /// Entry block.
    pub body: BlockId,
}

impl Definition {
    pub fn new(sym: SymId, entry_label: SymId) -> Definition {
        let mut def = Definition {
            sym,
            params: Vec::new(),
            locals: Vec::new(),
            blocks: Vec::new(),
            body: BlockId(0),
        };
        def.body = def.new_block(entry_label);
        def
    }

    pub fn new_block(&mut self, label: SymId) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(Block {
            label,
            code: Vec::new(),
            term: Terminator::Ret,
        });
        id
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.index()]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id.index()]
    }

    pub fn emit(&mut self, block: BlockId, target: Var, op: Op, a: Var, b: Option<Var>) {
        self.block_mut(block).code.push(Statement { target, op, a, b });
    }
}
