//! Declaration parsing.
//!
//! The parser owns the token stream, the type pool, the symbol arena, and
//! the two namespaces. It is a lazy producer: [`Parser::parse`] consumes
//! declarations until at least one completed [`Definition`] is buffered,
//! then hands them out one at a time as owned values.

pub mod expr;
pub mod lexer;

use std::collections::VecDeque;

use log::trace;

use crate::error::{CompileResult, Location};
use crate::ir::{BlockId, Definition, Op, Var, VarKind};
use crate::symtab::{Linkage, Namespace, SymId, SymKind, SymbolTable};
use crate::types::{Qualifiers, TypeId, TypeKind, TypePool};

use self::lexer::{TokKind, Tokens};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum StorageClass {
    Auto,
    Register,
    Static,
    Extern,
    Typedef,
}

pub struct Parser {
    toks: Tokens,
    pub types: TypePool,
    pub syms: SymbolTable,
    ns_ident: Namespace,
    ns_tag: Namespace,
    /// Completed definitions not yet handed out, plus the definition under
    /// construction at the back while inside a declaration.
    pending: VecDeque<Definition>,
    /// Owner for blocks created outside any definition, e.g. the scratch
    /// blocks of a constant expression in `enum { A = 1 } foo;`.
    fallback: Definition,
    /// Stack of (continue target, break target) for loop statements.
    loops: Vec<(BlockId, BlockId)>,
}

impl Parser {
    pub fn new(source: &str) -> CompileResult<Parser> {
        let types = TypePool::new();
        let mut syms = SymbolTable::new();
        let fallback_sym = syms.create_label(&types);
        let fallback_label = syms.create_label(&types);
        Ok(Parser {
            toks: Tokens::tokenize(source)?,
            types,
            syms,
            ns_ident: Namespace::new(),
            ns_tag: Namespace::new(),
            pending: VecDeque::new(),
            fallback: Definition::new(fallback_sym, fallback_label),
            loops: Vec::new(),
        })
    }

    /// Produce the next completed definition, parsing further declarations
    /// as needed. Returns `None` once the input is exhausted. Tentative
    /// declarations only affect the symbol table; the driver materializes
    /// whatever remains tentative at end of unit.
    pub fn parse(&mut self) -> CompileResult<Option<Definition>> {
        while self.pending.is_empty() && !self.toks.at(TokKind::End) {
            self.declaration(None)?;
            self.reset_fallback();
        }
        Ok(self.pending.pop_front())
    }

    fn reset_fallback(&mut self) {
        let sym = self.fallback.sym;
        let label = self.syms.create_label(&self.types);
        self.fallback = Definition::new(sym, label);
    }

    /// The definition currently accepting blocks: the one at the back of
    /// the buffer, or the fallback owner outside any definition.
    fn owner_mut(&mut self) -> &mut Definition {
        match self.pending.back_mut() {
            Some(def) => def,
            None => &mut self.fallback,
        }
    }

    fn current_func_idx(&self) -> Option<usize> {
        self.pending
            .iter()
            .enumerate()
            .rev()
            .find(|(_, d)| self.types.is_function(self.syms.get(d.sym).ty))
            .map(|(i, _)| i)
    }

    pub(crate) fn new_block(&mut self) -> BlockId {
        let label = self.syms.create_label(&self.types);
        self.owner_mut().new_block(label)
    }

    pub(crate) fn emit(&mut self, block: BlockId, target: Var, op: Op, a: Var, b: Option<Var>) {
        self.owner_mut().emit(block, target, op, a, b);
    }

    /// A fresh temporary local of the current function. Outside a function
    /// body there is no storage for one, which makes the expression
    /// non-constant by definition.
    pub(crate) fn create_temp_var(&mut self, loc: Location, ty: TypeId) -> CompileResult<Var> {
        let Some(idx) = self.current_func_idx() else {
            return err!(loc, "expression is not a constant expression");
        };
        let tmp = self.syms.create_temporary(ty);
        self.pending[idx].locals.push(tmp);
        Ok(Var::direct(tmp, ty))
    }

    fn push_back_definition(&mut self, sym: SymId) -> BlockId {
        debug_assert_eq!(self.syms.get(sym).kind, SymKind::Definition);
        let label = self.syms.create_label(&self.types);
        let def = Definition::new(sym, label);
        let body = def.body;
        self.pending.push_back(def);
        body
    }

    // ---------------------------------------------------------------------
    // Declaration specifiers.

    /// Parse type specifiers, qualifiers, and (when `storage` is allowed)
    /// a storage class. At least one type specifier is required.
    ///
    /// Specifier state is a compact bit set; the resolved basic type comes
    /// from a fixed table keyed by the accumulated bits. Each specifier
    /// may appear once, except `long`, which may appear twice.
    fn declaration_specifiers(
        &mut self,
        allow_storage: bool,
    ) -> CompileResult<(TypeId, Option<StorageClass>)> {
        let mut ty: Option<TypeId> = None;
        let mut spec: u16 = 0;
        let mut qual = Qualifiers::NONE;
        let mut storage: Option<StorageClass> = None;
        let start = self.toks.loc();

        macro_rules! set_specifier {
            ($bit:expr) => {{
                let loc = self.toks.loc();
                let tok = self.toks.next();
                if spec & $bit != 0 {
                    return err!(loc, "duplicate type specifier {}", tok.kind.describe());
                }
                spec |= $bit;
            }};
        }

        macro_rules! set_qualifier {
            ($q:expr) => {{
                let loc = self.toks.loc();
                let tok = self.toks.next();
                if qual.contains($q) {
                    return err!(loc, "duplicate type qualifier {}", tok.kind.describe());
                }
                qual.insert($q);
            }};
        }

        macro_rules! set_storage_class {
            ($s:expr) => {{
                let loc = self.toks.loc();
                self.toks.next();
                if !allow_storage {
                    return err!(loc, "unexpected storage class in qualifier list");
                }
                if storage.is_some() {
                    return err!(loc, "multiple storage class specifiers");
                }
                storage = Some($s);
            }};
        }

        loop {
            match self.toks.peek().kind {
                TokKind::Void => set_specifier!(0x001),
                TokKind::Char => set_specifier!(0x002),
                TokKind::Short => set_specifier!(0x004),
                TokKind::Int => set_specifier!(0x008),
                TokKind::Signed => set_specifier!(0x010),
                TokKind::Unsigned => set_specifier!(0x020),
                TokKind::Long => {
                    if spec & 0x040 != 0 {
                        set_specifier!(0x080)
                    } else {
                        set_specifier!(0x040)
                    }
                }
                TokKind::Float => set_specifier!(0x100),
                TokKind::Double => set_specifier!(0x200),
                TokKind::Const => set_qualifier!(Qualifiers::CONST),
                TokKind::Volatile => set_qualifier!(Qualifiers::VOLATILE),
                TokKind::Ident => {
                    let name = self.toks.peek().text.clone();
                    match self.ns_ident.lookup(&name) {
                        Some(sym)
                            if self.syms.get(sym).kind == SymKind::Typedef && ty.is_none() =>
                        {
                            self.toks.next();
                            ty = Some(self.syms.get(sym).ty);
                        }
                        _ => break,
                    }
                }
                TokKind::Struct | TokKind::Union => {
                    if ty.is_some() {
                        break;
                    }
                    ty = Some(self.struct_or_union_declaration()?);
                }
                TokKind::Enum => {
                    if ty.is_some() {
                        break;
                    }
                    ty = Some(self.enum_declaration()?);
                }
                TokKind::Auto => set_storage_class!(StorageClass::Auto),
                TokKind::Register => set_storage_class!(StorageClass::Register),
                TokKind::Static => set_storage_class!(StorageClass::Static),
                TokKind::Extern => set_storage_class!(StorageClass::Extern),
                TokKind::Typedef => set_storage_class!(StorageClass::Typedef),
                _ => break,
            }

            if ty.is_some() && spec != 0 {
                return err!(start, "invalid combination of declaration specifiers");
            }
        }

        let ty = if let Some(ty) = ty {
            if self.types.qualifiers(ty).contains(qual) && !qual.is_empty() {
                return err!(start, "duplicate type qualifier");
            }
            self.types.qualified(ty, qual)
        } else if spec != 0 {
            let base = self.basic_type_from_specifier(start, spec)?;
            self.types.qualified(base, qual)
        } else {
            return err!(self.toks.loc(), "missing type specifier");
        };

        Ok((ty, storage))
    }

    fn basic_type_from_specifier(&self, loc: Location, spec: u16) -> CompileResult<TypeId> {
        let t = &self.types;
        Ok(match spec {
            0x0001 => t.void_,
            // char, signed char
            0x0002 | 0x0012 => t.char_,
            0x0022 => t.uchar,
            // short, signed short, short int, signed short int
            0x0004 | 0x0014 | 0x000C | 0x001C => t.short_,
            0x0024 | 0x002C => t.ushort,
            // int, signed, signed int
            0x0008 | 0x0010 | 0x0018 => t.int_,
            0x0020 | 0x0028 => t.uint,
            // long, signed long, long int, signed long int, and the
            // long long spellings; all 8 bytes.
            0x0040 | 0x0050 | 0x0048 | 0x0058 | 0x00C0 | 0x00D0 | 0x00C8 | 0x00D8 => t.long_,
            0x0060 | 0x0068 | 0x00E0 | 0x00E8 => t.ulong,
            0x0100 => t.float_,
            0x0200 | 0x0240 => t.double_,
            _ => return err!(loc, "invalid type specification"),
        })
    }

    // ---------------------------------------------------------------------
    // Declarators.

    fn pointer(&mut self, base: TypeId) -> CompileResult<TypeId> {
        self.toks.consume(TokKind::Star)?;
        let ty = self.types.pointer_to(base);
        let mut qual = Qualifiers::NONE;
        loop {
            let q = match self.toks.peek().kind {
                TokKind::Const => Qualifiers::CONST,
                TokKind::Volatile => Qualifiers::VOLATILE,
                _ => break,
            };
            let loc = self.toks.loc();
            let tok = self.toks.next();
            if qual.contains(q) {
                return err!(loc, "duplicate type qualifier {}", tok.kind.describe());
            }
            qual.insert(q);
        }
        self.types.add_qualifiers(ty, qual);
        Ok(ty)
    }

    /// Parse pointer prefixes and a direct declarator on top of `base`.
    /// Returns the declared type and name (absent for an abstract
    /// declarator).
    pub(crate) fn declarator(&mut self, base: TypeId) -> CompileResult<(TypeId, Option<String>)> {
        let mut base = base;
        while self.toks.at(TokKind::Star) {
            base = self.pointer(base)?;
        }
        self.direct_declarator(base)
    }

    /// Parse array dimensions `[s0][s1]..[sn]`. Only the first dimension
    /// may be absent, yielding an incomplete type.
    fn declarator_array(&mut self, base: TypeId) -> CompileResult<TypeId> {
        if !self.toks.at(TokKind::LBracket) {
            return Ok(base);
        }
        let loc = self.toks.loc();
        self.toks.consume(TokKind::LBracket)?;
        let mut count = 0u32;
        if !self.toks.at(TokKind::RBracket) {
            let value = self.constant_expression()?;
            if value < 1 {
                return err!(loc, "array dimension must be a natural number");
            }
            count = value as u32;
        }
        self.toks.consume(TokKind::RBracket)?;

        let base = self.declarator_array(base)?;
        if self.types.size_of(base) == 0 {
            return err!(loc, "array has incomplete element type");
        }
        Ok(self.types.array_of(base, count))
    }

    /// `FOLLOW(parameter-list) = { ')' }`; peek to allow an empty list.
    fn parameter_list(&mut self, base: TypeId) -> CompileResult<TypeId> {
        let func = self.types.function(base);
        while !self.toks.at(TokKind::RParen) {
            let (spec, _) = self.declaration_specifiers(false)?;
            let loc = self.toks.loc();
            let (ty, name) = self.declarator(spec)?;
            if self.types.is_void(ty) {
                if self.types.nmembers(func) > 0 {
                    return err!(loc, "incomplete type in parameter list");
                }
                break;
            }
            self.types.add_member(func, name, ty);
            if !self.toks.at(TokKind::Comma) {
                break;
            }
            self.toks.consume(TokKind::Comma)?;
            if self.toks.at(TokKind::RParen) {
                return err!(self.toks.loc(), "unexpected trailing comma in parameter list");
            }
            if self.toks.at(TokKind::Dots) {
                self.toks.consume(TokKind::Dots)?;
                let void_ = self.types.void_;
                self.types.add_member(func, Some("...".to_string()), void_);
                break;
            }
        }
        Ok(func)
    }

    /// Handle the inner-declarator case `T (*p)(A)`: the inner declarator
    /// is parsed against a placeholder base, and the outer suffix types are
    /// spliced onto the tail of the inner chain afterwards.
    fn direct_declarator(
        &mut self,
        base: TypeId,
    ) -> CompileResult<(TypeId, Option<String>)> {
        let mut name = None;
        let mut inner: Option<(TypeId, TypeId)> = None;
        let mut ty = base;
        let mut base = base;

        match self.toks.peek().kind {
            TokKind::Ident => {
                name = Some(self.toks.next().text);
            }
            TokKind::LParen => {
                self.toks.consume(TokKind::LParen)?;
                let placeholder = self.types.struct_type();
                let (head, inner_name) = self.declarator(placeholder)?;
                name = inner_name;
                self.toks.consume(TokKind::RParen)?;
                if head != placeholder {
                    let mut tail = head;
                    while self.types.base(tail) != Some(placeholder) {
                        tail = self.types.base(tail).expect("inner declarator chain");
                    }
                    inner = Some((head, tail));
                }
            }
            _ => {}
        }

        let mut spliced = false;
        while self.toks.at(TokKind::LBracket) || self.toks.at(TokKind::LParen) {
            let suffix = if self.toks.at(TokKind::LBracket) {
                self.declarator_array(base)?
            } else {
                self.toks.consume(TokKind::LParen)?;
                let func = self.parameter_list(base)?;
                self.toks.consume(TokKind::RParen)?;
                func
            };
            ty = match inner {
                Some((head, tail)) => {
                    self.types.splice_base(tail, suffix);
                    self.types.refresh_chain_sizes(head);
                    spliced = true;
                    head
                }
                None => suffix,
            };
            base = ty;
        }

        if let Some((head, tail)) = inner {
            if !spliced {
                self.types.splice_base(tail, base);
                self.types.refresh_chain_sizes(head);
                ty = head;
            }
        }

        Ok((ty, name))
    }

    // ---------------------------------------------------------------------
    // Tags.

    fn struct_or_union_declaration(&mut self) -> CompileResult<TypeId> {
        let kind_tok = self.toks.next();
        let kind = if kind_tok.kind == TokKind::Struct {
            TypeKind::Struct
        } else {
            TypeKind::Union
        };

        let mut tag: Option<SymId> = None;
        let mut ty: Option<TypeId> = None;

        if self.toks.at(TokKind::Ident) {
            let name_tok = self.toks.next();
            let name = name_tok.text;
            match self.ns_tag.lookup(&name) {
                None => {
                    let t = if kind == TypeKind::Struct {
                        self.types.struct_type()
                    } else {
                        self.types.union_type()
                    };
                    let sym = self.syms.declare(
                        &mut self.ns_tag,
                        &self.types,
                        name_tok.loc,
                        &name,
                        t,
                        SymKind::Typedef,
                        Linkage::None,
                    )?;
                    tag = Some(sym);
                    ty = Some(t);
                }
                Some(sym) => {
                    let prior = self.syms.get(sym).ty;
                    if self.types.is_integer(prior) {
                        return err!(
                            name_tok.loc,
                            "tag '{}' was previously declared as enum",
                            name
                        );
                    }
                    if self.types.kind(prior) != kind {
                        return err!(
                            name_tok.loc,
                            "tag '{}' was previously declared as {}",
                            name,
                            if self.types.kind(prior) == TypeKind::Struct {
                                "struct"
                            } else {
                                "union"
                            }
                        );
                    }
                    if self.toks.at(TokKind::LBrace) && self.types.size_of(prior) != 0 {
                        return err!(name_tok.loc, "redefinition of '{}'", name);
                    }
                    tag = Some(sym);
                    ty = Some(prior);
                }
            }
        }

        if self.toks.at(TokKind::LBrace) {
            let ty = match ty {
                Some(t) => t,
                // Anonymous aggregate; a standalone type not bound to any
                // tag.
                None => {
                    let t = if kind == TypeKind::Struct {
                        self.types.struct_type()
                    } else {
                        self.types.union_type()
                    };
                    ty = Some(t);
                    t
                }
            };
            self.toks.consume(TokKind::LBrace)?;
            self.member_declaration_list(ty)?;
            debug_assert!(self.types.size_of(ty) > 0);
            self.toks.consume(TokKind::RBrace)?;
        }

        let Some(ty) = ty else {
            return err!(kind_tok.loc, "expected tag name or member list");
        };

        // Hand back a tagged copy so the caller can attach qualifiers
        // without altering the registered definition.
        Ok(match tag {
            Some(sym) => {
                let name = self.syms.get(sym).name.clone();
                self.types.tagged_copy(self.syms.get(sym).ty, &name)
            }
            None => ty,
        })
    }

    fn member_declaration_list(&mut self, ty: TypeId) -> CompileResult<()> {
        loop {
            let (base, _) = self.declaration_specifiers(false)?;
            loop {
                let loc = self.toks.loc();
                let (decl_ty, name) = self.declarator(base)?;
                let Some(name) = name else {
                    return err!(loc, "missing name in member declarator");
                };
                if self.types.size_of(decl_ty) == 0 {
                    return err!(
                        loc,
                        "field '{}' has incomplete type '{}'",
                        name,
                        self.types.display(decl_ty)
                    );
                }
                if self.types.find_member(ty, &name).is_some() {
                    return err!(loc, "duplicate member '{}'", name);
                }
                self.types.add_member(ty, Some(name), decl_ty);
                if self.toks.at(TokKind::Comma) {
                    self.toks.consume(TokKind::Comma)?;
                    continue;
                }
                break;
            }
            self.toks.consume(TokKind::Semi)?;
            if self.toks.at(TokKind::RBrace) {
                return Ok(());
            }
        }
    }

    fn enumerator_list(&mut self) -> CompileResult<()> {
        self.toks.consume(TokKind::LBrace)?;
        let mut next_value: i64 = 0;
        loop {
            let name_tok = self.toks.consume(TokKind::Ident)?;
            if self.toks.at(TokKind::Assign) {
                self.toks.consume(TokKind::Assign)?;
                next_value = self.constant_expression()?;
            }
            let sym = self.syms.declare(
                &mut self.ns_ident,
                &self.types,
                name_tok.loc,
                &name_tok.text,
                self.types.int_,
                SymKind::EnumValue,
                Linkage::None,
            )?;
            self.syms.get_mut(sym).enum_value = next_value;
            next_value += 1;

            if !self.toks.at(TokKind::Comma) {
                break;
            }
            self.toks.consume(TokKind::Comma)?;
            if self.toks.at(TokKind::RBrace) {
                break;
            }
        }
        self.toks.consume(TokKind::RBrace)?;
        Ok(())
    }

    fn enum_declaration(&mut self) -> CompileResult<TypeId> {
        // All enums are plain ints; no enum-specific type checking is
        // done beyond the tag-kind consistency checks below.
        let ty = self.types.int_;
        self.toks.consume(TokKind::Enum)?;

        if self.toks.at(TokKind::Ident) {
            let name_tok = self.toks.next();
            let name = name_tok.text;
            let existing = self.ns_tag.lookup(&name);
            let tag = match existing {
                Some(sym) if self.syms.get(sym).depth >= self.ns_tag.current_depth() => {
                    if !self.types.is_integer(self.syms.get(sym).ty) {
                        return err!(
                            name_tok.loc,
                            "tag '{}' was previously defined as aggregate type",
                            name
                        );
                    }
                    sym
                }
                _ => self.syms.declare(
                    &mut self.ns_tag,
                    &self.types,
                    name_tok.loc,
                    &name,
                    ty,
                    SymKind::Typedef,
                    Linkage::None,
                )?,
            };

            // enum_value doubles as a definition sentinel on the tag,
            // checked here to detect duplicate definitions.
            if self.toks.at(TokKind::LBrace) {
                if self.syms.get(tag).enum_value != 0 {
                    return err!(name_tok.loc, "redefinition of enum '{}'", name);
                }
                self.enumerator_list()?;
                self.syms.get_mut(tag).enum_value = 1;
            }
        } else {
            self.enumerator_list()?;
        }

        Ok(ty)
    }

    // ---------------------------------------------------------------------
    // Initializers.

    fn is_string(&self, v: &Var) -> bool {
        v.kind == VarKind::Immediate
            && v.sym
                .map(|s| self.syms.get(s).kind == SymKind::StringValue)
                .unwrap_or(false)
    }

    /// Emit assignments setting `target` to zero, decomposing composite
    /// types member by member so ordinary store lowering applies.
    fn zero_initialize(&mut self, loc: Location, block: BlockId, target: Var) -> CompileResult<()> {
        debug_assert_eq!(target.kind, VarKind::Direct);
        let ty = self.types.unwrapped(target.ty);
        match self.types.kind(ty) {
            TypeKind::Struct | TypeKind::Union => {
                for i in 0..self.types.nmembers(ty) {
                    let member = self.types.member(ty, i);
                    let mut t = target;
                    t.ty = member.ty;
                    t.offset = target.offset + member.offset as i32;
                    self.zero_initialize(loc, block, t)?;
                }
            }
            TypeKind::Array => {
                debug_assert!(self.types.size_of(ty) > 0);
                let elem = self.types.base(ty).unwrap();
                let elem_size = self.types.size_of(elem);
                for i in 0..self.types.size_of(ty) / elem_size {
                    let mut t = target;
                    t.ty = elem;
                    t.offset = target.offset + (i * elem_size) as i32;
                    self.zero_initialize(loc, block, t)?;
                }
            }
            TypeKind::Pointer => {
                let null_ty = {
                    let v = self.types.void_;
                    self.types.pointer_to(v)
                };
                let zero = Var::immediate(null_ty, 0);
                self.emit(block, target, Op::Assign, zero, None);
            }
            TypeKind::Signed | TypeKind::Unsigned => {
                let width = self.types.size_of(ty);
                let zero = Var::immediate(self.types.signed(width), 0);
                self.emit(block, target, Op::Assign, zero, None);
            }
            _ => {
                return err!(
                    loc,
                    "invalid type to zero-initialize, was '{}'",
                    self.types.display(target.ty)
                )
            }
        }
        Ok(())
    }

    fn object_initializer(
        &mut self,
        mut block: BlockId,
        mut target: Var,
    ) -> CompileResult<BlockId> {
        let filled = target.offset;
        let ty = target.ty;
        debug_assert!(!self.types.is_tagged(ty));

        let loc = self.toks.loc();
        self.toks.consume(TokKind::LBrace)?;
        target.lvalue = true;
        match self.types.kind(ty) {
            TypeKind::Union => {
                // Only the first member of a union can be initialized.
                // Zero the whole object first if the member leaves
                // padding.
                let size = self.types.size_of(ty);
                let first = self.types.member(ty, 0).ty;
                if self.types.size_of(first) < size {
                    let mut t = target;
                    t.ty = if size % 8 != 0 {
                        let c = self.types.char_;
                        self.types.array_of(c, size)
                    } else {
                        let l = self.types.long_;
                        self.types.array_of(l, size / 8)
                    };
                    self.zero_initialize(loc, block, t)?;
                }
                target.ty = first;
                block = self.initializer(block, target)?;
                if !self.toks.at(TokKind::RBrace) {
                    return err!(self.toks.loc(), "excess elements in union initializer");
                }
            }
            TypeKind::Struct => {
                let n = self.types.nmembers(ty);
                let mut i = 0;
                while i < n {
                    let member = self.types.member(ty, i);
                    target.ty = member.ty;
                    target.offset = filled + member.offset as i32;
                    block = self.initializer(block, target)?;
                    i += 1;
                    if self.toks.at(TokKind::Comma) {
                        self.toks.consume(TokKind::Comma)?;
                    } else {
                        break;
                    }
                    if self.toks.at(TokKind::RBrace) {
                        break;
                    }
                }
                while i < n {
                    let member = self.types.member(ty, i);
                    target.ty = member.ty;
                    target.offset = filled + member.offset as i32;
                    self.zero_initialize(loc, block, target)?;
                    i += 1;
                }
            }
            TypeKind::Array => {
                let elem = self.types.base(ty).unwrap();
                let elem_size = self.types.size_of(elem);
                let declared = if self.types.size_of(ty) == 0 {
                    None
                } else {
                    Some(self.types.size_of(ty) / elem_size)
                };
                target.ty = elem;
                let mut i = 0;
                loop {
                    if let Some(n) = declared {
                        if i >= n {
                            return err!(self.toks.loc(), "excess elements in array initializer");
                        }
                    }
                    target.offset = filled + (i * elem_size) as i32;
                    block = self.initializer(block, target)?;
                    i += 1;
                    if self.toks.at(TokKind::Comma) {
                        self.toks.consume(TokKind::Comma)?;
                    } else {
                        break;
                    }
                    if self.toks.at(TokKind::RBrace) {
                        break;
                    }
                }
                match declared {
                    None => {
                        // An incomplete array can only be the root of the
                        // target type tree; complete it in place.
                        self.types.complete_array(ty, i);
                    }
                    Some(n) => {
                        while i < n {
                            target.offset = filled + (i * elem_size) as i32;
                            self.zero_initialize(loc, block, target)?;
                            i += 1;
                        }
                    }
                }
            }
            _ => {
                return err!(loc, "block initializer only applies to aggregate or union type");
            }
        }

        self.toks.consume(TokKind::RBrace)?;
        Ok(block)
    }

    /// Parse and emit initializer code for `target`, e.g.
    /// `int b[] = {0, 1, 2, 3}`; a series of assignments on references
    /// into the target.
    fn initializer(&mut self, block: BlockId, mut target: Var) -> CompileResult<BlockId> {
        debug_assert_eq!(target.kind, VarKind::Direct);
        // cv-qualifiers do not matter here.
        target.ty = self.types.unwrapped(target.ty);

        if self.toks.at(TokKind::LBrace) {
            return self.object_initializer(block, target);
        }

        let loc = self.toks.loc();
        let (block, mut value) = self.assignment_expression(block)?;
        // Objects with static storage duration, including block-scope
        // statics, need load-time constant initializers.
        let static_storage = target
            .sym
            .map(|s| self.syms.get(s).linkage != Linkage::None)
            .unwrap_or(false);
        if static_storage && !value.is_immediate() {
            return err!(loc, "initializer must be computable at load time");
        }
        if self.types.size_of(target.ty) == 0 {
            debug_assert_eq!(target.offset, 0);
            let elem = self.types.base(target.ty).unwrap();
            let char_elem = self.types.is_integer(elem) && self.types.size_of(elem) == 1;
            if !self.is_string(&value) || !self.types.is_array(value.ty) || !char_elem {
                return err!(loc, "invalid initializer for incomplete array");
            }
            // Complete the array from the string literal.
            let count = self.types.array_count(value.ty);
            self.types.complete_array(target.ty, count);
        }
        value = self.convert(loc, block, value, target.ty)?;
        self.emit(block, target, Op::Assign, value, None);
        Ok(block)
    }

    // ---------------------------------------------------------------------
    // Declarations and function definitions.

    /// C99 6.4.2.2: `__func__` behaves as a hidden
    /// `static const char __func__[] = "name";` in function scope.
    fn define_builtin_func_name(&mut self, loc: Location, name: &str) -> CompileResult<()> {
        debug_assert_eq!(self.ns_ident.current_depth(), 1);
        let len = name.len() as u32 + 1;
        let c = self.types.char_;
        let ty = self.types.array_of(c, len);
        let sym = self.syms.declare(
            &mut self.ns_ident,
            &self.types,
            loc,
            "__func__",
            ty,
            SymKind::StringValue,
            Linkage::Intern,
        )?;
        self.syms.get_mut(sym).string_value = Some(name.to_string());
        Ok(())
    }

    /// Parse one declaration statement, covering external declarations,
    /// function definitions, and local declarations with initializers
    /// inside function bodies. Returns the (possibly advanced) insertion
    /// block.
    pub(crate) fn declaration(
        &mut self,
        parent: Option<BlockId>,
    ) -> CompileResult<Option<BlockId>> {
        let (base, storage) = self.declaration_specifiers(true)?;
        let file_scope = self.ns_ident.current_depth() == 0;
        let (decl_symtype, linkage) = match storage {
            Some(StorageClass::Extern) => (SymKind::Declaration, Linkage::Extern),
            Some(StorageClass::Static) => (SymKind::Tentative, Linkage::Intern),
            Some(StorageClass::Typedef) => (SymKind::Typedef, Linkage::None),
            _ => {
                if file_scope {
                    (SymKind::Tentative, Linkage::Extern)
                } else {
                    (SymKind::Definition, Linkage::None)
                }
            }
        };
        let mut parent = parent;

        loop {
            let loc = self.toks.loc();
            let (ty, name) = self.declarator(base)?;
            let Some(name) = name else {
                self.toks.consume(TokKind::Semi)?;
                return Ok(parent);
            };
            // Functions are never defined at block scope; a local
            // function declaration keeps its external linkage.
            let mut symtype = decl_symtype;
            if self.types.is_function(ty) && symtype == SymKind::Definition {
                symtype = SymKind::Declaration;
            }
            let sym = self.syms.declare(
                &mut self.ns_ident,
                &self.types,
                loc,
                &name,
                ty,
                symtype,
                if self.types.is_function(ty) && linkage == Linkage::None {
                    Linkage::Extern
                } else {
                    linkage
                },
            )?;
            if !file_scope
                && self.syms.get(sym).kind == SymKind::Definition
                && self.types.is_object(ty)
            {
                if let Some(idx) = self.current_func_idx() {
                    self.pending[idx].locals.push(sym);
                }
            }

            match self.toks.peek().kind {
                TokKind::Semi => {
                    self.toks.consume(TokKind::Semi)?;
                    return Ok(parent);
                }
                TokKind::Assign => {
                    if self.syms.get(sym).kind == SymKind::Declaration {
                        return err!(loc, "extern symbol '{}' cannot be initialized", name);
                    }
                    if file_scope && self.syms.get(sym).kind == SymKind::Definition {
                        return err!(loc, "symbol '{}' was already defined", name);
                    }
                    self.toks.consume(TokKind::Assign)?;
                    self.syms.get_mut(sym).kind = SymKind::Definition;
                    let target = Var::direct(sym, self.syms.get(sym).ty);
                    if self.syms.get(sym).linkage == Linkage::None {
                        let block = parent.expect("local initializer outside any block");
                        parent = Some(self.initializer(block, target)?);
                    } else {
                        let body = self.push_back_definition(sym);
                        self.initializer(body, target)?;
                        if !file_scope {
                            // A block-scope static: its definition is done,
                            // so slot it in ahead of the enclosing function
                            // to keep the function at the back of the
                            // buffer for further block emission.
                            let done = self.pending.pop_back().unwrap();
                            let at = self.pending.len().saturating_sub(1);
                            self.pending.insert(at, done);
                        }
                    }
                    debug_assert!(self.types.size_of(self.syms.get(sym).ty) > 0);
                    if !self.toks.at(TokKind::Comma) {
                        self.toks.consume(TokKind::Semi)?;
                        return Ok(parent);
                    }
                }
                TokKind::LBrace => {
                    if !self.types.is_function(ty) || !file_scope {
                        return err!(loc, "invalid function definition");
                    }
                    debug_assert!(parent.is_none());
                    if self.syms.get(sym).kind == SymKind::Definition {
                        return err!(loc, "redefinition of '{}'", name);
                    }
                    self.syms.get_mut(sym).kind = SymKind::Definition;
                    trace!("parsing function definition '{name}'");
                    let body = self.push_back_definition(sym);
                    self.ns_ident.push_scope();
                    self.define_builtin_func_name(loc, &name)?;
                    for i in 0..self.types.nmembers(ty) {
                        let member = self.types.member(ty, i);
                        let (pname, pty) = (member.name.clone(), member.ty);
                        let Some(pname) = pname else {
                            return err!(loc, "missing parameter name at position {}", i + 1);
                        };
                        let psym = self.syms.declare(
                            &mut self.ns_ident,
                            &self.types,
                            loc,
                            &pname,
                            pty,
                            SymKind::Definition,
                            Linkage::None,
                        )?;
                        let idx = self.current_func_idx().unwrap();
                        self.pending[idx].params.push(psym);
                    }
                    self.function_body(body)?;
                    self.ns_ident.pop_scope();
                    return Ok(parent);
                }
                _ => {}
            }
            self.toks.consume(TokKind::Comma)?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Terminator;

    fn parse_all(src: &str) -> (Parser, Vec<Definition>) {
        let mut parser = Parser::new(src).unwrap();
        let mut defs = Vec::new();
        while let Some(def) = parser.parse().unwrap() {
            defs.push(def);
        }
        (parser, defs)
    }

    #[test]
    fn struct_declaration_layout() {
        let (p, _) = parse_all("struct s { char a; int b; char c; }; struct s v;");
        let sym = p.ns_ident.lookup("v").unwrap();
        let ty = p.syms.get(sym).ty;
        assert_eq!(p.types.size_of(ty), 12);
        assert_eq!(p.types.alignment(ty), 4);
        let s = p.types.unwrapped(ty);
        assert_eq!(p.types.member(s, 0).offset, 0);
        assert_eq!(p.types.member(s, 1).offset, 4);
        assert_eq!(p.types.member(s, 2).offset, 8);
    }

    #[test]
    fn union_declaration_layout() {
        let (p, _) = parse_all("union u { int i; double d; char s[5]; } v;");
        let sym = p.ns_ident.lookup("v").unwrap();
        let ty = p.syms.get(sym).ty;
        assert_eq!(p.types.size_of(ty), 8);
        assert_eq!(p.types.alignment(ty), 8);
    }

    #[test]
    fn array_initializer_completes_type() {
        let (p, defs) = parse_all("int a[] = {1, 2, 3};");
        let sym = p.ns_ident.lookup("a").unwrap();
        let ty = p.syms.get(sym).ty;
        assert!(p.types.is_array(ty));
        assert_eq!(p.types.size_of(ty), 12);
        assert_eq!(p.types.array_count(ty), 3);

        // Three stores, at offsets 0, 4, 8.
        assert_eq!(defs.len(), 1);
        let body = defs[0].block(defs[0].body);
        let offsets: Vec<i32> = body.code.iter().map(|s| s.target.offset).collect();
        assert_eq!(offsets, vec![0, 4, 8]);
        let values: Vec<i64> = body.code.iter().map(|s| s.a.imm).collect();
        assert_eq!(values, vec![1, 2, 3]);
    }

    #[test]
    fn string_initializer_completes_char_array() {
        let (p, defs) = parse_all("char s[] = \"hey\";");
        let sym = p.ns_ident.lookup("s").unwrap();
        assert_eq!(p.types.size_of(p.syms.get(sym).ty), 4);
        assert_eq!(defs.len(), 1);
    }

    #[test]
    fn struct_initializer_zero_fills_remainder() {
        let (_, defs) = parse_all("struct p { int x; int y; int z; } a = {1};");
        let body = defs[0].block(defs[0].body);
        // One explicit store plus two zero stores.
        assert_eq!(body.code.len(), 3);
        assert_eq!(body.code[1].a.imm, 0);
        assert_eq!(body.code[2].a.imm, 0);
        assert_eq!(body.code[2].target.offset, 8);
    }

    #[test]
    fn enum_constants_fold() {
        let (p, defs) = parse_all("enum color { RED, GREEN = 5, BLUE }; int x = BLUE;");
        assert_eq!(defs.len(), 1);
        let sym = p.ns_ident.lookup("BLUE").unwrap();
        assert_eq!(p.syms.get(sym).enum_value, 6);
        let body = defs[0].block(defs[0].body);
        assert_eq!(body.code[0].a.imm, 6);
    }

    #[test]
    fn typedef_and_pointer_declarators() {
        let (p, _) = parse_all("typedef unsigned long size_t; size_t n; int (*fp)(int, char);");
        let n = p.ns_ident.lookup("n").unwrap();
        assert_eq!(p.syms.get(n).ty, p.types.ulong);

        let fp = p.ns_ident.lookup("fp").unwrap();
        let ty = p.syms.get(fp).ty;
        assert!(p.types.is_pointer(ty));
        let func = p.types.base(ty).unwrap();
        assert!(p.types.is_function(func));
        assert_eq!(p.types.nmembers(func), 2);
        assert_eq!(p.types.base(func), Some(p.types.int_));
    }

    #[test]
    fn function_definition_produces_cfg() {
        let (p, defs) = parse_all("int add(int a, int b) { return a + b; }");
        assert_eq!(defs.len(), 1);
        let def = &defs[0];
        assert_eq!(def.params.len(), 2);
        assert_eq!(p.syms.get(def.sym).name, "add");
        match &def.block(def.body).term {
            Terminator::Return(_) => {}
            other => panic!("expected return terminator, got {other:?}"),
        }
    }

    #[test]
    fn errors() {
        assert!(Parser::new("int;").unwrap().parse().is_ok());
        let cases = [
            "int int x;",
            "long long long x;",
            "struct s { struct t z; } v;",
            "int a[] = \"x\";",
            "int a[2] = {1, 2, 3};",
            "extern int x = 1;",
            "int x = 1; int x = 2;",
            "enum e { A }; enum e { B };",
            "struct s { int x; }; struct s { int y; };",
            "int y; int a = y;",
        ];
        for src in cases {
            let mut parser = Parser::new(src).unwrap();
            let mut result = Ok(());
            loop {
                match parser.parse() {
                    Ok(Some(_)) => continue,
                    Ok(None) => break,
                    Err(e) => {
                        result = Err(e);
                        break;
                    }
                }
            }
            assert!(result.is_err(), "expected error for: {src}");
        }
    }
}
