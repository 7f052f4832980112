//! The type registry.
//!
//! Types are interned in a `TypePool` and referred to by opaque `TypeId`
//! indices. Member lists are owned separately from the types that use them,
//! which keeps the ownership graph acyclic: a struct type holds a
//! `MemberListId` into the pool's list table rather than owning its fields
//! directly. Tag types wrap a struct or union definition so that
//! cv-qualified copies can be handed out without mutating the canonical
//! definition.

use std::fmt;

/// An opaque reference to an interned type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TypeId(u32);

impl TypeId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// An opaque reference to a separately-owned member list.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemberListId(u32);

/// The shape of a type tree node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TypeKind {
    Void,
    Signed,
    Unsigned,
    Real,
    Pointer,
    Array,
    Function,
    Struct,
    Union,
    /// An indirection wrapping a struct or union definition, so qualifiers
    /// can differ between references without touching the definition.
    Tag,
}

/// Type qualifiers, a small bit set over `const` and `volatile`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Qualifiers(u8);

impl Qualifiers {
    pub const NONE: Qualifiers = Qualifiers(0);
    pub const CONST: Qualifiers = Qualifiers(1);
    pub const VOLATILE: Qualifiers = Qualifiers(2);

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn is_const(self) -> bool {
        self.0 & Self::CONST.0 != 0
    }

    pub fn is_volatile(self) -> bool {
        self.0 & Self::VOLATILE.0 != 0
    }

    pub fn contains(self, other: Qualifiers) -> bool {
        self.0 & other.0 != 0
    }

    pub fn insert(&mut self, other: Qualifiers) {
        self.0 |= other.0;
    }
}

/// A struct/union field or a function parameter.
#[derive(Clone, Debug)]
pub struct Member {
    /// Field or parameter name. Unnamed function parameters are allowed in
    /// declarations (but not definitions).
    pub name: Option<String>,
    pub ty: TypeId,
    /// Byte offset within the containing aggregate; always 0 for unions and
    /// function parameters.
    pub offset: u32,
}

#[derive(Default)]
struct MemberList {
    members: Vec<Member>,
    vararg: bool,
}

struct TypeData {
    kind: TypeKind,
    /// Size in bytes; 0 marks an incomplete type.
    size: u32,
    qualifiers: Qualifiers,
    /// Pointee, array element, function return type, or tag target.
    base: Option<TypeId>,
    members: Option<MemberListId>,
    /// Array element count; kept so an incomplete array (count 0) can be
    /// completed by an initializer.
    count: u32,
    /// Tag name, set only for `Tag` nodes.
    tag: Option<String>,
}

/// Process-wide, append-only registry of types and member lists.
///
/// Commonly used basic types are interned up front and exposed as fields, so
/// `pool.int_` is the canonical unqualified `int` everywhere.
pub struct TypePool {
    types: Vec<TypeData>,
    lists: Vec<MemberList>,

    pub void_: TypeId,
    pub char_: TypeId,
    pub short_: TypeId,
    pub int_: TypeId,
    pub long_: TypeId,
    pub uchar: TypeId,
    pub ushort: TypeId,
    pub uint: TypeId,
    pub ulong: TypeId,
    pub float_: TypeId,
    pub double_: TypeId,
}

impl TypePool {
    pub fn new() -> Self {
        let mut pool = TypePool {
            types: Vec::new(),
            lists: Vec::new(),
            void_: TypeId(0),
            char_: TypeId(0),
            short_: TypeId(0),
            int_: TypeId(0),
            long_: TypeId(0),
            uchar: TypeId(0),
            ushort: TypeId(0),
            uint: TypeId(0),
            ulong: TypeId(0),
            float_: TypeId(0),
            double_: TypeId(0),
        };

        pool.void_ = pool.intern(TypeKind::Void, 0, None);
        pool.char_ = pool.intern(TypeKind::Signed, 1, None);
        pool.short_ = pool.intern(TypeKind::Signed, 2, None);
        pool.int_ = pool.intern(TypeKind::Signed, 4, None);
        pool.long_ = pool.intern(TypeKind::Signed, 8, None);
        pool.uchar = pool.intern(TypeKind::Unsigned, 1, None);
        pool.ushort = pool.intern(TypeKind::Unsigned, 2, None);
        pool.uint = pool.intern(TypeKind::Unsigned, 4, None);
        pool.ulong = pool.intern(TypeKind::Unsigned, 8, None);
        pool.float_ = pool.intern(TypeKind::Real, 4, None);
        pool.double_ = pool.intern(TypeKind::Real, 8, None);
        pool
    }

    fn intern(&mut self, kind: TypeKind, size: u32, base: Option<TypeId>) -> TypeId {
        let id = TypeId(self.types.len() as u32);
        self.types.push(TypeData {
            kind,
            size,
            qualifiers: Qualifiers::NONE,
            base,
            members: None,
            count: 0,
            tag: None,
        });
        id
    }

    fn data(&self, ty: TypeId) -> &TypeData {
        &self.types[ty.index()]
    }

    fn data_mut(&mut self, ty: TypeId) -> &mut TypeData {
        &mut self.types[ty.index()]
    }

    /// The canonical signed integer type of the given width.
    pub fn signed(&self, width: u32) -> TypeId {
        match width {
            1 => self.char_,
            2 => self.short_,
            4 => self.int_,
            8 => self.long_,
            _ => panic!("invalid integer width: {width}"),
        }
    }

    /// The canonical unsigned integer type of the given width.
    pub fn unsigned(&self, width: u32) -> TypeId {
        match width {
            1 => self.uchar,
            2 => self.ushort,
            4 => self.uint,
            8 => self.ulong,
            _ => panic!("invalid integer width: {width}"),
        }
    }

    /// Create a pointer to `base`. Pointers are always 8 bytes.
    pub fn pointer_to(&mut self, base: TypeId) -> TypeId {
        self.intern(TypeKind::Pointer, 8, Some(base))
    }

    /// Create an array of `count` elements. A count of 0 yields an
    /// incomplete array, to be completed by an initializer or string
    /// literal.
    pub fn array_of(&mut self, elem: TypeId, count: u32) -> TypeId {
        let size = self.size_of(elem) * count;
        let id = self.intern(TypeKind::Array, size, Some(elem));
        self.data_mut(id).count = count;
        id
    }

    /// Create an empty function type returning `ret`. Parameters are added
    /// with [`TypePool::add_member`].
    pub fn function(&mut self, ret: TypeId) -> TypeId {
        self.intern(TypeKind::Function, 0, Some(ret))
    }

    /// Create an empty struct type; members are added with
    /// [`TypePool::add_member`], which re-runs field layout.
    pub fn struct_type(&mut self) -> TypeId {
        self.intern(TypeKind::Struct, 0, None)
    }

    /// Create an empty union type.
    pub fn union_type(&mut self) -> TypeId {
        self.intern(TypeKind::Union, 0, None)
    }

    /// Wrap a struct or union definition in a named tag node. The copy can
    /// be qualified independently of the definition.
    pub fn tagged_copy(&mut self, obj: TypeId, name: &str) -> TypeId {
        assert!(!self.is_tagged(obj));
        assert!(self.is_struct_or_union(obj));
        let id = self.intern(TypeKind::Tag, 0, Some(obj));
        self.data_mut(id).tag = Some(name.to_string());
        id
    }

    /// Make a copy of `ty` with the given qualifiers added. Basic types are
    /// shared, so qualification always copies.
    pub fn qualified(&mut self, ty: TypeId, qualifiers: Qualifiers) -> TypeId {
        if qualifiers.is_empty() {
            return ty;
        }
        let src = self.data(ty);
        let copy = TypeData {
            kind: src.kind,
            size: src.size,
            qualifiers: src.qualifiers,
            base: src.base,
            members: src.members,
            count: src.count,
            tag: src.tag.clone(),
        };
        let id = TypeId(self.types.len() as u32);
        self.types.push(copy);
        self.data_mut(id).qualifiers.insert(qualifiers);
        id
    }

    /// Qualify a freshly created node in place. Interned basic types must
    /// go through [`TypePool::qualified`] instead.
    pub(crate) fn add_qualifiers(&mut self, ty: TypeId, qualifiers: Qualifiers) {
        self.data_mut(ty).qualifiers.insert(qualifiers);
    }

    /// Peel a tag indirection, yielding the wrapped definition.
    pub fn unwrapped(&self, ty: TypeId) -> TypeId {
        if self.data(ty).kind == TypeKind::Tag {
            self.data(ty).base.unwrap()
        } else {
            ty
        }
    }

    pub fn kind(&self, ty: TypeId) -> TypeKind {
        self.data(ty).kind
    }

    pub fn qualifiers(&self, ty: TypeId) -> Qualifiers {
        self.data(ty).qualifiers
    }

    pub fn tag_name(&self, ty: TypeId) -> Option<&str> {
        self.data(ty).tag.as_deref()
    }

    /// Pointee, array element, function return type, or tag target.
    pub fn base(&self, ty: TypeId) -> Option<TypeId> {
        self.data(ty).base
    }

    /// The type a pointer points to, through tag indirections.
    pub fn deref(&self, ty: TypeId) -> TypeId {
        assert!(self.is_pointer(ty));
        self.unwrapped(self.data(self.unwrapped(ty)).base.unwrap())
    }

    pub fn size_of(&self, ty: TypeId) -> u32 {
        let data = self.data(ty);
        if data.kind == TypeKind::Tag {
            self.data(data.base.unwrap()).size
        } else {
            data.size
        }
    }

    pub fn array_count(&self, ty: TypeId) -> u32 {
        let ty = self.unwrapped(ty);
        assert!(self.is_array(ty));
        let data = self.data(ty);
        if data.size == 0 {
            0
        } else {
            data.size / self.size_of(data.base.unwrap())
        }
    }

    /// Complete an incomplete outermost array dimension. Each incomplete
    /// array type is created fresh by the declarator, so updating it in
    /// place does not affect unrelated declarations.
    pub fn complete_array(&mut self, ty: TypeId, count: u32) {
        assert!(self.is_array(ty));
        assert_eq!(self.data(ty).size, 0);
        let elem = self.data(ty).base.unwrap();
        let size = self.size_of(elem) * count;
        let data = self.data_mut(ty);
        data.count = count;
        data.size = size;
    }

    /// Replace the placeholder base at the tail of a declarator chain.
    /// Array sizes along the chain are recomputed afterwards, since they
    /// depend on the element size that was not known while the inner
    /// declarator was parsed.
    pub(crate) fn splice_base(&mut self, ty: TypeId, new_base: TypeId) {
        assert!(self.data(ty).base.is_some());
        self.data_mut(ty).base = Some(new_base);
    }

    pub(crate) fn refresh_chain_sizes(&mut self, head: TypeId) {
        let data = self.data(head);
        if let (TypeKind::Array, Some(base)) = (data.kind, data.base) {
            let count = data.count;
            self.refresh_chain_sizes(base);
            let size = self.size_of(base) * count;
            self.data_mut(head).size = size;
        }
    }

    /// Alignment of a non-aggregate equals its size; arrays take the
    /// element alignment; structs and unions the strongest member
    /// alignment.
    pub fn alignment(&self, ty: TypeId) -> u32 {
        assert!(self.is_object(ty));
        match self.data(ty).kind {
            TypeKind::Array => self.alignment(self.data(ty).base.unwrap()),
            TypeKind::Struct | TypeKind::Union | TypeKind::Tag => {
                let ty = self.unwrapped(ty);
                let mut max = 0;
                for i in 0..self.nmembers(ty) {
                    let a = self.alignment(self.member(ty, i).ty);
                    if a > max {
                        max = a;
                    }
                }
                assert!(max > 0);
                max
            }
            _ => self.data(ty).size,
        }
    }

    pub fn nmembers(&self, ty: TypeId) -> usize {
        match self.data(ty).members {
            Some(list) => self.lists[list.0 as usize].members.len(),
            None => 0,
        }
    }

    pub fn member(&self, ty: TypeId, n: usize) -> &Member {
        let list = self.data(ty).members.expect("type has no members");
        &self.lists[list.0 as usize].members[n]
    }

    pub fn members(&self, ty: TypeId) -> &[Member] {
        match self.data(ty).members {
            Some(list) => &self.lists[list.0 as usize].members,
            None => &[],
        }
    }

    /// Find a struct or union field by name, through tag indirections.
    pub fn find_member(&self, ty: TypeId, name: &str) -> Option<&Member> {
        assert!(self.is_struct_or_union(ty));
        let ty = self.unwrapped(ty);
        self.members(ty).iter().find(|m| m.name.as_deref() == Some(name))
    }

    pub fn is_vararg(&self, ty: TypeId) -> bool {
        assert!(self.is_function(ty));
        match self.data(ty).members {
            Some(list) => self.lists[list.0 as usize].vararg,
            None => false,
        }
    }

    /// Add a member to a struct, union or function type.
    ///
    /// Struct layout is re-run after each insert: fields are padded to
    /// their own alignment and the total is rounded up to the strongest
    /// member alignment. Union size is the maximum member size. Function
    /// parameters of array type decay to pointers, and the sentinel name
    /// `"..."` sets the vararg flag instead of appending a member.
    pub fn add_member(&mut self, container: TypeId, name: Option<String>, member_ty: TypeId) {
        assert!(self.is_struct_or_union(container) || self.is_function(container));
        assert!(!self.is_function(container) || !self.is_vararg(container));
        assert!(!self.is_tagged(container));

        let mut member_ty = member_ty;
        if self.is_function(container) {
            if name.as_deref() == Some("...") {
                let list = self.member_list(container);
                self.lists[list.0 as usize].vararg = true;
                return;
            }
            if self.is_array(member_ty) {
                let elem = self.data(member_ty).base.unwrap();
                member_ty = self.pointer_to(elem);
            }
        }

        let list = self.member_list(container);
        self.lists[list.0 as usize].members.push(Member {
            name,
            ty: member_ty,
            offset: 0,
        });

        match self.data(container).kind {
            TypeKind::Struct => self.layout_struct(container),
            TypeKind::Union => {
                let size = self.size_of(member_ty);
                if self.data(container).size < size {
                    self.data_mut(container).size = size;
                }
            }
            _ => {}
        }
    }

    fn member_list(&mut self, container: TypeId) -> MemberListId {
        if let Some(list) = self.data(container).members {
            return list;
        }
        let list = MemberListId(self.lists.len() as u32);
        self.lists.push(MemberList::default());
        self.data_mut(container).members = Some(list);
        list
    }

    /// Walk fields in declaration order, padding each to its alignment,
    /// and round the total to the strongest alignment.
    fn layout_struct(&mut self, container: TypeId) {
        let list = self.data(container).members.unwrap();
        let n = self.lists[list.0 as usize].members.len();
        let mut size = 0u32;
        let mut max_alignment = 0u32;
        for i in 0..n {
            let ty = self.lists[list.0 as usize].members[i].ty;
            let alignment = self.alignment(ty);
            if alignment > max_alignment {
                max_alignment = alignment;
            }
            if size % alignment != 0 {
                size += alignment - size % alignment;
            }
            self.lists[list.0 as usize].members[i].offset = size;
            size += self.size_of(ty);
        }
        if max_alignment > 0 && size % max_alignment != 0 {
            size += max_alignment - size % max_alignment;
        }
        self.data_mut(container).size = size;
    }

    pub fn is_void(&self, ty: TypeId) -> bool {
        self.data(ty).kind == TypeKind::Void
    }

    pub fn is_integer(&self, ty: TypeId) -> bool {
        matches!(self.data(ty).kind, TypeKind::Signed | TypeKind::Unsigned)
    }

    pub fn is_unsigned(&self, ty: TypeId) -> bool {
        self.data(ty).kind == TypeKind::Unsigned
    }

    pub fn is_real(&self, ty: TypeId) -> bool {
        self.data(ty).kind == TypeKind::Real
    }

    pub fn is_arithmetic(&self, ty: TypeId) -> bool {
        self.is_integer(ty) || self.is_real(ty)
    }

    pub fn is_pointer(&self, ty: TypeId) -> bool {
        self.data(self.unwrapped(ty)).kind == TypeKind::Pointer
    }

    pub fn is_array(&self, ty: TypeId) -> bool {
        self.data(self.unwrapped(ty)).kind == TypeKind::Array
    }

    pub fn is_function(&self, ty: TypeId) -> bool {
        self.data(ty).kind == TypeKind::Function
    }

    pub fn is_struct_or_union(&self, ty: TypeId) -> bool {
        let data = self.data(ty);
        matches!(data.kind, TypeKind::Struct | TypeKind::Union)
            || (data.kind == TypeKind::Tag
                && matches!(
                    self.data(data.base.unwrap()).kind,
                    TypeKind::Struct | TypeKind::Union
                ))
    }

    pub fn is_union(&self, ty: TypeId) -> bool {
        self.data(self.unwrapped(ty)).kind == TypeKind::Union
    }

    pub fn is_tagged(&self, ty: TypeId) -> bool {
        self.data(ty).kind == TypeKind::Tag
    }

    pub fn is_object(&self, ty: TypeId) -> bool {
        !self.is_function(ty)
    }

    pub fn is_scalar(&self, ty: TypeId) -> bool {
        self.is_arithmetic(ty) || self.is_pointer(ty)
    }

    /// Structural type equality, disregarding qualifiers and parameter
    /// names. Two tags are equal iff they wrap the same interned
    /// definition.
    pub fn type_equal(&self, a: TypeId, b: TypeId) -> bool {
        if a == b {
            return true;
        }
        if self.is_tagged(a) && self.is_tagged(b) {
            return self.data(a).base == self.data(b).base;
        }
        let a = self.unwrapped(a);
        let b = self.unwrapped(b);
        let da = self.data(a);
        let db = self.data(b);
        if da.kind != db.kind
            || da.size != db.size
            || self.nmembers(a) != self.nmembers(b)
        {
            return false;
        }
        match (da.base, db.base) {
            (None, None) => {}
            (Some(na), Some(nb)) => {
                if !self.type_equal(na, nb) {
                    return false;
                }
            }
            _ => return false,
        }
        for i in 0..self.nmembers(a) {
            let ma = self.member(a, i);
            let mb = self.member(b, i);
            if !self.type_equal(ma.ty, mb.ty) {
                return false;
            }
            if self.is_struct_or_union(a) && ma.name != mb.name {
                return false;
            }
            debug_assert_eq!(ma.offset, mb.offset);
        }
        true
    }

    /// 6.2.7 Compatible types, simplified to structural equality.
    pub fn is_compatible(&self, l: TypeId, r: TypeId) -> bool {
        self.type_equal(l, r)
    }

    /// Promote an integer type narrower than `int` to `int` or
    /// `unsigned int`, preserving signedness.
    pub fn promote_integer(&self, ty: TypeId) -> TypeId {
        assert!(self.is_integer(ty));
        if self.size_of(ty) < 4 {
            if self.is_unsigned(ty) {
                self.uint
            } else {
                self.int_
            }
        } else {
            // Strip qualifiers by returning the canonical basic type.
            if self.is_unsigned(ty) {
                self.unsigned(self.size_of(ty))
            } else {
                self.signed(self.size_of(ty))
            }
        }
    }

    /// The common real type of two integer operands: promote both, take
    /// the wider, and on a width tie prefer unsigned. Floating-point
    /// operands are rejected by the expression layer before this runs.
    pub fn usual_arithmetic_conversion(&self, t1: TypeId, t2: TypeId) -> TypeId {
        assert!(self.is_arithmetic(t1) && self.is_arithmetic(t2));
        assert!(self.is_integer(t1) && self.is_integer(t2));
        let t1 = self.promote_integer(t1);
        let t2 = self.promote_integer(t2);
        if self.size_of(t1) > self.size_of(t2) {
            t1
        } else if self.size_of(t2) > self.size_of(t1) {
            t2
        } else if self.is_unsigned(t1) {
            t1
        } else {
            t2
        }
    }

    /// Render `ty` for diagnostics.
    pub fn display(&self, ty: TypeId) -> DisplayType<'_> {
        DisplayType { pool: self, ty }
    }
}

/// Wrapper to pretty-print a type with its pool, in the declaration-ish
/// notation used by diagnostics.
pub struct DisplayType<'a> {
    pool: &'a TypePool,
    ty: TypeId,
}

impl fmt::Display for DisplayType<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let pool = self.pool;
        let ty = self.ty;
        let data = pool.data(ty);
        if data.qualifiers.is_const() {
            write!(f, "const ")?;
        }
        if data.qualifiers.is_volatile() {
            write!(f, "volatile ")?;
        }
        if let Some(tag) = &data.tag {
            let keyword = if pool.is_union(ty) { "union" } else { "struct" };
            return write!(f, "{keyword} {tag}");
        }
        match data.kind {
            TypeKind::Void => write!(f, "void"),
            TypeKind::Signed | TypeKind::Unsigned => {
                if data.kind == TypeKind::Unsigned {
                    write!(f, "unsigned ")?;
                }
                match data.size {
                    1 => write!(f, "char"),
                    2 => write!(f, "short"),
                    4 => write!(f, "int"),
                    _ => write!(f, "long"),
                }
            }
            TypeKind::Real => match data.size {
                4 => write!(f, "float"),
                _ => write!(f, "double"),
            },
            TypeKind::Pointer => {
                write!(f, "* ")?;
                write!(f, "{}", pool.display(data.base.unwrap()))
            }
            TypeKind::Array => {
                if data.size > 0 {
                    write!(f, "[{}] ", pool.array_count(ty))?;
                } else {
                    write!(f, "[] ")?;
                }
                write!(f, "{}", pool.display(data.base.unwrap()))
            }
            TypeKind::Function => {
                write!(f, "(")?;
                for (i, member) in pool.members(ty).iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", pool.display(member.ty))?;
                }
                if pool.is_vararg(ty) {
                    write!(f, ", ...")?;
                }
                write!(f, ") -> ")?;
                write!(f, "{}", pool.display(data.base.unwrap()))
            }
            TypeKind::Struct | TypeKind::Union => {
                write!(f, "{{")?;
                for (i, member) in pool.members(ty).iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, ".{}::", member.name.as_deref().unwrap_or(""))?;
                    write!(f, "{}", pool.display(member.ty))?;
                    write!(f, " (+{})", member.offset)?;
                }
                write!(f, "}}")
            }
            TypeKind::Tag => unreachable!(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn struct_layout() {
        let mut pool = TypePool::new();
        let s = pool.struct_type();
        pool.add_member(s, Some("a".to_string()), pool.char_);
        pool.add_member(s, Some("b".to_string()), pool.int_);
        pool.add_member(s, Some("c".to_string()), pool.char_);

        assert_eq!(pool.size_of(s), 12);
        assert_eq!(pool.alignment(s), 4);
        assert_eq!(pool.member(s, 0).offset, 0);
        assert_eq!(pool.member(s, 1).offset, 4);
        assert_eq!(pool.member(s, 2).offset, 8);
        assert_eq!(pool.size_of(s) % pool.alignment(s), 0);
    }

    #[test]
    fn union_layout() {
        let mut pool = TypePool::new();
        let u = pool.union_type();
        let chars = pool.array_of(pool.char_, 5);
        pool.add_member(u, Some("i".to_string()), pool.int_);
        pool.add_member(u, Some("d".to_string()), pool.double_);
        pool.add_member(u, Some("s".to_string()), chars);

        assert_eq!(pool.size_of(u), 8);
        assert_eq!(pool.alignment(u), 8);
        for member in pool.members(u) {
            assert_eq!(member.offset, 0);
        }
    }

    #[test]
    fn tagged_copy_unwraps() {
        let mut pool = TypePool::new();
        let s = pool.struct_type();
        pool.add_member(s, Some("x".to_string()), pool.long_);
        let tag = pool.tagged_copy(s, "s");
        assert!(pool.is_tagged(tag));
        assert_eq!(pool.unwrapped(tag), s);
        assert_eq!(pool.size_of(tag), pool.size_of(s));

        // Qualified copies share the definition and compare equal.
        let cv = pool.qualified(tag, Qualifiers::CONST);
        assert!(pool.type_equal(tag, cv));
    }

    #[test]
    fn equality_is_structural() {
        let mut pool = TypePool::new();
        let a = pool.struct_type();
        pool.add_member(a, Some("x".to_string()), pool.int_);
        let b = pool.struct_type();
        pool.add_member(b, Some("x".to_string()), pool.int_);
        let c = pool.struct_type();
        pool.add_member(c, Some("y".to_string()), pool.int_);

        assert!(pool.type_equal(a, a));
        assert!(pool.type_equal(a, b));
        assert!(pool.type_equal(b, a));
        assert!(!pool.type_equal(a, c));
        assert!(pool.is_compatible(a, b));

        let pa = pool.pointer_to(a);
        let pb = pool.pointer_to(b);
        let pc = pool.pointer_to(c);
        assert!(pool.type_equal(pa, pb));
        assert!(!pool.type_equal(pa, pc));
    }

    #[test]
    fn function_members_decay_and_vararg() {
        let mut pool = TypePool::new();
        let arr = pool.array_of(pool.int_, 4);
        let func = pool.function(pool.void_);
        pool.add_member(func, Some("p".to_string()), arr);
        assert!(pool.is_pointer(pool.member(func, 0).ty));

        assert!(!pool.is_vararg(func));
        pool.add_member(func, Some("...".to_string()), pool.void_);
        assert!(pool.is_vararg(func));
        // The sentinel does not appear in the member list.
        assert_eq!(pool.nmembers(func), 1);
    }

    #[test]
    fn promotion_and_conversion() {
        let pool = TypePool::new();
        assert_eq!(pool.promote_integer(pool.char_), pool.int_);
        assert_eq!(pool.promote_integer(pool.ushort), pool.uint);
        assert_eq!(pool.promote_integer(pool.long_), pool.long_);

        assert_eq!(
            pool.usual_arithmetic_conversion(pool.char_, pool.int_),
            pool.int_
        );
        assert_eq!(
            pool.usual_arithmetic_conversion(pool.int_, pool.ulong),
            pool.ulong
        );
        // Tie on width prefers unsigned.
        assert_eq!(
            pool.usual_arithmetic_conversion(pool.uint, pool.int_),
            pool.uint
        );
    }

    #[test]
    fn incomplete_array_completion() {
        let mut pool = TypePool::new();
        let arr = pool.array_of(pool.int_, 0);
        assert_eq!(pool.size_of(arr), 0);
        pool.complete_array(arr, 3);
        assert_eq!(pool.size_of(arr), 12);
        assert_eq!(pool.array_count(arr), 3);
    }
}
