//! System V AMD64 parameter classification (ABI 3.2.3), simplified.
//!
//! Each parameter and return value is classified as a sequence of
//! eightbyte classes. Aggregates small enough to pass in registers are
//! flattened field by field; anything larger than four eightbytes, or with
//! a misaligned field anywhere in it, is passed in memory. Floating-point
//! registers are not tracked: argument registers are the six integer
//! registers only.

use smallvec::{smallvec, SmallVec};

use crate::symtab::{SymId, SymbolTable};
use crate::types::{TypeId, TypeKind, TypePool};

use super::regs::Gpr;

/// Argument registers, in allocation order.
pub const PARAM_INT_REGS: [Gpr; 6] = [
    Gpr::Rdi,
    Gpr::Rsi,
    Gpr::Rdx,
    Gpr::Rcx,
    Gpr::R8,
    Gpr::R9,
];

/// Return value registers.
pub const RET_INT_REGS: [Gpr; 2] = [Gpr::Rax, Gpr::Rdx];

/// Eightbyte classes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamClass {
    NoClass,
    Integer,
    Sse,
    SseUp,
    Memory,
}

/// The class sequence for one parameter. When the first element is not
/// `Memory`, the length equals the type's eightbyte count (at most 4);
/// `Memory` is always a single element.
pub type ClassSeq = SmallVec<[ParamClass; 4]>;

/// Number of eightbytes needed to hold a value of type `ty`.
pub fn eightbytes(pool: &TypePool, ty: TypeId) -> usize {
    (pool.size_of(ty) as usize + 7) / 8
}

fn combine(a: ParamClass, b: ParamClass) -> ParamClass {
    use ParamClass::*;
    if a == b {
        return a;
    }
    if a == NoClass {
        return b;
    }
    if b == NoClass {
        return a;
    }
    if a == Memory || b == Memory {
        return Memory;
    }
    if a == Integer || b == Integer {
        return Integer;
    }
    Sse
}

/// True if any scalar field, at any nesting depth, sits at an offset that
/// is not a multiple of its own size.
fn has_unaligned_fields(pool: &TypePool, ty: TypeId, offset: u32) -> bool {
    if !pool.is_struct_or_union(ty) {
        return false;
    }
    let ty = pool.unwrapped(ty);
    for i in 0..pool.nmembers(ty) {
        let member = pool.member(ty, i);
        let at = offset + member.offset;
        if at % pool.size_of(member.ty) != 0 {
            return true;
        }
        if has_unaligned_fields(pool, member.ty, at) {
            return true;
        }
    }
    false
}

/// Traverse the type tree depth first, merging each scalar field into the
/// class of the eightbyte containing its start offset.
fn flatten(pool: &TypePool, classes: &mut [ParamClass], ty: TypeId, offset: u32) {
    match pool.kind(ty) {
        TypeKind::Real => {
            let i = offset as usize / 8;
            classes[i] = combine(classes[i], ParamClass::Sse);
        }
        TypeKind::Signed | TypeKind::Unsigned | TypeKind::Pointer => {
            let i = offset as usize / 8;
            classes[i] = combine(classes[i], ParamClass::Integer);
        }
        TypeKind::Struct | TypeKind::Union | TypeKind::Tag => {
            let ty = pool.unwrapped(ty);
            for member in pool.members(ty) {
                flatten(pool, classes, member.ty, member.offset + offset);
            }
        }
        TypeKind::Array => {
            let elem = pool.base(ty).unwrap();
            let elem_size = pool.size_of(elem);
            for i in 0..pool.size_of(ty) / elem_size {
                flatten(pool, classes, elem, i * elem_size + offset);
            }
        }
        TypeKind::Void | TypeKind::Function => unreachable!(),
    }
}

/// Post-combine merge: memory anywhere poisons the whole value, and a
/// value wider than two eightbytes must start with SSE and be continued by
/// SSEUP to stay in registers.
fn merge(classes: &[ParamClass]) -> bool {
    let mut has_sseup = false;
    for &class in classes {
        if class == ParamClass::Memory {
            return true;
        }
        if class == ParamClass::SseUp {
            has_sseup = true;
        }
    }
    classes.len() > 2 && (classes[0] != ParamClass::Sse || !has_sseup)
}

/// Classify a non-function, non-void type as a sequence of eightbyte
/// classes.
pub fn classify(pool: &TypePool, ty: TypeId) -> ClassSeq {
    assert!(pool.kind(ty) != TypeKind::Function);
    assert!(pool.kind(ty) != TypeKind::Void);

    if pool.is_integer(ty) || pool.is_pointer(ty) {
        smallvec![ParamClass::Integer]
    } else if eightbytes(pool, ty) > 4 || has_unaligned_fields(pool, ty, 0) {
        smallvec![ParamClass::Memory]
    } else if pool.is_struct_or_union(ty) {
        let mut classes: ClassSeq = smallvec![ParamClass::NoClass; eightbytes(pool, ty)];
        flatten(pool, &mut classes, pool.unwrapped(ty), 0);
        if merge(&classes) {
            smallvec![ParamClass::Memory]
        } else {
            classes
        }
    } else {
        smallvec![ParamClass::Memory]
    }
}

/// Classified call site: per-argument class sequences plus the return
/// value's.
pub struct CallClasses {
    pub params: Vec<ClassSeq>,
    pub ret: ClassSeq,
}

/// Classify every argument and the return value of a call, then walk the
/// argument list left to right allocating integer registers. An argument
/// is never split between registers and stack: if its eightbytes do not
/// all fit in the remaining registers it is demoted to `Memory` and passed
/// on the stack. A `Memory`-class return value reserves the first integer
/// register for the hidden result pointer.
pub fn classify_call(pool: &TypePool, args: &[TypeId], ret: TypeId) -> CallClasses {
    let mut params: Vec<ClassSeq> = args.iter().map(|&a| classify(pool, a)).collect();

    let mut next_integer_reg = 0;
    let ret_classes = if pool.is_void(ret) {
        smallvec![ParamClass::NoClass]
    } else {
        let classes = classify(pool, ret);
        if classes[0] == ParamClass::Memory {
            next_integer_reg = 1;
        }
        classes
    };

    for (i, param) in params.iter_mut().enumerate() {
        if param[0] != ParamClass::Memory {
            let chunks = eightbytes(pool, args[i]);
            if next_integer_reg + chunks <= PARAM_INT_REGS.len() {
                next_integer_reg += chunks;
            } else {
                *param = smallvec![ParamClass::Memory];
            }
        }
    }

    CallClasses {
        params,
        ret: ret_classes,
    }
}

/// Classify a function type's signature.
pub fn classify_signature(pool: &TypePool, func: TypeId) -> CallClasses {
    assert!(pool.is_function(func));
    let args: Vec<TypeId> = pool.members(func).iter().map(|m| m.ty).collect();
    classify_call(pool, &args, pool.base(func).unwrap())
}

/// Storage alignment for a symbol: its type's alignment, except that
/// arrays of at least 16 bytes are aligned to 16.
pub fn sym_alignment(pool: &TypePool, table: &SymbolTable, sym: SymId) -> u32 {
    let ty = table.get(sym).ty;
    let mut align = pool.alignment(ty);
    if pool.is_array(ty) && pool.size_of(ty) >= 16 && align < 16 {
        align = 16;
    }
    align
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_classes() {
        let mut pool = TypePool::new();
        assert_eq!(classify(&pool, pool.int_)[0], ParamClass::Integer);
        assert_eq!(classify(&pool, pool.ulong)[0], ParamClass::Integer);
        let ptr = pool.pointer_to(pool.void_);
        assert_eq!(classify(&pool, ptr)[0], ParamClass::Integer);
        // Bare floating-point scalars fall back to memory in this
        // simplified variant; SSE classes only arise inside aggregates.
        assert_eq!(classify(&pool, pool.double_)[0], ParamClass::Memory);
    }

    #[test]
    fn two_doubles_pass_as_sse_pair() {
        let mut pool = TypePool::new();
        let s = pool.struct_type();
        pool.add_member(s, Some("x".to_string()), pool.double_);
        pool.add_member(s, Some("y".to_string()), pool.double_);
        let classes = classify(&pool, s);
        assert_eq!(classes.as_slice(), &[ParamClass::Sse, ParamClass::Sse]);
        assert_eq!(classes.len(), eightbytes(&pool, s));
    }

    #[test]
    fn three_longs_go_to_memory() {
        let mut pool = TypePool::new();
        let s = pool.struct_type();
        pool.add_member(s, Some("a".to_string()), pool.long_);
        pool.add_member(s, Some("b".to_string()), pool.long_);
        pool.add_member(s, Some("c".to_string()), pool.long_);
        let classes = classify(&pool, s);
        assert_eq!(classes.as_slice(), &[ParamClass::Memory]);
    }

    #[test]
    fn three_ints_pack_into_two_eightbytes() {
        let mut pool = TypePool::new();
        let s = pool.struct_type();
        pool.add_member(s, Some("a".to_string()), pool.int_);
        pool.add_member(s, Some("b".to_string()), pool.int_);
        pool.add_member(s, Some("c".to_string()), pool.int_);
        let classes = classify(&pool, s);
        assert_eq!(
            classes.as_slice(),
            &[ParamClass::Integer, ParamClass::Integer]
        );
    }

    #[test]
    fn mixed_int_and_double() {
        let mut pool = TypePool::new();
        let s = pool.struct_type();
        pool.add_member(s, Some("i".to_string()), pool.int_);
        pool.add_member(s, Some("d".to_string()), pool.double_);
        let classes = classify(&pool, s);
        assert_eq!(classes.as_slice(), &[ParamClass::Integer, ParamClass::Sse]);
    }

    #[test]
    fn oversized_aggregate_is_memory() {
        let mut pool = TypePool::new();
        let arr = pool.array_of(pool.long_, 5);
        let s = pool.struct_type();
        pool.add_member(s, Some("a".to_string()), arr);
        assert_eq!(classify(&pool, s).as_slice(), &[ParamClass::Memory]);
    }

    #[test]
    fn call_never_splits_an_aggregate() {
        let mut pool = TypePool::new();
        let s = pool.struct_type();
        pool.add_member(s, Some("a".to_string()), pool.long_);
        pool.add_member(s, Some("b".to_string()), pool.long_);

        // void f(int, int, int, int, int, struct {long, long})
        let args = [pool.int_, pool.int_, pool.int_, pool.int_, pool.int_, s];
        let call = classify_call(&pool, &args, pool.void_);
        // Only one integer register remains, so the pair is demoted to
        // memory rather than split.
        assert_eq!(call.params[5].as_slice(), &[ParamClass::Memory]);
        for param in &call.params[..5] {
            assert_eq!(param.as_slice(), &[ParamClass::Integer]);
        }
    }

    #[test]
    fn memory_return_reserves_first_register() {
        let mut pool = TypePool::new();
        let s = pool.struct_type();
        pool.add_member(s, Some("a".to_string()), pool.long_);
        pool.add_member(s, Some("b".to_string()), pool.long_);
        pool.add_member(s, Some("c".to_string()), pool.long_);

        // struct f(int, int, int, int, int, int): the hidden result
        // pointer takes %rdi, demoting the sixth int to the stack.
        let args = [pool.int_; 6];
        let call = classify_call(&pool, &args, s);
        assert_eq!(call.ret.as_slice(), &[ParamClass::Memory]);
        assert_eq!(call.params[5].as_slice(), &[ParamClass::Memory]);
    }

    #[test]
    fn nested_unaligned_fields_force_memory() {
        let mut pool = TypePool::new();
        // A packed-looking layout built by hand: the nested struct's long
        // lands at offset 4 of the outer aggregate.
        let inner = pool.struct_type();
        pool.add_member(inner, Some("l".to_string()), pool.long_);
        assert!(!has_unaligned_fields(&pool, inner, 0));
        assert!(has_unaligned_fields(&pool, inner, 4));
    }
}
