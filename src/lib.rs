//! A small C compiler producing x86-64 ELF relocatable objects.
//!
//! The pipeline is conventional: a lexer turns preprocessed C source into
//! a token stream; the parser builds types in an interned [`types::TypePool`],
//! binds names through scoped [`symtab`] namespaces, and lowers declarations,
//! initializers and statements into a per-definition control-flow graph of
//! three-address statements ([`ir`]). The back end classifies parameters
//! per the System V AMD64 ABI ([`isa::x64::abi`]), selects abstract x86-64
//! instructions ([`isa::x64::lower`]), encodes them ([`isa::x64::emit`]),
//! and writes an `ET_REL` object ([`obj::elf`]).
//!
//! [`parse::Parser::parse`] is a lazy producer: each call hands out the
//! next completed [`ir::Definition`] (a function body or an initialized
//! object), parsing further input only when its buffer runs dry.

pub mod error;

pub mod binemit;
mod fx;
pub mod ir;
pub mod isa;
pub mod obj;
pub mod parse;
pub mod symtab;
pub mod types;

use error::CompileResult;
use ir::{Op, Terminator, VarKind};
use symtab::SymKind;

/// Compile one preprocessed C translation unit into an ELF64 relocatable
/// object image.
pub fn compile(source: &str) -> CompileResult<Vec<u8>> {
    let mut parser = parse::Parser::new(source)?;
    let mut elf = obj::elf::ElfObject::new();

    // Object definitions are buffered so their images land in `.data`
    // after all functions; ordering within a section is declaration
    // order either way.
    let mut objects = Vec::new();
    while let Some(def) = parser.parse()? {
        let ty = parser.syms.get(def.sym).ty;
        if parser.types.is_function(ty) {
            let mut lower = isa::x64::lower::Lower::new(&parser.types, &mut parser.syms, &mut elf);
            lower.function(&def);
        } else {
            objects.push(def);
        }
    }

    for def in &objects {
        emit_object(&parser, &mut elf, def)?;
    }

    // Remaining tentative definitions become zero-initialized storage;
    // this covers file-scope objects and function-local statics alike.
    for (id, sym) in parser.syms.iter() {
        if sym.kind == SymKind::Tentative && parser.types.is_object(sym.ty) {
            let size = parser.types.size_of(sym.ty).max(1) as u64;
            let align = isa::x64::abi::sym_alignment(&parser.types, &parser.syms, id) as u64;
            elf.add_bss(id, size, align);
        }
    }

    // String literals, including any `__func__` values.
    for (id, sym) in parser.syms.iter() {
        if sym.kind == SymKind::StringValue {
            if let Some(value) = &sym.string_value {
                let mut bytes = value.clone().into_bytes();
                bytes.push(0);
                elf.add_rodata(id, &bytes);
            }
        }
    }

    Ok(elf.finalize(&parser.syms, &parser.types))
}

/// Evaluate a file-scope object definition into a byte image plus
/// relocations, and place it in `.data`. The parser guarantees every
/// stored value is an immediate.
fn emit_object(
    parser: &parse::Parser,
    elf: &mut obj::elf::ElfObject,
    def: &ir::Definition,
) -> CompileResult<()> {
    let pool = &parser.types;
    let syms = &parser.syms;
    let ty = syms.get(def.sym).ty;
    let size = pool.size_of(ty) as usize;
    let mut image = vec![0u8; size];
    let mut relocs: Vec<(u64, symtab::SymId)> = Vec::new();

    // Initializer code is straight-line; walk the fall chain from the
    // entry block.
    let mut block = Some(def.body);
    while let Some(id) = block {
        let b = def.block(id);
        for stmt in &b.code {
            debug_assert_eq!(stmt.op, Op::Assign);
            debug_assert_eq!(stmt.target.kind, VarKind::Direct);
            let at = stmt.target.offset as usize;
            match stmt.a.sym {
                // A string literal: either copied into a char array, or
                // its address stored into a pointer.
                Some(string_sym) => {
                    if pool.is_array(stmt.target.ty) {
                        let text = syms
                            .get(string_sym)
                            .string_value
                            .as_deref()
                            .expect("string symbol without value");
                        image[at..at + text.len()].copy_from_slice(text.as_bytes());
                    } else {
                        relocs.push((at as u64, string_sym));
                    }
                }
                None => {
                    let width = pool.size_of(stmt.target.ty).min(8) as usize;
                    let bytes = stmt.a.imm.to_le_bytes();
                    image[at..at + width].copy_from_slice(&bytes[..width]);
                }
            }
        }
        block = match &b.term {
            Terminator::Fall(next) => Some(*next),
            _ => None,
        };
    }

    let align = isa::x64::abi::sym_alignment(pool, syms, def.sym);
    let base = elf.add_data(def.sym, &image, align);
    for (offset, sym) in relocs {
        elf.reloc_data(base + offset, sym, 0);
    }
    Ok(())
}
