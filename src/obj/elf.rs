//! ELF64 relocatable object writer.
//!
//! Collects text, data and read-only data as instructions and objects are
//! emitted, resolves branch displacements to local labels once both ends
//! are known, and serializes an `ET_REL` file for `EM_X86_64` with
//! `.text`, `.rela.text`, `.data`, `.rela.data`, `.bss`, `.rodata`,
//! `.symtab`, `.strtab` and `.shstrtab` sections.

use crate::binemit::{Reloc, RelocSink};
use crate::fx::FxHashMap;
use crate::isa::x64::emit::encode;
use crate::isa::x64::inst::Inst;
use crate::symtab::{Linkage, SymId, SymKind, SymbolTable};
use crate::types::TypePool;

const ELFCLASS64: u8 = 2;
const ELFDATA2LSB: u8 = 1;
const EV_CURRENT: u8 = 1;
const ET_REL: u16 = 1;
const EM_X86_64: u16 = 62;

const SHT_PROGBITS: u32 = 1;
const SHT_SYMTAB: u32 = 2;
const SHT_STRTAB: u32 = 3;
const SHT_RELA: u32 = 4;
const SHT_NOBITS: u32 = 8;

const SHF_WRITE: u64 = 0x1;
const SHF_ALLOC: u64 = 0x2;
const SHF_EXECINSTR: u64 = 0x4;

const STB_LOCAL: u8 = 0;
const STB_GLOBAL: u8 = 1;
const STT_OBJECT: u8 = 1;
const STT_FUNC: u8 = 2;
const SHN_UNDEF: u16 = 0;

const R_X86_64_64: u32 = 1;
const R_X86_64_PC32: u32 = 2;
const R_X86_64_32S: u32 = 11;

/// Section indices, fixed by the writer's layout.
const SHNDX_TEXT: u16 = 1;
const SHNDX_DATA: u16 = 3;
const SHNDX_BSS: u16 = 5;
const SHNDX_RODATA: u16 = 6;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Section {
    Text,
    Data,
    Bss,
    Rodata,
}

impl Section {
    fn shndx(self) -> u16 {
        match self {
            Section::Text => SHNDX_TEXT,
            Section::Data => SHNDX_DATA,
            Section::Bss => SHNDX_BSS,
            Section::Rodata => SHNDX_RODATA,
        }
    }
}

#[derive(Clone, Copy)]
struct Placement {
    section: Section,
    offset: u64,
    size: u64,
}

struct Rela {
    offset: u64,
    sym: SymId,
    kind: Reloc,
    addend: i64,
}

pub struct ElfObject {
    text: Vec<u8>,
    data: Vec<u8>,
    rodata: Vec<u8>,
    bss_size: u64,
    rela_text: Vec<Rela>,
    rela_data: Vec<Rela>,
    placements: FxHashMap<SymId, Placement>,
    /// Resolved text offsets for functions and block labels.
    text_offsets: FxHashMap<SymId, u32>,
}

impl RelocSink for ElfObject {
    fn reloc_text(&mut self, sym: SymId, kind: Reloc, offset: u32, addend: i64) {
        // PC-relative fields sit 4 bytes before the next instruction the
        // processor measures from.
        let addend = match kind {
            Reloc::X86PC32 => addend - 4,
            Reloc::X86Abs32S | Reloc::X86Abs64 => addend,
        };
        self.rela_text.push(Rela {
            offset: self.text.len() as u64 + offset as u64,
            sym,
            kind,
            addend,
        });
    }

    fn text_displacement(&mut self, sym: SymId, offset: u32) -> i32 {
        let position = self.text.len() as u32 + offset;
        match self.text_offsets.get(&sym) {
            Some(&target) => target as i32 - position as i32,
            None => {
                // Not placed yet; record a relocation and patch it during
                // finalization once the label lands.
                self.rela_text.push(Rela {
                    offset: position as u64,
                    sym,
                    kind: Reloc::X86PC32,
                    addend: -4,
                });
                0
            }
        }
    }
}

impl ElfObject {
    pub fn new() -> ElfObject {
        ElfObject {
            text: Vec::new(),
            data: Vec::new(),
            rodata: Vec::new(),
            bss_size: 0,
            rela_text: Vec::new(),
            rela_data: Vec::new(),
            placements: FxHashMap::default(),
            text_offsets: FxHashMap::default(),
        }
    }

    /// Encode one instruction and append it to the text section.
    pub fn emit_inst(&mut self, inst: &Inst) {
        let code = encode(inst, self);
        self.text.extend_from_slice(code.as_slice());
    }

    pub fn begin_function(&mut self, sym: SymId) {
        let offset = self.text.len() as u64;
        self.text_offsets.insert(sym, offset as u32);
        self.placements.insert(
            sym,
            Placement {
                section: Section::Text,
                offset,
                size: 0,
            },
        );
    }

    pub fn end_function(&mut self, sym: SymId) {
        let end = self.text.len() as u64;
        let placement = self.placements.get_mut(&sym).expect("unbalanced end_function");
        placement.size = end - placement.offset;
    }

    /// Place a block label at the current text position.
    pub fn define_text_label(&mut self, sym: SymId) {
        self.text_offsets.insert(sym, self.text.len() as u32);
    }

    /// Append an initialized object to `.data`; returns its offset.
    pub fn add_data(&mut self, sym: SymId, bytes: &[u8], alignment: u32) -> u64 {
        while self.data.len() % alignment as usize != 0 {
            self.data.push(0);
        }
        let offset = self.data.len() as u64;
        self.data.extend_from_slice(bytes);
        self.placements.insert(
            sym,
            Placement {
                section: Section::Data,
                offset,
                size: bytes.len() as u64,
            },
        );
        offset
    }

    /// Record a 64-bit absolute relocation in `.data`.
    pub fn reloc_data(&mut self, offset: u64, sym: SymId, addend: i64) {
        self.rela_data.push(Rela {
            offset,
            sym,
            kind: Reloc::X86Abs64,
            addend,
        });
    }

    /// Reserve zero-initialized storage in `.bss`.
    pub fn add_bss(&mut self, sym: SymId, size: u64, alignment: u64) {
        self.bss_size = (self.bss_size + alignment - 1) / alignment * alignment;
        self.placements.insert(
            sym,
            Placement {
                section: Section::Bss,
                offset: self.bss_size,
                size,
            },
        );
        self.bss_size += size;
    }

    /// Append a string literal (with NUL terminator) to `.rodata`.
    pub fn add_rodata(&mut self, sym: SymId, bytes: &[u8]) {
        let offset = self.rodata.len() as u64;
        self.rodata.extend_from_slice(bytes);
        self.placements.insert(
            sym,
            Placement {
                section: Section::Rodata,
                offset,
                size: bytes.len() as u64,
            },
        );
    }

    /// Patch PC32 relocations against local labels now that all label
    /// offsets are known; labels never reach the symbol table.
    fn resolve_labels(&mut self, syms: &SymbolTable) {
        let text = &mut self.text;
        let offsets = &self.text_offsets;
        self.rela_text.retain(|rela| {
            if syms.get(rela.sym).kind != SymKind::Label {
                return true;
            }
            let target = *offsets
                .get(&rela.sym)
                .unwrap_or_else(|| panic!("undefined label '{}'", syms.get(rela.sym).name));
            let at = rela.offset as usize;
            let mut field = i32::from_le_bytes(text[at..at + 4].try_into().unwrap());
            field += target as i32 - rela.offset as i32;
            text[at..at + 4].copy_from_slice(&field.to_le_bytes());
            false
        });
    }

    /// Resolve what can be resolved and serialize the object file.
    pub fn finalize(mut self, syms: &SymbolTable, pool: &TypePool) -> Vec<u8> {
        self.resolve_labels(syms);

        // Collect every symbol that needs a table entry: all placed
        // symbols plus relocation targets (externs resolve to UND).
        let mut needed: Vec<SymId> = self.placements.keys().copied().collect();
        for rela in self.rela_text.iter().chain(self.rela_data.iter()) {
            if !self.placements.contains_key(&rela.sym) {
                needed.push(rela.sym);
            }
        }
        needed.sort_by_key(|s| s.index());
        needed.dedup();
        // Locals first; the ELF format requires it.
        needed.sort_by_key(|&s| syms.get(s).linkage == Linkage::Extern);
        let first_global = needed
            .iter()
            .position(|&s| syms.get(s).linkage == Linkage::Extern)
            .unwrap_or(needed.len());

        let mut strtab = StringTable::new();
        let mut symtab: Vec<u8> = vec![0; 24];
        let mut sym_index: FxHashMap<SymId, u32> = FxHashMap::default();
        for (i, &id) in needed.iter().enumerate() {
            let sym = syms.get(id);
            sym_index.insert(id, i as u32 + 1);
            let bind = if sym.linkage == Linkage::Extern {
                STB_GLOBAL
            } else {
                STB_LOCAL
            };
            let typ = if pool.is_function(sym.ty) {
                STT_FUNC
            } else {
                STT_OBJECT
            };
            let (shndx, value, size) = match self.placements.get(&id) {
                Some(p) => (p.section.shndx(), p.offset, p.size),
                None => (SHN_UNDEF, 0, 0),
            };
            symtab.extend_from_slice(&strtab.insert(&sym.name).to_le_bytes());
            symtab.push(bind << 4 | typ);
            symtab.push(0);
            symtab.extend_from_slice(&shndx.to_le_bytes());
            symtab.extend_from_slice(&value.to_le_bytes());
            symtab.extend_from_slice(&size.to_le_bytes());
        }

        let encode_rela = |relas: &[Rela]| {
            let mut out = Vec::with_capacity(relas.len() * 24);
            for rela in relas {
                let rtype = match rela.kind {
                    Reloc::X86PC32 => R_X86_64_PC32,
                    Reloc::X86Abs32S => R_X86_64_32S,
                    Reloc::X86Abs64 => R_X86_64_64,
                };
                let index = sym_index[&rela.sym];
                out.extend_from_slice(&rela.offset.to_le_bytes());
                out.extend_from_slice(&(((index as u64) << 32) | rtype as u64).to_le_bytes());
                out.extend_from_slice(&rela.addend.to_le_bytes());
            }
            out
        };
        let rela_text = encode_rela(&self.rela_text);
        let rela_data = encode_rela(&self.rela_data);

        let mut shstrtab = StringTable::new();
        struct Shdr {
            name: u32,
            sh_type: u32,
            flags: u64,
            offset: u64,
            size: u64,
            link: u32,
            info: u32,
            addralign: u64,
            entsize: u64,
        }

        let mut body: Vec<u8> = Vec::new();
        let place = |payload: &[u8], body: &mut Vec<u8>| -> (u64, u64) {
            while (64 + body.len()) % 8 != 0 {
                body.push(0);
            }
            let offset = 64 + body.len() as u64;
            body.extend_from_slice(payload);
            (offset, payload.len() as u64)
        };

        let (text_off, text_size) = place(&self.text, &mut body);
        let (rela_text_off, rela_text_size) = place(&rela_text, &mut body);
        let (data_off, data_size) = place(&self.data, &mut body);
        let (rela_data_off, rela_data_size) = place(&rela_data, &mut body);
        let bss_off = 64 + body.len() as u64;
        let (rodata_off, rodata_size) = place(&self.rodata, &mut body);
        let (symtab_off, symtab_size) = place(&symtab, &mut body);
        let (strtab_off, strtab_size) = place(strtab.as_bytes(), &mut body);

        let mut headers = vec![Shdr {
            name: 0,
            sh_type: 0,
            flags: 0,
            offset: 0,
            size: 0,
            link: 0,
            info: 0,
            addralign: 0,
            entsize: 0,
        }];
        headers.push(Shdr {
            name: shstrtab.insert(".text"),
            sh_type: SHT_PROGBITS,
            flags: SHF_ALLOC | SHF_EXECINSTR,
            offset: text_off,
            size: text_size,
            link: 0,
            info: 0,
            addralign: 16,
            entsize: 0,
        });
        headers.push(Shdr {
            name: shstrtab.insert(".rela.text"),
            sh_type: SHT_RELA,
            flags: 0,
            offset: rela_text_off,
            size: rela_text_size,
            link: 7,
            info: SHNDX_TEXT as u32,
            addralign: 8,
            entsize: 24,
        });
        headers.push(Shdr {
            name: shstrtab.insert(".data"),
            sh_type: SHT_PROGBITS,
            flags: SHF_ALLOC | SHF_WRITE,
            offset: data_off,
            size: data_size,
            link: 0,
            info: 0,
            addralign: 8,
            entsize: 0,
        });
        headers.push(Shdr {
            name: shstrtab.insert(".rela.data"),
            sh_type: SHT_RELA,
            flags: 0,
            offset: rela_data_off,
            size: rela_data_size,
            link: 7,
            info: SHNDX_DATA as u32,
            addralign: 8,
            entsize: 24,
        });
        headers.push(Shdr {
            name: shstrtab.insert(".bss"),
            sh_type: SHT_NOBITS,
            flags: SHF_ALLOC | SHF_WRITE,
            offset: bss_off,
            size: self.bss_size,
            link: 0,
            info: 0,
            addralign: 16,
            entsize: 0,
        });
        headers.push(Shdr {
            name: shstrtab.insert(".rodata"),
            sh_type: SHT_PROGBITS,
            flags: SHF_ALLOC,
            offset: rodata_off,
            size: rodata_size,
            link: 0,
            info: 0,
            addralign: 1,
            entsize: 0,
        });
        headers.push(Shdr {
            name: shstrtab.insert(".symtab"),
            sh_type: SHT_SYMTAB,
            flags: 0,
            offset: symtab_off,
            size: symtab_size,
            link: 8,
            info: first_global as u32 + 1,
            addralign: 8,
            entsize: 24,
        });
        headers.push(Shdr {
            name: shstrtab.insert(".strtab"),
            sh_type: SHT_STRTAB,
            flags: 0,
            offset: strtab_off,
            size: strtab_size,
            link: 0,
            info: 0,
            addralign: 1,
            entsize: 0,
        });
        let shstrtab_name = shstrtab.insert(".shstrtab");
        let (shstrtab_off, shstrtab_size) = place(shstrtab.as_bytes(), &mut body);
        headers.push(Shdr {
            name: shstrtab_name,
            sh_type: SHT_STRTAB,
            flags: 0,
            offset: shstrtab_off,
            size: shstrtab_size,
            link: 0,
            info: 0,
            addralign: 1,
            entsize: 0,
        });

        while (64 + body.len()) % 8 != 0 {
            body.push(0);
        }
        let shoff = 64 + body.len() as u64;

        // ELF header.
        let mut out = Vec::with_capacity(64 + body.len() + headers.len() * 64);
        out.extend_from_slice(b"\x7fELF");
        out.push(ELFCLASS64);
        out.push(ELFDATA2LSB);
        out.push(EV_CURRENT);
        out.extend_from_slice(&[0; 9]);
        out.extend_from_slice(&ET_REL.to_le_bytes());
        out.extend_from_slice(&EM_X86_64.to_le_bytes());
        out.extend_from_slice(&1u32.to_le_bytes());
        out.extend_from_slice(&0u64.to_le_bytes()); // e_entry
        out.extend_from_slice(&0u64.to_le_bytes()); // e_phoff
        out.extend_from_slice(&shoff.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes()); // e_flags
        out.extend_from_slice(&64u16.to_le_bytes()); // e_ehsize
        out.extend_from_slice(&0u16.to_le_bytes()); // e_phentsize
        out.extend_from_slice(&0u16.to_le_bytes()); // e_phnum
        out.extend_from_slice(&64u16.to_le_bytes()); // e_shentsize
        out.extend_from_slice(&(headers.len() as u16).to_le_bytes());
        out.extend_from_slice(&9u16.to_le_bytes()); // e_shstrndx
        debug_assert_eq!(out.len(), 64);
        out.extend_from_slice(&body);
        for h in &headers {
            out.extend_from_slice(&h.name.to_le_bytes());
            out.extend_from_slice(&h.sh_type.to_le_bytes());
            out.extend_from_slice(&h.flags.to_le_bytes());
            out.extend_from_slice(&0u64.to_le_bytes()); // sh_addr
            out.extend_from_slice(&h.offset.to_le_bytes());
            out.extend_from_slice(&h.size.to_le_bytes());
            out.extend_from_slice(&h.link.to_le_bytes());
            out.extend_from_slice(&h.info.to_le_bytes());
            out.extend_from_slice(&h.addralign.to_le_bytes());
            out.extend_from_slice(&h.entsize.to_le_bytes());
        }
        out
    }
}

/// A string table accumulating NUL-terminated names, starting with the
/// empty string at offset 0.
struct StringTable {
    bytes: Vec<u8>,
}

impl StringTable {
    fn new() -> StringTable {
        StringTable { bytes: vec![0] }
    }

    fn insert(&mut self, name: &str) -> u32 {
        let offset = self.bytes.len() as u32;
        self.bytes.extend_from_slice(name.as_bytes());
        self.bytes.push(0);
        offset
    }

    fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::x64::inst::{Immediate, Opcode, Operand};

    #[test]
    fn forward_branch_records_reloc_then_resolves() {
        let pool = TypePool::new();
        let mut syms = SymbolTable::new();
        let label = syms.create_label(&pool);

        let mut elf = ElfObject::new();
        elf.emit_inst(&Inst::unary(
            Opcode::Jmp,
            Operand::Imm(Immediate::addr(label, 0)),
        ));
        // The forward jump records a PC32 relocation at offset 1 with
        // addend -4 and leaves a zeroed placeholder.
        assert_eq!(elf.text, vec![0xE9, 0xFC, 0xFF, 0xFF, 0xFF]);
        assert_eq!(elf.rela_text.len(), 1);
        assert_eq!(elf.rela_text[0].offset, 1);
        assert_eq!(elf.rela_text[0].kind, Reloc::X86PC32);
        assert_eq!(elf.rela_text[0].addend, -4);

        // Pad with a byte, then place the label and resolve.
        elf.text.push(0x90);
        elf.define_text_label(label);
        elf.resolve_labels(&syms);
        assert!(elf.rela_text.is_empty());
        // Displacement from the end of the jump (offset 5) to the label
        // (offset 6) is 1.
        assert_eq!(&elf.text[1..5], &1i32.to_le_bytes());
    }

    #[test]
    fn backward_branch_needs_no_reloc() {
        let pool = TypePool::new();
        let mut syms = SymbolTable::new();
        let label = syms.create_label(&pool);

        let mut elf = ElfObject::new();
        elf.define_text_label(label);
        elf.text.push(0x90);
        elf.emit_inst(&Inst::unary(
            Opcode::Jmp,
            Operand::Imm(Immediate::addr(label, 0)),
        ));
        assert!(elf.rela_text.is_empty());
        // Jump back to offset 0 from the end of the instruction at 6.
        assert_eq!(&elf.text[2..6], &(-6i32).to_le_bytes());
    }

    #[test]
    fn object_file_shape() {
        let pool = TypePool::new();
        let syms = SymbolTable::new();
        let elf = ElfObject::new();
        let bytes = elf.finalize(&syms, &pool);
        assert_eq!(&bytes[0..4], b"\x7fELF");
        assert_eq!(bytes[4], ELFCLASS64);
        assert_eq!(bytes[5], ELFDATA2LSB);
        assert_eq!(u16::from_le_bytes([bytes[16], bytes[17]]), ET_REL);
        assert_eq!(u16::from_le_bytes([bytes[18], bytes[19]]), EM_X86_64);
        // Ten section headers.
        assert_eq!(u16::from_le_bytes([bytes[60], bytes[61]]), 10);
    }
}
