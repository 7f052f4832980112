//! End-to-end tests: compile C snippets and poke at the resulting ELF
//! image with a minimal reader.

use smallcc::compile;

struct Elf {
    bytes: Vec<u8>,
}

struct SectionRef {
    offset: usize,
    size: usize,
    sh_type: u32,
}

impl Elf {
    fn new(bytes: Vec<u8>) -> Elf {
        assert_eq!(&bytes[0..4], b"\x7fELF");
        assert_eq!(bytes[4], 2, "ELFCLASS64");
        assert_eq!(bytes[5], 1, "little endian");
        assert_eq!(u16::from_le_bytes([bytes[16], bytes[17]]), 1, "ET_REL");
        assert_eq!(u16::from_le_bytes([bytes[18], bytes[19]]), 62, "EM_X86_64");
        Elf { bytes }
    }

    fn u16_at(&self, at: usize) -> u16 {
        u16::from_le_bytes(self.bytes[at..at + 2].try_into().unwrap())
    }

    fn u32_at(&self, at: usize) -> u32 {
        u32::from_le_bytes(self.bytes[at..at + 4].try_into().unwrap())
    }

    fn u64_at(&self, at: usize) -> u64 {
        u64::from_le_bytes(self.bytes[at..at + 8].try_into().unwrap())
    }

    fn section(&self, index: usize) -> SectionRef {
        let shoff = self.u64_at(40) as usize;
        let shnum = self.u16_at(60) as usize;
        assert!(index < shnum);
        let at = shoff + index * 64;
        SectionRef {
            offset: self.u64_at(at + 24) as usize,
            size: self.u64_at(at + 32) as usize,
            sh_type: self.u32_at(at + 4),
        }
    }

    fn section_data(&self, index: usize) -> &[u8] {
        let s = self.section(index);
        &self.bytes[s.offset..s.offset + s.size]
    }

    fn text(&self) -> &[u8] {
        self.section_data(1)
    }

    fn data(&self) -> &[u8] {
        self.section_data(3)
    }

    fn rodata(&self) -> &[u8] {
        self.section_data(6)
    }

    fn strtab(&self) -> &[u8] {
        self.section_data(8)
    }

    fn rela_text_count(&self) -> usize {
        self.section(2).size / 24
    }

    fn has_symbol(&self, name: &str) -> bool {
        let mut needle = Vec::with_capacity(name.len() + 2);
        needle.push(0);
        needle.extend_from_slice(name.as_bytes());
        needle.push(0);
        self.strtab().windows(needle.len()).any(|w| w == needle)
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

#[test]
fn minimal_function() {
    let elf = Elf::new(compile("int nil(void) { return 0; }").unwrap());
    // push %rbp; mov %rsp, %rbp.
    assert_eq!(&elf.text()[0..4], &[0x55, 0x48, 0x89, 0xE5]);
    // A single leave/ret epilogue.
    assert!(contains(elf.text(), &[0xC9, 0xC3]));
    assert!(elf.has_symbol("nil"));
}

#[test]
fn call_to_external_function_relocates() {
    let src = "int putchar(int c); int shout(void) { return putchar('!'); }";
    let elf = Elf::new(compile(src).unwrap());
    assert!(elf.rela_text_count() >= 1);
    assert!(elf.has_symbol("putchar"));
    assert!(elf.has_symbol("shout"));
}

#[test]
fn global_data_images() {
    let src = "int g = 42; int a[3] = {1, 2, 3};";
    let elf = Elf::new(compile(src).unwrap());
    let mut expected = Vec::new();
    for v in [42i32, 1, 2, 3] {
        expected.extend_from_slice(&v.to_le_bytes());
    }
    assert_eq!(elf.data(), expected.as_slice());
}

#[test]
fn char_array_from_string_literal() {
    let elf = Elf::new(compile("char s[] = \"hi\";").unwrap());
    assert_eq!(elf.data(), b"hi\0");
}

#[test]
fn tentative_definition_lands_in_bss() {
    let elf = Elf::new(compile("int x; long y;").unwrap());
    let bss = elf.section(5);
    assert_eq!(bss.sh_type, 8, "SHT_NOBITS");
    assert!(bss.size >= 12);
    assert!(elf.has_symbol("x"));
    assert!(elf.has_symbol("y"));
}

#[test]
fn string_literals_reach_rodata() {
    let src = "const char *greet(void) { return \"hello\"; }";
    let elf = Elf::new(compile(src).unwrap());
    assert!(contains(elf.rodata(), b"hello\0"));
    // __func__ is materialized as a hidden string value.
    assert!(contains(elf.rodata(), b"greet\0"));
}

#[test]
fn control_flow_compiles() {
    let src = "
        int collatz(int n) {
            int steps;
            steps = 0;
            while (n != 1) {
                if (n % 2 == 0) {
                    n = n / 2;
                } else {
                    n = 3 * n + 1;
                }
                steps = steps + 1;
            }
            return steps;
        }
    ";
    let elf = Elf::new(compile(src).unwrap());
    assert!(elf.text().len() > 32);
    // All branch targets are local labels, patched in place.
    assert_eq!(elf.rela_text_count(), 0);
}

#[test]
fn aggregate_argument_passing() {
    let src = "
        struct pair { long a; long b; };
        long takes(struct pair p) { return p.a + p.b; }
        long calls(void) {
            struct pair p;
            p.a = 1;
            p.b = 2;
            return takes(p);
        }
    ";
    let elf = Elf::new(compile(src).unwrap());
    assert!(elf.has_symbol("takes"));
    assert!(elf.has_symbol("calls"));
}

#[test]
fn pointer_initializer_uses_data_relocation() {
    let src = "char *msg = \"boo\";";
    let elf = Elf::new(compile(src).unwrap());
    // Eight zero bytes in .data patched by one R_X86_64_64.
    assert_eq!(elf.data(), &[0u8; 8]);
    let rela_data = elf.section(4);
    assert_eq!(rela_data.size / 24, 1);
    assert!(contains(elf.rodata(), b"boo\0"));
}

#[test]
fn static_local_keeps_function_body_intact() {
    let src = "
        int bump(void) {
            static int counter = 7;
            counter = counter + 1;
            return counter;
        }
    ";
    let elf = Elf::new(compile(src).unwrap());
    assert!(elf.has_symbol("bump"));
    assert!(elf.has_symbol("counter"));
    assert_eq!(elf.data(), 7i32.to_le_bytes().as_slice());
    // The loads and stores of `counter` are RIP-relative.
    assert!(elf.rela_text_count() >= 2);
}

#[test]
fn diagnostics_carry_location() {
    let err = compile("int x = ;").unwrap_err();
    assert_eq!(err.location.line, 1);
    assert!(err.to_string().contains("1:"));
}
